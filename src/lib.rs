#![allow(clippy::needless_doctest_main)]
//! `wiremock-container` runs [WireMock] in a container, to perform black-box testing of Rust
//! applications that interact with third-party APIs.
//!
//! It takes care of pulling the image, mounting your stub mappings, response files and
//! extensions, publishing WireMock's port on a random host port and waiting until WireMock
//! answers requests.
//!
//! # Table of Contents
//! 1. [Getting started](#getting-started)
//! 2. [Mappings, files and extensions](#mappings-files-and-extensions)
//! 3. [Test isolation](#test-isolation)
//! 4. [Building blocks](#building-blocks)
//! 5. [Configuration](#configuration)
//!
//! ## Getting started
//! ```rust,no_run
//! use wiremock_container::WireMockContainer;
//!
//! #[tokio::main]
//! async fn main() {
//!     // Start WireMock in a container, on a random host port
//!     let wiremock = WireMockContainer::builder()
//!         .with_mapping(
//!             "hello",
//!             r#"{
//!                 "request": { "method": "GET", "url": "/hello" },
//!                 "response": { "status": 200, "body": "Hello, world!" }
//!             }"#,
//!         )
//!         .start()
//!         .await
//!         .unwrap();
//!
//!     // The mapping is live
//!     let status = reqwest::get(wiremock.url("/hello")).await.unwrap().status();
//!     assert_eq!(status.as_u16(), 200);
//!
//!     // If the request doesn't match any mapping, WireMock returns a 404.
//!     let status = reqwest::get(wiremock.url("/missing")).await.unwrap().status();
//!     assert_eq!(status.as_u16(), 404);
//! }
//! ```
//!
//! ## Mappings, files and extensions
//!
//! Stub mappings can be provided inline ([`WireMockContainerBuilder::with_mapping`]) or as files
//! ([`WireMockContainerBuilder::with_mapping_file`]). Response bodies referenced with
//! `bodyFileName` are added with [`WireMockContainerBuilder::with_file`], or all at once with a
//! root directory ([`WireMockContainerBuilder::with_root_dir`]).
//!
//! Extensions are jars mounted into `/var/wiremock/extensions`, with their classes passed to
//! WireMock's `--extensions` flag.
//!
//! ## Test isolation
//!
//! Each [`WireMockContainer`] owns its own container, published on a random host port: tests can
//! run in parallel without interfering with each other.
//!
//! When a [`WireMockContainer`] goes out of scope (e.g. the test finishes, or panics) the
//! container is removed.
//!
//! ## Building blocks
//!
//! [`WireMockContainer`] is assembled from smaller pieces, which you can use on their own:
//! - [`ImageSpec`], the image to run;
//! - [`MountPlanner`], mapping host paths to the paths WireMock expects inside the container;
//! - [`ContainerHandle`], the container lifecycle, on top of a [`ContainerRuntime`];
//! - [`EndpointResolver`], to find where a container port is published;
//! - [`ReadinessProbe`], to wait until WireMock answers on its admin API.
//!
//! [`ContainerRuntime`] is a trait: the `docker` feature (enabled by default) provides
//! [`DockerRuntime`], and you can plug your own.
//!
//! ## Configuration
//!
//! - `WIREMOCK_CONTAINER_TAG`: the tag of the official image to run by default (`latest`);
//! - `WIREMOCK_CONTAINER_STARTUP_TIMEOUT_SECS`: how long to wait for WireMock to be ready (60);
//! - `DOCKER_HOST`: the Docker engine to talk to.
//!
//! [WireMock]: https://wiremock.org/
//! [`WireMockContainerBuilder::with_mapping`]: crate::WireMockContainerBuilder::with_mapping
//! [`WireMockContainerBuilder::with_mapping_file`]: crate::WireMockContainerBuilder::with_mapping_file
//! [`WireMockContainerBuilder::with_file`]: crate::WireMockContainerBuilder::with_file
//! [`WireMockContainerBuilder::with_root_dir`]: crate::WireMockContainerBuilder::with_root_dir
mod container;
mod endpoint;
mod error;
pub mod image;
pub mod mount;
pub mod readiness;
pub mod runtime;
mod wiremock_container;

pub use container::{ContainerHandle, ContainerState, StopSignal};
pub use endpoint::{Endpoint, EndpointResolver, Scheme};
pub use error::Error;
pub use image::ImageSpec;
pub use mount::{ConfiguredPath, MountEntry, MountKind, MountPlanner};
pub use readiness::{Backoff, Clock, HealthCheck, HttpHealthCheck, ManualClock, ReadinessProbe, SystemClock};
#[cfg(feature = "docker")]
pub use runtime::DockerRuntime;
pub use runtime::{ContainerRuntime, CreateRequest, Inspection, RuntimeError};
pub use wiremock_container::{WireMockContainer, WireMockContainerBuilder};
