//! The narrow interface we need from a container engine.
//!
//! `ContainerHandle` only ever talks to a `dyn ContainerRuntime`: `DockerRuntime` (behind the
//! `docker` feature) drives a real engine, while tests can plug in a scripted fake.
use crate::image::ImageSpec;
use crate::mount::MountEntry;
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;

#[cfg(feature = "docker")]
mod docker;

#[cfg(feature = "docker")]
pub use docker::DockerRuntime;

/// An error reported by the container runtime, with its diagnostic message.
#[derive(Debug, Clone, thiserror::Error)]
#[error("{operation} failed: {message}")]
pub struct RuntimeError {
    pub operation: &'static str,
    pub message: String,
}

impl RuntimeError {
    pub fn new(operation: &'static str, message: impl Into<String>) -> Self {
        Self {
            operation,
            message: message.into(),
        }
    }
}

/// Everything the runtime needs to create a container.
#[derive(Debug, Clone)]
pub struct CreateRequest {
    pub image: ImageSpec,
    pub mounts: Vec<MountEntry>,
    /// Arguments passed to the image entrypoint.
    pub command: Vec<String>,
}

/// What the runtime currently knows about a container.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Inspection {
    /// Whether the container process is running.
    pub running: bool,
    /// Set once the container process has terminated.
    pub exit_code: Option<i64>,
    /// The host the published ports are reachable on, as seen by the test process.
    pub host: String,
    /// Container port to host port.
    pub ports: HashMap<u16, u16>,
}

#[async_trait]
pub trait ContainerRuntime: Send + Sync {
    /// Create (but do not start) a container, returning its id.
    async fn create(&self, request: &CreateRequest) -> Result<String, RuntimeError>;

    async fn start(&self, id: &str) -> Result<(), RuntimeError>;

    async fn inspect(&self, id: &str) -> Result<Inspection, RuntimeError>;

    /// Stop the container and release every resource associated with it.
    async fn stop(&self, id: &str) -> Result<(), RuntimeError>;

    /// Everything the container wrote to stdout and stderr so far.
    async fn logs(&self, id: &str) -> Result<Vec<u8>, RuntimeError>;

    /// A client for the same engine that does not depend on the tokio runtime this one was used
    /// on, e.g. because it opens its own connections.
    ///
    /// A [`ContainerHandle`](crate::ContainerHandle) dropped on a current-thread runtime stops
    /// its container through it, from a dedicated thread. Without one, the teardown is spawned
    /// on the caller's runtime and only happens if that runtime keeps running.
    fn detached(&self) -> Option<Arc<dyn ContainerRuntime>> {
        None
    }
}
