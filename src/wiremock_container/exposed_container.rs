use crate::container::ContainerHandle;
use crate::endpoint::{Endpoint, EndpointResolver, Scheme};
use crate::image::WIREMOCK_HTTP_PORT;
use crate::wiremock_container::WireMockContainerBuilder;
use crate::Error;
use tempfile::TempDir;

/// A WireMock server running in a container, ready to serve requests.
///
/// Each `WireMockContainer` owns its container exclusively: tests running in parallel should each
/// start their own instance.
///
/// The container is stopped by [`WireMockContainer::stop`], or when the `WireMockContainer` goes
/// out of scope (e.g. the test finishes or panics).
///
/// ### Example:
/// ```rust,no_run
/// use wiremock_container::WireMockContainer;
///
/// #[tokio::main]
/// async fn main() {
///     // Arrange
///     let wiremock = WireMockContainer::builder()
///         .tag("3.3.1")
///         .with_mapping(
///             "hello",
///             r#"{
///                 "request": { "method": "GET", "url": "/hello" },
///                 "response": { "status": 200, "body": "Hello, world!" }
///             }"#,
///         )
///         .start()
///         .await
///         .unwrap();
///
///     // Act
///     let body = reqwest::get(wiremock.url("hello"))
///         .await
///         .unwrap()
///         .text()
///         .await
///         .unwrap();
///
///     // Assert
///     assert_eq!(body, "Hello, world!");
/// }
/// ```
pub struct WireMockContainer {
    // Declared first: the container must go away before the mappings it mounts are deleted.
    handle: ContainerHandle,
    endpoint: Endpoint,
    _stub_dir: Option<TempDir>,
}

impl WireMockContainer {
    pub(super) fn new(handle: ContainerHandle, endpoint: Endpoint, stub_dir: Option<TempDir>) -> Self {
        Self {
            handle,
            endpoint,
            _stub_dir: stub_dir,
        }
    }

    /// You can use `WireMockContainer::builder` to configure mappings, files, extensions and
    /// the image to run, then call [`WireMockContainerBuilder::start`].
    pub fn builder() -> WireMockContainerBuilder {
        WireMockContainerBuilder::new()
    }

    /// Start the official image with no mappings and the default settings.
    pub async fn start() -> Result<Self, Error> {
        Self::builder().start().await
    }

    /// Return the base uri of this instance, e.g. `http://localhost:49153`.
    ///
    /// It is the endpoint WireMock answered on during startup, and it keeps being returned after
    /// [`WireMockContainer::stop`]: use [`WireMockContainer::endpoint`] to check that the
    /// container is still running.
    pub fn uri(&self) -> String {
        self.endpoint.uri()
    }

    /// Return the uri of `path` on this instance. `hello` and `/hello` are equivalent.
    pub fn url(&self, path: &str) -> String {
        self.endpoint.url(path)
    }

    pub fn host(&self) -> &str {
        self.endpoint.host()
    }

    /// The host port WireMock's HTTP port is published on.
    pub fn port(&self) -> u16 {
        self.endpoint.port()
    }

    /// Resolve the HTTP endpoint from the current state of the container.
    pub fn endpoint(&self) -> Result<Endpoint, Error> {
        EndpointResolver::new(&self.handle).base_url(WIREMOCK_HTTP_PORT, Scheme::Http)
    }

    /// The host port a given container port is published on.
    pub fn mapped_port(&self, container_port: u16) -> Result<u16, Error> {
        EndpointResolver::new(&self.handle)
            .base_url(container_port, Scheme::Http)
            .map(|endpoint| endpoint.port())
    }

    /// Everything WireMock wrote to stdout and stderr so far.
    pub async fn logs(&self) -> Result<String, Error> {
        self.handle.logs().await
    }

    /// Stop the container. Calling it more than once is harmless.
    pub async fn stop(&mut self) {
        self.handle.stop().await
    }

    pub fn handle(&self) -> &ContainerHandle {
        &self.handle
    }
}
