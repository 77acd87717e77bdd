use crate::container::ContainerHandle;
use crate::endpoint::{EndpointResolver, Scheme};
use crate::image::{ImageSpec, DEFAULT_TAG, WIREMOCK_HTTP_PORT};
use crate::mount::{jars_in, ConfiguredPath, MountKind, MountPlanner};
use crate::readiness::{Backoff, Clock, HttpHealthCheck, ReadinessProbe, SystemClock};
use crate::runtime::ContainerRuntime;
use crate::wiremock_container::WireMockContainer;
use crate::Error;
use http::StatusCode;
use log::debug;
use serde::Serialize;
use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;

const DEFAULT_STARTUP_TIMEOUT: Duration = Duration::from_secs(60);

/// A WireMock extension: the classes to register and the jars they live in.
///
/// Both lists can be empty: WireMock 3 discovers extensions on its own, and extensions bundled
/// with WireMock do not need extra jars.
#[derive(Debug, Clone)]
struct Extension {
    id: String,
    class_names: Vec<String>,
    jars: Vec<PathBuf>,
}

/// A builder providing a fluent API to assemble a [`WireMockContainer`] step-by-step.
/// Use [`WireMockContainer::builder`] to get started.
///
/// Mistakes (e.g. an inline mapping that is not valid JSON) do not interrupt the chain of calls:
/// the first one is returned by [`WireMockContainerBuilder::start`].
pub struct WireMockContainerBuilder {
    image: Option<ImageSpec>,
    tag: String,
    mapping_stubs: Vec<(String, String)>,
    mapping_files: Vec<(String, PathBuf)>,
    files: Vec<(String, PathBuf)>,
    root_dir: Option<PathBuf>,
    extensions: Vec<Extension>,
    cli_args: Vec<String>,
    banner: bool,
    startup_timeout: Duration,
    health_check: HttpHealthCheck,
    backoff: Backoff,
    clock: Arc<dyn Clock>,
    runtime: Option<Arc<dyn ContainerRuntime>>,
    error: Option<Error>,
}

impl WireMockContainerBuilder {
    pub(super) fn new() -> Self {
        let tag = env::var("WIREMOCK_CONTAINER_TAG")
            .ok()
            .filter(|tag| !tag.trim().is_empty())
            .unwrap_or_else(|| DEFAULT_TAG.to_owned());
        let startup_timeout = env::var("WIREMOCK_CONTAINER_STARTUP_TIMEOUT_SECS")
            .ok()
            .and_then(|x| x.parse::<u64>().ok())
            .map(Duration::from_secs)
            .unwrap_or(DEFAULT_STARTUP_TIMEOUT);
        Self {
            image: None,
            tag,
            mapping_stubs: Vec::new(),
            mapping_files: Vec::new(),
            files: Vec::new(),
            root_dir: None,
            extensions: Vec::new(),
            cli_args: Vec::new(),
            banner: false,
            startup_timeout,
            health_check: HttpHealthCheck::default(),
            backoff: Backoff::default(),
            clock: Arc::new(SystemClock),
            runtime: None,
            error: None,
        }
    }

    /// Run a specific image instead of the official `wiremock/wiremock` one.
    ///
    /// Other images are supported as long as they follow the layout of the official image.
    pub fn image(mut self, image: ImageSpec) -> Self {
        self.image = Some(image);
        self
    }

    /// Run a specific tag of the official image.
    ///
    /// It defaults to the `WIREMOCK_CONTAINER_TAG` environment variable, or `latest`.
    pub fn tag(mut self, tag: impl Into<String>) -> Self {
        self.tag = tag.into();
        self
    }

    /// Add a stub mapping, as a JSON document.
    ///
    /// It is loaded by WireMock on startup from `mappings/<name>.json`. Adding a mapping with the
    /// same name twice replaces the first one.
    ///
    /// ### Example:
    /// ```rust
    /// use wiremock_container::WireMockContainer;
    ///
    /// let builder = WireMockContainer::builder().with_mapping(
    ///     "hello",
    ///     r#"{
    ///         "request": { "method": "GET", "url": "/hello" },
    ///         "response": { "status": 200, "body": "Hello, world!" }
    ///     }"#,
    /// );
    /// ```
    pub fn with_mapping(mut self, name: impl Into<String>, json: impl Into<String>) -> Self {
        let name = name.into();
        let json = json.into();
        if let Err(e) = serde_json::from_str::<serde_json::Value>(&json) {
            self.record(Error::Configuration(format!(
                "The mapping `{}` is not valid JSON: {}",
                name, e
            )));
            return self;
        }
        match self.mapping_stubs.iter_mut().find(|(n, _)| *n == name) {
            Some(stub) => stub.1 = json,
            None => self.mapping_stubs.push((name, json)),
        }
        self
    }

    /// Add a stub mapping built from any serializable value, e.g. a `serde_json::json!` literal.
    pub fn with_mapping_value<T: Serialize>(mut self, name: impl Into<String>, mapping: &T) -> Self {
        let name = name.into();
        match serde_json::to_string_pretty(mapping) {
            Ok(json) => self.with_mapping(name, json),
            Err(e) => {
                self.record(Error::Configuration(format!(
                    "The mapping `{}` cannot be serialized: {}",
                    name, e
                )));
                self
            }
        }
    }

    /// Add a stub mapping from a JSON file on the host.
    pub fn with_mapping_file(mut self, name: impl Into<String>, path: impl Into<PathBuf>) -> Self {
        self.mapping_files.push((json_file_name(name.into()), path.into()));
        self
    }

    /// Make a host file available to stubs as `bodyFileName: <name>`.
    pub fn with_file(mut self, name: impl Into<String>, path: impl Into<PathBuf>) -> Self {
        self.files.push((name.into(), path.into()));
        self
    }

    /// Mount a whole WireMock root directory, with its `mappings` and `__files` sub-directories.
    ///
    /// Mappings and files added individually are layered on top of it.
    pub fn with_root_dir(mut self, path: impl Into<PathBuf>) -> Self {
        self.root_dir = Some(path.into());
        self
    }

    /// Add an extension made of the given classes, loaded from the given jars.
    ///
    /// `id` identifies the extension: adding another extension with the same `id` replaces it.
    pub fn with_extension<I, S, J, P>(mut self, id: impl Into<String>, class_names: I, jars: J) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
        J: IntoIterator<Item = P>,
        P: Into<PathBuf>,
    {
        let extension = Extension {
            id: id.into(),
            class_names: class_names.into_iter().map(Into::into).collect(),
            jars: jars.into_iter().map(Into::into).collect(),
        };
        match self.extensions.iter_mut().find(|e| e.id == extension.id) {
            Some(existing) => *existing = extension,
            None => self.extensions.push(extension),
        }
        self
    }

    /// Add an extension loaded from every `*.jar` file found in `dir`, recursively.
    pub fn with_extension_dir<I, S>(mut self, id: impl Into<String>, class_names: I, dir: impl AsRef<Path>) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        match jars_in(dir.as_ref()) {
            Ok(jars) => self.with_extension(id, class_names, jars),
            Err(e) => {
                self.record(e);
                self
            }
        }
    }

    /// Register an extension class that is already on WireMock's classpath.
    pub fn with_extension_class(self, id: impl Into<String>, class_name: impl Into<String>) -> Self {
        self.with_extension(id, [class_name.into()], Vec::<PathBuf>::new())
    }

    /// Pass extra arguments to WireMock, e.g. `--verbose` or `--global-response-templating`.
    /// Arguments are split on whitespace.
    pub fn with_cli_arg(mut self, arg: impl AsRef<str>) -> Self {
        self.cli_args
            .extend(arg.as_ref().split_whitespace().map(str::to_owned));
        self
    }

    /// Print the WireMock banner on startup. It is hidden by default, unless `--verbose` is set.
    pub fn with_banner(mut self) -> Self {
        self.banner = true;
        self
    }

    pub fn without_banner(mut self) -> Self {
        self.banner = false;
        self
    }

    /// How long to wait for WireMock to become ready.
    ///
    /// It defaults to the `WIREMOCK_CONTAINER_STARTUP_TIMEOUT_SECS` environment variable, or
    /// 60 seconds.
    pub fn startup_timeout(mut self, timeout: Duration) -> Self {
        self.startup_timeout = timeout;
        self
    }

    /// The admin route polled to decide whether WireMock is ready, and the status it must return.
    /// `GET /__admin/mappings` with a `200` by default.
    pub fn health_check(mut self, path: impl Into<String>, status: StatusCode) -> Self {
        self.health_check = HttpHealthCheck::new(path, status);
        self
    }

    pub fn backoff(mut self, backoff: Backoff) -> Self {
        self.backoff = backoff;
        self
    }

    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// The container runtime to use. A `DockerRuntime` connected with the environment defaults is
    /// used if none is specified (requires the `docker` feature).
    pub fn runtime(mut self, runtime: Arc<dyn ContainerRuntime>) -> Self {
        self.runtime = Some(runtime);
        self
    }

    /// The arguments WireMock will be launched with.
    pub fn command(&self) -> Vec<String> {
        let mut args = self.cli_args.clone();
        let verbose = args.iter().any(|arg| arg == "--verbose");
        if !self.banner && !verbose {
            args.push("--disable-banner".to_owned());
        }
        let class_names: Vec<&str> = self
            .extensions
            .iter()
            .flat_map(|e| e.class_names.iter().map(String::as_str))
            .collect();
        if !class_names.is_empty() {
            args.push("--extensions".to_owned());
            args.push(class_names.join(","));
        }
        args
    }

    /// Launch the container and wait until WireMock is ready to serve requests.
    ///
    /// If WireMock does not become ready within the startup timeout, the container logs are
    /// attached to the returned [`Error::Timeout`] and the container is stopped.
    pub async fn start(mut self) -> Result<WireMockContainer, Error> {
        if let Some(e) = self.error.take() {
            return Err(e);
        }
        let image = match self.image.take() {
            Some(image) => image,
            None => ImageSpec::official(self.tag.as_str())?,
        };
        let runtime = match self.runtime.take() {
            Some(runtime) => runtime,
            None => default_runtime()?,
        };

        let stub_dir = self.write_mapping_stubs()?;
        let configured = self.configured_paths(stub_dir.as_ref());
        let mounts = MountPlanner::new().plan(&configured)?;

        let mut handle = ContainerHandle::new(runtime, image, mounts).with_command(self.command());
        handle.start().await?;

        let endpoint = match EndpointResolver::new(&handle).base_url(WIREMOCK_HTTP_PORT, Scheme::Http) {
            Ok(endpoint) => endpoint,
            Err(e) => {
                handle.stop().await;
                return Err(e);
            }
        };
        debug!("Waiting for WireMock to be ready on {}.", endpoint);
        let probe = ReadinessProbe::new(self.health_check.clone())
            .with_clock(self.clock.clone())
            .with_backoff(self.backoff);
        let outcome = probe
            .wait_until_ready_or_stopped(&endpoint, self.startup_timeout, handle.stop_signal())
            .await;
        match outcome {
            Ok(()) => Ok(WireMockContainer::new(handle, endpoint, stub_dir)),
            Err(Error::Timeout {
                elapsed,
                attempts,
                last_failure,
                ..
            }) => {
                let logs = handle.logs().await.ok();
                handle.stop().await;
                Err(Error::Timeout {
                    elapsed,
                    attempts,
                    last_failure,
                    logs,
                })
            }
            Err(e) => {
                handle.stop().await;
                Err(e)
            }
        }
    }

    fn record(&mut self, error: Error) {
        if self.error.is_none() {
            self.error = Some(error);
        }
    }

    /// Inline mappings have to live on the host to be mounted: write them to a temporary
    /// directory that lives as long as the container.
    fn write_mapping_stubs(&self) -> Result<Option<TempDir>, Error> {
        if self.mapping_stubs.is_empty() {
            return Ok(None);
        }
        let dir = tempfile::Builder::new()
            .prefix("wiremock-mappings-")
            .tempdir()
            .map_err(|source| Error::Mount {
                path: env::temp_dir(),
                source,
            })?;
        for (index, (_, json)) in self.mapping_stubs.iter().enumerate() {
            let path = dir.path().join(format!("{}.json", index));
            fs::write(&path, json).map_err(|source| Error::Mount { path, source })?;
        }
        Ok(Some(dir))
    }

    fn configured_paths(&self, stub_dir: Option<&TempDir>) -> Vec<ConfiguredPath> {
        let mut configured = Vec::new();
        if let Some(root_dir) = &self.root_dir {
            configured.push(ConfiguredPath::new(root_dir, MountKind::RootDir));
        }
        if let Some(stub_dir) = stub_dir {
            for (index, (name, _)) in self.mapping_stubs.iter().enumerate() {
                configured.push(ConfiguredPath::new(
                    stub_dir.path().join(format!("{}.json", index)),
                    MountKind::Mapping {
                        name: json_file_name(name.clone()),
                    },
                ));
            }
        }
        for (name, path) in &self.mapping_files {
            configured.push(ConfiguredPath::new(
                path,
                MountKind::Mapping { name: name.clone() },
            ));
        }
        for (name, path) in &self.files {
            configured.push(ConfiguredPath::new(
                path,
                MountKind::File { name: name.clone() },
            ));
        }
        for extension in &self.extensions {
            for jar in &extension.jars {
                configured.push(ConfiguredPath::new(jar, MountKind::Extension));
            }
        }
        configured
    }
}

fn json_file_name(name: String) -> String {
    if name.ends_with(".json") {
        name
    } else {
        format!("{}.json", name)
    }
}

#[cfg(feature = "docker")]
fn default_runtime() -> Result<Arc<dyn ContainerRuntime>, Error> {
    let runtime = crate::runtime::DockerRuntime::connect()
        .map_err(|e| Error::RuntimeLaunch(e.to_string()))?;
    Ok(Arc::new(runtime))
}

#[cfg(not(feature = "docker"))]
fn default_runtime() -> Result<Arc<dyn ContainerRuntime>, Error> {
    Err(Error::Configuration(
        "No container runtime configured: enable the `docker` feature or call `runtime`".into(),
    ))
}
