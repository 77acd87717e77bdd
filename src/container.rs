use crate::image::ImageSpec;
use crate::mount::MountEntry;
use crate::runtime::{ContainerRuntime, CreateRequest};
use crate::Error;
use log::{debug, warn};
use std::collections::HashMap;
use std::future::Future;
use std::sync::mpsc::RecvTimeoutError;
use std::sync::Arc;
use std::time::Duration;
use tokio::runtime::{Handle, RuntimeFlavor};
use tokio::sync::watch;

/// How many times we ask the runtime whether the container process is up, after starting it.
const RUNNING_CHECK_ATTEMPTS: u32 = 40;
const RUNNING_CHECK_INTERVAL: Duration = Duration::from_millis(25);
/// How long dropping a handle may block while the container is being stopped.
const TEARDOWN_TIMEOUT: Duration = Duration::from_secs(30);

/// The lifecycle of a [`ContainerHandle`].
///
/// `Created --start()--> Starting --(runtime reports running)--> Running --stop()--> Stopped`.
/// Any failure while starting moves the handle to `Failed`, which is terminal: build a new handle
/// to try again.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum ContainerState {
    Created,
    Starting,
    Running,
    Stopped,
    Failed,
}

/// One container, exclusively owned by whoever created it.
///
/// The runtime resource is released by [`ContainerHandle::stop`], or when the handle is dropped
/// if `stop` was never called - even if the test body panicked.
///
/// Dropping a running handle blocks until the container is stopped, except on a current-thread
/// tokio runtime whose [`ContainerRuntime`] has no [`detached`](ContainerRuntime::detached)
/// client: the teardown is then spawned on that runtime, and it is lost if the runtime shuts
/// down first. `DockerRuntime::connect` always provides one.
pub struct ContainerHandle {
    runtime: Arc<dyn ContainerRuntime>,
    image: ImageSpec,
    mounts: Vec<MountEntry>,
    command: Vec<String>,
    id: Option<String>,
    state: ContainerState,
    host: Option<String>,
    port_bindings: HashMap<u16, u16>,
    stop_trigger: watch::Sender<bool>,
}

impl ContainerHandle {
    /// Prepare a container. Nothing is submitted to the runtime until [`start`] is called, but the
    /// mounts are frozen from now on.
    ///
    /// [`start`]: ContainerHandle::start
    pub fn new(
        runtime: Arc<dyn ContainerRuntime>,
        image: ImageSpec,
        mounts: Vec<MountEntry>,
    ) -> Self {
        let (stop_trigger, _) = watch::channel(false);
        Self {
            runtime,
            image,
            mounts,
            command: Vec::new(),
            id: None,
            state: ContainerState::Created,
            host: None,
            port_bindings: HashMap::new(),
            stop_trigger,
        }
    }

    /// Arguments passed to the image entrypoint.
    pub fn with_command(mut self, command: Vec<String>) -> Self {
        self.command = command;
        self
    }

    /// Submit the container to the runtime and wait until its process is running.
    ///
    /// It does *not* wait for the mock server inside the container to accept requests: that's
    /// what [`ReadinessProbe`](crate::ReadinessProbe) is for.
    pub async fn start(&mut self) -> Result<(), Error> {
        if self.state != ContainerState::Created {
            return Err(Error::Configuration(format!(
                "A container can only be started once (current state: {:?})",
                self.state
            )));
        }
        self.state = ContainerState::Starting;
        debug!("Starting container for {}.", self.image);
        match self.launch().await {
            Ok(()) => {
                self.state = ContainerState::Running;
                debug!(
                    "Container {} is running, ports: {:?}.",
                    self.id.as_deref().unwrap_or_default(),
                    self.port_bindings
                );
                Ok(())
            }
            Err(e) => {
                self.state = ContainerState::Failed;
                self.port_bindings.clear();
                // Whatever the runtime allocated before failing must not outlive the handle.
                self.release().await;
                Err(e)
            }
        }
    }

    async fn launch(&mut self) -> Result<(), Error> {
        let request = CreateRequest {
            image: self.image.clone(),
            mounts: self.mounts.clone(),
            command: self.command.clone(),
        };
        let id = self
            .runtime
            .create(&request)
            .await
            .map_err(|e| Error::RuntimeLaunch(e.to_string()))?;
        self.id = Some(id.clone());

        self.runtime
            .start(&id)
            .await
            .map_err(|e| Error::RuntimeLaunch(e.to_string()))?;

        for _ in 0..RUNNING_CHECK_ATTEMPTS {
            let inspection = self
                .runtime
                .inspect(&id)
                .await
                .map_err(|e| Error::RuntimeLaunch(e.to_string()))?;
            if inspection.running {
                self.host = Some(inspection.host);
                self.port_bindings = inspection.ports;
                return Ok(());
            }
            if let Some(exit_code) = inspection.exit_code {
                let logs = self.logs().await.unwrap_or_default();
                return Err(Error::RuntimeLaunch(format!(
                    "The container exited with code {}. Logs:\n{}",
                    exit_code, logs
                )));
            }
            tokio::time::sleep(RUNNING_CHECK_INTERVAL).await;
        }
        Err(Error::RuntimeLaunch(format!(
            "The runtime did not report container {} as running",
            id
        )))
    }

    /// Stop the container and release the runtime resource.
    ///
    /// Calling `stop` on a handle that is not running is a no-op. Runtime failures are logged
    /// instead of being returned: `stop` is mostly called during cleanup, where an error would
    /// mask the failure that triggered it.
    pub async fn stop(&mut self) {
        self.stop_trigger.send_replace(true);
        match self.state {
            ContainerState::Starting | ContainerState::Running => {
                self.state = ContainerState::Stopped;
                self.port_bindings.clear();
                self.release().await;
            }
            ContainerState::Created | ContainerState::Stopped | ContainerState::Failed => {}
        }
    }

    async fn release(&mut self) {
        if let Some(id) = self.id.take() {
            debug!("Stopping container {}.", id);
            if let Err(e) = self.runtime.stop(&id).await {
                warn!("Failed to stop container {}: {}", id, e);
            }
        }
    }

    /// A snapshot of everything the container wrote to stdout and stderr since it started.
    pub async fn logs(&self) -> Result<String, Error> {
        let Some(id) = &self.id else {
            return Ok(String::new());
        };
        let bytes = self.runtime.logs(id).await?;
        Ok(String::from_utf8_lossy(&bytes).into_owned())
    }

    /// A signal that resolves as soon as [`stop`](ContainerHandle::stop) is called on this handle.
    pub fn stop_signal(&self) -> StopSignal {
        StopSignal(self.stop_trigger.subscribe())
    }

    pub fn state(&self) -> ContainerState {
        self.state
    }

    /// The id assigned by the runtime, while it owns a resource for this handle.
    pub fn id(&self) -> Option<&str> {
        self.id.as_deref()
    }

    pub fn image(&self) -> &ImageSpec {
        &self.image
    }

    pub fn mounts(&self) -> &[MountEntry] {
        &self.mounts
    }

    pub fn command(&self) -> &[String] {
        &self.command
    }

    /// The host published ports are reachable on. `None` unless the container is running.
    pub fn host(&self) -> Option<&str> {
        match self.state {
            ContainerState::Running => self.host.as_deref(),
            _ => None,
        }
    }

    /// Container port to host port. Empty unless the container is running.
    pub fn port_bindings(&self) -> &HashMap<u16, u16> {
        &self.port_bindings
    }
}

impl Drop for ContainerHandle {
    // Clean up when the `ContainerHandle` goes out of scope without an explicit `stop`.
    fn drop(&mut self) {
        self.stop_trigger.send_replace(true);
        let Some(id) = self.id.take() else {
            return;
        };
        match Handle::try_current() {
            // Other workers keep driving the runtime's connections while we block.
            Ok(handle) if handle.runtime_flavor() == RuntimeFlavor::MultiThread => {
                let teardown = stop_on_drop(self.runtime.clone(), id);
                tokio::task::block_in_place(|| handle.block_on(teardown))
            }
            // Blocking here would starve whatever the runtime client relies on.
            Ok(handle) => match self.runtime.detached() {
                Some(runtime) => block_on_dedicated_thread(stop_on_drop(runtime, id)),
                None => {
                    debug!("Stopping container {} in the background.", id);
                    handle.spawn(stop_on_drop(self.runtime.clone(), id));
                }
            },
            Err(_) => {
                let runtime = self
                    .runtime
                    .detached()
                    .unwrap_or_else(|| self.runtime.clone());
                block_on_dedicated_thread(stop_on_drop(runtime, id))
            }
        }
    }
}

async fn stop_on_drop(runtime: Arc<dyn ContainerRuntime>, id: String) {
    debug!("Stopping container {} on drop.", id);
    if let Err(e) = runtime.stop(&id).await {
        warn!("Failed to stop container {} on drop: {}", id, e);
    }
}

/// Run `teardown` to completion on a new thread, with its own current-thread runtime, waiting
/// at most [`TEARDOWN_TIMEOUT`] for it.
fn block_on_dedicated_thread<F>(teardown: F)
where
    F: Future<Output = ()> + Send + 'static,
{
    let (done, finished) = std::sync::mpsc::channel();
    let spawned = std::thread::Builder::new()
        .name("wiremock-container-teardown".into())
        .spawn(move || {
            match tokio::runtime::Builder::new_current_thread()
                .enable_all()
                .build()
            {
                Ok(runtime) => runtime.block_on(teardown),
                Err(e) => warn!("Cannot build a runtime to stop the container: {}", e),
            }
            let _ = done.send(());
        });
    if let Err(e) = spawned {
        warn!("Cannot spawn a thread to stop the container: {}", e);
        return;
    }
    match finished.recv_timeout(TEARDOWN_TIMEOUT) {
        Ok(()) => {}
        Err(RecvTimeoutError::Timeout) => warn!(
            "The container was not stopped within {:?}, giving up.",
            TEARDOWN_TIMEOUT
        ),
        Err(RecvTimeoutError::Disconnected) => warn!("The container teardown thread panicked."),
    }
}

/// Resolves once the [`ContainerHandle`] it was obtained from is stopped (or dropped).
#[derive(Debug, Clone)]
pub struct StopSignal(watch::Receiver<bool>);

impl StopSignal {
    pub fn is_stopped(&self) -> bool {
        *self.0.borrow()
    }

    pub async fn stopped(&mut self) {
        // An error means the handle is gone, which counts as stopped.
        let _ = self.0.wait_for(|stopped| *stopped).await;
    }
}
