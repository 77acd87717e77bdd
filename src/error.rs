use crate::container::ContainerState;
use crate::runtime::RuntimeError;
use std::path::PathBuf;
use std::time::Duration;

/// Everything that can go wrong while provisioning a WireMock container.
///
/// Nothing is retried internally: every variant is surfaced to the caller, who can decide to
/// build a fresh [`ContainerHandle`](crate::ContainerHandle) and try again.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Invalid input, detected before any call to the container runtime.
    #[error("Invalid configuration: {0}")]
    Configuration(String),
    /// A host path that was supposed to be mounted into the container is missing or unreadable.
    #[error("Cannot mount `{}` into the container: {source}", .path.display())]
    Mount {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    /// The container runtime refused to create or start the container.
    #[error("Failed to launch the container: {0}")]
    RuntimeLaunch(String),
    /// An endpoint was requested while the container was not running.
    #[error("The container is not running (current state: {state:?})")]
    NotReady { state: ContainerState },
    /// An endpoint was requested for a container port that has no host binding.
    #[error("Container port {0} is not exposed")]
    PortNotExposed(u16),
    /// The mock server did not answer its health check in time.
    #[error(
        "WireMock was not ready after {elapsed:?} ({attempts} attempts). Last failure: {last_failure}{}",
        format_logs(.logs)
    )]
    Timeout {
        elapsed: Duration,
        attempts: u32,
        last_failure: String,
        /// Container output captured when the probe gave up, if it was available.
        logs: Option<String>,
    },
    /// The container was stopped while we were waiting for it to become ready.
    #[error("The container was stopped while waiting for WireMock to become ready")]
    Cancelled,
    #[error(transparent)]
    Runtime(#[from] RuntimeError),
}

fn format_logs(logs: &Option<String>) -> String {
    match logs {
        Some(logs) if !logs.trim().is_empty() => format!("\nContainer logs:\n{}", logs.trim_end()),
        _ => String::new(),
    }
}
