use crate::runtime::{ContainerRuntime, CreateRequest, Inspection, RuntimeError};
use async_trait::async_trait;
use bollard::container::{
    Config, InspectContainerOptions, LogsOptions, RemoveContainerOptions, StartContainerOptions,
};
use bollard::image::CreateImageOptions;
use bollard::models::{HostConfig, Mount, MountTypeEnum, PortMap};
use bollard::Docker;
use futures::TryStreamExt;
use log::{debug, warn};
use std::collections::HashMap;
use std::env;
use std::sync::Arc;
use url::Url;

/// A [`ContainerRuntime`] backed by a Docker (or Docker-compatible) engine.
///
/// The connection honours the usual `DOCKER_HOST` environment variable. When it points to a
/// remote engine over TCP, published ports are reported on that host instead of `localhost`.
#[derive(Clone)]
pub struct DockerRuntime {
    docker: Docker,
    host: String,
    // How to open a fresh client. Connections of the current one belong to the tokio runtime
    // that opened them.
    reconnect: Option<fn() -> Result<Docker, bollard::errors::Error>>,
}

impl DockerRuntime {
    /// Connect using the environment defaults (`DOCKER_HOST`, or the local socket).
    pub fn connect() -> Result<Self, RuntimeError> {
        let docker = Docker::connect_with_defaults()
            .map_err(|e| RuntimeError::new("connect", e.to_string()))?;
        Ok(Self {
            reconnect: Some(Docker::connect_with_defaults),
            ..Self::with_client(docker)
        })
    }

    /// Use an already configured `bollard` client.
    ///
    /// A runtime built this way cannot open a second client: containers dropped on a
    /// current-thread tokio runtime are only removed if that runtime keeps running. Call
    /// [`ContainerHandle::stop`](crate::ContainerHandle::stop) explicitly in that case.
    pub fn with_client(docker: Docker) -> Self {
        let host = env::var("DOCKER_HOST")
            .ok()
            .and_then(|docker_host| host_from_docker_host(&docker_host))
            .unwrap_or_else(|| "localhost".to_owned());
        Self {
            docker,
            host,
            reconnect: None,
        }
    }

    async fn pull_if_missing(&self, request: &CreateRequest) -> Result<(), RuntimeError> {
        let reference = request.image.reference();
        if self.docker.inspect_image(&reference).await.is_ok() {
            return Ok(());
        }
        debug!("Pulling image {}", reference);
        let options = match request.image.digest() {
            Some(digest) => CreateImageOptions {
                from_image: format!("{}@{}", request.image.repository(), digest),
                ..Default::default()
            },
            None => CreateImageOptions {
                from_image: request.image.repository().to_owned(),
                tag: request.image.tag().to_owned(),
                ..Default::default()
            },
        };
        self.docker
            .create_image(Some(options), None, None)
            .try_collect::<Vec<_>>()
            .await
            .map_err(|e| RuntimeError::new("pull", e.to_string()))?;
        Ok(())
    }
}

#[async_trait]
impl ContainerRuntime for DockerRuntime {
    async fn create(&self, request: &CreateRequest) -> Result<String, RuntimeError> {
        self.pull_if_missing(request).await?;

        let exposed_ports = request
            .image
            .exposed_ports()
            .iter()
            .map(|port| (format!("{}/tcp", port), HashMap::new()))
            .collect();
        let mounts = request
            .mounts
            .iter()
            .map(|entry| Mount {
                source: Some(entry.host_path.to_string_lossy().into_owned()),
                target: Some(entry.container_path.clone()),
                typ: Some(MountTypeEnum::BIND),
                read_only: Some(entry.read_only),
                ..Default::default()
            })
            .collect();
        let config = Config {
            image: Some(request.image.reference()),
            // An empty command would wipe the image's default one.
            cmd: (!request.command.is_empty()).then(|| request.command.clone()),
            exposed_ports: Some(exposed_ports),
            labels: Some(HashMap::from([(
                "org.wiremock.container".to_owned(),
                "true".to_owned(),
            )])),
            host_config: Some(HostConfig {
                mounts: Some(mounts),
                publish_all_ports: Some(true),
                ..Default::default()
            }),
            ..Default::default()
        };

        let response = self
            .docker
            .create_container::<String, String>(None, config)
            .await
            .map_err(|e| RuntimeError::new("create", e.to_string()))?;
        for warning in &response.warnings {
            debug!("Container {} created with warning: {}", response.id, warning);
        }
        Ok(response.id)
    }

    async fn start(&self, id: &str) -> Result<(), RuntimeError> {
        self.docker
            .start_container(id, None::<StartContainerOptions<String>>)
            .await
            .map_err(|e| RuntimeError::new("start", e.to_string()))
    }

    async fn inspect(&self, id: &str) -> Result<Inspection, RuntimeError> {
        let response = self
            .docker
            .inspect_container(id, None::<InspectContainerOptions>)
            .await
            .map_err(|e| RuntimeError::new("inspect", e.to_string()))?;
        let state = response.state.unwrap_or_default();
        let ports = response
            .network_settings
            .and_then(|settings| settings.ports)
            .map(|ports| published_ports(&ports))
            .unwrap_or_default();
        let running = state.running.unwrap_or(false);
        Ok(Inspection {
            running,
            exit_code: if running { None } else { state.exit_code },
            host: self.host.clone(),
            ports,
        })
    }

    async fn stop(&self, id: &str) -> Result<(), RuntimeError> {
        self.docker
            .remove_container(
                id,
                Some(RemoveContainerOptions {
                    force: true,
                    v: true,
                    ..Default::default()
                }),
            )
            .await
            .map_err(|e| RuntimeError::new("stop", e.to_string()))
    }

    async fn logs(&self, id: &str) -> Result<Vec<u8>, RuntimeError> {
        let options = LogsOptions::<String> {
            stdout: true,
            stderr: true,
            follow: false,
            ..Default::default()
        };
        self.docker
            .logs(id, Some(options))
            .map_ok(|output| output.into_bytes().to_vec())
            .try_concat()
            .await
            .map_err(|e| RuntimeError::new("logs", e.to_string()))
    }

    fn detached(&self) -> Option<Arc<dyn ContainerRuntime>> {
        let reconnect = self.reconnect?;
        match reconnect() {
            Ok(docker) => {
                let runtime: Arc<dyn ContainerRuntime> = Arc::new(Self {
                    docker,
                    host: self.host.clone(),
                    reconnect: self.reconnect,
                });
                Some(runtime)
            }
            Err(e) => {
                warn!("Cannot open a new connection to the Docker engine: {}", e);
                None
            }
        }
    }
}

// `{"8080/tcp": [{"HostIp": "0.0.0.0", "HostPort": "49153"}, ...]}`
fn published_ports(ports: &PortMap) -> HashMap<u16, u16> {
    ports
        .iter()
        .filter_map(|(key, bindings)| {
            let (port, protocol) = key.split_once('/').unwrap_or((key.as_str(), "tcp"));
            if protocol != "tcp" {
                return None;
            }
            let container_port = port.parse::<u16>().ok()?;
            let host_port = bindings
                .as_ref()?
                .iter()
                .find_map(|binding| binding.host_port.as_deref()?.parse::<u16>().ok())?;
            Some((container_port, host_port))
        })
        .collect()
}

fn host_from_docker_host(docker_host: &str) -> Option<String> {
    let url = Url::parse(docker_host).ok()?;
    match url.scheme() {
        "tcp" | "http" | "https" => url.host_str().map(str::to_owned),
        _ => None,
    }
}
