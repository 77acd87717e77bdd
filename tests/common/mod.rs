#![allow(dead_code)]
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use wiremock_container::{
    ContainerRuntime, CreateRequest, Endpoint, HealthCheck, Inspection, RuntimeError,
};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Call {
    Create,
    Start(String),
    Inspect(String),
    Stop(String),
    Logs(String),
}

/// How the fake runtime reacts to a container being launched.
#[derive(Debug, Clone)]
pub enum Behaviour {
    Healthy,
    RejectCreate(String),
    RejectStart(String),
    /// The container process terminates right away with this exit code.
    Exits(i64),
}

/// A scripted, in-memory `ContainerRuntime`.
pub struct FakeRuntime {
    behaviour: Behaviour,
    host: String,
    port_overrides: HashMap<u16, u16>,
    logs: Vec<u8>,
    fail_stop: bool,
    next_id: AtomicU32,
    calls: Mutex<Vec<Call>>,
    created: Mutex<Vec<CreateRequest>>,
    bindings: Mutex<HashMap<String, HashMap<u16, u16>>>,
}

impl FakeRuntime {
    pub fn new() -> Self {
        Self {
            behaviour: Behaviour::Healthy,
            host: "localhost".into(),
            port_overrides: HashMap::new(),
            logs: b"WireMock is starting...\n".to_vec(),
            fail_stop: false,
            next_id: AtomicU32::new(1),
            calls: Mutex::new(Vec::new()),
            created: Mutex::new(Vec::new()),
            bindings: Mutex::new(HashMap::new()),
        }
    }

    pub fn behaviour(mut self, behaviour: Behaviour) -> Self {
        self.behaviour = behaviour;
        self
    }

    pub fn host(mut self, host: &str) -> Self {
        self.host = host.into();
        self
    }

    /// Publish `container_port` on a specific host port instead of a made-up one.
    pub fn publish(mut self, container_port: u16, host_port: u16) -> Self {
        self.port_overrides.insert(container_port, host_port);
        self
    }

    pub fn logs(mut self, logs: &str) -> Self {
        self.logs = logs.as_bytes().to_vec();
        self
    }

    pub fn failing_stop(mut self) -> Self {
        self.fail_stop = true;
        self
    }

    pub fn calls(&self) -> Vec<Call> {
        self.calls.lock().unwrap().clone()
    }

    pub fn created(&self) -> Vec<CreateRequest> {
        self.created.lock().unwrap().clone()
    }

    pub fn stops(&self) -> usize {
        self.calls()
            .iter()
            .filter(|call| matches!(call, Call::Stop(_)))
            .count()
    }

    fn record(&self, call: Call) {
        self.calls.lock().unwrap().push(call);
    }
}

#[async_trait]
impl ContainerRuntime for FakeRuntime {
    async fn create(&self, request: &CreateRequest) -> Result<String, RuntimeError> {
        self.record(Call::Create);
        if let Behaviour::RejectCreate(message) = &self.behaviour {
            return Err(RuntimeError::new("create", message.clone()));
        }
        let id = format!("fake-{}", self.next_id.fetch_add(1, Ordering::SeqCst));
        let ports = request
            .image
            .exposed_ports()
            .iter()
            .map(|port| {
                let host_port = self
                    .port_overrides
                    .get(port)
                    .copied()
                    .unwrap_or(40000 + port % 20000);
                (*port, host_port)
            })
            .collect();
        self.bindings.lock().unwrap().insert(id.clone(), ports);
        self.created.lock().unwrap().push(request.clone());
        Ok(id)
    }

    async fn start(&self, id: &str) -> Result<(), RuntimeError> {
        self.record(Call::Start(id.into()));
        match &self.behaviour {
            Behaviour::RejectStart(message) => Err(RuntimeError::new("start", message.clone())),
            _ => Ok(()),
        }
    }

    async fn inspect(&self, id: &str) -> Result<Inspection, RuntimeError> {
        self.record(Call::Inspect(id.into()));
        if let Behaviour::Exits(code) = self.behaviour {
            return Ok(Inspection {
                running: false,
                exit_code: Some(code),
                host: self.host.clone(),
                ports: HashMap::new(),
            });
        }
        let ports = self
            .bindings
            .lock()
            .unwrap()
            .get(id)
            .cloned()
            .ok_or_else(|| RuntimeError::new("inspect", format!("No such container: {}", id)))?;
        Ok(Inspection {
            running: true,
            exit_code: None,
            host: self.host.clone(),
            ports,
        })
    }

    async fn stop(&self, id: &str) -> Result<(), RuntimeError> {
        self.record(Call::Stop(id.into()));
        if self.fail_stop {
            return Err(RuntimeError::new("stop", "the engine is gone"));
        }
        self.bindings.lock().unwrap().remove(id);
        Ok(())
    }

    async fn logs(&self, id: &str) -> Result<Vec<u8>, RuntimeError> {
        self.record(Call::Logs(id.into()));
        Ok(self.logs.clone())
    }
}

/// Yield to the runtime until `runtime` has seen `count` stops, for at most a second.
pub async fn wait_for_stops(runtime: &FakeRuntime, count: usize) {
    let _ = tokio::time::timeout(Duration::from_secs(1), async {
        while runtime.stops() < count {
            tokio::task::yield_now().await;
        }
    })
    .await;
}

/// A runtime whose client only works while the tokio runtime it was created on is running,
/// like a connection pool driven by spawned tasks.
///
/// Every call is admitted by a task spawned on that runtime, then forwarded to a `FakeRuntime`.
pub struct BoundRuntime {
    engine: Arc<FakeRuntime>,
    admissions: mpsc::UnboundedSender<oneshot::Sender<()>>,
    detachable: bool,
}

impl BoundRuntime {
    /// Must be called from within a tokio runtime.
    pub fn new(engine: Arc<FakeRuntime>) -> Self {
        let (admissions, mut pending) = mpsc::unbounded_channel::<oneshot::Sender<()>>();
        tokio::spawn(async move {
            while let Some(ticket) = pending.recv().await {
                let _ = ticket.send(());
            }
        });
        Self {
            engine,
            admissions,
            detachable: false,
        }
    }

    /// Offer a detached client, talking to the same engine directly.
    pub fn detachable(mut self) -> Self {
        self.detachable = true;
        self
    }

    async fn admitted(&self, operation: &'static str) -> Result<(), RuntimeError> {
        let (ticket, admission) = oneshot::channel();
        self.admissions
            .send(ticket)
            .map_err(|_| RuntimeError::new(operation, "the client runtime is gone"))?;
        admission
            .await
            .map_err(|_| RuntimeError::new(operation, "the client runtime is gone"))
    }
}

#[async_trait]
impl ContainerRuntime for BoundRuntime {
    async fn create(&self, request: &CreateRequest) -> Result<String, RuntimeError> {
        self.admitted("create").await?;
        self.engine.create(request).await
    }

    async fn start(&self, id: &str) -> Result<(), RuntimeError> {
        self.admitted("start").await?;
        self.engine.start(id).await
    }

    async fn inspect(&self, id: &str) -> Result<Inspection, RuntimeError> {
        self.admitted("inspect").await?;
        self.engine.inspect(id).await
    }

    async fn stop(&self, id: &str) -> Result<(), RuntimeError> {
        self.admitted("stop").await?;
        self.engine.stop(id).await
    }

    async fn logs(&self, id: &str) -> Result<Vec<u8>, RuntimeError> {
        self.admitted("logs").await?;
        ContainerRuntime::logs(&*self.engine, id).await
    }

    fn detached(&self) -> Option<Arc<dyn ContainerRuntime>> {
        if self.detachable {
            Some(self.engine.clone() as Arc<dyn ContainerRuntime>)
        } else {
            None
        }
    }
}

/// A health check that starts succeeding at a given attempt.
pub struct ScriptedHealthCheck {
    healthy_from: Option<u32>,
    attempts: Arc<AtomicU32>,
}

impl ScriptedHealthCheck {
    pub fn healthy_from(attempt: u32) -> Self {
        Self {
            healthy_from: Some(attempt),
            attempts: Arc::new(AtomicU32::new(0)),
        }
    }

    pub fn never_healthy() -> Self {
        Self {
            healthy_from: None,
            attempts: Arc::new(AtomicU32::new(0)),
        }
    }

    /// A live view on the number of checks performed, usable after the check is moved away.
    pub fn attempts(&self) -> Arc<AtomicU32> {
        self.attempts.clone()
    }
}

#[async_trait]
impl HealthCheck for ScriptedHealthCheck {
    async fn check(&self, _endpoint: &Endpoint) -> Result<(), String> {
        let attempt = self.attempts.fetch_add(1, Ordering::SeqCst) + 1;
        match self.healthy_from {
            Some(healthy_from) if attempt >= healthy_from => Ok(()),
            _ => Err(format!("not ready yet (attempt {})", attempt)),
        }
    }
}
