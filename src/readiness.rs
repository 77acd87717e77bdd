//! Waiting for WireMock to answer requests, as opposed to its container merely running.
use crate::container::StopSignal;
use crate::endpoint::{Endpoint, Scheme};
use crate::Error;
use async_trait::async_trait;
use http::{Method, Request, StatusCode};
use http_body_util::{BodyExt, Empty};
use hyper::body::Bytes;
use hyper_util::rt::TokioIo;
use log::debug;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tokio::net::TcpStream;

/// The admin route we probe by default: it answers `200` on both WireMock 2 and 3, as soon as
/// stub mappings have been loaded.
pub const DEFAULT_HEALTH_PATH: &str = "/__admin/mappings";
/// A single health request never waits longer than this.
pub const DEFAULT_ATTEMPT_TIMEOUT: Duration = Duration::from_secs(2);

/// A source of time for the [`ReadinessProbe`].
#[async_trait]
pub trait Clock: Send + Sync {
    fn now(&self) -> Instant;

    async fn sleep(&self, duration: Duration);
}

/// Wall-clock time, with tokio timers.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

#[async_trait]
impl Clock for SystemClock {
    fn now(&self) -> Instant {
        Instant::now()
    }

    async fn sleep(&self, duration: Duration) {
        tokio::time::sleep(duration).await
    }
}

/// A clock that only moves when someone sleeps on it: sleeping returns immediately, after
/// advancing the time by the requested duration.
///
/// It makes polling schedules fully deterministic in tests. Only the pauses between attempts go
/// through it: a [`HealthCheck`] that waits on I/O still runs in real time.
#[derive(Debug)]
pub struct ManualClock {
    origin: Instant,
    elapsed: Mutex<Duration>,
}

impl ManualClock {
    pub fn new() -> Self {
        Self {
            origin: Instant::now(),
            elapsed: Mutex::new(Duration::ZERO),
        }
    }

    /// How much time went by since the clock was created.
    pub fn elapsed(&self) -> Duration {
        *self.elapsed.lock().expect("Poisoned lock!")
    }

    pub fn advance(&self, duration: Duration) {
        *self.elapsed.lock().expect("Poisoned lock!") += duration;
    }
}

impl Default for ManualClock {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Clock for ManualClock {
    fn now(&self) -> Instant {
        self.origin + self.elapsed()
    }

    async fn sleep(&self, duration: Duration) {
        self.advance(duration);
        tokio::task::yield_now().await
    }
}

/// A single "are you ready?" question to the mock server.
///
/// On failure it returns a human readable reason, reported in [`Error::Timeout`] if the server
/// never becomes ready.
#[async_trait]
pub trait HealthCheck: Send + Sync {
    async fn check(&self, endpoint: &Endpoint) -> Result<(), String>;
}

/// A `GET` on a WireMock admin route, expecting a specific status code.
#[derive(Debug, Clone)]
pub struct HttpHealthCheck {
    path: String,
    expected_status: StatusCode,
}

impl HttpHealthCheck {
    pub fn new(path: impl Into<String>, expected_status: StatusCode) -> Self {
        let path = path.into();
        let path = if path.starts_with('/') {
            path
        } else {
            format!("/{}", path)
        };
        Self {
            path,
            expected_status,
        }
    }

    pub fn path(&self) -> &str {
        &self.path
    }
}

impl Default for HttpHealthCheck {
    fn default() -> Self {
        Self::new(DEFAULT_HEALTH_PATH, StatusCode::OK)
    }
}

#[async_trait]
impl HealthCheck for HttpHealthCheck {
    async fn check(&self, endpoint: &Endpoint) -> Result<(), String> {
        if endpoint.scheme() != Scheme::Http {
            return Err(format!(
                "Health checks over {} are not supported",
                endpoint.scheme()
            ));
        }
        let stream = TcpStream::connect((endpoint.host(), endpoint.port()))
            .await
            .map_err(|e| format!("Cannot connect to {}: {}", endpoint, e))?;
        let (mut sender, connection) = hyper::client::conn::http1::handshake(TokioIo::new(stream))
            .await
            .map_err(|e| format!("HTTP handshake with {} failed: {}", endpoint, e))?;
        tokio::spawn(async move {
            if let Err(e) = connection.await {
                debug!("Health check connection closed with an error: {}", e);
            }
        });

        let request = Request::builder()
            .method(Method::GET)
            .uri(self.path.as_str())
            .header(http::header::HOST, endpoint.authority())
            .header(http::header::CONNECTION, "close")
            .body(Empty::<Bytes>::new())
            .map_err(|e| format!("Invalid health check request: {}", e))?;
        let response = sender
            .send_request(request)
            .await
            .map_err(|e| format!("GET {} failed: {}", endpoint.url(&self.path), e))?;

        let status = response.status();
        // Drain the body so the server is not left writing into a closed connection.
        let _ = response.into_body().collect().await;
        if status == self.expected_status {
            Ok(())
        } else {
            Err(format!(
                "GET {} returned {}, expected {}",
                endpoint.url(&self.path),
                status,
                self.expected_status
            ))
        }
    }
}

/// How long to pause between two health checks: exponential growth, capped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Backoff {
    pub initial: Duration,
    pub factor: u32,
    pub max: Duration,
}

impl Backoff {
    pub fn fixed(interval: Duration) -> Self {
        Self {
            initial: interval,
            factor: 1,
            max: interval,
        }
    }

    pub fn exponential(initial: Duration, max: Duration) -> Self {
        Self {
            initial,
            factor: 2,
            max,
        }
    }

    /// The pause after each failed attempt, in order.
    pub fn delays(&self) -> impl Iterator<Item = Duration> {
        let Backoff {
            initial,
            factor,
            max,
        } = *self;
        std::iter::successors(Some(initial.min(max)), move |delay| {
            Some(delay.saturating_mul(factor).min(max))
        })
    }
}

impl Default for Backoff {
    /// 100ms, 200ms, 400ms, 800ms, then every second.
    fn default() -> Self {
        Self::exponential(Duration::from_millis(100), Duration::from_secs(1))
    }
}

/// Polls a [`HealthCheck`] until it succeeds or a timeout elapses.
///
/// Each attempt is cut short when the remaining budget runs out, and no attempt is started once
/// it is spent. With a timeout of zero, exactly one attempt is made.
///
/// ### Example:
/// ```rust,no_run
/// use std::time::Duration;
/// use wiremock_container::{Endpoint, ReadinessProbe, Scheme};
///
/// #[tokio::main]
/// async fn main() {
///     let endpoint = Endpoint::new(Scheme::Http, "localhost", 49153);
///     ReadinessProbe::http()
///         .wait_until_ready(&endpoint, Duration::from_secs(30))
///         .await
///         .unwrap();
/// }
/// ```
#[derive(Clone)]
pub struct ReadinessProbe {
    check: Arc<dyn HealthCheck>,
    clock: Arc<dyn Clock>,
    backoff: Backoff,
    attempt_timeout: Duration,
}

impl ReadinessProbe {
    pub fn new(check: impl HealthCheck + 'static) -> Self {
        Self {
            check: Arc::new(check),
            clock: Arc::new(SystemClock),
            backoff: Backoff::default(),
            attempt_timeout: DEFAULT_ATTEMPT_TIMEOUT,
        }
    }

    /// Probe `GET /__admin/mappings`, expecting a `200`.
    pub fn http() -> Self {
        Self::new(HttpHealthCheck::default())
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn with_backoff(mut self, backoff: Backoff) -> Self {
        self.backoff = backoff;
        self
    }

    pub fn with_attempt_timeout(mut self, attempt_timeout: Duration) -> Self {
        self.attempt_timeout = attempt_timeout;
        self
    }

    /// Return as soon as the health check succeeds, or fail with [`Error::Timeout`] once
    /// `timeout` has elapsed, with the reason reported by the last attempt.
    ///
    /// Pauses between attempts follow the [`Clock`], while a single attempt is always bounded by
    /// real time: at most the attempt timeout, and at most what is left of `timeout`. The first
    /// attempt is the exception: it gets the full attempt timeout even if `timeout` is zero.
    pub async fn wait_until_ready(&self, endpoint: &Endpoint, timeout: Duration) -> Result<(), Error> {
        let started = self.clock.now();
        let mut delays = self.backoff.delays();
        let mut attempts = 0u32;
        loop {
            attempts += 1;
            let remaining = timeout.saturating_sub(self.elapsed_since(started));
            let budget = if attempts == 1 && remaining.is_zero() {
                self.attempt_timeout
            } else {
                remaining.min(self.attempt_timeout)
            };
            let last_failure = match tokio::time::timeout(budget, self.check.check(endpoint)).await {
                Ok(Ok(())) => {
                    debug!("{} is ready after {} attempt(s).", endpoint, attempts);
                    return Ok(());
                }
                Ok(Err(reason)) => reason,
                Err(_) => format!("{} did not answer within {:?}", endpoint, budget),
            };
            debug!("Readiness attempt #{} failed: {}", attempts, last_failure);

            let pause = delays
                .next()
                .unwrap_or(self.backoff.max)
                .min(timeout.saturating_sub(self.elapsed_since(started)));
            if !pause.is_zero() {
                self.clock.sleep(pause).await;
            }
            // No attempt is started once the budget is spent.
            let elapsed = self.elapsed_since(started);
            if elapsed >= timeout {
                return Err(Error::Timeout {
                    elapsed,
                    attempts,
                    last_failure,
                    logs: None,
                });
            }
        }
    }

    /// Like [`wait_until_ready`](ReadinessProbe::wait_until_ready), but gives up with
    /// [`Error::Cancelled`] as soon as the container behind `stop_signal` is stopped.
    pub async fn wait_until_ready_or_stopped(
        &self,
        endpoint: &Endpoint,
        timeout: Duration,
        mut stop_signal: StopSignal,
    ) -> Result<(), Error> {
        if stop_signal.is_stopped() {
            return Err(Error::Cancelled);
        }
        tokio::select! {
            biased;
            _ = stop_signal.stopped() => Err(Error::Cancelled),
            outcome = self.wait_until_ready(endpoint, timeout) => outcome,
        }
    }

    fn elapsed_since(&self, started: Instant) -> Duration {
        self.clock.now().saturating_duration_since(started)
    }
}
