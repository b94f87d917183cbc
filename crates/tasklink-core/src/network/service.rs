//! ConnectionService - health-aware execution of remote calls.
//!
//! Provides:
//! - Periodic health probing of the API in a background task
//! - A health state machine driven by probes and platform signals
//! - Fail-fast on offline, retry with backoff otherwise
//! - Event fan-out to registered observers
//!
//! Platform signals are handled on the notifying thread, so the state they
//! imply is visible as soon as the notification returns.

use crate::cancel::CancellationToken;
use crate::config::ServiceConfig;
use crate::error::{BoxError, ConnectionError, Result};
use crate::network::broadcast::{DynStatusObserver, ListenerId, StatusBroadcaster};
use crate::network::platform::{NetworkCapabilities, SignalSink};
use crate::network::probe::{HealthProbe, ProbeOutcome};
use crate::network::retry::RetryExecutor;
use crate::network::signal::NetworkSignal;
use crate::network::types::{
    ConnectionEvent, ConnectionSnapshot, EventKind, HealthReport, HealthStatus, PlatformSignal,
    ReportSource,
};
use chrono::{DateTime, Utc};
use std::future::Future;
use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};
use std::sync::{Arc, Mutex, PoisonError, RwLock, Weak};
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, info, warn};

/// Atomic wrapper for HealthStatus.
struct AtomicHealthStatus(AtomicU8);

impl AtomicHealthStatus {
    fn new(status: HealthStatus) -> Self {
        Self(AtomicU8::new(status as u8))
    }

    fn load(&self) -> HealthStatus {
        Self::decode(self.0.load(Ordering::SeqCst))
    }

    /// Store `status` and return the previous value.
    fn swap(&self, status: HealthStatus) -> HealthStatus {
        Self::decode(self.0.swap(status as u8, Ordering::SeqCst))
    }

    /// Move to `next` when `allowed` accepts the current status.
    ///
    /// The check and the store are one atomic step, so a concurrent
    /// `store_offline` is never overwritten. Returns the previous status on
    /// success and the current one on refusal.
    fn advance(
        &self,
        next: HealthStatus,
        allowed: impl Fn(HealthStatus) -> bool,
    ) -> std::result::Result<HealthStatus, HealthStatus> {
        self.0
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |raw| {
                allowed(Self::decode(raw)).then_some(next as u8)
            })
            .map(Self::decode)
            .map_err(Self::decode)
    }

    fn store_offline(&self) {
        self.0.store(HealthStatus::Offline as u8, Ordering::SeqCst);
    }

    fn decode(raw: u8) -> HealthStatus {
        match raw {
            1 => HealthStatus::Healthy,
            2 => HealthStatus::Unhealthy,
            3 => HealthStatus::Offline,
            _ => HealthStatus::Unknown,
        }
    }
}

/// Clears the in-flight flag even when the probe future is dropped mid-way.
struct ProbeGuard<'a>(&'a AtomicBool);

impl Drop for ProbeGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

struct ServiceInner {
    this: Weak<ServiceInner>,
    config: ServiceConfig,
    broadcaster: Arc<StatusBroadcaster>,
    signal: Arc<NetworkSignal>,
    probe: HealthProbe,
    retry: RetryExecutor,
    status: AtomicHealthStatus,
    last_health_check: RwLock<Option<DateTime<Utc>>>,
    /// Cancelled when the platform goes offline; replaced when it comes back.
    offline_token: Mutex<CancellationToken>,
    probe_in_flight: AtomicBool,
    shutdown: CancellationToken,
    destroyed: AtomicBool,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

/// Connection-resilience service for one remote API.
///
/// Cheap to clone; clones share state. The owner is responsible for calling
/// [`destroy`](Self::destroy) when the service is no longer needed.
#[derive(Clone)]
pub struct ConnectionService {
    inner: Arc<ServiceInner>,
}

impl ConnectionService {
    /// Start a service: capture the current connectivity, then begin probing.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn start(config: ServiceConfig, capabilities: Arc<dyn NetworkCapabilities>) -> Result<Self> {
        config.validate()?;
        let runtime = tokio::runtime::Handle::try_current().map_err(|e| ConnectionError::Config {
            message: format!("ConnectionService must be started inside a Tokio runtime: {}", e),
        })?;

        let broadcaster = Arc::new(StatusBroadcaster::new());
        let online = capabilities.is_online();
        let signal = Arc::new(NetworkSignal::new(
            online,
            capabilities.connection_quality(),
            Arc::clone(&broadcaster),
        ));
        let probe = HealthProbe::new(
            config.health_url(),
            config.probe_timeout,
            Arc::clone(&capabilities),
            Arc::clone(&signal),
        );
        let retry = RetryExecutor::new(config.retry.clone());

        let offline_token = CancellationToken::new();
        if !online {
            offline_token.cancel();
        }

        let inner = Arc::new_cyclic(|this| ServiceInner {
            this: this.clone(),
            config,
            broadcaster,
            signal,
            probe,
            retry,
            status: AtomicHealthStatus::new(HealthStatus::Unknown),
            last_health_check: RwLock::new(None),
            offline_token: Mutex::new(offline_token),
            probe_in_flight: AtomicBool::new(false),
            shutdown: CancellationToken::new(),
            destroyed: AtomicBool::new(false),
            tasks: Mutex::new(Vec::new()),
        });

        if !online {
            inner.status.store_offline();
            info!("Platform offline at startup; health status is offline");
        }

        let sink: Weak<ServiceInner> = Arc::downgrade(&inner);
        capabilities.attach(sink);

        let monitor = spawn_monitor(&runtime, &inner);
        inner
            .tasks
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(monitor);

        info!("Connection service started for {}", inner.probe.endpoint());
        Ok(Self { inner })
    }

    // === Status ===

    /// Current health status.
    pub fn status(&self) -> HealthStatus {
        self.inner.status.load()
    }

    /// Point-in-time copy of the service state.
    pub fn snapshot(&self) -> ConnectionSnapshot {
        ConnectionSnapshot {
            is_online: self.inner.signal.is_online(),
            health_status: self.inner.status.load(),
            last_health_check_at: *self
                .inner
                .last_health_check
                .read()
                .unwrap_or_else(PoisonError::into_inner),
            retry_attempts: self.inner.retry.attempts(),
            connection_quality: self.inner.signal.quality(),
        }
    }

    /// Run one health probe now and return the resulting status.
    ///
    /// If a probe is already in flight, returns the current status instead.
    pub async fn check_health(&self) -> HealthStatus {
        self.inner.run_probe().await
    }

    // === Execution ===

    /// Execute `operation` with health awareness and retries.
    ///
    /// Fails fast with [`ConnectionError::Offline`] while the platform is
    /// offline, without calling `operation`. Every other failure is retried
    /// per the configured policy, ending in [`ConnectionError::RetryExhausted`].
    pub async fn execute<F, Fut, T, E>(&self, operation: F) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = std::result::Result<T, E>>,
        E: Into<BoxError>,
    {
        self.execute_with(operation, |_: &E| true).await
    }

    /// Like [`execute`](Self::execute), retrying only errors accepted by `should_retry`.
    pub async fn execute_with<F, Fut, T, E>(
        &self,
        operation: F,
        should_retry: impl Fn(&E) -> bool,
    ) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = std::result::Result<T, E>>,
        E: Into<BoxError>,
    {
        if self.inner.status.load() == HealthStatus::Offline {
            debug!("Rejecting operation: network is offline");
            return Err(ConnectionError::Offline);
        }

        let interrupt = self
            .inner
            .offline_token
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();

        let started = Instant::now();
        let value = self
            .inner
            .retry
            .execute_with(operation, &interrupt, should_retry)
            .await?;

        self.inner.record_operation_success(started.elapsed());
        Ok(value)
    }

    // === Platform signals ===

    /// Feed a platform connectivity notification into the service.
    pub fn handle_platform_signal(&self, signal: PlatformSignal) {
        self.inner.handle_signal(signal);
    }

    // === Observers ===

    /// Register `observer` for events of `kind`.
    ///
    /// Observers run synchronously, in registration order, on the thread that
    /// caused the event.
    pub fn subscribe(&self, kind: EventKind, observer: DynStatusObserver) -> ListenerId {
        self.inner.broadcaster.subscribe(kind, observer)
    }

    /// Remove a registration by observer identity. Returns false if none matched.
    pub fn unsubscribe(&self, kind: EventKind, observer: &DynStatusObserver) -> bool {
        self.inner.broadcaster.unsubscribe(kind, observer)
    }

    /// Remove the registration returned by [`subscribe`](Self::subscribe).
    pub fn unsubscribe_id(&self, id: ListenerId) -> bool {
        self.inner.broadcaster.unsubscribe_id(id)
    }

    // === Lifecycle ===

    /// Stop probing, drop every listener and freeze the current state.
    ///
    /// Idempotent. [`snapshot`](Self::snapshot) and [`execute`](Self::execute)
    /// stay callable and keep returning the last known state.
    pub fn destroy(&self) {
        if self.inner.destroyed.swap(true, Ordering::SeqCst) {
            return;
        }
        self.inner.shutdown.cancel();
        let tasks = std::mem::take(
            &mut *self
                .inner
                .tasks
                .lock()
                .unwrap_or_else(PoisonError::into_inner),
        );
        for task in tasks {
            task.abort();
        }
        self.inner.broadcaster.clear();
        info!("Connection service for {} destroyed", self.inner.probe.endpoint());
    }

    /// Whether [`destroy`](Self::destroy) has been called.
    pub fn is_destroyed(&self) -> bool {
        self.inner.destroyed.load(Ordering::SeqCst)
    }

    /// The validated configuration this service runs with.
    pub fn config(&self) -> &ServiceConfig {
        &self.inner.config
    }
}

impl ServiceInner {
    fn is_destroyed(&self) -> bool {
        self.destroyed.load(Ordering::SeqCst)
    }

    async fn run_probe(&self) -> HealthStatus {
        if self
            .probe_in_flight
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            debug!("Health probe already in flight; skipping");
            return self.status.load();
        }
        let _guard = ProbeGuard(&self.probe_in_flight);

        let outcome = self.probe.check().await;
        debug!("Health probe finished: {}", outcome.status());
        self.apply_probe_outcome(outcome)
    }

    fn apply_probe_outcome(&self, outcome: ProbeOutcome) -> HealthStatus {
        if self.is_destroyed() {
            debug!("Discarding probe result after teardown");
            return self.status.load();
        }

        match outcome {
            ProbeOutcome::Offline { .. } => {
                self.status.store_offline();
                HealthStatus::Offline
            }
            // A result that raced with an offline signal must not mask it.
            _ if !self.signal.is_online() => {
                debug!("Ignoring probe result: platform went offline meanwhile");
                self.status.load()
            }
            ProbeOutcome::Healthy(report) => {
                self.record_check(report.timestamp);
                self.retry.reset_attempts();
                match self.status.advance(HealthStatus::Healthy, |s| s != HealthStatus::Offline) {
                    Ok(HealthStatus::Healthy) => {}
                    Ok(previous) => {
                        info!("API health: {} -> healthy", previous);
                        self.broadcaster.publish(&ConnectionEvent::Healthy(report));
                    }
                    Err(_) => debug!("Ignoring healthy probe result: platform is offline"),
                }
                self.status.load()
            }
            ProbeOutcome::Unhealthy(failure) => {
                self.record_check(failure.timestamp);
                match self.status.advance(HealthStatus::Unhealthy, |s| s != HealthStatus::Offline) {
                    Ok(HealthStatus::Unhealthy) => {}
                    Ok(previous) => {
                        warn!(
                            "API health: {} -> unhealthy ({})",
                            previous, failure.error_message
                        );
                        self.broadcaster.publish(&ConnectionEvent::Unhealthy(failure));
                    }
                    Err(_) => debug!("Ignoring unhealthy probe result: platform is offline"),
                }
                self.status.load()
            }
        }
    }

    fn record_check(&self, at: DateTime<Utc>) {
        *self
            .last_health_check
            .write()
            .unwrap_or_else(PoisonError::into_inner) = Some(at);
    }

    /// A successful business call is evidence of health.
    fn record_operation_success(&self, duration: std::time::Duration) {
        if self.is_destroyed() || !self.signal.is_online() {
            return;
        }
        let Ok(previous) = self.status.advance(HealthStatus::Healthy, |s| {
            matches!(s, HealthStatus::Unknown | HealthStatus::Unhealthy)
        }) else {
            return;
        };
        info!("API health: {} -> healthy (successful operation)", previous);
        self.broadcaster
            .publish(&ConnectionEvent::Healthy(HealthReport {
                timestamp: Utc::now(),
                duration,
                payload: None,
                source: ReportSource::Operation,
            }));
    }

    fn handle_signal(&self, signal: PlatformSignal) {
        if self.is_destroyed() {
            debug!("Ignoring platform signal after teardown: {:?}", signal);
            return;
        }

        let came_online = matches!(signal, PlatformSignal::Online);
        self.signal.notify(signal, |event| match event {
            ConnectionEvent::Offline => {
                self.offline_token
                    .lock()
                    .unwrap_or_else(PoisonError::into_inner)
                    .cancel();
                let previous = self.status.swap(HealthStatus::Offline);
                if previous != HealthStatus::Offline {
                    info!("API health: {} -> offline", previous);
                }
            }
            ConnectionEvent::Online => {
                let mut token = self
                    .offline_token
                    .lock()
                    .unwrap_or_else(PoisonError::into_inner);
                if token.is_cancelled() {
                    *token = CancellationToken::new();
                }
                drop(token);
                if self
                    .status
                    .advance(HealthStatus::Unknown, |s| s == HealthStatus::Offline)
                    .is_ok()
                {
                    info!("API health: offline -> unknown, re-probing");
                }
            }
            _ => {}
        });

        if came_online {
            self.spawn_probe();
        }
    }

    /// Probe once in the background, unless the service is shut down first.
    fn spawn_probe(&self) {
        let Some(inner) = self.this.upgrade() else { return };
        let Ok(runtime) = tokio::runtime::Handle::try_current() else {
            debug!("No runtime available for an immediate probe; waiting for next tick");
            return;
        };
        let task = runtime.spawn(async move {
            tokio::select! {
                biased;
                _ = inner.shutdown.cancelled() => {}
                _ = inner.run_probe() => {}
            }
        });
        let mut tasks = self.tasks.lock().unwrap_or_else(PoisonError::into_inner);
        tasks.retain(|t| !t.is_finished());
        tasks.push(task);
    }
}

impl SignalSink for ServiceInner {
    fn deliver(&self, signal: PlatformSignal) {
        self.handle_signal(signal);
    }
}

/// Probe immediately, then on every interval tick until shutdown.
fn spawn_monitor(runtime: &tokio::runtime::Handle, inner: &Arc<ServiceInner>) -> JoinHandle<()> {
    let weak: Weak<ServiceInner> = Arc::downgrade(inner);
    let shutdown = inner.shutdown.clone();
    let period = inner.config.probe_interval;

    runtime.spawn(async move {
        debug!("Starting background health monitoring every {:?}", period);
        let mut ticker = tokio::time::interval(period);
        // Ticks missed while a probe is running are skipped, never stacked.
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                biased;
                _ = shutdown.cancelled() => break,
                _ = ticker.tick() => {}
            }
            let Some(inner) = weak.upgrade() else { break };
            tokio::select! {
                biased;
                _ = shutdown.cancelled() => break,
                _ = inner.run_probe() => {}
            }
        }

        debug!("Background health monitoring stopped");
    })
}
