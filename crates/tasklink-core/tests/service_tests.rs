//! Integration tests for the ConnectionService public interface.
//!
//! These drive the service through a fake platform on a paused Tokio clock, so
//! probe schedules and back-off delays are observed exactly.

use async_trait::async_trait;
use std::sync::atomic::{AtomicBool, AtomicU16, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tasklink_core::{
    ConnectionError, ConnectionEvent, ConnectionService, DynStatusObserver, EventKind,
    HealthStatus, NetworkCapabilities, PlatformSignal, ReportSource, Result, RetryPolicy,
    ServiceConfig, TransportResponse,
};
use tokio::time::Instant;

/// Platform whose health endpoint answers with a configurable HTTP status.
struct FakePlatform {
    online: AtomicBool,
    http_status: AtomicU16,
    probes: AtomicUsize,
}

impl FakePlatform {
    fn new(http_status: u16) -> Arc<Self> {
        Arc::new(Self {
            online: AtomicBool::new(true),
            http_status: AtomicU16::new(http_status),
            probes: AtomicUsize::new(0),
        })
    }

    fn probes(&self) -> usize {
        self.probes.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl NetworkCapabilities for FakePlatform {
    fn is_online(&self) -> bool {
        self.online.load(Ordering::SeqCst)
    }

    async fn get(&self, _url: &str) -> Result<TransportResponse> {
        self.probes.fetch_add(1, Ordering::SeqCst);
        let status = self.http_status.load(Ordering::SeqCst);
        if status == 200 {
            Ok(TransportResponse::new(200, r#"{"status":"ok"}"#))
        } else {
            Ok(TransportResponse::new(status, "service unavailable"))
        }
    }
}

fn test_config(max_attempts: u32, base_ms: u64, max_ms: u64) -> ServiceConfig {
    ServiceConfig::new("http://tasks.test/api").with_retry(
        RetryPolicy::new()
            .with_max_attempts(max_attempts)
            .with_base_delay(Duration::from_millis(base_ms))
            .with_max_delay(Duration::from_millis(max_ms))
            .with_jitter_fraction(0.0),
    )
}

/// Record every event of the given kinds, in delivery order.
fn record_events(service: &ConnectionService, kinds: &[EventKind]) -> Arc<Mutex<Vec<ConnectionEvent>>> {
    let events = Arc::new(Mutex::new(Vec::new()));
    for kind in kinds {
        let events = events.clone();
        service.subscribe(
            *kind,
            Arc::new(move |event: &ConnectionEvent| events.lock().unwrap().push(event.clone())),
        );
    }
    events
}

async fn settle() {
    tokio::time::sleep(Duration::from_millis(1)).await;
}

#[tokio::test(start_paused = true)]
async fn test_retry_then_success_waits_100_then_200_ms() {
    let platform = FakePlatform::new(200);
    let service = ConnectionService::start(test_config(3, 100, 1000), platform).unwrap();
    settle().await;

    let calls = Arc::new(Mutex::new(Vec::new()));
    let calls_clone = calls.clone();
    let result = service
        .execute(|| {
            let calls = calls_clone.clone();
            async move {
                let mut calls = calls.lock().unwrap();
                calls.push(Instant::now());
                match calls.len() {
                    1 | 2 => Err(ConnectionError::network("connection reset")),
                    n => Ok(format!("call {}", n)),
                }
            }
        })
        .await;

    assert_eq!(result.unwrap(), "call 3");
    let calls = calls.lock().unwrap();
    assert_eq!(calls.len(), 3);
    assert_eq!(calls[1] - calls[0], Duration::from_millis(100));
    assert_eq!(calls[2] - calls[1], Duration::from_millis(200));
    assert_eq!(service.snapshot().retry_attempts, 0);
    service.destroy();
}

#[tokio::test(start_paused = true)]
async fn test_exhaustion_reports_max_attempts_and_stops() {
    let platform = FakePlatform::new(200);
    let service = ConnectionService::start(test_config(5, 10, 100), platform).unwrap();
    settle().await;

    let calls = Arc::new(AtomicUsize::new(0));
    let calls_clone = calls.clone();
    let result: Result<()> = service
        .execute(|| {
            let calls = calls_clone.clone();
            async move {
                calls.fetch_add(1, Ordering::SeqCst);
                Err(ConnectionError::network("connection refused"))
            }
        })
        .await;

    assert_eq!(calls.load(Ordering::SeqCst), 5);
    match result {
        Err(err @ ConnectionError::RetryExhausted { .. }) => {
            let message = err.to_string();
            assert!(message.contains("5 attempts"), "{}", message);
            assert!(message.contains("connection refused"), "{}", message);
        }
        other => panic!("expected RetryExhausted, got {:?}", other),
    }
    assert_eq!(service.snapshot().retry_attempts, 5);
    service.destroy();
}

#[tokio::test(start_paused = true)]
async fn test_retry_counter_visible_during_sequence_and_reset_after() {
    let platform = FakePlatform::new(200);
    let service = ConnectionService::start(test_config(4, 10, 100), platform).unwrap();
    settle().await;

    let observed = Arc::new(Mutex::new(Vec::new()));
    let observed_clone = observed.clone();
    let watcher = service.clone();
    let result = service
        .execute(|| {
            let observed = observed_clone.clone();
            let watcher = watcher.clone();
            async move {
                let mut observed = observed.lock().unwrap();
                observed.push(watcher.snapshot().retry_attempts);
                if observed.len() < 4 {
                    Err("flaky".to_string())
                } else {
                    Ok(())
                }
            }
        })
        .await;

    assert!(result.is_ok());
    assert_eq!(*observed.lock().unwrap(), vec![0, 1, 2, 3]);
    assert_eq!(service.snapshot().retry_attempts, 0);
    service.destroy();
}

#[tokio::test(start_paused = true)]
async fn test_successful_health_check_resets_retry_counter() {
    let platform = FakePlatform::new(200);
    let service = ConnectionService::start(test_config(3, 10, 100), platform.clone()).unwrap();
    settle().await;
    assert_eq!(platform.probes(), 1);

    let result: Result<()> = service
        .execute(|| async { Err(ConnectionError::network("connection refused")) })
        .await;
    assert!(matches!(result, Err(ConnectionError::RetryExhausted { .. })));
    assert_eq!(service.snapshot().retry_attempts, 3);

    // Next scheduled health check at 30s.
    tokio::time::sleep(Duration::from_secs(30)).await;

    assert_eq!(platform.probes(), 2);
    assert_eq!(service.status(), HealthStatus::Healthy);
    assert_eq!(service.snapshot().retry_attempts, 0);
    service.destroy();
}

#[tokio::test(start_paused = true)]
async fn test_execute_while_offline_makes_no_calls() {
    let platform = FakePlatform::new(200);
    let service = ConnectionService::start(test_config(3, 100, 1000), platform).unwrap();
    settle().await;

    service.handle_platform_signal(PlatformSignal::Offline);

    let calls = Arc::new(AtomicUsize::new(0));
    let calls_clone = calls.clone();
    let started = Instant::now();
    let result = service
        .execute(|| {
            let calls = calls_clone.clone();
            async move {
                calls.fetch_add(1, Ordering::SeqCst);
                Ok::<_, ConnectionError>(())
            }
        })
        .await;

    assert!(matches!(result, Err(ConnectionError::Offline)));
    assert_eq!(calls.load(Ordering::SeqCst), 0);
    assert_eq!(started.elapsed(), Duration::ZERO);
    service.destroy();
}

#[tokio::test(start_paused = true)]
async fn test_unhealthy_published_once_per_transition() {
    let platform = FakePlatform::new(503);
    let service = ConnectionService::start(test_config(3, 100, 1000), platform.clone()).unwrap();
    let events = record_events(&service, &[EventKind::Unhealthy, EventKind::Healthy]);

    // Probes at 0s, 30s, 60s and 90s.
    tokio::time::sleep(Duration::from_secs(95)).await;

    assert_eq!(platform.probes(), 4);
    assert_eq!(service.status(), HealthStatus::Unhealthy);
    let events = events.lock().unwrap();
    assert_eq!(events.len(), 1);
    match &events[0] {
        ConnectionEvent::Unhealthy(failure) => assert!(failure.error_message.contains("503")),
        other => panic!("expected Unhealthy, got {:?}", other),
    }
    service.destroy();
}

#[tokio::test(start_paused = true)]
async fn test_offline_during_attempt_lets_it_finish_then_stops() {
    let platform = FakePlatform::new(200);
    let service = ConnectionService::start(test_config(5, 100, 1000), platform).unwrap();
    settle().await;

    let calls = Arc::new(AtomicUsize::new(0));
    let calls_clone = calls.clone();
    let handle = service.clone();
    let result: Result<()> = service
        .execute(|| {
            let calls = calls_clone.clone();
            let handle = handle.clone();
            async move {
                calls.fetch_add(1, Ordering::SeqCst);
                // Connectivity drops while this attempt is in flight.
                handle.handle_platform_signal(PlatformSignal::Offline);
                Err(ConnectionError::network("socket closed"))
            }
        })
        .await;

    assert!(matches!(result, Err(ConnectionError::Offline)));
    assert_eq!(calls.load(Ordering::SeqCst), 1);
    assert_eq!(service.status(), HealthStatus::Offline);
    service.destroy();
}

#[tokio::test(start_paused = true)]
async fn test_offline_during_successful_attempt_keeps_result() {
    let platform = FakePlatform::new(200);
    let service = ConnectionService::start(test_config(5, 100, 1000), platform).unwrap();
    settle().await;

    let handle = service.clone();
    let result = service
        .execute(|| {
            let handle = handle.clone();
            async move {
                handle.handle_platform_signal(PlatformSignal::Offline);
                Ok::<_, ConnectionError>("saved")
            }
        })
        .await;

    assert_eq!(result.unwrap(), "saved");
    assert_eq!(service.status(), HealthStatus::Offline);
    service.destroy();
}

#[tokio::test(start_paused = true)]
async fn test_offline_during_backoff_aborts_wait() {
    let platform = FakePlatform::new(200);
    let service = ConnectionService::start(test_config(5, 1000, 30_000), platform).unwrap();
    settle().await;

    let signaller = service.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(250)).await;
        signaller.handle_platform_signal(PlatformSignal::Offline);
    });

    let calls = Arc::new(AtomicUsize::new(0));
    let calls_clone = calls.clone();
    let started = Instant::now();
    let result: Result<()> = service
        .execute(|| {
            let calls = calls_clone.clone();
            async move {
                calls.fetch_add(1, Ordering::SeqCst);
                Err(ConnectionError::network("timeout"))
            }
        })
        .await;

    assert!(matches!(result, Err(ConnectionError::Offline)));
    assert_eq!(calls.load(Ordering::SeqCst), 1);
    assert_eq!(started.elapsed(), Duration::from_millis(250));
    service.destroy();
}

#[tokio::test(start_paused = true)]
async fn test_back_online_allows_execute_again() {
    let platform = FakePlatform::new(200);
    let service = ConnectionService::start(test_config(3, 100, 1000), platform).unwrap();
    settle().await;

    service.handle_platform_signal(PlatformSignal::Offline);
    service.handle_platform_signal(PlatformSignal::Online);
    settle().await;

    assert_eq!(service.status(), HealthStatus::Healthy);
    let result = service.execute(|| async { Ok::<_, String>(7) }).await;
    assert_eq!(result.unwrap(), 7);
    service.destroy();
}

#[tokio::test(start_paused = true)]
async fn test_successful_execute_marks_unhealthy_service_healthy() {
    let platform = FakePlatform::new(503);
    let service = ConnectionService::start(test_config(3, 100, 1000), platform).unwrap();
    settle().await;
    assert_eq!(service.status(), HealthStatus::Unhealthy);

    let events = record_events(&service, &[EventKind::Healthy]);
    service
        .execute(|| async { Ok::<_, String>(()) })
        .await
        .unwrap();

    assert_eq!(service.status(), HealthStatus::Healthy);
    let events = events.lock().unwrap();
    assert_eq!(events.len(), 1);
    match &events[0] {
        ConnectionEvent::Healthy(report) => {
            assert_eq!(report.source, ReportSource::Operation);
            assert!(report.payload.is_none());
        }
        other => panic!("expected Healthy, got {:?}", other),
    }
    service.destroy();
}

#[tokio::test(start_paused = true)]
async fn test_panicking_subscriber_does_not_block_others() {
    let platform = FakePlatform::new(200);
    let service = ConnectionService::start(test_config(3, 100, 1000), platform).unwrap();

    let before = Arc::new(AtomicUsize::new(0));
    let after = Arc::new(AtomicUsize::new(0));
    let before_clone = before.clone();
    let after_clone = after.clone();
    service.subscribe(
        EventKind::Offline,
        Arc::new(move |_: &ConnectionEvent| {
            before_clone.fetch_add(1, Ordering::SeqCst);
        }),
    );
    service.subscribe(
        EventKind::Offline,
        Arc::new(|_: &ConnectionEvent| panic!("subscriber bug")),
    );
    service.subscribe(
        EventKind::Offline,
        Arc::new(move |_: &ConnectionEvent| {
            after_clone.fetch_add(1, Ordering::SeqCst);
        }),
    );

    service.handle_platform_signal(PlatformSignal::Offline);

    assert_eq!(before.load(Ordering::SeqCst), 1);
    assert_eq!(after.load(Ordering::SeqCst), 1);
    assert_eq!(service.status(), HealthStatus::Offline);
    service.destroy();
}

#[tokio::test(start_paused = true)]
async fn test_offline_observer_sees_offline_snapshot() {
    let platform = FakePlatform::new(200);
    let service = ConnectionService::start(test_config(3, 100, 1000), platform).unwrap();
    settle().await;

    let seen = Arc::new(Mutex::new(None));
    let seen_clone = seen.clone();
    let watcher = service.clone();
    service.subscribe(
        EventKind::Offline,
        Arc::new(move |_: &ConnectionEvent| {
            *seen_clone.lock().unwrap() = Some(watcher.snapshot());
        }),
    );

    service.handle_platform_signal(PlatformSignal::Offline);

    let snapshot = seen.lock().unwrap().clone().unwrap();
    assert!(!snapshot.is_online);
    assert_eq!(snapshot.health_status, HealthStatus::Offline);
    service.destroy();
}

#[tokio::test(start_paused = true)]
async fn test_unsubscribe_stops_delivery() {
    let platform = FakePlatform::new(200);
    let service = ConnectionService::start(test_config(3, 100, 1000), platform).unwrap();

    let count = Arc::new(AtomicUsize::new(0));
    let count_clone = count.clone();
    let observer: DynStatusObserver = Arc::new(move |_: &ConnectionEvent| {
        count_clone.fetch_add(1, Ordering::SeqCst);
    });
    service.subscribe(EventKind::Online, observer.clone());

    service.handle_platform_signal(PlatformSignal::Online);
    assert!(service.unsubscribe(EventKind::Online, &observer));
    service.handle_platform_signal(PlatformSignal::Online);

    assert_eq!(count.load(Ordering::SeqCst), 1);
    service.destroy();
}

#[tokio::test(start_paused = true)]
async fn test_destroy_freezes_snapshot_and_stops_probing() {
    let platform = FakePlatform::new(200);
    let service = ConnectionService::start(test_config(3, 100, 1000), platform.clone()).unwrap();
    settle().await;

    let before = service.snapshot();
    let probes_before = platform.probes();
    assert_eq!(before.health_status, HealthStatus::Healthy);

    service.destroy();
    tokio::time::sleep(Duration::from_secs(5)).await;

    assert_eq!(service.snapshot(), before);
    assert_eq!(platform.probes(), probes_before);

    // Well past the next scheduled tick as well.
    tokio::time::sleep(Duration::from_secs(60)).await;
    assert_eq!(platform.probes(), probes_before);
    assert_eq!(service.snapshot(), before);
}

#[tokio::test(start_paused = true)]
async fn test_calls_after_destroy_are_safe() {
    let platform = FakePlatform::new(200);
    let service = ConnectionService::start(test_config(3, 100, 1000), platform).unwrap();
    settle().await;

    let events = record_events(&service, &[EventKind::Offline]);
    service.destroy();
    service.destroy();
    assert!(service.is_destroyed());

    // Signals after teardown are ignored and reach no listener.
    service.handle_platform_signal(PlatformSignal::Offline);
    assert!(events.lock().unwrap().is_empty());
    assert_eq!(service.status(), HealthStatus::Healthy);

    let result = service.execute(|| async { Ok::<_, String>("still works") }).await;
    assert_eq!(result.unwrap(), "still works");
    assert_eq!(service.check_health().await, HealthStatus::Healthy);
}
