//! Monitor example - watch the health of a Tasklink API
//!
//! Usage: cargo run --example monitor -- https://tasks.example.com/api

use std::sync::Arc;
use std::time::Duration;
use tasklink_core::{
    ConnectionError, ConnectionEvent, ConnectionService, EventKind, HttpCapabilities,
    ServiceConfig,
};
use tracing::{info, warn, Level};
use tracing_subscriber::FmtSubscriber;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    FmtSubscriber::builder()
        .with_max_level(Level::DEBUG)
        .with_target(false)
        .compact()
        .init();

    let base_url = std::env::args()
        .nth(1)
        .unwrap_or_else(|| "http://127.0.0.1:8080/api".to_string());

    let config = ServiceConfig::new(&base_url).with_probe_interval(Duration::from_secs(10));
    let caps = Arc::new(HttpCapabilities::new(config.probe_timeout)?);
    let service = ConnectionService::start(config, caps.clone())?;

    for kind in [EventKind::Healthy, EventKind::Unhealthy, EventKind::Offline] {
        service.subscribe(
            kind,
            Arc::new(|event: &ConnectionEvent| match event {
                ConnectionEvent::Unhealthy(failure) => warn!("API unhealthy: {}", failure.error_message),
                other => info!("Connection event: {}", other.kind()),
            }),
        );
    }

    let client = caps.inner().clone();
    let tasks_url = format!("{}/tasks", base_url.trim_end_matches('/'));
    let fetched = service
        .execute_with(
            || {
                let client = client.clone();
                let url = tasks_url.clone();
                async move {
                    let response = client.get(url).send().await?.error_for_status()?;
                    Ok::<_, ConnectionError>(response.text().await?)
                }
            },
            ConnectionError::is_retryable,
        )
        .await;
    match fetched {
        Ok(body) => info!("Fetched {} bytes of tasks", body.len()),
        Err(e) if e.is_offline() => info!("Offline; tasks will load once connectivity returns"),
        Err(e) if e.is_exhausted() => warn!("Tasklink API unreachable: {}", e),
        Err(e) => warn!("Fetching tasks failed: {}", e),
    }

    info!("Monitoring; press Ctrl+C to stop");
    tokio::signal::ctrl_c().await?;

    info!("Final state: {}", serde_json::to_string(&service.snapshot())?);
    service.destroy();
    Ok(())
}
