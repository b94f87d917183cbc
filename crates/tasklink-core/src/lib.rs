//! Tasklink Core - connection resilience for the Tasklink task client.
//!
//! This crate decides whether the Tasklink API is reachable, probes it
//! periodically, and wraps outbound calls with retry/backoff so that transient
//! network failures do not surface as user-visible errors.
//!
//! # Example
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use std::time::Duration;
//! use tasklink_core::{ConnectionService, HttpCapabilities, ServiceConfig};
//!
//! #[tokio::main]
//! async fn main() -> tasklink_core::Result<()> {
//!     let caps = Arc::new(HttpCapabilities::new(Duration::from_secs(15))?);
//!     let service = ConnectionService::start(
//!         ServiceConfig::new("https://tasks.example.com/api"),
//!         caps.clone(),
//!     )?;
//!
//!     let client = caps.inner().clone();
//!     let tasks = service
//!         .execute(|| {
//!             let client = client.clone();
//!             async move {
//!                 client.get("https://tasks.example.com/api/tasks").send().await?.text().await
//!             }
//!         })
//!         .await?;
//!     println!("{}", tasks);
//!
//!     service.destroy();
//!     Ok(())
//! }
//! ```

pub mod cancel;
pub mod config;
pub mod error;
pub mod network;
pub mod shared;

// Re-export commonly used types
pub use cancel::CancellationToken;
pub use config::{ConnectionDefaults, ServiceConfig, ServiceOptions};
pub use error::{BoxError, ConnectionError, Result};
pub use network::{
    ConnectionEvent, ConnectionQuality, ConnectionService, ConnectionSnapshot, DynStatusObserver,
    EventKind, HealthProbe, HealthReport, HealthStatus, HttpCapabilities, ListenerId,
    NetworkCapabilities, NetworkSignal, PlatformSignal, ProbeFailure, ProbeOutcome,
    ReportSource, RetryExecutor, RetryPolicy, SignalSink, StatusBroadcaster, StatusObserver,
    TransportResponse,
};
