//! Connection resilience for the Tasklink API.
//!
//! This module provides:
//! - Normalized platform connectivity signals
//! - Bounded-timeout health probing
//! - Retry logic with exponential backoff and jitter
//! - Typed observer fan-out of connection events
//! - The `ConnectionService` composing all of the above

mod broadcast;
mod platform;
mod probe;
mod retry;
mod service;
mod signal;
mod types;

pub use broadcast::{DynStatusObserver, ListenerId, StatusBroadcaster, StatusObserver};
pub use platform::{HttpCapabilities, NetworkCapabilities, SignalSink, TransportResponse};
pub use probe::{HealthProbe, ProbeOutcome};
pub use retry::{RetryExecutor, RetryPolicy};
pub use service::ConnectionService;
pub use signal::NetworkSignal;
pub use types::{
    ConnectionEvent, ConnectionQuality, ConnectionSnapshot, EventKind, HealthReport,
    HealthStatus, PlatformSignal, ProbeFailure, ReportSource,
};
