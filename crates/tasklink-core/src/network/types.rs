//! Value types shared by the connection components.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Health of the remote API as last determined by the service.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    /// Initial state before the first probe resolves.
    Unknown = 0,
    /// Last probe (or business call) succeeded.
    Healthy = 1,
    /// Last probe failed.
    Unhealthy = 2,
    /// The platform reports no connectivity.
    Offline = 3,
}

impl std::fmt::Display for HealthStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            HealthStatus::Unknown => write!(f, "unknown"),
            HealthStatus::Healthy => write!(f, "healthy"),
            HealthStatus::Unhealthy => write!(f, "unhealthy"),
            HealthStatus::Offline => write!(f, "offline"),
        }
    }
}

/// Connection quality hints, sourced opportunistically from the platform.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConnectionQuality {
    /// Effective connection type, e.g. `"4g"`.
    pub effective_type: Option<String>,
    pub downlink_mbps: Option<f64>,
    pub rtt_ms: Option<u32>,
    pub save_data: Option<bool>,
}

/// Point-in-time copy of the service state.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ConnectionSnapshot {
    pub is_online: bool,
    pub health_status: HealthStatus,
    pub last_health_check_at: Option<DateTime<Utc>>,
    pub retry_attempts: u32,
    pub connection_quality: Option<ConnectionQuality>,
}

/// Where a healthy report came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ReportSource {
    /// A health probe against the endpoint.
    Probe,
    /// A successful call made through `execute`.
    Operation,
}

/// Payload of a healthy classification.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct HealthReport {
    pub timestamp: DateTime<Utc>,
    pub duration: Duration,
    /// Parsed response body of the health endpoint.
    pub payload: Option<serde_json::Value>,
    pub source: ReportSource,
}

/// Payload of an unhealthy classification.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ProbeFailure {
    pub timestamp: DateTime<Utc>,
    pub duration: Duration,
    pub error_message: String,
}

/// Event kinds observers can subscribe to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum EventKind {
    #[serde(rename = "online")]
    Online,
    #[serde(rename = "offline")]
    Offline,
    #[serde(rename = "healthy")]
    Healthy,
    #[serde(rename = "unhealthy")]
    Unhealthy,
    #[serde(rename = "connectionChange")]
    ConnectionChange,
}

impl std::fmt::Display for EventKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EventKind::Online => write!(f, "online"),
            EventKind::Offline => write!(f, "offline"),
            EventKind::Healthy => write!(f, "healthy"),
            EventKind::Unhealthy => write!(f, "unhealthy"),
            EventKind::ConnectionChange => write!(f, "connectionChange"),
        }
    }
}

/// A state-transition event delivered to observers.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", content = "payload", rename_all = "camelCase")]
pub enum ConnectionEvent {
    Online,
    Offline,
    Healthy(HealthReport),
    Unhealthy(ProbeFailure),
    ConnectionChange(ConnectionQuality),
}

impl ConnectionEvent {
    pub fn kind(&self) -> EventKind {
        match self {
            ConnectionEvent::Online => EventKind::Online,
            ConnectionEvent::Offline => EventKind::Offline,
            ConnectionEvent::Healthy(_) => EventKind::Healthy,
            ConnectionEvent::Unhealthy(_) => EventKind::Unhealthy,
            ConnectionEvent::ConnectionChange(_) => EventKind::ConnectionChange,
        }
    }
}

/// Raw connectivity notification coming from the platform.
#[derive(Debug, Clone, PartialEq)]
pub enum PlatformSignal {
    Online,
    Offline,
    ConnectionChange(ConnectionQuality),
}
