//! Bounded-timeout liveness check against the health endpoint.

use crate::network::platform::NetworkCapabilities;
use crate::network::signal::NetworkSignal;
use crate::network::types::{HealthReport, HealthStatus, ProbeFailure, ReportSource};
use chrono::{DateTime, Utc};
use serde::Deserialize;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::time::Instant;
use tracing::debug;

/// Classified result of one probe.
#[derive(Debug, Clone, PartialEq)]
pub enum ProbeOutcome {
    Healthy(HealthReport),
    Unhealthy(ProbeFailure),
    /// The platform already reports offline; no request was made.
    Offline { checked_at: DateTime<Utc> },
}

impl ProbeOutcome {
    pub fn status(&self) -> HealthStatus {
        match self {
            ProbeOutcome::Healthy(_) => HealthStatus::Healthy,
            ProbeOutcome::Unhealthy(_) => HealthStatus::Unhealthy,
            ProbeOutcome::Offline { .. } => HealthStatus::Offline,
        }
    }
}

/// Why a probe failed. Never leaves this module as an error.
#[derive(Debug, Error)]
enum ProbeError {
    #[error("Health check timed out after {0:?}")]
    Timeout(Duration),

    #[error("Health check returned HTTP {0}")]
    Status(u16),

    #[error("Health check request failed: {0}")]
    Transport(String),

    #[error("Health check returned a malformed body: {0}")]
    MalformedBody(String),

    #[error("Health check reported status {0:?}")]
    NotOk(String),
}

#[derive(Debug, Deserialize)]
struct HealthBody {
    status: String,
}

const OK_MARKER: &str = "ok";

/// Issues health checks against one fixed endpoint.
pub struct HealthProbe {
    endpoint: String,
    timeout: Duration,
    transport: Arc<dyn NetworkCapabilities>,
    signal: Arc<NetworkSignal>,
}

impl HealthProbe {
    pub fn new(
        endpoint: impl Into<String>,
        timeout: Duration,
        transport: Arc<dyn NetworkCapabilities>,
        signal: Arc<NetworkSignal>,
    ) -> Self {
        Self {
            endpoint: endpoint.into(),
            timeout,
            transport,
            signal,
        }
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    /// Run one check. Always produces exactly one classified outcome.
    pub async fn check(&self) -> ProbeOutcome {
        if !self.signal.is_online() {
            debug!("Skipping health check of {}: platform is offline", self.endpoint);
            return ProbeOutcome::Offline {
                checked_at: Utc::now(),
            };
        }

        let started = Instant::now();
        let result = self.request().await;
        let duration = started.elapsed();
        let timestamp = Utc::now();

        match result {
            Ok(payload) => {
                debug!("Health check of {} ok in {:?}", self.endpoint, duration);
                ProbeOutcome::Healthy(HealthReport {
                    timestamp,
                    duration,
                    payload: Some(payload),
                    source: ReportSource::Probe,
                })
            }
            Err(e) => {
                debug!("Health check of {} failed: {}", self.endpoint, e);
                ProbeOutcome::Unhealthy(ProbeFailure {
                    timestamp,
                    duration,
                    error_message: e.to_string(),
                })
            }
        }
    }

    async fn request(&self) -> Result<serde_json::Value, ProbeError> {
        // Dropping the request future on timeout cancels the in-flight call.
        let response = tokio::time::timeout(self.timeout, self.transport.get(&self.endpoint))
            .await
            .map_err(|_| ProbeError::Timeout(self.timeout))?
            .map_err(|e| ProbeError::Transport(e.to_string()))?;

        if !response.is_success() {
            return Err(ProbeError::Status(response.status));
        }

        let payload: serde_json::Value = serde_json::from_slice(&response.body)
            .map_err(|e| ProbeError::MalformedBody(e.to_string()))?;
        let body = HealthBody::deserialize(&payload)
            .map_err(|e| ProbeError::MalformedBody(e.to_string()))?;

        if body.status.eq_ignore_ascii_case(OK_MARKER) {
            Ok(payload)
        } else {
            Err(ProbeError::NotOk(body.status))
        }
    }
}
