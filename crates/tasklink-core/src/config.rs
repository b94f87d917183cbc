//! Centralized configuration for Tasklink connection handling.
//!
//! [`ConnectionDefaults`] holds the documented defaults. [`ServiceConfig`] is the
//! validated configuration a [`ConnectionService`] is built from, and
//! [`ServiceOptions`] is the plain options record it can be loaded from.
//!
//! [`ConnectionService`]: crate::network::ConnectionService

use crate::error::{ConnectionError, Result};
use crate::network::RetryPolicy;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Default values for connection handling.
pub struct ConnectionDefaults;

impl ConnectionDefaults {
    pub const PROBE_INTERVAL: Duration = Duration::from_secs(30);
    pub const PROBE_TIMEOUT: Duration = Duration::from_secs(10);
    pub const HEALTH_PATH: &'static str = "/health";
    pub const MAX_ATTEMPTS: u32 = 5;
    pub const BASE_DELAY: Duration = Duration::from_millis(1000);
    pub const MAX_DELAY: Duration = Duration::from_millis(30_000);
    pub const JITTER_FRACTION: f64 = 0.1;
    pub const USER_AGENT: &'static str = "Tasklink/0.1";
}

/// Validated configuration for a connection service.
#[derive(Debug, Clone)]
pub struct ServiceConfig {
    /// Base URL of the remote API, without the health path.
    pub base_url: String,
    /// Path of the health endpoint, appended to `base_url`.
    pub health_path: String,
    /// How often the background monitor probes the endpoint.
    pub probe_interval: Duration,
    /// Upper bound for a single probe request.
    pub probe_timeout: Duration,
    /// Retry policy applied by `execute`.
    pub retry: RetryPolicy,
}

impl ServiceConfig {
    /// Create a config for the given API base URL with default values.
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            health_path: ConnectionDefaults::HEALTH_PATH.to_string(),
            probe_interval: ConnectionDefaults::PROBE_INTERVAL,
            probe_timeout: ConnectionDefaults::PROBE_TIMEOUT,
            retry: RetryPolicy::default(),
        }
    }

    /// Set the probe interval.
    pub fn with_probe_interval(mut self, interval: Duration) -> Self {
        self.probe_interval = interval;
        self
    }

    /// Set the probe timeout.
    pub fn with_probe_timeout(mut self, timeout: Duration) -> Self {
        self.probe_timeout = timeout;
        self
    }

    /// Set the health endpoint path.
    pub fn with_health_path(mut self, path: impl Into<String>) -> Self {
        self.health_path = path.into();
        self
    }

    /// Set the retry policy.
    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// Parse a JSON options record into a validated config.
    pub fn from_json_str(json: &str) -> Result<Self> {
        let options: ServiceOptions = serde_json::from_str(json)?;
        Self::try_from(options)
    }

    /// Full URL of the health endpoint.
    pub fn health_url(&self) -> String {
        let base = self.base_url.trim_end_matches('/');
        let path = self.health_path.trim_start_matches('/');
        format!("{}/{}", base, path)
    }

    /// Check that the config describes a usable service.
    pub fn validate(&self) -> Result<()> {
        let parsed = url::Url::parse(&self.base_url).map_err(|e| ConnectionError::Config {
            message: format!("Invalid base URL {:?}: {}", self.base_url, e),
        })?;
        if !matches!(parsed.scheme(), "http" | "https") {
            return Err(ConnectionError::Config {
                message: format!("Unsupported URL scheme: {}", parsed.scheme()),
            });
        }
        if self.probe_interval.is_zero() {
            return Err(ConnectionError::Config {
                message: "Probe interval must be greater than zero".to_string(),
            });
        }
        if self.probe_timeout.is_zero() {
            return Err(ConnectionError::Config {
                message: "Probe timeout must be greater than zero".to_string(),
            });
        }
        self.retry.validate()
    }
}

/// Plain options record, every field optional with a documented default.
///
/// Durations are given in milliseconds.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct ServiceOptions {
    pub base_url: String,
    pub health_path: String,
    pub probe_interval_ms: u64,
    pub probe_timeout_ms: u64,
    pub max_attempts: u32,
    pub base_delay_ms: u64,
    pub max_delay_ms: u64,
    pub jitter_fraction: f64,
}

impl Default for ServiceOptions {
    fn default() -> Self {
        Self {
            base_url: String::new(),
            health_path: ConnectionDefaults::HEALTH_PATH.to_string(),
            probe_interval_ms: ConnectionDefaults::PROBE_INTERVAL.as_millis() as u64,
            probe_timeout_ms: ConnectionDefaults::PROBE_TIMEOUT.as_millis() as u64,
            max_attempts: ConnectionDefaults::MAX_ATTEMPTS,
            base_delay_ms: ConnectionDefaults::BASE_DELAY.as_millis() as u64,
            max_delay_ms: ConnectionDefaults::MAX_DELAY.as_millis() as u64,
            jitter_fraction: ConnectionDefaults::JITTER_FRACTION,
        }
    }
}

impl TryFrom<ServiceOptions> for ServiceConfig {
    type Error = ConnectionError;

    fn try_from(options: ServiceOptions) -> Result<Self> {
        let retry = RetryPolicy::new()
            .with_max_attempts(options.max_attempts)
            .with_base_delay(Duration::from_millis(options.base_delay_ms))
            .with_max_delay(Duration::from_millis(options.max_delay_ms))
            .with_jitter_fraction(options.jitter_fraction);

        let config = ServiceConfig::new(options.base_url)
            .with_health_path(options.health_path)
            .with_probe_interval(Duration::from_millis(options.probe_interval_ms))
            .with_probe_timeout(Duration::from_millis(options.probe_timeout_ms))
            .with_retry(retry);

        config.validate()?;
        Ok(config)
    }
}
