//! Platform capability interface and its reqwest-backed implementation.
//!
//! The connection service never touches the platform directly. Everything it
//! needs comes through [`NetworkCapabilities`]: current connectivity, quality
//! hints, the HTTP transport and a hook for pushing connectivity notifications.

use crate::config::ConnectionDefaults;
use crate::error::{ConnectionError, Result};
use crate::network::types::{ConnectionQuality, PlatformSignal};
use async_trait::async_trait;
use reqwest::Client;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, PoisonError, RwLock, Weak};
use std::time::Duration;
use tracing::debug;

/// Minimal HTTP response handed back by the transport.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransportResponse {
    pub status: u16,
    pub body: Vec<u8>,
}

impl TransportResponse {
    pub fn new(status: u16, body: impl Into<Vec<u8>>) -> Self {
        Self {
            status,
            body: body.into(),
        }
    }

    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

/// Receiver of platform connectivity notifications.
///
/// `deliver` runs on the notifying thread and must finish its state update
/// before returning.
pub trait SignalSink: Send + Sync {
    fn deliver(&self, signal: PlatformSignal);
}

/// Network primitives supplied by the host platform.
#[async_trait]
pub trait NetworkCapabilities: Send + Sync {
    /// Current connectivity as reported by the platform.
    fn is_online(&self) -> bool;

    /// Connection quality hints, when the platform exposes them.
    fn connection_quality(&self) -> Option<ConnectionQuality> {
        None
    }

    /// Issue a GET request. Failures to get any response are returned as
    /// [`ConnectionError::TransientNetwork`].
    async fn get(&self, url: &str) -> Result<TransportResponse>;

    /// Register a sink for pushed connectivity notifications.
    ///
    /// Platforms without push support keep the default no-op; the owner then
    /// feeds signals in by hand.
    fn attach(&self, _sink: Weak<dyn SignalSink>) {}
}

/// [`NetworkCapabilities`] over a shared reqwest client.
///
/// Connectivity is driven by the host: call [`set_online`](Self::set_online)
/// and [`set_connection_quality`](Self::set_connection_quality) from the
/// platform's notification hooks. Each call is delivered as a
/// [`PlatformSignal`] to every attached sink before it returns.
pub struct HttpCapabilities {
    client: Client,
    online: AtomicBool,
    quality: RwLock<Option<ConnectionQuality>>,
    sinks: RwLock<Vec<Weak<dyn SignalSink>>>,
}

impl HttpCapabilities {
    /// Create capabilities that start online, with a client that times out
    /// after `request_timeout`.
    pub fn new(request_timeout: Duration) -> Result<Self> {
        let client = Client::builder()
            .timeout(request_timeout)
            .user_agent(ConnectionDefaults::USER_AGENT)
            .build()
            .map_err(|e| ConnectionError::Config {
                message: format!("Failed to create HTTP client: {}", e),
            })?;
        Ok(Self::with_client(client))
    }

    /// Wrap an existing client.
    pub fn with_client(client: Client) -> Self {
        Self {
            client,
            online: AtomicBool::new(true),
            quality: RwLock::new(None),
            sinks: RwLock::new(Vec::new()),
        }
    }

    /// Get a reference to the underlying reqwest client.
    pub fn inner(&self) -> &Client {
        &self.client
    }

    /// Record a platform online/offline notification.
    pub fn set_online(&self, online: bool) {
        self.online.store(online, Ordering::SeqCst);
        let signal = if online {
            PlatformSignal::Online
        } else {
            PlatformSignal::Offline
        };
        self.forward(signal);
    }

    /// Record a platform connection-quality notification.
    pub fn set_connection_quality(&self, quality: ConnectionQuality) {
        *self.quality.write().unwrap_or_else(PoisonError::into_inner) = Some(quality.clone());
        self.forward(PlatformSignal::ConnectionChange(quality));
    }

    /// Number of live attached sinks.
    pub fn sink_count(&self) -> usize {
        self.sinks
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .filter(|sink| sink.strong_count() > 0)
            .count()
    }

    fn forward(&self, signal: PlatformSignal) {
        // Sinks run outside the lock so they may notify again.
        let live: Vec<Arc<dyn SignalSink>> = {
            let mut sinks = self.sinks.write().unwrap_or_else(PoisonError::into_inner);
            sinks.retain(|sink| sink.strong_count() > 0);
            sinks.iter().filter_map(Weak::upgrade).collect()
        };
        if live.is_empty() {
            debug!("No connection service attached for platform signals");
            return;
        }
        for sink in live {
            sink.deliver(signal.clone());
        }
    }
}

#[async_trait]
impl NetworkCapabilities for HttpCapabilities {
    fn is_online(&self) -> bool {
        self.online.load(Ordering::SeqCst)
    }

    fn connection_quality(&self) -> Option<ConnectionQuality> {
        self.quality
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    async fn get(&self, url: &str) -> Result<TransportResponse> {
        let response = self.client.get(url).send().await?;
        let status = response.status().as_u16();
        let body = response.bytes().await?;
        Ok(TransportResponse::new(status, body.to_vec()))
    }

    fn attach(&self, sink: Weak<dyn SignalSink>) {
        self.sinks
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .push(sink);
    }
}
