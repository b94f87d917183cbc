//! Normalization of platform connectivity notifications.

use crate::network::broadcast::StatusBroadcaster;
use crate::network::types::{ConnectionEvent, ConnectionQuality, PlatformSignal};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, PoisonError, RwLock};
use tracing::{debug, info};

/// Tracks platform connectivity and turns each notification into an event.
///
/// Purely event-driven: state only changes through [`notify`](Self::notify).
/// Every platform signal produces exactly one event, so a flapping connection
/// yields one event per flap.
pub struct NetworkSignal {
    online: AtomicBool,
    quality: RwLock<Option<ConnectionQuality>>,
    broadcaster: Arc<StatusBroadcaster>,
}

impl NetworkSignal {
    /// Capture the initial connectivity state.
    pub fn new(
        online: bool,
        quality: Option<ConnectionQuality>,
        broadcaster: Arc<StatusBroadcaster>,
    ) -> Self {
        Self {
            online: AtomicBool::new(online),
            quality: RwLock::new(quality),
            broadcaster,
        }
    }

    pub fn is_online(&self) -> bool {
        self.online.load(Ordering::SeqCst)
    }

    pub fn quality(&self) -> Option<ConnectionQuality> {
        self.quality
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Record `signal`, then publish the matching event.
    ///
    /// `before_publish` runs after the new state is recorded and before any
    /// observer sees the event, so the owner can apply its own transition first.
    pub fn notify(&self, signal: PlatformSignal, before_publish: impl FnOnce(&ConnectionEvent)) {
        let event = match signal {
            PlatformSignal::Online => {
                if !self.online.swap(true, Ordering::SeqCst) {
                    info!("Platform reports connectivity restored");
                }
                ConnectionEvent::Online
            }
            PlatformSignal::Offline => {
                if self.online.swap(false, Ordering::SeqCst) {
                    info!("Platform reports connectivity lost");
                }
                ConnectionEvent::Offline
            }
            PlatformSignal::ConnectionChange(quality) => {
                debug!("Connection quality changed: {:?}", quality);
                *self.quality.write().unwrap_or_else(PoisonError::into_inner) =
                    Some(quality.clone());
                ConnectionEvent::ConnectionChange(quality)
            }
        };

        before_publish(&event);
        self.broadcaster.publish(&event);
    }
}
