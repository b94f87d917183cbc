//! Process-wide default connection service.
//!
//! A convenience layer only: the core type never depends on it. Applications
//! that want one shared instance install it once and look it up from anywhere.

use crate::network::ConnectionService;
use std::sync::{PoisonError, RwLock};
use tracing::debug;

static DEFAULT_SERVICE: RwLock<Option<ConnectionService>> = RwLock::new(None);

/// Install `service` as the default instance, returning the one it replaces.
///
/// The replaced service is not destroyed; that stays with the caller.
pub fn install_default(service: ConnectionService) -> Option<ConnectionService> {
    debug!("Installing default connection service");
    DEFAULT_SERVICE
        .write()
        .unwrap_or_else(PoisonError::into_inner)
        .replace(service)
}

/// The default instance, if one is installed.
pub fn default_service() -> Option<ConnectionService> {
    DEFAULT_SERVICE
        .read()
        .unwrap_or_else(PoisonError::into_inner)
        .clone()
}

/// Remove and destroy the default instance.
pub fn shutdown_default() {
    let service = DEFAULT_SERVICE
        .write()
        .unwrap_or_else(PoisonError::into_inner)
        .take();
    if let Some(service) = service {
        service.destroy();
    }
}
