//! In-process publish/subscribe fan-out of connection events.
//!
//! Observers are invoked synchronously, in registration order, on the thread
//! that publishes. A panicking observer is contained and logged so that the
//! remaining observers and the publisher are unaffected.

use crate::network::types::{ConnectionEvent, EventKind};
use std::any::Any;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, PoisonError, RwLock};
use tracing::{debug, error};

/// Receives connection events.
///
/// Implemented for any `Fn(&ConnectionEvent) + Send + Sync` closure.
pub trait StatusObserver: Send + Sync {
    fn on_event(&self, event: &ConnectionEvent);
}

impl<F> StatusObserver for F
where
    F: Fn(&ConnectionEvent) + Send + Sync,
{
    fn on_event(&self, event: &ConnectionEvent) {
        self(event)
    }
}

/// Shared handle to an observer, also used as its identity for unsubscribe.
pub type DynStatusObserver = Arc<dyn StatusObserver>;

/// Identifier returned by [`StatusBroadcaster::subscribe`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerId(u64);

struct Registration {
    id: ListenerId,
    kind: EventKind,
    observer: DynStatusObserver,
}

/// Typed observer registry.
pub struct StatusBroadcaster {
    listeners: RwLock<Vec<Registration>>,
    next_id: AtomicU64,
}

impl Default for StatusBroadcaster {
    fn default() -> Self {
        Self::new()
    }
}

impl StatusBroadcaster {
    pub fn new() -> Self {
        Self {
            listeners: RwLock::new(Vec::new()),
            next_id: AtomicU64::new(1),
        }
    }

    /// Register `observer` for events of `kind`.
    pub fn subscribe(&self, kind: EventKind, observer: DynStatusObserver) -> ListenerId {
        let id = ListenerId(self.next_id.fetch_add(1, Ordering::SeqCst));
        self.listeners
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .push(Registration { id, kind, observer });
        debug!("Registered {} listener {:?}", kind, id);
        id
    }

    /// Remove the registration matching both `kind` and `observer` identity.
    ///
    /// Returns false if no such registration exists.
    pub fn unsubscribe(&self, kind: EventKind, observer: &DynStatusObserver) -> bool {
        let mut listeners = self.listeners.write().unwrap_or_else(PoisonError::into_inner);
        let target = observer_addr(observer);
        match listeners
            .iter()
            .position(|r| r.kind == kind && observer_addr(&r.observer) == target)
        {
            Some(index) => {
                listeners.remove(index);
                true
            }
            None => false,
        }
    }

    /// Remove a registration by id.
    pub fn unsubscribe_id(&self, id: ListenerId) -> bool {
        let mut listeners = self.listeners.write().unwrap_or_else(PoisonError::into_inner);
        let before = listeners.len();
        listeners.retain(|r| r.id != id);
        listeners.len() != before
    }

    /// Deliver `event` to every observer registered for its kind.
    ///
    /// Only observers registered when this call starts are invoked.
    pub fn publish(&self, event: &ConnectionEvent) {
        let kind = event.kind();
        let targets: Vec<(ListenerId, DynStatusObserver)> = self
            .listeners
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .filter(|r| r.kind == kind)
            .map(|r| (r.id, Arc::clone(&r.observer)))
            .collect();

        for (id, observer) in targets {
            if let Err(panic) = catch_unwind(AssertUnwindSafe(|| observer.on_event(event))) {
                error!(
                    "Listener {:?} for {} event panicked: {}",
                    id,
                    kind,
                    panic_message(panic.as_ref())
                );
            }
        }
    }

    /// Drop every registration.
    pub fn clear(&self) {
        self.listeners
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
    }

    pub fn listener_count(&self) -> usize {
        self.listeners
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }
}

// Data pointer only; vtable pointers are not stable identities.
fn observer_addr(observer: &DynStatusObserver) -> *const () {
    Arc::as_ptr(observer) as *const ()
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "non-string panic payload".to_string()
    }
}
