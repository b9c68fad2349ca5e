//! # Connection State
//!
//! Authoritative connected/disconnected flag for the shared transport,
//! with synchronous fan-out to registered listeners.
//!
//! The transport is the only writer during normal operation; the manager
//! also reports `false` when a channel cannot be opened. No reconnection
//! policy lives here.

use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, Weak};

use crate::locks::lock;
use crate::observability::Event;

/// Callback invoked with the current connection status
pub type ConnectionListener = Arc<dyn Fn(bool) + Send + Sync>;

/// Shared connection status with a listener registry
pub struct ConnectionState {
    connected: Mutex<bool>,
    listeners: Mutex<Vec<(u64, ConnectionListener)>>,
    next_id: AtomicU64,
}

impl std::fmt::Debug for ConnectionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionState")
            .field("connected", &self.is_connected())
            .field("listeners", &self.listener_count())
            .finish()
    }
}

impl ConnectionState {
    /// Create a new state, initially disconnected
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            connected: Mutex::new(false),
            listeners: Mutex::new(Vec::new()),
            next_id: AtomicU64::new(1),
        })
    }

    /// Current status
    pub fn is_connected(&self) -> bool {
        *lock(&self.connected)
    }

    /// Register a listener.
    ///
    /// The listener is invoked immediately with the current status, then on
    /// every subsequent transition. Dropping the returned handle, or calling
    /// [`ListenerHandle::remove`], de-registers it.
    pub fn on_connection_change<F>(self: &Arc<Self>, listener: F) -> ListenerHandle
    where
        F: Fn(bool) + Send + Sync + 'static,
    {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let listener: ConnectionListener = Arc::new(listener);
        lock(&self.listeners).push((id, Arc::clone(&listener)));

        let current = self.is_connected();
        invoke_isolated(&listener, current);

        ListenerHandle {
            state: Arc::downgrade(self),
            id,
            removed: AtomicBool::new(false),
        }
    }

    /// Record a new status and notify listeners in registration order.
    ///
    /// Writing the value already held is a no-op. A panicking listener is
    /// logged and skipped; the rest still run.
    pub fn set_status(&self, connected: bool) {
        {
            let mut current = lock(&self.connected);
            if *current == connected {
                return;
            }
            *current = connected;
        }

        let event = if connected {
            Event::TransportConnected
        } else {
            Event::TransportDisconnected
        };
        tracing::info!(event = event.as_str(), connected, "connection status changed");

        let listeners: Vec<ConnectionListener> = lock(&self.listeners)
            .iter()
            .map(|(_, l)| Arc::clone(l))
            .collect();

        for listener in &listeners {
            invoke_isolated(listener, connected);
        }
    }

    /// Number of registered listeners
    pub fn listener_count(&self) -> usize {
        lock(&self.listeners).len()
    }

    fn remove_listener(&self, id: u64) {
        lock(&self.listeners).retain(|(lid, _)| *lid != id);
    }
}

fn invoke_isolated(listener: &ConnectionListener, connected: bool) {
    if panic::catch_unwind(AssertUnwindSafe(|| listener(connected))).is_err() {
        tracing::error!(
            event = Event::ListenerPanicked.as_str(),
            connected,
            "connection listener panicked"
        );
    }
}

/// Registration returned by [`ConnectionState::on_connection_change`]
#[must_use = "dropping the handle removes the listener"]
#[derive(Debug)]
pub struct ListenerHandle {
    state: Weak<ConnectionState>,
    id: u64,
    removed: AtomicBool,
}

impl ListenerHandle {
    /// De-register the listener. Safe to call more than once.
    pub fn remove(&self) {
        if self.removed.swap(true, Ordering::AcqRel) {
            return;
        }
        if let Some(state) = self.state.upgrade() {
            state.remove_listener(self.id);
        }
    }

    pub fn is_removed(&self) -> bool {
        self.removed.load(Ordering::Acquire)
    }
}

impl Drop for ListenerHandle {
    fn drop(&mut self) {
        self.remove();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    fn recorder() -> (Arc<Mutex<Vec<bool>>>, impl Fn(bool) + Send + Sync + 'static) {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        (seen, move |v| sink.lock().unwrap().push(v))
    }

    #[test]
    fn test_listener_invoked_immediately_with_current_value() {
        let state = ConnectionState::new();
        state.set_status(true);

        let (seen, listener) = recorder();
        let _handle = state.on_connection_change(listener);

        assert_eq!(*seen.lock().unwrap(), vec![true]);
    }

    #[test]
    fn test_transitions_broadcast_in_order() {
        let state = ConnectionState::new();
        let order = Arc::new(Mutex::new(Vec::new()));

        let o1 = Arc::clone(&order);
        let _h1 = state.on_connection_change(move |v| o1.lock().unwrap().push(("first", v)));
        let o2 = Arc::clone(&order);
        let _h2 = state.on_connection_change(move |v| o2.lock().unwrap().push(("second", v)));

        order.lock().unwrap().clear();
        state.set_status(true);

        assert_eq!(
            *order.lock().unwrap(),
            vec![("first", true), ("second", true)]
        );
    }

    #[test]
    fn test_same_value_not_rebroadcast() {
        let state = ConnectionState::new();
        let (seen, listener) = recorder();
        let _handle = state.on_connection_change(listener);

        state.set_status(false);
        state.set_status(true);
        state.set_status(true);

        assert_eq!(*seen.lock().unwrap(), vec![false, true]);
    }

    #[test]
    fn test_panicking_listener_does_not_block_others() {
        let state = ConnectionState::new();
        let _bad = state.on_connection_change(|v| {
            if v {
                panic!("listener failure");
            }
        });
        let (seen, listener) = recorder();
        let _good = state.on_connection_change(listener);

        state.set_status(true);

        assert_eq!(*seen.lock().unwrap(), vec![false, true]);
    }

    #[test]
    fn test_remove_is_idempotent() {
        let state = ConnectionState::new();
        let calls = Arc::new(AtomicUsize::new(0));
        let c = Arc::clone(&calls);
        let handle = state.on_connection_change(move |_| {
            c.fetch_add(1, Ordering::SeqCst);
        });
        assert_eq!(state.listener_count(), 1);

        handle.remove();
        handle.remove();
        assert!(handle.is_removed());
        assert_eq!(state.listener_count(), 0);

        state.set_status(true);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_drop_removes_listener() {
        let state = ConnectionState::new();
        {
            let _handle = state.on_connection_change(|_| {});
            assert_eq!(state.listener_count(), 1);
        }
        assert_eq!(state.listener_count(), 0);
    }
}
