//! # Subscription Binding
//!
//! Ties one subscription's lifetime to a consumer's active interval.
//!
//! - `bind(Some(key))` on an unbound binding subscribes once.
//! - `bind` with a key equal by value to the current one is a no-op.
//! - `bind` with a different key tears the old subscription down before
//!   the new one is created; the two never overlap.
//! - `bind(None)` (a required parameter is missing) and `unbind()` leave no
//!   subscription behind.
//!
//! The wanted key outlives a failed subscribe. When the shared
//! [`ConnectionState`](super::ConnectionState) next reports a reconnect,
//! the binding subscribes again on its own and then runs its reconnect
//! hook, if one is set.

use std::sync::{Arc, Mutex};

use super::connection::ListenerHandle;
use super::event::ChangeEvent;
use super::manager::{EventCallback, RealtimeManager, SubscriptionHandle};
use super::predicate::Predicate;
use crate::locks::lock;

/// What a binding subscribes to
#[derive(Debug, Clone, PartialEq)]
pub struct BindingKey {
    pub table: String,
    pub predicate: Predicate,
}

impl BindingKey {
    pub fn new(table: impl Into<String>, predicate: Predicate) -> Self {
        Self {
            table: table.into(),
            predicate,
        }
    }

    /// Key for rows of `table` owned by `subject`; `None` when the subject
    /// is not known yet
    pub fn for_subject(table: &str, column: &str, subject: Option<&str>) -> Option<Self> {
        subject
            .filter(|s| !s.is_empty())
            .map(|s| Self::new(table, Predicate::eq(column, s)))
    }
}

/// Runs after the transport reconnects while a key is wanted
pub type ReconnectHook = Arc<dyn Fn() + Send + Sync>;

#[derive(Default)]
struct Slot {
    wanted: Option<BindingKey>,
    handle: Option<SubscriptionHandle>,
}

impl Slot {
    fn is_live(&self) -> bool {
        self.handle.as_ref().is_some_and(SubscriptionHandle::is_active)
    }
}

/// State shared between a binding and its connection listener
struct BindingCore {
    manager: Arc<RealtimeManager>,
    on_event: EventCallback,
    slot: Mutex<Slot>,
    on_reconnect: Mutex<Option<ReconnectHook>>,
}

impl BindingCore {
    /// Subscribe for the wanted key unless a live subscription exists.
    /// Returns whether the binding is live afterwards.
    fn ensure_subscribed(&self) -> bool {
        let mut slot = lock(&self.slot);
        if slot.is_live() {
            return true;
        }
        let Some(key) = slot.wanted.clone() else {
            return false;
        };

        // A dead handle left over from close_all or a lost channel.
        slot.handle = None;
        let handle = self.manager.subscribe_callback(
            &key.table,
            key.predicate.clone(),
            Arc::clone(&self.on_event),
        );
        if handle.is_active() {
            slot.handle = Some(handle);
            true
        } else {
            tracing::debug!(table = %key.table, "binding pending until the transport reconnects");
            false
        }
    }

    fn take_all(&self) -> Option<SubscriptionHandle> {
        let mut slot = lock(&self.slot);
        slot.wanted = None;
        slot.handle.take()
    }

    fn wants_key(&self) -> bool {
        lock(&self.slot).wanted.is_some()
    }

    fn reconnected(&self) {
        if !self.manager.is_connected() || !self.wants_key() {
            return;
        }
        if !self.ensure_subscribed() {
            return;
        }
        let hook = lock(&self.on_reconnect).clone();
        if let Some(hook) = hook {
            hook();
        }
    }
}

/// One subscription bound to a consumer lifecycle
pub struct Binding {
    core: Arc<BindingCore>,
    _status: ListenerHandle,
}

impl std::fmt::Debug for Binding {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Binding")
            .field("key", &self.key())
            .field("bound", &self.is_bound())
            .field("connected", &self.connected())
            .finish()
    }
}

impl Binding {
    /// Create an unbound binding that will route events to `on_event`
    pub fn new<F>(manager: Arc<RealtimeManager>, on_event: F) -> Self
    where
        F: Fn(&ChangeEvent) + Send + Sync + 'static,
    {
        let core = Arc::new(BindingCore {
            manager,
            on_event: Arc::new(on_event),
            slot: Mutex::new(Slot::default()),
            on_reconnect: Mutex::new(None),
        });

        // Only transitions to `true` matter here. A failed subscribe reports
        // `false` while the slot is locked, so that path must stay lock-free.
        let listener_core = Arc::downgrade(&core);
        let status = core.manager.connection().on_connection_change(move |connected| {
            if !connected {
                return;
            }
            if let Some(core) = listener_core.upgrade() {
                core.reconnected();
            }
        });

        Self {
            core,
            _status: status,
        }
    }

    /// Run `hook` whenever the transport reconnects while a key is wanted,
    /// after the subscription is back. Replaces any earlier hook.
    pub fn on_reconnect<F>(&self, hook: F)
    where
        F: Fn() + Send + Sync + 'static,
    {
        *lock(&self.core.on_reconnect) = Some(Arc::new(hook));
    }

    /// Activate with `key`, or rebind if the key changed by value.
    ///
    /// If the subscribe fails the key is still remembered; the binding
    /// subscribes on the next reconnect, or on the next call to
    /// [`bind`](Self::bind) or [`retry`](Self::retry).
    pub fn bind(&mut self, key: Option<BindingKey>) {
        let Some(key) = key else {
            self.unbind();
            return;
        };

        let stale = {
            let mut slot = lock(&self.core.slot);
            if slot.wanted.as_ref() == Some(&key) && slot.is_live() {
                return;
            }
            slot.wanted = Some(key);
            slot.handle.take()
        };
        if let Some(stale) = stale {
            stale.unsubscribe();
        }

        self.core.ensure_subscribed();
    }

    /// Alias of [`bind`](Self::bind) for call sites reacting to a
    /// parameter change
    pub fn rebind(&mut self, key: Option<BindingKey>) {
        self.bind(key);
    }

    /// Subscribe again if a key is wanted but no subscription is live.
    /// Returns whether the binding is live.
    pub fn retry(&self) -> bool {
        self.core.ensure_subscribed()
    }

    /// Tear down the subscription, if any, and forget the key. `on_event`
    /// is never invoked afterwards.
    pub fn unbind(&mut self) {
        if let Some(handle) = self.core.take_all() {
            handle.unsubscribe();
        }
    }

    /// Whether a subscription is live
    pub fn is_bound(&self) -> bool {
        lock(&self.core.slot).is_live()
    }

    /// Whether a key is wanted but its subscription is not live
    pub fn is_pending(&self) -> bool {
        let slot = lock(&self.core.slot);
        slot.wanted.is_some() && !slot.is_live()
    }

    /// The wanted key, live or pending
    pub fn key(&self) -> Option<BindingKey> {
        lock(&self.core.slot).wanted.clone()
    }

    /// Transport status while bound; always `false` when unbound
    pub fn connected(&self) -> bool {
        self.is_bound() && self.core.manager.is_connected()
    }
}

impl Drop for Binding {
    fn drop(&mut self) {
        self.unbind();
    }
}
