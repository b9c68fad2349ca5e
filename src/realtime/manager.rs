//! # Realtime Manager
//!
//! Owns every logical subscription, opens one transport channel per
//! subscription and routes inbound events to the matching callbacks.
//!
//! ## Routing policy
//! Unless `trust_server_filtering` is set, each event is re-validated
//! against the subscription's table and predicate before the callback runs.
//! Transports that filter server-side can opt out of the local check.

use std::collections::HashMap;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, RwLock, RwLockReadGuard, RwLockWriteGuard, Weak};

use chrono::{DateTime, Utc};
use uuid::Uuid;

use super::connection::ConnectionState;
use super::errors::{RealtimeError, RealtimeResult};
use super::event::ChangeEvent;
use super::predicate::Predicate;
use super::transport::{ChannelHandle, ChannelSpec, EventSink, Transport};
use crate::config::SyncConfig;
use crate::locks::{lock, read, write};
use crate::observability::Event;

/// Consumer callback for routed events
pub type EventCallback = Arc<dyn Fn(&ChangeEvent) + Send + Sync>;

/// A live subscription owned by the manager
struct SubscriptionEntry {
    id: String,
    spec: ChannelSpec,
    callback: EventCallback,
    active: AtomicBool,
    delivered: AtomicU64,
    filtered: AtomicU64,
    channel: Mutex<Option<Box<dyn ChannelHandle>>>,
    created_at: DateTime<Utc>,
}

impl SubscriptionEntry {
    fn accepts(&self, event: &ChangeEvent, check_predicate: bool) -> bool {
        if event.table != self.spec.table {
            return false;
        }
        !check_predicate || self.spec.predicate.matches(event)
    }

    /// Deliver one event. Returns whether the callback ran.
    fn deliver(&self, event: &ChangeEvent, check_predicate: bool) -> bool {
        if !self.active.load(Ordering::Acquire) {
            return false;
        }
        if !self.accepts(event, check_predicate) {
            self.filtered.fetch_add(1, Ordering::Relaxed);
            return false;
        }

        self.delivered.fetch_add(1, Ordering::Relaxed);
        let callback = &self.callback;
        if panic::catch_unwind(AssertUnwindSafe(|| callback(event))).is_err() {
            tracing::error!(
                event = Event::ListenerPanicked.as_str(),
                subscription = %self.id,
                table = %self.spec.table,
                "subscription callback panicked"
            );
        }
        true
    }

    /// Stop delivery and close the channel. Returns false if already closed.
    fn deactivate(&self) -> bool {
        if !self.active.swap(false, Ordering::AcqRel) {
            return false;
        }
        let channel = lock(&self.channel).take();
        if let Some(mut channel) = channel {
            channel.close();
        }
        true
    }
}

type SubscriptionMap = HashMap<String, Arc<SubscriptionEntry>>;

/// Point-in-time view of a subscription
#[derive(Debug, Clone, PartialEq)]
pub struct SubscriptionInfo {
    pub id: String,
    pub table: String,
    pub predicate: Predicate,
    pub delivered: u64,
    pub filtered: u64,
    pub created_at: DateTime<Utc>,
}

/// Result of routing an event through [`RealtimeManager::route`]
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct RouteResult {
    /// Subscriptions on the event's table
    pub candidates: usize,
    /// Callbacks invoked
    pub delivered: usize,
    /// Rejected by predicate
    pub filtered: usize,
}

/// Creates and destroys logical subscriptions over a shared transport.
///
/// Construct one per transport and share it via `Arc`.
pub struct RealtimeManager {
    transport: Arc<dyn Transport>,
    connection: Arc<ConnectionState>,
    subscriptions: RwLock<SubscriptionMap>,
    trust_server_filtering: bool,
}

impl std::fmt::Debug for RealtimeManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RealtimeManager")
            .field("connection", &self.connection)
            .field("subscriptions", &self.active_subscriptions())
            .field("trust_server_filtering", &self.trust_server_filtering)
            .finish()
    }
}

impl RealtimeManager {
    /// Create a manager that re-validates predicates locally
    pub fn new(transport: Arc<dyn Transport>, connection: Arc<ConnectionState>) -> Arc<Self> {
        Self::with_policy(transport, connection, false)
    }

    /// Create a manager with an explicit filtering policy
    pub fn with_policy(
        transport: Arc<dyn Transport>,
        connection: Arc<ConnectionState>,
        trust_server_filtering: bool,
    ) -> Arc<Self> {
        Arc::new(Self {
            transport,
            connection,
            subscriptions: RwLock::new(HashMap::new()),
            trust_server_filtering,
        })
    }

    /// Create a manager whose filtering policy comes from
    /// [`SyncConfig::trust_server_filtering`]
    pub fn from_config(
        transport: Arc<dyn Transport>,
        connection: Arc<ConnectionState>,
        config: &SyncConfig,
    ) -> Arc<Self> {
        Self::with_policy(transport, connection, config.trust_server_filtering)
    }

    /// Whether events are delivered without re-checking the predicate
    pub fn trusts_server_filtering(&self) -> bool {
        self.trust_server_filtering
    }

    /// Shared connection state
    pub fn connection(&self) -> &Arc<ConnectionState> {
        &self.connection
    }

    pub fn is_connected(&self) -> bool {
        self.connection.is_connected()
    }

    /// Subscribe to events on `table` whose row matches `predicate`.
    ///
    /// Every call creates an independent subscription, even for an identical
    /// (table, predicate) pair. Failure to open the channel never reaches the
    /// caller: the connection is reported as down and an inert handle is
    /// returned.
    pub fn subscribe<F>(
        self: &Arc<Self>,
        table: &str,
        predicate: Predicate,
        on_event: F,
    ) -> SubscriptionHandle
    where
        F: Fn(&ChangeEvent) + Send + Sync + 'static,
    {
        self.subscribe_callback(table, predicate, Arc::new(on_event))
    }

    pub(crate) fn subscribe_callback(
        self: &Arc<Self>,
        table: &str,
        predicate: Predicate,
        callback: EventCallback,
    ) -> SubscriptionHandle {
        if table.trim().is_empty() {
            let err = RealtimeError::InvalidTable(table.to_string());
            tracing::warn!(
                event = Event::SubscriptionFailed.as_str(),
                code = err.code(),
                error = %err,
                "refusing subscription"
            );
            return SubscriptionHandle::inert();
        }

        let entry = Arc::new(SubscriptionEntry {
            id: Uuid::new_v4().to_string(),
            spec: ChannelSpec::new(table, predicate),
            callback,
            active: AtomicBool::new(true),
            delivered: AtomicU64::new(0),
            filtered: AtomicU64::new(0),
            channel: Mutex::new(None),
            created_at: Utc::now(),
        });

        let check_predicate = !self.trust_server_filtering;
        let weak_entry = Arc::downgrade(&entry);
        let sink: EventSink = Arc::new(move |event: &ChangeEvent| {
            if let Some(entry) = weak_entry.upgrade() {
                entry.deliver(event, check_predicate);
            }
        });

        match self.transport.open_channel(&entry.spec, sink) {
            Ok(channel) => {
                *lock(&entry.channel) = Some(channel);
                self.write_subscriptions()
                    .insert(entry.id.clone(), Arc::clone(&entry));
                tracing::debug!(
                    event = Event::SubscriptionOpened.as_str(),
                    subscription = %entry.id,
                    topic = %entry.spec.topic(),
                    "subscription opened"
                );
                SubscriptionHandle {
                    manager: Arc::downgrade(self),
                    id: Some(entry.id.clone()),
                    released: AtomicBool::new(false),
                }
            }
            Err(err) => {
                entry.active.store(false, Ordering::Release);
                tracing::warn!(
                    event = Event::SubscriptionFailed.as_str(),
                    code = err.code(),
                    topic = %entry.spec.topic(),
                    error = %err,
                    "failed to open channel"
                );
                self.connection.set_status(false);
                SubscriptionHandle::inert()
            }
        }
    }

    /// Tear down a subscription by id
    pub fn unsubscribe(&self, subscription_id: &str) -> RealtimeResult<()> {
        let entry = self.write_subscriptions().remove(subscription_id);
        let entry =
            entry.ok_or_else(|| RealtimeError::SubscriptionNotFound(subscription_id.to_string()))?;

        if entry.deactivate() {
            tracing::debug!(
                event = Event::SubscriptionClosed.as_str(),
                subscription = %entry.id,
                table = %entry.spec.table,
                delivered = entry.delivered.load(Ordering::Relaxed),
                "subscription closed"
            );
        }
        Ok(())
    }

    /// Tear down every subscription
    pub fn close_all(&self) {
        let entries: Vec<Arc<SubscriptionEntry>> =
            self.write_subscriptions().drain().map(|(_, e)| e).collect();
        let count = entries.len();
        for entry in entries {
            entry.deactivate();
        }
        tracing::info!(
            event = Event::SubscriptionsCleared.as_str(),
            count,
            "closed all subscriptions"
        );
    }

    /// Route an event that arrived on a multiplexed stream rather than a
    /// per-channel sink. Predicates are always evaluated here.
    pub fn route(&self, event: &ChangeEvent) -> RouteResult {
        let candidates: Vec<Arc<SubscriptionEntry>> = self
            .read_subscriptions()
            .values()
            .filter(|e| e.spec.table == event.table)
            .cloned()
            .collect();

        let mut result = RouteResult {
            candidates: candidates.len(),
            ..RouteResult::default()
        };
        for entry in candidates {
            if entry.deliver(event, true) {
                result.delivered += 1;
            } else {
                result.filtered += 1;
            }
        }
        result
    }

    /// Number of live subscriptions
    pub fn active_subscriptions(&self) -> usize {
        self.read_subscriptions().len()
    }

    /// Snapshot of every live subscription, oldest first
    pub fn subscriptions(&self) -> Vec<SubscriptionInfo> {
        let mut infos: Vec<SubscriptionInfo> = self
            .read_subscriptions()
            .values()
            .map(|e| SubscriptionInfo {
                id: e.id.clone(),
                table: e.spec.table.clone(),
                predicate: e.spec.predicate.clone(),
                delivered: e.delivered.load(Ordering::Relaxed),
                filtered: e.filtered.load(Ordering::Relaxed),
                created_at: e.created_at,
            })
            .collect();
        infos.sort_by_key(|i| i.created_at);
        infos
    }

    fn read_subscriptions(&self) -> RwLockReadGuard<'_, SubscriptionMap> {
        read(&self.subscriptions)
    }

    fn write_subscriptions(&self) -> RwLockWriteGuard<'_, SubscriptionMap> {
        write(&self.subscriptions)
    }
}

/// Handle returned by [`RealtimeManager::subscribe`].
///
/// [`unsubscribe`](Self::unsubscribe) is idempotent; once it returns the
/// callback is never invoked again. Dropping the handle unsubscribes.
#[must_use = "dropping the handle tears the subscription down"]
#[derive(Debug)]
pub struct SubscriptionHandle {
    manager: Weak<RealtimeManager>,
    id: Option<String>,
    released: AtomicBool,
}

impl SubscriptionHandle {
    /// A handle with nothing behind it
    pub(crate) fn inert() -> Self {
        Self {
            manager: Weak::new(),
            id: None,
            released: AtomicBool::new(true),
        }
    }

    pub fn id(&self) -> Option<&str> {
        self.id.as_deref()
    }

    /// Whether this handle still owns a live subscription
    pub fn is_active(&self) -> bool {
        if self.released.load(Ordering::Acquire) {
            return false;
        }
        match (self.manager.upgrade(), self.id.as_deref()) {
            (Some(manager), Some(id)) => manager.read_subscriptions().contains_key(id),
            _ => false,
        }
    }

    pub fn unsubscribe(&self) {
        if self.released.swap(true, Ordering::AcqRel) {
            return;
        }
        let (Some(manager), Some(id)) = (self.manager.upgrade(), self.id.as_deref()) else {
            return;
        };
        // Already gone after close_all; nothing left to release.
        let _ = manager.unsubscribe(id);
    }
}

impl Drop for SubscriptionHandle {
    fn drop(&mut self) {
        self.unsubscribe();
    }
}
