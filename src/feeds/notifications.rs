//! # Notification Feed
//!
//! Unbounded, newest-first notification list with an unread counter.
//!
//! `mark_as_read` / `mark_all_as_read` apply locally first and report to
//! the server afterwards without waiting. Local state is therefore ahead of
//! the server until the next UPDATE event for the row, or the next
//! snapshot, which is taken as authoritative. `unread_count` never goes
//! below zero.

use std::collections::HashSet;
use std::sync::{Arc, Mutex};

use tokio::runtime::Handle;
use tokio::task::JoinHandle;

use super::record::{NotificationRecord, RecordId};
use super::snapshot::{NotificationSource, SnapshotResult};
use crate::config::SyncConfig;
use crate::locks::lock;
use crate::observability::Event;
use crate::presentation::{dispatch, Presenter, Toast};
use crate::realtime::{Binding, BindingKey, ChangeEvent, Operation, RealtimeManager};

/// View state of the notification feed
#[derive(Debug, Clone, PartialEq)]
pub struct NotificationState {
    items: Vec<NotificationRecord>,
    unread_count: u64,
    loading: bool,
    active: bool,
    load_ticket: u64,
    live_since_load: Vec<RecordId>,
}

impl Default for NotificationState {
    fn default() -> Self {
        Self::new()
    }
}

impl NotificationState {
    pub fn new() -> Self {
        Self {
            items: Vec::new(),
            unread_count: 0,
            loading: false,
            active: true,
            load_ticket: 0,
            live_since_load: Vec::new(),
        }
    }

    /// State seeded from a list, newest first
    pub fn with_items(items: Vec<NotificationRecord>) -> Self {
        let mut state = Self::new();
        state.unread_count = count_unread(&items);
        state.items = items;
        state
    }

    pub fn items(&self) -> &[NotificationRecord] {
        &self.items
    }

    pub fn unread_count(&self) -> u64 {
        self.unread_count
    }

    pub fn loading(&self) -> bool {
        self.loading
    }

    pub fn get(&self, id: &RecordId) -> Option<&NotificationRecord> {
        self.items.iter().find(|n| &n.id == id)
    }

    pub fn begin_load(&mut self) -> u64 {
        self.load_ticket += 1;
        self.loading = true;
        self.live_since_load.clear();
        self.load_ticket
    }

    pub fn deactivate(&mut self) {
        self.active = false;
        self.loading = false;
        self.load_ticket += 1;
    }

    /// Apply a settled snapshot. A failed fetch keeps the current list.
    /// Rows that streamed in during the fetch and are missing from the
    /// snapshot stay on top. Returns whether the result was applied.
    pub fn apply_snapshot(
        &mut self,
        ticket: u64,
        snapshot: SnapshotResult<Vec<NotificationRecord>>,
    ) -> bool {
        if !self.active || ticket != self.load_ticket {
            return false;
        }

        if let Ok(snapshot) = snapshot {
            let snapshot_ids: HashSet<&RecordId> = snapshot.iter().map(|n| &n.id).collect();
            let live: Vec<NotificationRecord> = self
                .live_since_load
                .iter()
                .rev()
                .filter(|id| !snapshot_ids.contains(id))
                .filter_map(|id| self.get(id).cloned())
                .collect();

            self.items = live.into_iter().chain(snapshot).collect();
            self.unread_count = count_unread(&self.items);
        }

        self.live_since_load.clear();
        self.loading = false;
        true
    }

    /// Merge one stream event. Returns the toast to show, if any.
    /// A deactivated state ignores late deliveries.
    pub fn apply_event(&mut self, event: &ChangeEvent) -> Option<Toast> {
        if !self.active {
            return None;
        }
        match event.operation {
            Operation::Insert => {
                let record = decode(event)?;
                if self.get(&record.id).is_some() {
                    // Replayed INSERT: reconcile like an UPDATE, no toast.
                    self.reconcile(record);
                    return None;
                }
                let toast = Toast::for_severity(&record.severity, toast_text(&record));
                if !record.read {
                    self.unread_count += 1;
                }
                if self.loading {
                    self.live_since_load.push(record.id.clone());
                }
                self.items.insert(0, record);
                Some(toast)
            }
            Operation::Update => {
                let record = decode(event)?;
                self.reconcile(record);
                None
            }
            Operation::Delete => None,
        }
    }

    fn reconcile(&mut self, record: NotificationRecord) {
        let Some(slot) = self.items.iter_mut().find(|n| n.id == record.id) else {
            tracing::debug!(id = %record.id, "update for unknown notification ignored");
            return;
        };

        match (slot.read, record.read) {
            (false, true) => self.unread_count = self.unread_count.saturating_sub(1),
            (true, false) => self.unread_count += 1,
            _ => {}
        }
        *slot = record;
    }

    /// Optimistically mark one notification read. Returns whether anything
    /// changed; unknown ids and already-read rows are left alone.
    pub fn mark_as_read(&mut self, id: &RecordId) -> bool {
        match self.items.iter_mut().find(|n| &n.id == id) {
            Some(record) if !record.read => {
                record.read = true;
                self.unread_count = self.unread_count.saturating_sub(1);
                true
            }
            _ => false,
        }
    }

    /// Mark everything read. Returns whether anything was unread.
    pub fn mark_all_as_read(&mut self) -> bool {
        let had_unread = self.unread_count > 0 || self.items.iter().any(|n| !n.read);
        for record in &mut self.items {
            record.read = true;
        }
        self.unread_count = 0;
        had_unread
    }
}

fn count_unread(items: &[NotificationRecord]) -> u64 {
    items.iter().filter(|n| !n.read).count() as u64
}

fn toast_text(record: &NotificationRecord) -> String {
    match (record.title.is_empty(), record.message.is_empty()) {
        (false, false) => format!("{}: {}", record.title, record.message),
        (false, true) => record.title.clone(),
        (true, false) => record.message.clone(),
        (true, true) => "New notification".to_string(),
    }
}

fn decode(event: &ChangeEvent) -> Option<NotificationRecord> {
    match event.decode_current::<NotificationRecord>() {
        Ok(record) => Some(record),
        Err(err) => {
            tracing::warn!(
                event = Event::MalformedEvent.as_str(),
                table = %event.table,
                operation = %event.operation,
                error = %err,
                "ignoring notification event"
            );
            None
        }
    }
}

struct LoadContext {
    subject: String,
    runtime: Handle,
}

struct NotificationCore<S> {
    source: Arc<S>,
    presenter: Arc<dyn Presenter>,
    state: Mutex<NotificationState>,
    context: Mutex<Option<LoadContext>>,
}

impl<S: NotificationSource> NotificationCore<S> {
    fn on_event(&self, event: &ChangeEvent) {
        let toast = lock(&self.state).apply_event(event);
        if let Some(toast) = toast {
            dispatch(self.presenter.as_ref(), &toast);
        }
    }

    fn context(&self) -> Option<(String, Handle)> {
        lock(&self.context)
            .as_ref()
            .map(|c| (c.subject.clone(), c.runtime.clone()))
    }

    fn spawn_load(self: &Arc<Self>) -> Option<JoinHandle<()>> {
        let (subject, runtime) = self.context()?;
        let ticket = lock(&self.state).begin_load();
        let core = Arc::clone(self);
        Some(runtime.spawn(async move { core.load(subject, ticket).await }))
    }

    async fn load(&self, subject: String, ticket: u64) {
        tracing::debug!(event = Event::SnapshotBegin.as_str(), subject = %subject, ticket, "loading notifications");

        let snapshot = self.source.fetch_notifications(&subject).await;
        if let Err(err) = &snapshot {
            tracing::warn!(event = Event::SnapshotSliceFailed.as_str(), slice = "notifications", error = %err, "notifications snapshot failed");
        }

        let applied = lock(&self.state).apply_snapshot(ticket, snapshot);
        let event = if applied {
            Event::SnapshotApplied
        } else {
            Event::SnapshotDiscarded
        };
        tracing::debug!(event = event.as_str(), subject = %subject, ticket, "notifications snapshot settled");
    }
}

/// Live notification feed bound to one subject at a time
pub struct NotificationFeed<S: NotificationSource> {
    core: Arc<NotificationCore<S>>,
    binding: Binding,
    table: String,
    subject_column: String,
    subject: Option<String>,
}

impl<S: NotificationSource> NotificationFeed<S> {
    pub fn new(
        manager: Arc<RealtimeManager>,
        source: Arc<S>,
        presenter: Arc<dyn Presenter>,
        config: &SyncConfig,
    ) -> Self {
        let mut initial = NotificationState::new();
        initial.deactivate();

        let core = Arc::new(NotificationCore {
            source,
            presenter,
            state: Mutex::new(initial),
            context: Mutex::new(None),
        });
        let on_event = Arc::clone(&core);
        let binding = Binding::new(manager, move |e: &ChangeEvent| on_event.on_event(e));
        let on_reconnect = Arc::clone(&core);
        binding.on_reconnect(move || {
            tracing::debug!(
                event = Event::RefreshRequested.as_str(),
                reason = "reconnected",
                "stream back, resnapshotting notifications"
            );
            on_reconnect.spawn_load();
        });

        Self {
            core,
            binding,
            table: config.tables.notifications.clone(),
            subject_column: config.subject_column.clone(),
            subject: None,
        }
    }

    /// Bind to `subject` and load the current notifications. Same contract
    /// as [`DashboardFeed::activate`](super::DashboardFeed::activate).
    pub fn activate(&mut self, subject: Option<&str>) -> Option<JoinHandle<()>> {
        let Some(subject) = subject.filter(|s| !s.is_empty()) else {
            self.deactivate();
            return None;
        };
        if self.subject.as_deref() == Some(subject) {
            if self.binding.is_pending() && self.binding.retry() {
                return self.core.spawn_load();
            }
            return None;
        }
        if self.subject.is_some() {
            self.deactivate();
        }

        *lock(&self.core.state) = NotificationState::new();
        self.binding.bind(BindingKey::for_subject(
            &self.table,
            &self.subject_column,
            Some(subject),
        ));
        self.subject = Some(subject.to_string());
        tracing::info!(event = Event::FeedActivated.as_str(), feed = "notifications", subject, "notifications activated");

        match Handle::try_current() {
            Ok(runtime) => {
                *lock(&self.core.context) = Some(LoadContext {
                    subject: subject.to_string(),
                    runtime,
                });
                self.core.spawn_load()
            }
            Err(_) => {
                tracing::warn!(subject, "no tokio runtime; notifications run stream-only");
                None
            }
        }
    }

    pub fn deactivate(&mut self) {
        self.binding.unbind();
        *lock(&self.core.context) = None;
        lock(&self.core.state).deactivate();
        if let Some(subject) = self.subject.take() {
            tracing::info!(event = Event::FeedDeactivated.as_str(), feed = "notifications", subject = %subject, "notifications deactivated");
        }
    }

    /// Resnapshot; reconciles any optimistic updates the server rejected
    pub fn refresh(&self) -> Option<JoinHandle<()>> {
        self.core.spawn_load()
    }

    /// Mark one notification read locally, then tell the server.
    ///
    /// The returned handle tracks the server call; it is `None` when nothing
    /// changed locally or no runtime is available.
    pub fn mark_as_read(&self, id: &RecordId) -> Option<JoinHandle<()>> {
        if !lock(&self.core.state).mark_as_read(id) {
            return None;
        }
        let (_, runtime) = self.core.context()?;
        let core = Arc::clone(&self.core);
        let id = id.clone();
        Some(runtime.spawn(async move {
            if let Err(err) = core.source.mark_read(&id).await {
                tracing::warn!(
                    event = Event::ServerSyncFailed.as_str(),
                    id = %id,
                    error = %err,
                    "mark-as-read not acknowledged; local state ahead of server"
                );
            }
        }))
    }

    /// Mark everything read locally, then tell the server
    pub fn mark_all_as_read(&self) -> Option<JoinHandle<()>> {
        if !lock(&self.core.state).mark_all_as_read() {
            return None;
        }
        let (subject, runtime) = self.core.context()?;
        let core = Arc::clone(&self.core);
        Some(runtime.spawn(async move {
            if let Err(err) = core.source.mark_all_read(&subject).await {
                tracing::warn!(
                    event = Event::ServerSyncFailed.as_str(),
                    subject = %subject,
                    error = %err,
                    "mark-all-as-read not acknowledged; local state ahead of server"
                );
            }
        }))
    }

    pub fn state(&self) -> NotificationState {
        lock(&self.core.state).clone()
    }

    pub fn unread_count(&self) -> u64 {
        lock(&self.core.state).unread_count()
    }

    pub fn subject(&self) -> Option<&str> {
        self.subject.as_deref()
    }

    pub fn connected(&self) -> bool {
        self.binding.connected()
    }
}

impl<S: NotificationSource> Drop for NotificationFeed<S> {
    fn drop(&mut self) {
        self.deactivate();
    }
}
