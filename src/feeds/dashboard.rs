//! # Dashboard Aggregate Feed
//!
//! Header counters plus a capped list of recent anomalies, seeded by two
//! independent snapshot fetches and kept live from the anomalies stream.
//!
//! ## Merge rules
//! - INSERT prepends to `recent`, bumps `total_anomalies` (and
//!   `high_severity` for high-severity rows) and yields a toast.
//! - UPDATE replaces the row in `recent` if it is still there. Counters are
//!   not touched, and a row that already fell off the list is not
//!   corrected: counters drift if its severity changed.
//! - Any INSERT/UPDATE on the baseline table triggers a full resnapshot,
//!   since the aggregate cannot be rebuilt client-side.
//! - `total_anomalies` only grows by one per INSERT or is replaced
//!   wholesale by a snapshot.

use std::collections::HashSet;
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Utc};
use tokio::runtime::Handle;
use tokio::task::JoinHandle;

use super::bounded::BoundedList;
use super::record::{Anomaly, DashboardStats, RecordId};
use super::snapshot::{DashboardSource, SnapshotResult};
use crate::config::{SyncConfig, TablesConfig};
use crate::locks::lock;
use crate::observability::Event;
use crate::presentation::{dispatch, Presenter, Toast};
use crate::realtime::{Binding, BindingKey, ChangeEvent, Operation, RealtimeManager};

/// View state of the dashboard
#[derive(Debug, Clone, PartialEq)]
pub struct DashboardState {
    stats: Option<DashboardStats>,
    recent: BoundedList<Anomaly>,
    loading: bool,
    last_update: Option<DateTime<Utc>>,
    active: bool,
    load_ticket: u64,
    live_since_load: Vec<RecordId>,
}

impl DashboardState {
    /// Fresh, active state with nothing loaded
    pub fn new(recent_capacity: usize) -> Self {
        Self {
            stats: None,
            recent: BoundedList::new(recent_capacity),
            loading: false,
            last_update: None,
            active: true,
            load_ticket: 0,
            live_since_load: Vec::new(),
        }
    }

    /// State seeded as if a snapshot had already been applied
    pub fn with_snapshot(recent_capacity: usize, stats: DashboardStats, recent: Vec<Anomaly>) -> Self {
        let mut state = Self::new(recent_capacity);
        state.stats = Some(stats);
        state.recent.reset(recent);
        state.last_update = Some(Utc::now());
        state
    }

    pub fn stats(&self) -> Option<&DashboardStats> {
        self.stats.as_ref()
    }

    pub fn recent(&self) -> &BoundedList<Anomaly> {
        &self.recent
    }

    pub fn loading(&self) -> bool {
        self.loading
    }

    pub fn last_update(&self) -> Option<DateTime<Utc>> {
        self.last_update
    }

    pub fn is_active(&self) -> bool {
        self.active
    }

    /// Start a snapshot load; the returned ticket must accompany the result
    pub fn begin_load(&mut self) -> u64 {
        self.load_ticket += 1;
        self.loading = true;
        self.live_since_load.clear();
        self.load_ticket
    }

    /// Stop accepting snapshot results
    pub fn deactivate(&mut self) {
        self.active = false;
        self.loading = false;
        self.load_ticket += 1;
    }

    /// Apply a settled snapshot.
    ///
    /// Each slice is handled on its own: a failed slice keeps its current
    /// value (the empty default on first load) while the other is still
    /// applied. Results for a superseded ticket, or arriving after
    /// deactivation, are ignored. Returns whether the result was applied.
    pub fn apply_snapshot(
        &mut self,
        ticket: u64,
        stats: SnapshotResult<DashboardStats>,
        recent: SnapshotResult<Vec<Anomaly>>,
    ) -> bool {
        if !self.active || ticket != self.load_ticket {
            return false;
        }

        if let Ok(stats) = stats {
            self.stats = Some(stats);
        }

        if let Ok(snapshot) = recent {
            let snapshot_ids: HashSet<&RecordId> = snapshot.iter().map(|a| &a.id).collect();
            // Rows that streamed in while the fetch was in flight and are
            // newer than what the snapshot saw.
            let live: Vec<Anomaly> = self
                .live_since_load
                .iter()
                .rev()
                .filter(|id| !snapshot_ids.contains(id))
                .filter_map(|id| self.recent.find(|a| &a.id == id).cloned())
                .collect();
            self.recent.reset(live.into_iter().chain(snapshot));
        }

        self.live_since_load.clear();
        self.loading = false;
        self.last_update = Some(Utc::now());
        true
    }

    /// Merge one anomalies-stream event. Returns the toast to show, if any.
    /// A deactivated state ignores late deliveries.
    pub fn apply_event(&mut self, event: &ChangeEvent) -> Option<Toast> {
        if !self.active {
            return None;
        }
        match event.operation {
            Operation::Insert => {
                let anomaly = decode(event)?;
                self.insert(anomaly)
            }
            Operation::Update => {
                let anomaly = decode(event)?;
                let id = anomaly.id.clone();
                if !self.recent.replace_where(|a| a.id == id, anomaly) {
                    tracing::debug!(id = %id, "updated anomaly no longer in recent list");
                }
                None
            }
            Operation::Delete => None,
        }
    }

    fn insert(&mut self, anomaly: Anomaly) -> Option<Toast> {
        let id = anomaly.id.clone();
        if self.recent.contains_where(|a| a.id == id) {
            // Replayed INSERT for a row already shown.
            self.recent.replace_where(|a| a.id == id, anomaly);
            return None;
        }

        let toast = Toast::for_severity(&anomaly.severity_level, anomaly.summary());
        if let Some(stats) = self.stats.as_mut() {
            stats.total_anomalies += 1;
            if anomaly.is_high_severity() {
                stats.high_severity += 1;
            }
        }
        self.recent.push(anomaly);
        if self.loading {
            self.live_since_load.push(id);
        }
        self.last_update = Some(Utc::now());
        Some(toast)
    }
}

fn decode(event: &ChangeEvent) -> Option<Anomaly> {
    match event.decode_current::<Anomaly>() {
        Ok(anomaly) => Some(anomaly),
        Err(err) => {
            tracing::warn!(
                event = Event::MalformedEvent.as_str(),
                table = %event.table,
                operation = %event.operation,
                error = %err,
                "ignoring anomaly event"
            );
            None
        }
    }
}

struct LoadContext {
    subject: String,
    runtime: Handle,
}

struct DashboardCore<S> {
    source: Arc<S>,
    presenter: Arc<dyn Presenter>,
    state: Mutex<DashboardState>,
    context: Mutex<Option<LoadContext>>,
}

impl<S: DashboardSource> DashboardCore<S> {
    fn on_anomaly(&self, event: &ChangeEvent) {
        let toast = lock(&self.state).apply_event(event);
        if let Some(toast) = toast {
            dispatch(self.presenter.as_ref(), &toast);
        }
    }

    fn on_baseline(self: &Arc<Self>, event: &ChangeEvent) {
        if !matches!(event.operation, Operation::Insert | Operation::Update) {
            return;
        }
        tracing::debug!(
            event = Event::RefreshRequested.as_str(),
            table = %event.table,
            "baseline changed, resnapshotting dashboard"
        );
        self.spawn_load();
    }

    fn on_reconnect(self: &Arc<Self>) {
        tracing::debug!(
            event = Event::RefreshRequested.as_str(),
            reason = "reconnected",
            "stream back, resnapshotting dashboard"
        );
        self.spawn_load();
    }

    fn spawn_load(self: &Arc<Self>) -> Option<JoinHandle<()>> {
        let (subject, runtime) = {
            let context = lock(&self.context);
            let context = context.as_ref()?;
            (context.subject.clone(), context.runtime.clone())
        };
        let ticket = lock(&self.state).begin_load();
        let core = Arc::clone(self);
        Some(runtime.spawn(async move { core.load(subject, ticket).await }))
    }

    async fn load(&self, subject: String, ticket: u64) {
        tracing::debug!(event = Event::SnapshotBegin.as_str(), subject = %subject, ticket, "loading dashboard");

        let (stats, recent) = tokio::join!(
            self.source.fetch_stats(&subject),
            self.source.fetch_recent_anomalies(&subject)
        );

        if let Err(err) = &stats {
            tracing::warn!(event = Event::SnapshotSliceFailed.as_str(), slice = "stats", error = %err, "stats snapshot failed");
        }
        if let Err(err) = &recent {
            tracing::warn!(event = Event::SnapshotSliceFailed.as_str(), slice = "recent_anomalies", error = %err, "recent anomalies snapshot failed");
        }

        let applied = lock(&self.state).apply_snapshot(ticket, stats, recent);
        if applied {
            tracing::debug!(event = Event::SnapshotApplied.as_str(), subject = %subject, ticket, "dashboard snapshot applied");
        } else {
            tracing::debug!(event = Event::SnapshotDiscarded.as_str(), subject = %subject, ticket, "stale dashboard snapshot dropped");
        }
    }
}

/// Live dashboard bound to one subject at a time
pub struct DashboardFeed<S: DashboardSource> {
    core: Arc<DashboardCore<S>>,
    anomalies: Binding,
    baseline: Binding,
    tables: TablesConfig,
    subject_column: String,
    capacity: usize,
    subject: Option<String>,
}

impl<S: DashboardSource> DashboardFeed<S> {
    pub fn new(
        manager: Arc<RealtimeManager>,
        source: Arc<S>,
        presenter: Arc<dyn Presenter>,
        config: &SyncConfig,
    ) -> Self {
        let capacity = config.recent_anomalies_capacity;
        let mut initial = DashboardState::new(capacity);
        initial.deactivate();

        let core = Arc::new(DashboardCore {
            source,
            presenter,
            state: Mutex::new(initial),
            context: Mutex::new(None),
        });

        let on_anomaly = Arc::clone(&core);
        let anomalies = Binding::new(Arc::clone(&manager), move |e: &ChangeEvent| {
            on_anomaly.on_anomaly(e)
        });
        let on_baseline = Arc::clone(&core);
        let baseline = Binding::new(manager, move |e: &ChangeEvent| on_baseline.on_baseline(e));

        // Events were missed while the stream was down.
        let on_reconnect = Arc::clone(&core);
        anomalies.on_reconnect(move || on_reconnect.on_reconnect());

        Self {
            core,
            anomalies,
            baseline,
            tables: config.tables.clone(),
            subject_column: config.subject_column.clone(),
            capacity,
            subject: None,
        }
    }

    /// Bind to `subject` and start the initial snapshot.
    ///
    /// `None` releases everything, same as [`deactivate`](Self::deactivate).
    /// Re-activating with the current subject only retries streams whose
    /// subscribe failed, and resnapshots if that brings them back. The
    /// returned handle resolves once the snapshot has settled; it is `None`
    /// when no load was started.
    pub fn activate(&mut self, subject: Option<&str>) -> Option<JoinHandle<()>> {
        let Some(subject) = subject.filter(|s| !s.is_empty()) else {
            self.deactivate();
            return None;
        };
        if self.subject.as_deref() == Some(subject) {
            return self.resume();
        }
        if self.subject.is_some() {
            self.deactivate();
        }

        *lock(&self.core.state) = DashboardState::new(self.capacity);
        self.anomalies.bind(BindingKey::for_subject(
            &self.tables.anomalies,
            &self.subject_column,
            Some(subject),
        ));
        self.baseline.bind(BindingKey::for_subject(
            &self.tables.baseline,
            &self.subject_column,
            Some(subject),
        ));
        self.subject = Some(subject.to_string());
        tracing::info!(event = Event::FeedActivated.as_str(), feed = "dashboard", subject, "dashboard activated");

        match Handle::try_current() {
            Ok(runtime) => {
                *lock(&self.core.context) = Some(LoadContext {
                    subject: subject.to_string(),
                    runtime,
                });
                self.core.spawn_load()
            }
            Err(_) => {
                tracing::warn!(subject, "no tokio runtime; dashboard runs stream-only");
                None
            }
        }
    }

    fn resume(&self) -> Option<JoinHandle<()>> {
        if !self.anomalies.is_pending() && !self.baseline.is_pending() {
            return None;
        }
        let anomalies_live = self.anomalies.retry();
        let baseline_live = self.baseline.retry();
        if anomalies_live && baseline_live {
            self.core.spawn_load()
        } else {
            None
        }
    }

    /// Release the streams and drop any in-flight snapshot result
    pub fn deactivate(&mut self) {
        self.anomalies.unbind();
        self.baseline.unbind();
        *lock(&self.core.context) = None;
        lock(&self.core.state).deactivate();
        if let Some(subject) = self.subject.take() {
            tracing::info!(event = Event::FeedDeactivated.as_str(), feed = "dashboard", subject = %subject, "dashboard deactivated");
        }
    }

    /// Re-run both snapshot fetches from scratch
    pub fn refresh(&self) -> Option<JoinHandle<()>> {
        self.core.spawn_load()
    }

    /// Copy of the current view state
    pub fn state(&self) -> DashboardState {
        lock(&self.core.state).clone()
    }

    pub fn subject(&self) -> Option<&str> {
        self.subject.as_deref()
    }

    /// Transport status as seen by the anomalies stream
    pub fn connected(&self) -> bool {
        self.anomalies.connected()
    }
}

impl<S: DashboardSource> Drop for DashboardFeed<S> {
    fn drop(&mut self) {
        self.deactivate();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::feeds::snapshot::SnapshotError;
    use serde_json::json;

    fn anomaly_row(id: u64, severity: &str) -> serde_json::Value {
        json!({"id": id, "severity_level": severity, "metric": format!("metric_{id}")})
    }

    fn anomaly(id: u64, severity: &str) -> Anomaly {
        serde_json::from_value(anomaly_row(id, severity)).unwrap()
    }

    #[test]
    fn test_high_insert_updates_counters_and_list() {
        let mut state = DashboardState::with_snapshot(10, DashboardStats::new(10, 2), vec![]);

        let toast = state.apply_event(&ChangeEvent::insert("anomalies", anomaly_row(1, "high")));

        let stats = state.stats().unwrap();
        assert_eq!(stats.total_anomalies, 11);
        assert_eq!(stats.high_severity, 3);
        assert_eq!(state.recent().len(), 1);
        assert_eq!(state.recent().first().unwrap().id, RecordId::from(1));
        assert_eq!(toast.unwrap().kind, crate::presentation::ToastKind::Error);
    }

    #[test]
    fn test_low_insert_only_bumps_total() {
        let mut state = DashboardState::with_snapshot(10, DashboardStats::new(0, 0), vec![]);
        state.apply_event(&ChangeEvent::insert("anomalies", anomaly_row(1, "low")));
        assert_eq!(state.stats().unwrap(), &DashboardStats::new(1, 0));
    }

    #[test]
    fn test_eleventh_insert_evicts_oldest() {
        let seed: Vec<Anomaly> = (1..=10).rev().map(|i| anomaly(i, "low")).collect();
        let mut state = DashboardState::with_snapshot(10, DashboardStats::new(10, 0), seed);

        state.apply_event(&ChangeEvent::insert("anomalies", anomaly_row(11, "medium")));

        assert_eq!(state.recent().len(), 10);
        assert_eq!(state.recent().first().unwrap().id, RecordId::from(11));
        assert!(!state.recent().contains_where(|a| a.id == RecordId::from(1)));
    }

    #[test]
    fn test_update_replaces_in_place_without_touching_counters() {
        let mut state =
            DashboardState::with_snapshot(10, DashboardStats::new(5, 1), vec![anomaly(3, "low")]);

        let toast = state.apply_event(&ChangeEvent::update(
            "anomalies",
            Some(anomaly_row(3, "low")),
            anomaly_row(3, "high"),
        ));

        assert!(toast.is_none());
        assert_eq!(state.recent().first().unwrap().severity_level, "high");
        assert_eq!(state.stats().unwrap(), &DashboardStats::new(5, 1));
    }

    #[test]
    fn test_update_for_evicted_row_is_ignored() {
        let mut state =
            DashboardState::with_snapshot(10, DashboardStats::new(5, 1), vec![anomaly(3, "low")]);
        state.apply_event(&ChangeEvent::update("anomalies", None, anomaly_row(99, "high")));
        assert_eq!(state.recent().len(), 1);
        assert_eq!(state.stats().unwrap().high_severity, 1);
    }

    #[test]
    fn test_replayed_insert_not_double_counted() {
        let mut state = DashboardState::with_snapshot(10, DashboardStats::new(0, 0), vec![]);
        state.apply_event(&ChangeEvent::insert("anomalies", anomaly_row(1, "high")));
        let toast = state.apply_event(&ChangeEvent::insert("anomalies", anomaly_row(1, "high")));

        assert!(toast.is_none());
        assert_eq!(state.recent().len(), 1);
        assert_eq!(state.stats().unwrap().total_anomalies, 1);
    }

    #[test]
    fn test_malformed_event_is_noop() {
        let mut state = DashboardState::with_snapshot(10, DashboardStats::new(1, 0), vec![]);
        let before = state.clone();
        assert!(state
            .apply_event(&ChangeEvent::insert("anomalies", json!({"severity_level": "high"})))
            .is_none());
        assert_eq!(state, before);
    }

    #[test]
    fn test_events_after_deactivate_ignored() {
        let mut state = DashboardState::with_snapshot(10, DashboardStats::new(5, 1), vec![]);
        state.deactivate();

        let toast = state.apply_event(&ChangeEvent::insert("anomalies", anomaly_row(1, "high")));

        assert!(toast.is_none());
        assert!(state.recent().is_empty());
        assert_eq!(state.stats().unwrap(), &DashboardStats::new(5, 1));
    }

    #[test]
    fn test_partial_snapshot_failure() {
        let mut state = DashboardState::new(10);
        let ticket = state.begin_load();
        assert!(state.loading());

        let applied = state.apply_snapshot(
            ticket,
            Err(SnapshotError::Unavailable("timeout".into())),
            Ok(vec![anomaly(2, "low"), anomaly(1, "high")]),
        );

        assert!(applied);
        assert!(!state.loading());
        assert!(state.stats().is_none());
        assert_eq!(state.recent().len(), 2);
        assert!(state.last_update().is_some());
    }

    #[test]
    fn test_stale_ticket_discarded() {
        let mut state = DashboardState::new(10);
        let first = state.begin_load();
        let second = state.begin_load();

        assert!(!state.apply_snapshot(first, Ok(DashboardStats::new(1, 0)), Ok(vec![])));
        assert!(state.loading());
        assert!(state.apply_snapshot(second, Ok(DashboardStats::new(2, 0)), Ok(vec![])));
        assert_eq!(state.stats().unwrap().total_anomalies, 2);
    }

    #[test]
    fn test_snapshot_after_deactivate_discarded() {
        let mut state = DashboardState::new(10);
        let ticket = state.begin_load();
        state.deactivate();
        assert!(!state.apply_snapshot(ticket, Ok(DashboardStats::new(1, 0)), Ok(vec![])));
        assert!(state.stats().is_none());
    }

    #[test]
    fn test_rows_streamed_during_load_survive_snapshot() {
        let mut state = DashboardState::new(10);
        let ticket = state.begin_load();
        state.apply_event(&ChangeEvent::insert("anomalies", anomaly_row(5, "high")));
        state.apply_event(&ChangeEvent::insert("anomalies", anomaly_row(4, "low")));

        state.apply_snapshot(
            ticket,
            Ok(DashboardStats::new(4, 1)),
            Ok(vec![anomaly(4, "low"), anomaly(3, "low")]),
        );

        let ids: Vec<String> = state.recent().iter().map(|a| a.id.to_string()).collect();
        assert_eq!(ids, vec!["5", "4", "3"]);
        assert_eq!(state.stats().unwrap().total_anomalies, 4);
    }
}
