//! Activity feed: stream-only, capped, newest first.

use std::sync::{Arc, Mutex};

use super::bounded::BoundedList;
use super::record::Activity;
use crate::config::SyncConfig;
use crate::locks::lock;
use crate::observability::Event;
use crate::realtime::{Binding, BindingKey, ChangeEvent, Operation, RealtimeManager};

/// View state of the activity feed
#[derive(Debug, Clone, PartialEq)]
pub struct ActivityState {
    entries: BoundedList<Activity>,
    active: bool,
}

impl ActivityState {
    pub fn new(capacity: usize) -> Self {
        Self {
            entries: BoundedList::new(capacity),
            active: true,
        }
    }

    pub fn entries(&self) -> &BoundedList<Activity> {
        &self.entries
    }

    /// Only INSERTs change the feed. A replayed INSERT replaces the held
    /// entry instead of adding a second one.
    pub fn apply_event(&mut self, event: &ChangeEvent) {
        if !self.active || event.operation != Operation::Insert {
            return;
        }

        let activity = match event.decode_current::<Activity>() {
            Ok(activity) => activity,
            Err(err) => {
                tracing::warn!(
                    event = Event::MalformedEvent.as_str(),
                    table = %event.table,
                    error = %err,
                    "ignoring activity event"
                );
                return;
            }
        };

        let id = activity.id.clone();
        if !self.entries.replace_where(|a| a.id == id, activity.clone()) {
            self.entries.push(activity);
        }
    }

    /// Empty the feed and accept events again
    pub fn reset(&mut self) {
        self.entries.clear();
        self.active = true;
    }

    /// Stop accepting events; entries stay readable
    pub fn deactivate(&mut self) {
        self.active = false;
    }
}

/// Live activity feed for one subject
pub struct ActivityFeed {
    state: Arc<Mutex<ActivityState>>,
    binding: Binding,
    table: String,
    subject_column: String,
    subject: Option<String>,
}

impl ActivityFeed {
    pub fn new(manager: Arc<RealtimeManager>, config: &SyncConfig) -> Self {
        let state = Arc::new(Mutex::new(ActivityState::new(config.activity_capacity)));
        let sink = Arc::clone(&state);
        let binding = Binding::new(manager, move |e: &ChangeEvent| lock(&sink).apply_event(e));

        Self {
            state,
            binding,
            table: config.tables.activity.clone(),
            subject_column: config.subject_column.clone(),
            subject: None,
        }
    }

    /// Follow `subject`'s activity. Switching subjects starts from an empty
    /// feed; `None` unbinds.
    pub fn activate(&mut self, subject: Option<&str>) {
        let Some(subject) = subject.filter(|s| !s.is_empty()) else {
            self.deactivate();
            return;
        };
        if self.subject.as_deref() == Some(subject) {
            if self.binding.is_pending() {
                self.binding.retry();
            }
            return;
        }
        if self.subject.is_some() {
            self.deactivate();
        }

        lock(&self.state).reset();
        self.binding.bind(BindingKey::for_subject(
            &self.table,
            &self.subject_column,
            Some(subject),
        ));
        self.subject = Some(subject.to_string());
        tracing::info!(event = Event::FeedActivated.as_str(), feed = "activity", subject, "activity activated");
    }

    pub fn deactivate(&mut self) {
        self.binding.unbind();
        lock(&self.state).deactivate();
        if let Some(subject) = self.subject.take() {
            tracing::info!(event = Event::FeedDeactivated.as_str(), feed = "activity", subject = %subject, "activity deactivated");
        }
    }

    /// Current entries, newest first
    pub fn entries(&self) -> Vec<Activity> {
        lock(&self.state).entries().to_vec()
    }

    pub fn subject(&self) -> Option<&str> {
        self.subject.as_deref()
    }

    pub fn connected(&self) -> bool {
        self.binding.connected()
    }
}

impl Drop for ActivityFeed {
    fn drop(&mut self) {
        self.deactivate();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn insert(id: u64) -> ChangeEvent {
        ChangeEvent::insert("activity_log", json!({"id": id, "action": "login"}))
    }

    #[test]
    fn test_capacity_respected() {
        let mut state = ActivityState::new(50);
        for id in 0..60 {
            state.apply_event(&insert(id));
        }
        assert_eq!(state.entries().len(), 50);
        assert_eq!(state.entries().first().unwrap().id.as_str(), "59");
    }

    #[test]
    fn test_non_insert_ignored() {
        let mut state = ActivityState::new(5);
        state.apply_event(&insert(1));
        state.apply_event(&ChangeEvent::update(
            "activity_log",
            None,
            json!({"id": 1, "action": "logout"}),
        ));
        state.apply_event(&ChangeEvent::delete("activity_log", json!({"id": 1})));

        assert_eq!(state.entries().len(), 1);
        assert_eq!(state.entries().first().unwrap().event_type, "login");
    }

    #[test]
    fn test_replayed_insert_not_duplicated() {
        let mut state = ActivityState::new(5);
        state.apply_event(&insert(1));
        state.apply_event(&insert(2));
        state.apply_event(&insert(1));
        assert_eq!(state.entries().len(), 2);
    }

    #[test]
    fn test_deactivated_state_ignores_inserts() {
        let mut state = ActivityState::new(5);
        state.apply_event(&insert(1));
        state.deactivate();
        state.apply_event(&insert(2));
        assert_eq!(state.entries().len(), 1);

        state.reset();
        state.apply_event(&insert(3));
        assert_eq!(state.entries().first().unwrap().id.as_str(), "3");
        assert_eq!(state.entries().len(), 1);
    }

    #[test]
    fn test_malformed_insert_ignored() {
        let mut state = ActivityState::new(5);
        state.apply_event(&ChangeEvent::insert("activity_log", json!({"action": "login"})));
        assert!(state.entries().is_empty());
    }
}
