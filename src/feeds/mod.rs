//! # Feature Feeds
//!
//! Each feed pairs a pure state type, which merges change events and
//! snapshots, with a driver that owns the stream bindings for one subject.
//!
//! - **Dashboard**: counters plus a capped list of recent anomalies
//! - **Notifications**: unbounded list with an unread counter
//! - **Activity**: capped, stream-only log

pub mod activity;
pub mod bounded;
pub mod dashboard;
pub mod notifications;
pub mod record;
pub mod snapshot;

pub use activity::{ActivityFeed, ActivityState};
pub use bounded::BoundedList;
pub use dashboard::{DashboardFeed, DashboardState};
pub use notifications::{NotificationFeed, NotificationState};
pub use record::{Activity, Anomaly, DashboardStats, NotificationRecord, RecordId};
pub use snapshot::{DashboardSource, NotificationSource, SnapshotError, SnapshotResult};
