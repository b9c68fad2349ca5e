//! Snapshot sources.
//!
//! The request/response client is an external collaborator. Feeds only see
//! these traits; any call may fail, and every failure is recovered locally
//! with a per-slice default.

use std::future::Future;

use thiserror::Error;

use super::record::{Anomaly, DashboardStats, NotificationRecord, RecordId};

/// Snapshot fetch errors
#[derive(Debug, Clone, Error)]
pub enum SnapshotError {
    /// The backend could not be reached
    #[error("Snapshot source unavailable: {0}")]
    Unavailable(String),

    /// The backend answered with an error status
    #[error("Snapshot request rejected ({status}): {message}")]
    Rejected { status: u16, message: String },

    /// The response body did not match the expected shape
    #[error("Snapshot response could not be decoded: {0}")]
    Decode(String),
}

/// Result type for snapshot fetches
pub type SnapshotResult<T> = Result<T, SnapshotError>;

impl From<serde_json::Error> for SnapshotError {
    fn from(err: serde_json::Error) -> Self {
        SnapshotError::Decode(err.to_string())
    }
}

/// Snapshot data behind the dashboard
pub trait DashboardSource: Send + Sync + 'static {
    fn fetch_stats(&self, subject: &str) -> impl Future<Output = SnapshotResult<DashboardStats>> + Send;

    /// Most recent anomalies, newest first
    fn fetch_recent_anomalies(
        &self,
        subject: &str,
    ) -> impl Future<Output = SnapshotResult<Vec<Anomaly>>> + Send;
}

/// Snapshot data and write-back for notifications
pub trait NotificationSource: Send + Sync + 'static {
    /// Notifications, newest first
    fn fetch_notifications(
        &self,
        subject: &str,
    ) -> impl Future<Output = SnapshotResult<Vec<NotificationRecord>>> + Send;

    fn mark_read(&self, id: &RecordId) -> impl Future<Output = SnapshotResult<()>> + Send;

    fn mark_all_read(&self, subject: &str) -> impl Future<Output = SnapshotResult<()>> + Send;
}
