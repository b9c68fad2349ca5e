//! Row types decoded from snapshots and change events.

use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Map, Value};

/// Row id. Backends send ids as numbers or strings; both decode to the
/// same string form so `42` and `"42"` identify the same row.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(transparent)]
pub struct RecordId(String);

impl RecordId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for RecordId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for RecordId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl From<u64> for RecordId {
    fn from(n: u64) -> Self {
        Self(n.to_string())
    }
}

impl<'de> Deserialize<'de> for RecordId {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum Raw {
            Text(String),
            Number(serde_json::Number),
        }

        Ok(match Raw::deserialize(deserializer)? {
            Raw::Text(s) => RecordId(s),
            Raw::Number(n) => RecordId(n.to_string()),
        })
    }
}

fn default_severity() -> String {
    "info".to_string()
}

/// A detected anomaly
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Anomaly {
    pub id: RecordId,

    /// "high", "medium", "low"
    #[serde(default = "default_severity", alias = "severity")]
    pub severity_level: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metric: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub detected_at: Option<DateTime<Utc>>,

    /// Columns this client does not interpret
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl Anomaly {
    pub fn is_high_severity(&self) -> bool {
        self.severity_level.eq_ignore_ascii_case("high")
    }

    /// Text shown when the anomaly arrives live
    pub fn summary(&self) -> String {
        let subject = self
            .metric
            .as_deref()
            .or(self.description.as_deref())
            .unwrap_or("unnamed metric");
        format!("{} severity anomaly detected: {}", self.severity_level, subject)
    }
}

/// Aggregate counters for the dashboard header.
///
/// Maintained incrementally from the stream, or replaced wholesale by a
/// snapshot; never recomputed from the capped recent list.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DashboardStats {
    #[serde(default)]
    pub total_anomalies: u64,

    #[serde(default)]
    pub high_severity: u64,

    /// Other columns the backend reports alongside the counters
    #[serde(flatten)]
    pub extra: BTreeMap<String, Value>,
}

impl DashboardStats {
    pub fn new(total_anomalies: u64, high_severity: u64) -> Self {
        Self {
            total_anomalies,
            high_severity,
            extra: BTreeMap::new(),
        }
    }

    /// Look up an additional integer counter by name
    pub fn counter(&self, name: &str) -> Option<i64> {
        self.extra.get(name).and_then(Value::as_i64)
    }
}

/// A user-facing notification
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NotificationRecord {
    pub id: RecordId,

    #[serde(default)]
    pub title: String,

    #[serde(default)]
    pub message: String,

    #[serde(default = "default_severity", alias = "type")]
    pub severity: String,

    #[serde(default)]
    pub read: bool,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_at: Option<DateTime<Utc>>,
}

/// An entry in the activity feed
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Activity {
    pub id: RecordId,

    #[serde(default, alias = "type", alias = "action")]
    pub event_type: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_at: Option<DateTime<Utc>>,

    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_record_id_accepts_numbers_and_strings() {
        let a: RecordId = serde_json::from_value(json!(42)).unwrap();
        let b: RecordId = serde_json::from_value(json!("42")).unwrap();
        assert_eq!(a, b);
        assert!(serde_json::from_value::<RecordId>(json!({"id": 1})).is_err());
    }

    #[test]
    fn test_anomaly_defaults_and_extra_columns() {
        let anomaly: Anomaly = serde_json::from_value(json!({
            "id": 1,
            "user_id": "u-1",
            "metric": "cpu_load"
        }))
        .unwrap();
        assert_eq!(anomaly.severity_level, "info");
        assert_eq!(anomaly.extra.get("user_id"), Some(&json!("u-1")));
        assert_eq!(anomaly.summary(), "info severity anomaly detected: cpu_load");
    }

    #[test]
    fn test_high_severity_check() {
        let anomaly: Anomaly =
            serde_json::from_value(json!({"id": 1, "severity_level": "HIGH"})).unwrap();
        assert!(anomaly.is_high_severity());
    }

    #[test]
    fn test_stats_keep_extra_counters() {
        let stats: DashboardStats = serde_json::from_value(json!({
            "total_anomalies": 10,
            "high_severity": 2,
            "medium_severity": 5,
            "computed_at": "2026-10-01T12:00:00Z"
        }))
        .unwrap();
        assert_eq!(stats.total_anomalies, 10);
        assert_eq!(stats.counter("medium_severity"), Some(5));
        assert_eq!(stats.counter("computed_at"), None);
    }

    #[test]
    fn test_notification_type_alias() {
        let record: NotificationRecord = serde_json::from_value(json!({
            "id": "n-1",
            "title": "Backup done",
            "type": "success",
            "created_at": "2026-10-01T12:00:00Z"
        }))
        .unwrap();
        assert_eq!(record.severity, "success");
        assert!(!record.read);
        assert!(record.created_at.is_some());
    }
}
