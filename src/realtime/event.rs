//! # Change Events
//!
//! Row-level change notifications delivered by the transport.

use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::errors::{RealtimeError, RealtimeResult};

/// Row operation carried by a change event
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Operation {
    /// New row inserted
    Insert,
    /// Existing row updated
    Update,
    /// Row deleted
    Delete,
}

impl Operation {
    pub fn as_str(&self) -> &'static str {
        match self {
            Operation::Insert => "INSERT",
            Operation::Update => "UPDATE",
            Operation::Delete => "DELETE",
        }
    }
}

impl std::fmt::Display for Operation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for Operation {
    type Err = RealtimeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "INSERT" => Ok(Operation::Insert),
            "UPDATE" => Ok(Operation::Update),
            "DELETE" => Ok(Operation::Delete),
            other => Err(RealtimeError::Internal(format!("unknown operation: {other}"))),
        }
    }
}

/// A single row change on a table.
///
/// Events are immutable and never outlive the reducer that consumes them.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChangeEvent {
    /// Table the row belongs to
    pub table: String,

    /// What happened to the row
    pub operation: Operation,

    /// Row image before the change (UPDATE/DELETE)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub previous: Option<Value>,

    /// Row image after the change (INSERT/UPDATE)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub current: Option<Value>,

    /// Commit time reported by the backend, if any
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub commit_timestamp: Option<DateTime<Utc>>,
}

impl ChangeEvent {
    /// Create an INSERT event
    pub fn insert(table: impl Into<String>, row: Value) -> Self {
        Self {
            table: table.into(),
            operation: Operation::Insert,
            previous: None,
            current: Some(row),
            commit_timestamp: None,
        }
    }

    /// Create an UPDATE event
    pub fn update(table: impl Into<String>, previous: Option<Value>, current: Value) -> Self {
        Self {
            table: table.into(),
            operation: Operation::Update,
            previous,
            current: Some(current),
            commit_timestamp: None,
        }
    }

    /// Create a DELETE event
    pub fn delete(table: impl Into<String>, previous: Value) -> Self {
        Self {
            table: table.into(),
            operation: Operation::Delete,
            previous: Some(previous),
            current: None,
            commit_timestamp: None,
        }
    }

    pub fn with_commit_timestamp(mut self, at: DateTime<Utc>) -> Self {
        self.commit_timestamp = Some(at);
        self
    }

    /// The row image predicates are evaluated against: `current`, or
    /// `previous` when the row no longer exists.
    pub fn row(&self) -> Option<&Value> {
        self.current.as_ref().or(self.previous.as_ref())
    }

    /// The `id` column of the row, rendered as a string
    pub fn record_id(&self) -> Option<String> {
        match self.row()?.get("id")? {
            Value::String(s) => Some(s.clone()),
            Value::Number(n) => Some(n.to_string()),
            _ => None,
        }
    }

    /// Decode the post-change row into a typed record
    pub fn decode_current<T: DeserializeOwned>(&self) -> RealtimeResult<T> {
        self.decode(self.current.as_ref(), "current")
    }

    /// Decode the pre-change row into a typed record
    pub fn decode_previous<T: DeserializeOwned>(&self) -> RealtimeResult<T> {
        self.decode(self.previous.as_ref(), "previous")
    }

    fn decode<T: DeserializeOwned>(&self, image: Option<&Value>, which: &str) -> RealtimeResult<T> {
        let value = image.ok_or_else(|| RealtimeError::MalformedEvent {
            table: self.table.clone(),
            reason: format!("missing {which} row"),
        })?;
        T::deserialize(value).map_err(|e| RealtimeError::MalformedEvent {
            table: self.table.clone(),
            reason: e.to_string(),
        })
    }

    /// Topic string for this event, matching the transport's channel naming
    pub fn topic(&self) -> String {
        format!("realtime:public:{}", self.table)
    }
}
