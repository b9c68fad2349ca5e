//! # Row Predicates
//!
//! Filters that decide which rows' events reach a subscription.

use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::event::ChangeEvent;

/// Filter operator for row predicates
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FilterOp {
    Eq,
    Neq,
    Gt,
    Gte,
    Lt,
    Lte,
    In,
}

impl FilterOp {
    pub fn as_str(&self) -> &'static str {
        match self {
            FilterOp::Eq => "eq",
            FilterOp::Neq => "neq",
            FilterOp::Gt => "gt",
            FilterOp::Gte => "gte",
            FilterOp::Lt => "lt",
            FilterOp::Lte => "lte",
            FilterOp::In => "in",
        }
    }
}

/// A single column condition
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Filter {
    /// Column to filter on
    pub column: String,
    /// Operator
    pub op: FilterOp,
    /// Value to compare
    pub value: Value,
}

impl Filter {
    /// Check a row against this condition. A missing column never matches.
    pub fn matches_row(&self, row: &Value) -> bool {
        let Some(field) = row.get(&self.column) else {
            return false;
        };

        match self.op {
            FilterOp::Eq => loosely_equal(field, &self.value),
            FilterOp::Neq => !loosely_equal(field, &self.value),
            FilterOp::Gt => compare(field, &self.value, |a, b| a > b),
            FilterOp::Gte => compare(field, &self.value, |a, b| a >= b),
            FilterOp::Lt => compare(field, &self.value, |a, b| a < b),
            FilterOp::Lte => compare(field, &self.value, |a, b| a <= b),
            FilterOp::In => self
                .value
                .as_array()
                .map(|candidates| candidates.iter().any(|c| loosely_equal(field, c)))
                .unwrap_or(false),
        }
    }
}

/// Ids travel as strings in filter expressions but as numbers in rows,
/// so `"42"` and `42` compare equal.
fn loosely_equal(field: &Value, expected: &Value) -> bool {
    if field == expected {
        return true;
    }
    match (field, expected) {
        (Value::Number(n), Value::String(s)) | (Value::String(s), Value::Number(n)) => {
            n.to_string() == *s
        }
        _ => false,
    }
}

fn compare(field: &Value, expected: &Value, cmp: impl Fn(f64, f64) -> bool) -> bool {
    match (field.as_f64(), expected.as_f64()) {
        (Some(a), Some(b)) => cmp(a, b),
        _ => false,
    }
}

/// A conjunction of column conditions.
///
/// Equality is structural, so two independently built predicates with the
/// same conditions compare equal.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Predicate {
    filters: Vec<Filter>,
}

impl Predicate {
    /// A predicate that matches every row
    pub fn all() -> Self {
        Self::default()
    }

    /// Equality on a single column, the common foreign-key case
    pub fn eq(column: impl Into<String>, value: impl Into<Value>) -> Self {
        Self::all().and(column, FilterOp::Eq, value)
    }

    /// Add a condition
    pub fn and(mut self, column: impl Into<String>, op: FilterOp, value: impl Into<Value>) -> Self {
        self.filters.push(Filter {
            column: column.into(),
            op,
            value: value.into(),
        });
        self
    }

    pub fn filters(&self) -> &[Filter] {
        &self.filters
    }

    pub fn is_empty(&self) -> bool {
        self.filters.is_empty()
    }

    /// Check a row image against every condition
    pub fn matches_row(&self, row: &Value) -> bool {
        self.filters.iter().all(|f| f.matches_row(row))
    }

    /// Check an event's row. Events without any row image only match the
    /// empty predicate.
    pub fn matches(&self, event: &ChangeEvent) -> bool {
        if self.filters.is_empty() {
            return true;
        }
        match event.row() {
            Some(row) => self.matches_row(row),
            None => false,
        }
    }
}

/// Renders the `column=op.value` form transports forward for server-side
/// filtering; multiple conditions are joined with `&`.
impl fmt::Display for Predicate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, filter) in self.filters.iter().enumerate() {
            if i > 0 {
                f.write_str("&")?;
            }
            write!(f, "{}={}.", filter.column, filter.op.as_str())?;
            match &filter.value {
                Value::String(s) => f.write_str(s)?,
                Value::Array(items) => {
                    f.write_str("(")?;
                    for (j, item) in items.iter().enumerate() {
                        if j > 0 {
                            f.write_str(",")?;
                        }
                        match item {
                            Value::String(s) => f.write_str(s)?,
                            other => write!(f, "{other}")?,
                        }
                    }
                    f.write_str(")")?;
                }
                other => write!(f, "{other}")?,
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_filter_eq() {
        let predicate = Predicate::eq("user_id", "u-1");

        assert!(predicate.matches_row(&json!({"user_id": "u-1"})));
        assert!(!predicate.matches_row(&json!({"user_id": "u-2"})));
        assert!(!predicate.matches_row(&json!({"other": "u-1"})));
    }

    #[test]
    fn test_eq_number_against_string() {
        let predicate = Predicate::eq("user_id", "42");
        assert!(predicate.matches_row(&json!({"user_id": 42})));
        assert!(!predicate.matches_row(&json!({"user_id": 43})));
    }

    #[test]
    fn test_filter_in() {
        let predicate = Predicate::all().and("severity_level", FilterOp::In, json!(["high", "medium"]));

        assert!(predicate.matches_row(&json!({"severity_level": "high"})));
        assert!(!predicate.matches_row(&json!({"severity_level": "low"})));
    }

    #[test]
    fn test_numeric_comparisons() {
        let predicate = Predicate::all()
            .and("score", FilterOp::Gte, 10)
            .and("score", FilterOp::Lt, 20);

        assert!(predicate.matches_row(&json!({"score": 10})));
        assert!(predicate.matches_row(&json!({"score": 19.5})));
        assert!(!predicate.matches_row(&json!({"score": 20})));
        assert!(!predicate.matches_row(&json!({"score": "15"})));
    }

    #[test]
    fn test_delete_event_matches_previous_row() {
        let predicate = Predicate::eq("user_id", "u-1");
        let event = ChangeEvent::delete("anomalies", json!({"id": 1, "user_id": "u-1"}));
        assert!(predicate.matches(&event));
    }

    #[test]
    fn test_empty_predicate_matches_everything() {
        let event = ChangeEvent {
            table: "activity_log".into(),
            operation: crate::realtime::Operation::Delete,
            previous: None,
            current: None,
            commit_timestamp: None,
        };
        assert!(Predicate::all().matches(&event));
        assert!(!Predicate::eq("user_id", "u-1").matches(&event));
    }

    #[test]
    fn test_value_equality() {
        assert_eq!(Predicate::eq("user_id", "u-1"), Predicate::eq("user_id", "u-1"));
        assert_ne!(Predicate::eq("user_id", "u-1"), Predicate::eq("user_id", "u-2"));
    }

    #[test]
    fn test_display_filter_string() {
        assert_eq!(Predicate::eq("user_id", "u-1").to_string(), "user_id=eq.u-1");
        let predicate = Predicate::eq("user_id", 7).and("level", FilterOp::In, json!(["a", "b"]));
        assert_eq!(predicate.to_string(), "user_id=eq.7&level=in.(a,b)");
    }
}
