//! Query predicates and ordering.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::cmp::Ordering;
use std::fmt;

/// An exact-match equality predicate on a single field.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Filter {
    /// Field to compare.
    pub field: String,
    /// Expected value.
    pub value: String,
}

impl Filter {
    /// Create an equality filter.
    #[must_use]
    pub fn eq(field: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            value: value.into(),
        }
    }

    /// Check whether a row satisfies this filter.
    #[must_use]
    pub fn matches(&self, row: &Value) -> bool {
        match row.get(&self.field) {
            Some(Value::String(s)) => *s == self.value,
            Some(Value::Number(n)) => n.to_string() == self.value,
            Some(Value::Bool(b)) => b.to_string() == self.value,
            _ => false,
        }
    }
}

impl fmt::Display for Filter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}=eq.{}", self.field, self.value)
    }
}

/// Result ordering on a single field.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Order {
    /// Field to order by.
    pub field: String,
    /// Newest (largest) first when `true`.
    pub descending: bool,
}

impl Order {
    /// Descending order on a field.
    #[must_use]
    pub fn desc(field: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            descending: true,
        }
    }

    /// Ascending order on a field.
    #[must_use]
    pub fn asc(field: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            descending: false,
        }
    }

    /// Compare two rows under this ordering.
    ///
    /// Rows missing the field sort last regardless of direction.
    #[must_use]
    pub fn compare(&self, a: &Value, b: &Value) -> Ordering {
        match (a.get(&self.field), b.get(&self.field)) {
            (Some(x), Some(y)) => {
                let ord = compare_values(x, y);
                if self.descending {
                    ord.reverse()
                } else {
                    ord
                }
            }
            (Some(_), None) => Ordering::Less,
            (None, Some(_)) => Ordering::Greater,
            (None, None) => Ordering::Equal,
        }
    }
}

/// Total order over scalar JSON values.
///
/// Numbers compare numerically and strings lexicographically, which orders
/// RFC 3339 timestamps chronologically. Mixed types order by type rank.
#[must_use]
pub fn compare_values(a: &Value, b: &Value) -> Ordering {
    match (a, b) {
        (Value::Number(x), Value::Number(y)) => {
            let x = x.as_f64().unwrap_or(f64::NAN);
            let y = y.as_f64().unwrap_or(f64::NAN);
            x.partial_cmp(&y).unwrap_or(Ordering::Equal)
        }
        (Value::String(x), Value::String(y)) => x.cmp(y),
        (Value::Bool(x), Value::Bool(y)) => x.cmp(y),
        _ => type_rank(a).cmp(&type_rank(b)),
    }
}

fn type_rank(value: &Value) -> u8 {
    match value {
        Value::Null => 0,
        Value::Bool(_) => 1,
        Value::Number(_) => 2,
        Value::String(_) => 3,
        Value::Array(_) => 4,
        Value::Object(_) => 5,
    }
}

/// A point-in-time query against a collection.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Query {
    /// Collection (table) name.
    pub collection: String,
    /// Row predicate.
    pub filter: Filter,
    /// Result ordering.
    pub order: Order,
}

impl Query {
    /// Create a query.
    #[must_use]
    pub fn new(collection: impl Into<String>, filter: Filter, order: Order) -> Self {
        Self {
            collection: collection.into(),
            filter,
            order,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_filter_matches() {
        let filter = Filter::eq("from_email", "u@x.com");
        assert!(filter.matches(&json!({"from_email": "u@x.com"})));
        assert!(!filter.matches(&json!({"from_email": "other@x.com"})));
        assert!(!filter.matches(&json!({"title": "missing"})));

        let numeric = Filter::eq("owner_id", "42");
        assert!(numeric.matches(&json!({"owner_id": 42})));
    }

    #[test]
    fn test_filter_display() {
        let filter = Filter::eq("from_email", "u@x.com");
        assert_eq!(filter.to_string(), "from_email=eq.u@x.com");
    }

    #[test]
    fn test_order_descending_timestamps() {
        let order = Order::desc("created_at");
        let mut rows = vec![
            json!({"id": 1, "created_at": "2024-01-01T00:00:00Z"}),
            json!({"id": 3, "created_at": "2024-03-01T00:00:00Z"}),
            json!({"id": 2, "created_at": "2024-02-01T00:00:00Z"}),
            json!({"id": 4}),
        ];
        rows.sort_by(|a, b| order.compare(a, b));

        let ids: Vec<_> = rows.iter().map(|r| r["id"].as_u64().unwrap()).collect();
        assert_eq!(ids, vec![3, 2, 1, 4]);
    }

    #[test]
    fn test_order_numeric() {
        let order = Order::asc("t");
        assert_eq!(
            order.compare(&json!({"t": 2}), &json!({"t": 10})),
            Ordering::Less
        );
    }
}
