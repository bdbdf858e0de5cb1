//! Record types shared by every Tidal component.
//!
//! A record is a server-assigned row. Only its identifier and owner
//! attribute are interpreted; every other field is carried opaquely.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;
use thiserror::Error;

/// Errors raised while interpreting a raw row as a [`Record`].
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RecordError {
    /// The row is not a JSON object.
    #[error("Row is not an object")]
    NotAnObject,

    /// The row has no usable identifier.
    #[error("Row is missing identifier field '{0}'")]
    MissingId(String),
}

/// Stable record identifier.
///
/// Wire identifiers may be numbers or strings; both normalize to their
/// textual form so that `1` and `"1"` compare equal.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RecordId(String);

impl RecordId {
    /// Create a record ID.
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Extract an ID from a JSON value.
    ///
    /// Returns `None` for nulls, empty strings, and non-scalar values.
    #[must_use]
    pub fn from_value(value: &Value) -> Option<Self> {
        match value {
            Value::Number(n) => Some(Self(n.to_string())),
            Value::String(s) if !s.is_empty() => Some(Self(s.clone())),
            _ => None,
        }
    }

    /// Get the ID as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for RecordId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for RecordId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl From<String> for RecordId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<u64> for RecordId {
    fn from(n: u64) -> Self {
        Self(n.to_string())
    }
}

/// Field names used to interpret rows of a collection.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RecordSchema {
    /// Identifier field.
    pub id_field: String,
    /// Owner attribute used as the query and subscription filter.
    pub owner_field: String,
    /// Creation timestamp field; results are ordered by it, newest first.
    pub order_field: String,
}

impl Default for RecordSchema {
    fn default() -> Self {
        Self {
            id_field: "id".to_string(),
            owner_field: "from_email".to_string(),
            order_field: "created_at".to_string(),
        }
    }
}

/// A record held in the local collection.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Record {
    /// Record identifier.
    pub id: RecordId,
    /// Value of the owner attribute, if the row carried one.
    pub owner_key: Option<String>,
    /// The full row as delivered by the server.
    pub fields: Map<String, Value>,
}

impl Record {
    /// Interpret a raw row using the given schema.
    ///
    /// # Errors
    ///
    /// Returns an error if the row is not an object or has no identifier.
    pub fn from_row(row: Value, schema: &RecordSchema) -> Result<Self, RecordError> {
        let Value::Object(fields) = row else {
            return Err(RecordError::NotAnObject);
        };

        let id = fields
            .get(&schema.id_field)
            .and_then(RecordId::from_value)
            .ok_or_else(|| RecordError::MissingId(schema.id_field.clone()))?;

        let owner_key = fields
            .get(&schema.owner_field)
            .and_then(Value::as_str)
            .map(str::to_string);

        Ok(Self {
            id,
            owner_key,
            fields,
        })
    }

    /// Get a field from the row.
    #[must_use]
    pub fn get(&self, field: &str) -> Option<&Value> {
        self.fields.get(field)
    }

    /// Convert back into a raw row.
    #[must_use]
    pub fn into_row(self) -> Value {
        Value::Object(self.fields)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_record_id_normalization() {
        assert_eq!(RecordId::from_value(&json!(1)), Some(RecordId::from("1")));
        assert_eq!(RecordId::from_value(&json!("abc")), Some(RecordId::from("abc")));
        assert_eq!(RecordId::from_value(&json!("")), None);
        assert_eq!(RecordId::from_value(&json!(null)), None);
        assert_eq!(RecordId::from_value(&json!({"id": 1})), None);
    }

    #[test]
    fn test_record_from_row() {
        let schema = RecordSchema::default();
        let record = Record::from_row(
            json!({"id": 7, "from_email": "u@x.com", "title": "Hello"}),
            &schema,
        )
        .unwrap();

        assert_eq!(record.id, RecordId::from(7));
        assert_eq!(record.owner_key.as_deref(), Some("u@x.com"));
        assert_eq!(record.get("title"), Some(&json!("Hello")));
    }

    #[test]
    fn test_record_missing_id() {
        let schema = RecordSchema::default();
        assert_eq!(
            Record::from_row(json!({"title": "no id"}), &schema),
            Err(RecordError::MissingId("id".to_string()))
        );
        assert_eq!(
            Record::from_row(json!([1, 2, 3]), &schema),
            Err(RecordError::NotAnObject)
        );
    }

    #[test]
    fn test_custom_schema() {
        let schema = RecordSchema {
            id_field: "uuid".to_string(),
            owner_field: "owner".to_string(),
            order_field: "inserted_at".to_string(),
        };
        let record = Record::from_row(json!({"uuid": "r-1", "owner": "a@b.c"}), &schema).unwrap();
        assert_eq!(record.id.as_str(), "r-1");
        assert_eq!(record.owner_key.as_deref(), Some("a@b.c"));
    }
}
