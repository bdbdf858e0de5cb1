//! Sync engine configuration.

use serde::{Deserialize, Serialize};
use tidal_protocol::{Filter, Order, Query, RecordSchema};

/// Default collection synchronized by the engine.
pub const DEFAULT_COLLECTION: &str = "processed_emails";

/// What to synchronize and how to read its rows.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
    /// Remote collection name.
    pub collection: String,
    /// Field names for identity, ownership and ordering.
    pub schema: RecordSchema,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            collection: DEFAULT_COLLECTION.to_string(),
            schema: RecordSchema::default(),
        }
    }
}

impl SyncConfig {
    /// Create a configuration for `collection` with the default schema.
    #[must_use]
    pub fn new(collection: impl Into<String>) -> Self {
        Self {
            collection: collection.into(),
            ..Self::default()
        }
    }

    /// Use the given schema.
    #[must_use]
    pub fn with_schema(mut self, schema: RecordSchema) -> Self {
        self.schema = schema;
        self
    }

    /// Filter scoping rows to one owner.
    #[must_use]
    pub fn filter(&self, owner: &str) -> Filter {
        Filter::eq(&self.schema.owner_field, owner)
    }

    /// Initial fetch for one owner, newest first.
    #[must_use]
    pub fn query(&self, owner: &str) -> Query {
        Query::new(
            &self.collection,
            self.filter(owner),
            Order::desc(&self.schema.order_field),
        )
    }
}
