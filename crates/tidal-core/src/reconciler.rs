//! Applies pushed change events to the record store.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tidal_protocol::{ChangeEvent, ChangeKind, Record, RecordSchema};
use tracing::{trace, warn};

use crate::error::SyncError;
use crate::store::RecordStore;

/// What applying one event did to the store.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Applied {
    /// A new record was prepended.
    Inserted,
    /// An existing record was replaced in place.
    Updated,
    /// A record was removed.
    Removed,
    /// The event was valid but changed nothing.
    Ignored,
    /// The event could not be interpreted and was dropped.
    Malformed,
}

/// Reconciler counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReconcilerStats {
    /// Events that changed the store.
    pub applied: u64,
    /// Events that were valid no-ops (duplicate insert, unknown ID).
    pub ignored: u64,
    /// Events dropped because their payload was unusable.
    pub malformed: u64,
}

#[derive(Default)]
struct Counters {
    applied: AtomicU64,
    ignored: AtomicU64,
    malformed: AtomicU64,
}

/// Folds change events into a [`RecordStore`].
///
/// Clones share the store and counters.
#[derive(Clone)]
pub struct Reconciler {
    store: RecordStore,
    schema: RecordSchema,
    counters: Arc<Counters>,
}

impl Reconciler {
    /// Create a reconciler writing to `store`.
    #[must_use]
    pub fn new(store: RecordStore, schema: RecordSchema) -> Self {
        Self {
            store,
            schema,
            counters: Arc::new(Counters::default()),
        }
    }

    /// Apply one event.
    ///
    /// Never fails: unusable events are logged, counted and dropped.
    pub fn apply(&self, event: ChangeEvent) -> Applied {
        let kind = event.kind;
        let record = match self.interpret(event) {
            Ok(record) => record,
            Err(e) => {
                warn!(kind = %kind, error = %e, "Dropping change event");
                self.counters.malformed.fetch_add(1, Ordering::Relaxed);
                return Applied::Malformed;
            }
        };

        let id = record.id.clone();
        let outcome = match kind {
            ChangeKind::Insert => self
                .store
                .insert_front(record)
                .then_some(Applied::Inserted),
            ChangeKind::Update => self.store.update(record).then_some(Applied::Updated),
            ChangeKind::Delete => self.store.remove(&id).then_some(Applied::Removed),
        };

        match outcome {
            Some(applied) => {
                self.counters.applied.fetch_add(1, Ordering::Relaxed);
                trace!(kind = %kind, id = %id, "Applied change");
                applied
            }
            None => {
                self.counters.ignored.fetch_add(1, Ordering::Relaxed);
                Applied::Ignored
            }
        }
    }

    fn interpret(&self, event: ChangeEvent) -> Result<Record, SyncError> {
        let row = event
            .into_row()
            .ok_or_else(|| SyncError::MalformedEvent("event carries no row".to_string()))?;
        Record::from_row(row, &self.schema).map_err(|e| SyncError::MalformedEvent(e.to_string()))
    }

    /// The store this reconciler writes to.
    #[must_use]
    pub fn store(&self) -> &RecordStore {
        &self.store
    }

    /// Get counters.
    #[must_use]
    pub fn stats(&self) -> ReconcilerStats {
        ReconcilerStats {
            applied: self.counters.applied.load(Ordering::Relaxed),
            ignored: self.counters.ignored.load(Ordering::Relaxed),
            malformed: self.counters.malformed.load(Ordering::Relaxed),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::{json, Value};
    use tidal_protocol::RecordId;

    fn row(id: u64, created_at: u64) -> Value {
        json!({"id": id, "from_email": "u@x.com", "created_at": created_at, "title": format!("t{id}")})
    }

    fn reconciler_with(rows: &[Value]) -> Reconciler {
        let store = RecordStore::new();
        let schema = RecordSchema::default();
        store.replace(
            rows.iter()
                .map(|r| Record::from_row(r.clone(), &schema).unwrap())
                .collect(),
        );
        Reconciler::new(store, schema)
    }

    fn ids(reconciler: &Reconciler) -> Vec<String> {
        reconciler
            .store()
            .records()
            .iter()
            .map(|r| r.id.to_string())
            .collect()
    }

    #[test]
    fn test_insert_prepends_without_resorting() {
        let reconciler = reconciler_with(&[row(1, 30), row(2, 20), row(3, 10)]);

        // Older timestamp, still goes first.
        assert_eq!(reconciler.apply(ChangeEvent::insert(row(4, 5))), Applied::Inserted);
        assert_eq!(ids(&reconciler), vec!["4", "1", "2", "3"]);
    }

    #[test]
    fn test_duplicate_insert_is_ignored() {
        let reconciler = reconciler_with(&[row(1, 30)]);

        assert_eq!(reconciler.apply(ChangeEvent::insert(row(2, 40))), Applied::Inserted);
        assert_eq!(reconciler.apply(ChangeEvent::insert(row(2, 40))), Applied::Ignored);
        assert_eq!(ids(&reconciler), vec!["2", "1"]);
        assert_eq!(
            reconciler.stats(),
            ReconcilerStats {
                applied: 1,
                ignored: 1,
                malformed: 0
            }
        );
    }

    #[test]
    fn test_update_and_delete_of_unknown_ids_are_ignored() {
        let reconciler = reconciler_with(&[row(1, 30), row(2, 20)]);
        let before = reconciler.store().snapshot();

        assert_eq!(reconciler.apply(ChangeEvent::update(row(9, 1))), Applied::Ignored);
        assert_eq!(reconciler.apply(ChangeEvent::delete(row(9, 1))), Applied::Ignored);
        assert_eq!(reconciler.store().snapshot(), before);
    }

    #[test]
    fn test_update_replaces_in_place() {
        let reconciler = reconciler_with(&[row(1, 30), row(2, 20), row(3, 10)]);

        let mut changed = row(2, 20);
        changed["title"] = json!("renamed");
        assert_eq!(reconciler.apply(ChangeEvent::update(changed)), Applied::Updated);

        assert_eq!(ids(&reconciler), vec!["1", "2", "3"]);
        let state = reconciler.store().snapshot();
        assert_eq!(
            state.get(&RecordId::from(2u64)).unwrap().get("title"),
            Some(&json!("renamed"))
        );
    }

    #[test]
    fn test_delete_needs_only_the_id() {
        let reconciler = reconciler_with(&[row(1, 30), row(2, 20)]);

        assert_eq!(
            reconciler.apply(ChangeEvent::delete(json!({"id": 1}))),
            Applied::Removed
        );
        assert_eq!(ids(&reconciler), vec!["2"]);
    }

    #[test]
    fn test_malformed_event_is_isolated() {
        let reconciler = reconciler_with(&[row(1, 30)]);

        assert_eq!(
            reconciler.apply(ChangeEvent::insert(json!({"title": "no id"}))),
            Applied::Malformed
        );
        assert_eq!(
            reconciler.apply(ChangeEvent::insert(json!(["not", "an", "object"]))),
            Applied::Malformed
        );
        let empty = ChangeEvent {
            kind: ChangeKind::Update,
            new: None,
            old: None,
        };
        assert_eq!(reconciler.apply(empty), Applied::Malformed);

        // Valid events keep flowing.
        assert_eq!(reconciler.apply(ChangeEvent::insert(row(2, 40))), Applied::Inserted);
        assert_eq!(ids(&reconciler), vec!["2", "1"]);
        assert_eq!(reconciler.stats().malformed, 3);
    }

    #[test]
    fn test_insert_update_delete_sequence() {
        let reconciler = reconciler_with(&[row(1, 30), row(2, 20), row(3, 10)]);

        reconciler.apply(ChangeEvent::insert(row(4, 40)));
        let mut changed = row(2, 20);
        changed["title"] = json!("b2");
        reconciler.apply(ChangeEvent::update(changed));
        reconciler.apply(ChangeEvent::delete(row(3, 10)));

        assert_eq!(ids(&reconciler), vec!["4", "1", "2"]);
        assert_eq!(reconciler.stats().applied, 3);
    }
}
