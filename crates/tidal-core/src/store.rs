//! The local record collection.
//!
//! The store is an ordered, deduplicated list of records plus the status of
//! the last fetch. Its state lives in a `watch` channel: every mutation is
//! synchronous, and observers are woken only when something changed.

use serde::Serialize;
use std::collections::HashSet;
use std::sync::Arc;
use tidal_protocol::{Record, RecordId};
use tokio::sync::watch;
use tracing::{debug, trace};

/// Fetch status of the store.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum StoreStatus {
    /// Nothing fetched yet.
    #[default]
    Idle,
    /// A fetch is in flight.
    Loading,
    /// The last fetch succeeded.
    Ready,
    /// The last fetch or subscription attempt failed.
    Errored,
}

/// A point-in-time view of the store.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct StoreState {
    records: Vec<Record>,
    status: StoreStatus,
    last_error: Option<String>,
}

impl StoreState {
    /// Records in display order.
    #[must_use]
    pub fn records(&self) -> &[Record] {
        &self.records
    }

    /// Fetch status.
    #[must_use]
    pub fn status(&self) -> StoreStatus {
        self.status
    }

    /// Error message, present only when the status is `Errored`.
    #[must_use]
    pub fn last_error(&self) -> Option<&str> {
        self.last_error.as_deref()
    }

    /// Whether a fetch is in flight.
    #[must_use]
    pub fn is_loading(&self) -> bool {
        self.status == StoreStatus::Loading
    }

    /// Number of records.
    #[must_use]
    pub fn len(&self) -> usize {
        self.records.len()
    }

    /// Whether the store holds no records.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Look up a record by ID.
    #[must_use]
    pub fn get(&self, id: &RecordId) -> Option<&Record> {
        self.records.iter().find(|r| r.id == *id)
    }

    fn position(&self, id: &RecordId) -> Option<usize> {
        self.records.iter().position(|r| r.id == *id)
    }
}

/// The shared record store.
///
/// Clones refer to the same collection.
#[derive(Clone)]
pub struct RecordStore {
    state: Arc<watch::Sender<StoreState>>,
}

impl RecordStore {
    /// Create an empty store.
    #[must_use]
    pub fn new() -> Self {
        let (state, _) = watch::channel(StoreState::default());
        Self {
            state: Arc::new(state),
        }
    }

    /// Mark a fetch as started.
    pub fn begin_fetch(&self) {
        self.state.send_if_modified(|state| {
            if state.status == StoreStatus::Loading {
                return false;
            }
            state.status = StoreStatus::Loading;
            state.last_error = None;
            true
        });
    }

    /// Abandon an in-flight fetch.
    ///
    /// The status falls back to `Ready` if records are held, `Idle`
    /// otherwise. Returns `false` if no fetch was in flight.
    pub fn cancel_fetch(&self) -> bool {
        self.state.send_if_modified(|state| {
            if state.status != StoreStatus::Loading {
                return false;
            }
            state.status = if state.records.is_empty() {
                StoreStatus::Idle
            } else {
                StoreStatus::Ready
            };
            true
        })
    }

    /// Swap in a freshly fetched collection.
    ///
    /// Later duplicates of an ID within `records` are dropped.
    pub fn replace(&self, records: Vec<Record>) {
        let mut seen = HashSet::with_capacity(records.len());
        let fetched = records.len();
        let records: Vec<Record> = records
            .into_iter()
            .filter(|r| seen.insert(r.id.clone()))
            .collect();

        if records.len() != fetched {
            debug!(
                duplicates = fetched - records.len(),
                "Dropped duplicate records from fetch"
            );
        }

        self.state.send_modify(|state| {
            state.records = records;
            state.status = StoreStatus::Ready;
            state.last_error = None;
        });
    }

    /// Prepend a record.
    ///
    /// Returns `false` and leaves the store untouched if the ID is present.
    pub fn insert_front(&self, record: Record) -> bool {
        self.state.send_if_modified(|state| {
            if state.position(&record.id).is_some() {
                trace!(id = %record.id, "Insert for existing record ignored");
                return false;
            }
            state.records.insert(0, record);
            true
        })
    }

    /// Replace the record with the same ID in place.
    ///
    /// Returns `false` if no such record exists.
    pub fn update(&self, record: Record) -> bool {
        self.state.send_if_modified(|state| match state.position(&record.id) {
            Some(index) => {
                state.records[index] = record;
                true
            }
            None => {
                trace!(id = %record.id, "Update for unknown record ignored");
                false
            }
        })
    }

    /// Remove the record with the given ID.
    ///
    /// Returns `false` if no such record exists.
    pub fn remove(&self, id: &RecordId) -> bool {
        self.state.send_if_modified(|state| match state.position(id) {
            Some(index) => {
                state.records.remove(index);
                true
            }
            None => {
                trace!(id = %id, "Delete for unknown record ignored");
                false
            }
        })
    }

    /// Record an error. Records are left as they are.
    pub fn set_error(&self, message: impl Into<String>) {
        let message = message.into();
        self.state.send_if_modified(|state| {
            if state.status == StoreStatus::Errored
                && state.last_error.as_deref() == Some(message.as_str())
            {
                return false;
            }
            state.status = StoreStatus::Errored;
            state.last_error = Some(message);
            true
        });
    }

    /// Drop every record and return to `Idle`.
    pub fn clear(&self) {
        self.state.send_if_modified(|state| {
            if state.records.is_empty() && state.status == StoreStatus::Idle {
                return false;
            }
            *state = StoreState::default();
            true
        });
    }

    /// Copy of the current state.
    #[must_use]
    pub fn snapshot(&self) -> StoreState {
        self.state.borrow().clone()
    }

    /// Copy of the current records.
    #[must_use]
    pub fn records(&self) -> Vec<Record> {
        self.state.borrow().records.clone()
    }

    /// Current status.
    #[must_use]
    pub fn status(&self) -> StoreStatus {
        self.state.borrow().status
    }

    /// Current error message.
    #[must_use]
    pub fn last_error(&self) -> Option<String> {
        self.state.borrow().last_error.clone()
    }

    /// Number of records.
    #[must_use]
    pub fn len(&self) -> usize {
        self.state.borrow().len()
    }

    /// Whether the store holds no records.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.state.borrow().is_empty()
    }

    /// Register an observer. The receiver sees the current state immediately.
    #[must_use]
    pub fn subscribe(&self) -> watch::Receiver<StoreState> {
        self.state.subscribe()
    }
}

impl Default for RecordStore {
    fn default() -> Self {
        Self::new()
    }
}
