//! In-process transport and identity backend.
//!
//! `MemoryBackend` holds rows per collection, answers queries, fans row
//! changes out to matching subscriptions, and keeps a small account table
//! for password sign-in. It also records the operations it served and can
//! inject failures or hold queries, which is what the engine tests use.

use async_trait::async_trait;
use dashmap::DashMap;
use serde_json::Value;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use tidal_protocol::{ChangeEvent, Filter, Query, RecordId};
use tokio::sync::{broadcast, mpsc, watch, Notify};
use tracing::{debug, trace, warn};

use crate::traits::{
    AuthError, AuthProvider, IdentityEvent, IdentityEventKind, Principal, Subscription,
    SubscriptionHandle, SubscriptionId, TransportClient, TransportError,
};

/// Default per-subscription event queue capacity.
const DEFAULT_EVENT_BUFFER: usize = 256;

/// Identity event broadcast capacity.
const IDENTITY_EVENT_CAPACITY: usize = 16;

/// An operation served by the backend.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Operation {
    /// A query filtered on the given value.
    Query(String),
    /// A subscription opened with the given filter value.
    Subscribe(SubscriptionId, String),
    /// A subscription closed.
    Close(SubscriptionId),
}

struct MemorySubscription {
    handle: SubscriptionHandle,
    sender: mpsc::Sender<ChangeEvent>,
}

#[derive(Default)]
struct Faults {
    query: Option<String>,
    subscribe: Option<String>,
}

struct Inner {
    collections: DashMap<String, Vec<Value>>,
    subscriptions: DashMap<SubscriptionId, MemorySubscription>,
    accounts: DashMap<String, String>,
    gates: DashMap<String, Arc<Notify>>,
    next_id: AtomicU64,
    principal: watch::Sender<Option<Principal>>,
    identity: broadcast::Sender<IdentityEvent>,
    faults: Mutex<Faults>,
    journal: Mutex<Vec<Operation>>,
    id_field: String,
    event_buffer: usize,
}

/// An in-process backend implementing [`TransportClient`] and [`AuthProvider`].
///
/// Clones share state.
#[derive(Clone)]
pub struct MemoryBackend {
    inner: Arc<Inner>,
}

impl MemoryBackend {
    /// Create a backend whose rows are keyed by `id`.
    #[must_use]
    pub fn new() -> Self {
        Self::with_id_field("id")
    }

    /// Create a backend whose rows are keyed by the given field.
    #[must_use]
    pub fn with_id_field(id_field: impl Into<String>) -> Self {
        let (principal, _) = watch::channel(None);
        let (identity, _) = broadcast::channel(IDENTITY_EVENT_CAPACITY);
        Self {
            inner: Arc::new(Inner {
                collections: DashMap::new(),
                subscriptions: DashMap::new(),
                accounts: DashMap::new(),
                gates: DashMap::new(),
                next_id: AtomicU64::new(1),
                principal,
                identity,
                faults: Mutex::new(Faults::default()),
                journal: Mutex::new(Vec::new()),
                id_field: id_field.into(),
                event_buffer: DEFAULT_EVENT_BUFFER,
            }),
        }
    }

    fn row_id(&self, row: &Value) -> Option<RecordId> {
        row.get(&self.inner.id_field).and_then(RecordId::from_value)
    }

    fn log(&self, op: Operation) {
        if let Ok(mut journal) = self.inner.journal.lock() {
            journal.push(op);
        }
    }

    /// Operations served so far, in order.
    #[must_use]
    pub fn operations(&self) -> Vec<Operation> {
        self.inner
            .journal
            .lock()
            .map(|journal| journal.clone())
            .unwrap_or_default()
    }

    /// Number of currently open subscriptions.
    #[must_use]
    pub fn subscription_count(&self) -> usize {
        self.inner.subscriptions.len()
    }

    /// Make the next query fail with the given message.
    pub fn fail_next_query(&self, message: impl Into<String>) {
        if let Ok(mut faults) = self.inner.faults.lock() {
            faults.query = Some(message.into());
        }
    }

    /// Make the next subscribe fail with the given message.
    pub fn fail_next_subscribe(&self, message: impl Into<String>) {
        if let Ok(mut faults) = self.inner.faults.lock() {
            faults.subscribe = Some(message.into());
        }
    }

    /// Hold queries filtered on `value` until [`release_queries`](Self::release_queries).
    pub fn hold_queries(&self, value: impl Into<String>) {
        self.inner
            .gates
            .insert(value.into(), Arc::new(Notify::new()));
    }

    /// Let queries held for `value` complete.
    pub fn release_queries(&self, value: &str) {
        if let Some((_, gate)) = self.inner.gates.remove(value) {
            gate.notify_waiters();
            gate.notify_one();
        }
    }

    /// Add an account for password sign-in.
    pub fn add_account(&self, email: impl Into<String>, password: impl Into<String>) {
        self.inner.accounts.insert(email.into(), password.into());
    }

    /// Replace the signed-in principal, notifying identity listeners.
    pub fn set_principal(&self, principal: Option<Principal>) {
        let kind = if principal.is_some() {
            IdentityEventKind::SignedIn
        } else {
            IdentityEventKind::SignedOut
        };
        self.inner.principal.send_replace(principal.clone());
        // No listeners is fine.
        let _ = self.inner.identity.send(IdentityEvent::new(kind, principal));
    }

    /// Seed rows without notifying subscribers.
    pub fn seed(&self, collection: &str, rows: impl IntoIterator<Item = Value>) {
        self.inner
            .collections
            .entry(collection.to_string())
            .or_default()
            .extend(rows);
    }

    /// Insert a row and notify matching subscribers.
    pub fn insert(&self, collection: &str, row: Value) {
        self.inner
            .collections
            .entry(collection.to_string())
            .or_default()
            .push(row.clone());
        self.publish(collection, ChangeEvent::insert(row));
    }

    /// Replace the row with the same ID and notify matching subscribers.
    ///
    /// Returns `false` if no such row exists.
    pub fn update(&self, collection: &str, row: Value) -> bool {
        let Some(id) = self.row_id(&row) else {
            return false;
        };

        let replaced = self
            .inner
            .collections
            .get_mut(collection)
            .and_then(|mut rows| {
                let slot = rows
                    .iter_mut()
                    .find(|r| self.row_id(r).as_ref() == Some(&id))?;
                *slot = row.clone();
                Some(())
            })
            .is_some();

        if replaced {
            self.publish(collection, ChangeEvent::update(row));
        }
        replaced
    }

    /// Delete the row with the given ID and notify matching subscribers.
    ///
    /// Returns `false` if no such row exists.
    pub fn delete(&self, collection: &str, id: &RecordId) -> bool {
        let removed = self.inner.collections.get_mut(collection).and_then(|mut rows| {
            let index = rows
                .iter()
                .position(|r| self.row_id(r).as_ref() == Some(id))?;
            Some(rows.remove(index))
        });

        match removed {
            Some(old) => {
                self.publish(collection, ChangeEvent::delete(old));
                true
            }
            None => false,
        }
    }

    /// Deliver an event to every subscription on `collection`, bypassing filters.
    ///
    /// Returns the number of subscriptions that accepted it.
    pub fn push_raw(&self, collection: &str, event: ChangeEvent) -> usize {
        self.inner
            .subscriptions
            .iter()
            .filter(|sub| sub.handle.collection() == collection)
            .filter(|sub| deliver(sub, event.clone()))
            .count()
    }

    fn publish(&self, collection: &str, event: ChangeEvent) -> usize {
        let Some(row) = event.row().cloned() else {
            return 0;
        };

        let count = self
            .inner
            .subscriptions
            .iter()
            .filter(|sub| sub.handle.collection() == collection)
            .filter(|sub| sub.handle.filter().matches(&row))
            .filter(|sub| deliver(sub, event.clone()))
            .count();

        trace!(collection = %collection, kind = %event.kind, recipients = count, "Published change");
        count
    }
}

fn deliver(sub: &MemorySubscription, event: ChangeEvent) -> bool {
    match sub.sender.try_send(event) {
        Ok(()) => true,
        Err(mpsc::error::TrySendError::Full(_)) => {
            warn!(subscription = %sub.handle.id(), "Event queue full, dropping change");
            false
        }
        Err(mpsc::error::TrySendError::Closed(_)) => false,
    }
}

impl Default for MemoryBackend {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl TransportClient for MemoryBackend {
    async fn query(&self, query: Query) -> Result<Vec<Value>, TransportError> {
        self.log(Operation::Query(query.filter.value.clone()));

        let gate = self
            .inner
            .gates
            .get(&query.filter.value)
            .map(|g| Arc::clone(g.value()));
        if let Some(gate) = gate {
            debug!(filter = %query.filter, "Query held");
            gate.notified().await;
        }

        let fault = self
            .inner
            .faults
            .lock()
            .ok()
            .and_then(|mut faults| faults.query.take());
        if let Some(message) = fault {
            return Err(TransportError::Rejected {
                code: tidal_protocol::codes::QUERY_FAILED,
                message,
            });
        }

        let mut rows: Vec<Value> = self
            .inner
            .collections
            .get(&query.collection)
            .map(|rows| {
                rows.iter()
                    .filter(|row| query.filter.matches(row))
                    .cloned()
                    .collect()
            })
            .unwrap_or_default();
        rows.sort_by(|a, b| query.order.compare(a, b));

        debug!(collection = %query.collection, filter = %query.filter, rows = rows.len(), "Query served");
        Ok(rows)
    }

    async fn subscribe(
        &self,
        collection: &str,
        filter: Filter,
    ) -> Result<Subscription, TransportError> {
        let fault = self
            .inner
            .faults
            .lock()
            .ok()
            .and_then(|mut faults| faults.subscribe.take());
        if let Some(message) = fault {
            return Err(TransportError::Rejected {
                code: tidal_protocol::codes::SUBSCRIBE_FAILED,
                message,
            });
        }

        let id = SubscriptionId(self.inner.next_id.fetch_add(1, Ordering::SeqCst));
        let handle = SubscriptionHandle::new(id, collection, filter.clone());
        let (sender, events) = mpsc::channel(self.inner.event_buffer);

        self.inner.subscriptions.insert(
            id,
            MemorySubscription {
                handle: handle.clone(),
                sender,
            },
        );
        self.log(Operation::Subscribe(id, filter.value.clone()));

        debug!(subscription = %id, collection = %collection, filter = %filter, "Subscribed");
        Ok(Subscription { handle, events })
    }

    async fn close(&self, handle: &SubscriptionHandle) -> Result<(), TransportError> {
        match self.inner.subscriptions.remove(&handle.id()) {
            Some((id, sub)) => {
                sub.handle.mark_closed();
                self.log(Operation::Close(id));
                debug!(subscription = %id, "Subscription closed");
                Ok(())
            }
            None => Err(TransportError::UnknownSubscription(handle.id())),
        }
    }

    fn name(&self) -> &'static str {
        "memory"
    }
}

#[async_trait]
impl AuthProvider for MemoryBackend {
    async fn current_principal(&self) -> Result<Option<Principal>, AuthError> {
        Ok(self.inner.principal.borrow().clone())
    }

    fn identity_events(&self) -> broadcast::Receiver<IdentityEvent> {
        self.inner.identity.subscribe()
    }

    async fn sign_in(&self, email: &str, password: &str) -> Result<Principal, AuthError> {
        let valid = self
            .inner
            .accounts
            .get(email)
            .is_some_and(|stored| *stored == password);
        if !valid {
            return Err(AuthError::Rejected("Invalid login credentials".to_string()));
        }

        let principal = Principal::from_email(email);
        self.set_principal(Some(principal.clone()));
        Ok(principal)
    }

    async fn sign_up(&self, email: &str, password: &str) -> Result<Option<Principal>, AuthError> {
        if self.inner.accounts.contains_key(email) {
            return Err(AuthError::Rejected("User already registered".to_string()));
        }
        self.add_account(email, password);

        let principal = Principal::from_email(email);
        self.set_principal(Some(principal.clone()));
        Ok(Some(principal))
    }

    async fn sign_out(&self) -> Result<(), AuthError> {
        self.set_principal(None);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tidal_protocol::{ChangeKind, Order};

    fn email_query(value: &str) -> Query {
        Query::new(
            "emails",
            Filter::eq("from_email", value),
            Order::desc("created_at"),
        )
    }

    #[tokio::test]
    async fn test_query_filters_and_orders() {
        let backend = MemoryBackend::new();
        backend.seed(
            "emails",
            vec![
                json!({"id": 1, "from_email": "u@x.com", "created_at": "2024-01-01"}),
                json!({"id": 2, "from_email": "v@x.com", "created_at": "2024-01-02"}),
                json!({"id": 3, "from_email": "u@x.com", "created_at": "2024-01-03"}),
            ],
        );

        let rows = backend.query(email_query("u@x.com")).await.unwrap();
        let ids: Vec<_> = rows.iter().map(|r| r["id"].as_u64().unwrap()).collect();
        assert_eq!(ids, vec![3, 1]);
        assert_eq!(
            backend.operations(),
            vec![Operation::Query("u@x.com".to_string())]
        );
    }

    #[tokio::test]
    async fn test_subscription_receives_matching_changes() {
        let backend = MemoryBackend::new();
        let mut sub = backend
            .subscribe("emails", Filter::eq("from_email", "u@x.com"))
            .await
            .unwrap();

        backend.insert("emails", json!({"id": 1, "from_email": "v@x.com"}));
        backend.insert("emails", json!({"id": 2, "from_email": "u@x.com"}));
        assert!(backend.update("emails", json!({"id": 2, "from_email": "u@x.com", "title": "t"})));
        assert!(backend.delete("emails", &RecordId::from(2)));
        assert!(!backend.delete("emails", &RecordId::from(99)));

        let kinds: Vec<_> = [
            sub.events.recv().await.unwrap(),
            sub.events.recv().await.unwrap(),
            sub.events.recv().await.unwrap(),
        ]
        .iter()
        .map(|e| e.kind)
        .collect();
        assert_eq!(
            kinds,
            vec![ChangeKind::Insert, ChangeKind::Update, ChangeKind::Delete]
        );
        assert!(sub.events.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_close_acknowledges_once() {
        let backend = MemoryBackend::new();
        let sub = backend
            .subscribe("emails", Filter::eq("from_email", "u@x.com"))
            .await
            .unwrap();
        assert_eq!(backend.subscription_count(), 1);

        backend.close(&sub.handle).await.unwrap();
        assert!(!sub.handle.is_live());
        assert_eq!(backend.subscription_count(), 0);

        assert!(matches!(
            backend.close(&sub.handle).await,
            Err(TransportError::UnknownSubscription(_))
        ));
    }

    #[tokio::test]
    async fn test_injected_faults_fire_once() {
        let backend = MemoryBackend::new();
        backend.fail_next_query("relation does not exist");

        assert!(backend.query(email_query("u@x.com")).await.is_err());
        assert!(backend.query(email_query("u@x.com")).await.is_ok());

        backend.fail_next_subscribe("realtime disabled");
        assert!(backend
            .subscribe("emails", Filter::eq("from_email", "u@x.com"))
            .await
            .is_err());
        assert_eq!(backend.subscription_count(), 0);
    }

    #[tokio::test]
    async fn test_held_query_completes_after_release() {
        let backend = MemoryBackend::new();
        backend.hold_queries("u@x.com");

        let task = {
            let backend = backend.clone();
            tokio::spawn(async move { backend.query(email_query("u@x.com")).await })
        };

        tokio::task::yield_now().await;
        assert!(!task.is_finished());

        backend.release_queries("u@x.com");
        assert!(task.await.unwrap().is_ok());
    }

    #[tokio::test]
    async fn test_password_sign_in() {
        let backend = MemoryBackend::new();
        backend.add_account("u@x.com", "hunter2");
        let mut events = backend.identity_events();

        assert!(matches!(
            backend.sign_in("u@x.com", "wrong").await,
            Err(AuthError::Rejected(_))
        ));

        let principal = backend.sign_in("u@x.com", "hunter2").await.unwrap();
        assert_eq!(principal.filter_value(), Some("u@x.com"));
        assert_eq!(events.recv().await.unwrap().kind, IdentityEventKind::SignedIn);

        backend.sign_out().await.unwrap();
        assert_eq!(backend.current_principal().await.unwrap(), None);
        assert_eq!(events.recv().await.unwrap().kind, IdentityEventKind::SignedOut);
    }

    #[tokio::test]
    async fn test_sign_up_rejects_existing_account() {
        let backend = MemoryBackend::new();
        assert!(backend.sign_up("u@x.com", "pw").await.unwrap().is_some());
        assert!(matches!(
            backend.sign_up("u@x.com", "pw").await,
            Err(AuthError::Rejected(_))
        ));
    }
}
