//! The presentation-facing sync session.
//!
//! A [`SyncContext`] bundles the process-wide dependencies (transport, auth
//! session, configuration) and is built once at startup. Each
//! [`SyncSession`] created from it owns a record store and the subscription
//! manager feeding it, and exposes read-only views plus a few imperative
//! operations.

use std::sync::Arc;
use tidal_protocol::Record;
use tidal_transport::{Principal, TransportClient};
use tokio::sync::watch;
use tracing::{debug, info, warn};

use crate::auth::AuthSession;
use crate::config::SyncConfig;
use crate::error::SyncError;
use crate::lifecycle::{BindOutcome, LifecycleStatus, SubscriptionManager};
use crate::reconciler::ReconcilerStats;
use crate::store::{RecordStore, StoreState, StoreStatus};

/// Shared dependencies for sync sessions.
#[derive(Clone)]
pub struct SyncContext {
    transport: Arc<dyn TransportClient>,
    auth: Arc<AuthSession>,
    config: SyncConfig,
}

impl SyncContext {
    /// Create a context.
    #[must_use]
    pub fn new(
        transport: Arc<dyn TransportClient>,
        auth: Arc<AuthSession>,
        config: SyncConfig,
    ) -> Self {
        Self {
            transport,
            auth,
            config,
        }
    }

    /// The transport.
    #[must_use]
    pub fn transport(&self) -> &Arc<dyn TransportClient> {
        &self.transport
    }

    /// The auth session.
    #[must_use]
    pub fn auth(&self) -> &Arc<AuthSession> {
        &self.auth
    }

    /// Engine configuration.
    #[must_use]
    pub fn config(&self) -> &SyncConfig {
        &self.config
    }

    /// Create a session.
    #[must_use]
    pub fn session(&self) -> SyncSession {
        SyncSession::new(self.clone())
    }
}

/// A synchronized view of the signed-in principal's records.
pub struct SyncSession {
    context: SyncContext,
    store: RecordStore,
    manager: SubscriptionManager,
}

impl SyncSession {
    /// Create a session. Nothing is fetched until [`initialize`](Self::initialize)
    /// or [`run`](Self::run).
    #[must_use]
    pub fn new(context: SyncContext) -> Self {
        let store = RecordStore::new();
        let manager = SubscriptionManager::new(
            Arc::clone(&context.transport),
            store.clone(),
            context.config.clone(),
        );
        Self {
            context,
            store,
            manager,
        }
    }

    /// Records in display order.
    #[must_use]
    pub fn records(&self) -> Vec<Record> {
        self.store.records()
    }

    /// Whether a fetch is in flight.
    #[must_use]
    pub fn loading(&self) -> bool {
        self.store.status() == StoreStatus::Loading
    }

    /// The last recorded error.
    #[must_use]
    pub fn error(&self) -> Option<String> {
        self.store.last_error()
    }

    /// Store status.
    #[must_use]
    pub fn status(&self) -> StoreStatus {
        self.store.status()
    }

    /// Copy of the full store state.
    #[must_use]
    pub fn snapshot(&self) -> StoreState {
        self.store.snapshot()
    }

    /// Observe store changes.
    #[must_use]
    pub fn watch(&self) -> watch::Receiver<StoreState> {
        self.store.subscribe()
    }

    /// Subscription lifecycle status.
    #[must_use]
    pub fn lifecycle(&self) -> LifecycleStatus {
        self.manager.status()
    }

    /// Observe lifecycle changes.
    #[must_use]
    pub fn watch_lifecycle(&self) -> watch::Receiver<LifecycleStatus> {
        self.manager.watch()
    }

    /// Reconciler counters.
    #[must_use]
    pub fn stats(&self) -> ReconcilerStats {
        self.manager.stats()
    }

    /// The context this session was created from.
    #[must_use]
    pub fn context(&self) -> &SyncContext {
        &self.context
    }

    /// Refetch the signed-in principal's records.
    ///
    /// Without a principal the store records "User not authenticated".
    pub async fn fetch(&self) {
        match self.principal() {
            Some(principal) => self.manager.fetch(&principal).await,
            None => self.missing_principal("fetch"),
        }
    }

    /// Open (or reopen) the push subscription for the signed-in principal.
    ///
    /// # Errors
    ///
    /// Returns [`SyncError::TransportSubscribeFailed`] if the transport
    /// refused the subscription.
    pub async fn subscribe(&self) -> Result<BindOutcome, SyncError> {
        match self.principal() {
            Some(principal) => self.manager.resubscribe(principal).await,
            None => {
                self.missing_principal("subscribe");
                Ok(BindOutcome::Unauthenticated)
            }
        }
    }

    /// Close the push subscription. Records are kept.
    pub async fn unsubscribe(&self) {
        self.manager.unbind().await;
    }

    /// Fetch, then subscribe, for the signed-in principal.
    ///
    /// # Errors
    ///
    /// Returns [`SyncError::TransportSubscribeFailed`] if the transport
    /// refused the subscription.
    pub async fn initialize(&self) -> Result<BindOutcome, SyncError> {
        match self.principal() {
            Some(principal) => self.manager.bind(principal).await,
            None => {
                self.missing_principal("initialize");
                Ok(BindOutcome::Unauthenticated)
            }
        }
    }

    /// Follow the auth session until it goes away.
    ///
    /// Signing in binds the store to the new principal, switching accounts
    /// rebinds, and signing out unbinds and clears the store.
    pub async fn run(&self) {
        let mut auth = self.context.auth.watch();
        let mut bound: Option<Principal> = None;

        loop {
            let principal = auth.borrow_and_update().principal.clone();
            if principal != bound {
                self.follow(principal.clone()).await;
                bound = principal;
            }

            if auth.changed().await.is_err() {
                break;
            }
        }

        debug!("Auth session closed, stopping sync driver");
        self.manager.shutdown().await;
    }

    /// Close the subscription and stop feeding the store.
    pub async fn shutdown(&self) {
        self.manager.shutdown().await;
    }

    async fn follow(&self, principal: Option<Principal>) {
        match principal {
            Some(principal) => {
                info!(principal = %principal, "Identity changed, binding");
                if let Err(e) = self.manager.bind(principal).await {
                    warn!(error = %e, "Binding failed");
                }
            }
            None => {
                info!("Signed out, clearing records");
                self.manager.unbind().await;
                self.store.clear();
            }
        }
    }

    fn principal(&self) -> Option<Principal> {
        self.context.auth.principal()
    }

    fn missing_principal(&self, operation: &str) {
        warn!(operation, "No signed-in principal");
        self.store
            .set_error(SyncError::AuthenticationMissing.to_string());
    }
}
