//! Subscription lifecycle.
//!
//! The [`SubscriptionManager`] ties the store to exactly one principal at a
//! time. Binding fetches the principal's records and then opens a single
//! push subscription whose events are pumped into the [`Reconciler`].
//!
//! ## States
//!
//! ```text
//!            bind                fetch + subscribe ok
//!  Unbound ─────────▶ Binding ─────────────────────────▶ Bound
//!     ▲                  │ subscribe failed                │
//!     └──────────────────┘                                 │ unbind / rebind
//!     ▲                                                    ▼
//!     └──────────────────────────────────────────────  Unbinding
//!                        close acknowledged
//! ```
//!
//! Every bind or unbind bumps a generation counter. Fetch results and
//! subscription events carry the generation they were issued under and are
//! discarded once it is no longer current, so a slow response for an old
//! principal can never overwrite the records of a newer one.

use serde::Serialize;
use std::sync::Arc;
use tidal_protocol::Record;
use tidal_transport::{
    Principal, Subscription, SubscriptionHandle, SubscriptionId, TransportClient,
};
use tokio::sync::{watch, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, trace, warn};

use crate::config::SyncConfig;
use crate::error::SyncError;
use crate::reconciler::{Reconciler, ReconcilerStats};
use crate::store::RecordStore;

/// Lifecycle state.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum LifecycleState {
    /// No subscription.
    #[default]
    Unbound,
    /// Fetching and subscribing for a principal.
    Binding,
    /// A live subscription feeds the store.
    Bound,
    /// Closing the current subscription.
    Unbinding,
}

/// Observable lifecycle status.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LifecycleStatus {
    /// Current state.
    pub state: LifecycleState,
    /// Principal the store is bound (or binding) to.
    pub principal: Option<Principal>,
    /// Bumped on every bind and unbind.
    pub generation: u64,
    /// The open subscription, if any.
    pub subscription: Option<SubscriptionId>,
}

/// Result of a bind request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BindOutcome {
    /// A new subscription is live.
    Bound,
    /// Already bound (or binding) to this principal; nothing was done.
    AlreadyBound,
    /// A newer bind or unbind took over before this one finished.
    Superseded,
    /// The principal has no filter value; the store records the error.
    Unauthenticated,
}

struct ActiveSubscription {
    handle: SubscriptionHandle,
    pump: JoinHandle<()>,
}

/// Owns the single push subscription feeding a [`RecordStore`].
pub struct SubscriptionManager {
    transport: Arc<dyn TransportClient>,
    config: SyncConfig,
    reconciler: Reconciler,
    status: watch::Sender<LifecycleStatus>,
    // Held across close and open so a new subscription never overlaps the old one.
    active: Mutex<Option<ActiveSubscription>>,
}

impl SubscriptionManager {
    /// Create a manager feeding `store` from `transport`.
    #[must_use]
    pub fn new(transport: Arc<dyn TransportClient>, store: RecordStore, config: SyncConfig) -> Self {
        let reconciler = Reconciler::new(store, config.schema.clone());
        let (status, _) = watch::channel(LifecycleStatus::default());
        Self {
            transport,
            config,
            reconciler,
            status,
            active: Mutex::new(None),
        }
    }

    /// Bind the store to `principal`.
    ///
    /// Fetches the principal's records, then opens one push subscription.
    /// Binding to a different principal closes the current subscription
    /// first. Binding again to the principal already bound is a no-op.
    ///
    /// A failed fetch is recorded in the store and binding continues.
    ///
    /// # Errors
    ///
    /// Returns [`SyncError::TransportSubscribeFailed`] if the subscription
    /// could not be opened. The error is also recorded in the store.
    pub async fn bind(&self, principal: Principal) -> Result<BindOutcome, SyncError> {
        let Some(owner) = principal.filter_value().map(str::to_string) else {
            return Ok(self.reject_unauthenticated(&principal));
        };

        let Some(generation) = self.claim(&principal, false) else {
            debug!(principal = %principal, "Already bound");
            return Ok(BindOutcome::AlreadyBound);
        };

        let mut active = self.active.lock().await;
        if !self.is_current(generation) {
            return Ok(BindOutcome::Superseded);
        }

        self.close_active(&mut active, generation).await;
        self.set_state(generation, LifecycleState::Binding);
        info!(principal = %principal, generation, "Binding");

        self.fetch_as(&principal, &owner, generation).await;
        if !self.is_current(generation) {
            debug!(principal = %principal, generation, "Bind superseded during fetch");
            return Ok(BindOutcome::Superseded);
        }

        self.open(&mut active, &principal, &owner, generation).await
    }

    /// Rebind to a new principal.
    ///
    /// The current subscription is fully closed before the new one opens.
    ///
    /// # Errors
    ///
    /// Same as [`bind`](Self::bind).
    pub async fn rebind(&self, principal: Principal) -> Result<BindOutcome, SyncError> {
        self.bind(principal).await
    }

    /// Replace the push subscription for `principal` without refetching.
    ///
    /// # Errors
    ///
    /// Returns [`SyncError::TransportSubscribeFailed`] if the subscription
    /// could not be opened.
    pub async fn resubscribe(&self, principal: Principal) -> Result<BindOutcome, SyncError> {
        let Some(owner) = principal.filter_value().map(str::to_string) else {
            return Ok(self.reject_unauthenticated(&principal));
        };

        let Some(generation) = self.claim(&principal, true) else {
            return Ok(BindOutcome::AlreadyBound);
        };

        let mut active = self.active.lock().await;
        if !self.is_current(generation) {
            return Ok(BindOutcome::Superseded);
        }

        self.close_active(&mut active, generation).await;
        self.set_state(generation, LifecycleState::Binding);
        self.open(&mut active, &principal, &owner, generation).await
    }

    /// Close the subscription, if any. Safe to call in any state.
    ///
    /// Records already in the store are kept. A fetch interrupted by the
    /// unbind is abandoned and the store leaves `Loading`.
    pub async fn unbind(&self) {
        let mut generation = 0;
        self.status.send_modify(|status| {
            status.generation += 1;
            status.principal = None;
            generation = status.generation;
        });

        let mut active = self.active.lock().await;
        if !self.is_current(generation) {
            return;
        }

        if self.store().cancel_fetch() {
            debug!(generation, "Abandoned in-flight fetch");
        }
        self.close_active(&mut active, generation).await;
        self.set_state(generation, LifecycleState::Unbound);
    }

    /// Stop feeding the store. Equivalent to [`unbind`](Self::unbind).
    pub async fn shutdown(&self) {
        self.unbind().await;
        debug!("Subscription manager shut down");
    }

    /// Refetch the records of `principal`.
    ///
    /// Ignored if the manager is bound to a different principal. The result
    /// is discarded if the binding changes while the fetch is in flight.
    pub async fn fetch(&self, principal: &Principal) {
        let Some(owner) = principal.filter_value() else {
            self.reject_unauthenticated(principal);
            return;
        };

        let mut generation = None;
        self.status.send_if_modified(|status| match &status.principal {
            Some(bound) if bound == principal => {
                generation = Some(status.generation);
                false
            }
            Some(_) => false,
            None => {
                status.principal = Some(principal.clone());
                generation = Some(status.generation);
                true
            }
        });

        match generation {
            Some(generation) => self.fetch_as(principal, owner, generation).await,
            None => warn!(principal = %principal, "Fetch for a principal other than the bound one ignored"),
        }
    }

    /// Current status.
    #[must_use]
    pub fn status(&self) -> LifecycleStatus {
        self.status.borrow().clone()
    }

    /// Watch status changes.
    #[must_use]
    pub fn watch(&self) -> watch::Receiver<LifecycleStatus> {
        self.status.subscribe()
    }

    /// The store being fed.
    #[must_use]
    pub fn store(&self) -> &RecordStore {
        self.reconciler.store()
    }

    /// Reconciler counters.
    #[must_use]
    pub fn stats(&self) -> ReconcilerStats {
        self.reconciler.stats()
    }

    /// Take over the status for `principal`, returning the new generation.
    ///
    /// Returns `None` when already binding or bound to `principal`, unless
    /// `force` is set.
    fn claim(&self, principal: &Principal, force: bool) -> Option<u64> {
        let mut claimed = None;
        self.status.send_if_modified(|status| {
            let same = status.principal.as_ref() == Some(principal);
            let busy = matches!(status.state, LifecycleState::Binding | LifecycleState::Bound);
            if same && busy && !force {
                return false;
            }
            status.generation += 1;
            status.principal = Some(principal.clone());
            claimed = Some(status.generation);
            true
        });
        claimed
    }

    fn is_current(&self, generation: u64) -> bool {
        self.status.borrow().generation == generation
    }

    fn set_state(&self, generation: u64, state: LifecycleState) {
        self.status.send_if_modified(|status| {
            if status.generation != generation || status.state == state {
                return false;
            }
            status.state = state;
            true
        });
    }

    fn reject_unauthenticated(&self, principal: &Principal) -> BindOutcome {
        warn!(principal = %principal, "Principal has no filter value");
        self.store()
            .set_error(SyncError::AuthenticationMissing.to_string());
        BindOutcome::Unauthenticated
    }

    async fn fetch_as(&self, principal: &Principal, owner: &str, generation: u64) {
        let store = self.store();
        store.begin_fetch();

        let result = self.transport.query(self.config.query(owner)).await;
        if !self.is_current(generation) {
            debug!(principal = %principal, generation, "Discarding stale fetch");
            return;
        }

        match result {
            Ok(rows) => {
                let records: Vec<Record> = rows
                    .into_iter()
                    .filter_map(|row| match Record::from_row(row, &self.config.schema) {
                        Ok(record) => Some(record),
                        Err(e) => {
                            warn!(error = %e, "Skipping fetched row");
                            None
                        }
                    })
                    .collect();
                info!(principal = %principal, count = records.len(), "Fetched records");
                store.replace(records);
            }
            Err(e) => {
                error!(principal = %principal, error = %e, "Fetch failed");
                store.set_error(e.to_string());
            }
        }
    }

    async fn open(
        &self,
        active: &mut Option<ActiveSubscription>,
        principal: &Principal,
        owner: &str,
        generation: u64,
    ) -> Result<BindOutcome, SyncError> {
        let filter = self.config.filter(owner);
        let subscription = match self.transport.subscribe(&self.config.collection, filter).await {
            Ok(subscription) => subscription,
            Err(e) => {
                let err = SyncError::TransportSubscribeFailed(e.to_string());
                error!(principal = %principal, error = %e, "Subscribe failed");
                if self.is_current(generation) {
                    self.store().set_error(err.to_string());
                    self.set_state(generation, LifecycleState::Unbound);
                }
                return Err(err);
            }
        };

        if !self.is_current(generation) {
            debug!(subscription = %subscription.handle.id(), "Bind superseded during subscribe");
            if let Err(e) = self.transport.close(&subscription.handle).await {
                warn!(subscription = %subscription.handle.id(), error = %e, "Close failed");
            }
            return Ok(BindOutcome::Superseded);
        }

        let handle = subscription.handle.clone();
        let pump = self.spawn_pump(subscription, generation);
        *active = Some(ActiveSubscription {
            handle: handle.clone(),
            pump,
        });

        self.status.send_if_modified(|status| {
            if status.generation != generation {
                return false;
            }
            status.state = LifecycleState::Bound;
            status.subscription = Some(handle.id());
            true
        });

        info!(principal = %principal, subscription = %handle.id(), "Bound");
        Ok(BindOutcome::Bound)
    }

    /// Close the current subscription and stop its pump.
    ///
    /// A close the transport rejects is logged and the handle is dropped
    /// anyway: it is marked closed and the pump is aborted and joined before
    /// this returns, so nothing it still receives can reach the store.
    async fn close_active(&self, active: &mut Option<ActiveSubscription>, generation: u64) {
        let Some(current) = active.take() else {
            return;
        };

        self.set_state(generation, LifecycleState::Unbinding);
        let id = current.handle.id();

        if let Err(e) = self.transport.close(&current.handle).await {
            warn!(subscription = %id, error = %e, "Close failed, dropping subscription");
        }
        current.handle.mark_closed();

        current.pump.abort();
        if let Err(e) = current.pump.await {
            if !e.is_cancelled() {
                error!(subscription = %id, error = %e, "Event pump failed");
            }
        }

        self.status.send_if_modified(|status| {
            if status.subscription != Some(id) {
                return false;
            }
            status.subscription = None;
            true
        });
        debug!(subscription = %id, "Subscription closed");
    }

    fn spawn_pump(&self, subscription: Subscription, generation: u64) -> JoinHandle<()> {
        let reconciler = self.reconciler.clone();
        let status = self.status.subscribe();
        let Subscription { handle, mut events } = subscription;

        tokio::spawn(async move {
            while let Some(event) = events.recv().await {
                let current = status.borrow().generation == generation;
                if !current {
                    trace!(subscription = %handle.id(), "Dropping change for superseded binding");
                    continue;
                }
                reconciler.apply(event);
            }
            debug!(subscription = %handle.id(), "Event queue closed");
        })
    }
}
