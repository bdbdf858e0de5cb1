//! # tidal-core
//!
//! The client-side sync engine: keeps a local, ordered collection of the
//! signed-in principal's records consistent with a remote store.
//!
//! - **Store** - ordered, deduplicated records plus fetch status
//! - **Reconciler** - folds pushed insert/update/delete events into the store
//! - **Lifecycle** - one push subscription per principal, rebinding on identity change
//! - **Auth** - observable sign-in state
//! - **Session** - read-only views and imperative operations for the presentation layer
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────┐  identity  ┌─────────────┐   query    ┌─────────────┐
//! │ AuthSession │───────────▶│  Lifecycle  │───────────▶│  Transport  │
//! └─────────────┘            └─────────────┘◀───────────└─────────────┘
//!                                   │          events
//!                                   ▼
//!                            ┌─────────────┐     ┌─────────────┐
//!                            │ Reconciler  │────▶│    Store    │
//!                            └─────────────┘     └─────────────┘
//! ```

pub mod auth;
pub mod config;
pub mod error;
pub mod lifecycle;
pub mod reconciler;
pub mod session;
pub mod store;

pub use auth::{AuthSession, AuthState};
pub use config::{SyncConfig, DEFAULT_COLLECTION};
pub use error::SyncError;
pub use lifecycle::{BindOutcome, LifecycleState, LifecycleStatus, SubscriptionManager};
pub use reconciler::{Applied, Reconciler, ReconcilerStats};
pub use session::{SyncContext, SyncSession};
pub use store::{RecordStore, StoreState, StoreStatus};
