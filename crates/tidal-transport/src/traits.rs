//! Transport and identity traits for Tidal.
//!
//! The sync engine only talks to a remote store through [`TransportClient`]
//! and learns who is signed in through [`AuthProvider`], so any backend
//! that can answer queries and push filtered changes can drive it.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use thiserror::Error;
use tidal_protocol::{ChangeEvent, Filter, Query};
use tokio::sync::{broadcast, mpsc};

/// An authenticated identity.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Principal {
    /// Stable principal identifier.
    pub id: String,
    /// Email address, used as the owner filter value.
    pub email: Option<String>,
}

impl Principal {
    /// Create a principal without an email.
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            email: None,
        }
    }

    /// Create a principal identified by its email address.
    #[must_use]
    pub fn from_email(email: impl Into<String>) -> Self {
        let email = email.into();
        Self {
            id: email.clone(),
            email: Some(email),
        }
    }

    /// Attach an email address.
    #[must_use]
    pub fn with_email(mut self, email: impl Into<String>) -> Self {
        self.email = Some(email.into());
        self
    }

    /// The value used to scope queries and subscriptions.
    ///
    /// Returns `None` when the principal has no non-empty email.
    #[must_use]
    pub fn filter_value(&self) -> Option<&str> {
        self.email.as_deref().filter(|email| !email.is_empty())
    }
}

impl fmt::Display for Principal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.email {
            Some(email) => write!(f, "{}", email),
            None => write!(f, "{}", self.id),
        }
    }
}

/// Why the identity changed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum IdentityEventKind {
    /// Session restored when the provider started.
    InitialSession,
    /// A principal signed in or signed up.
    SignedIn,
    /// The principal signed out or the session expired.
    SignedOut,
    /// The session token was refreshed for the same principal.
    TokenRefreshed,
    /// The principal's attributes changed.
    UserUpdated,
}

/// An identity change notification.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IdentityEvent {
    /// What happened.
    pub kind: IdentityEventKind,
    /// The principal after the change.
    pub principal: Option<Principal>,
}

impl IdentityEvent {
    /// Create an identity event.
    #[must_use]
    pub fn new(kind: IdentityEventKind, principal: Option<Principal>) -> Self {
        Self { kind, principal }
    }
}

/// Identifier of a push subscription, assigned by the transport.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SubscriptionId(pub u64);

impl fmt::Display for SubscriptionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "sub_{}", self.0)
    }
}

/// Handle to one open push-channel registration.
///
/// Clones share the liveness flag.
#[derive(Debug, Clone)]
pub struct SubscriptionHandle {
    id: SubscriptionId,
    collection: String,
    filter: Filter,
    live: Arc<AtomicBool>,
}

impl SubscriptionHandle {
    /// Create a live handle.
    #[must_use]
    pub fn new(id: SubscriptionId, collection: impl Into<String>, filter: Filter) -> Self {
        Self {
            id,
            collection: collection.into(),
            filter,
            live: Arc::new(AtomicBool::new(true)),
        }
    }

    /// Subscription ID.
    #[must_use]
    pub fn id(&self) -> SubscriptionId {
        self.id
    }

    /// Subscribed collection.
    #[must_use]
    pub fn collection(&self) -> &str {
        &self.collection
    }

    /// Server-side filter.
    #[must_use]
    pub fn filter(&self) -> &Filter {
        &self.filter
    }

    /// Whether the transport still delivers events for this handle.
    #[must_use]
    pub fn is_live(&self) -> bool {
        self.live.load(Ordering::SeqCst)
    }

    /// Mark the handle closed. Returns `true` if it was live.
    pub fn mark_closed(&self) -> bool {
        self.live.swap(false, Ordering::SeqCst)
    }
}

/// An opened subscription: its handle plus the inbound event queue.
#[derive(Debug)]
pub struct Subscription {
    /// Handle used to close the subscription.
    pub handle: SubscriptionHandle,
    /// Events in delivery order.
    pub events: mpsc::Receiver<ChangeEvent>,
}

/// Transport errors.
#[derive(Debug, Error)]
pub enum TransportError {
    /// Connection was closed.
    #[error("Connection closed")]
    ConnectionClosed,

    /// Request timed out.
    #[error("Request timed out")]
    Timeout,

    /// The server rejected a request.
    #[error("{message} (code {code})")]
    Rejected {
        /// Error code.
        code: u16,
        /// Server message.
        message: String,
    },

    /// The subscription is not known to the transport.
    #[error("Unknown subscription: {0}")]
    UnknownSubscription(SubscriptionId),

    /// Failed to send data.
    #[error("Send failed: {0}")]
    SendFailed(String),

    /// Protocol error.
    #[error("Protocol error: {0}")]
    Protocol(#[from] tidal_protocol::ProtocolError),

    /// Unexpected response frame.
    #[error("Unexpected response: {0}")]
    UnexpectedResponse(String),

    /// Other error.
    #[error("{0}")]
    Other(String),
}

/// Authentication errors.
#[derive(Debug, Error)]
pub enum AuthError {
    /// Credentials were rejected.
    #[error("{0}")]
    Rejected(String),

    /// The operation requires a signed-in principal.
    #[error("Not authenticated")]
    NotAuthenticated,

    /// The provider could not be reached.
    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),
}

/// A connection to a remote store.
#[async_trait]
pub trait TransportClient: Send + Sync {
    /// Run a point-in-time query. Rows come back in the requested order.
    async fn query(&self, query: Query) -> Result<Vec<Value>, TransportError>;

    /// Open a push subscription for rows of `collection` matching `filter`.
    async fn subscribe(
        &self,
        collection: &str,
        filter: Filter,
    ) -> Result<Subscription, TransportError>;

    /// Close a subscription, returning once the transport acknowledged it.
    ///
    /// No event for the handle is delivered after this returns.
    async fn close(&self, handle: &SubscriptionHandle) -> Result<(), TransportError>;

    /// Get the transport name (e.g., "memory", "websocket").
    fn name(&self) -> &'static str;

    /// Check if the transport is healthy.
    fn is_healthy(&self) -> bool {
        true
    }
}

/// Source of the authenticated identity.
#[async_trait]
pub trait AuthProvider: Send + Sync {
    /// The currently signed-in principal, if any.
    async fn current_principal(&self) -> Result<Option<Principal>, AuthError>;

    /// Register for identity change notifications.
    fn identity_events(&self) -> broadcast::Receiver<IdentityEvent>;

    /// Sign in with email and password.
    async fn sign_in(&self, email: &str, password: &str) -> Result<Principal, AuthError>;

    /// Create an account. Returns `None` when the account awaits confirmation.
    async fn sign_up(&self, email: &str, password: &str) -> Result<Option<Principal>, AuthError>;

    /// End the current session.
    async fn sign_out(&self) -> Result<(), AuthError>;
}
