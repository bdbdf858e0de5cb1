//! # tidal-transport
//!
//! Transport and identity seams for the Tidal sync engine.
//!
//! The engine consumes two capabilities:
//!
//! - **TransportClient** - Point-in-time queries and filtered push subscriptions
//! - **AuthProvider** - The current principal and identity change notifications
//!
//! Two implementations ship with the crate:
//!
//! - **MemoryBackend** - In-process rows, subscriptions and accounts
//! - **WebSocketClient** - A client for a Tidal sync server (feature `websocket`)
//!
//! ```rust,ignore
//! use tidal_transport::{TransportClient, WebSocketClient, WebSocketConfig};
//!
//! let client = WebSocketClient::connect(WebSocketConfig::default()).await?;
//! let mut sub = client.subscribe("emails", filter).await?;
//! while let Some(event) = sub.events.recv().await {
//!     // Apply event
//! }
//! ```

pub mod memory;
pub mod traits;

#[cfg(feature = "websocket")]
pub mod websocket;

pub use memory::{MemoryBackend, Operation};
pub use traits::{
    AuthError, AuthProvider, IdentityEvent, IdentityEventKind, Principal, Subscription,
    SubscriptionHandle, SubscriptionId, TransportClient, TransportError,
};

#[cfg(feature = "websocket")]
pub use websocket::{WebSocketClient, WebSocketConfig};
