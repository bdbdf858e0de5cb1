//! Frame types for the Tidal sync protocol.
//!
//! Frames are exchanged between a Tidal client and a sync server.
//! Each frame is serialized using MessagePack for efficient binary encoding.

use crate::change::ChangeEvent;
use crate::query::{Filter, Order, Query};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Error codes carried by [`Frame::Error`].
pub mod codes {
    /// Malformed or unexpected frame.
    pub const BAD_FRAME: u16 = 1000;
    /// Credentials rejected or session missing.
    pub const UNAUTHORIZED: u16 = 1001;
    /// Query could not be executed.
    pub const QUERY_FAILED: u16 = 1002;
    /// Subscription could not be opened.
    pub const SUBSCRIBE_FAILED: u16 = 1003;
    /// Subscription ID not known to the server.
    pub const UNKNOWN_SUBSCRIPTION: u16 = 1004;
}

/// Frame type identifiers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(into = "u8", try_from = "u8")]
#[repr(u8)]
pub enum FrameType {
    Connect = 0x01,
    Connected = 0x02,
    Query = 0x03,
    Rows = 0x04,
    Subscribe = 0x05,
    Subscribed = 0x06,
    Unsubscribe = 0x07,
    Change = 0x08,
    SignIn = 0x09,
    SignUp = 0x0A,
    SignOut = 0x0B,
    Authenticated = 0x0C,
    Ack = 0x0D,
    Error = 0x0E,
    Ping = 0x0F,
    Pong = 0x10,
}

impl From<FrameType> for u8 {
    fn from(ft: FrameType) -> u8 {
        ft as u8
    }
}

impl TryFrom<u8> for FrameType {
    type Error = &'static str;

    fn try_from(value: u8) -> Result<Self, <Self as TryFrom<u8>>::Error> {
        match value {
            0x01 => Ok(FrameType::Connect),
            0x02 => Ok(FrameType::Connected),
            0x03 => Ok(FrameType::Query),
            0x04 => Ok(FrameType::Rows),
            0x05 => Ok(FrameType::Subscribe),
            0x06 => Ok(FrameType::Subscribed),
            0x07 => Ok(FrameType::Unsubscribe),
            0x08 => Ok(FrameType::Change),
            0x09 => Ok(FrameType::SignIn),
            0x0A => Ok(FrameType::SignUp),
            0x0B => Ok(FrameType::SignOut),
            0x0C => Ok(FrameType::Authenticated),
            0x0D => Ok(FrameType::Ack),
            0x0E => Ok(FrameType::Error),
            0x0F => Ok(FrameType::Ping),
            0x10 => Ok(FrameType::Pong),
            _ => Err("Invalid frame type"),
        }
    }
}

/// A protocol frame.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum Frame {
    /// Initial connection handshake.
    #[serde(rename = "connect")]
    Connect {
        /// Protocol major version.
        version: u8,
        /// Optional session token to resume.
        #[serde(skip_serializing_if = "Option::is_none")]
        token: Option<String>,
    },

    /// Connection established response.
    #[serde(rename = "connected")]
    Connected {
        /// Unique connection identifier.
        connection_id: String,
        /// Negotiated protocol major version.
        version: u8,
        /// Recommended heartbeat interval in milliseconds.
        heartbeat: u32,
        /// Principal resumed from the token, if any.
        #[serde(skip_serializing_if = "Option::is_none")]
        principal: Option<String>,
    },

    /// Point-in-time query.
    #[serde(rename = "query")]
    Query {
        /// Request ID.
        id: u64,
        /// Collection name.
        collection: String,
        /// Row predicate.
        filter: Filter,
        /// Result ordering.
        order: Order,
    },

    /// Query result.
    #[serde(rename = "rows")]
    Rows {
        /// ID of the answered query.
        id: u64,
        /// Matching rows, already ordered.
        rows: Vec<Value>,
    },

    /// Open a filtered push subscription.
    #[serde(rename = "subscribe")]
    Subscribe {
        /// Request ID.
        id: u64,
        /// Collection name.
        collection: String,
        /// Row predicate applied server-side.
        filter: Filter,
    },

    /// Subscription opened.
    #[serde(rename = "subscribed")]
    Subscribed {
        /// ID of the answered request.
        id: u64,
        /// Server-assigned subscription ID.
        subscription: u64,
    },

    /// Close a push subscription. Answered with `Ack`.
    #[serde(rename = "unsubscribe")]
    Unsubscribe {
        /// Request ID.
        id: u64,
        /// Subscription to close.
        subscription: u64,
    },

    /// A pushed row change.
    #[serde(rename = "change")]
    Change {
        /// Subscription the change belongs to.
        subscription: u64,
        /// The change.
        event: ChangeEvent,
    },

    /// Password sign-in.
    #[serde(rename = "sign_in")]
    SignIn {
        /// Request ID.
        id: u64,
        /// Account email.
        email: String,
        /// Account password.
        password: String,
    },

    /// Account creation.
    #[serde(rename = "sign_up")]
    SignUp {
        /// Request ID.
        id: u64,
        /// Account email.
        email: String,
        /// Account password.
        password: String,
    },

    /// End the current session. Answered with `Ack`.
    #[serde(rename = "sign_out")]
    SignOut {
        /// Request ID.
        id: u64,
    },

    /// Result of a sign-in or sign-up.
    #[serde(rename = "authenticated")]
    Authenticated {
        /// ID of the answered request.
        id: u64,
        /// Authenticated principal, absent when sign-up awaits confirmation.
        #[serde(skip_serializing_if = "Option::is_none")]
        principal: Option<String>,
        /// Session token.
        #[serde(skip_serializing_if = "Option::is_none")]
        token: Option<String>,
    },

    /// Acknowledgment of a request.
    #[serde(rename = "ack")]
    Ack {
        /// ID of the acknowledged request.
        id: u64,
    },

    /// Error response.
    #[serde(rename = "error")]
    Error {
        /// ID of the failed request (0 if not applicable).
        id: u64,
        /// Error code.
        code: u16,
        /// Human-readable error message.
        message: String,
    },

    /// Keepalive ping.
    #[serde(rename = "ping")]
    Ping {
        /// Optional timestamp.
        #[serde(skip_serializing_if = "Option::is_none")]
        timestamp: Option<u64>,
    },

    /// Keepalive pong.
    #[serde(rename = "pong")]
    Pong {
        /// Echoed timestamp from ping.
        #[serde(skip_serializing_if = "Option::is_none")]
        timestamp: Option<u64>,
    },
}

impl Frame {
    /// Get the frame type.
    #[must_use]
    pub fn frame_type(&self) -> FrameType {
        match self {
            Frame::Connect { .. } => FrameType::Connect,
            Frame::Connected { .. } => FrameType::Connected,
            Frame::Query { .. } => FrameType::Query,
            Frame::Rows { .. } => FrameType::Rows,
            Frame::Subscribe { .. } => FrameType::Subscribe,
            Frame::Subscribed { .. } => FrameType::Subscribed,
            Frame::Unsubscribe { .. } => FrameType::Unsubscribe,
            Frame::Change { .. } => FrameType::Change,
            Frame::SignIn { .. } => FrameType::SignIn,
            Frame::SignUp { .. } => FrameType::SignUp,
            Frame::SignOut { .. } => FrameType::SignOut,
            Frame::Authenticated { .. } => FrameType::Authenticated,
            Frame::Ack { .. } => FrameType::Ack,
            Frame::Error { .. } => FrameType::Error,
            Frame::Ping { .. } => FrameType::Ping,
            Frame::Pong { .. } => FrameType::Pong,
        }
    }

    /// The request ID this frame answers or carries, if any.
    ///
    /// `Change`, `Connect`, `Connected`, `Ping` and `Pong` are not correlated.
    #[must_use]
    pub fn request_id(&self) -> Option<u64> {
        match self {
            Frame::Query { id, .. }
            | Frame::Rows { id, .. }
            | Frame::Subscribe { id, .. }
            | Frame::Subscribed { id, .. }
            | Frame::Unsubscribe { id, .. }
            | Frame::SignIn { id, .. }
            | Frame::SignUp { id, .. }
            | Frame::SignOut { id }
            | Frame::Authenticated { id, .. }
            | Frame::Ack { id }
            | Frame::Error { id, .. } => Some(*id),
            Frame::Connect { .. }
            | Frame::Connected { .. }
            | Frame::Change { .. }
            | Frame::Ping { .. }
            | Frame::Pong { .. } => None,
        }
    }

    /// Create a new Connect frame.
    #[must_use]
    pub fn connect(version: u8, token: Option<String>) -> Self {
        Frame::Connect { version, token }
    }

    /// Create a new Query frame.
    #[must_use]
    pub fn query(id: u64, query: Query) -> Self {
        Frame::Query {
            id,
            collection: query.collection,
            filter: query.filter,
            order: query.order,
        }
    }

    /// Create a new Subscribe frame.
    #[must_use]
    pub fn subscribe(id: u64, collection: impl Into<String>, filter: Filter) -> Self {
        Frame::Subscribe {
            id,
            collection: collection.into(),
            filter,
        }
    }

    /// Create a new Unsubscribe frame.
    #[must_use]
    pub fn unsubscribe(id: u64, subscription: u64) -> Self {
        Frame::Unsubscribe { id, subscription }
    }

    /// Create a new Change frame.
    #[must_use]
    pub fn change(subscription: u64, event: ChangeEvent) -> Self {
        Frame::Change {
            subscription,
            event,
        }
    }

    /// Create a new Ack frame.
    #[must_use]
    pub fn ack(id: u64) -> Self {
        Frame::Ack { id }
    }

    /// Create a new Error frame.
    #[must_use]
    pub fn error(id: u64, code: u16, message: impl Into<String>) -> Self {
        Frame::Error {
            id,
            code,
            message: message.into(),
        }
    }

    /// Create a new Ping frame.
    #[must_use]
    pub fn ping() -> Self {
        Frame::Ping { timestamp: None }
    }

    /// Create a new Pong frame.
    #[must_use]
    pub fn pong(timestamp: Option<u64>) -> Self {
        Frame::Pong { timestamp }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_frame_type() {
        let subscribe = Frame::subscribe(1, "emails", Filter::eq("from_email", "u@x.com"));
        assert_eq!(subscribe.frame_type(), FrameType::Subscribe);

        let change = Frame::change(9, ChangeEvent::delete(json!({"id": 1})));
        assert_eq!(change.frame_type(), FrameType::Change);
    }

    #[test]
    fn test_frame_type_conversion() {
        assert_eq!(FrameType::try_from(0x08), Ok(FrameType::Change));
        assert_eq!(u8::from(FrameType::Pong), 0x10);
        assert!(FrameType::try_from(0x42).is_err());
    }

    #[test]
    fn test_request_id() {
        assert_eq!(Frame::ack(5).request_id(), Some(5));
        assert_eq!(Frame::unsubscribe(6, 1).request_id(), Some(6));
        assert_eq!(
            Frame::change(1, ChangeEvent::insert(json!({}))).request_id(),
            None
        );
        assert_eq!(Frame::ping().request_id(), None);
    }

    #[test]
    fn test_query_frame_from_query() {
        let query = Query::new(
            "emails",
            Filter::eq("from_email", "u@x.com"),
            Order::desc("created_at"),
        );
        match Frame::query(3, query) {
            Frame::Query {
                id,
                collection,
                filter,
                order,
            } => {
                assert_eq!(id, 3);
                assert_eq!(collection, "emails");
                assert_eq!(filter.value, "u@x.com");
                assert!(order.descending);
            }
            other => panic!("Expected Query frame, got {:?}", other),
        }
    }
}
