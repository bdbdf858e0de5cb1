//! # tidal-protocol
//!
//! Data model and wire protocol for the Tidal realtime sync engine.
//!
//! This crate defines what the other Tidal crates exchange:
//!
//! - **Record** - Server-assigned rows keyed by a stable ID
//! - **Query** - Owner-equality filters and result ordering
//! - **ChangeEvent** - Insert/update/delete notifications from a push channel
//! - **Frame** - Client/server frames, encoded with a length-prefixed MessagePack codec
//!
//! ## Example
//!
//! ```rust
//! use tidal_protocol::{codec, ChangeEvent, Frame};
//! use serde_json::json;
//!
//! let frame = Frame::change(1, ChangeEvent::insert(json!({"id": 1, "title": "Hi"})));
//!
//! let encoded = codec::encode(&frame).unwrap();
//! let decoded = codec::decode(&encoded).unwrap();
//! assert_eq!(frame, decoded);
//! ```

pub mod change;
pub mod codec;
pub mod frames;
pub mod query;
pub mod record;
pub mod version;

pub use change::{ChangeEvent, ChangeKind};
pub use codec::{decode, encode, ProtocolError};
pub use frames::{codes, Frame, FrameType};
pub use query::{Filter, Order, Query};
pub use record::{Record, RecordError, RecordId, RecordSchema};
pub use version::{Version, PROTOCOL_VERSION};
