//! Codec for encoding and decoding Tidal frames.
//!
//! This module provides MessagePack-based serialization with length-prefixed framing.

use bytes::{Buf, BufMut, Bytes, BytesMut};
use thiserror::Error;

use crate::frames::Frame;

/// Maximum frame size (16 MiB).
pub const MAX_FRAME_SIZE: usize = 16 * 1024 * 1024;

/// Length prefix size in bytes.
pub const LENGTH_PREFIX_SIZE: usize = 4;

/// Protocol errors that can occur during encoding/decoding.
#[derive(Debug, Error)]
pub enum ProtocolError {
    /// Frame exceeds maximum size.
    #[error("Frame size {0} exceeds maximum {MAX_FRAME_SIZE}")]
    FrameTooLarge(usize),

    /// Not enough data to decode frame.
    #[error("Incomplete frame: need {0} more bytes")]
    Incomplete(usize),

    /// MessagePack encoding error.
    #[error("Encoding error: {0}")]
    Encode(#[from] rmp_serde::encode::Error),

    /// MessagePack decoding error.
    #[error("Decoding error: {0}")]
    Decode(#[from] rmp_serde::decode::Error),

    /// Peer speaks an incompatible protocol version.
    #[error("Unsupported protocol version {0}")]
    UnsupportedVersion(u8),
}

fn frame_payload(frame: &Frame) -> Result<Vec<u8>, ProtocolError> {
    let payload = rmp_serde::to_vec_named(frame)?;
    if payload.len() > MAX_FRAME_SIZE {
        return Err(ProtocolError::FrameTooLarge(payload.len()));
    }
    Ok(payload)
}

fn read_length(data: &[u8]) -> Result<usize, ProtocolError> {
    let length = u32::from_be_bytes([data[0], data[1], data[2], data[3]]) as usize;
    if length > MAX_FRAME_SIZE {
        return Err(ProtocolError::FrameTooLarge(length));
    }
    Ok(length)
}

/// Encode a frame to bytes.
///
/// The encoded format is:
/// - 4 bytes: Big-endian length prefix
/// - N bytes: MessagePack-encoded frame
///
/// # Errors
///
/// Returns an error if the frame is too large or encoding fails.
pub fn encode(frame: &Frame) -> Result<Bytes, ProtocolError> {
    let mut buf = BytesMut::new();
    encode_into(frame, &mut buf)?;
    Ok(buf.freeze())
}

/// Encode a frame into an existing buffer.
///
/// # Errors
///
/// Returns an error if the frame is too large or encoding fails.
pub fn encode_into(frame: &Frame, buf: &mut BytesMut) -> Result<(), ProtocolError> {
    let payload = frame_payload(frame)?;

    buf.reserve(LENGTH_PREFIX_SIZE + payload.len());
    buf.put_u32(payload.len() as u32);
    buf.extend_from_slice(&payload);

    Ok(())
}

/// Decode a frame from bytes.
///
/// # Errors
///
/// Returns an error if the data is incomplete, too large, or invalid.
pub fn decode(data: &[u8]) -> Result<Frame, ProtocolError> {
    if data.len() < LENGTH_PREFIX_SIZE {
        return Err(ProtocolError::Incomplete(LENGTH_PREFIX_SIZE - data.len()));
    }

    let length = read_length(data)?;
    let total_size = LENGTH_PREFIX_SIZE + length;
    if data.len() < total_size {
        return Err(ProtocolError::Incomplete(total_size - data.len()));
    }

    let frame = rmp_serde::from_slice(&data[LENGTH_PREFIX_SIZE..total_size])?;
    Ok(frame)
}

/// Try to decode a frame from a buffer, advancing it if successful.
///
/// Returns `Ok(Some(frame))` if a complete frame was decoded,
/// `Ok(None)` if more data is needed, or `Err` on protocol error.
/// An undecodable frame is consumed so the stream can continue.
///
/// # Errors
///
/// Returns an error if the frame is too large or invalid.
pub fn decode_from(buf: &mut BytesMut) -> Result<Option<Frame>, ProtocolError> {
    if buf.len() < LENGTH_PREFIX_SIZE {
        return Ok(None);
    }

    let length = read_length(&buf[..])?;
    let total_size = LENGTH_PREFIX_SIZE + length;
    if buf.len() < total_size {
        return Ok(None);
    }

    buf.advance(LENGTH_PREFIX_SIZE);
    let payload = buf.split_to(length);
    let frame = rmp_serde::from_slice(&payload)?;

    Ok(Some(frame))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::change::ChangeEvent;
    use crate::query::{Filter, Order, Query};
    use serde_json::json;

    #[test]
    fn test_frames_survive_encoding() {
        let frames = vec![
            Frame::connect(1, Some("token123".to_string())),
            Frame::query(
                1,
                Query::new(
                    "emails",
                    Filter::eq("from_email", "u@x.com"),
                    Order::desc("created_at"),
                ),
            ),
            Frame::Rows {
                id: 1,
                rows: vec![json!({"id": 1, "title": "a", "raw_id": null})],
            },
            Frame::change(7, ChangeEvent::update(json!({"id": 1, "title": "b"}))),
            Frame::error(2, 1003, "no such table"),
            Frame::Authenticated {
                id: 4,
                principal: None,
                token: None,
            },
        ];

        for frame in frames {
            let encoded = encode(&frame).unwrap();
            let decoded = decode(&encoded).unwrap();
            assert_eq!(frame, decoded);
        }
    }

    #[test]
    fn test_change_without_id_still_decodes() {
        let frame = Frame::change(1, ChangeEvent::insert(json!({"title": "no id"})));
        let decoded = decode(&encode(&frame).unwrap()).unwrap();
        match decoded {
            Frame::Change { event, .. } => assert!(event.row().unwrap().get("id").is_none()),
            other => panic!("Expected Change frame, got {:?}", other),
        }
    }

    #[test]
    fn test_decode_incomplete() {
        let encoded = encode(&Frame::ack(1)).unwrap();

        let partial = &encoded[..3];
        match decode(partial) {
            Err(ProtocolError::Incomplete(1)) => {}
            other => panic!("Expected Incomplete error, got {:?}", other),
        }
    }

    #[test]
    fn test_frame_too_large() {
        let frame = Frame::Rows {
            id: 1,
            rows: vec![json!("x".repeat(MAX_FRAME_SIZE + 1))],
        };

        match encode(&frame) {
            Err(ProtocolError::FrameTooLarge(_)) => {}
            other => panic!("Expected FrameTooLarge error, got {:?}", other),
        }
    }

    #[test]
    fn test_streaming_decode() {
        let frame1 = Frame::unsubscribe(1, 10);
        let frame2 = Frame::ack(1);

        let mut buf = BytesMut::new();
        encode_into(&frame1, &mut buf).unwrap();
        encode_into(&frame2, &mut buf).unwrap();

        // Partial trailing data stays buffered.
        buf.extend_from_slice(&[0, 0]);

        assert_eq!(decode_from(&mut buf).unwrap(), Some(frame1));
        assert_eq!(decode_from(&mut buf).unwrap(), Some(frame2));
        assert_eq!(decode_from(&mut buf).unwrap(), None);
        assert_eq!(buf.len(), 2);
    }

    #[test]
    fn test_undecodable_frame_is_skipped() {
        let mut buf = BytesMut::new();
        buf.extend_from_slice(&[0, 0, 0, 1, 0xc1]);
        encode_into(&Frame::ack(3), &mut buf).unwrap();

        assert!(matches!(decode_from(&mut buf), Err(ProtocolError::Decode(_))));
        assert_eq!(decode_from(&mut buf).unwrap(), Some(Frame::ack(3)));
        assert!(buf.is_empty());

        buf.extend_from_slice(&u32::MAX.to_be_bytes());
        assert!(matches!(decode_from(&mut buf), Err(ProtocolError::FrameTooLarge(_))));
        assert_eq!(buf.len(), LENGTH_PREFIX_SIZE);
    }
}
