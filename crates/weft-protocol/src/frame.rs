//! Binary frame codec
//!
//! Every WebSocket message is one frame: a single kind byte followed by
//! a kind-specific payload.
//!
//! ```text
//! 0x00  Sync       [step u8][payload]
//! 0x01  Awareness  [client id u32 BE][payload]
//! 0x02  Ping       (empty)
//! 0x03  Pong       (empty)
//! ```
//!
//! Payloads are opaque to the relay; only their length is checked.

use crate::error::{ProtocolError, Result};
use crate::sync::SyncMessage;

/// Kind byte for sync frames
pub const KIND_SYNC: u8 = 0x00;
/// Kind byte for awareness frames
pub const KIND_AWARENESS: u8 = 0x01;
/// Kind byte for ping frames
pub const KIND_PING: u8 = 0x02;
/// Kind byte for pong frames
pub const KIND_PONG: u8 = 0x03;

/// Default cap on a sync payload (one update or one state batch)
pub const DEFAULT_MAX_SYNC: usize = 2 * 1024 * 1024;
/// Cap on an awareness payload
pub const MAX_AWARENESS: usize = 64 * 1024;

/// Per-kind payload byte caps applied while decoding
#[derive(Debug, Clone)]
pub struct FrameLimits {
    /// Cap on sync payloads; tracks the `max-update-bytes` setting
    pub max_sync: usize,
    /// Cap on awareness payloads
    pub max_awareness: usize,
}

impl Default for FrameLimits {
    fn default() -> Self {
        Self {
            max_sync: DEFAULT_MAX_SYNC,
            max_awareness: MAX_AWARENESS,
        }
    }
}

/// A decoded wire frame
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    /// Document synchronization traffic
    Sync(SyncMessage),
    /// Presence state for one client, relayed verbatim.
    /// An empty `state` is the tombstone for that client id.
    Awareness {
        /// Client-chosen random 32-bit id
        client_id: u32,
        /// Opaque presence payload
        state: Vec<u8>,
    },
    /// Liveness probe
    Ping,
    /// Liveness reply
    Pong,
}

impl Frame {
    /// Encode into a wire message
    pub fn encode(&self) -> Vec<u8> {
        match self {
            Frame::Sync(msg) => {
                let payload = msg.payload();
                let mut out = Vec::with_capacity(2 + payload.len());
                out.push(KIND_SYNC);
                out.push(msg.step());
                out.extend_from_slice(payload);
                out
            }
            Frame::Awareness { client_id, state } => {
                let mut out = Vec::with_capacity(5 + state.len());
                out.push(KIND_AWARENESS);
                out.extend_from_slice(&client_id.to_be_bytes());
                out.extend_from_slice(state);
                out
            }
            Frame::Ping => vec![KIND_PING],
            Frame::Pong => vec![KIND_PONG],
        }
    }

    /// Decode a wire message, enforcing the per-kind caps
    pub fn decode(bytes: &[u8], limits: &FrameLimits) -> Result<Self> {
        let (&kind, body) = bytes.split_first().ok_or(ProtocolError::Empty)?;
        match kind {
            KIND_SYNC => {
                let (&step, payload) = body.split_first().ok_or(ProtocolError::Truncated)?;
                if payload.len() > limits.max_sync {
                    return Err(ProtocolError::Oversized {
                        kind: "sync",
                        len: payload.len(),
                        max: limits.max_sync,
                    });
                }
                Ok(Frame::Sync(SyncMessage::from_wire(step, payload.to_vec())?))
            }
            KIND_AWARENESS => {
                if body.len() < 4 {
                    return Err(ProtocolError::Truncated);
                }
                let client_id = u32::from_be_bytes([body[0], body[1], body[2], body[3]]);
                let state = &body[4..];
                if state.len() > limits.max_awareness {
                    return Err(ProtocolError::Oversized {
                        kind: "awareness",
                        len: state.len(),
                        max: limits.max_awareness,
                    });
                }
                Ok(Frame::Awareness {
                    client_id,
                    state: state.to_vec(),
                })
            }
            KIND_PING | KIND_PONG => {
                if !body.is_empty() {
                    return Err(ProtocolError::TrailingBytes);
                }
                Ok(if kind == KIND_PING {
                    Frame::Ping
                } else {
                    Frame::Pong
                })
            }
            other => Err(ProtocolError::UnknownKind(other)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn roundtrip(frame: Frame) {
        let encoded = frame.encode();
        assert_eq!(Frame::decode(&encoded, &FrameLimits::default()).unwrap(), frame);
    }

    #[test]
    fn test_roundtrip_all_kinds() {
        roundtrip(Frame::Sync(SyncMessage::Step1(vec![1, 2, 3])));
        roundtrip(Frame::Sync(SyncMessage::Step2(vec![])));
        roundtrip(Frame::Sync(SyncMessage::Update(vec![0xAA])));
        roundtrip(Frame::Awareness {
            client_id: 0xDEADBEEF,
            state: b"cursor".to_vec(),
        });
        roundtrip(Frame::Awareness {
            client_id: 7,
            state: vec![],
        });
        roundtrip(Frame::Ping);
        roundtrip(Frame::Pong);
    }

    #[test]
    fn test_wire_layout() {
        let bytes = Frame::Sync(SyncMessage::Update(vec![0xAA])).encode();
        assert_eq!(bytes, vec![0x00, 0x03, 0xAA]);

        let bytes = Frame::Awareness {
            client_id: 1,
            state: vec![0xBB],
        }
        .encode();
        assert_eq!(bytes, vec![0x01, 0, 0, 0, 1, 0xBB]);

        assert_eq!(Frame::Ping.encode(), vec![0x02]);
        assert_eq!(Frame::Pong.encode(), vec![0x03]);
    }

    #[test]
    fn test_empty_frame_rejected() {
        assert_eq!(
            Frame::decode(&[], &FrameLimits::default()).unwrap_err(),
            ProtocolError::Empty
        );
    }

    #[test]
    fn test_unknown_kind_rejected() {
        assert_eq!(
            Frame::decode(&[0x7F], &FrameLimits::default()).unwrap_err(),
            ProtocolError::UnknownKind(0x7F)
        );
    }

    #[test]
    fn test_truncated_frames_rejected() {
        let limits = FrameLimits::default();
        // Sync with no step byte
        assert_eq!(
            Frame::decode(&[KIND_SYNC], &limits).unwrap_err(),
            ProtocolError::Truncated
        );
        // Awareness with a partial client id
        assert_eq!(
            Frame::decode(&[KIND_AWARENESS, 0, 0], &limits).unwrap_err(),
            ProtocolError::Truncated
        );
    }

    #[test]
    fn test_ping_with_payload_rejected() {
        assert_eq!(
            Frame::decode(&[KIND_PING, 0x00], &FrameLimits::default()).unwrap_err(),
            ProtocolError::TrailingBytes
        );
    }

    #[test]
    fn test_oversized_sync_rejected() {
        let limits = FrameLimits {
            max_sync: 4,
            max_awareness: MAX_AWARENESS,
        };
        let frame = Frame::Sync(SyncMessage::Update(vec![0u8; 5])).encode();
        assert!(matches!(
            Frame::decode(&frame, &limits).unwrap_err(),
            ProtocolError::Oversized { kind: "sync", len: 5, max: 4 }
        ));
    }

    #[test]
    fn test_oversized_awareness_rejected() {
        let frame = Frame::Awareness {
            client_id: 1,
            state: vec![0u8; MAX_AWARENESS + 1],
        }
        .encode();
        assert!(matches!(
            Frame::decode(&frame, &FrameLimits::default()).unwrap_err(),
            ProtocolError::Oversized { kind: "awareness", .. }
        ));
    }
}
