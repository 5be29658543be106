//! Protocol error types

use thiserror::Error;

/// Result type alias using ProtocolError
pub type Result<T> = std::result::Result<T, ProtocolError>;

/// Errors from frame or state decoding
///
/// Every variant maps to a `ProtocolViolation` close at the connection
/// layer; the distinctions exist for logs and tests.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ProtocolError {
    /// Zero-length frame
    #[error("empty frame")]
    Empty,

    /// First byte is not a known kind code
    #[error("unknown frame kind 0x{0:02x}")]
    UnknownKind(u8),

    /// Sync frame carries an unknown step code
    #[error("unknown sync step 0x{0:02x}")]
    UnknownStep(u8),

    /// Frame body is shorter than its fixed header requires
    #[error("truncated frame")]
    Truncated,

    /// Ping/Pong frames must be empty
    #[error("unexpected payload on control frame")]
    TrailingBytes,

    /// Payload exceeds the per-kind byte cap
    #[error("{kind} payload of {len} bytes exceeds cap {max}")]
    Oversized {
        /// Frame kind name
        kind: &'static str,
        /// Offending payload length
        len: usize,
        /// Configured cap
        max: usize,
    },

    /// Room name fails the slug rules
    #[error("invalid room name: {0}")]
    BadRoomName(String),
}
