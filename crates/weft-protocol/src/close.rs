//! WebSocket close codes
//!
//! Auth failures share code 4403 with distinct reason strings; a
//! correct client treats either as non-retriable.

/// Reason a connection was closed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CloseReason {
    /// Clean shutdown initiated by either side
    Normal,
    /// The room was destroyed while the connection was open
    RoomClosed,
    /// Malformed or oversized frame, or an invalid room name
    ProtocolViolation,
    /// Liveness or sync deadline missed
    Timeout,
    /// Outbound queue exceeded its byte budget
    BackpressureExceeded,
    /// Room requires a token and none was supplied
    AuthRequired,
    /// Supplied token differs from the registered one
    AuthMismatch,
}

/// Close code used when the bridge must stop retrying permanently
pub const CLOSE_AUTH: u16 = 4403;

impl CloseReason {
    /// Numeric WebSocket close code
    pub fn code(self) -> u16 {
        match self {
            CloseReason::Normal => 1000,
            CloseReason::RoomClosed => 1001,
            CloseReason::ProtocolViolation => 4001,
            CloseReason::Timeout => 4002,
            CloseReason::BackpressureExceeded => 4003,
            CloseReason::AuthRequired | CloseReason::AuthMismatch => CLOSE_AUTH,
        }
    }

    /// Reason string carried in the close frame
    pub fn as_str(self) -> &'static str {
        match self {
            CloseReason::Normal => "normal",
            CloseReason::RoomClosed => "room closed",
            CloseReason::ProtocolViolation => "protocol violation",
            CloseReason::Timeout => "timeout",
            CloseReason::BackpressureExceeded => "backpressure exceeded",
            CloseReason::AuthRequired => "auth required",
            CloseReason::AuthMismatch => "auth mismatch",
        }
    }
}
