//! Relay error types

/// Why a join attempt was refused before a room slot was taken
///
/// Refusals after the slot exists carry a
/// [`CloseReason`](weft_protocol::CloseReason) instead, because they
/// travel on the wire as close codes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JoinError {
    /// Room name fails the slug rules
    BadName,
    /// Registry is at its room cap
    AtCapacity,
}
