//! Outbound relay bridge client for weft
//!
//! Maintains one WebSocket client per bridged room against an external
//! relay: key-gated connection, exponential backoff with a pause after
//! ten consecutive failures, and a terminal state on auth rejection.
//! The server side of the protocol lives in `weft-relay`; this crate
//! only dials out.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod backoff;
pub mod bridge;
pub mod dial;
pub mod error;

pub use backoff::BackoffPolicy;
pub use bridge::{
    spawn as spawn_bridge, BridgeCommand, BridgeConfig, BridgeInbound, BridgeState, RoomLink,
    CONNECT_TIMEOUT,
};
pub use dial::{dial, WsSink, WsSource};
pub use error::{NetError, Result};
