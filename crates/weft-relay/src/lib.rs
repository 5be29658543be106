//! weft relay daemon
//!
//! The collaborative-editing relay core: rooms of WebSocket clients
//! exchanging opaque CRDT updates, an HMAC token gate per room,
//! encrypted debounce-flushed persistence, and outbound bridging to a
//! public relay. The binary in `main.rs` wires these modules together;
//! everything is exported here so integration tests drive the same
//! code paths.

#![forbid(unsafe_code)]

pub mod auth;
pub mod bridges;
pub mod config;
pub mod connection;
pub mod error;
pub mod keychannel;
pub mod peer;
pub mod registry;
pub mod room;
pub mod server;

pub use config::RelayConfig;
pub use error::JoinError;
pub use registry::{RegistrySettings, RoomRegistry};
pub use server::AppState;
