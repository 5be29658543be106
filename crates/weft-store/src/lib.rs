//! Encrypted persistence for weft rooms
//!
//! The store maps each room name to one encrypted snapshot file; there
//! is no update log, each flush overwrites. The flush cadence itself
//! (debounce plus ceiling) lives in [`debounce::FlushSchedule`] and is
//! driven by the room registry. Room keys live in the [`keyring`].

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod debounce;
pub mod error;
pub mod keyring;
pub mod snapshot;

pub use debounce::FlushSchedule;
pub use error::{Result, StoreError};
pub use keyring::KeyRing;
pub use snapshot::SnapshotStore;
