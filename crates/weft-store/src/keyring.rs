//! Per-room key ring
//!
//! Holds the 32-byte symmetric key for each room the process knows
//! about. Keys arrive over the sidecar channel at any time, or from an
//! optional key file at startup. Values are zeroized on drop by
//! [`RoomKey`] itself.

use std::collections::HashMap;
use std::path::Path;

use dashmap::DashMap;
use tracing::warn;
use weft_crypto::RoomKey;

use crate::error::{Result, StoreError};

/// Concurrent map of room name to room key
#[derive(Debug, Default)]
pub struct KeyRing {
    keys: DashMap<String, RoomKey>,
}

impl KeyRing {
    /// Empty key ring
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace a room's key. Returns `true` if a key for the
    /// room already existed.
    pub fn insert(&self, room: &str, key: RoomKey) -> bool {
        self.keys.insert(room.to_string(), key).is_some()
    }

    /// Fetch a room's key
    pub fn get(&self, room: &str) -> Option<RoomKey> {
        self.keys.get(room).map(|k| k.clone())
    }

    /// Drop a room's key
    pub fn remove(&self, room: &str) {
        self.keys.remove(room);
    }

    /// Number of rooms with a known key
    pub fn len(&self) -> usize {
        self.keys.len()
    }

    /// Whether the ring holds no keys
    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }

    /// Load keys from a JSON file of `{ "roomName": "<base64 key>" }`
    ///
    /// Individual undecodable entries are skipped with a warning so one
    /// bad line cannot take every other room's persistence down with
    /// it. Returns the number of keys loaded.
    pub fn load_key_file(&self, path: &Path) -> Result<usize> {
        let raw = std::fs::read_to_string(path)?;
        let entries: HashMap<String, String> =
            serde_json::from_str(&raw).map_err(|e| StoreError::KeyFile(e.to_string()))?;

        let mut loaded = 0;
        for (room, encoded) in entries {
            match RoomKey::from_base64(&encoded) {
                Ok(key) => {
                    self.insert(&room, key);
                    loaded += 1;
                }
                Err(e) => warn!(room = %room, error = %e, "skipping undecodable key entry"),
            }
        }
        Ok(loaded)
    }
}
