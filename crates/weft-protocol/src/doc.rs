//! Opaque document state
//!
//! The relay holds each room's "CRDT document" as an append-only set of
//! opaque updates, deduplicated by BLAKE3 digest. Replaying an update
//! (bridge reconnects, client re-syncs) is a no-op, which is what makes
//! fan-out idempotent without ever parsing a payload. The encoded form
//! is simultaneously the SyncStep1 payload and the snapshot plaintext
//! handed to the persistence store.

use std::collections::HashSet;

use bytes::Bytes;

use crate::error::Result;
use crate::sync::{decode_update_batch, encode_update_batch};

/// In-memory document state for one room
#[derive(Debug, Default, Clone)]
pub struct DocState {
    updates: Vec<Bytes>,
    digests: HashSet<[u8; 32]>,
    total_bytes: usize,
}

impl DocState {
    /// Empty document
    pub fn new() -> Self {
        Self::default()
    }

    /// Apply one opaque update
    ///
    /// Returns `false` (and changes nothing) when the identical update
    /// was applied before.
    pub fn apply(&mut self, update: &[u8]) -> bool {
        let digest = *blake3::hash(update).as_bytes();
        if !self.digests.insert(digest) {
            return false;
        }
        self.total_bytes += update.len();
        self.updates.push(Bytes::copy_from_slice(update));
        true
    }

    /// Encoded full state: every update, length-prefixed, in apply order
    pub fn encode(&self) -> Vec<u8> {
        encode_update_batch(&self.updates)
    }

    /// Rebuild state from its encoded form
    pub fn decode(bytes: &[u8]) -> Result<Self> {
        let mut doc = Self::new();
        for update in decode_update_batch(bytes)? {
            doc.apply(&update);
        }
        Ok(doc)
    }

    /// Number of distinct updates held
    pub fn update_count(&self) -> usize {
        self.updates.len()
    }

    /// Total payload bytes held (excluding framing)
    pub fn byte_len(&self) -> usize {
        self.total_bytes
    }

    /// Whether any update has been applied
    pub fn is_empty(&self) -> bool {
        self.updates.is_empty()
    }
}
