//! Sync step messages and update batches
//!
//! The relay never interprets update bytes; it only frames them. Step 1
//! carries the full encoded document state, step 2 carries the batch of
//! updates the replying side holds, and live updates travel one per
//! frame. Batches are sequences of 4-byte big-endian length-prefixed
//! entries.

use crate::error::{ProtocolError, Result};

/// Step code for SyncStep1 (encoded document state)
pub const STEP_STATE: u8 = 0x01;
/// Step code for SyncStep2 (update batch)
pub const STEP_BATCH: u8 = 0x02;
/// Step code for a single live update
pub const STEP_UPDATE: u8 = 0x03;

/// Payload of a sync frame
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SyncMessage {
    /// SyncStep1: the sender's full encoded document state
    Step1(Vec<u8>),
    /// SyncStep2: batch of updates the sender holds
    Step2(Vec<u8>),
    /// One live update
    Update(Vec<u8>),
}

impl SyncMessage {
    /// Wire step code
    pub fn step(&self) -> u8 {
        match self {
            SyncMessage::Step1(_) => STEP_STATE,
            SyncMessage::Step2(_) => STEP_BATCH,
            SyncMessage::Update(_) => STEP_UPDATE,
        }
    }

    /// Opaque payload bytes
    pub fn payload(&self) -> &[u8] {
        match self {
            SyncMessage::Step1(p) | SyncMessage::Step2(p) | SyncMessage::Update(p) => p,
        }
    }

    /// Build from a wire step code and payload
    pub fn from_wire(step: u8, payload: Vec<u8>) -> Result<Self> {
        match step {
            STEP_STATE => Ok(SyncMessage::Step1(payload)),
            STEP_BATCH => Ok(SyncMessage::Step2(payload)),
            STEP_UPDATE => Ok(SyncMessage::Update(payload)),
            other => Err(ProtocolError::UnknownStep(other)),
        }
    }
}

/// Encode a batch of updates with 4-byte BE length prefixes
pub fn encode_update_batch<U: AsRef<[u8]>>(updates: &[U]) -> Vec<u8> {
    let total: usize = updates.iter().map(|u| 4 + u.as_ref().len()).sum();
    let mut out = Vec::with_capacity(total);
    for update in updates {
        let update = update.as_ref();
        out.extend_from_slice(&(update.len() as u32).to_be_bytes());
        out.extend_from_slice(update);
    }
    out
}

/// Decode a length-prefixed update batch
///
/// Fails with [`ProtocolError::Truncated`] if any prefix runs past the
/// end of the buffer; trailing garbage cannot hide behind a batch.
pub fn decode_update_batch(mut bytes: &[u8]) -> Result<Vec<Vec<u8>>> {
    let mut updates = Vec::new();
    while !bytes.is_empty() {
        if bytes.len() < 4 {
            return Err(ProtocolError::Truncated);
        }
        let len = u32::from_be_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]) as usize;
        bytes = &bytes[4..];
        if bytes.len() < len {
            return Err(ProtocolError::Truncated);
        }
        updates.push(bytes[..len].to_vec());
        bytes = &bytes[len..];
    }
    Ok(updates)
}
