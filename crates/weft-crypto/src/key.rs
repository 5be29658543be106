//! Room key material
//!
//! A [`RoomKey`] is the 32-byte symmetric key shared by a room's
//! participants. It encrypts the room's at-rest snapshot and keys the
//! join-token HMAC. Keys are wiped from memory on drop.

use base64::{engine::general_purpose, Engine as _};
use zeroize::{Zeroize, ZeroizeOnDrop};

use crate::error::{CryptoError, Result};

/// Length of a room key in bytes
pub const KEY_LEN: usize = 32;

/// 32-byte symmetric room key, zeroized on drop
#[derive(Clone, PartialEq, Eq, Zeroize, ZeroizeOnDrop)]
pub struct RoomKey([u8; KEY_LEN]);

impl RoomKey {
    /// Create a key from raw bytes
    ///
    /// Rejects the all-zero pattern: it is the most common artifact of
    /// uninitialized or wiped key buffers, and accepting it would let a
    /// cleared key silently encrypt data.
    pub fn from_bytes(bytes: [u8; KEY_LEN]) -> Result<Self> {
        if bytes.iter().all(|&b| b == 0) {
            return Err(CryptoError::InvalidKey("all-zero key"));
        }
        Ok(Self(bytes))
    }

    /// Create a key from a byte slice, which must be exactly 32 bytes
    pub fn from_slice(bytes: &[u8]) -> Result<Self> {
        let arr: [u8; KEY_LEN] = bytes
            .try_into()
            .map_err(|_| CryptoError::InvalidKey("key must be 32 bytes"))?;
        Self::from_bytes(arr)
    }

    /// Decode a key from standard base64 (the sidecar channel and key
    /// file encoding)
    pub fn from_base64(encoded: &str) -> Result<Self> {
        let raw = general_purpose::STANDARD
            .decode(encoded.trim())
            .map_err(|e| CryptoError::Encoding(e.to_string()))?;
        Self::from_slice(&raw)
    }

    /// Raw key bytes
    pub fn as_bytes(&self) -> &[u8; KEY_LEN] {
        &self.0
    }
}

// Key material must never reach logs.
impl std::fmt::Debug for RoomKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("RoomKey(..)")
    }
}
