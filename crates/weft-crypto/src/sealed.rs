//! Sealed blobs — padded, authenticated encryption for room snapshots
//!
//! Blob layout:
//!
//! ```text
//! nonce (24B) || XChaCha20-Poly1305( len (4B BE) || payload || zero pad ) || tag (16B)
//! ```
//!
//! The plaintext is padded to the next 4096-byte multiple before
//! encryption, so observable ciphertext length reveals only
//! `ceil((4 + len) / 4096)`. A fresh random nonce is drawn per call;
//! sealing the same plaintext twice never yields the same blob.

use chacha20poly1305::{
    aead::{Aead, KeyInit, OsRng},
    AeadCore, XChaCha20Poly1305, XNonce,
};
use zeroize::Zeroize;

use crate::error::{CryptoError, Result};
use crate::key::RoomKey;

/// Nonce length in bytes (XChaCha20)
pub const NONCE_LEN: usize = 24;

/// Poly1305 authentication tag length in bytes
pub const TAG_LEN: usize = 16;

/// Padding bucket size in bytes
pub const PAD_BLOCK: usize = 4096;

/// Maximum plaintext accepted by [`seal`]
pub const MAX_PLAINTEXT: usize = 100 * 1024 * 1024;

/// Smallest blob that can possibly decrypt: nonce, tag, one ciphertext byte
pub const MIN_BLOB_LEN: usize = NONCE_LEN + TAG_LEN + 1;

/// Padded plaintext length for a payload of `len` bytes
fn padded_len(len: usize) -> usize {
    (4 + len).div_ceil(PAD_BLOCK) * PAD_BLOCK
}

/// Encrypt a payload into a sealed blob
///
/// # Errors
///
/// [`CryptoError::TooLarge`] above [`MAX_PLAINTEXT`]. Key validity is
/// enforced by [`RoomKey`] construction.
pub fn seal(key: &RoomKey, plaintext: &[u8]) -> Result<Vec<u8>> {
    if plaintext.len() > MAX_PLAINTEXT {
        return Err(CryptoError::TooLarge {
            size: plaintext.len(),
            max: MAX_PLAINTEXT,
        });
    }

    let mut padded = vec![0u8; padded_len(plaintext.len())];
    padded[..4].copy_from_slice(&(plaintext.len() as u32).to_be_bytes());
    padded[4..4 + plaintext.len()].copy_from_slice(plaintext);

    let cipher = XChaCha20Poly1305::new(key.as_bytes().into());
    let nonce = XChaCha20Poly1305::generate_nonce(&mut OsRng);
    let ciphertext = cipher
        .encrypt(&nonce, padded.as_slice())
        .map_err(|e| CryptoError::Encryption(e.to_string()));
    padded.zeroize();
    let ciphertext = ciphertext?;

    let mut blob = Vec::with_capacity(NONCE_LEN + ciphertext.len());
    blob.extend_from_slice(nonce.as_slice());
    blob.extend_from_slice(&ciphertext);
    Ok(blob)
}

/// Decrypt a sealed blob back to the original payload
///
/// # Errors
///
/// [`CryptoError::Malformed`] for blobs shorter than [`MIN_BLOB_LEN`];
/// [`CryptoError::AuthFail`] for any tampered byte, truncation, or
/// wrong key, without distinguishing which.
pub fn open(key: &RoomKey, blob: &[u8]) -> Result<Vec<u8>> {
    if blob.len() < MIN_BLOB_LEN {
        return Err(CryptoError::Malformed);
    }

    let (nonce, ciphertext) = blob.split_at(NONCE_LEN);
    let cipher = XChaCha20Poly1305::new(key.as_bytes().into());
    let mut padded = cipher
        .decrypt(XNonce::from_slice(nonce), ciphertext)
        .map_err(|_| CryptoError::AuthFail)?;

    // The tag authenticated the padding, so a bad length prefix here
    // means the blob was produced by a different sealer.
    if padded.len() < 4 {
        padded.zeroize();
        return Err(CryptoError::Malformed);
    }
    let len = u32::from_be_bytes([padded[0], padded[1], padded[2], padded[3]]) as usize;
    if len > padded.len() - 4 {
        padded.zeroize();
        return Err(CryptoError::Malformed);
    }

    let payload = padded[4..4 + len].to_vec();
    padded.zeroize();
    Ok(payload)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key(fill: u8) -> RoomKey {
        let mut raw = [fill; 32];
        raw[31] = raw[31].wrapping_add(1);
        RoomKey::from_bytes(raw).unwrap()
    }

    #[test]
    fn test_roundtrip() {
        let k = key(0);
        for payload in [&b""[..], b"x", b"hello world", &[0xAB; 5000]] {
            let blob = seal(&k, payload).unwrap();
            assert_eq!(open(&k, &blob).unwrap(), payload);
        }
    }

    #[test]
    fn test_fresh_nonce_per_call() {
        let k = key(0);
        let a = seal(&k, b"same plaintext").unwrap();
        let b = seal(&k, b"same plaintext").unwrap();
        assert_ne!(a, b);
    }

    #[test]
    fn test_blob_length_buckets() {
        let k = key(0);
        // 0..=4091 payload bytes pad to one 4096 bucket
        let one = NONCE_LEN + PAD_BLOCK + TAG_LEN;
        assert_eq!(seal(&k, b"").unwrap().len(), one);
        assert_eq!(seal(&k, &[0u8; 4092 - 1]).unwrap().len(), one);
        // 4092 payload bytes tip into the second bucket
        assert_eq!(seal(&k, &[0u8; 4092]).unwrap().len(), one + PAD_BLOCK);
    }

    #[test]
    fn test_too_large_rejected() {
        let err = seal(&key(0), &vec![0u8; MAX_PLAINTEXT + 1]).unwrap_err();
        assert!(matches!(err, CryptoError::TooLarge { .. }));
    }

    #[test]
    fn test_short_blob_malformed() {
        let k = key(0);
        assert_eq!(open(&k, &[]).unwrap_err(), CryptoError::Malformed);
        assert_eq!(
            open(&k, &[0u8; MIN_BLOB_LEN - 1]).unwrap_err(),
            CryptoError::Malformed
        );
    }

    #[test]
    fn test_tamper_any_byte_auth_fail() {
        let k = key(0);
        let blob = seal(&k, b"payload").unwrap();
        for i in [0, NONCE_LEN, blob.len() - 1] {
            let mut bad = blob.clone();
            bad[i] ^= 0x01;
            assert_eq!(open(&k, &bad).unwrap_err(), CryptoError::AuthFail);
        }
    }

    #[test]
    fn test_truncation_auth_fail() {
        let k = key(0);
        let blob = seal(&k, b"payload").unwrap();
        assert_eq!(
            open(&k, &blob[..blob.len() - 1]).unwrap_err(),
            CryptoError::AuthFail
        );
    }

    #[test]
    fn test_wrong_key_auth_fail() {
        let blob = seal(&key(1), b"payload").unwrap();
        assert_eq!(open(&key(2), &blob).unwrap_err(), CryptoError::AuthFail);
    }
}
