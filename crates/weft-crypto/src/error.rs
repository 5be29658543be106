//! Error types for cryptographic operations

use thiserror::Error;

/// Result type alias using CryptoError
pub type Result<T> = std::result::Result<T, CryptoError>;

/// Errors that can occur during cryptographic operations
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CryptoError {
    /// Key material is not a usable 32-byte key
    #[error("invalid key: {0}")]
    InvalidKey(&'static str),

    /// Plaintext exceeds the sealed-blob size cap
    #[error("plaintext too large: {size} bytes (cap {max})")]
    TooLarge {
        /// Size of the rejected plaintext
        size: usize,
        /// Maximum accepted size
        max: usize,
    },

    /// Blob is structurally impossible (too short to contain nonce,
    /// tag, and at least one ciphertext byte)
    #[error("malformed blob")]
    Malformed,

    /// Authentication failed: tampering, truncation, or wrong key.
    /// Deliberately carries no detail about which.
    #[error("decryption failed")]
    AuthFail,

    /// AEAD backend refused to encrypt
    #[error("encryption failed: {0}")]
    Encryption(String),

    /// Input was not valid base64 for the expected encoding
    #[error("invalid encoding: {0}")]
    Encoding(String),
}
