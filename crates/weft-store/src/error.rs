//! Store error types

use thiserror::Error;

/// Result type alias using StoreError
pub type Result<T> = std::result::Result<T, StoreError>;

/// Errors from the snapshot store and key ring
#[derive(Error, Debug)]
pub enum StoreError {
    /// Filesystem failure
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Seal or open failure on a snapshot blob
    #[error(transparent)]
    Crypto(#[from] weft_crypto::CryptoError),

    /// A background seal/open task was cancelled or panicked
    #[error("crypto task failed: {0}")]
    Task(String),

    /// Key file could not be parsed
    #[error("key file error: {0}")]
    KeyFile(String),
}
