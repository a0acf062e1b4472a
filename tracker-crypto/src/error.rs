//! Error types for the crypto layer.

use thiserror::Error;

/// Result type for crypto operations.
pub type CryptoResult<T> = Result<T, CryptoError>;

/// Errors that can occur in cryptographic operations.
#[derive(Debug, Error)]
pub enum CryptoError {
    /// A key could not be parsed (bad hex, wrong length, not a curve point).
    #[error("invalid key: {0}")]
    InvalidKey(String),

    /// Pairwise key derivation failed.
    #[error("key derivation failed: {0}")]
    KeyDerivation(String),

    /// Event signing failed.
    #[error("signing failed: {0}")]
    Signing(String),

    /// Encryption failed.
    #[error("encryption failed: {0}")]
    Encryption(String),

    /// Decryption failed (wrong key or tampered data).
    #[error("decryption failed: {0}")]
    Decryption(String),

    /// Invalid key length.
    #[error("invalid key length: expected {expected}, got {actual}")]
    InvalidKeyLength { expected: usize, actual: usize },

    /// Canonical event encoding failed.
    #[error("encoding error: {0}")]
    Encoding(#[from] tracker_types::Error),
}
