//! Error types for the sync layer.

use crate::transport::RelayRejection;
use thiserror::Error;

/// Result type for sync operations.
pub type SyncResult<T> = Result<T, SyncError>;

/// Errors that can occur in sync operations.
#[derive(Debug, Error)]
pub enum SyncError {
    /// A relay could not be reached or refused a request.
    #[error("transport error: {0}")]
    Transport(String),

    /// Every relay rejected a publish.
    #[error("no relay accepted the event ({} rejections)", failures.len())]
    AllRelaysFailed { failures: Vec<RelayRejection> },

    /// Bad signature, or the author is not who the event claims.
    #[error("authentication error: {0}")]
    Authentication(String),

    /// Gift wrap could not be opened (wrong key, corrupt ciphertext, bad inner JSON).
    #[error("decryption error: {0}")]
    Decryption(String),

    /// A directive referred to an entity that is not stored locally.
    #[error("cascade inconsistency: {0}")]
    CascadeInconsistency(String),

    /// Event is well-signed but its content does not describe the entity it claims to.
    #[error("invalid event: {0}")]
    InvalidEvent(String),

    /// The event kind cannot be decoded into the requested entity.
    #[error("unsupported event kind: {0}")]
    UnsupportedKind(u32),

    /// Entity not found locally.
    #[error("not found: {0}")]
    NotFound(String),

    /// A new entity's uuid is already stored.
    #[error("already exists: {0}")]
    AlreadyExists(String),

    /// Storage error.
    #[error("storage error: {0}")]
    Storage(#[from] tracker_storage::StorageError),

    /// Crypto error.
    #[error("crypto error: {0}")]
    Crypto(#[from] tracker_crypto::CryptoError),

    /// Serialization error.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Configuration error.
    #[error("configuration error: {0}")]
    Config(String),

    /// Background task panicked or was cancelled.
    #[error("task failed: {0}")]
    Task(String),

    /// The cascade controller stopped listening for directives.
    #[error("directive channel closed")]
    ChannelClosed,
}

impl From<tokio::task::JoinError> for SyncError {
    fn from(err: tokio::task::JoinError) -> Self {
        Self::Task(err.to_string())
    }
}
