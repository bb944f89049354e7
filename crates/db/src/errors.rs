use thiserror::Error;

/// Errors that can occur when interacting with durable storage.
#[derive(Debug, Error)]
pub enum StorageError {
    /// An error occurred in the sled backend.
    #[error("sled: {0}")]
    Sled(#[from] sled::Error),

    /// A snapshot could not be encoded.
    #[error("serialization: {0}")]
    Serialization(#[from] serde_json::Error),

    /// A stored snapshot could not be decoded.
    ///
    /// Load paths recover from this by discarding the value; it is never fatal.
    #[error("corrupt value under {key:?}: {reason}")]
    CacheCorruption {
        /// The storage key holding the corrupt value.
        key: String,
        /// Why decoding failed.
        reason: String,
    },
}

/// Result type for storage operations.
pub type DbResult<T> = Result<T, StorageError>;
