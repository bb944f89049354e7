//! Errors raised while handling advertisements.

use concord_db::StorageError;
use concord_primitives::{PublicKeyHex, UnixMillis};
use thiserror::Error;

/// Errors from the discovery layer.
#[derive(Debug, Error)]
pub enum DiscoveryError {
    /// The payload is not a well-formed advertisement, including a malformed public key.
    #[error("malformed advertisement: {0}")]
    Malformed(#[from] serde_json::Error),

    /// The advertisement was already dead on arrival.
    #[error("advertisement for {public_key} expired at {expires_at}")]
    Expired {
        /// Advertised key.
        public_key: PublicKeyHex,
        /// Its expiry.
        expires_at: UnixMillis,
    },

    /// The cache could not be persisted.
    #[error("storage: {0}")]
    Storage(#[from] StorageError),
}

/// Result alias for discovery operations.
pub type DiscoveryResult<T> = Result<T, DiscoveryError>;
