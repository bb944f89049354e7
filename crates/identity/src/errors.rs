use concord_db::StorageError;
use concord_primitives::{InvalidPublicKey, PublicKeyHex};
use thiserror::Error;

/// Errors returned by the identity store.
#[derive(Debug, Error)]
pub enum IdentityError {
    /// The key is malformed.
    #[error(transparent)]
    InvalidPublicKey(#[from] InvalidPublicKey),

    /// No identity exists for the key.
    #[error("no identity for {0}")]
    NotFound(PublicKeyHex),

    /// A structural change could not be persisted. The in-memory change stands and will be
    /// retried by the next flush.
    #[error("persisting identities failed: {0}")]
    Storage(#[from] StorageError),
}

/// Result type for identity store operations.
pub type IdentityResult<T> = Result<T, IdentityError>;
