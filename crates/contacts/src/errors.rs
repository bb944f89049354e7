//! Contact book errors.

use concord_db::StorageError;
use concord_primitives::AddressError;
use thiserror::Error;

/// Errors from the contact book.
#[derive(Debug, Error)]
pub enum ContactError {
    /// The contact's address is unusable on the active network.
    #[error("address: {0}")]
    Address(#[from] AddressError),

    /// No contact with this id.
    #[error("no contact with id {0}")]
    NotFound(String),

    /// The book could not be persisted.
    #[error("storage: {0}")]
    Storage(#[from] StorageError),
}

/// Result alias for contact operations.
pub type ContactResult<T> = Result<T, ContactError>;
