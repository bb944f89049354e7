//! Errors shared by every crate in the workspace.

use musig2::errors::{KeyAggError, TweakError};
use thiserror::Error;

/// The reason a public key string was rejected.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyFormatFault {
    /// Not exactly 66 hex characters.
    Length(usize),

    /// Does not start with `02` or `03`.
    Prefix,

    /// Contains non-hex characters.
    NotHex,

    /// Well-formed, but not a point on secp256k1.
    NotOnCurve,
}

/// A malformed compressed public key.
///
/// Rejected before any derivation or storage takes place.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("invalid public key {input:?}: {fault:?}")]
pub struct InvalidPublicKey {
    /// The offending input.
    pub input: String,

    /// What is wrong with it.
    pub fault: KeyFormatFault,
}

/// Address parsing failures.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AddressError {
    /// The string is not an address at all.
    #[error("unparseable address {0:?}")]
    Unparseable(String),

    /// The address belongs to a different network.
    #[error("address {0:?} is not valid for the active network")]
    WrongNetwork(String),
}

/// Errors encountered while building a MuSig2 key aggregation context.
#[derive(Debug, Error)]
pub enum AggError {
    /// Fewer keys than a shared wallet requires.
    #[error("at least two keys are required, got {0}")]
    TooFewKeys(usize),

    /// The same key appears more than once.
    #[error("duplicate key {0}")]
    DuplicateKey(String),

    /// Aggregation produced a degenerate point.
    #[error("key aggregation failed: {0}")]
    KeyAgg(#[from] KeyAggError),

    /// Taproot tweaking produced a degenerate point.
    #[error("taproot tweak failed: {0}")]
    Tweak(#[from] TweakError),
}
