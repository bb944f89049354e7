//! This module contains helpers related to [`musig2`] key aggregation.

use std::collections::BTreeSet;

use musig2::KeyAggContext;
use secp256k1::PublicKey;

use crate::{errors::AggError, pubkey::PublicKeyHex};

/// Minimum number of participants in a shared wallet.
pub const MIN_PARTICIPANTS: usize = 2;

/// Sorts keys into the canonical order used for aggregation.
///
/// The order is the byte-wise order of the compressed serialization, so any permutation of the
/// same key set yields the same output.
pub fn canonical_order(
    public_keys: impl IntoIterator<Item = PublicKeyHex>,
) -> Result<Vec<PublicKeyHex>, AggError> {
    let mut seen = BTreeSet::new();
    for key in public_keys {
        if !seen.insert(key) {
            return Err(AggError::DuplicateKey(key.to_string()));
        }
    }

    if seen.len() < MIN_PARTICIPANTS {
        return Err(AggError::TooFewKeys(seen.len()));
    }

    Ok(seen.into_iter().collect())
}

/// Create an untweaked [`KeyAggContext`] over the canonical ordering of `public_keys`.
pub fn create_agg_ctx(
    public_keys: impl IntoIterator<Item = PublicKeyHex>,
) -> Result<KeyAggContext, AggError> {
    let ordered = canonical_order(public_keys)?;
    let ctx = KeyAggContext::new(ordered.into_iter().map(PublicKey::from))?;

    Ok(ctx)
}

/// Create a [`KeyAggContext`] tweaked for a key-path-only taproot spend.
///
/// This is the context every participant signs with; the resulting signature verifies against
/// the output key of the shared address.
pub fn create_taproot_agg_ctx(
    public_keys: impl IntoIterator<Item = PublicKeyHex>,
) -> Result<KeyAggContext, AggError> {
    Ok(create_agg_ctx(public_keys)?.with_unspendable_taproot_tweak()?)
}
