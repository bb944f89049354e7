//! Deterministic key aggregation.
//!
//! Keys are sorted into their canonical order before aggregation, so the aggregate is a pure
//! function of the key *set*. The aggregate is the untweaked internal key; the shared address
//! is its key-path-only Taproot output, and sessions sign with the matching
//! unspendable-taproot-tweaked context.

use bitcoin::{Address, Network};
use concord_primitives::{
    key_agg::{canonical_order, create_agg_ctx, create_taproot_agg_ctx},
    p2tr_address, PublicKeyHex,
};
use musig2::KeyAggContext;
use secp256k1::PublicKey;

use crate::errors::AggregationError;

/// The aggregate of a set of participant keys.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AggregatedKey {
    aggregated: PublicKeyHex,
    participants: Vec<PublicKeyHex>,
}

impl AggregatedKey {
    /// The untweaked aggregate key.
    pub const fn public_key(&self) -> PublicKeyHex {
        self.aggregated
    }

    /// Participant keys in canonical order.
    pub fn participants(&self) -> &[PublicKeyHex] {
        &self.participants
    }

    /// The shared address on `network`.
    pub fn address(&self, network: Network) -> Address {
        p2tr_address(self.aggregated.x_only(), network)
    }

    /// The context every participant signs with.
    pub fn signing_context(&self) -> Result<KeyAggContext, AggregationError> {
        Ok(create_taproot_agg_ctx(self.participants.iter().copied())?)
    }
}

/// Aggregates `keys` into a shared key. Order-independent; fails on fewer than two keys,
/// duplicates, or a degenerate aggregate.
pub fn aggregate(
    keys: impl IntoIterator<Item = PublicKeyHex>,
) -> Result<AggregatedKey, AggregationError> {
    let participants = canonical_order(keys)?;
    let ctx = create_agg_ctx(participants.iter().copied())?;
    let aggregated: PublicKey = ctx.aggregated_pubkey();

    Ok(AggregatedKey {
        aggregated: aggregated.into(),
        participants,
    })
}

#[cfg(test)]
mod tests {
    use concord_primitives::AggError;
    use concord_test_utils::keys::pubkeys;
    use proptest::prelude::*;

    use super::*;

    #[test]
    fn address_matches_signing_key() {
        let agg = aggregate(pubkeys(3)).unwrap();
        let ctx = agg.signing_context().unwrap();
        let output_key: PublicKey = ctx.aggregated_pubkey();

        let address = agg.address(Network::Regtest);
        let expected = bitcoin::key::TweakedPublicKey::dangerous_assume_tweaked(
            output_key.x_only_public_key().0,
        );
        assert_eq!(address, Address::p2tr_tweaked(expected, Network::Regtest));

        // Sanity: the tweak moved the key.
        assert_ne!(output_key.x_only_public_key().0, agg.public_key().x_only());
    }

    #[test]
    fn rejects_degenerate_sets() {
        assert!(matches!(
            aggregate(pubkeys(1)),
            Err(AggregationError::Keys(AggError::TooFewKeys(1)))
        ));

        let mut keys = pubkeys(2);
        keys.push(keys[1]);
        assert!(matches!(
            aggregate(keys),
            Err(AggregationError::Keys(AggError::DuplicateKey(_)))
        ));
    }

    proptest! {
        // Any permutation of the same set aggregates identically.
        #[test]
        fn permutation_invariant(n in 2u8..=7, seed in any::<u64>()) {
            let keys = pubkeys(n);
            let mut shuffled = keys.clone();
            // Deterministic Fisher-Yates driven by the proptest seed.
            let mut state = seed;
            for i in (1..shuffled.len()).rev() {
                state = state.wrapping_mul(6364136223846793005).wrapping_add(1442695040888963407);
                let j = (state >> 33) as usize % (i + 1);
                shuffled.swap(i, j);
            }

            let a = aggregate(keys).unwrap();
            let b = aggregate(shuffled).unwrap();
            prop_assert_eq!(a.public_key(), b.public_key());
            prop_assert_eq!(a.address(Network::Bitcoin), b.address(Network::Bitcoin));
        }
    }
}
