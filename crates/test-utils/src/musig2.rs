//! Test-only MuSig2 signer with counter-based nonce generation.
//!
//! **FOR TESTING ONLY - DO NOT USE IN PRODUCTION**

use concord_primitives::PublicKeyHex;
use musig2::{
    sign_partial, AggNonce, KeyAggContext, PartialSignature, PubNonce, SecNonce, SecNonceBuilder,
};
use secp256k1::{Message, PublicKey, SecretKey, SECP256K1};

use crate::keys::secret_key;

/// A raw-key MuSig2 participant, used to play the remote co-signers of a session.
///
/// Uses a nonce counter to participate in multiple rounds. The same counter must be used for
/// both [`Self::pubnonce`] and [`Self::sign`] within one round.
#[derive(Debug)]
pub struct TestMusigSigner {
    idx: u8,
    secret_key: SecretKey,
    public_key: PublicKey,
}

impl TestMusigSigner {
    /// Creates the signer whose secret key is [`secret_key`]`(idx)`.
    pub fn new(idx: u8) -> Self {
        let secret_key = secret_key(idx);
        Self {
            idx,
            secret_key,
            public_key: secret_key.public_key(SECP256K1),
        }
    }

    fn nonce_seed(&self, nonce_counter: u64) -> [u8; 32] {
        let mut seed = [0x42u8; 32];
        seed[0] = self.idx;
        seed[1..9].copy_from_slice(&nonce_counter.to_be_bytes());
        seed
    }

    fn secnonce(&self, agg_pubkey: PublicKey, nonce_counter: u64) -> SecNonce {
        SecNonceBuilder::from_seckey(self.nonce_seed(nonce_counter), self.secret_key)
            .with_aggregated_pubkey(agg_pubkey)
            .with_extra_input(&[self.idx])
            .build()
    }

    /// The public nonce for a round.
    pub fn pubnonce(&self, agg_pubkey: PublicKey, nonce_counter: u64) -> PubNonce {
        self.secnonce(agg_pubkey, nonce_counter).public_nonce()
    }

    /// Signs for a round. Must use the same `nonce_counter` as [`Self::pubnonce`].
    pub fn sign(
        &self,
        key_agg_ctx: &KeyAggContext,
        nonce_counter: u64,
        agg_nonce: &AggNonce,
        message: Message,
    ) -> PartialSignature {
        let secnonce = self.secnonce(key_agg_ctx.aggregated_pubkey(), nonce_counter);

        sign_partial(
            key_agg_ctx,
            self.secret_key,
            secnonce,
            agg_nonce,
            message.as_ref(),
        )
        .expect("signing must succeed")
    }

    /// The signer's key.
    pub fn pubkey(&self) -> PublicKeyHex {
        self.public_key.into()
    }
}

/// Signers for `1..=count`.
pub fn test_signers(count: u8) -> Vec<TestMusigSigner> {
    (1..=count).map(TestMusigSigner::new).collect()
}
