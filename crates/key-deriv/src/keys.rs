use bitcoin::Network;
use tracing::{debug, info};
use zeroize::Zeroizing;

use crate::derive::{
    AccountDeriver, AccountLayout, DerivationError, DerivedAccount, Musig2Keypair, Musig2NonceIkm,
    PrimaryKeypair,
};

/// The keys a node derives eagerly at wallet load.
///
/// - PRIMARY: `m/44'/coin'/<primary>'/0/0`
/// - MUSIG2: `m/44'/coin'/<musig2>'/0/0`
/// - MuSig2 nonce IKM: `m/44'/coin'/<musig2>'/666'`
#[derive(Debug)]
pub struct NodeKeys {
    deriver: AccountDeriver,
    primary: DerivedAccount<PrimaryKeypair>,
    musig2: DerivedAccount<Musig2Keypair>,
    nonce_ikm: Musig2NonceIkm,
}

impl NodeKeys {
    /// Derives the node keys from a seed on the calling thread.
    pub fn derive(
        seed: &[u8],
        network: Network,
        layout: AccountLayout,
    ) -> Result<Self, DerivationError> {
        let deriver = AccountDeriver::from_seed(seed, network, layout)?;
        let primary = deriver.primary(false, 0)?;
        let musig2 = deriver.musig2(0)?;
        let nonce_ikm = deriver.musig2_nonce_ikm()?;

        debug_assert_ne!(primary.public_key, musig2.public_key);
        info!(
            %network,
            identity = %primary.public_key,
            signer = %musig2.public_key,
            "derived node keys"
        );

        Ok(Self {
            deriver,
            primary,
            musig2,
            nonce_ikm,
        })
    }

    /// Derives the node keys on tokio's blocking pool so that the HMAC-SHA512 chains do not
    /// stall the async executor.
    pub async fn derive_in_background(
        seed: Zeroizing<Vec<u8>>,
        network: Network,
        layout: AccountLayout,
    ) -> Result<Self, DerivationError> {
        debug!("offloading key derivation");
        tokio::task::spawn_blocking(move || Self::derive(&seed, network, layout))
            .await
            .map_err(|e| DerivationError::Background(e.to_string()))?
    }

    /// The deriver, for additional PRIMARY addresses.
    pub const fn deriver(&self) -> &AccountDeriver {
        &self.deriver
    }

    /// The PRIMARY account at index 0; the node's identity.
    pub const fn primary(&self) -> &DerivedAccount<PrimaryKeypair> {
        &self.primary
    }

    /// The MUSIG2 account at index 0; the node's co-signing key.
    pub const fn musig2(&self) -> &DerivedAccount<Musig2Keypair> {
        &self.musig2
    }

    /// Nonce key material for the MUSIG2 key.
    pub const fn nonce_ikm(&self) -> &Musig2NonceIkm {
        &self.nonce_ikm
    }

    /// The network every address is rendered for.
    pub const fn network(&self) -> Network {
        self.deriver.network()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::AccountPurpose;

    #[test]
    fn node_keys_use_distinct_purposes() {
        let keys = NodeKeys::derive(&[3u8; 32], Network::Signet, AccountLayout::default()).unwrap();

        assert_eq!(keys.primary().purpose, AccountPurpose::Primary);
        assert_eq!(keys.musig2().purpose, AccountPurpose::Musig2);
        assert_ne!(keys.primary().address, keys.musig2().address);
    }

    #[tokio::test]
    async fn background_derivation_matches_inline() {
        let seed = Zeroizing::new(vec![5u8; 32]);
        let inline = NodeKeys::derive(&seed, Network::Regtest, AccountLayout::default()).unwrap();
        let offloaded =
            NodeKeys::derive_in_background(seed, Network::Regtest, AccountLayout::default())
                .await
                .unwrap();

        assert_eq!(inline.musig2().public_key, offloaded.musig2().public_key);
        assert_eq!(**inline.nonce_ikm(), **offloaded.nonce_ikm());
    }
}
