//! Core derivation functions for node keys.
//!
//! Provides opaque wrapper types for derived keys. These types can only be constructed through
//! derivation, so a key's purpose is known from its type. In particular a [`Musig2Keypair`] can
//! never be obtained from the PRIMARY account, and signing code that takes one cannot be handed
//! the spending key.
//!
//! # Usage
//!
//! ```rust,ignore
//! use bitcoin::Network;
//! use concord_key_deriv::{AccountDeriver, AccountLayout};
//!
//! let deriver = AccountDeriver::from_seed(&seed, Network::Signet, AccountLayout::default())?;
//! let receive = deriver.primary(false, 0)?;
//! let signing = deriver.musig2(0)?;
//! assert_ne!(receive.public_key, signing.public_key);
//! ```

use std::{fmt, ops::Deref};

use bitcoin::{
    bip32::{self, ChildNumber, DerivationPath, Xpriv},
    key::Keypair,
    Address, Network, ScriptBuf,
};
use concord_primitives::{identity_address, PublicKeyHex};
use secp256k1::SECP256K1;
use zeroize::{Zeroize, ZeroizeOnDrop};

use crate::paths::{coin_type, BIP44_DEPTH, BIP44_PURPOSE_IDX, MUSIG2_NONCE_IKM_IDX};

/// Smallest seed BIP32 accepts, in bytes.
pub const MIN_SEED_LEN: usize = 16;

/// Largest seed BIP32 accepts, in bytes.
pub const MAX_SEED_LEN: usize = 64;

/// Error type for key derivation operations.
#[derive(Debug, thiserror::Error)]
pub enum DerivationError {
    /// BIP32 derivation failed.
    #[error("BIP32 derivation error: {0}")]
    Bip32(#[from] bip32::Error),

    /// The seed has an unusable length or encoding.
    #[error("invalid seed: {0}")]
    InvalidSeed(String),

    /// An index does not fit in the 31 bits BIP32 allows.
    #[error("index {0} is out of range")]
    IndexOutOfRange(u32),

    /// Two purposes were mapped to the same account.
    #[error("account {0} is assigned to more than one purpose")]
    AccountCollision(u32),

    /// The path does not have the `purpose'/coin'/account'/change/index` shape.
    #[error("invalid derivation path {path}: {reason}")]
    InvalidPath {
        /// The rejected path.
        path: String,
        /// What is wrong with it.
        reason: &'static str,
    },

    /// The background derivation task died.
    #[error("background derivation failed: {0}")]
    Background(String),
}

/// What a derived account is allowed to be used for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum AccountPurpose {
    /// Spending, receiving and identity.
    Primary,

    /// Multi-party signing and advertisement only. Never receives funds.
    Musig2,
}

impl fmt::Display for AccountPurpose {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AccountPurpose::Primary => f.write_str("primary"),
            AccountPurpose::Musig2 => f.write_str("musig2"),
        }
    }
}

/// Maps each [`AccountPurpose`] to its BIP44 account number.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AccountLayout {
    primary: u32,
    musig2: u32,
}

impl AccountLayout {
    /// Creates a layout, rejecting any assignment where two purposes share an account.
    pub fn new(primary: u32, musig2: u32) -> Result<Self, DerivationError> {
        debug_assert_ne!(primary, musig2, "purposes must not share an account");
        if primary == musig2 {
            return Err(DerivationError::AccountCollision(primary));
        }
        for idx in [primary, musig2] {
            check_index(idx)?;
        }

        Ok(Self { primary, musig2 })
    }

    /// The account number used for `purpose`.
    pub const fn account(&self, purpose: AccountPurpose) -> u32 {
        match purpose {
            AccountPurpose::Primary => self.primary,
            AccountPurpose::Musig2 => self.musig2,
        }
    }

    /// The purpose an account number belongs to, if any.
    pub fn purpose_of(&self, account: u32) -> Option<AccountPurpose> {
        [AccountPurpose::Primary, AccountPurpose::Musig2]
            .into_iter()
            .find(|p| self.account(*p) == account)
    }
}

impl Default for AccountLayout {
    fn default() -> Self {
        Self {
            primary: 0,
            musig2: 1,
        }
    }
}

/// PRIMARY-purpose keypair used for spending and identity.
///
/// This type can only be constructed via [`AccountDeriver::primary`].
/// Implements [`Deref<Target = Keypair>`] for access to signing methods.
#[derive(Debug)]
pub struct PrimaryKeypair(Keypair);

impl Deref for PrimaryKeypair {
    type Target = Keypair;

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

/// MUSIG2-purpose keypair.
///
/// This type can only be constructed via [`AccountDeriver::musig2`].
/// Implements [`Deref<Target = Keypair>`] for access to signing methods.
#[derive(Debug)]
pub struct Musig2Keypair(Keypair);

impl Deref for Musig2Keypair {
    type Target = Keypair;

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

/// MuSig2 nonce initial key material.
///
/// This type can only be constructed via [`AccountDeriver::musig2_nonce_ikm`].
/// Implements [`Deref<Target = [u8; 32]>`] for access to the raw bytes.
#[derive(Debug, Zeroize, ZeroizeOnDrop)]
pub struct Musig2NonceIkm([u8; 32]);

impl Deref for Musig2NonceIkm {
    type Target = [u8; 32];

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

/// A single derived key with everything needed to receive or sign with it.
#[derive(Debug)]
pub struct DerivedAccount<K> {
    /// Which account the key belongs to.
    pub purpose: AccountPurpose,
    /// Full derivation path from the master key.
    pub path: DerivationPath,
    /// Compressed public key.
    pub public_key: PublicKeyHex,
    /// P2TR address of the key on the deriver's network.
    pub address: Address,
    /// `scriptPubKey` of [`Self::address`].
    pub script_payload: ScriptBuf,
    /// The private half, tagged with its purpose.
    pub keypair: K,
}

/// Stateless BIP44 deriver over a master key.
///
/// Derivation is pure; callers own caching.
#[derive(Clone)]
pub struct AccountDeriver {
    master: Xpriv,
    network: Network,
    layout: AccountLayout,
}

impl fmt::Debug for AccountDeriver {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AccountDeriver")
            .field("fingerprint", &self.master.fingerprint(SECP256K1))
            .field("network", &self.network)
            .field("layout", &self.layout)
            .finish()
    }
}

impl AccountDeriver {
    /// Creates a deriver from raw seed bytes.
    pub fn from_seed(
        seed: &[u8],
        network: Network,
        layout: AccountLayout,
    ) -> Result<Self, DerivationError> {
        if !(MIN_SEED_LEN..=MAX_SEED_LEN).contains(&seed.len()) {
            return Err(DerivationError::InvalidSeed(format!(
                "expected {MIN_SEED_LEN}..={MAX_SEED_LEN} bytes, got {}",
                seed.len()
            )));
        }
        let master = Xpriv::new_master(network, seed)?;

        Ok(Self {
            master,
            network,
            layout,
        })
    }

    /// Creates a deriver from a hex-encoded seed.
    pub fn from_seed_hex(
        seed_hex: &str,
        network: Network,
        layout: AccountLayout,
    ) -> Result<Self, DerivationError> {
        let seed = zeroize::Zeroizing::new(
            hex::decode(seed_hex.trim())
                .map_err(|e| DerivationError::InvalidSeed(format!("not hex: {e}")))?,
        );
        Self::from_seed(&seed, network, layout)
    }

    /// The network addresses are rendered for.
    pub const fn network(&self) -> Network {
        self.network
    }

    /// The purpose to account mapping.
    pub const fn layout(&self) -> AccountLayout {
        self.layout
    }

    /// Builds `m/44'/coin'/account'/change/index` for `purpose`.
    pub fn path(
        &self,
        purpose: AccountPurpose,
        is_change: bool,
        address_index: u32,
    ) -> Result<DerivationPath, DerivationError> {
        Ok(DerivationPath::from(vec![
            BIP44_PURPOSE_IDX,
            ChildNumber::from_hardened_idx(coin_type(self.network))?,
            ChildNumber::from_hardened_idx(check_index(self.layout.account(purpose))?)?,
            ChildNumber::from_normal_idx(u32::from(is_change))?,
            ChildNumber::from_normal_idx(check_index(address_index)?)?,
        ]))
    }

    /// Derives a PRIMARY-purpose key.
    pub fn primary(
        &self,
        is_change: bool,
        address_index: u32,
    ) -> Result<DerivedAccount<PrimaryKeypair>, DerivationError> {
        let path = self.path(AccountPurpose::Primary, is_change, address_index)?;
        self.derive_at(AccountPurpose::Primary, path, PrimaryKeypair)
    }

    /// Derives a MUSIG2-purpose key. MUSIG2 keys never live on the change branch.
    pub fn musig2(
        &self,
        address_index: u32,
    ) -> Result<DerivedAccount<Musig2Keypair>, DerivationError> {
        let path = self.path(AccountPurpose::Musig2, false, address_index)?;
        self.derive_at(AccountPurpose::Musig2, path, Musig2Keypair)
    }

    /// Derives the key material MuSig2 secret nonces are expanded from.
    pub fn musig2_nonce_ikm(&self) -> Result<Musig2NonceIkm, DerivationError> {
        let path = DerivationPath::from(vec![
            BIP44_PURPOSE_IDX,
            ChildNumber::from_hardened_idx(coin_type(self.network))?,
            ChildNumber::from_hardened_idx(self.layout.account(AccountPurpose::Musig2))?,
            MUSIG2_NONCE_IKM_IDX,
        ]);
        let child = self.master.derive_priv(SECP256K1, &path)?;

        Ok(Musig2NonceIkm(child.private_key.secret_bytes()))
    }

    /// Validates an externally supplied path and returns the purpose it belongs to.
    ///
    /// The first three levels must be hardened, the last two must not, and the account must be
    /// one of the layout's accounts.
    pub fn classify_path(&self, path: &DerivationPath) -> Result<AccountPurpose, DerivationError> {
        let invalid = |reason| DerivationError::InvalidPath {
            path: path.to_string(),
            reason,
        };
        let levels: Vec<ChildNumber> = path.into_iter().copied().collect();
        if levels.len() != BIP44_DEPTH {
            return Err(invalid("expected five levels"));
        }
        if levels[0] != BIP44_PURPOSE_IDX {
            return Err(invalid("purpose must be 44'"));
        }
        if !levels[..3].iter().all(ChildNumber::is_hardened) {
            return Err(invalid("purpose, coin type and account must be hardened"));
        }
        if !levels[3..].iter().all(ChildNumber::is_normal) {
            return Err(invalid("change and index must not be hardened"));
        }
        if levels[1] != ChildNumber::from_hardened_idx(coin_type(self.network))? {
            return Err(invalid("coin type does not match the network"));
        }
        let account = match levels[2] {
            ChildNumber::Hardened { index } => index,
            ChildNumber::Normal { .. } => return Err(invalid("account must be hardened")),
        };
        if !matches!(levels[3], ChildNumber::Normal { index: 0 | 1 }) {
            return Err(invalid("change must be 0 or 1"));
        }

        self.layout
            .purpose_of(account)
            .ok_or_else(|| invalid("account is not assigned to any purpose"))
    }

    fn derive_at<K>(
        &self,
        purpose: AccountPurpose,
        path: DerivationPath,
        tag: impl FnOnce(Keypair) -> K,
    ) -> Result<DerivedAccount<K>, DerivationError> {
        let child = self.master.derive_priv(SECP256K1, &path)?;
        let keypair = Keypair::from_secret_key(SECP256K1, &child.private_key);
        let public_key = PublicKeyHex::from(keypair.public_key());
        let address = identity_address(&public_key, self.network);
        let script_payload = address.script_pubkey();

        Ok(DerivedAccount {
            purpose,
            path,
            public_key,
            address,
            script_payload,
            keypair: tag(keypair),
        })
    }
}

impl Drop for AccountDeriver {
    fn drop(&mut self) {
        // NOTE: `SecretKey::non_secure_erase` writes `1`s to the memory.
        self.master.private_key.non_secure_erase();
        let chaincode: &mut [u8; 32] = self.master.chain_code.as_mut();
        chaincode.zeroize();
    }
}

fn check_index(index: u32) -> Result<u32, DerivationError> {
    if index & (1 << 31) != 0 {
        return Err(DerivationError::IndexOutOfRange(index));
    }
    Ok(index)
}

#[cfg(test)]
mod tests {
    use std::str::FromStr;

    use super::*;

    const SEED: [u8; 32] = [7u8; 32];

    fn deriver() -> AccountDeriver {
        AccountDeriver::from_seed(&SEED, Network::Regtest, AccountLayout::default()).unwrap()
    }

    #[test]
    fn purposes_are_isolated() {
        let d = deriver();
        let primary = d.primary(false, 0).unwrap();
        let musig2 = d.musig2(0).unwrap();

        assert_ne!(
            primary.keypair.secret_key().secret_bytes(),
            musig2.keypair.secret_key().secret_bytes()
        );
        assert_ne!(primary.public_key, musig2.public_key);
        assert_ne!(primary.address, musig2.address);
        assert_eq!(primary.path, DerivationPath::from_str("m/44'/1'/0'/0/0").unwrap());
        assert_eq!(musig2.path, DerivationPath::from_str("m/44'/1'/1'/0/0").unwrap());
    }

    #[test]
    fn derivation_is_deterministic() {
        let a = deriver().primary(true, 3).unwrap();
        let b = deriver().primary(true, 3).unwrap();

        assert_eq!(a.public_key, b.public_key);
        assert_eq!(a.script_payload, a.address.script_pubkey());
        assert_eq!(a.script_payload, b.script_payload);
    }

    #[test]
    fn mainnet_uses_coin_type_zero() {
        let d = AccountDeriver::from_seed(&SEED, Network::Bitcoin, AccountLayout::default())
            .unwrap();
        assert_eq!(
            d.primary(false, 0).unwrap().path,
            DerivationPath::from_str("m/44'/0'/0'/0/0").unwrap()
        );
    }

    #[test]
    fn layout_rejects_collisions() {
        // The debug assertion fires first in debug builds.
        let result = std::panic::catch_unwind(|| AccountLayout::new(4, 4));
        match result {
            Ok(res) => assert!(matches!(res, Err(DerivationError::AccountCollision(4)))),
            Err(_) => assert!(cfg!(debug_assertions)),
        }
    }

    #[test]
    fn rejects_bad_seeds_and_indices() {
        assert!(matches!(
            AccountDeriver::from_seed(&[1u8; 8], Network::Regtest, AccountLayout::default()),
            Err(DerivationError::InvalidSeed(_))
        ));
        assert!(matches!(
            AccountDeriver::from_seed_hex("zz", Network::Regtest, AccountLayout::default()),
            Err(DerivationError::InvalidSeed(_))
        ));
        assert!(matches!(
            deriver().primary(false, 1 << 31),
            Err(DerivationError::IndexOutOfRange(_))
        ));
    }

    #[test]
    fn classify_path_checks_shape() {
        let d = deriver();

        let musig = DerivationPath::from_str("m/44'/1'/1'/0/7").unwrap();
        assert_eq!(d.classify_path(&musig).unwrap(), AccountPurpose::Musig2);

        let unhardened_account = DerivationPath::from_str("m/44'/1'/0/0/7").unwrap();
        assert!(matches!(
            d.classify_path(&unhardened_account),
            Err(DerivationError::InvalidPath { .. })
        ));

        let hardened_index = DerivationPath::from_str("m/44'/1'/0'/0/7'").unwrap();
        assert!(d.classify_path(&hardened_index).is_err());

        let unknown_account = DerivationPath::from_str("m/44'/1'/9'/0/0").unwrap();
        assert!(d.classify_path(&unknown_account).is_err());
    }

    #[test]
    fn nonce_ikm_differs_from_signing_key() {
        let d = deriver();
        let ikm = d.musig2_nonce_ikm().unwrap();
        let musig2 = d.musig2(0).unwrap();

        assert_ne!(*ikm, musig2.keypair.secret_key().secret_bytes());
    }
}
