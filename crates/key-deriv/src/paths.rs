//! BIP44 derivation paths for the node's key hierarchy.
//!
//! # Key Hierarchy Overview
//!
//! ```text
//! Master Seed (16..=64 bytes)
//! └── m/44'/coin'
//!     ├── m/44'/coin'/0'/change/index ─── PRIMARY: spending, receiving, identity
//!     └── m/44'/coin'/1'
//!         ├── m/44'/coin'/1'/0/index ──── MUSIG2: multi-party signing and advertisement
//!         └── m/44'/coin'/1'/666' ─────── MuSig2 nonce IKM (secnonce generation)
//! ```
//!
//! The account numbers above are the defaults of [`crate::AccountLayout`]. `coin` is `0'` on
//! mainnet and `1'` on every test network.
use bitcoin::{bip32::ChildNumber, Network};

/// BIP44 purpose level (`44'`).
pub(crate) const BIP44_PURPOSE_IDX: ChildNumber = ChildNumber::Hardened { index: 44 };

/// Mainnet coin type (`0'`).
pub(crate) const COIN_TYPE_MAINNET: u32 = 0;

/// Coin type shared by every test network (`1'`).
pub(crate) const COIN_TYPE_TESTNET: u32 = 1;

/// Hardened child under the MUSIG2 account holding nonce key material.
pub(crate) const MUSIG2_NONCE_IKM_IDX: ChildNumber = ChildNumber::Hardened { index: 666 };

/// Number of levels in a full BIP44 address path.
pub(crate) const BIP44_DEPTH: usize = 5;

/// The coin type for `network`.
pub(crate) const fn coin_type(network: Network) -> u32 {
    match network {
        Network::Bitcoin => COIN_TYPE_MAINNET,
        _ => COIN_TYPE_TESTNET,
    }
}
