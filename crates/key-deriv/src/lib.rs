//! Key derivation primitives for concord nodes.
//!
//! One seed yields every key a node uses, each under its own BIP44 account so that keys for
//! different purposes are cryptographically unrelated.
//!
//! # Usage
//!
//! ```rust,ignore
//! use bitcoin::Network;
//! use concord_key_deriv::{AccountLayout, NodeKeys};
//!
//! let keys = NodeKeys::derive(&seed, Network::Signet, AccountLayout::default())?;
//! let identity = keys.primary().public_key;
//! let signer = keys.musig2().public_key;
//! ```
//!
//! # Key Hierarchy
//!
//! See the `paths` module. Use [`AccountDeriver`] or [`NodeKeys`] to derive keys at the
//! correct paths.

pub mod derive;
mod keys;

// Internal module - paths are obscured to prevent direct usage and ensure consistency
mod paths;

pub use derive::{
    AccountDeriver, AccountLayout, AccountPurpose, DerivationError, DerivedAccount,
    Musig2Keypair, Musig2NonceIkm, PrimaryKeypair,
};
pub use keys::NodeKeys;
