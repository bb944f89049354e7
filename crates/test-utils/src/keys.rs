//! Deterministic keys and seeds.

use bitcoin::Network;
use concord_key_deriv::{AccountLayout, NodeKeys};
use concord_primitives::PublicKeyHex;
use secp256k1::{SecretKey, SECP256K1};

/// A secret key whose 32 bytes are all `n`.
///
/// # Panics
///
/// If `n` is zero.
pub fn secret_key(n: u8) -> SecretKey {
    SecretKey::from_slice(&[n; 32]).expect("non-zero bytes form a valid secret key")
}

/// The public key of [`secret_key`].
pub fn pubkey(n: u8) -> PublicKeyHex {
    secret_key(n).public_key(SECP256K1).into()
}

/// Public keys for `1..=count`.
pub fn pubkeys(count: u8) -> Vec<PublicKeyHex> {
    (1..=count).map(pubkey).collect()
}

/// A 32-byte wallet seed distinct for every `n`.
pub fn seed(n: u8) -> [u8; 32] {
    let mut seed = [0xa5; 32];
    seed[0] = n;
    seed
}

/// Node keys derived from [`seed`] with the default account layout.
pub fn node_keys(n: u8, network: Network) -> NodeKeys {
    NodeKeys::derive(&seed(n), network, AccountLayout::default())
        .expect("fixed seeds always derive")
}
