//! P2TR address generation utilities.
//!
//! Every address in this workspace is a key-path-only Pay-to-Taproot output, whether it wraps a
//! single identity key or a MuSig2 aggregate.

use std::str::FromStr;

use bitcoin::{key::TapTweak, Address, Network, XOnlyPublicKey};
use secp256k1::SECP256K1;

use crate::{errors::AddressError, pubkey::PublicKeyHex};

/// Generate a P2TR address from an x-only public key.
///
/// Uses key-path spending only (no script tree).
#[must_use]
pub fn p2tr_address(pubkey: XOnlyPublicKey, network: Network) -> Address {
    let (tweaked, _) = pubkey.tap_tweak(SECP256K1, None);
    Address::p2tr_tweaked(tweaked, network)
}

/// The address an identity receives at on `network`.
#[must_use]
pub fn identity_address(pubkey: &PublicKeyHex, network: Network) -> Address {
    p2tr_address(pubkey.x_only(), network)
}

/// Parses an address string and checks it belongs to `network`.
pub fn parse_address(input: &str, network: Network) -> Result<Address, AddressError> {
    Address::from_str(input)
        .map_err(|_| AddressError::Unparseable(input.to_owned()))?
        .require_network(network)
        .map_err(|_| AddressError::WrongNetwork(input.to_owned()))
}
