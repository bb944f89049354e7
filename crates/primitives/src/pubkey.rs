//! The canonical identifier of every identity: a compressed secp256k1 public key.

use std::{cmp::Ordering, fmt, str::FromStr};

use bitcoin::XOnlyPublicKey;
use secp256k1::PublicKey;
use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::errors::{InvalidPublicKey, KeyFormatFault};

/// Number of hex characters in a compressed public key.
pub const COMPRESSED_PUBKEY_HEX_LEN: usize = 66;

/// A validated compressed public key that renders as 66 lowercase hex characters.
///
/// This is the sole primary key for identities. Equality and ordering follow the 33-byte
/// serialization, so two values that compare equal always render to the same string.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct PublicKeyHex(PublicKey);

impl PublicKeyHex {
    /// Parses and validates a hex-encoded compressed key.
    ///
    /// Upper-case input is accepted and normalized.
    pub fn parse(input: &str) -> Result<Self, InvalidPublicKey> {
        let fault = |fault| InvalidPublicKey {
            input: input.to_owned(),
            fault,
        };

        if input.len() != COMPRESSED_PUBKEY_HEX_LEN {
            return Err(fault(KeyFormatFault::Length(input.len())));
        }
        if !(input.starts_with("02") || input.starts_with("03")) {
            return Err(fault(KeyFormatFault::Prefix));
        }
        let bytes = hex::decode(input).map_err(|_| fault(KeyFormatFault::NotHex))?;
        let key = PublicKey::from_slice(&bytes).map_err(|_| fault(KeyFormatFault::NotOnCurve))?;

        Ok(Self(key))
    }

    /// The underlying curve point.
    pub const fn public_key(&self) -> PublicKey {
        self.0
    }

    /// The x-only projection used for Taproot outputs.
    pub fn x_only(&self) -> XOnlyPublicKey {
        self.0.x_only_public_key().0
    }

    /// The 33-byte compressed serialization.
    pub fn serialize(&self) -> [u8; 33] {
        self.0.serialize()
    }
}

impl From<PublicKey> for PublicKeyHex {
    fn from(value: PublicKey) -> Self {
        Self(value)
    }
}

impl From<PublicKeyHex> for PublicKey {
    fn from(value: PublicKeyHex) -> Self {
        value.0
    }
}

impl FromStr for PublicKeyHex {
    type Err = InvalidPublicKey;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl Ord for PublicKeyHex {
    fn cmp(&self, other: &Self) -> Ordering {
        self.serialize().cmp(&other.serialize())
    }
}

impl PartialOrd for PublicKeyHex {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl fmt::Display for PublicKeyHex {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&hex::encode(self.serialize()))
    }
}

impl fmt::Debug for PublicKeyHex {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "PublicKeyHex({self})")
    }
}

impl Serialize for PublicKeyHex {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for PublicKeyHex {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        Self::parse(&s).map_err(serde::de::Error::custom)
    }
}
