//! The identity record and the inputs that mutate it.

use bitcoin::Network;
use concord_primitives::{identity_address, Capabilities, PublicKeyHex, UnixMillis};
use serde::{Deserialize, Serialize};

/// Capabilities a peer advertised as a MuSig2 co-signer, with the advertisement's expiry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SignerCapabilities {
    /// What the signer offers.
    #[serde(flatten)]
    pub capabilities: Capabilities,

    /// When the advertisement stops being valid.
    pub expires_at: UnixMillis,
}

impl SignerCapabilities {
    /// Whether the signer is available and its advertisement is still live at `now`.
    pub const fn is_active(&self, now: UnixMillis) -> bool {
        self.capabilities.available && !self.has_expired(now)
    }

    /// Whether the advertisement these capabilities came from has expired at `now`.
    pub const fn has_expired(&self, now: UnixMillis) -> bool {
        self.expires_at <= now
    }
}

/// Discovery-derived facts about a signer, merged by
/// [`crate::IdentityStore::update_from_signer`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignerInfo {
    /// The signer's key.
    pub public_key: PublicKeyHex,
    /// Transport identifier, when known.
    pub peer_id: Option<String>,
    /// Transport addresses, when known.
    pub multiaddrs: Vec<String>,
    /// Advertised capabilities.
    pub capabilities: SignerCapabilities,
}

/// A presence observation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PresenceUpdate {
    /// Whether the peer is currently reachable.
    pub is_online: bool,
    /// When the peer was last observed.
    pub last_seen_at: Option<UnixMillis>,
}

/// The canonical record for one public key.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Identity {
    /// The key; immutable and the only primary key.
    pub public_key_hex: PublicKeyHex,

    /// Cached address on the store's network. Recomputed on load, never authoritative.
    pub address: String,

    /// Transport identifier, set once a connection or advertisement reveals it.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub peer_id: Option<String>,

    /// Transport addresses.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub multiaddrs: Vec<String>,

    /// Last known online flag.
    #[serde(default)]
    pub is_online: bool,

    /// Last time the peer was observed.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_seen_at: Option<UnixMillis>,

    /// Co-signer capabilities, when the peer advertised any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub signer_capabilities: Option<SignerCapabilities>,

    /// First observation.
    pub created_at: UnixMillis,

    /// Last mutation.
    pub updated_at: UnixMillis,
}

impl Identity {
    /// A fresh identity for `public_key`, offline and without discovery data.
    pub fn new(public_key: PublicKeyHex, network: Network, now: UnixMillis) -> Self {
        Self {
            public_key_hex: public_key,
            address: identity_address(&public_key, network).to_string(),
            peer_id: None,
            multiaddrs: Vec::new(),
            is_online: false,
            last_seen_at: None,
            signer_capabilities: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// The identity's address on `network`, computed from the key.
    pub fn address_on(&self, network: Network) -> String {
        identity_address(&self.public_key_hex, network).to_string()
    }
}
