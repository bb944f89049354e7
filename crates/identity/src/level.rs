//! How much is known about a peer.

use concord_primitives::UnixMillis;

use crate::identity::Identity;

/// Ordered classification of what a peer can do, from least to most capable.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum IdentityLevel {
    /// Only an address is known; the peer can receive funds but cannot be aggregated.
    AddressOnly,

    /// The public key is known; the peer can be part of a shared wallet.
    PublicKey,

    /// The peer's transport identifier is known.
    P2pConnected,

    /// The peer has a live, available co-signer advertisement.
    ActiveSigner,
}

impl IdentityLevel {
    /// Classifies a known identity at `now`.
    pub fn classify(identity: &Identity, now: UnixMillis) -> Self {
        if identity
            .signer_capabilities
            .as_ref()
            .is_some_and(|caps| caps.is_active(now))
        {
            IdentityLevel::ActiveSigner
        } else if identity.peer_id.is_some() {
            IdentityLevel::P2pConnected
        } else {
            IdentityLevel::PublicKey
        }
    }

    /// Classifies something that may or may not be linked to an identity.
    pub fn classify_linked(identity: Option<&Identity>, now: UnixMillis) -> Self {
        identity.map_or(IdentityLevel::AddressOnly, |id| Self::classify(id, now))
    }

    /// Whether the peer's key can be used in key aggregation.
    pub fn can_aggregate(self) -> bool {
        self >= IdentityLevel::PublicKey
    }
}
