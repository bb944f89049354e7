//! Shared wallet records.

use bitcoin::{
    hashes::{sha256, Hash},
    Address, Network,
};
use concord_primitives::{p2tr_address, PublicKeyHex, UnixMillis};
use serde::{Deserialize, Serialize};

/// One member of a shared wallet.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Participant {
    /// The participant's MUSIG2 key.
    pub public_key_hex: PublicKeyHex,

    /// Transport identifier, when known.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub peer_id: Option<String>,

    /// Whether this is the local node.
    #[serde(default)]
    pub is_me: bool,
}

/// An N-of-N MuSig2 wallet.
///
/// Immutable once created apart from participant transport metadata and the balance.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SharedWallet {
    /// Deterministic id derived from the aggregate key.
    pub id: String,

    /// Display name.
    pub name: String,

    /// Participants in canonical key order.
    pub participants: Vec<Participant>,

    /// Untweaked aggregate of the participant keys.
    pub aggregated_public_key_hex: PublicKeyHex,

    /// Address on the network the wallet was created on. A hint only; use
    /// [`SharedWallet::address`].
    pub shared_address: String,

    /// Confirmed balance in satoshis.
    #[serde(default)]
    pub balance: u64,

    /// Creation time.
    pub created_at: UnixMillis,
}

impl SharedWallet {
    /// The wallet id for an aggregate key.
    pub fn id_for(aggregated: &PublicKeyHex) -> String {
        let preimage = format!("wallet:{aggregated}");
        let digest = sha256::Hash::hash(preimage.as_bytes());
        hex::encode(&digest.to_byte_array()[..16])
    }

    /// The shared address on `network`, recomputed from the aggregate key.
    pub fn address(&self, network: Network) -> Address {
        p2tr_address(self.aggregated_public_key_hex.x_only(), network)
    }

    /// Participant keys in canonical order.
    pub fn participant_keys(&self) -> impl Iterator<Item = PublicKeyHex> + '_ {
        self.participants.iter().map(|p| p.public_key_hex)
    }

    /// Participants other than the local node.
    pub fn others(&self) -> impl Iterator<Item = &Participant> {
        self.participants.iter().filter(|p| !p.is_me)
    }

    /// Number of participants; every one of them must sign.
    pub fn threshold(&self) -> usize {
        self.participants.len()
    }
}
