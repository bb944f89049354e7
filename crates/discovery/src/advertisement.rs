//! The advertisement gossip payload.

use concord_identity::{SignerCapabilities, SignerInfo};
use concord_primitives::{Capabilities, PublicKeyHex, UnixMillis};
use serde::{Deserialize, Serialize};

use crate::errors::DiscoveryResult;

/// A TTL-bounded announcement that a key is available as a MuSig2 co-signer.
///
/// ```json
/// { "publicKeyHex": "02…", "peerId": "12D3…",
///   "capabilities": { "transactionTypes": ["spend"], "available": true },
///   "expiresAt": 1700000000000, "mainWalletAddress": "bc1p…" }
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Advertisement {
    /// The signer's MUSIG2 key.
    pub public_key_hex: PublicKeyHex,

    /// Transport identifier of the advertising node.
    pub peer_id: String,

    /// What the signer offers.
    pub capabilities: Capabilities,

    /// When the advertisement stops being valid.
    pub expires_at: UnixMillis,

    /// The signer's PRIMARY receive address, when it chose to share it.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub main_wallet_address: Option<String>,
}

impl Advertisement {
    /// Decodes a gossip payload. The public key is validated as part of decoding.
    pub fn from_json(payload: &[u8]) -> DiscoveryResult<Self> {
        Ok(serde_json::from_slice(payload)?)
    }

    /// Encodes the advertisement for gossip.
    pub fn to_json(&self) -> DiscoveryResult<Vec<u8>> {
        Ok(serde_json::to_vec(self)?)
    }

    /// Whether the advertisement is dead at `now`.
    pub const fn is_expired(&self, now: UnixMillis) -> bool {
        self.expires_at <= now
    }

    /// Whether the signer is accepting requests at `now`.
    pub const fn is_active(&self, now: UnixMillis) -> bool {
        self.capabilities.available && !self.is_expired(now)
    }

    /// The identity facts carried by this advertisement.
    pub fn signer_info(&self, multiaddrs: Vec<String>) -> SignerInfo {
        SignerInfo {
            public_key: self.public_key_hex,
            peer_id: Some(self.peer_id.clone()),
            multiaddrs,
            capabilities: SignerCapabilities {
                capabilities: self.capabilities.clone(),
                expires_at: self.expires_at,
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use concord_test_utils::keys::pubkey;

    use super::*;

    #[test]
    fn wire_format_is_camel_case() {
        let ad = Advertisement {
            public_key_hex: pubkey(1),
            peer_id: "peer".to_owned(),
            capabilities: Capabilities {
                transaction_types: vec!["spend".to_owned()],
                available: true,
                ..Default::default()
            },
            expires_at: 42,
            main_wallet_address: None,
        };

        let json: serde_json::Value = serde_json::from_slice(&ad.to_json().unwrap()).unwrap();
        assert_eq!(json["publicKeyHex"], pubkey(1).to_string());
        assert_eq!(json["capabilities"]["transactionTypes"][0], "spend");
        assert_eq!(json["expiresAt"], 42);
        assert!(json.get("mainWalletAddress").is_none());

        assert_eq!(Advertisement::from_json(&ad.to_json().unwrap()).unwrap(), ad);
    }

    #[test]
    fn malformed_key_is_rejected_on_decode() {
        let payload = br#"{"publicKeyHex":"04ab","peerId":"p","capabilities":{"available":true},"expiresAt":1}"#;
        assert!(Advertisement::from_json(payload).is_err());
    }

    #[test]
    fn expiry_is_inclusive() {
        let ad = Advertisement {
            public_key_hex: pubkey(2),
            peer_id: "peer".to_owned(),
            capabilities: Capabilities {
                available: true,
                ..Default::default()
            },
            expires_at: 100,
            main_wallet_address: None,
        };

        assert!(ad.is_active(99));
        assert!(ad.is_expired(100));
        assert!(!ad.is_active(100));
    }
}
