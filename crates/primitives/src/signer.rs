//! Co-signer capability descriptors shared by advertisements and identities.

use serde::{Deserialize, Serialize};

/// Inclusive bounds on the amounts a signer is willing to co-sign, in satoshis.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct AmountRange {
    /// Smallest amount.
    pub min: u64,
    /// Largest amount.
    pub max: u64,
}

impl AmountRange {
    /// Whether `amount` falls within the range.
    pub const fn contains(&self, amount: u64) -> bool {
        self.min <= amount && amount <= self.max
    }
}

/// What a co-signer offers, as carried in advertisements.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Capabilities {
    /// Transaction types the signer participates in.
    #[serde(default)]
    pub transaction_types: Vec<String>,

    /// Amounts the signer accepts.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub amount_range: Option<AmountRange>,

    /// Fee the signer charges, in satoshis.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fee: Option<u64>,

    /// Whether the signer currently accepts requests.
    #[serde(default)]
    pub available: bool,
}

impl Capabilities {
    /// Whether the signer accepts `transaction_type`.
    pub fn supports(&self, transaction_type: &str) -> bool {
        self.transaction_types.iter().any(|t| t == transaction_type)
    }
}
