use std::fmt;

use serde::{Deserialize, Serialize};

/// The state of a signing session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SessionState {
    /// Collecting public nonces.
    Created,
    /// Every nonce is in and aggregated; collecting partial signatures.
    NoncesExchanged,
    /// Every partial signature is in and verified.
    PartialSigsCollected,
    /// The final signature is available.
    Aggregated,
    /// The signed transaction was handed to the network.
    Broadcast,
    /// Cancelled or otherwise aborted.
    Failed,
    /// The deadline passed before aggregation.
    Expired,
}

impl SessionState {
    /// Whether no further transition is possible.
    pub const fn is_terminal(&self) -> bool {
        matches!(
            self,
            SessionState::Broadcast | SessionState::Failed | SessionState::Expired
        )
    }

    /// Whether the session can still time out.
    pub const fn is_pending(&self) -> bool {
        matches!(
            self,
            SessionState::Created
                | SessionState::NoncesExchanged
                | SessionState::PartialSigsCollected
        )
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state_str = match self {
            SessionState::Created => "Created",
            SessionState::NoncesExchanged => "NoncesExchanged",
            SessionState::PartialSigsCollected => "PartialSigsCollected",
            SessionState::Aggregated => "Aggregated",
            SessionState::Broadcast => "Broadcast",
            SessionState::Failed => "Failed",
            SessionState::Expired => "Expired",
        };
        f.write_str(state_str)
    }
}
