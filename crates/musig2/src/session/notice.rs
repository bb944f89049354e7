use bitcoin::secp256k1::schnorr;
use concord_primitives::PublicKeyHex;

use super::SessionId;
use crate::errors::SessionError;

/// Session lifecycle notices for the P2P layer to relay, so that every participant releases
/// its session state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionNotice {
    /// A participant, or the local user, cancelled the session.
    Cancelled {
        /// The session.
        session_id: SessionId,
        /// Who cancelled it; `None` for the local node.
        by: Option<PublicKeyHex>,
        /// Participants whose contribution had not arrived.
        missing: Vec<PublicKeyHex>,
    },

    /// The session passed its deadline.
    Expired {
        /// The session.
        session_id: SessionId,
        /// Participants whose contribution never arrived.
        missing: Vec<PublicKeyHex>,
    },

    /// Every partial signature was collected and aggregated.
    Aggregated {
        /// The session.
        session_id: SessionId,
        /// The final signature.
        signature: schnorr::Signature,
    },
}

impl SessionNotice {
    /// The session the notice is about.
    pub const fn session_id(&self) -> &SessionId {
        match self {
            SessionNotice::Cancelled { session_id, .. }
            | SessionNotice::Expired { session_id, .. }
            | SessionNotice::Aggregated { session_id, .. } => session_id,
        }
    }

    /// The shortfall that ended the session without a signature, if any participant was
    /// still missing.
    pub fn insufficient_participants(&self) -> Option<SessionError> {
        match self {
            SessionNotice::Cancelled { missing, .. } | SessionNotice::Expired { missing, .. }
                if !missing.is_empty() =>
            {
                Some(SessionError::InsufficientParticipants {
                    missing: missing.clone(),
                })
            }
            _ => None,
        }
    }
}
