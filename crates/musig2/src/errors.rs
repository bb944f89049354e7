//! Errors related to shared wallets and their signing sessions.

use concord_db::StorageError;
use concord_discovery::DiscoveryError;
use concord_identity::IdentityError;
use concord_primitives::{AggError, InvalidPublicKey, PublicKeyHex};
use thiserror::Error;

use crate::{
    publisher::PublishError,
    session::{SessionId, SessionState},
};

/// Key aggregation failed; nothing was persisted.
#[derive(Debug, Error)]
pub enum AggregationError {
    /// The key set itself is unusable, or aggregation hit a degenerate point.
    #[error("key aggregation: {0}")]
    Keys(#[from] AggError),

    /// A participant key is malformed.
    #[error("participant key: {0}")]
    InvalidKey(#[from] InvalidPublicKey),
}

/// Errors that can occur in a signing session.
///
/// `InvalidEvent`, `Duplicate` and `Rejected` mirror the usual state-machine outcomes. The
/// remaining variants are terminal failures of the session.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SessionError {
    /// The event makes no sense in the current state.
    #[error("received invalid event {event} in state {state}; reason: {reason:?}")]
    InvalidEvent {
        /// State the session was in.
        state: SessionState,
        /// What was received.
        event: String,
        /// Why it is invalid, when not obvious.
        reason: Option<String>,
    },

    /// The event was already applied.
    #[error("received a duplicate {event} from {participant} in state {state}")]
    Duplicate {
        /// State the session was in.
        state: SessionState,
        /// What was received.
        event: String,
        /// Who sent it.
        participant: PublicKeyHex,
    },

    /// The event was well-formed but could not be accepted.
    #[error("{event} rejected in state {state}: {reason}")]
    Rejected {
        /// State the session was in.
        state: SessionState,
        /// What was received.
        event: String,
        /// Why it was rejected.
        reason: String,
    },

    /// The session deadline passed before every partial signature was collected.
    #[error("session {session_id} timed out, missing {missing:?}")]
    Timeout {
        /// The expired session.
        session_id: SessionId,
        /// Participants that had not contributed.
        missing: Vec<PublicKeyHex>,
    },

    /// The session was cancelled.
    #[error("session {session_id} was cancelled")]
    Cancelled {
        /// The cancelled session.
        session_id: SessionId,
        /// Who cancelled it, if a participant did.
        by: Option<PublicKeyHex>,
    },

    /// Fewer valid contributions than participants when the session was cancelled or expired.
    #[error("insufficient participants, missing {missing:?}")]
    InsufficientParticipants {
        /// Participants whose contribution is missing.
        missing: Vec<PublicKeyHex>,
    },

    /// The session id was used before and may never be reused.
    #[error("session id {0} has been retired")]
    Retired(SessionId),
}

impl SessionError {
    pub(crate) fn invalid_event(
        state: SessionState,
        event: impl Into<String>,
        reason: Option<String>,
    ) -> Self {
        SessionError::InvalidEvent {
            state,
            event: event.into(),
            reason,
        }
    }

    pub(crate) fn duplicate(
        state: SessionState,
        event: impl Into<String>,
        participant: PublicKeyHex,
    ) -> Self {
        SessionError::Duplicate {
            state,
            event: event.into(),
            participant,
        }
    }

    pub(crate) fn rejected(
        state: SessionState,
        event: impl Into<String>,
        reason: impl Into<String>,
    ) -> Self {
        SessionError::Rejected {
            state,
            event: event.into(),
            reason: reason.into(),
        }
    }
}

/// Result alias for session transitions.
pub type SessionResult<T> = Result<T, SessionError>;

/// Errors surfaced by the [`crate::Musig2Coordinator`].
#[derive(Debug, Error)]
pub enum CoordinatorError {
    /// Shared-wallet creation failed.
    #[error("aggregation: {0}")]
    Aggregation(#[from] AggregationError),

    /// A signing session failed or refused an event.
    #[error("session: {0}")]
    Session(#[from] SessionError),

    /// A participant key is malformed.
    #[error("{0}")]
    InvalidPublicKey(#[from] InvalidPublicKey),

    /// Identity store failure.
    #[error("identity: {0}")]
    Identity(#[from] IdentityError),

    /// Discovery failure.
    #[error("discovery: {0}")]
    Discovery(#[from] DiscoveryError),

    /// Persistence failure.
    #[error("storage: {0}")]
    Storage(#[from] StorageError),

    /// Advertisement publication failed.
    #[error("publish: {0}")]
    Publish(#[from] PublishError),

    /// No wallet with this id.
    #[error("no shared wallet with id {0}")]
    WalletNotFound(String),

    /// No live session with this id.
    #[error("no session with id {0}")]
    UnknownSession(SessionId),
}

/// Result alias for coordinator operations.
pub type CoordinatorResult<T> = Result<T, CoordinatorError>;
