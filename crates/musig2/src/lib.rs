//! N-of-N MuSig2 shared wallets.
//!
//! A shared wallet is a key-path-only Taproot output whose internal key is the MuSig2
//! aggregate of its participants' MUSIG2-purpose keys. This crate covers:
//!
//! - deterministic, order-independent key aggregation ([`aggregate`]).
//! - the persistent wallet registry ([`WalletRegistry`]).
//! - the signing-session state machine ([`SigningSession`]), which only reaches
//!   [`SessionState::Aggregated`] once every participant's partial signature has been verified.
//! - spend gating, which always explains why a wallet cannot be spent ([`SpendEligibility`]).
//! - the [`Musig2Coordinator`] that ties these to the identity store and discovery cache.

pub mod aggregate;
pub mod coordinator;
pub mod errors;
pub mod gating;
pub mod publisher;
pub mod registry;
pub mod session;
pub mod subscriptions;
pub mod wallet;

pub use aggregate::{aggregate, AggregatedKey};
pub use coordinator::{CoordinatorConfig, Musig2Coordinator};
pub use errors::{
    AggregationError, CoordinatorError, CoordinatorResult, SessionError, SessionResult,
};
pub use gating::{evaluate_spend, SpendBlocker, SpendEligibility, TransportFlags, TransportStatus};
pub use publisher::{AdvertisementPublisher, PublishError};
pub use registry::WalletRegistry;
pub use session::{SessionId, SessionNotice, SessionProgress, SessionState, SigningSession};
pub use subscriptions::receive_subscriptions;
pub use wallet::{Participant, SharedWallet};
