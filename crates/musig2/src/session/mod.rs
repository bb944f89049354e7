//! MuSig2 signing sessions.
//!
//! A session walks `Created -> NoncesExchanged -> PartialSigsCollected -> Aggregated ->
//! Broadcast`. `Failed` and `Expired` are terminal and reachable from every non-terminal state;
//! entering them discards the session's secret nonce and collected partial signatures.

mod id;
mod machine;
mod nonce;
mod notice;
mod retired;
mod state;

pub use id::SessionId;
pub use machine::{SessionProgress, SigningSession};
pub use nonce::derive_nonce_seed;
pub use notice::SessionNotice;
pub(crate) use retired::RetiredSessions;
pub use state::SessionState;
