//! Human-facing contacts and the presence of the peers behind them.
//!
//! A contact may start as a bare address and later be linked to an identity once the peer's
//! public key becomes known, keeping its id. Presence is resolved from independent signals by
//! the pure [`resolve_status`].

pub mod book;
pub mod contact;
pub mod errors;
pub mod presence;

pub use book::{ContactBook, ContactBookConfig};
pub use contact::Contact;
pub use errors::{ContactError, ContactResult};
pub use presence::{resolve_status, PresencePolicy, PresenceSignals, PresenceStatus};
