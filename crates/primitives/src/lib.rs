//! This crate contains general types, traits and pure functions that need to be shared across
//! multiple crates.
//!
//! It lies at the bottom of the crate-hierarchy in this workspace i.e., it does not depend on any
//! other crate in this workspace.

pub mod address;
pub mod errors;
pub mod key_agg;
pub mod pubkey;
pub mod signer;
pub mod time;

pub use address::{identity_address, p2tr_address, parse_address};
pub use errors::{AddressError, AggError, InvalidPublicKey, KeyFormatFault};
pub use pubkey::PublicKeyHex;
pub use signer::{AmountRange, Capabilities};
pub use time::{Clock, ManualClock, SystemClock, UnixMillis};
