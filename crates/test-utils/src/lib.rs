//! This crate provides test-utilities shared by the crates in this workspace.
//!
//! Everything here is deterministic: keys and seeds are derived from small integers so that a
//! failing test can be reproduced from its inputs alone.

pub mod keys;
pub mod musig2;
