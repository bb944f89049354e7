//! Durable key-value storage for identities, advertisements, wallets and contacts.
//!
//! Every component keeps an authoritative in-memory working copy and persists a JSON snapshot of
//! it under a single key. Reads never touch storage after start-up; writes go through a
//! [`Persister`] (single writer per key) and are usually coalesced by a [`WriteCoalescer`].

pub mod coalesce;
pub mod errors;
pub mod flush;
pub mod inmemory;
pub mod kv;
pub mod persistent;
pub mod snapshot;

pub use coalesce::WriteCoalescer;
pub use errors::{DbResult, StorageError};
pub use flush::{spawn_flush_task, Flush};
pub use inmemory::InMemoryKvStore;
pub use kv::KvStore;
pub use persistent::SledKvStore;
pub use snapshot::Persister;
