//! The storage interface and the keys used in it.

use std::fmt::Debug;

use crate::errors::DbResult;

/// Storage key of the identity snapshot: `[publicKeyHex, IdentityRecord][]`.
pub const IDENTITIES_KEY: &str = "identities";

/// Storage key of the discovery cache snapshot: `[cacheKey, CacheEntry][]`.
pub const DISCOVERY_CACHE_KEY: &str = "discovery:cache";

/// Storage key of the shared wallet list: `SharedWallet[]`.
pub const SHARED_WALLETS_KEY: &str = "shared_wallets";

/// Storage key of the contact book snapshot: `Contact[]`.
pub const CONTACTS_KEY: &str = "contacts";

/// Storage key of the ids of ended signing sessions: `SessionId[]`.
pub const RETIRED_SESSIONS_KEY: &str = "musig2:retired_sessions";

/// A synchronous byte-oriented key-value store.
///
/// Implementations must make each `put` atomic with respect to concurrent `get`s of the same
/// key.
pub trait KvStore: Debug + Send + Sync {
    /// Reads the value stored under `key`.
    fn get(&self, key: &str) -> DbResult<Option<Vec<u8>>>;

    /// Replaces the value stored under `key`.
    fn put(&self, key: &str, value: &[u8]) -> DbResult<()>;

    /// Removes `key`. Removing an absent key is not an error.
    fn delete(&self, key: &str) -> DbResult<()>;
}
