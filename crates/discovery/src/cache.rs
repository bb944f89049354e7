//! The bounded, persistent advertisement cache.
//!
//! The in-memory map is the working copy; storage only sees coalesced JSON snapshots. Two
//! independent mechanisms bound the map:
//!
//! - expiry: entries whose advertisement has expired are dropped on load, on every sweep and
//!   whenever they are read.
//! - capacity: inserting a new key into a full cache evicts the entry with the oldest
//!   `last_access`.

use std::{collections::HashMap, sync::Arc};

use bitcoin::hashes::{sha256, Hash};
use concord_db::{kv::DISCOVERY_CACHE_KEY, DbResult, Flush, KvStore, Persister, WriteCoalescer};
use concord_primitives::{Clock, PublicKeyHex, UnixMillis};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, trace, warn};

use crate::{
    advertisement::Advertisement,
    errors::{DiscoveryError, DiscoveryResult},
};

/// Default number of cached advertisements.
pub const DEFAULT_CAPACITY: usize = 100;

/// The cache key of the advertisement for `public_key`.
///
/// Derived from the key alone so that re-advertising overwrites the previous entry.
pub fn cache_key(public_key: &PublicKeyHex) -> String {
    let preimage = format!("signer:{public_key}");
    sha256::Hash::hash(preimage.as_bytes()).to_string()
}

/// How an advertisement reached this node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DiscoverySource {
    /// Received over pubsub gossip.
    Gossip,
    /// Found through a DHT query.
    Dht,
    /// Sent directly by the peer.
    Direct,
}

/// A cached advertisement with its access bookkeeping.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DiscoveryCacheEntry {
    /// The advertisement itself.
    pub advertisement: Advertisement,
    /// When the key was first cached.
    pub added_at: UnixMillis,
    /// Last insert or read.
    pub last_access: UnixMillis,
    /// Number of reads.
    pub access_count: u64,
    /// Where the latest advertisement came from.
    pub source: DiscoverySource,
}

/// Tunables of a [`DiscoveryCache`].
#[derive(Debug, Clone, Copy)]
pub struct DiscoveryCacheConfig {
    /// Maximum number of entries.
    pub capacity: usize,
    /// Coalescing window for writes.
    pub flush_debounce_ms: u64,
}

impl Default for DiscoveryCacheConfig {
    fn default() -> Self {
        Self {
            capacity: DEFAULT_CAPACITY,
            flush_debounce_ms: concord_db::coalesce::DEFAULT_WINDOW_MS,
        }
    }
}

#[derive(Debug)]
struct Inner {
    entries: HashMap<String, DiscoveryCacheEntry>,
    coalescer: WriteCoalescer,
    generation: u64,
}

impl Inner {
    fn changed(&mut self, now: UnixMillis) {
        self.generation += 1;
        self.coalescer.mark_dirty(now);
    }

    fn sweep(&mut self, now: UnixMillis) -> usize {
        let before = self.entries.len();
        self.entries
            .retain(|_, entry| !entry.advertisement.is_expired(now));
        before - self.entries.len()
    }

    fn evict_lru(&mut self) -> Option<DiscoveryCacheEntry> {
        let victim = self
            .entries
            .iter()
            .min_by(|(ka, a), (kb, b)| a.last_access.cmp(&b.last_access).then(ka.cmp(kb)))
            .map(|(key, _)| key.clone())?;
        self.entries.remove(&victim)
    }

    fn snapshot(&self) -> (u64, Vec<(String, DiscoveryCacheEntry)>) {
        let mut pairs: Vec<_> = self
            .entries
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();
        pairs.sort_by(|a, b| a.0.cmp(&b.0));
        (self.generation, pairs)
    }
}

/// Bounded cache of co-signer advertisements.
///
/// All operations are synchronous and in-memory; persistence happens through [`Flush`].
#[derive(Debug)]
pub struct DiscoveryCache {
    config: DiscoveryCacheConfig,
    clock: Arc<dyn Clock>,
    inner: Mutex<Inner>,
    persister: Persister,
}

impl DiscoveryCache {
    /// Opens the cache, loading and sweeping the persisted snapshot.
    ///
    /// A corrupt snapshot is discarded and the cache starts empty.
    pub fn open(
        store: Arc<dyn KvStore>,
        clock: Arc<dyn Clock>,
        config: DiscoveryCacheConfig,
    ) -> Self {
        let persister = Persister::new(store, DISCOVERY_CACHE_KEY);
        let loaded: Vec<(String, DiscoveryCacheEntry)> = persister.load_or_default();
        let now = clock.now_ms();

        // Keys are recomputed rather than trusted.
        let entries = loaded
            .into_iter()
            .map(|(_, entry)| (cache_key(&entry.advertisement.public_key_hex), entry))
            .collect();
        let mut inner = Inner {
            entries,
            coalescer: WriteCoalescer::new(config.flush_debounce_ms),
            generation: 0,
        };

        let expired = inner.sweep(now);
        let mut evicted = 0;
        while inner.entries.len() > config.capacity {
            inner.evict_lru();
            evicted += 1;
        }
        if expired + evicted > 0 {
            inner.changed(now);
        }
        info!(
            count = inner.entries.len(),
            expired, evicted, "loaded discovery cache"
        );

        Self {
            config,
            clock,
            inner: Mutex::new(inner),
            persister,
        }
    }

    /// Maximum number of entries.
    pub const fn capacity(&self) -> usize {
        self.config.capacity
    }

    /// Reads an advertisement, counting the read as an access.
    ///
    /// An expired entry is removed and reported as absent.
    pub fn get(&self, key: &str) -> Option<Advertisement> {
        let now = self.clock.now_ms();
        let mut inner = self.inner.lock();

        let expired = inner.entries.get(key)?.advertisement.is_expired(now);
        if expired {
            trace!(%key, "dropping expired advertisement on read");
            inner.entries.remove(key);
            inner.changed(now);
            return None;
        }

        let advertisement = inner.entries.get_mut(key).map(|entry| {
            entry.last_access = now;
            entry.access_count += 1;
            entry.advertisement.clone()
        });
        inner.changed(now);
        advertisement
    }

    /// [`Self::get`] by the advertised key.
    pub fn get_by_public_key(&self, public_key: &PublicKeyHex) -> Option<Advertisement> {
        self.get(&cache_key(public_key))
    }

    /// Stores an advertisement, replacing any previous one for the same key.
    ///
    /// Returns the cache key. Advertisements that are already expired are rejected.
    pub fn set(
        &self,
        advertisement: Advertisement,
        source: DiscoverySource,
    ) -> DiscoveryResult<String> {
        let now = self.clock.now_ms();
        if advertisement.is_expired(now) {
            return Err(DiscoveryError::Expired {
                public_key: advertisement.public_key_hex,
                expires_at: advertisement.expires_at,
            });
        }

        let key = cache_key(&advertisement.public_key_hex);
        let mut inner = self.inner.lock();

        if let Some(entry) = inner.entries.get_mut(&key) {
            trace!(pubkey = %advertisement.public_key_hex, "refreshing advertisement");
            entry.advertisement = advertisement;
            entry.last_access = now;
            entry.source = source;
        } else {
            if inner.entries.len() >= self.config.capacity && inner.sweep(now) == 0 {
                if let Some(evicted) = inner.evict_lru() {
                    debug!(
                        pubkey = %evicted.advertisement.public_key_hex,
                        "evicted least recently used advertisement"
                    );
                }
            }
            debug!(pubkey = %advertisement.public_key_hex, ?source, "caching advertisement");
            inner.entries.insert(
                key.clone(),
                DiscoveryCacheEntry {
                    advertisement,
                    added_at: now,
                    last_access: now,
                    access_count: 0,
                    source,
                },
            );
        }

        inner.changed(now);
        Ok(key)
    }

    /// Removes an entry. Returns whether it existed.
    pub fn delete(&self, key: &str) -> bool {
        let now = self.clock.now_ms();
        let mut inner = self.inner.lock();
        let existed = inner.entries.remove(key).is_some();
        if existed {
            inner.changed(now);
        }
        existed
    }

    /// All live entries, ordered by key. Does not count as an access.
    pub fn entries(&self) -> Vec<(String, DiscoveryCacheEntry)> {
        let now = self.clock.now_ms();
        let (_, mut pairs) = self.inner.lock().snapshot();
        pairs.retain(|(_, entry)| !entry.advertisement.is_expired(now));
        pairs
    }

    /// Removes every entry.
    pub fn clear(&self) {
        let now = self.clock.now_ms();
        let mut inner = self.inner.lock();
        inner.entries.clear();
        inner.changed(now);
    }

    /// Number of entries, including expired ones not yet swept.
    pub fn size(&self) -> usize {
        self.inner.lock().entries.len()
    }

    /// Removes expired entries. Returns how many were removed.
    pub fn sweep_expired(&self) -> usize {
        let now = self.clock.now_ms();
        let mut inner = self.inner.lock();
        let removed = inner.sweep(now);
        if removed > 0 {
            debug!(removed, "swept expired advertisements");
            inner.changed(now);
        }
        removed
    }

    /// Live, available advertisements, optionally restricted to one transaction type.
    pub fn active_signers(&self, transaction_type: Option<&str>) -> Vec<Advertisement> {
        let now = self.clock.now_ms();
        self.inner
            .lock()
            .entries
            .values()
            .map(|entry| &entry.advertisement)
            .filter(|ad| ad.is_active(now))
            .filter(|ad| transaction_type.map_or(true, |t| ad.capabilities.supports(t)))
            .cloned()
            .collect()
    }

    fn write(&self, generation: u64, snapshot: &[(String, DiscoveryCacheEntry)]) -> DbResult<bool> {
        self.persister
            .save_generation(generation, snapshot)
            .inspect_err(|err| {
                warn!(%err, "discovery cache write failed");
                self.inner.lock().coalescer.mark_dirty(self.clock.now_ms());
            })
    }
}

impl Flush for DiscoveryCache {
    fn flush_if_due(&self) -> DbResult<bool> {
        let now = self.clock.now_ms();
        let (generation, snapshot) = {
            let mut inner = self.inner.lock();
            if !inner.coalescer.take_if_due(now) {
                return Ok(false);
            }
            inner.snapshot()
        };

        self.write(generation, &snapshot)
    }

    fn flush_now(&self) -> DbResult<()> {
        let (generation, snapshot) = {
            let mut inner = self.inner.lock();
            if !inner.coalescer.is_dirty() {
                return Ok(());
            }
            inner.coalescer.clear();
            inner.snapshot()
        };

        self.write(generation, &snapshot).map(|_| ())
    }
}
