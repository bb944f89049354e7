//! The identity store.
//!
//! The store owns the only mutable copy of the identity set. The address and peer-id indices
//! are derived from it and rebuilt lazily after any change that could affect them; inserts and
//! updates only ever go through the primary map.
//!
//! Persistence has two speeds. Structural changes (creation, removal, a new peer id) are written
//! before the call returns so that they survive an immediate process kill. Presence and
//! capability refreshes only mark the snapshot dirty and are written by the next due flush.

use std::{collections::HashMap, sync::Arc};

use bitcoin::Network;
use concord_db::{kv::IDENTITIES_KEY, DbResult, Flush, KvStore, Persister, WriteCoalescer};
use concord_primitives::{Clock, PublicKeyHex, UnixMillis};
use parking_lot::RwLock;
use tokio::sync::broadcast;
use tracing::{debug, info, trace, warn};

use crate::{
    errors::{IdentityError, IdentityResult},
    events::IdentityEvent,
    identity::{Identity, PresenceUpdate, SignerInfo},
};

/// Capacity of the event channel. Slow subscribers lag rather than block the store.
const EVENT_CHANNEL_CAPACITY: usize = 256;

/// Configuration of an [`IdentityStore`].
#[derive(Debug, Clone, Copy)]
pub struct IdentityStoreConfig {
    /// Network cached addresses are rendered for.
    pub network: Network,

    /// Coalescing window for presence writes.
    pub flush_debounce_ms: u64,
}

impl Default for IdentityStoreConfig {
    fn default() -> Self {
        Self {
            network: Network::Signet,
            flush_debounce_ms: concord_db::coalesce::DEFAULT_WINDOW_MS,
        }
    }
}

#[derive(Debug, Default)]
struct Indices {
    by_address: HashMap<String, PublicKeyHex>,
    by_peer_id: HashMap<String, PublicKeyHex>,
}

impl Indices {
    fn build(identities: &HashMap<PublicKeyHex, Identity>) -> Self {
        let mut indices = Self::default();
        for (key, identity) in identities {
            indices.by_address.insert(identity.address.clone(), *key);
            if let Some(peer_id) = &identity.peer_id {
                indices.by_peer_id.insert(peer_id.clone(), *key);
            }
        }
        indices
    }
}

#[derive(Debug)]
struct Inner {
    identities: HashMap<PublicKeyHex, Identity>,
    indices: Option<Indices>,
    coalescer: WriteCoalescer,
    /// Bumped on every mutation; orders snapshots.
    generation: u64,
}

impl Inner {
    fn touch(&mut self) {
        self.generation += 1;
    }

    fn invalidate_indices(&mut self) {
        self.indices = None;
    }

    fn snapshot(&self) -> (u64, Vec<(PublicKeyHex, Identity)>) {
        let mut pairs: Vec<_> = self
            .identities
            .iter()
            .map(|(k, v)| (*k, v.clone()))
            .collect();
        pairs.sort_by(|a, b| a.0.cmp(&b.0));
        (self.generation, pairs)
    }
}

/// Canonical registry of identities keyed by public key.
#[derive(Debug)]
pub struct IdentityStore {
    network: Network,
    clock: Arc<dyn Clock>,
    inner: RwLock<Inner>,
    persister: Persister,
    events: broadcast::Sender<IdentityEvent>,
}

impl IdentityStore {
    /// Opens the store, loading any persisted identities.
    ///
    /// Addresses are recomputed for the configured network and every identity starts offline;
    /// presence is never trusted across restarts.
    pub fn open(
        store: Arc<dyn KvStore>,
        clock: Arc<dyn Clock>,
        config: IdentityStoreConfig,
    ) -> Self {
        let persister = Persister::new(store, IDENTITIES_KEY);
        let loaded: Vec<(PublicKeyHex, Identity)> = persister.load_or_default();

        let identities: HashMap<_, _> = loaded
            .into_iter()
            .map(|(key, mut identity)| {
                identity.public_key_hex = key;
                identity.address = identity.address_on(config.network);
                identity.is_online = false;
                (key, identity)
            })
            .collect();
        info!(count = identities.len(), network = %config.network, "loaded identities");

        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Self {
            network: config.network,
            clock,
            inner: RwLock::new(Inner {
                identities,
                indices: None,
                coalescer: WriteCoalescer::new(config.flush_debounce_ms),
                generation: 0,
            }),
            persister,
            events,
        }
    }

    /// The network cached addresses are rendered for.
    pub const fn network(&self) -> Network {
        self.network
    }

    /// Subscribes to identity events.
    pub fn subscribe(&self) -> broadcast::Receiver<IdentityEvent> {
        self.events.subscribe()
    }

    /// Returns the identity for `public_key_hex`, creating it if this is the first observation.
    ///
    /// Idempotent: a second call with the same key never creates a second record. The returned
    /// address is computed for `network`.
    pub fn find_or_create(
        &self,
        public_key_hex: &str,
        network: Network,
    ) -> IdentityResult<Identity> {
        let key = PublicKeyHex::parse(public_key_hex)?;
        let mut identity = self.find_or_create_key(key)?;
        if network != self.network {
            identity.address = identity.address_on(network);
        }
        Ok(identity)
    }

    /// [`Self::find_or_create`] for an already validated key on the store's network.
    pub fn find_or_create_key(&self, key: PublicKeyHex) -> IdentityResult<Identity> {
        if let Some(existing) = self.inner.read().identities.get(&key) {
            return Ok(existing.clone());
        }

        let now = self.clock.now_ms();
        let (identity, created) = {
            let mut inner = self.inner.write();
            // Re-check under the write lock; another caller may have won the race.
            let created = !inner.identities.contains_key(&key);
            let identity = inner
                .identities
                .entry(key)
                .or_insert_with(|| Identity::new(key, self.network, now))
                .clone();
            if created {
                inner.touch();
                inner.invalidate_indices();
            }
            (identity, created)
        };

        if created {
            debug!(%key, address = %identity.address, "created identity");
            self.flush_structural()?;
            self.emit(IdentityEvent::Created(key));
        }
        Ok(identity)
    }

    /// Records a presence observation.
    ///
    /// Cheap and frequent: never writes to storage directly. Returns `false` when the key is
    /// unknown.
    pub fn update_presence(&self, key: &PublicKeyHex, update: PresenceUpdate) -> bool {
        let now = self.clock.now_ms();
        let changed = {
            let mut inner = self.inner.write();
            let Some(identity) = inner.identities.get_mut(key) else {
                trace!(%key, "presence for unknown identity");
                return false;
            };

            let changed = identity.is_online != update.is_online
                || identity.last_seen_at != update.last_seen_at;
            identity.is_online = update.is_online;
            identity.last_seen_at = update.last_seen_at;
            identity.updated_at = now;

            inner.touch();
            inner.coalescer.mark_dirty(now);
            changed
        };

        if changed {
            self.emit(IdentityEvent::PresenceChanged {
                public_key: *key,
                is_online: update.is_online,
                last_seen_at: update.last_seen_at,
            });
        }
        true
    }

    /// Merges discovery data into the signer's identity, creating it if needed.
    ///
    /// The signer is marked online and seen now.
    pub fn update_from_signer(&self, info: SignerInfo) -> IdentityResult<Identity> {
        let now = self.clock.now_ms();
        let key = info.public_key;

        let (identity, created, structural) = {
            let mut inner = self.inner.write();
            let created = !inner.identities.contains_key(&key);
            let identity = inner
                .identities
                .entry(key)
                .or_insert_with(|| Identity::new(key, self.network, now));

            let peer_changed = info.peer_id.is_some() && identity.peer_id != info.peer_id;
            if peer_changed {
                identity.peer_id = info.peer_id;
            }
            if !info.multiaddrs.is_empty() {
                identity.multiaddrs = info.multiaddrs;
            }
            identity.signer_capabilities = Some(info.capabilities);
            identity.is_online = true;
            identity.last_seen_at = Some(now);
            identity.updated_at = now;
            let identity = identity.clone();

            inner.touch();
            let structural = created || peer_changed;
            if structural {
                inner.invalidate_indices();
            } else {
                inner.coalescer.mark_dirty(now);
            }
            (identity, created, structural)
        };

        if structural {
            self.flush_structural()?;
        }
        if created {
            self.emit(IdentityEvent::Created(key));
        }
        self.emit(IdentityEvent::SignerUpdated(key));
        Ok(identity)
    }

    /// Marks offline every online signer whose advertisement has expired.
    ///
    /// The last-seen time is kept, so a signer that just lapsed may still resolve as recently
    /// online. Written by the next due flush. Returns the keys that went offline.
    pub fn expire_signers(&self) -> Vec<PublicKeyHex> {
        let now = self.clock.now_ms();
        let lapsed: Vec<(PublicKeyHex, Option<UnixMillis>)> = {
            let mut inner = self.inner.write();
            let lapsed: Vec<_> = inner
                .identities
                .iter_mut()
                .filter(|(_, identity)| {
                    identity.is_online
                        && identity
                            .signer_capabilities
                            .as_ref()
                            .is_some_and(|caps| caps.has_expired(now))
                })
                .map(|(key, identity)| {
                    identity.is_online = false;
                    identity.updated_at = now;
                    (*key, identity.last_seen_at)
                })
                .collect();

            if !lapsed.is_empty() {
                inner.touch();
                inner.coalescer.mark_dirty(now);
            }
            lapsed
        };

        for (key, last_seen_at) in &lapsed {
            debug!(%key, "signer advertisement expired, marking offline");
            self.emit(IdentityEvent::PresenceChanged {
                public_key: *key,
                is_online: false,
                last_seen_at: *last_seen_at,
            });
        }
        lapsed.into_iter().map(|(key, _)| key).collect()
    }

    /// Removes an identity at the user's request.
    pub fn remove(&self, key: &PublicKeyHex) -> IdentityResult<Identity> {
        let removed = {
            let mut inner = self.inner.write();
            let removed = inner
                .identities
                .remove(key)
                .ok_or(IdentityError::NotFound(*key))?;
            inner.touch();
            inner.invalidate_indices();
            removed
        };

        info!(%key, "removed identity");
        self.flush_structural()?;
        self.emit(IdentityEvent::Removed(*key));
        Ok(removed)
    }

    /// Looks up an identity by key.
    pub fn get(&self, key: &PublicKeyHex) -> Option<Identity> {
        self.inner.read().identities.get(key).cloned()
    }

    /// Looks up an identity by its address on the store's network.
    pub fn get_by_address(&self, address: &str) -> Option<Identity> {
        self.lookup(|indices| indices.by_address.get(address).copied())
    }

    /// Looks up an identity by transport identifier.
    pub fn get_by_peer_id(&self, peer_id: &str) -> Option<Identity> {
        self.lookup(|indices| indices.by_peer_id.get(peer_id).copied())
    }

    /// All identities, ordered by key.
    pub fn all(&self) -> Vec<Identity> {
        self.inner.read().snapshot().1.into_iter().map(|(_, v)| v).collect()
    }

    /// Number of identities.
    pub fn len(&self) -> usize {
        self.inner.read().identities.len()
    }

    /// Whether the store is empty.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Current time according to the store's clock.
    pub fn now(&self) -> UnixMillis {
        self.clock.now_ms()
    }

    fn lookup(&self, find: impl Fn(&Indices) -> Option<PublicKeyHex>) -> Option<Identity> {
        {
            let inner = self.inner.read();
            if let Some(indices) = &inner.indices {
                return find(indices).and_then(|key| inner.identities.get(&key).cloned());
            }
        }

        let mut inner = self.inner.write();
        if inner.indices.is_none() {
            trace!("rebuilding identity indices");
            let rebuilt = Indices::build(&inner.identities);
            inner.indices = Some(rebuilt);
        }
        let key = inner.indices.as_ref().and_then(&find)?;
        inner.identities.get(&key).cloned()
    }

    fn flush_structural(&self) -> DbResult<()> {
        let (generation, snapshot) = {
            let mut inner = self.inner.write();
            inner.coalescer.clear();
            inner.snapshot()
        };

        self.persister
            .save_generation(generation, &snapshot)
            .map(|_| ())
            .inspect_err(|err| {
                warn!(%err, "structural identity write failed, retrying on next flush");
                self.inner.write().coalescer.mark_dirty(self.clock.now_ms());
            })
    }

    fn emit(&self, event: IdentityEvent) {
        // No subscribers is not an error.
        let _ = self.events.send(event);
    }
}

impl Flush for IdentityStore {
    fn flush_if_due(&self) -> DbResult<bool> {
        let now = self.clock.now_ms();
        let (generation, snapshot) = {
            let mut inner = self.inner.write();
            if !inner.coalescer.take_if_due(now) {
                return Ok(false);
            }
            inner.snapshot()
        };

        self.persister.save_generation(generation, &snapshot)
    }

    fn flush_now(&self) -> DbResult<()> {
        let (generation, snapshot) = {
            let mut inner = self.inner.write();
            if !inner.coalescer.is_dirty() {
                return Ok(());
            }
            inner.coalescer.clear();
            inner.snapshot()
        };

        self.persister.save_generation(generation, &snapshot).map(|_| ())
    }
}
