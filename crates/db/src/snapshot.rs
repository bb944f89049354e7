//! JSON snapshots of a component's working copy.

use std::sync::Arc;

use parking_lot::Mutex;
use serde::{de::DeserializeOwned, Serialize};
use tracing::{debug, error};

use crate::{
    errors::{DbResult, StorageError},
    kv::KvStore,
};

/// Reads and writes one JSON value under one storage key.
///
/// Writes are serialized through an internal lock so that two flushes of the same key can
/// never interleave, even when they are triggered from different tasks. Snapshots taken
/// outside that lock carry a generation, and a snapshot older than the last one written is
/// dropped instead of overwriting newer state.
#[derive(Debug)]
pub struct Persister {
    store: Arc<dyn KvStore>,
    key: &'static str,
    /// Generation of the last snapshot written.
    write_lock: Mutex<u64>,
}

impl Persister {
    /// Creates a persister for `key` on `store`.
    pub fn new(store: Arc<dyn KvStore>, key: &'static str) -> Self {
        Self {
            store,
            key,
            write_lock: Mutex::new(0),
        }
    }

    /// The storage key this persister owns.
    pub const fn key(&self) -> &'static str {
        self.key
    }

    /// Decodes the stored value, distinguishing absence from corruption.
    pub fn try_load<T: DeserializeOwned>(&self) -> DbResult<Option<T>> {
        let Some(bytes) = self.store.get(self.key)? else {
            return Ok(None);
        };

        serde_json::from_slice(&bytes)
            .map(Some)
            .map_err(|e| StorageError::CacheCorruption {
                key: self.key.to_owned(),
                reason: e.to_string(),
            })
    }

    /// Loads the stored value, starting empty when it is missing or unreadable.
    ///
    /// A corrupt value is deleted and reported at `error` level; it is never propagated.
    pub fn load_or_default<T: DeserializeOwned + Default>(&self) -> T {
        match self.try_load() {
            Ok(Some(value)) => value,
            Ok(None) => T::default(),
            Err(err @ StorageError::CacheCorruption { .. }) => {
                error!(key = self.key, %err, "discarding corrupt snapshot, starting empty");
                if let Err(err) = self.store.delete(self.key) {
                    error!(key = self.key, %err, "could not delete corrupt snapshot");
                }
                T::default()
            }
            Err(err) => {
                error!(key = self.key, %err, "could not read snapshot, starting empty");
                T::default()
            }
        }
    }

    /// Encodes and writes `value` unconditionally.
    pub fn save<T: Serialize + ?Sized>(&self, value: &T) -> DbResult<()> {
        let bytes = serde_json::to_vec(value)?;
        let _written = self.write_lock.lock();
        self.store.put(self.key, &bytes)?;
        debug!(key = self.key, len = bytes.len(), "snapshot written");
        Ok(())
    }

    /// Encodes and writes `value` unless a snapshot of a later generation was already written.
    ///
    /// Returns whether the value was written.
    pub fn save_generation<T: Serialize + ?Sized>(
        &self,
        generation: u64,
        value: &T,
    ) -> DbResult<bool> {
        let bytes = serde_json::to_vec(value)?;
        let mut written = self.write_lock.lock();
        if generation < *written {
            debug!(key = self.key, generation, latest = *written, "skipping stale snapshot");
            return Ok(false);
        }
        self.store.put(self.key, &bytes)?;
        *written = generation;
        debug!(key = self.key, generation, len = bytes.len(), "snapshot written");
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::inmemory::InMemoryKvStore;

    #[test]
    fn corrupt_snapshot_is_discarded() {
        let store = InMemoryKvStore::new();
        store.put("discovery:cache", b"{not json").unwrap();

        let persister = Persister::new(Arc::new(store.clone()), "discovery:cache");
        assert!(matches!(
            persister.try_load::<Vec<(String, u64)>>(),
            Err(StorageError::CacheCorruption { .. })
        ));

        let loaded: Vec<(String, u64)> = persister.load_or_default();
        assert!(loaded.is_empty());
        assert!(store.get("discovery:cache").unwrap().is_none());
    }

    #[test]
    fn stale_generation_is_skipped() {
        let persister = Persister::new(Arc::new(InMemoryKvStore::new()), "shared_wallets");

        assert!(persister.save_generation(2, &vec![2u8]).unwrap());
        assert!(!persister.save_generation(1, &vec![1u8]).unwrap());
        assert_eq!(persister.try_load::<Vec<u8>>().unwrap(), Some(vec![2]));
    }

    #[test]
    fn roundtrips_pairs() {
        let persister = Persister::new(Arc::new(InMemoryKvStore::new()), "identities");
        let pairs = vec![("a".to_owned(), 1u64), ("b".to_owned(), 2)];

        persister.save(&pairs).unwrap();
        assert_eq!(persister.try_load::<Vec<(String, u64)>>().unwrap(), Some(pairs));
    }
}
