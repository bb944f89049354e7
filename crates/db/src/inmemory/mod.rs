//! In-memory storage backend.

use std::{collections::HashMap, sync::Arc};

use parking_lot::RwLock;
use tracing::trace;

use crate::{errors::DbResult, kv::KvStore};

/// In-memory [`KvStore`] for tests and ephemeral nodes.
///
/// Clones share the same map, which lets a test "restart" a component on top of the same
/// storage.
#[derive(Debug, Default, Clone)]
pub struct InMemoryKvStore {
    entries: Arc<RwLock<HashMap<String, Vec<u8>>>>,
}

impl InMemoryKvStore {
    /// Creates an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of keys currently stored.
    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    /// Whether nothing is stored.
    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }
}

impl KvStore for InMemoryKvStore {
    fn get(&self, key: &str) -> DbResult<Option<Vec<u8>>> {
        Ok(self.entries.read().get(key).cloned())
    }

    fn put(&self, key: &str, value: &[u8]) -> DbResult<()> {
        trace!(%key, len = value.len(), "put");
        self.entries.write().insert(key.to_owned(), value.to_vec());
        Ok(())
    }

    fn delete(&self, key: &str) -> DbResult<()> {
        self.entries.write().remove(key);
        Ok(())
    }
}
