//! Sled-backed storage backend.

use std::path::Path;

use tracing::{debug, trace};

use crate::{errors::DbResult, kv::KvStore};

/// Durable [`KvStore`] backed by a sled database.
#[derive(Debug, Clone)]
pub struct SledKvStore {
    db: sled::Db,
}

impl SledKvStore {
    /// Opens (or creates) the database at `path`.
    pub fn open(path: impl AsRef<Path>) -> DbResult<Self> {
        let db = sled::open(path.as_ref())?;
        debug!(path = %path.as_ref().display(), "opened sled store");
        Ok(Self { db })
    }

    /// Wraps an already open database.
    pub const fn new(db: sled::Db) -> Self {
        Self { db }
    }
}

impl KvStore for SledKvStore {
    fn get(&self, key: &str) -> DbResult<Option<Vec<u8>>> {
        Ok(self.db.get(key)?.map(|v| v.to_vec()))
    }

    fn put(&self, key: &str, value: &[u8]) -> DbResult<()> {
        trace!(%key, len = value.len(), "put");
        self.db.insert(key, value)?;
        // Structural writes must survive an immediate process kill.
        self.db.flush()?;
        Ok(())
    }

    fn delete(&self, key: &str) -> DbResult<()> {
        self.db.remove(key)?;
        self.db.flush()?;
        Ok(())
    }
}
