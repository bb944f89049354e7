//! Ids of sessions that ended and may never be reopened.

use std::{collections::HashSet, sync::Arc};

use concord_db::{kv::RETIRED_SESSIONS_KEY, KvStore, Persister};
use parking_lot::Mutex;
use tracing::{error, info};

use super::SessionId;

/// The retired-id set, written through to storage so that it survives a restart.
#[derive(Debug)]
pub(crate) struct RetiredSessions {
    ids: Mutex<HashSet<SessionId>>,
    persister: Persister,
}

impl RetiredSessions {
    /// Loads the persisted set.
    pub(crate) fn open(store: Arc<dyn KvStore>) -> Self {
        let persister = Persister::new(store, RETIRED_SESSIONS_KEY);
        let ids: HashSet<SessionId> = persister.load_or_default();
        info!(count = ids.len(), "loaded retired session ids");

        Self {
            ids: Mutex::new(ids),
            persister,
        }
    }

    pub(crate) fn contains(&self, id: &SessionId) -> bool {
        self.ids.lock().contains(id)
    }

    /// Retires `id`. It stays retired in memory even if the write fails.
    pub(crate) fn insert(&self, id: SessionId) {
        let mut ids = self.ids.lock();
        if !ids.insert(id) {
            return;
        }
        if let Err(err) = self.persister.save(&*ids) {
            error!(session_id = %id, %err, "failed to persist retired session id");
        }
    }
}
