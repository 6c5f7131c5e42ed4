use std::path::Path;

use {
    async_trait::async_trait,
    serde::{Deserialize, Serialize},
    tracing::debug,
};

use crate::store::{SessionInfo, SessionStore, StoreError, now_ms};

const SESSIONS_TREE: &str = "sessions";

#[derive(Serialize, Deserialize)]
struct SessionRecord {
    saved_at: u64,
    blob: Vec<u8>,
}

/// sled-backed session store. Records are postcard-encoded.
#[derive(Clone)]
pub struct SledSessionStore {
    tree: sled::Tree,
}

impl SledSessionStore {
    /// Open (or create) the database at `path`.
    pub fn open(path: &Path) -> Result<Self, StoreError> {
        let db = sled::open(path)?;
        let tree = db.open_tree(SESSIONS_TREE)?;
        debug!(path = %path.display(), sessions = tree.len(), "opened session store");
        Ok(Self { tree })
    }

    fn record(&self, session_id: &str) -> Result<Option<SessionRecord>, StoreError> {
        match self.tree.get(session_id)? {
            Some(bytes) => Ok(Some(postcard::from_bytes(&bytes)?)),
            None => Ok(None),
        }
    }
}

#[async_trait]
impl SessionStore for SledSessionStore {
    async fn exists(&self, session_id: &str) -> Result<bool, StoreError> {
        Ok(self.tree.contains_key(session_id)?)
    }

    async fn load(&self, session_id: &str) -> Result<Option<Vec<u8>>, StoreError> {
        Ok(self.record(session_id)?.map(|r| r.blob))
    }

    async fn save(&self, session_id: &str, blob: &[u8]) -> Result<(), StoreError> {
        let record = SessionRecord {
            saved_at: now_ms(),
            blob: blob.to_vec(),
        };
        let bytes = postcard::to_allocvec(&record)?;
        self.tree.insert(session_id, bytes)?;
        self.tree.flush_async().await?;
        debug!(session_id, size = blob.len(), "saved session blob");
        Ok(())
    }

    async fn delete(&self, session_id: &str) -> Result<(), StoreError> {
        self.tree.remove(session_id)?;
        self.tree.flush_async().await?;
        debug!(session_id, "deleted session blob");
        Ok(())
    }

    async fn describe(&self, session_id: &str) -> Result<Option<SessionInfo>, StoreError> {
        Ok(self.record(session_id)?.map(|r| SessionInfo {
            session_id: session_id.to_string(),
            size: r.blob.len() as u64,
            saved_at: r.saved_at,
        }))
    }

    fn backend(&self) -> &'static str {
        "sled"
    }
}
