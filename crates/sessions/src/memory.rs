use std::collections::HashMap;

use {async_trait::async_trait, tokio::sync::RwLock};

use crate::store::{SessionInfo, SessionStore, StoreError, now_ms};

/// In-process session store. Nothing survives a restart.
#[derive(Default)]
pub struct MemorySessionStore {
    entries: RwLock<HashMap<String, (u64, Vec<u8>)>>,
}

impl MemorySessionStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl SessionStore for MemorySessionStore {
    async fn exists(&self, session_id: &str) -> Result<bool, StoreError> {
        Ok(self.entries.read().await.contains_key(session_id))
    }

    async fn load(&self, session_id: &str) -> Result<Option<Vec<u8>>, StoreError> {
        Ok(self
            .entries
            .read()
            .await
            .get(session_id)
            .map(|(_, blob)| blob.clone()))
    }

    async fn save(&self, session_id: &str, blob: &[u8]) -> Result<(), StoreError> {
        self.entries
            .write()
            .await
            .insert(session_id.to_string(), (now_ms(), blob.to_vec()));
        Ok(())
    }

    async fn delete(&self, session_id: &str) -> Result<(), StoreError> {
        self.entries.write().await.remove(session_id);
        Ok(())
    }

    async fn describe(&self, session_id: &str) -> Result<Option<SessionInfo>, StoreError> {
        Ok(self
            .entries
            .read()
            .await
            .get(session_id)
            .map(|(saved_at, blob)| SessionInfo {
                session_id: session_id.to_string(),
                size: blob.len() as u64,
                saved_at: *saved_at,
            }))
    }

    fn backend(&self) -> &'static str {
        "memory"
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn save_and_delete() {
        let store = MemorySessionStore::new();
        store.save("main", b"abc").await.unwrap();
        assert!(store.exists("main").await.unwrap());
        assert_eq!(store.describe("main").await.unwrap().unwrap().size, 3);

        store.delete("main").await.unwrap();
        assert!(!store.exists("main").await.unwrap());
        assert!(store.load("main").await.unwrap().is_none());
    }
}
