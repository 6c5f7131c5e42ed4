use std::time::{SystemTime, UNIX_EPOCH};

use {
    async_trait::async_trait,
    serde::{Deserialize, Serialize},
};

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("session database error: {0}")]
    Database(#[from] sled::Error),
    #[error("corrupt session record: {0}")]
    Codec(#[from] postcard::Error),
}

/// Metadata about a stored session blob, for status reporting.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionInfo {
    pub session_id: String,
    pub size: u64,
    /// Milliseconds since the Unix epoch.
    pub saved_at: u64,
}

/// Opaque key → blob store for chat-network sessions.
#[async_trait]
pub trait SessionStore: Send + Sync {
    /// Whether a session blob is stored under `session_id`.
    async fn exists(&self, session_id: &str) -> Result<bool, StoreError>;

    async fn load(&self, session_id: &str) -> Result<Option<Vec<u8>>, StoreError>;

    /// Store `blob`, replacing any previous one.
    async fn save(&self, session_id: &str, blob: &[u8]) -> Result<(), StoreError>;

    /// Remove the blob. Deleting a missing session is not an error.
    async fn delete(&self, session_id: &str) -> Result<(), StoreError>;

    async fn describe(&self, session_id: &str) -> Result<Option<SessionInfo>, StoreError>;

    /// Backend name for status output.
    fn backend(&self) -> &'static str;
}

pub(crate) fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}
