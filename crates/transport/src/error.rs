use relay_sessions::StoreError;

/// Error text signatures of failures that go away on a fresh start
/// (browser protocol hiccups, navigation races, a closed page).
const TRANSIENT_SIGNATURES: &[&str] = &[
    "Protocol error",
    "Execution context was destroyed",
    "Target closed",
    "Session closed",
];

#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    /// An error reported by the chat network or the bridge, as text.
    #[error("{0}")]
    Remote(String),
    #[error("transport closed: {0}")]
    Closed(String),
    #[error("transport request timed out")]
    Timeout,
    #[error("failed to spawn bridge `{command}`: {source}")]
    Spawn {
        command: String,
        #[source]
        source: std::io::Error,
    },
    #[error(transparent)]
    Io(#[from] std::io::Error),
    #[error("malformed bridge message: {0}")]
    Json(#[from] serde_json::Error),
    #[error(transparent)]
    Store(#[from] StoreError),
}

impl TransportError {
    /// Whether a fresh initialization is likely to get past this error.
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Closed(_) | Self::Timeout => true,
            Self::Spawn { .. } | Self::Json(_) | Self::Store(_) => false,
            Self::Remote(_) | Self::Io(_) => {
                let text = self.to_string();
                TRANSIENT_SIGNATURES.iter().any(|sig| text.contains(sig))
            },
        }
    }
}
