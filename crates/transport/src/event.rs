use serde::{Deserialize, Serialize};

/// Lifecycle events emitted by a transport client.
#[derive(Debug, Clone, PartialEq)]
pub enum TransportEvent {
    /// A one-time pairing code the user has to scan.
    PairingCodeIssued(String),
    /// A persisted session was accepted; no pairing needed.
    RemoteSessionRestored,
    /// The session blob was written back to the store.
    RemoteSessionSaved,
    RemoteSessionFailed(String),
    Authenticated,
    AuthFailure(String),
    Ready,
    Disconnected(String),
    StateChanged(RemoteState),
    LoadingProgress { percent: u8, message: String },
}

/// Remote session state reported by the chat network.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RemoteState {
    /// The session is open somewhere else.
    Conflict,
    /// The device was unlinked.
    Unpaired,
    Other(String),
}

impl RemoteState {
    pub fn parse(raw: &str) -> Self {
        match raw {
            "CONFLICT" => Self::Conflict,
            "UNPAIRED" | "UNPAIRED_IDLE" => Self::Unpaired,
            other => Self::Other(other.to_string()),
        }
    }

    /// Conflict and unpaired both mean the current session is unusable.
    pub fn is_conflict(&self) -> bool {
        matches!(self, Self::Conflict | Self::Unpaired)
    }
}

/// Account details of the connected session.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClientInfo {
    #[serde(default)]
    pub wid: Option<String>,
    #[serde(default)]
    pub pushname: Option<String>,
    #[serde(default)]
    pub platform: Option<String>,
    #[serde(default)]
    pub battery: Option<u8>,
}
