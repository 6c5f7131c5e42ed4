//! Bridge wire format: one JSON object per line in each direction.
//!
//! gateway → bridge: `{"id": 3, "method": "sendMessage", "params": {...}}`
//! or a notification without `id`.
//! bridge → gateway: `{"id": 3, "result": ...}` / `{"id": 3, "error": {"message": "..."}}`
//! or an event `{"event": "qr", "code": "..."}`.

use serde::{Deserialize, Serialize};

use crate::event::{RemoteState, TransportEvent};

pub const METHOD_START: &str = "start";
pub const METHOD_GET_NUMBER_ID: &str = "getNumberId";
pub const METHOD_SEND_MESSAGE: &str = "sendMessage";
pub const METHOD_GET_INFO: &str = "getInfo";
pub const METHOD_DESTROY: &str = "destroy";

#[derive(Debug, Serialize)]
pub struct BridgeRequest {
    pub id: u64,
    pub method: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub params: Option<serde_json::Value>,
}

#[derive(Debug, Serialize)]
pub struct BridgeNotification {
    pub method: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub params: Option<serde_json::Value>,
}

#[derive(Debug, Deserialize)]
pub struct BridgeResponse {
    pub id: u64,
    #[serde(default)]
    pub result: Option<serde_json::Value>,
    #[serde(default)]
    pub error: Option<BridgeFault>,
}

#[derive(Debug, Deserialize)]
pub struct BridgeFault {
    pub message: String,
}

#[derive(Debug, Deserialize, PartialEq)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum BridgeEvent {
    Qr {
        code: String,
    },
    RemoteSessionLoaded,
    RemoteSessionSaved {
        /// Base64 session blob to persist.
        #[serde(default)]
        data: Option<String>,
    },
    RemoteSessionFailed {
        #[serde(default)]
        error: String,
    },
    Authenticated,
    AuthFailure {
        #[serde(default)]
        message: String,
    },
    Ready,
    Disconnected {
        #[serde(default)]
        reason: String,
    },
    ChangeState {
        state: String,
    },
    LoadingScreen {
        #[serde(default)]
        percent: f64,
        #[serde(default)]
        message: String,
    },
}

impl BridgeEvent {
    pub fn into_transport_event(self) -> TransportEvent {
        match self {
            Self::Qr { code } => TransportEvent::PairingCodeIssued(code),
            Self::RemoteSessionLoaded => TransportEvent::RemoteSessionRestored,
            Self::RemoteSessionSaved { .. } => TransportEvent::RemoteSessionSaved,
            Self::RemoteSessionFailed { error } => TransportEvent::RemoteSessionFailed(error),
            Self::Authenticated => TransportEvent::Authenticated,
            Self::AuthFailure { message } => TransportEvent::AuthFailure(message),
            Self::Ready => TransportEvent::Ready,
            Self::Disconnected { reason } => TransportEvent::Disconnected(reason),
            Self::ChangeState { state } => TransportEvent::StateChanged(RemoteState::parse(&state)),
            Self::LoadingScreen { percent, message } => TransportEvent::LoadingProgress {
                percent: percent.clamp(0.0, 100.0) as u8,
                message,
            },
        }
    }
}

#[derive(Debug)]
pub enum BridgeMessage {
    Response(BridgeResponse),
    Event(BridgeEvent),
}

/// Decode one line from the bridge's stdout.
pub fn parse_line(line: &str) -> Result<BridgeMessage, serde_json::Error> {
    let value: serde_json::Value = serde_json::from_str(line)?;
    if value.get("event").is_some() {
        Ok(BridgeMessage::Event(serde_json::from_value(value)?))
    } else {
        Ok(BridgeMessage::Response(serde_json::from_value(value)?))
    }
}
