/// Config schema types (server, connection lifecycle, messaging, store, bridge).
use std::{collections::HashMap, path::PathBuf, time::Duration};

use serde::{Deserialize, Serialize};

/// Root configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct RelayConfig {
    pub server: ServerConfig,
    pub connection: ConnectionConfig,
    pub messaging: MessagingConfig,
    pub store: StoreConfig,
    pub bridge: BridgeConfig,
}

/// HTTP listener settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub bind: String,
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: "127.0.0.1".into(),
            port: 3000,
        }
    }
}

/// Connection lifecycle and restart policy settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ConnectionConfig {
    /// Key of the persisted session blob in the session store.
    pub session_id: String,
    /// Number of scheduled restarts allowed before giving up.
    pub restart_ceiling: u32,
    pub retry_delays: RetryDelays,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            session_id: "default".into(),
            restart_ceiling: 5,
            retry_delays: RetryDelays::default(),
        }
    }
}

/// Fixed delay (in seconds) before re-initializing, per failure class.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryDelays {
    pub transient_secs: u64,
    pub logout_secs: u64,
    pub conflict_secs: u64,
}

impl Default for RetryDelays {
    fn default() -> Self {
        Self {
            transient_secs: 10,
            logout_secs: 5,
            conflict_secs: 10,
        }
    }
}

impl RetryDelays {
    pub fn transient(&self) -> Duration {
        Duration::from_secs(self.transient_secs)
    }

    pub fn logout(&self) -> Duration {
        Duration::from_secs(self.logout_secs)
    }

    pub fn conflict(&self) -> Duration {
        Duration::from_secs(self.conflict_secs)
    }
}

/// Outbound message settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MessagingConfig {
    /// ISO 3166 region used when a phone number has no country prefix.
    pub default_region: String,
    /// Appended to a normalized number to form a transport address.
    pub address_suffix: String,
}

impl Default for MessagingConfig {
    fn default() -> Self {
        Self {
            default_region: "PK".into(),
            address_suffix: "@c.us".into(),
        }
    }
}

/// Session store location. `None` means `<data_dir>/sessions`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub path: Option<PathBuf>,
}

/// Sidecar process that speaks the chat-network protocol.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BridgeConfig {
    pub command: String,
    pub args: Vec<String>,
    pub env: HashMap<String, String>,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            command: "relay-bridge".into(),
            args: Vec::new(),
            env: HashMap::new(),
        }
    }
}
