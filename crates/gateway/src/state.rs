use std::{sync::Arc, time::Instant};

use relay_channel::{ConnectionManager, MessageDispatcher};

// ── Gateway state ────────────────────────────────────────────────────────────

/// Shared gateway runtime state, wrapped in Arc for use across handlers.
pub struct GatewayState {
    pub connection: Arc<ConnectionManager>,
    pub dispatcher: MessageDispatcher,
    /// Server version string.
    pub version: String,
    pub started_at: Instant,
}

impl GatewayState {
    pub fn new(connection: Arc<ConnectionManager>, dispatcher: MessageDispatcher) -> Arc<Self> {
        Arc::new(Self {
            connection,
            dispatcher,
            version: env!("CARGO_PKG_VERSION").to_string(),
            started_at: Instant::now(),
        })
    }

    pub fn uptime_secs(&self) -> u64 {
        self.started_at.elapsed().as_secs()
    }

    /// `"ready"` or `"not_ready"`, as reported by the status endpoints.
    pub fn readiness(&self) -> &'static str {
        if self.connection.is_ready() {
            "ready"
        } else {
            "not_ready"
        }
    }
}
