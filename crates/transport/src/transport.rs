use std::sync::Arc;

use {async_trait::async_trait, relay_sessions::SessionStore, tokio::sync::mpsc};

use crate::{
    error::TransportError,
    event::{ClientInfo, TransportEvent},
};

/// A client session with the chat network.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Begin connecting. Returns once the handshake is under way; its
    /// progress arrives as [`TransportEvent`]s.
    async fn start(&self) -> Result<(), TransportError>;

    /// Whether `address` is a registered account on the network.
    async fn recipient_exists(&self, address: &str) -> Result<bool, TransportError>;

    async fn send_text(&self, address: &str, body: &str) -> Result<(), TransportError>;

    async fn info(&self) -> Result<ClientInfo, TransportError>;

    /// Tear the session down. Best effort.
    async fn shutdown(&self);
}

/// Everything a transport needs at construction time.
pub struct TransportContext {
    pub store: Arc<dyn SessionStore>,
    pub session_id: String,
    pub events: mpsc::UnboundedSender<TransportEvent>,
}

/// Builds a fresh transport for each (re)initialization.
pub trait TransportFactory: Send + Sync {
    fn create(&self, ctx: TransportContext) -> Result<Arc<dyn Transport>, TransportError>;
}
