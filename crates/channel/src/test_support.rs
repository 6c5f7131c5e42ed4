#![allow(clippy::unwrap_used, clippy::expect_used)]

use std::sync::{
    Arc, Mutex,
    atomic::{AtomicBool, AtomicUsize, Ordering},
};

use {
    async_trait::async_trait,
    relay_sessions::{MemorySessionStore, SessionStore},
    relay_transport::{
        ClientInfo, Transport, TransportContext, TransportError, TransportEvent, TransportFactory,
    },
    tokio::sync::{Notify, mpsc},
};

/// Scriptable transport that records what it was asked to do.
pub(crate) struct MockTransport {
    pub exists: AtomicBool,
    pub exists_error: Mutex<Option<String>>,
    pub send_error: Mutex<Option<String>>,
    pub start_error: Mutex<Option<String>>,
    /// When set, `start` waits for a notification before answering.
    pub start_gate: Mutex<Option<Arc<Notify>>>,
    pub sent: Mutex<Vec<(String, String)>>,
    pub lookups: AtomicUsize,
    pub starts: AtomicUsize,
    pub shutdowns: AtomicUsize,
}

impl Default for MockTransport {
    fn default() -> Self {
        Self {
            exists: AtomicBool::new(true),
            exists_error: Mutex::new(None),
            send_error: Mutex::new(None),
            start_error: Mutex::new(None),
            start_gate: Mutex::new(None),
            sent: Mutex::new(Vec::new()),
            lookups: AtomicUsize::new(0),
            starts: AtomicUsize::new(0),
            shutdowns: AtomicUsize::new(0),
        }
    }
}

impl MockTransport {
    pub fn sent(&self) -> Vec<(String, String)> {
        self.sent.lock().unwrap().clone()
    }

    pub fn fail_sends_with(&self, message: &str) {
        *self.send_error.lock().unwrap() = Some(message.to_string());
    }

    pub fn fail_start_with(&self, message: &str) {
        *self.start_error.lock().unwrap() = Some(message.to_string());
    }

    /// Make `start` block until the returned gate is notified.
    pub fn hold_start(&self) -> Arc<Notify> {
        let gate = Arc::new(Notify::new());
        *self.start_gate.lock().unwrap() = Some(Arc::clone(&gate));
        gate
    }
}

#[async_trait]
impl Transport for MockTransport {
    async fn start(&self) -> Result<(), TransportError> {
        self.starts.fetch_add(1, Ordering::SeqCst);
        let gate = self.start_gate.lock().unwrap().clone();
        if let Some(gate) = gate {
            gate.notified().await;
        }
        match self.start_error.lock().unwrap().clone() {
            Some(message) => Err(TransportError::Remote(message)),
            None => Ok(()),
        }
    }

    async fn recipient_exists(&self, _address: &str) -> Result<bool, TransportError> {
        self.lookups.fetch_add(1, Ordering::SeqCst);
        if let Some(message) = self.exists_error.lock().unwrap().clone() {
            return Err(TransportError::Remote(message));
        }
        Ok(self.exists.load(Ordering::SeqCst))
    }

    async fn send_text(&self, address: &str, body: &str) -> Result<(), TransportError> {
        if let Some(message) = self.send_error.lock().unwrap().clone() {
            return Err(TransportError::Remote(message));
        }
        self.sent
            .lock()
            .unwrap()
            .push((address.to_string(), body.to_string()));
        Ok(())
    }

    async fn info(&self) -> Result<ClientInfo, TransportError> {
        Ok(ClientInfo {
            wid: Some("923012345678@c.us".into()),
            pushname: Some("Relay".into()),
            platform: Some("android".into()),
            battery: None,
        })
    }

    async fn shutdown(&self) {
        self.shutdowns.fetch_add(1, Ordering::SeqCst);
    }
}

/// Hands out the same [`MockTransport`] every time and keeps the event
/// sender of each generation so tests can play the network's part.
#[derive(Default)]
pub(crate) struct MockFactory {
    pub transport: Arc<MockTransport>,
    pub senders: Mutex<Vec<mpsc::UnboundedSender<TransportEvent>>>,
    pub fail_create: AtomicBool,
}

impl MockFactory {
    pub fn created(&self) -> usize {
        self.senders.lock().unwrap().len()
    }

    /// Emit `event` from the most recent transport generation.
    pub fn emit(&self, event: TransportEvent) {
        let senders = self.senders.lock().unwrap();
        senders.last().unwrap().send(event).unwrap();
    }

    /// Emit `event` from the transport built by the `index`-th create call.
    pub fn emit_from(&self, index: usize, event: TransportEvent) {
        let senders = self.senders.lock().unwrap();
        // The receiver may already be gone for a superseded generation.
        let _ = senders[index].send(event);
    }
}

impl TransportFactory for MockFactory {
    fn create(&self, ctx: TransportContext) -> Result<Arc<dyn Transport>, TransportError> {
        if self.fail_create.load(Ordering::SeqCst) {
            return Err(TransportError::Closed("factory refused".into()));
        }
        self.senders.lock().unwrap().push(ctx.events);
        Ok(Arc::clone(&self.transport) as Arc<dyn Transport>)
    }
}

pub(crate) fn memory_store() -> Arc<dyn SessionStore> {
    Arc::new(MemorySessionStore::new())
}
