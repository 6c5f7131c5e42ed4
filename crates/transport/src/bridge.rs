//! Stdio bridge transport: spawn the protocol sidecar and talk to it with
//! newline-delimited JSON over stdin/stdout.

use std::{
    collections::HashMap,
    process::Stdio,
    sync::{
        Arc,
        atomic::{AtomicU64, Ordering},
    },
    time::Duration,
};

use {
    async_trait::async_trait,
    base64::{Engine as _, engine::general_purpose::STANDARD as BASE64},
    relay_config::BridgeConfig,
    relay_sessions::SessionStore,
    tokio::{
        io::{AsyncBufReadExt, AsyncWriteExt, BufReader},
        process::{Child, ChildStdin, ChildStdout, Command},
        sync::{Mutex, mpsc, oneshot},
        task::JoinHandle,
    },
    tracing::{debug, info, trace, warn},
};

use crate::{
    error::TransportError,
    event::{ClientInfo, TransportEvent},
    protocol::{
        BridgeEvent, BridgeMessage, BridgeNotification, BridgeRequest, BridgeResponse,
        METHOD_DESTROY, METHOD_GET_INFO, METHOD_GET_NUMBER_ID, METHOD_SEND_MESSAGE, METHOD_START,
        parse_line,
    },
    transport::{Transport, TransportContext, TransportFactory},
};

const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

type PendingMap = Arc<Mutex<HashMap<u64, oneshot::Sender<BridgeResponse>>>>;

/// Creates one [`BridgeTransport`] per initialization.
pub struct BridgeFactory {
    config: BridgeConfig,
}

impl BridgeFactory {
    pub fn new(config: BridgeConfig) -> Self {
        Self { config }
    }
}

impl TransportFactory for BridgeFactory {
    fn create(&self, ctx: TransportContext) -> Result<Arc<dyn Transport>, TransportError> {
        Ok(Arc::new(BridgeTransport::new(self.config.clone(), ctx)))
    }
}

/// Transport backed by a sidecar process.
pub struct BridgeTransport {
    config: BridgeConfig,
    store: Arc<dyn SessionStore>,
    session_id: String,
    events: mpsc::UnboundedSender<TransportEvent>,
    child: Mutex<Option<Child>>,
    stdin: Mutex<Option<ChildStdin>>,
    pending: PendingMap,
    next_id: AtomicU64,
    /// Handle to the reader task so we can abort it on shutdown.
    reader_handle: Mutex<Option<JoinHandle<()>>>,
    request_timeout: Duration,
}

impl BridgeTransport {
    pub fn new(config: BridgeConfig, ctx: TransportContext) -> Self {
        Self {
            config,
            store: ctx.store,
            session_id: ctx.session_id,
            events: ctx.events,
            child: Mutex::new(None),
            stdin: Mutex::new(None),
            pending: Arc::new(Mutex::new(HashMap::new())),
            next_id: AtomicU64::new(1),
            reader_handle: Mutex::new(None),
            request_timeout: REQUEST_TIMEOUT,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    fn spawn_reader(&self, stdout: ChildStdout) -> JoinHandle<()> {
        let pending = Arc::clone(&self.pending);
        let store = Arc::clone(&self.store);
        let session_id = self.session_id.clone();
        let events = self.events.clone();

        tokio::spawn(async move {
            let mut reader = BufReader::new(stdout);
            let mut line = String::new();
            let reason = loop {
                line.clear();
                match reader.read_line(&mut line).await {
                    Ok(0) => break "bridge process exited".to_string(),
                    Ok(_) => {
                        let trimmed = line.trim();
                        if trimmed.is_empty() {
                            continue;
                        }
                        trace!(raw = %trimmed, "bridge -> gateway");
                        match parse_line(trimmed) {
                            Ok(BridgeMessage::Response(resp)) => {
                                let mut map = pending.lock().await;
                                if let Some(tx) = map.remove(&resp.id) {
                                    let _ = tx.send(resp);
                                } else {
                                    warn!(id = resp.id, "response for unknown request id");
                                }
                            },
                            Ok(BridgeMessage::Event(event)) => {
                                if let BridgeEvent::RemoteSessionSaved { data: Some(data) } = &event
                                {
                                    persist_session(store.as_ref(), &session_id, data).await;
                                }
                                if events.send(event.into_transport_event()).is_err() {
                                    debug!("event receiver dropped, stopping bridge reader");
                                    return;
                                }
                            },
                            Err(e) => warn!(error = %e, "ignoring malformed bridge line"),
                        }
                    },
                    Err(e) => break format!("bridge stdout read failed: {e}"),
                }
            };

            // Fail in-flight requests instead of letting them time out.
            pending.lock().await.clear();
            let _ = events.send(TransportEvent::Disconnected(reason));
        })
    }

    async fn write_line(&self, payload: String) -> Result<(), TransportError> {
        let mut guard = self.stdin.lock().await;
        let stdin = guard
            .as_mut()
            .ok_or_else(|| TransportError::Closed("bridge not started".into()))?;
        stdin.write_all(payload.as_bytes()).await?;
        stdin.write_all(b"\n").await?;
        stdin.flush().await?;
        Ok(())
    }

    /// Send a request and wait for its response.
    async fn request(
        &self,
        method: &str,
        params: Option<serde_json::Value>,
    ) -> Result<serde_json::Value, TransportError> {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let req = BridgeRequest {
            id,
            method: method.into(),
            params,
        };
        let payload = serde_json::to_string(&req)?;

        let (tx, rx) = oneshot::channel();
        self.pending.lock().await.insert(id, tx);

        trace!(method, id, "gateway -> bridge");
        if let Err(e) = self.write_line(payload).await {
            self.pending.lock().await.remove(&id);
            return Err(e);
        }

        let resp = match tokio::time::timeout(self.request_timeout, rx).await {
            Ok(Ok(resp)) => resp,
            Ok(Err(_)) => return Err(TransportError::Closed("bridge stopped responding".into())),
            Err(_) => {
                self.pending.lock().await.remove(&id);
                return Err(TransportError::Timeout);
            },
        };

        if let Some(fault) = resp.error {
            return Err(TransportError::Remote(fault.message));
        }
        Ok(resp.result.unwrap_or(serde_json::Value::Null))
    }

    /// Send a notification (no response expected).
    async fn notify(
        &self,
        method: &str,
        params: Option<serde_json::Value>,
    ) -> Result<(), TransportError> {
        let notif = BridgeNotification {
            method: method.into(),
            params,
        };
        trace!(method, "gateway -> bridge (notification)");
        self.write_line(serde_json::to_string(&notif)?).await
    }
}

async fn persist_session(store: &dyn SessionStore, session_id: &str, data: &str) {
    let blob = match BASE64.decode(data) {
        Ok(blob) => blob,
        Err(e) => {
            warn!(error = %e, "bridge sent an undecodable session blob");
            return;
        },
    };
    if let Err(e) = store.save(session_id, &blob).await {
        warn!(error = %e, "failed to persist session blob");
    }
}

#[async_trait]
impl Transport for BridgeTransport {
    async fn start(&self) -> Result<(), TransportError> {
        let mut child_slot = self.child.lock().await;
        if child_slot.is_some() {
            return Ok(());
        }

        let mut child = Command::new(&self.config.command)
            .args(&self.config.args)
            .envs(&self.config.env)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit())
            .kill_on_drop(true)
            .spawn()
            .map_err(|source| TransportError::Spawn {
                command: self.config.command.clone(),
                source,
            })?;

        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| TransportError::Closed("failed to capture bridge stdin".into()))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| TransportError::Closed("failed to capture bridge stdout".into()))?;

        *self.stdin.lock().await = Some(stdin);
        *self.reader_handle.lock().await = Some(self.spawn_reader(stdout));
        *child_slot = Some(child);
        drop(child_slot);

        let session = self
            .store
            .load(&self.session_id)
            .await?
            .map(|blob| BASE64.encode(blob));
        info!(
            command = %self.config.command,
            restoring = session.is_some(),
            "bridge started"
        );

        self.notify(
            METHOD_START,
            Some(serde_json::json!({
                "sessionId": self.session_id,
                "session": session,
            })),
        )
        .await
    }

    async fn recipient_exists(&self, address: &str) -> Result<bool, TransportError> {
        let result = self
            .request(
                METHOD_GET_NUMBER_ID,
                Some(serde_json::json!({ "address": address })),
            )
            .await?;
        Ok(!result.is_null())
    }

    async fn send_text(&self, address: &str, body: &str) -> Result<(), TransportError> {
        self.request(
            METHOD_SEND_MESSAGE,
            Some(serde_json::json!({ "to": address, "body": body })),
        )
        .await?;
        Ok(())
    }

    async fn info(&self) -> Result<ClientInfo, TransportError> {
        let result = self.request(METHOD_GET_INFO, None).await?;
        Ok(serde_json::from_value(result)?)
    }

    async fn shutdown(&self) {
        if let Err(e) = self.notify(METHOD_DESTROY, None).await {
            debug!(error = %e, "bridge destroy notification failed");
        }
        if let Some(handle) = self.reader_handle.lock().await.take() {
            handle.abort();
        }
        self.stdin.lock().await.take();
        if let Some(mut child) = self.child.lock().await.take() {
            let _ = child.kill().await;
        }
    }
}
