//! The connection lifecycle manager.
//!
//! Every mutation of the session state goes through one mutex-guarded
//! [`Lifecycle`] record: manual initialization, scheduled restarts, and the
//! transport events pumped in from each transport generation. Nothing awaits
//! while holding it. Reads of the state go through a `watch` channel and
//! never take the lock.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};

use {
    relay_config::ConnectionConfig,
    relay_sessions::{SessionStore, StoreError},
    relay_transport::{
        ClientInfo, Transport, TransportContext, TransportError, TransportEvent, TransportFactory,
    },
    serde::Serialize,
    tokio::{
        sync::{mpsc, watch},
        task::AbortHandle,
    },
    tracing::{debug, error, info, warn},
};

use crate::{
    pairing::{EventStatus, PairingArtifact, PairingBroadcaster, PairingEvent, Snapshot},
    qr,
    restart::{FailureClass, RestartDecision, RestartPolicy},
    state::ConnectionState,
};

/// Result of a call to [`ConnectionManager::initialize`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum InitializeOutcome {
    /// A new transport was built and its start is under way.
    Started,
    AlreadyInProgress,
    AlreadyConnected,
    /// The transport could not be built. The state is now failed.
    Failed,
}

/// Persisted-session and connection status, for operators.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionStatus {
    pub session_id: String,
    pub session_exists: bool,
    pub size: Option<u64>,
    pub saved_at: Option<u64>,
    pub backend: &'static str,
    pub state: ConnectionState,
    pub is_ready: bool,
    pub has_qr: bool,
    pub restart_attempts: u32,
}

struct Lifecycle {
    state: ConnectionState,
    in_progress: bool,
    /// Bumped on every transport start and on shutdown. Events and restart
    /// timers carry the generation they belong to.
    generation: u64,
    transport: Option<Arc<dyn Transport>>,
    restart: RestartPolicy,
    pending_restart: Option<AbortHandle>,
}

pub struct ConnectionManager {
    store: Arc<dyn SessionStore>,
    session_id: String,
    factory: Arc<dyn TransportFactory>,
    broadcaster: Arc<PairingBroadcaster>,
    lifecycle: Mutex<Lifecycle>,
    state_tx: watch::Sender<ConnectionState>,
}

impl ConnectionManager {
    pub fn new(
        config: &ConnectionConfig,
        store: Arc<dyn SessionStore>,
        factory: Arc<dyn TransportFactory>,
        broadcaster: Arc<PairingBroadcaster>,
    ) -> Arc<Self> {
        let (state_tx, _) = watch::channel(ConnectionState::Uninitialized);
        Arc::new(Self {
            store,
            session_id: config.session_id.clone(),
            factory,
            broadcaster,
            lifecycle: Mutex::new(Lifecycle {
                state: ConnectionState::Uninitialized,
                in_progress: false,
                generation: 0,
                transport: None,
                restart: RestartPolicy::from_config(config),
                pending_restart: None,
            }),
            state_tx,
        })
    }

    fn lock(&self) -> MutexGuard<'_, Lifecycle> {
        self.lifecycle.lock().unwrap_or_else(PoisonError::into_inner)
    }

    // ── Reads ────────────────────────────────────────────────────────────────

    pub fn is_ready(&self) -> bool {
        self.current_state() == ConnectionState::Ready
    }

    pub fn current_state(&self) -> ConnectionState {
        *self.state_tx.borrow()
    }

    pub fn current_pairing(&self) -> Option<PairingArtifact> {
        self.broadcaster.current_pairing()
    }

    pub fn restart_attempts(&self) -> u32 {
        self.lock().restart.attempts()
    }

    pub fn watch_state(&self) -> watch::Receiver<ConnectionState> {
        self.state_tx.subscribe()
    }

    pub fn broadcaster(&self) -> &Arc<PairingBroadcaster> {
        &self.broadcaster
    }

    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    /// The transport, but only while the session is ready.
    pub fn ready_transport(&self) -> Option<Arc<dyn Transport>> {
        let lc = self.lock();
        if lc.state == ConnectionState::Ready {
            lc.transport.clone()
        } else {
            None
        }
    }

    // ── Initialization ───────────────────────────────────────────────────────

    /// Start a transport unless one is already starting or connected.
    ///
    /// Resets the restart budget and cancels any scheduled restart. Returns
    /// as soon as the transport is built; the handshake reports back through
    /// transport events. Must be called from within a tokio runtime.
    pub fn initialize(self: &Arc<Self>) -> InitializeOutcome {
        let mut lc = self.lock();
        if lc.in_progress {
            debug!(state = %lc.state, "initialization already in progress");
            return InitializeOutcome::AlreadyInProgress;
        }
        if !lc.state.is_restartable() {
            debug!(state = %lc.state, "already connected, not initializing");
            return InitializeOutcome::AlreadyConnected;
        }
        lc.restart.reset();
        if let Some(pending) = lc.pending_restart.take() {
            pending.abort();
        }
        self.start_locked(&mut lc)
    }

    fn start_locked(self: &Arc<Self>, lc: &mut Lifecycle) -> InitializeOutcome {
        if !self.transition(lc, ConnectionState::Initializing) {
            return InitializeOutcome::AlreadyConnected;
        }
        lc.in_progress = true;
        lc.generation += 1;
        let generation = lc.generation;

        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let ctx = TransportContext {
            store: Arc::clone(&self.store),
            session_id: self.session_id.clone(),
            events: events_tx,
        };
        let previous = lc.transport.take();

        let transport = match self.factory.create(ctx) {
            Ok(transport) => transport,
            Err(e) => {
                if let Some(previous) = previous {
                    tokio::spawn(async move { previous.shutdown().await });
                }
                self.initialization_failed(lc, e);
                return InitializeOutcome::Failed;
            },
        };
        lc.transport = Some(Arc::clone(&transport));
        info!(generation, session_id = %self.session_id, "starting transport");

        tokio::spawn(pump_events(Arc::downgrade(self), generation, events_rx));

        let manager = Arc::downgrade(self);
        tokio::spawn(async move {
            if let Some(previous) = previous {
                previous.shutdown().await;
            }
            if let Err(e) = transport.start().await
                && let Some(manager) = manager.upgrade()
            {
                manager.initialization_error_from(generation, e);
            }
        });

        InitializeOutcome::Started
    }

    fn restart_from(self: &Arc<Self>, generation: u64) {
        let mut lc = self.lock();
        if lc.generation != generation {
            debug!(generation, "scheduled restart superseded");
            return;
        }
        lc.pending_restart = None;
        if lc.in_progress || !lc.state.is_restartable() {
            return;
        }
        info!(
            attempt = lc.restart.attempts(),
            ceiling = lc.restart.ceiling(),
            "restarting connection"
        );
        self.start_locked(&mut lc);
    }

    // ── Transport events ─────────────────────────────────────────────────────

    fn apply_from(self: &Arc<Self>, generation: u64, event: TransportEvent) {
        let mut lc = self.lock();
        if lc.generation != generation {
            debug!(generation, current = lc.generation, ?event, "dropping event from stale transport");
            return;
        }
        self.apply(&mut lc, event);
    }

    fn apply(self: &Arc<Self>, lc: &mut Lifecycle, event: TransportEvent) {
        match event {
            TransportEvent::PairingCodeIssued(code) => self.on_pairing_code(lc, code),
            TransportEvent::RemoteSessionRestored => {
                if !matches!(
                    lc.state,
                    ConnectionState::Initializing | ConnectionState::AwaitingPairing
                ) {
                    warn!(state = %lc.state, "session restored outside of pairing, ignoring");
                    return;
                }
                if self.transition(lc, ConnectionState::Authenticating) {
                    info!("stored session accepted");
                    self.broadcaster.publish(
                        Snapshot::CheckingSession,
                        Some(PairingEvent::new(EventStatus::SessionLoaded)),
                    );
                }
            },
            TransportEvent::Authenticated => {
                if self.transition(lc, ConnectionState::Authenticating) {
                    info!("authenticated");
                    self.broadcaster.publish(
                        Snapshot::CheckingSession,
                        Some(PairingEvent::new(EventStatus::Authenticated)),
                    );
                }
            },
            TransportEvent::AuthFailure(reason) => {
                if lc.state.is_restartable() {
                    warn!(state = %lc.state, %reason, "auth failure while not connecting, ignoring");
                    return;
                }
                if self.transition(lc, ConnectionState::Failed) {
                    lc.in_progress = false;
                    error!(%reason, "authentication failed, not retrying");
                    self.broadcaster.publish(
                        Snapshot::CheckingSession,
                        Some(PairingEvent::new(EventStatus::AuthFailure)),
                    );
                }
            },
            TransportEvent::Ready => {
                if self.transition(lc, ConnectionState::Ready) {
                    lc.in_progress = false;
                    lc.restart.reset();
                    info!(session_id = %self.session_id, "connection ready");
                    self.broadcaster
                        .publish(Snapshot::Ready, Some(PairingEvent::new(EventStatus::Ready)));
                }
            },
            TransportEvent::Disconnected(reason) => {
                if lc.state.is_restartable() {
                    debug!(state = %lc.state, %reason, "disconnect while already down");
                    return;
                }
                let to = if lc.state == ConnectionState::Ready {
                    ConnectionState::Disconnected
                } else {
                    ConnectionState::Failed
                };
                warn!(%reason, from = %lc.state, "transport disconnected");
                self.enter_failure(lc, to, Some(FailureClass::Logout));
            },
            TransportEvent::StateChanged(remote) => {
                if !remote.is_conflict() {
                    debug!(?remote, "remote state changed");
                    return;
                }
                if lc.state.is_restartable() {
                    debug!(state = %lc.state, ?remote, "remote conflict while already down");
                    return;
                }
                warn!(?remote, "session taken over or unpaired");
                self.enter_failure(lc, ConnectionState::Failed, Some(FailureClass::Conflict));
            },
            TransportEvent::RemoteSessionSaved => info!("session saved to store"),
            TransportEvent::RemoteSessionFailed(e) => warn!(error = %e, "failed to save session"),
            TransportEvent::LoadingProgress { percent, message } => {
                info!(percent, %message, "loading");
            },
        }
    }

    fn on_pairing_code(&self, lc: &mut Lifecycle, code: String) {
        if !self.transition(lc, ConnectionState::AwaitingPairing) {
            return;
        }
        let artifact = PairingArtifact::issue(code);
        match qr::render_terminal(&artifact.raw_code) {
            Ok(text) => info!("scan to pair:\n{text}"),
            Err(e) => debug!(error = %e, "cannot render pairing code for terminal"),
        }
        let event = PairingEvent::qr_ready(&artifact);
        self.broadcaster
            .publish(Snapshot::PairingReady(artifact), Some(event));
    }

    fn initialization_error_from(self: &Arc<Self>, generation: u64, err: TransportError) {
        let mut lc = self.lock();
        if lc.generation != generation {
            debug!(generation, error = %err, "start error from stale transport");
            return;
        }
        self.initialization_failed(&mut lc, err);
    }

    fn initialization_failed(self: &Arc<Self>, lc: &mut Lifecycle, err: TransportError) {
        if lc.state.is_restartable() {
            debug!(state = %lc.state, error = %err, "start error while already down");
            return;
        }
        if err.is_transient() {
            warn!(error = %err, "transport failed to start");
            self.enter_failure(lc, ConnectionState::Failed, Some(FailureClass::Transient));
        } else {
            error!(error = %err, "transport failed to start, not retrying");
            self.enter_failure(lc, ConnectionState::Failed, None);
        }
    }

    // ── Transitions and restarts ─────────────────────────────────────────────

    /// Move to `to` if that is an edge of the state machine.
    fn transition(&self, lc: &mut Lifecycle, to: ConnectionState) -> bool {
        let from = lc.state;
        if !from.can_transition(to) {
            warn!(%from, %to, "no such transition, ignoring event");
            return false;
        }
        if from != to {
            info!(%from, %to, "connection state changed");
        }
        lc.state = to;
        self.state_tx.send_replace(to);
        if from == ConnectionState::AwaitingPairing && to != ConnectionState::AwaitingPairing {
            self.broadcaster.clear_pairing();
        }
        true
    }

    fn enter_failure(
        self: &Arc<Self>,
        lc: &mut Lifecycle,
        to: ConnectionState,
        class: Option<FailureClass>,
    ) {
        // A failure report for a connection that is already down is not a
        // new failure.
        if lc.state.is_restartable() {
            debug!(state = %lc.state, %to, "already down, ignoring failure");
            return;
        }
        if !self.transition(lc, to) {
            return;
        }
        lc.in_progress = false;
        self.broadcaster.publish(
            Snapshot::CheckingSession,
            Some(PairingEvent::new(EventStatus::CheckingSession)),
        );
        if let Some(class) = class {
            self.schedule_restart(lc, class);
        }
    }

    fn schedule_restart(self: &Arc<Self>, lc: &mut Lifecycle, class: FailureClass) {
        match lc.restart.on_failure(class) {
            RestartDecision::RetryAfter(delay) => {
                info!(
                    ?class,
                    attempt = lc.restart.attempts(),
                    ceiling = lc.restart.ceiling(),
                    delay_secs = delay.as_secs(),
                    "scheduling restart"
                );
                let generation = lc.generation;
                let manager = Arc::downgrade(self);
                let handle = tokio::spawn(async move {
                    tokio::time::sleep(delay).await;
                    if let Some(manager) = manager.upgrade() {
                        manager.restart_from(generation);
                    }
                });
                if let Some(previous) = lc.pending_restart.replace(handle.abort_handle()) {
                    previous.abort();
                }
            },
            RestartDecision::GiveUp => {
                error!(
                    ?class,
                    ceiling = lc.restart.ceiling(),
                    "restart limit reached, staying failed until reinitialized"
                );
            },
        }
    }

    // ── Session operations ───────────────────────────────────────────────────

    /// Delete the persisted session and drop any pairing code. The
    /// connection state is left alone.
    pub async fn reset_session(&self) -> Result<(), StoreError> {
        self.store.delete(&self.session_id).await?;
        let _lc = self.lock();
        self.broadcaster.clear_pairing();
        info!(session_id = %self.session_id, "session reset");
        Ok(())
    }

    pub async fn session_status(&self) -> Result<SessionStatus, StoreError> {
        let info = if self.store.exists(&self.session_id).await? {
            self.store.describe(&self.session_id).await?
        } else {
            None
        };
        let state = self.current_state();
        Ok(SessionStatus {
            session_id: self.session_id.clone(),
            session_exists: info.is_some(),
            size: info.as_ref().map(|i| i.size),
            saved_at: info.as_ref().map(|i| i.saved_at),
            backend: self.store.backend(),
            state,
            is_ready: state == ConnectionState::Ready,
            has_qr: self.current_pairing().is_some(),
            restart_attempts: self.restart_attempts(),
        })
    }

    /// Account details of the ready session, `None` when not ready.
    pub async fn client_info(&self) -> Result<Option<ClientInfo>, TransportError> {
        match self.ready_transport() {
            Some(transport) => transport.info().await.map(Some),
            None => Ok(None),
        }
    }

    /// Cancel any scheduled restart and stop the transport.
    pub async fn shutdown(&self) {
        let transport = {
            let mut lc = self.lock();
            lc.generation += 1;
            if let Some(pending) = lc.pending_restart.take() {
                pending.abort();
            }
            lc.in_progress = false;
            let to = if lc.state == ConnectionState::Ready {
                Some(ConnectionState::Disconnected)
            } else if lc.state.is_connecting() {
                Some(ConnectionState::Failed)
            } else {
                None
            };
            if let Some(to) = to
                && self.transition(&mut lc, to)
            {
                self.broadcaster.publish(
                    Snapshot::CheckingSession,
                    Some(PairingEvent::new(EventStatus::CheckingSession)),
                );
            }
            lc.transport.take()
        };
        if let Some(transport) = transport {
            transport.shutdown().await;
        }
        info!("connection shut down");
    }
}

/// Feed one transport generation's events into the manager, in order.
async fn pump_events(
    manager: Weak<ConnectionManager>,
    generation: u64,
    mut events: mpsc::UnboundedReceiver<TransportEvent>,
) {
    while let Some(event) = events.recv().await {
        let Some(manager) = manager.upgrade() else {
            break;
        };
        manager.apply_from(generation, event);
    }
    debug!(generation, "transport event stream ended");
}
