//! Fan-out of pairing and lifecycle updates to live observers.
//!
//! Each observer gets a bounded queue. Delivery never waits: an observer
//! whose queue is full or closed is dropped on the spot, the others are
//! unaffected. A new observer is first sent an event describing the current
//! snapshot, queued under the same lock as publishes, so it can never miss
//! an update or see one twice.

use std::{
    collections::HashMap,
    sync::{Arc, Mutex, MutexGuard, PoisonError, Weak},
};

use {
    chrono::{DateTime, Utc},
    serde::Serialize,
    tokio::sync::mpsc::{self, error::TrySendError},
    tracing::{debug, warn},
};

use crate::qr;

const DEFAULT_QUEUE_CAPACITY: usize = 16;

pub type ObserverId = u64;

// ── Payloads ─────────────────────────────────────────────────────────────────

/// The current one-time pairing code and its rendered image.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PairingArtifact {
    pub raw_code: String,
    /// `data:` URL of the QR image. `None` if rendering failed.
    pub rendered_image: Option<String>,
    pub issued_at: DateTime<Utc>,
}

impl PairingArtifact {
    pub fn issue(raw_code: impl Into<String>) -> Self {
        let raw_code = raw_code.into();
        let rendered_image = match qr::render_data_url(&raw_code) {
            Ok(url) => Some(url),
            Err(e) => {
                warn!(error = %e, "failed to render pairing code");
                None
            },
        };
        Self {
            raw_code,
            rendered_image,
            issued_at: Utc::now(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum EventStatus {
    CheckingSession,
    QrReady,
    SessionLoaded,
    Authenticated,
    Ready,
    AuthFailure,
}

/// What observers receive: `{status, qr, timestamp}`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PairingEvent {
    pub status: EventStatus,
    pub qr: Option<String>,
    pub timestamp: DateTime<Utc>,
}

impl PairingEvent {
    pub fn new(status: EventStatus) -> Self {
        Self {
            status,
            qr: None,
            timestamp: Utc::now(),
        }
    }

    pub fn qr_ready(artifact: &PairingArtifact) -> Self {
        Self {
            status: EventStatus::QrReady,
            qr: artifact.rendered_image.clone(),
            timestamp: Utc::now(),
        }
    }
}

/// What a new observer should be told first.
#[derive(Debug, Clone, Default, PartialEq)]
pub enum Snapshot {
    #[default]
    CheckingSession,
    PairingReady(PairingArtifact),
    Ready,
}

impl Snapshot {
    pub fn initial_event(&self) -> PairingEvent {
        match self {
            Self::CheckingSession => PairingEvent::new(EventStatus::CheckingSession),
            Self::PairingReady(artifact) => PairingEvent::qr_ready(artifact),
            Self::Ready => PairingEvent::new(EventStatus::Ready),
        }
    }

    pub fn pairing(&self) -> Option<&PairingArtifact> {
        match self {
            Self::PairingReady(artifact) => Some(artifact),
            _ => None,
        }
    }
}

// ── Broadcaster ──────────────────────────────────────────────────────────────

struct Inner {
    next_id: ObserverId,
    observers: HashMap<ObserverId, mpsc::Sender<PairingEvent>>,
    snapshot: Snapshot,
}

impl Inner {
    fn deliver(&mut self, event: &PairingEvent) {
        self.observers
            .retain(|id, tx| match tx.try_send(event.clone()) {
                Ok(()) => true,
                Err(TrySendError::Full(_)) => {
                    warn!(observer = id, "observer queue full, dropping observer");
                    false
                },
                Err(TrySendError::Closed(_)) => {
                    debug!(observer = id, "observer went away");
                    false
                },
            });
    }
}

pub struct PairingBroadcaster {
    inner: Mutex<Inner>,
    queue_capacity: usize,
}

impl Default for PairingBroadcaster {
    fn default() -> Self {
        Self::with_capacity(DEFAULT_QUEUE_CAPACITY)
    }
}

impl PairingBroadcaster {
    pub fn new() -> Self {
        Self::default()
    }

    /// Broadcaster whose observers queue at most `queue_capacity` events.
    pub fn with_capacity(queue_capacity: usize) -> Self {
        Self {
            inner: Mutex::new(Inner {
                next_id: 1,
                observers: HashMap::new(),
                snapshot: Snapshot::default(),
            }),
            queue_capacity: queue_capacity.max(1),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Register an observer. Its first event describes the current snapshot.
    pub fn subscribe(self: &Arc<Self>) -> Subscription {
        let (tx, rx) = mpsc::channel(self.queue_capacity);
        let mut inner = self.lock();
        let id = inner.next_id;
        inner.next_id += 1;
        // Capacity is at least one, so the first send cannot fail.
        let _ = tx.try_send(inner.snapshot.initial_event());
        inner.observers.insert(id, tx);
        debug!(observer = id, observers = inner.observers.len(), "observer subscribed");
        Subscription {
            id,
            rx,
            broadcaster: Arc::downgrade(self),
        }
    }

    pub fn unsubscribe(&self, id: ObserverId) -> bool {
        let removed = self.lock().observers.remove(&id).is_some();
        if removed {
            debug!(observer = id, "observer unsubscribed");
        }
        removed
    }

    /// Deliver `event` to every observer without touching the snapshot.
    pub fn notify(&self, event: PairingEvent) {
        self.lock().deliver(&event);
    }

    /// Replace the snapshot and, if given, deliver `event`, as one step.
    pub fn publish(&self, snapshot: Snapshot, event: Option<PairingEvent>) {
        let mut inner = self.lock();
        inner.snapshot = snapshot;
        if let Some(event) = event {
            inner.deliver(&event);
        }
    }

    /// Drop the pairing artifact, if any. Returns whether one was present.
    pub fn clear_pairing(&self) -> bool {
        let mut inner = self.lock();
        if matches!(inner.snapshot, Snapshot::PairingReady(_)) {
            inner.snapshot = Snapshot::CheckingSession;
            true
        } else {
            false
        }
    }

    pub fn current_pairing(&self) -> Option<PairingArtifact> {
        self.lock().snapshot.pairing().cloned()
    }

    pub fn snapshot(&self) -> Snapshot {
        self.lock().snapshot.clone()
    }

    pub fn observer_count(&self) -> usize {
        self.lock().observers.len()
    }
}

// ── Subscription ─────────────────────────────────────────────────────────────

/// A live observer. Dropping it unsubscribes.
pub struct Subscription {
    id: ObserverId,
    rx: mpsc::Receiver<PairingEvent>,
    broadcaster: Weak<PairingBroadcaster>,
}

impl Subscription {
    pub fn id(&self) -> ObserverId {
        self.id
    }

    /// Next event, or `None` once the broadcaster dropped this observer.
    pub async fn recv(&mut self) -> Option<PairingEvent> {
        self.rx.recv().await
    }

    pub fn try_recv(&mut self) -> Option<PairingEvent> {
        self.rx.try_recv().ok()
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Some(broadcaster) = self.broadcaster.upgrade() {
            broadcaster.unsubscribe(self.id);
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    fn artifact(code: &str) -> PairingArtifact {
        PairingArtifact::issue(code)
    }

    #[test]
    fn new_observer_sees_checking_session() {
        let b = Arc::new(PairingBroadcaster::new());
        let mut sub = b.subscribe();
        let first = sub.try_recv().unwrap();
        assert_eq!(first.status, EventStatus::CheckingSession);
        assert!(first.qr.is_none());
        assert!(sub.try_recv().is_none());
    }

    #[test]
    fn late_observer_sees_current_pairing_code() {
        let b = Arc::new(PairingBroadcaster::new());
        let art = artifact("2@code-one");
        b.publish(
            Snapshot::PairingReady(art.clone()),
            Some(PairingEvent::qr_ready(&art)),
        );

        let mut sub = b.subscribe();
        let first = sub.try_recv().unwrap();
        assert_eq!(first.status, EventStatus::QrReady);
        assert_eq!(first.qr, art.rendered_image);
        assert!(first.qr.unwrap().starts_with("data:image/svg+xml;base64,"));
    }

    #[test]
    fn ready_snapshot_has_no_code() {
        let b = Arc::new(PairingBroadcaster::new());
        b.publish(Snapshot::Ready, None);
        let mut sub = b.subscribe();
        assert_eq!(sub.try_recv().unwrap().status, EventStatus::Ready);
        assert!(b.current_pairing().is_none());
    }

    #[test]
    fn publish_reaches_every_observer() {
        let b = Arc::new(PairingBroadcaster::new());
        let mut subs: Vec<_> = (0..3).map(|_| b.subscribe()).collect();
        b.notify(PairingEvent::new(EventStatus::Authenticated));
        for sub in &mut subs {
            assert_eq!(sub.try_recv().unwrap().status, EventStatus::CheckingSession);
            assert_eq!(sub.try_recv().unwrap().status, EventStatus::Authenticated);
        }
    }

    #[test]
    fn dropping_subscription_unsubscribes() {
        let b = Arc::new(PairingBroadcaster::new());
        let a = b.subscribe();
        let _keep = b.subscribe();
        assert_eq!(b.observer_count(), 2);
        drop(a);
        assert_eq!(b.observer_count(), 1);
    }

    #[test]
    fn closed_observer_is_removed_and_others_still_receive() {
        let b = Arc::new(PairingBroadcaster::new());
        let mut first = b.subscribe();
        let mut third = b.subscribe();
        {
            // An observer whose receiving side vanished without unsubscribing.
            let (tx, rx) = mpsc::channel(1);
            drop(rx);
            b.lock().observers.insert(99, tx);
        }
        assert_eq!(b.observer_count(), 3);

        b.notify(PairingEvent::new(EventStatus::Ready));

        assert_eq!(b.observer_count(), 2);
        for sub in [&mut first, &mut third] {
            assert_eq!(sub.try_recv().unwrap().status, EventStatus::CheckingSession);
            assert_eq!(sub.try_recv().unwrap().status, EventStatus::Ready);
        }
    }

    #[test]
    fn stalled_observer_is_dropped_when_full() {
        let b = Arc::new(PairingBroadcaster::with_capacity(2));
        let stalled = b.subscribe();
        let mut live = b.subscribe();
        live.try_recv();

        b.notify(PairingEvent::new(EventStatus::SessionLoaded));
        live.try_recv();
        assert_eq!(b.observer_count(), 2);

        b.notify(PairingEvent::new(EventStatus::Authenticated));
        assert_eq!(b.observer_count(), 1);
        assert_eq!(live.try_recv().unwrap().status, EventStatus::Authenticated);
        drop(stalled);
        assert_eq!(b.observer_count(), 1);
    }

    #[test]
    fn clear_pairing_only_touches_pairing_snapshot() {
        let b = PairingBroadcaster::new();
        assert!(!b.clear_pairing());
        b.publish(Snapshot::PairingReady(artifact("2@x")), None);
        assert!(b.current_pairing().is_some());
        assert!(b.clear_pairing());
        assert_eq!(b.snapshot(), Snapshot::CheckingSession);

        b.publish(Snapshot::Ready, None);
        assert!(!b.clear_pairing());
        assert_eq!(b.snapshot(), Snapshot::Ready);
    }

    fn numbered(seq: usize) -> PairingArtifact {
        PairingArtifact {
            raw_code: seq.to_string(),
            rendered_image: Some(seq.to_string()),
            issued_at: Utc::now(),
        }
    }

    /// Sequence number carried by an event, 0 before the first publish.
    fn seq_of(event: &PairingEvent) -> usize {
        match event.status {
            EventStatus::CheckingSession => 0,
            EventStatus::QrReady => event.qr.as_deref().unwrap().parse().unwrap(),
            other => panic!("unexpected event {other:?}"),
        }
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn subscribe_during_publish_sees_each_update_once() {
        const ROUNDS: usize = 500;
        let b = Arc::new(PairingBroadcaster::with_capacity(ROUNDS + 1));

        let publisher = {
            let b = Arc::clone(&b);
            tokio::spawn(async move {
                for seq in 1..=ROUNDS {
                    let art = numbered(seq);
                    let event = PairingEvent::qr_ready(&art);
                    b.publish(Snapshot::PairingReady(art), Some(event));
                    if seq % 8 == 0 {
                        tokio::task::yield_now().await;
                    }
                }
            })
        };
        let subscriber = {
            let b = Arc::clone(&b);
            tokio::spawn(async move {
                let mut subs = Vec::new();
                for _ in 0..64 {
                    subs.push(b.subscribe());
                    tokio::task::yield_now().await;
                }
                subs
            })
        };
        publisher.await.unwrap();
        let subs = subscriber.await.unwrap();

        for mut sub in subs {
            let mut last = seq_of(&sub.try_recv().unwrap());
            while let Some(event) = sub.try_recv() {
                let seq = seq_of(&event);
                assert_eq!(seq, last + 1, "observer {} skipped or repeated", sub.id());
                last = seq;
            }
            assert_eq!(last, ROUNDS, "observer {} missed the tail", sub.id());
        }
    }

    #[test]
    fn event_wire_shape() {
        let json = serde_json::to_value(PairingEvent::new(EventStatus::CheckingSession)).unwrap();
        assert_eq!(json["status"], "checking_session");
        assert!(json["qr"].is_null());
        assert!(json["timestamp"].as_str().unwrap().contains('T'));
    }
}
