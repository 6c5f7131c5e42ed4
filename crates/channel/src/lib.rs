//! Connection lifecycle for the chat-network session.
//!
//! [`ConnectionManager`] owns the session state machine and is the only
//! writer of it. Transport events, manual (re)initialization and scheduled
//! restarts all funnel through it; everything else reads snapshots.
//! [`PairingBroadcaster`] fans pairing/lifecycle updates out to observers,
//! [`RestartPolicy`] decides whether a failure gets another attempt, and
//! [`MessageDispatcher`] services outbound sends against the ready session.

pub mod lifecycle;
pub mod outbound;
pub mod pairing;
pub mod phone;
pub mod qr;
pub mod restart;
pub mod state;

#[cfg(test)]
pub(crate) mod test_support;

pub use {
    lifecycle::{ConnectionManager, InitializeOutcome, SessionStatus},
    outbound::{MessageDispatcher, SendOutcome, SendStatus},
    pairing::{
        EventStatus, ObserverId, PairingArtifact, PairingBroadcaster, PairingEvent, Snapshot,
        Subscription,
    },
    phone::{LibPhoneNormalizer, PhoneNormalizer},
    restart::{FailureClass, RestartDecision, RestartPolicy},
    state::ConnectionState,
};
