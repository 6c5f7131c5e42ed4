use serde::{Deserialize, Serialize};

/// State of the chat-network session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionState {
    /// No transport has been started yet.
    Uninitialized,
    /// Transport built, handshake in flight.
    Initializing,
    /// A pairing code is out, waiting for the user to scan it.
    AwaitingPairing,
    /// Credentials accepted, session loading.
    Authenticating,
    Ready,
    /// Lost a ready session; a restart may be scheduled.
    Disconnected,
    /// Unusable until a restart or a manual initialize.
    Failed,
}

impl ConnectionState {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Uninitialized => "uninitialized",
            Self::Initializing => "initializing",
            Self::AwaitingPairing => "awaiting_pairing",
            Self::Authenticating => "authenticating",
            Self::Ready => "ready",
            Self::Disconnected => "disconnected",
            Self::Failed => "failed",
        }
    }

    /// States from which a new transport may be started.
    pub fn is_restartable(self) -> bool {
        matches!(self, Self::Uninitialized | Self::Disconnected | Self::Failed)
    }

    /// States where a transport is alive but not yet ready.
    pub fn is_connecting(self) -> bool {
        matches!(
            self,
            Self::Initializing | Self::AwaitingPairing | Self::Authenticating
        )
    }

    /// Whether `self -> to` is an edge of the lifecycle state machine.
    pub fn can_transition(self, to: Self) -> bool {
        use ConnectionState::*;

        match (self, to) {
            (_, Failed) => true,
            (from, Initializing) => from.is_restartable(),
            (Initializing | AwaitingPairing, AwaitingPairing) => true,
            (Initializing | AwaitingPairing | Authenticating, Authenticating) => true,
            (Authenticating, Ready) => true,
            (Ready, Disconnected) => true,
            _ => false,
        }
    }
}

impl std::fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::{ConnectionState::*, *};

    const ALL: [ConnectionState; 7] = [
        Uninitialized,
        Initializing,
        AwaitingPairing,
        Authenticating,
        Ready,
        Disconnected,
        Failed,
    ];

    #[test]
    fn happy_path_edges() {
        assert!(Uninitialized.can_transition(Initializing));
        assert!(Initializing.can_transition(AwaitingPairing));
        assert!(AwaitingPairing.can_transition(AwaitingPairing));
        assert!(AwaitingPairing.can_transition(Authenticating));
        assert!(Authenticating.can_transition(Ready));
        assert!(Ready.can_transition(Disconnected));
        assert!(Disconnected.can_transition(Initializing));
        assert!(Failed.can_transition(Initializing));
    }

    #[test]
    fn any_state_can_fail() {
        for from in ALL {
            assert!(from.can_transition(Failed), "{from} -> failed");
        }
    }

    #[test]
    fn ready_is_only_reachable_from_authenticating() {
        for from in ALL {
            assert_eq!(from.can_transition(Ready), from == Authenticating, "{from}");
        }
    }

    #[test]
    fn live_states_cannot_reinitialize() {
        for from in [Initializing, AwaitingPairing, Authenticating, Ready] {
            assert!(!from.can_transition(Initializing), "{from}");
        }
    }

    #[test]
    fn disconnect_only_from_ready() {
        for from in ALL {
            assert_eq!(from.can_transition(Disconnected), from == Ready, "{from}");
        }
    }

    #[test]
    fn serializes_snake_case() {
        assert_eq!(
            serde_json::to_string(&AwaitingPairing).unwrap(),
            "\"awaiting_pairing\""
        );
    }
}
