use std::time::Duration;

use {relay_config::ConnectionConfig, serde::Serialize};

/// Why the session went down, as far as restarting is concerned.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureClass {
    /// Start failed with a recoverable transport error.
    Transient,
    /// The network logged the session out.
    Logout,
    /// The session was taken over or unpaired.
    Conflict,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RestartDecision {
    RetryAfter(Duration),
    /// Ceiling reached. Only a manual initialize starts over.
    GiveUp,
}

/// Bounded, fixed-delay restart policy.
///
/// One counter is shared by every failure class, so a connection that
/// flaps between classes without reaching ready still exhausts the
/// ceiling. Delays are fixed per class rather than exponential: the
/// network rate-limits reconnects on its own.
#[derive(Debug, Clone)]
pub struct RestartPolicy {
    attempts: u32,
    ceiling: u32,
    transient_delay: Duration,
    logout_delay: Duration,
    conflict_delay: Duration,
}

impl Default for RestartPolicy {
    fn default() -> Self {
        Self::from_config(&ConnectionConfig::default())
    }
}

impl RestartPolicy {
    pub fn from_config(config: &ConnectionConfig) -> Self {
        Self {
            attempts: 0,
            ceiling: config.restart_ceiling,
            transient_delay: config.retry_delays.transient(),
            logout_delay: config.retry_delays.logout(),
            conflict_delay: config.retry_delays.conflict(),
        }
    }

    pub fn on_failure(&mut self, class: FailureClass) -> RestartDecision {
        self.attempts = self.attempts.saturating_add(1);
        if self.attempts > self.ceiling {
            return RestartDecision::GiveUp;
        }
        RestartDecision::RetryAfter(self.delay_for(class))
    }

    pub fn delay_for(&self, class: FailureClass) -> Duration {
        match class {
            FailureClass::Transient => self.transient_delay,
            FailureClass::Logout => self.logout_delay,
            FailureClass::Conflict => self.conflict_delay,
        }
    }

    pub fn reset(&mut self) {
        self.attempts = 0;
    }

    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    pub fn ceiling(&self) -> u32 {
        self.ceiling
    }
}
