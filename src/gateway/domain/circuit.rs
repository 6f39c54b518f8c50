//! Circuit breaker state machine.
//!
//! The transitions here are pure: they take the stored record and the
//! current time and return the record to write back. The breaker service
//! applies them with compare-and-swap so concurrent callers agree on who
//! tripped the circuit and who holds the half-open trial.

use chrono::{DateTime, TimeDelta, Utc};
use serde::{Deserialize, Serialize};

/// Breaker thresholds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CircuitPolicy {
    /// Consecutive failures that trip the circuit.
    pub failure_threshold: u32,
    /// Time an open circuit rejects calls.
    pub cooldown: TimeDelta,
}

/// Current breaker position.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum CircuitState {
    /// Calls pass through.
    Closed,
    /// Calls are rejected until the cooldown elapses.
    Open {
        /// When the circuit tripped.
        opened_at: DateTime<Utc>,
    },
    /// A single trial call is in flight.
    HalfOpen {
        /// When the trial was claimed.
        trial_started_at: DateTime<Utc>,
    },
}

/// Whether a call may proceed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CircuitAdmission {
    /// The circuit is closed.
    Allowed,
    /// The caller holds the half-open trial.
    Trial,
    /// The circuit is open.
    Rejected {
        /// Time left until a trial becomes possible.
        retry_after: TimeDelta,
    },
}

/// Per-server breaker record kept in the shared store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CircuitRecord {
    #[serde(flatten)]
    state: CircuitState,
    consecutive_failures: u32,
    last_failure_at: Option<DateTime<Utc>>,
}

impl Default for CircuitRecord {
    fn default() -> Self {
        Self::closed()
    }
}

impl CircuitRecord {
    /// Returns the initial record.
    #[must_use]
    pub const fn closed() -> Self {
        Self {
            state: CircuitState::Closed,
            consecutive_failures: 0,
            last_failure_at: None,
        }
    }

    /// Returns the breaker position.
    #[must_use]
    pub const fn state(&self) -> CircuitState {
        self.state
    }

    /// Returns the consecutive-failure count.
    #[must_use]
    pub const fn consecutive_failures(&self) -> u32 {
        self.consecutive_failures
    }

    /// Returns when the last failure was recorded.
    #[must_use]
    pub const fn last_failure_at(&self) -> Option<DateTime<Utc>> {
        self.last_failure_at
    }

    /// Decides whether a call may proceed at `now`.
    ///
    /// Returns the admission and, when the decision changes the record, the
    /// record that must be written back before the admission holds. An open
    /// circuit whose cooldown has elapsed moves to half-open; a half-open
    /// trial that has not reported back within one cooldown is treated as
    /// abandoned and may be claimed again.
    #[must_use]
    pub fn admit(&self, policy: CircuitPolicy, now: DateTime<Utc>) -> (CircuitAdmission, Option<Self>) {
        let since = match self.state {
            CircuitState::Closed => return (CircuitAdmission::Allowed, None),
            CircuitState::Open { opened_at } => opened_at,
            CircuitState::HalfOpen { trial_started_at } => trial_started_at,
        };

        let elapsed = now.signed_duration_since(since);
        if elapsed >= policy.cooldown {
            let claimed = Self {
                state: CircuitState::HalfOpen {
                    trial_started_at: now,
                },
                ..*self
            };
            return (CircuitAdmission::Trial, Some(claimed));
        }

        (
            CircuitAdmission::Rejected {
                retry_after: policy
                    .cooldown
                    .checked_sub(&elapsed)
                    .unwrap_or(policy.cooldown),
            },
            None,
        )
    }

    /// Returns the record after a successful call, or `None` when nothing
    /// changes.
    #[must_use]
    pub fn on_success(&self) -> Option<Self> {
        (*self != Self::closed()).then(Self::closed)
    }

    /// Returns the record after a failed call.
    #[must_use]
    pub fn on_failure(&self, policy: CircuitPolicy, now: DateTime<Utc>) -> Self {
        let consecutive_failures = self.consecutive_failures.saturating_add(1);
        let state = match self.state {
            CircuitState::Closed if consecutive_failures >= policy.failure_threshold => {
                CircuitState::Open { opened_at: now }
            }
            CircuitState::Closed => CircuitState::Closed,
            CircuitState::HalfOpen { .. } => CircuitState::Open { opened_at: now },
            open @ CircuitState::Open { .. } => open,
        };
        Self {
            state,
            consecutive_failures,
            last_failure_at: Some(now),
        }
    }
}
