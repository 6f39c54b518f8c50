//! Shared per-server circuit breaker.
//!
//! Records live in the shared state store and every transition is a
//! compare-and-swap against the version that was read, so concurrent
//! callers across workers agree on who tripped the circuit and who holds the
//! half-open trial. When the store cannot be reached the breaker fails open:
//! a broken cache must not take every tool down with it.

use crate::gateway::domain::{CircuitAdmission, CircuitPolicy, CircuitRecord, CircuitState};
use crate::gateway::ports::{SharedStateStore, StateKeys, StateStoreError, StateStoreResult};
use crate::tool_registry::domain::ToolServerId;
use chrono::TimeDelta;
use mockable::Clock;
use std::sync::Arc;
use tracing::{error, info, warn};

const MAX_SWAP_ATTEMPTS: usize = 8;

/// Outcome of asking the breaker whether a call may proceed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BreakerDecision {
    /// The circuit is closed.
    Allowed,
    /// The caller holds the single half-open trial.
    Trial,
    /// The store was unreachable; the call proceeds unguarded.
    FailOpen,
    /// The circuit is open.
    Rejected {
        /// Time until a trial becomes possible.
        retry_after: TimeDelta,
    },
}

impl BreakerDecision {
    /// Returns whether the call may proceed.
    #[must_use]
    pub const fn is_permitted(self) -> bool {
        !matches!(self, Self::Rejected { .. })
    }
}

/// Circuit breaker backed by a [`SharedStateStore`].
pub struct CircuitBreaker<S, C>
where
    S: SharedStateStore,
    C: Clock + Send + Sync,
{
    store: Arc<S>,
    clock: Arc<C>,
    keys: StateKeys,
    policy: CircuitPolicy,
}

impl<S, C> CircuitBreaker<S, C>
where
    S: SharedStateStore,
    C: Clock + Send + Sync,
{
    /// Creates a breaker.
    #[must_use]
    pub const fn new(store: Arc<S>, clock: Arc<C>, keys: StateKeys, policy: CircuitPolicy) -> Self {
        Self {
            store,
            clock,
            keys,
            policy,
        }
    }

    /// Returns the thresholds in force.
    #[must_use]
    pub const fn policy(&self) -> CircuitPolicy {
        self.policy
    }

    async fn load(&self, key: &str) -> StateStoreResult<(CircuitRecord, Option<u64>)> {
        let Some(stored) = self.store.get(key).await? else {
            return Ok((CircuitRecord::closed(), None));
        };
        let record = serde_json::from_value(stored.value).unwrap_or_else(|err| {
            warn!(%key, error = %err, "discarding undecodable circuit record");
            CircuitRecord::closed()
        });
        Ok((record, Some(stored.version)))
    }

    async fn swap(
        &self,
        key: &str,
        version: Option<u64>,
        record: &CircuitRecord,
    ) -> StateStoreResult<bool> {
        let value = serde_json::to_value(record).map_err(|err| StateStoreError::corrupt(key, err))?;
        self.store.compare_and_swap(key, version, value, None).await
    }

    /// Decides whether a call to `server_id` may proceed, claiming the
    /// half-open trial when the cooldown has elapsed.
    pub async fn check(&self, server_id: ToolServerId) -> BreakerDecision {
        let key = self.keys.circuit(server_id);
        for _ in 0..MAX_SWAP_ATTEMPTS {
            let (record, version) = match self.load(&key).await {
                Ok(loaded) => loaded,
                Err(err) => return fail_open(server_id, &err),
            };
            let (admission, next) = record.admit(self.policy, self.clock.utc());
            let Some(updated) = next else {
                return match admission {
                    CircuitAdmission::Allowed => BreakerDecision::Allowed,
                    CircuitAdmission::Trial => BreakerDecision::Trial,
                    CircuitAdmission::Rejected { retry_after } => {
                        BreakerDecision::Rejected { retry_after }
                    }
                };
            };
            match self.swap(&key, version, &updated).await {
                Ok(true) => {
                    info!(%server_id, "circuit half-open; trial call admitted");
                    return BreakerDecision::Trial;
                }
                Ok(false) => {}
                Err(err) => return fail_open(server_id, &err),
            }
        }
        warn!(%server_id, "circuit record contended; rejecting call");
        BreakerDecision::Rejected {
            retry_after: TimeDelta::zero(),
        }
    }

    /// Returns whether the circuit is open or half-open, without claiming a
    /// trial. An unreadable record counts as closed.
    pub async fn is_tripped(&self, server_id: ToolServerId) -> bool {
        match self.load(&self.keys.circuit(server_id)).await {
            Ok((record, _)) => record.state() != CircuitState::Closed,
            Err(err) => {
                warn!(%server_id, error = %err, "cannot read circuit record");
                false
            }
        }
    }

    /// Records a successful call, closing the circuit.
    pub async fn record_success(&self, server_id: ToolServerId) {
        let key = self.keys.circuit(server_id);
        for _ in 0..MAX_SWAP_ATTEMPTS {
            let (record, version) = match self.load(&key).await {
                Ok(loaded) => loaded,
                Err(err) => return log_unrecorded(server_id, &err),
            };
            let Some(updated) = record.on_success() else {
                return;
            };
            match self.swap(&key, version, &updated).await {
                Ok(true) => {
                    if record.state() != CircuitState::Closed {
                        info!(%server_id, "circuit closed");
                    }
                    return;
                }
                Ok(false) => {}
                Err(err) => return log_unrecorded(server_id, &err),
            }
        }
        warn!(%server_id, "gave up recording success under contention");
    }

    /// Records a failed call, opening the circuit at the threshold or when a
    /// trial fails.
    pub async fn record_failure(&self, server_id: ToolServerId) {
        let key = self.keys.circuit(server_id);
        for _ in 0..MAX_SWAP_ATTEMPTS {
            let (record, version) = match self.load(&key).await {
                Ok(loaded) => loaded,
                Err(err) => return log_unrecorded(server_id, &err),
            };
            let updated = record.on_failure(self.policy, self.clock.utc());
            match self.swap(&key, version, &updated).await {
                Ok(true) => {
                    if opened(record.state(), updated.state()) {
                        warn!(
                            %server_id,
                            consecutive_failures = updated.consecutive_failures(),
                            "circuit opened"
                        );
                    }
                    return;
                }
                Ok(false) => {}
                Err(err) => return log_unrecorded(server_id, &err),
            }
        }
        warn!(%server_id, "gave up recording failure under contention");
    }

    /// Removes the record, resetting the server to closed.
    pub async fn forget(&self, server_id: ToolServerId) {
        if let Err(err) = self.store.delete(&self.keys.circuit(server_id)).await {
            warn!(%server_id, error = %err, "cannot delete circuit record");
        }
    }

    /// Reads the current record.
    ///
    /// # Errors
    ///
    /// Returns the store error when the record cannot be read.
    pub async fn status(&self, server_id: ToolServerId) -> StateStoreResult<CircuitRecord> {
        let (record, _) = self.load(&self.keys.circuit(server_id)).await?;
        Ok(record)
    }
}

const fn opened(before: CircuitState, after: CircuitState) -> bool {
    !matches!(before, CircuitState::Open { .. }) && matches!(after, CircuitState::Open { .. })
}

fn fail_open(server_id: ToolServerId, err: &StateStoreError) -> BreakerDecision {
    error!(%server_id, error = %err, "circuit state unavailable; failing open");
    BreakerDecision::FailOpen
}

fn log_unrecorded(server_id: ToolServerId, err: &StateStoreError) {
    error!(%server_id, error = %err, "circuit state unavailable; outcome not recorded");
}
