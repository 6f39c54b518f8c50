//! Process-local shared state store.

use crate::gateway::config::time_delta;
use crate::gateway::ports::{SharedStateStore, StateStoreError, StateStoreResult, VersionedValue};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use mockable::Clock;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use std::time::Duration;

/// In-memory [`SharedStateStore`] whose expiry follows an injected clock.
///
/// Suitable for a single worker and for tests; multi-worker deployments use
/// the PostgreSQL store.
pub struct InMemoryStateStore<C: Clock + Send + Sync> {
    state: Arc<RwLock<StoreState>>,
    clock: Arc<C>,
}

impl<C: Clock + Send + Sync> Clone for InMemoryStateStore<C> {
    fn clone(&self) -> Self {
        Self {
            state: Arc::clone(&self.state),
            clock: Arc::clone(&self.clock),
        }
    }
}

#[derive(Debug, Default)]
struct StoreState {
    entries: HashMap<String, StoredEntry>,
    last_version: u64,
}

#[derive(Debug)]
struct StoredEntry {
    value: Value,
    version: u64,
    expires_at: Option<DateTime<Utc>>,
}

impl StoredEntry {
    fn is_live(&self, now: DateTime<Utc>) -> bool {
        self.expires_at.is_none_or(|deadline| now < deadline)
    }
}

impl StoreState {
    fn live(&self, key: &str, now: DateTime<Utc>) -> Option<&StoredEntry> {
        self.entries.get(key).filter(|entry| entry.is_live(now))
    }

    fn write(
        &mut self,
        key: &str,
        value: Value,
        ttl: Option<Duration>,
        now: DateTime<Utc>,
    ) -> u64 {
        self.last_version += 1;
        let version = self.last_version;
        let expires_at =
            ttl.and_then(|lifetime| now.checked_add_signed(time_delta(lifetime)));
        self.entries.insert(
            key.to_owned(),
            StoredEntry {
                value,
                version,
                expires_at,
            },
        );
        version
    }
}

impl<C: Clock + Send + Sync> InMemoryStateStore<C> {
    /// Creates an empty store.
    #[must_use]
    pub fn new(clock: Arc<C>) -> Self {
        Self {
            state: Arc::new(RwLock::new(StoreState::default())),
            clock,
        }
    }

    /// Returns the number of live keys.
    ///
    /// # Errors
    ///
    /// Returns [`StateStoreError::Unavailable`] when the lock is poisoned.
    pub fn live_keys(&self) -> StateStoreResult<usize> {
        let now = self.clock.utc();
        let state = self.state.read().map_err(|err| lock_error(&err))?;
        Ok(state
            .entries
            .values()
            .filter(|entry| entry.is_live(now))
            .count())
    }
}

fn lock_error(err: &impl std::fmt::Display) -> StateStoreError {
    StateStoreError::unavailable(std::io::Error::other(err.to_string()))
}

#[async_trait]
impl<C: Clock + Send + Sync> SharedStateStore for InMemoryStateStore<C> {
    async fn get(&self, key: &str) -> StateStoreResult<Option<VersionedValue>> {
        let now = self.clock.utc();
        let state = self.state.read().map_err(|err| lock_error(&err))?;
        Ok(state.live(key, now).map(|entry| VersionedValue {
            value: entry.value.clone(),
            version: entry.version,
        }))
    }

    async fn put(&self, key: &str, value: Value, ttl: Option<Duration>) -> StateStoreResult<u64> {
        let now = self.clock.utc();
        let mut state = self.state.write().map_err(|err| lock_error(&err))?;
        Ok(state.write(key, value, ttl, now))
    }

    async fn compare_and_swap(
        &self,
        key: &str,
        expected_version: Option<u64>,
        value: Value,
        ttl: Option<Duration>,
    ) -> StateStoreResult<bool> {
        let now = self.clock.utc();
        let mut state = self.state.write().map_err(|err| lock_error(&err))?;
        let current = state.live(key, now).map(|entry| entry.version);
        if current != expected_version {
            return Ok(false);
        }
        state.write(key, value, ttl, now);
        Ok(true)
    }

    async fn delete(&self, key: &str) -> StateStoreResult<()> {
        let mut state = self.state.write().map_err(|err| lock_error(&err))?;
        state.entries.remove(key);
        Ok(())
    }
}
