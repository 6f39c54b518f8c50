//! `PostgreSQL` implementation of the shared state store.
//!
//! Versions come from a database sequence, so they never repeat across keys,
//! workers or deletions. Expiry is evaluated against the injected clock on
//! every read and conditional write; expired rows linger until they are
//! overwritten or a creating compare-and-swap clears them.

use super::schema::gateway_state;
use crate::gateway::config::time_delta;
use crate::gateway::ports::{SharedStateStore, StateStoreError, StateStoreResult, VersionedValue};
use crate::tool_registry::adapters::postgres::GatewayPgPool;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use diesel::dsl::sql;
use diesel::pg::PgConnection;
use diesel::prelude::*;
use diesel::result::Error as DieselError;
use diesel::sql_types::BigInt;
use diesel::upsert::excluded;
use mockable::Clock;
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;

/// `PostgreSQL`-backed [`SharedStateStore`].
pub struct PostgresStateStore<C: Clock + Send + Sync> {
    pool: GatewayPgPool,
    clock: Arc<C>,
}

impl<C: Clock + Send + Sync> Clone for PostgresStateStore<C> {
    fn clone(&self) -> Self {
        Self {
            pool: self.pool.clone(),
            clock: Arc::clone(&self.clock),
        }
    }
}

struct Write {
    key: String,
    value: Value,
    expires_at: Option<DateTime<Utc>>,
    now: DateTime<Utc>,
}

impl<C: Clock + Send + Sync + 'static> PostgresStateStore<C> {
    /// Creates a store over an existing pool.
    #[must_use]
    pub const fn new(pool: GatewayPgPool, clock: Arc<C>) -> Self {
        Self { pool, clock }
    }

    fn prepare(&self, key: &str, value: Value, ttl: Option<Duration>) -> Write {
        let now = self.clock.utc();
        Write {
            key: key.to_owned(),
            value,
            expires_at: ttl.and_then(|lifetime| now.checked_add_signed(time_delta(lifetime))),
            now,
        }
    }

    async fn run_blocking<F, T>(&self, operation: F) -> StateStoreResult<T>
    where
        F: FnOnce(&mut PgConnection) -> StateStoreResult<T> + Send + 'static,
        T: Send + 'static,
    {
        let pool = self.pool.clone();
        tokio::task::spawn_blocking(move || {
            let mut connection = pool.get().map_err(StateStoreError::unavailable)?;
            operation(&mut connection)
        })
        .await
        .map_err(StateStoreError::unavailable)?
    }
}

fn next_version(connection: &mut PgConnection) -> Result<i64, DieselError> {
    diesel::select(sql::<BigInt>("nextval('gateway_state_version_seq')")).get_result(connection)
}

fn to_u64_version(key: &str, version: i64) -> StateStoreResult<u64> {
    u64::try_from(version).map_err(|err| StateStoreError::corrupt(key, err))
}

fn upsert(connection: &mut PgConnection, write: &Write) -> Result<i64, DieselError> {
    let version = next_version(connection)?;
    diesel::insert_into(gateway_state::table)
        .values((
            gateway_state::key.eq(&write.key),
            gateway_state::value.eq(&write.value),
            gateway_state::version.eq(version),
            gateway_state::expires_at.eq(write.expires_at),
            gateway_state::updated_at.eq(write.now),
        ))
        .on_conflict(gateway_state::key)
        .do_update()
        .set((
            gateway_state::value.eq(excluded(gateway_state::value)),
            gateway_state::version.eq(excluded(gateway_state::version)),
            gateway_state::expires_at.eq(excluded(gateway_state::expires_at)),
            gateway_state::updated_at.eq(excluded(gateway_state::updated_at)),
        ))
        .execute(connection)?;
    Ok(version)
}

fn create_if_absent(connection: &mut PgConnection, write: &Write) -> Result<bool, DieselError> {
    diesel::delete(
        gateway_state::table
            .filter(gateway_state::key.eq(&write.key))
            .filter(gateway_state::expires_at.le(write.now)),
    )
    .execute(connection)?;
    let version = next_version(connection)?;
    let inserted = diesel::insert_into(gateway_state::table)
        .values((
            gateway_state::key.eq(&write.key),
            gateway_state::value.eq(&write.value),
            gateway_state::version.eq(version),
            gateway_state::expires_at.eq(write.expires_at),
            gateway_state::updated_at.eq(write.now),
        ))
        .on_conflict_do_nothing()
        .execute(connection)?;
    Ok(inserted == 1)
}

fn replace_version(
    connection: &mut PgConnection,
    write: &Write,
    expected: i64,
) -> Result<bool, DieselError> {
    let version = next_version(connection)?;
    let updated = diesel::update(
        gateway_state::table
            .filter(gateway_state::key.eq(&write.key))
            .filter(gateway_state::version.eq(expected))
            .filter(
                gateway_state::expires_at
                    .is_null()
                    .or(gateway_state::expires_at.gt(write.now)),
            ),
    )
    .set((
        gateway_state::value.eq(&write.value),
        gateway_state::version.eq(version),
        gateway_state::expires_at.eq(write.expires_at),
        gateway_state::updated_at.eq(write.now),
    ))
    .execute(connection)?;
    Ok(updated == 1)
}

#[async_trait]
impl<C: Clock + Send + Sync + 'static> SharedStateStore for PostgresStateStore<C> {
    async fn get(&self, key: &str) -> StateStoreResult<Option<VersionedValue>> {
        let owned_key = key.to_owned();
        let now = self.clock.utc();
        self.run_blocking(move |connection| {
            let row = gateway_state::table
                .filter(gateway_state::key.eq(&owned_key))
                .filter(
                    gateway_state::expires_at
                        .is_null()
                        .or(gateway_state::expires_at.gt(now)),
                )
                .select((gateway_state::value, gateway_state::version))
                .first::<(Value, i64)>(connection)
                .optional()
                .map_err(StateStoreError::unavailable)?;
            row.map(|(value, version)| {
                Ok(VersionedValue {
                    value,
                    version: to_u64_version(&owned_key, version)?,
                })
            })
            .transpose()
        })
        .await
    }

    async fn put(&self, key: &str, value: Value, ttl: Option<Duration>) -> StateStoreResult<u64> {
        let write = self.prepare(key, value, ttl);
        self.run_blocking(move |connection| {
            let version = connection
                .transaction(|transaction| upsert(transaction, &write))
                .map_err(StateStoreError::unavailable)?;
            to_u64_version(&write.key, version)
        })
        .await
    }

    async fn compare_and_swap(
        &self,
        key: &str,
        expected_version: Option<u64>,
        value: Value,
        ttl: Option<Duration>,
    ) -> StateStoreResult<bool> {
        let expected = match expected_version.map(i64::try_from).transpose() {
            Ok(converted) => converted,
            // Versions beyond the sequence range were never issued.
            Err(_) => return Ok(false),
        };
        let write = self.prepare(key, value, ttl);
        self.run_blocking(move |connection| {
            connection
                .transaction(|transaction| match expected {
                    None => create_if_absent(transaction, &write),
                    Some(version) => replace_version(transaction, &write, version),
                })
                .map_err(StateStoreError::unavailable)
        })
        .await
    }

    async fn delete(&self, key: &str) -> StateStoreResult<()> {
        let owned_key = key.to_owned();
        self.run_blocking(move |connection| {
            diesel::delete(gateway_state::table.filter(gateway_state::key.eq(&owned_key)))
                .execute(connection)
                .map_err(StateStoreError::unavailable)?;
            Ok(())
        })
        .await
    }
}
