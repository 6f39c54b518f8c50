//! `PostgreSQL` repository implementation for tool server configurations.

use super::{
    models::{NewToolServerRow, ToolServerRow},
    schema::tool_servers,
};
use crate::tool_registry::{
    domain::{
        PersistedToolServerData, ToolServerConfig, ToolServerId, ToolServerName,
        ToolServerStatus, ToolServerStatusSnapshot, ToolServerTransport,
    },
    ports::{ToolServerRepository, ToolServerRepositoryError, ToolServerRepositoryResult},
};
use async_trait::async_trait;
use diesel::pg::PgConnection;
use diesel::prelude::*;
use diesel::r2d2::{ConnectionManager, Pool};
use diesel::result::{DatabaseErrorKind, Error as DieselError};

/// `PostgreSQL` connection pool type shared by the gateway's adapters.
pub type GatewayPgPool = Pool<ConnectionManager<PgConnection>>;

/// `PostgreSQL`-backed repository for tool server configurations.
#[derive(Debug, Clone)]
pub struct PostgresToolServerRepository {
    pool: GatewayPgPool,
}

impl PostgresToolServerRepository {
    /// Creates a new repository from a `PostgreSQL` pool.
    #[must_use]
    pub const fn new(pool: GatewayPgPool) -> Self {
        Self { pool }
    }

    async fn run_blocking<F, T>(&self, operation: F) -> ToolServerRepositoryResult<T>
    where
        F: FnOnce(&mut PgConnection) -> ToolServerRepositoryResult<T> + Send + 'static,
        T: Send + 'static,
    {
        let pool = self.pool.clone();
        tokio::task::spawn_blocking(move || {
            let mut connection = pool.get().map_err(ToolServerRepositoryError::persistence)?;
            operation(&mut connection)
        })
        .await
        .map_err(ToolServerRepositoryError::persistence)?
    }
}

#[async_trait]
impl ToolServerRepository for PostgresToolServerRepository {
    async fn register(&self, server: &ToolServerConfig) -> ToolServerRepositoryResult<()> {
        let server_id = server.id();
        let server_name = server.name().clone();
        let new_row = to_row(server)?;

        self.run_blocking(move |connection| {
            diesel::insert_into(tool_servers::table)
                .values(&new_row)
                .execute(connection)
                .map_err(|err| match err {
                    DieselError::DatabaseError(DatabaseErrorKind::UniqueViolation, ref info)
                        if is_name_unique_violation(info.as_ref()) =>
                    {
                        ToolServerRepositoryError::DuplicateServerName(server_name.clone())
                    }
                    DieselError::DatabaseError(DatabaseErrorKind::UniqueViolation, _) => {
                        ToolServerRepositoryError::DuplicateServer(server_id)
                    }
                    _ => ToolServerRepositoryError::persistence(err),
                })?;
            Ok(())
        })
        .await
    }

    async fn update(&self, server: &ToolServerConfig) -> ToolServerRepositoryResult<()> {
        let server_id = server.id();
        let server_name = server.name().clone();
        let row = to_row(server)?;

        self.run_blocking(move |connection| {
            let updated_count =
                diesel::update(tool_servers::table.filter(tool_servers::id.eq(row.id)))
                    .set(&row)
                    .execute(connection)
                    .map_err(|err| match err {
                        DieselError::DatabaseError(DatabaseErrorKind::UniqueViolation, _) => {
                            ToolServerRepositoryError::DuplicateServerName(server_name.clone())
                        }
                        _ => ToolServerRepositoryError::persistence(err),
                    })?;

            if updated_count == 0 {
                return Err(ToolServerRepositoryError::NotFound(server_id));
            }
            Ok(())
        })
        .await
    }

    async fn remove(&self, server_id: ToolServerId) -> ToolServerRepositoryResult<()> {
        self.run_blocking(move |connection| {
            let deleted_count = diesel::delete(
                tool_servers::table.filter(tool_servers::id.eq(server_id.into_inner())),
            )
            .execute(connection)
            .map_err(ToolServerRepositoryError::persistence)?;

            if deleted_count == 0 {
                return Err(ToolServerRepositoryError::NotFound(server_id));
            }
            Ok(())
        })
        .await
    }

    async fn find_by_id(
        &self,
        server_id: ToolServerId,
    ) -> ToolServerRepositoryResult<Option<ToolServerConfig>> {
        self.run_blocking(move |connection| {
            let row = tool_servers::table
                .filter(tool_servers::id.eq(server_id.into_inner()))
                .select(ToolServerRow::as_select())
                .first::<ToolServerRow>(connection)
                .optional()
                .map_err(ToolServerRepositoryError::persistence)?;
            row.map(row_to_server).transpose()
        })
        .await
    }

    async fn find_by_name(
        &self,
        server_name: &ToolServerName,
    ) -> ToolServerRepositoryResult<Option<ToolServerConfig>> {
        let name = server_name.as_str().to_owned();
        self.run_blocking(move |connection| {
            let row = tool_servers::table
                .filter(tool_servers::name.eq(&name))
                .select(ToolServerRow::as_select())
                .first::<ToolServerRow>(connection)
                .optional()
                .map_err(ToolServerRepositoryError::persistence)?;
            row.map(row_to_server).transpose()
        })
        .await
    }

    async fn list_all(&self) -> ToolServerRepositoryResult<Vec<ToolServerConfig>> {
        self.run_blocking(move |connection| {
            let rows = tool_servers::table
                .order(tool_servers::name.asc())
                .select(ToolServerRow::as_select())
                .load::<ToolServerRow>(connection)
                .map_err(ToolServerRepositoryError::persistence)?;
            rows.into_iter().map(row_to_server).collect()
        })
        .await
    }

    async fn list_enabled(&self) -> ToolServerRepositoryResult<Vec<ToolServerConfig>> {
        self.run_blocking(move |connection| {
            let rows = tool_servers::table
                .filter(tool_servers::enabled.eq(true))
                .order(tool_servers::name.asc())
                .select(ToolServerRow::as_select())
                .load::<ToolServerRow>(connection)
                .map_err(ToolServerRepositoryError::persistence)?;
            rows.into_iter().map(row_to_server).collect()
        })
        .await
    }
}

fn to_row(server: &ToolServerConfig) -> ToolServerRepositoryResult<NewToolServerRow> {
    let transport =
        serde_json::to_value(server.transport()).map_err(ToolServerRepositoryError::persistence)?;
    let status = server.status();

    Ok(NewToolServerRow {
        id: server.id().into_inner(),
        name: server.name().as_str().to_owned(),
        transport,
        enabled: server.is_enabled(),
        status: status.status().as_str().to_owned(),
        last_error: status.last_error().map(str::to_owned),
        status_observed_at: status.observed_at(),
        created_at: server.created_at(),
        updated_at: server.updated_at(),
    })
}

fn row_to_server(row: ToolServerRow) -> ToolServerRepositoryResult<ToolServerConfig> {
    let ToolServerRow {
        id,
        name,
        transport,
        enabled,
        status,
        last_error,
        status_observed_at,
        created_at,
        updated_at,
    } = row;

    let parsed_name =
        ToolServerName::new(name).map_err(ToolServerRepositoryError::invalid_persisted_data)?;
    let parsed_transport: ToolServerTransport = serde_json::from_value(transport)
        .map_err(ToolServerRepositoryError::invalid_persisted_data)?;
    let parsed_status = ToolServerStatus::try_from(status.as_str())
        .map_err(ToolServerRepositoryError::invalid_persisted_data)?;
    let snapshot = ToolServerStatusSnapshot::new(parsed_status, status_observed_at);

    Ok(ToolServerConfig::from_persisted(PersistedToolServerData {
        id: ToolServerId::from_uuid(id),
        name: parsed_name,
        transport: parsed_transport,
        enabled,
        status: snapshot.with_last_error(last_error.unwrap_or_default()),
        created_at,
        updated_at,
    }))
}

fn is_name_unique_violation(info: &dyn diesel::result::DatabaseErrorInformation) -> bool {
    info.constraint_name()
        .is_some_and(|name| name == "idx_tool_servers_name")
}
