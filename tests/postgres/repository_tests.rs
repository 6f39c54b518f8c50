//! Tool server repository tests against `PostgreSQL`.

use crate::postgres::helpers::{TestDatabase, database};
use mcp_tool_gateway::tool_registry::{
    adapters::postgres::PostgresToolServerRepository,
    domain::{ToolServerConfig, ToolServerName, ToolServerTransport},
    ports::{ToolServerRepository, ToolServerRepositoryError},
};
use mockable::DefaultClock;
use rstest::rstest;

fn server(name: &str) -> ToolServerConfig {
    ToolServerConfig::new(
        ToolServerName::new(name).expect("valid name"),
        ToolServerTransport::streamable_http(format!("https://{name}.example/mcp"))
            .expect("valid transport"),
        &DefaultClock,
    )
}

#[rstest]
fn repository_round_trips_and_orders_by_name(database: TestDatabase) {
    let repository = PostgresToolServerRepository::new(database.pool.clone());
    let zeta = server("zeta");
    let mut alpha = server("alpha");

    let (names, enabled, found) = database.runtime.block_on(async {
        repository.register(&zeta).await.expect("register zeta");
        repository.register(&alpha).await.expect("register alpha");
        assert!(alpha.set_enabled(false, &DefaultClock));
        repository.update(&alpha).await.expect("disable alpha");

        let names: Vec<String> = repository
            .list_all()
            .await
            .expect("list")
            .iter()
            .map(|listed| listed.name().as_str().to_owned())
            .collect();
        let enabled = repository.list_enabled().await.expect("list enabled");
        let found = repository
            .find_by_name(zeta.name())
            .await
            .expect("find")
            .expect("zeta stored");
        (names, enabled, found)
    });

    assert_eq!(names, vec!["alpha", "zeta"]);
    assert_eq!(enabled.len(), 1);
    assert_eq!(found.transport(), zeta.transport());
}

#[rstest]
fn repository_rejects_duplicate_names(database: TestDatabase) {
    let repository = PostgresToolServerRepository::new(database.pool.clone());

    let duplicate = database.runtime.block_on(async {
        repository.register(&server("calc")).await.expect("register");
        repository.register(&server("calc")).await
    });

    assert!(matches!(
        duplicate,
        Err(ToolServerRepositoryError::DuplicateServerName(_))
    ));
}
