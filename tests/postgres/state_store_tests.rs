//! Shared state store tests against `PostgreSQL`.

use crate::postgres::helpers::{TestDatabase, database};
use futures_util::future::join_all;
use mcp_tool_gateway::gateway::{adapters::postgres::PostgresStateStore, ports::SharedStateStore};
use mockable::DefaultClock;
use rstest::rstest;
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;

fn state_store(database: &TestDatabase) -> PostgresStateStore<DefaultClock> {
    PostgresStateStore::new(database.pool.clone(), Arc::new(DefaultClock))
}

#[rstest]
fn versions_and_compare_and_swap(database: TestDatabase) {
    let store = state_store(&database);

    database.runtime.block_on(async {
        assert!(
            store
                .compare_and_swap("gw:key", None, json!(1), None)
                .await
                .expect("create")
        );
        assert!(
            !store
                .compare_and_swap("gw:key", None, json!(2), None)
                .await
                .expect("second create")
        );
        let current = store.get("gw:key").await.expect("get").expect("present");
        assert_eq!(current.value, json!(1));
        assert!(
            store
                .compare_and_swap("gw:key", Some(current.version), json!(3), None)
                .await
                .expect("swap")
        );
        assert!(
            !store
                .compare_and_swap("gw:key", Some(current.version), json!(4), None)
                .await
                .expect("stale swap")
        );
        let rewritten = store.put("gw:key", json!(5), None).await.expect("put");
        assert!(rewritten > current.version);

        store.delete("gw:key").await.expect("delete");
        store.delete("gw:key").await.expect("repeat delete");
        assert!(store.get("gw:key").await.expect("get").is_none());
    });
}

#[rstest]
fn racing_swaps_on_one_version_have_one_winner(database: TestDatabase) {
    let store = state_store(&database);

    let (first, second, stored) = database.runtime.block_on(async {
        let version = store.put("gw:race", json!("base"), None).await.expect("put");
        let (first, second) = tokio::join!(
            store.compare_and_swap("gw:race", Some(version), json!("first"), None),
            store.compare_and_swap("gw:race", Some(version), json!("second"), None),
        );
        let stored = store.get("gw:race").await.expect("get").expect("present");
        (
            first.expect("first swap"),
            second.expect("second swap"),
            stored,
        )
    });

    assert!(first ^ second, "first={first} second={second}");
    let winner = if first { json!("first") } else { json!("second") };
    assert_eq!(stored.value, winner);
}

#[rstest]
fn racing_creates_have_one_winner(database: TestDatabase) {
    let store = Arc::new(state_store(&database));

    let outcomes: Vec<bool> = database.runtime.block_on(async {
        let attempts = (0..8).map(|attempt| {
            let racer = Arc::clone(&store);
            tokio::spawn(async move {
                racer
                    .compare_and_swap("gw:create", None, json!(attempt), None)
                    .await
            })
        });
        join_all(attempts)
            .await
            .into_iter()
            .map(|joined| joined.expect("task").expect("swap"))
            .collect()
    });

    assert_eq!(outcomes.iter().filter(|won| **won).count(), 1);
}

#[rstest]
fn expired_keys_read_as_absent(database: TestDatabase) {
    let store = state_store(&database);

    let (expired, recreated) = database.runtime.block_on(async {
        store
            .put("gw:short", json!("soon gone"), Some(Duration::from_millis(50)))
            .await
            .expect("put");
        tokio::time::sleep(Duration::from_millis(150)).await;
        let expired = store.get("gw:short").await.expect("get");
        let recreated = store
            .compare_and_swap("gw:short", None, json!("again"), None)
            .await
            .expect("recreate");
        (expired, recreated)
    });

    assert!(expired.is_none());
    assert!(recreated);
}
