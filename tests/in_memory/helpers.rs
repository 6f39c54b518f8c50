//! Shared fixtures for in-memory gateway integration tests.

use async_trait::async_trait;
use chrono::{DateTime, Local, TimeDelta, Utc};
use mcp_tool_gateway::gateway::{
    adapters::memory::{InMemoryStateStore, InMemoryTransport, ScriptedServer},
    config::GatewayConfig,
    domain::ToolContent,
    ports::{SharedStateStore, StateStoreError, StateStoreResult, ToolCallOutcome, VersionedValue},
    services::ToolGateway,
};
use mcp_tool_gateway::tool_registry::{
    adapters::memory::InMemoryToolServerRepository,
    domain::{ToolServerConfig, ToolServerTransport},
    ports::ToolServerChangeListener,
    services::{RegisterToolServerRequest, ToolServerRegistryService},
};
use mockable::Clock;
use rstest::fixture;
use serde_json::Value;
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// Clock that only moves when a test advances it.
#[derive(Debug, Clone)]
pub struct ManualClock {
    now: Arc<Mutex<DateTime<Utc>>>,
}

impl ManualClock {
    /// Starts the clock at the current wall-clock time.
    pub fn new() -> Self {
        Self {
            now: Arc::new(Mutex::new(Utc::now())),
        }
    }

    /// Moves the clock forward.
    pub fn advance(&self, by: TimeDelta) {
        let mut now = self.now.lock().expect("clock lock");
        *now += by;
    }
}

impl Clock for ManualClock {
    fn local(&self) -> DateTime<Local> {
        self.utc().with_timezone(&Local)
    }

    fn utc(&self) -> DateTime<Utc> {
        *self.now.lock().expect("clock lock")
    }
}

/// State store whose every operation fails, as an unreachable backend would.
#[derive(Debug, Default)]
pub struct UnavailableStore;

fn unreachable_backend() -> StateStoreError {
    StateStoreError::unavailable(std::io::Error::other("state store offline"))
}

#[async_trait]
impl SharedStateStore for UnavailableStore {
    async fn get(&self, _key: &str) -> StateStoreResult<Option<VersionedValue>> {
        Err(unreachable_backend())
    }

    async fn put(&self, _key: &str, _value: Value, _ttl: Option<Duration>) -> StateStoreResult<u64> {
        Err(unreachable_backend())
    }

    async fn compare_and_swap(
        &self,
        _key: &str,
        _expected_version: Option<u64>,
        _value: Value,
        _ttl: Option<Duration>,
    ) -> StateStoreResult<bool> {
        Err(unreachable_backend())
    }

    async fn delete(&self, _key: &str) -> StateStoreResult<()> {
        Err(unreachable_backend())
    }
}

/// Gateway wired to in-memory adapters.
pub type TestGateway = ToolGateway<
    InMemoryToolServerRepository,
    InMemoryTransport,
    InMemoryStateStore<ManualClock>,
    ManualClock,
>;

/// Registry service that notifies the gateway of every change.
pub type TestRegistry = ToolServerRegistryService<InMemoryToolServerRepository, ManualClock>;

/// Configuration with short timeouts and a catalog that outlives the tests.
pub fn test_config() -> GatewayConfig {
    GatewayConfig {
        catalog_ttl_secs: 3_600,
        session_ttl_secs: 300,
        circuit_failure_threshold: 5,
        circuit_cooldown_secs: 60,
        handshake_timeout_ms: 200,
        list_timeout_ms: 200,
        call_timeout_ms: 200,
        error_message_limit: 64,
        ..GatewayConfig::default()
    }
}

/// Everything an in-memory gateway test needs to drive and observe.
pub struct GatewayHarness {
    pub clock: Arc<ManualClock>,
    pub repository: Arc<InMemoryToolServerRepository>,
    pub transport: Arc<InMemoryTransport>,
    pub store: Arc<InMemoryStateStore<ManualClock>>,
    pub config: GatewayConfig,
    pub gateway: Arc<TestGateway>,
    pub registry: TestRegistry,
}

impl GatewayHarness {
    /// Builds a harness around `config`.
    pub fn with_config(config: GatewayConfig) -> Self {
        let clock = Arc::new(ManualClock::new());
        let repository = Arc::new(InMemoryToolServerRepository::new());
        let transport = Arc::new(InMemoryTransport::new());
        let store = Arc::new(InMemoryStateStore::new(Arc::clone(&clock)));
        let gateway = Arc::new(ToolGateway::new(
            Arc::clone(&repository),
            Arc::clone(&transport),
            Arc::clone(&store),
            Arc::clone(&clock),
            config.clone(),
        ));
        let registry = ToolServerRegistryService::new(Arc::clone(&repository), Arc::clone(&clock))
            .with_listener(Arc::clone(&gateway) as Arc<dyn ToolServerChangeListener>);
        Self {
            clock,
            repository,
            transport,
            store,
            config,
            gateway,
            registry,
        }
    }

    /// Builds a second gateway sharing this harness's registry, transport,
    /// store and clock, as another worker process would.
    pub fn peer_gateway(&self) -> TestGateway {
        ToolGateway::new(
            Arc::clone(&self.repository),
            Arc::clone(&self.transport),
            Arc::clone(&self.store),
            Arc::clone(&self.clock),
            self.config.clone(),
        )
    }

    /// Scripts and registers a stdio server.
    pub async fn register_stdio(&self, name: &str, script: ScriptedServer) -> ToolServerConfig {
        let transport =
            ToolServerTransport::stdio(format!("{name}-server")).expect("valid stdio transport");
        self.register(name, transport, script).await
    }

    /// Scripts and registers a streamable HTTP server.
    pub async fn register_http(&self, name: &str, script: ScriptedServer) -> ToolServerConfig {
        let transport = ToolServerTransport::streamable_http(format!("https://{name}.example/mcp"))
            .expect("valid http transport");
        self.register(name, transport, script).await
    }

    async fn register(
        &self,
        name: &str,
        transport: ToolServerTransport,
        script: ScriptedServer,
    ) -> ToolServerConfig {
        self.transport.set_server(name, script);
        self.registry
            .register(RegisterToolServerRequest::new(name, transport))
            .await
            .expect("registration should succeed")
    }
}

/// Provides a harness with [`test_config`].
#[fixture]
pub fn harness() -> GatewayHarness {
    GatewayHarness::with_config(test_config())
}

/// Server exposing `add(a, b)` that returns the sum as text.
pub fn calculator() -> ScriptedServer {
    ScriptedServer::new()
        .with_tool("add", "Adds two integers")
        .with_handler(|_, arguments| {
            let left = arguments.get("a").and_then(Value::as_i64).unwrap_or_default();
            let right = arguments.get("b").and_then(Value::as_i64).unwrap_or_default();
            ToolCallOutcome::Completed(ToolContent::Text((left + right).to_string()))
        })
}
