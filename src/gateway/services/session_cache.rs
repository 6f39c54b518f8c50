//! Per-server session cache.
//!
//! Each server owns one async slot. Callers that need a session lock the
//! slot, so concurrent requests for the same server wait for a single
//! handshake and then share its handle. Streamable HTTP session ids are also
//! written to the shared store, letting another worker resume the session
//! instead of negotiating a new one.
//!
//! The shared record counts the workers holding the id. A worker releasing
//! its handle only ends the server-side session when it was the last
//! holder; otherwise it drops the handle locally and leaves the session to
//! its peers.

use crate::gateway::config::time_delta;
use crate::gateway::ports::{
    McpConnection, McpSession, McpTransportAdapter, SharedStateStore, StateKeys, StateStoreError,
    StateStoreResult, TransportError, TransportResult,
};
use crate::tool_registry::domain::{ToolServerConfig, ToolServerId, TransportKind};
use mockable::Clock;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::{Arc, PoisonError};
use std::time::{Duration, Instant};
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

type Slot = Arc<Mutex<Option<McpSession>>>;

const MAX_RECORD_ATTEMPTS: usize = 8;

/// Resumable session record shared through the state store.
///
/// `holders` reaching zero marks the session as ending; such a record is
/// never resumed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SessionRecord {
    session_id: String,
    fingerprint: String,
    #[serde(default)]
    holders: u32,
}

impl SessionRecord {
    fn names(&self, session_id: &str, fingerprint: &str) -> bool {
        self.session_id == session_id && self.fingerprint == fingerprint
    }
}

/// How a worker came to hold a shared session id.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Hold {
    /// This worker negotiated or was handed the session.
    Owned,
    /// This worker resumed a peer's session.
    Joined,
}

/// Session lifetime settings.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionCacheSettings {
    /// Lifetime of a session from its creation.
    pub ttl: Duration,
    /// Bound on handshakes and resumptions.
    pub handshake_timeout: Duration,
}

/// TTL-bound cache holding at most one live session per server.
pub struct SessionCache<T, S, C>
where
    T: McpTransportAdapter,
    S: SharedStateStore,
    C: Clock + Send + Sync,
{
    transport: Arc<T>,
    store: Arc<S>,
    clock: Arc<C>,
    keys: StateKeys,
    settings: SessionCacheSettings,
    slots: std::sync::Mutex<HashMap<ToolServerId, Slot>>,
}

impl<T, S, C> SessionCache<T, S, C>
where
    T: McpTransportAdapter,
    S: SharedStateStore,
    C: Clock + Send + Sync,
{
    /// Creates an empty cache.
    #[must_use]
    pub fn new(
        transport: Arc<T>,
        store: Arc<S>,
        clock: Arc<C>,
        keys: StateKeys,
        settings: SessionCacheSettings,
    ) -> Self {
        Self {
            transport,
            store,
            clock,
            keys,
            settings,
            slots: std::sync::Mutex::new(HashMap::new()),
        }
    }

    fn slot(&self, server_id: ToolServerId) -> Slot {
        let mut slots = self.slots.lock().unwrap_or_else(PoisonError::into_inner);
        Arc::clone(slots.entry(server_id).or_default())
    }

    fn all_slots(&self) -> Vec<Slot> {
        let slots = self.slots.lock().unwrap_or_else(PoisonError::into_inner);
        slots.values().cloned().collect()
    }

    /// Returns the cached session when it is live, closing it when it has
    /// expired.
    pub async fn get(&self, server_id: ToolServerId) -> Option<McpSession> {
        let slot = self.slot(server_id);
        let mut cached = slot.lock().await;
        let now = self.clock.utc();
        if cached.as_ref().is_some_and(|session| session.is_stale(now)) {
            if let Some(stale) = cached.take() {
                self.release(&stale).await;
            }
            return None;
        }
        cached.as_mut().map(|session| {
            session.touch(now);
            session.clone()
        })
    }

    /// Stores `session`, releasing any different session it replaces.
    pub async fn put(&self, session: McpSession) {
        let slot = self.slot(session.server_id());
        let mut cached = slot.lock().await;
        if cached
            .as_ref()
            .is_some_and(|current| current.same_handle(&session))
        {
            *cached = Some(session);
            return;
        }
        self.hold(&session, Hold::Owned).await;
        if let Some(previous) = cached.replace(session) {
            debug!(server_id = %previous.server_id(), "replaced cached session");
            self.release(&previous).await;
        }
    }

    /// Returns a live session for `server`, creating one when needed.
    ///
    /// Concurrent callers for the same server are serialized, so at most one
    /// handshake runs and every caller receives the same handle.
    ///
    /// # Errors
    ///
    /// Returns the handshake's [`TransportError`], or
    /// [`TransportError::Timeout`] when the handshake exceeds its bound.
    pub async fn acquire(&self, server: &ToolServerConfig) -> TransportResult<McpSession> {
        let slot = self.slot(server.id());
        let mut cached = slot.lock().await;
        let now = self.clock.utc();
        let fingerprint = server.fingerprint();

        if let Some(session) = cached.as_mut()
            && !session.is_stale(now)
            && session.fingerprint() == fingerprint
        {
            session.touch(now);
            return Ok(session.clone());
        }
        if let Some(stale) = cached.take() {
            debug!(server = %server.name(), "closing stale session");
            self.release(&stale).await;
        }

        let started = Instant::now();
        let session = self.connect(server).await?;
        info!(
            server = %server.name(),
            kind = %session.connection().kind(),
            elapsed_ms = u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX),
            "session established"
        );
        *cached = Some(session.clone());
        Ok(session)
    }

    fn wrap(&self, server: &ToolServerConfig, connection: Arc<dyn McpConnection>) -> McpSession {
        let created_at = self.clock.utc();
        let expires_at = created_at
            .checked_add_signed(time_delta(self.settings.ttl))
            .unwrap_or(created_at);
        McpSession::new(server, connection, created_at, expires_at)
    }

    async fn connect(&self, server: &ToolServerConfig) -> TransportResult<McpSession> {
        let bound = self.settings.handshake_timeout;
        let attempt = async {
            if let Some(resumed) = self.try_resume(server).await {
                let session = self.wrap(server, resumed);
                if self.hold(&session, Hold::Joined).await {
                    return Ok(session);
                }
                debug!(server = %server.name(), "shared session ended while resuming");
                session.connection().detach().await;
            }
            let session = self.wrap(server, self.transport.handshake(server).await?);
            self.hold(&session, Hold::Owned).await;
            Ok(session)
        };
        tokio::time::timeout(bound, attempt)
            .await
            .map_err(|_| TransportError::Timeout(bound))?
    }

    async fn try_resume(&self, server: &ToolServerConfig) -> Option<Arc<dyn McpConnection>> {
        if server.transport().kind() != TransportKind::StreamableHttp {
            return None;
        }
        let key = self.keys.session(server.id());
        let stored = match self.store.get(&key).await {
            Ok(found) => found?,
            Err(err) => {
                warn!(server = %server.name(), error = %err, "cannot read shared session record");
                return None;
            }
        };
        let record = match serde_json::from_value::<SessionRecord>(stored.value) {
            Ok(record) if record.fingerprint == server.fingerprint() && record.holders > 0 => {
                record
            }
            _ => return None,
        };
        match self.transport.resume(server, &record.session_id).await {
            Ok(connection) => {
                debug!(server = %server.name(), "resumed shared session");
                Some(connection)
            }
            Err(err) => {
                debug!(server = %server.name(), error = %err, "shared session not resumable");
                self.forget_record(server.id()).await;
                None
            }
        }
    }

    fn shared_id(session: &McpSession) -> Option<String> {
        let connection = session.connection();
        if connection.kind() == TransportKind::StreamableHttp {
            connection.session_id()
        } else {
            None
        }
    }

    /// Counts this worker as a holder of the session's shared id.
    ///
    /// An owned id replaces whatever the record named; a joined id is only
    /// counted while its record is live. Returns whether the hold was taken.
    async fn hold(&self, session: &McpSession, hold: Hold) -> bool {
        let Some(session_id) = Self::shared_id(session) else {
            return true;
        };
        let server_id = session.server_id();
        let key = self.keys.session(server_id);
        for _ in 0..MAX_RECORD_ATTEMPTS {
            let (version, current) = match self.store.get(&key).await {
                Ok(Some(stored)) => (
                    Some(stored.version),
                    serde_json::from_value::<SessionRecord>(stored.value).ok(),
                ),
                Ok(None) => (None, None),
                Err(err) => {
                    warn!(%server_id, error = %err, "cannot share session record");
                    return hold == Hold::Owned;
                }
            };
            let holders = match current {
                Some(record) if record.names(&session_id, session.fingerprint()) => {
                    if record.holders == 0 && hold == Hold::Joined {
                        return false;
                    }
                    record.holders.saturating_add(1)
                }
                _ if hold == Hold::Owned => 1,
                _ => return false,
            };
            let record = SessionRecord {
                session_id: session_id.clone(),
                fingerprint: session.fingerprint().to_owned(),
                holders,
            };
            match self.swap_record(&key, version, &record).await {
                Ok(true) => return true,
                Ok(false) => {}
                Err(err) => {
                    warn!(%server_id, error = %err, "cannot share session record");
                    return hold == Hold::Owned;
                }
            }
        }
        warn!(%server_id, "session record contended; hold not recorded");
        hold == Hold::Owned
    }

    /// Drops this worker's hold; returns whether it was the last one.
    async fn unhold(&self, session: &McpSession, session_id: &str) -> bool {
        let server_id = session.server_id();
        let key = self.keys.session(server_id);
        for _ in 0..MAX_RECORD_ATTEMPTS {
            let stored = match self.store.get(&key).await {
                Ok(Some(stored)) => stored,
                Ok(None) => return false,
                Err(err) => {
                    warn!(%server_id, error = %err, "cannot read shared session record");
                    return false;
                }
            };
            let record = match serde_json::from_value::<SessionRecord>(stored.value) {
                Ok(record)
                    if record.names(session_id, session.fingerprint()) && record.holders > 0 =>
                {
                    record
                }
                _ => return false,
            };
            let holders = record.holders - 1;
            let updated = SessionRecord { holders, ..record };
            match self
                .swap_record(&key, Some(stored.version), &updated)
                .await
            {
                Ok(true) => return holders == 0,
                Ok(false) => {}
                Err(err) => {
                    warn!(%server_id, error = %err, "cannot update shared session record");
                    return false;
                }
            }
        }
        warn!(%server_id, "session record contended; leaving session to peers");
        false
    }

    async fn swap_record(
        &self,
        key: &str,
        version: Option<u64>,
        record: &SessionRecord,
    ) -> StateStoreResult<bool> {
        let value = serde_json::to_value(record).map_err(|err| StateStoreError::corrupt(key, err))?;
        self.store
            .compare_and_swap(key, version, value, Some(self.settings.ttl))
            .await
    }

    /// Lets go of a session this worker no longer caches.
    ///
    /// Unshared sessions are closed. A shared session is ended on the server
    /// only by its last holder; any other holder just detaches.
    async fn release(&self, session: &McpSession) {
        let connection = session.connection();
        if connection.is_closed() {
            return;
        }
        let Some(session_id) = Self::shared_id(session) else {
            connection.close().await;
            return;
        };
        if self.unhold(session, &session_id).await {
            connection.close().await;
        } else {
            debug!(server_id = %session.server_id(), "detaching from shared session");
            connection.detach().await;
        }
    }

    async fn forget_record(&self, server_id: ToolServerId) {
        if let Err(err) = self.store.delete(&self.keys.session(server_id)).await {
            warn!(%server_id, error = %err, "cannot delete shared session record");
        }
    }

    /// Releases and evicts the server's session and drops its shared record.
    pub async fn invalidate(&self, server_id: ToolServerId) {
        let slot = self.slot(server_id);
        let evicted = slot.lock().await.take();
        if let Some(session) = evicted {
            debug!(%server_id, "invalidating session");
            self.release(&session).await;
        }
        self.forget_record(server_id).await;
    }

    /// Invalidates a deleted server and drops its slot once nothing else
    /// is waiting on it.
    pub async fn remove_server(&self, server_id: ToolServerId) {
        self.invalidate(server_id).await;
        let mut slots = self.slots.lock().unwrap_or_else(PoisonError::into_inner);
        if slots
            .get(&server_id)
            .is_some_and(|slot| Arc::strong_count(slot) == 1)
        {
            slots.remove(&server_id);
        }
    }

    /// Returns the number of servers with a slot.
    #[must_use]
    pub fn tracked_servers(&self) -> usize {
        self.slots
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    /// Releases `session` after a transport failure, evicting it if it is
    /// still the cached one. A newer session in the slot is left alone.
    pub async fn discard(&self, session: &McpSession) {
        let slot = self.slot(session.server_id());
        let evicted = {
            let mut cached = slot.lock().await;
            let is_cached = cached
                .as_ref()
                .is_some_and(|current| current.same_handle(session));
            if is_cached { cached.take() } else { None }
        };
        match evicted {
            Some(evicted) => self.release(&evicted).await,
            // Already released by whoever evicted it; a private handle
            // still has to go, since it may be a hung process.
            None if Self::shared_id(session).is_none() => session.connection().close().await,
            None => {}
        }
    }

    /// Closes and evicts every expired session. Slots busy with a handshake
    /// or lookup are skipped until the next sweep.
    ///
    /// Returns the number of sessions closed.
    pub async fn sweep_expired(&self) -> usize {
        let now = self.clock.utc();
        let mut expired = Vec::new();
        for slot in self.all_slots() {
            let Ok(mut cached) = slot.try_lock() else {
                continue;
            };
            if cached.as_ref().is_some_and(|session| session.is_stale(now))
                && let Some(session) = cached.take()
            {
                expired.push(session);
            }
        }
        for session in &expired {
            debug!(server_id = %session.server_id(), "sweeping expired session");
            self.release(session).await;
        }
        expired.len()
    }

    /// Returns the number of cached sessions, live or not yet swept.
    pub async fn cached_sessions(&self) -> usize {
        let mut count = 0;
        for slot in self.all_slots() {
            if slot.lock().await.is_some() {
                count += 1;
            }
        }
        count
    }

    /// Closes every cached session.
    pub async fn shutdown(&self) {
        let mut closed = 0_usize;
        for slot in self.all_slots() {
            let evicted = slot.lock().await.take();
            if let Some(session) = evicted {
                self.release(&session).await;
                closed += 1;
            }
        }
        info!(closed, "session cache shut down");
    }
}

impl<T, S, C> SessionCache<T, S, C>
where
    T: McpTransportAdapter + 'static,
    S: SharedStateStore + 'static,
    C: Clock + Send + Sync + 'static,
{
    /// Sweeps expired sessions every `interval` until `cancel` fires.
    #[must_use]
    pub fn spawn_sweeper(
        self: Arc<Self>,
        interval: Duration,
        cancel: CancellationToken,
    ) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    () = cancel.cancelled() => break,
                    _ = ticker.tick() => {
                        let swept = self.sweep_expired().await;
                        if swept > 0 {
                            debug!(swept, "expired sessions closed");
                        }
                    }
                }
            }
        })
    }
}
