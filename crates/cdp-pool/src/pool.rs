//! The session pool: lifecycle, health supervision and the command funnel.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use dashmap::DashMap;
use futures::future::join_all;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tokio::sync::{broadcast, Mutex as AsyncMutex, OnceCell};
use tokio::task::JoinHandle;
use tokio::time::{interval, sleep, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use webhelm_core_types::{ConnectionId, EngineError, EngineEvent, EngineResult};
use webhelm_event_bus::{BroadcastBus, NotificationBus};

use crate::config::PoolConfig;
use crate::metrics;
use crate::session::{HealthSnapshot, Session, SessionInfo};
use crate::transport::{
    BrowserTransport, ChromiumTransport, CommandTarget, NoopTransport, TransportEvent,
};

const PROBE_EXPRESSION: &str = "1 + 1";

/// Options applied when a connection is created.
#[derive(Clone, Debug, Default)]
pub struct CreateOptions {
    /// Initial page URL; `about:blank` when unset.
    pub url: Option<String>,
}

/// Uniform envelope returned by [`SessionPool::execute_command`].
///
/// Raw command pass-through never raises: failures ride in `error` so batch
/// callers keep going.
#[derive(Clone, Debug, Serialize)]
pub struct CommandOutcome {
    pub id: ConnectionId,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<CommandError>,
}

#[derive(Clone, Debug, Serialize)]
pub struct CommandError {
    pub code: i64,
    pub message: String,
}

impl CommandOutcome {
    fn ok(id: ConnectionId, result: Value) -> Self {
        Self {
            id,
            result: Some(result),
            error: None,
        }
    }

    fn err(id: ConnectionId, code: i64, message: impl Into<String>) -> Self {
        Self {
            id,
            result: None,
            error: Some(CommandError {
                code,
                message: message.into(),
            }),
        }
    }

    pub fn is_ok(&self) -> bool {
        self.error.is_none()
    }
}

type CloseHook = Arc<dyn Fn(&ConnectionId) + Send + Sync>;

/// Bounded pool of protocol sessions over one shared browser transport.
///
/// Cloning is cheap; all clones share the same pool state. Pool membership
/// changes (create, close) serialize on one async mutex, reads stay
/// lock-free on the map.
#[derive(Clone)]
pub struct SessionPool {
    cfg: PoolConfig,
    transport: Arc<dyn BrowserTransport>,
    sessions: Arc<DashMap<ConnectionId, Session>>,
    events: Arc<BroadcastBus<EngineEvent>>,
    mutation: Arc<AsyncMutex<()>>,
    started: Arc<OnceCell<()>>,
    shutdown: CancellationToken,
    closed: Arc<AtomicBool>,
    tasks: Arc<Mutex<Vec<JoinHandle<()>>>>,
    close_hooks: Arc<Mutex<Vec<CloseHook>>>,
}

impl SessionPool {
    /// Build a pool over a real browser when one is reachable, otherwise a
    /// noop transport that fails commands with a clear hint.
    pub fn new(cfg: PoolConfig) -> Self {
        let transport: Arc<dyn BrowserTransport> = if cfg.has_browser() {
            Arc::new(ChromiumTransport::new(cfg.clone()))
        } else {
            warn!(
                target: "cdp-pool",
                "no chrome executable or websocket url configured, commands will fail"
            );
            Arc::new(NoopTransport)
        };
        Self::with_transport(cfg, transport)
    }

    pub fn with_transport(cfg: PoolConfig, transport: Arc<dyn BrowserTransport>) -> Self {
        let events = BroadcastBus::new(512);
        Self {
            cfg,
            transport,
            sessions: Arc::new(DashMap::new()),
            events,
            mutation: Arc::new(AsyncMutex::new(())),
            started: Arc::new(OnceCell::new()),
            shutdown: CancellationToken::new(),
            closed: Arc::new(AtomicBool::new(false)),
            tasks: Arc::new(Mutex::new(Vec::new())),
            close_hooks: Arc::new(Mutex::new(Vec::new())),
        }
    }

    pub fn config(&self) -> &PoolConfig {
        &self.cfg
    }

    /// Start the transport and the supervision tasks. Idempotent; implied by
    /// the first `create_connection`.
    pub async fn start(&self) -> EngineResult<()> {
        self.started
            .get_or_try_init(|| async {
                self.transport.start().await?;
                let pool = self.clone();
                let health = tokio::spawn(async move { pool.health_loop().await });
                let pool = self.clone();
                let pump = tokio::spawn(async move { pool.event_pump().await });
                self.tasks.lock().extend([health, pump]);
                Ok(())
            })
            .await
            .map(|_| ())
    }

    /// Create one pooled connection: page target, flat protocol session,
    /// then the configured domain enables in order. The first enable that
    /// fails aborts the whole creation and tears the target down.
    pub async fn create_connection(
        &self,
        id: ConnectionId,
        opts: CreateOptions,
    ) -> EngineResult<SessionInfo> {
        if self.closed.load(Ordering::Relaxed) {
            return Err(EngineError::internal("pool is shut down"));
        }
        self.start().await?;

        let _guard = self.mutation.lock().await;

        if self.sessions.contains_key(&id) {
            return Err(EngineError::ConnectionExists(id));
        }
        if self.sessions.len() >= self.cfg.max_connections {
            return Err(EngineError::MaxConnectionsReached {
                limit: self.cfg.max_connections,
            });
        }

        let url = opts.url.unwrap_or_else(|| "about:blank".to_string());
        let created = self
            .transport
            .send_command(
                CommandTarget::Browser,
                "Target.createTarget",
                json!({ "url": url }),
            )
            .await?;
        let CreateTargetReply { target_id } = serde_json::from_value(created)
            .map_err(|_| EngineError::provider("Target.createTarget returned no targetId"))?;

        let protocol_session = match self
            .transport
            .send_command(
                CommandTarget::Browser,
                "Target.attachToTarget",
                json!({ "targetId": target_id, "flatten": true }),
            )
            .await
        {
            Ok(attached) => match serde_json::from_value::<AttachToTargetReply>(attached) {
                Ok(reply) => reply.session_id,
                Err(_) => {
                    self.discard_target(&target_id).await;
                    return Err(EngineError::provider(
                        "Target.attachToTarget returned no sessionId",
                    ));
                }
            },
            Err(err) => {
                self.discard_target(&target_id).await;
                return Err(err);
            }
        };

        for domain in &self.cfg.enabled_domains {
            let enable = format!("{domain}.enable");
            if let Err(err) = self
                .transport
                .send_command(
                    CommandTarget::Session(protocol_session.clone()),
                    &enable,
                    json!({}),
                )
                .await
            {
                self.discard_target(&target_id).await;
                return Err(EngineError::DomainEnableFailed {
                    domain: domain.clone(),
                    reason: err.to_string(),
                });
            }
        }

        let session = Session::new(
            id.clone(),
            target_id,
            protocol_session,
            self.cfg.enabled_domains.clone(),
        );
        let info = session.info();
        self.sessions.insert(id.clone(), session);
        metrics::set_connection_count(self.sessions.len());

        info!(target: "cdp-pool", connection = %id, page_target = %info.target_id, "connection created");
        self.emit(EngineEvent::ConnectionCreated { connection: id });
        Ok(info)
    }

    /// Snapshot of an active connection, refreshing its activity stamp.
    /// Inactive or unknown connections return `None`.
    pub fn get_connection(&self, id: &ConnectionId) -> Option<SessionInfo> {
        let mut entry = self.sessions.get_mut(id)?;
        if !entry.active {
            return None;
        }
        entry.touch();
        Some(entry.info())
    }

    /// Round-trip liveness probe: evaluate a constant expression and check
    /// the protocol echoes the expected value back.
    pub async fn validate_connection(&self, id: &ConnectionId) -> bool {
        let protocol_session = match self.sessions.get(id) {
            Some(session) if session.active => session.protocol_session.clone(),
            _ => return false,
        };
        self.probe(&protocol_session).await
    }

    /// Send one command on the connection's session channel.
    ///
    /// Components use this typed path; `execute_command` wraps it in the
    /// never-raising envelope for raw pass-through callers.
    pub async fn send_on_session(
        &self,
        id: &ConnectionId,
        method: &str,
        params: Value,
    ) -> EngineResult<Value> {
        let protocol_session = {
            let mut entry = self
                .sessions
                .get_mut(id)
                .ok_or_else(|| EngineError::ConnectionNotFound(id.clone()))?;
            if !entry.active {
                return Err(EngineError::ConnectionUnhealthy(id.clone()));
            }
            entry.touch();
            entry.protocol_session.clone()
        };

        metrics::command_dispatched(method);
        let started = Instant::now();
        match self
            .transport
            .send_command(CommandTarget::Session(protocol_session), method, params)
            .await
        {
            Ok(value) => {
                metrics::command_succeeded(method, started.elapsed());
                Ok(value)
            }
            Err(err) => {
                metrics::command_failed(method);
                Err(err)
            }
        }
    }

    /// Forward one raw protocol command, returning the uniform outcome
    /// envelope. Never raises.
    pub async fn execute_command(
        &self,
        id: &ConnectionId,
        method: &str,
        params: Value,
    ) -> CommandOutcome {
        match self.send_on_session(id, method, params).await {
            Ok(result) => CommandOutcome::ok(id.clone(), result),
            Err(EngineError::Provider { code, hint, .. }) => {
                CommandOutcome::err(id.clone(), code.unwrap_or(-32000), hint)
            }
            Err(err) => CommandOutcome::err(id.clone(), -32000, err.to_string()),
        }
    }

    /// Close a connection. Idempotent: the pool entry is removed first, so
    /// removal sticks even when the protocol close fails.
    pub async fn close_connection(&self, id: &ConnectionId) {
        let _guard = self.mutation.lock().await;
        self.close_inner(id).await;
    }

    async fn close_inner(&self, id: &ConnectionId) {
        let Some((_, session)) = self.sessions.remove(id) else {
            return;
        };
        metrics::set_connection_count(self.sessions.len());

        let _ = self
            .transport
            .send_command(
                CommandTarget::Browser,
                "Target.closeTarget",
                json!({ "targetId": session.target_id }),
            )
            .await;

        for hook in self.close_hooks.lock().iter() {
            hook(id);
        }

        info!(target: "cdp-pool", connection = %id, "connection closed");
        self.emit(EngineEvent::ConnectionClosed {
            connection: id.clone(),
        });
    }

    /// Cancel supervision, then close every connection concurrently,
    /// best-effort. Idempotent.
    pub async fn shutdown(&self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        self.shutdown.cancel();
        for task in self.tasks.lock().drain(..) {
            task.abort();
        }

        let _guard = self.mutation.lock().await;
        let ids: Vec<ConnectionId> = self.sessions.iter().map(|entry| entry.id.clone()).collect();
        join_all(ids.iter().map(|id| self.close_inner(id))).await;
        info!(target: "cdp-pool", "session pool shut down");
    }

    /// Invoked with the connection id whenever a connection closes; used by
    /// session-scoped caches to drop their entries.
    pub fn register_close_hook(&self, hook: impl Fn(&ConnectionId) + Send + Sync + 'static) {
        self.close_hooks.lock().push(Arc::new(hook));
    }

    pub fn connection_count(&self) -> usize {
        self.sessions.len()
    }

    pub fn active_connection_ids(&self) -> Vec<ConnectionId> {
        self.sessions
            .iter()
            .filter(|entry| entry.active)
            .map(|entry| entry.id.clone())
            .collect()
    }

    pub fn list_connections(&self) -> Vec<SessionInfo> {
        self.sessions.iter().map(|entry| entry.info()).collect()
    }

    pub fn health(&self, id: &ConnectionId) -> Option<HealthSnapshot> {
        self.sessions.get(id).map(|entry| entry.health_snapshot())
    }

    pub fn is_domain_enabled(&self, id: &ConnectionId, domain: &str) -> bool {
        self.sessions
            .get(id)
            .map(|entry| entry.domain_enabled(domain))
            .unwrap_or(false)
    }

    pub fn subscribe(&self) -> broadcast::Receiver<EngineEvent> {
        self.events.subscribe()
    }

    /// Sender handle shared with the other engine components so everything
    /// lands on one notification channel.
    pub fn event_sink(&self) -> broadcast::Sender<EngineEvent> {
        self.events.sender()
    }

    /// The bus itself, for callers that want the trait surface or the
    /// mpsc bridge.
    pub fn bus(&self) -> Arc<BroadcastBus<EngineEvent>> {
        self.events.clone()
    }

    /// One supervision pass over every active connection. The background
    /// loop calls this on each tick; tests drive it directly.
    pub async fn run_health_pass(&self) {
        let targets: Vec<(ConnectionId, String)> = self
            .sessions
            .iter()
            .filter(|entry| entry.active)
            .map(|entry| (entry.id.clone(), entry.protocol_session.clone()))
            .collect();

        for (id, protocol_session) in targets {
            let healthy = self.probe(&protocol_session).await;
            let mut deactivated = false;
            if let Some(mut session) = self.sessions.get_mut(&id) {
                if !session.active {
                    continue;
                }
                if healthy {
                    session.health.record_success();
                } else {
                    let streak = session.health.record_failure();
                    session.touch();
                    if streak >= self.cfg.failure_threshold {
                        session.active = false;
                        deactivated = true;
                    }
                }
            }
            if deactivated {
                warn!(target: "cdp-pool", connection = %id, "probe failure streak reached threshold, deactivating");
                self.emit(EngineEvent::ConnectionFailed {
                    connection: id,
                    reason: "liveness probe failure streak".to_string(),
                });
            }
        }
    }

    async fn probe(&self, protocol_session: &str) -> bool {
        let outcome = self
            .transport
            .send_command(
                CommandTarget::Session(protocol_session.to_string()),
                "Runtime.evaluate",
                json!({ "expression": PROBE_EXPRESSION, "returnByValue": true }),
            )
            .await;
        match outcome {
            Ok(value) => value["result"]["value"].as_i64() == Some(2),
            Err(_) => false,
        }
    }

    async fn discard_target(&self, target_id: &str) {
        let _ = self
            .transport
            .send_command(
                CommandTarget::Browser,
                "Target.closeTarget",
                json!({ "targetId": target_id }),
            )
            .await;
    }

    fn emit(&self, event: EngineEvent) {
        metrics::event_published();
        if self.events.sender().send(event).is_err() {
            debug!(target: "cdp-pool", "event dropped, no subscribers");
        }
    }

    async fn health_loop(self) {
        let mut ticker = interval(Duration::from_millis(
            self.cfg.health_check_interval_ms.max(1),
        ));
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        // the first tick completes immediately; a fresh pool has nothing to probe
        ticker.tick().await;
        loop {
            tokio::select! {
                _ = self.shutdown.cancelled() => break,
                _ = ticker.tick() => self.run_health_pass().await,
            }
        }
    }

    async fn event_pump(self) {
        loop {
            tokio::select! {
                _ = self.shutdown.cancelled() => break,
                event = self.transport.next_event() => match event {
                    Some(event) => self.handle_transport_event(event),
                    None => sleep(Duration::from_millis(250)).await,
                }
            }
        }
    }

    fn handle_transport_event(&self, event: TransportEvent) {
        match event.method.as_str() {
            "Target.targetDestroyed" | "Target.targetCrashed" => {
                if let Ok(TargetGoneParams { target_id }) = serde_json::from_value(event.params) {
                    self.deactivate_by_target(&target_id, &event.method);
                }
            }
            "Inspector.targetCrashed" => {
                if let Some(protocol_session) = event.session_id.as_deref() {
                    self.deactivate_by_session(protocol_session);
                }
            }
            _ => {}
        }
    }

    fn deactivate_by_target(&self, target_id: &str, reason: &str) {
        let mut failed = None;
        for mut entry in self.sessions.iter_mut() {
            if entry.target_id == target_id && entry.active {
                entry.active = false;
                entry.health.is_healthy = false;
                failed = Some(entry.id.clone());
                break;
            }
        }
        if let Some(id) = failed {
            warn!(target: "cdp-pool", connection = %id, reason, "page target gone, deactivating");
            self.emit(EngineEvent::ConnectionFailed {
                connection: id,
                reason: reason.to_string(),
            });
        }
    }

    fn deactivate_by_session(&self, protocol_session: &str) {
        let mut failed = None;
        for mut entry in self.sessions.iter_mut() {
            if entry.protocol_session == protocol_session && entry.active {
                entry.active = false;
                entry.health.is_healthy = false;
                failed = Some(entry.id.clone());
                break;
            }
        }
        if let Some(id) = failed {
            warn!(target: "cdp-pool", connection = %id, "session crashed, deactivating");
            self.emit(EngineEvent::ConnectionFailed {
                connection: id,
                reason: "target crashed".to_string(),
            });
        }
    }
}

#[derive(Debug, Deserialize)]
struct CreateTargetReply {
    #[serde(rename = "targetId")]
    target_id: String,
}

#[derive(Debug, Deserialize)]
struct AttachToTargetReply {
    #[serde(rename = "sessionId")]
    session_id: String,
}

#[derive(Debug, Deserialize)]
struct TargetGoneParams {
    #[serde(rename = "targetId")]
    target_id: String,
}
