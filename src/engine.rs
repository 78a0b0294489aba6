//! The assembled engine: pool, inspector, resolver, scripts, interaction.
//!
//! [`BrowserEngine`] wires the component crates around one shared
//! [`SessionPool`] and exposes the session-scoped operations a
//! tool-invocation layer calls. Collaborators needing more than the facade
//! (raw commands, script history, resolver internals) borrow the component
//! handles instead of reaching around the engine.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio::sync::{broadcast, mpsc};
use tracing::info;

use cdp_pool::{BrowserTransport, HealthSnapshot, PoolConfig, SessionInfo, SessionPool};
use dom_inspector::{BoundingBox, DomInspector, ElementNode};
use element_resolver::{ElementMatch, MatchContext, SelectorResolver, SelectorStrategy};
use interaction_flow::{InteractionController, NavigateOptions, PageState, WaitOptions};
use script_engine::{ExecuteOptions, PerformanceMetrics, ScriptEngine, ScriptRecord, DEFAULT_HISTORY_CAP};
use webhelm_core_types::{ConnectionId, EngineError, EngineEvent, EngineResult, NodeId};

/// Top-level engine settings.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub pool: PoolConfig,
    /// Retained script records, globally and per connection.
    pub script_history_capacity: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            pool: PoolConfig::default(),
            script_history_capacity: DEFAULT_HISTORY_CAP,
        }
    }
}

/// Everything worth knowing about one matched element.
#[derive(Clone, Debug, Serialize)]
pub struct ElementInfo {
    pub node_id: NodeId,
    pub tag: String,
    pub attributes: Vec<(String, String)>,
    pub text: String,
    pub visible: bool,
    pub bounding_box: Option<BoundingBox>,
    /// Robust selectors for re-finding this element, best first.
    pub selectors: Vec<SelectorStrategy>,
}

/// One engine instance: a session pool plus the component stack above it.
///
/// Cloning shares the underlying pool and state. Closing a session through
/// any clone clears the per-session state everywhere via close hooks.
#[derive(Clone)]
pub struct BrowserEngine {
    pool: SessionPool,
    inspector: DomInspector,
    resolver: SelectorResolver,
    scripts: ScriptEngine,
    controller: InteractionController,
}

impl BrowserEngine {
    /// Build against a detected browser, or the no-op transport when none
    /// is available.
    pub fn new(config: EngineConfig) -> Self {
        let capacity = config.script_history_capacity;
        Self::assemble(SessionPool::new(config.pool), capacity)
    }

    /// Build against an explicit transport. Tests drive this with the
    /// scriptable stub.
    pub fn with_transport(config: EngineConfig, transport: Arc<dyn BrowserTransport>) -> Self {
        let capacity = config.script_history_capacity;
        Self::assemble(SessionPool::with_transport(config.pool, transport), capacity)
    }

    fn assemble(pool: SessionPool, script_history_capacity: usize) -> Self {
        let inspector = DomInspector::new(pool.clone());
        let resolver = SelectorResolver::new(inspector.clone(), pool.event_sink());
        let scripts =
            ScriptEngine::with_history_capacity(pool.clone(), pool.event_sink(), script_history_capacity);
        let controller = InteractionController::new(pool.clone());

        // Session teardown forgets everything keyed by the connection.
        let hook_resolver = resolver.clone();
        let hook_controller = controller.clone();
        pool.register_close_hook(move |id| {
            hook_resolver.clear_connection(id);
            hook_controller.drop_page(id);
        });

        info!(target: "webhelm", "engine assembled");
        Self {
            pool,
            inspector,
            resolver,
            scripts,
            controller,
        }
    }

    /// Start the transport and background supervision without creating a
    /// session. Creating the first session does this implicitly.
    pub async fn start(&self) -> EngineResult<()> {
        self.pool.start().await
    }

    // ---- session lifecycle -------------------------------------------------

    pub async fn create_session(
        &self,
        id: ConnectionId,
        url: Option<&str>,
        opts: &NavigateOptions,
    ) -> EngineResult<PageState> {
        self.controller.create_page(id, url, opts).await
    }

    pub async fn close_session(&self, id: &ConnectionId) {
        self.pool.close_connection(id).await;
    }

    pub async fn shutdown(&self) {
        self.pool.shutdown().await;
    }

    // ---- navigation and interaction ----------------------------------------

    pub async fn navigate(
        &self,
        id: &ConnectionId,
        url: &str,
        opts: &NavigateOptions,
    ) -> EngineResult<()> {
        self.controller.navigate_to_url(id, url, opts).await
    }

    pub async fn wait_for_element(
        &self,
        id: &ConnectionId,
        selector: &str,
        opts: &WaitOptions,
    ) -> EngineResult<NodeId> {
        self.controller.wait_for_element(id, selector, opts).await
    }

    pub async fn click(
        &self,
        id: &ConnectionId,
        selector: &str,
        opts: &WaitOptions,
    ) -> EngineResult<()> {
        self.controller.click_element(id, selector, opts).await
    }

    pub async fn fill(
        &self,
        id: &ConnectionId,
        selector: &str,
        text: &str,
        opts: &WaitOptions,
    ) -> EngineResult<()> {
        self.controller.fill_element(id, selector, text, opts).await
    }

    pub async fn select(
        &self,
        id: &ConnectionId,
        selector: &str,
        value: &str,
        opts: &WaitOptions,
    ) -> EngineResult<()> {
        self.controller.select_option(id, selector, value, opts).await
    }

    pub async fn go_back(&self, id: &ConnectionId, opts: &NavigateOptions) -> EngineResult<()> {
        self.controller.go_back(id, opts).await
    }

    pub async fn go_forward(&self, id: &ConnectionId, opts: &NavigateOptions) -> EngineResult<()> {
        self.controller.go_forward(id, opts).await
    }

    pub fn page_state(&self, id: &ConnectionId) -> Option<PageState> {
        self.controller.page_state(id)
    }

    // ---- scripts ------------------------------------------------------------

    pub async fn execute_script(
        &self,
        id: &ConnectionId,
        script: &str,
    ) -> EngineResult<ScriptRecord> {
        self.scripts
            .execute_script(id, script, &ExecuteOptions::default())
            .await
    }

    pub fn script_history(&self, id: &ConnectionId) -> Vec<ScriptRecord> {
        self.scripts.history(id)
    }

    pub async fn performance_metrics(&self, id: &ConnectionId) -> PerformanceMetrics {
        self.scripts.get_performance_metrics(id).await
    }

    // ---- elements -----------------------------------------------------------

    /// Describe the first element matching `selector`: shape, visibility,
    /// box, and the robust selectors that re-find it.
    pub async fn get_element_info(
        &self,
        id: &ConnectionId,
        selector: &str,
    ) -> EngineResult<ElementInfo> {
        let node_id = self
            .inspector
            .query_selector(id, selector)
            .await?
            .ok_or_else(|| EngineError::ElementNotFound(selector.to_string()))?;
        let node: ElementNode = self.inspector.describe_node(id, node_id).await?;
        let visible = self.inspector.is_visible(id, node_id).await?;
        let bounding_box = self.inspector.bounding_box(id, node_id).await?;
        let selectors = self.resolver.generate_selectors(id, node_id).await?;

        Ok(ElementInfo {
            node_id,
            tag: node.tag(),
            attributes: node.attributes.clone(),
            text: node.text(),
            visible,
            bounding_box,
            selectors,
        })
    }

    /// Resolve a natural-language description to the best-scoring element.
    pub async fn find_element(
        &self,
        id: &ConnectionId,
        description: &str,
    ) -> EngineResult<ElementMatch> {
        self.resolver
            .find_element_by_description(id, description, &MatchContext::default())
            .await
    }

    // ---- status -------------------------------------------------------------

    pub fn list_sessions(&self) -> Vec<SessionInfo> {
        self.pool.list_connections()
    }

    pub fn connection_count(&self) -> usize {
        self.pool.connection_count()
    }

    pub fn active_connection_ids(&self) -> Vec<ConnectionId> {
        self.pool.active_connection_ids()
    }

    pub fn session_health(&self, id: &ConnectionId) -> Option<HealthSnapshot> {
        self.pool.health(id)
    }

    pub fn subscribe(&self) -> broadcast::Receiver<EngineEvent> {
        self.pool.subscribe()
    }

    /// Event subscription as an mpsc receiver, for callers that would
    /// rather not deal with broadcast lag errors. Spawns a forwarding task.
    pub fn event_stream(&self, capacity: usize) -> mpsc::Receiver<EngineEvent> {
        webhelm_event_bus::bridge_to_mpsc(self.pool.bus(), capacity)
    }

    // ---- component handles --------------------------------------------------

    pub fn pool(&self) -> &SessionPool {
        &self.pool
    }

    pub fn inspector(&self) -> &DomInspector {
        &self.inspector
    }

    pub fn resolver(&self) -> &SelectorResolver {
        &self.resolver
    }

    pub fn scripts(&self) -> &ScriptEngine {
        &self.scripts
    }

    pub fn controller(&self) -> &InteractionController {
        &self.controller
    }
}
