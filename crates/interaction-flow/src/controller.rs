//! Page lifecycle and input dispatch over pooled sessions.

use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use serde_json::{json, Value};
use tokio::sync::broadcast;
use tokio::time::{sleep, Instant};
use tracing::{debug, info, warn};

use cdp_pool::{CreateOptions, SessionPool};
use dom_inspector::DomInspector;
use webhelm_core_types::{ConnectionId, EngineError, EngineEvent, EngineResult, NodeId};

use crate::state::PageState;
use crate::wait::{self, WaitOptions, POLL_INTERVAL_MS};

/// Default budget for one navigation, in milliseconds.
pub const DEFAULT_NAVIGATION_TIMEOUT_MS: u64 = 30_000;

#[derive(Clone, Copy, Debug)]
pub struct NavigateOptions {
    pub timeout_ms: u64,
}

impl Default for NavigateOptions {
    fn default() -> Self {
        Self {
            timeout_ms: DEFAULT_NAVIGATION_TIMEOUT_MS,
        }
    }
}

/// Focus the element, replace its value, and fire the events frameworks
/// listen for. Runs against the page-side element object.
const FILL_FN: &str = r#"
function(text) {
    if (typeof this.focus === 'function') { this.focus(); }
    if ('value' in this) {
        this.value = '';
        this.value = text;
    } else if (this.isContentEditable) {
        this.textContent = text;
    } else {
        return { status: 'not-fillable' };
    }
    this.dispatchEvent(new Event('input', { bubbles: true }));
    this.dispatchEvent(new Event('change', { bubbles: true }));
    return { status: 'filled' };
}
"#;

/// Pick an option by value first, label second.
const SELECT_FN: &str = r#"
function(target) {
    const options = Array.from(this.options || []);
    let option = options.find(opt => opt.value === target);
    if (!option) {
        option = options.find(opt => opt.text.trim() === target);
    }
    if (!option) { return { status: 'option-missing' }; }
    this.value = option.value;
    this.dispatchEvent(new Event('input', { bubbles: true }));
    this.dispatchEvent(new Event('change', { bubbles: true }));
    return { status: 'selected', value: this.value };
}
"#;

/// Drives pages end to end: create, navigate, wait, click, fill, select,
/// and history traversal. Holds a [`PageState`] per connection.
#[derive(Clone)]
pub struct InteractionController {
    pool: SessionPool,
    inspector: DomInspector,
    events: broadcast::Sender<EngineEvent>,
    states: Arc<DashMap<ConnectionId, PageState>>,
}

impl InteractionController {
    pub fn new(pool: SessionPool) -> Self {
        let inspector = DomInspector::new(pool.clone());
        let events = pool.event_sink();
        Self {
            pool,
            inspector,
            events,
            states: Arc::new(DashMap::new()),
        }
    }

    /// Create a pooled connection with fresh page state, optionally
    /// navigating right away. A failed initial navigation leaves the page
    /// open with `error_count` bumped, like a tab stuck on an error page.
    pub async fn create_page(
        &self,
        id: ConnectionId,
        url: Option<&str>,
        opts: &NavigateOptions,
    ) -> EngineResult<PageState> {
        self.pool
            .create_connection(id.clone(), CreateOptions::default())
            .await?;
        self.states.insert(id.clone(), PageState::new());
        if let Some(url) = url {
            self.navigate_to_url(&id, url, opts).await?;
        }
        Ok(self.page_state(&id).unwrap_or_default())
    }

    /// Navigate and block until the document settles, recording the new
    /// entry in history. Forward entries past the current cursor are
    /// discarded first.
    pub async fn navigate_to_url(
        &self,
        id: &ConnectionId,
        url: &str,
        opts: &NavigateOptions,
    ) -> EngineResult<()> {
        self.drive_navigation(id, url, opts, true).await
    }

    /// Wait until `selector` resolves to an interactable node.
    pub async fn wait_for_element(
        &self,
        id: &ConnectionId,
        selector: &str,
        opts: &WaitOptions,
    ) -> EngineResult<NodeId> {
        wait::await_element(&self.inspector, id, selector, opts).await
    }

    /// Click the center of the element's border box with a left
    /// press/release pair.
    pub async fn click_element(
        &self,
        id: &ConnectionId,
        selector: &str,
        opts: &WaitOptions,
    ) -> EngineResult<()> {
        let node_id = self.wait_for_element(id, selector, opts).await?;
        let bbox = self
            .inspector
            .bounding_box(id, node_id)
            .await?
            .ok_or_else(|| {
                EngineError::ElementNotFound(format!("selector '{selector}' has no box model"))
            })?;
        let (x, y) = bbox.center();

        for kind in ["mousePressed", "mouseReleased"] {
            self.pool
                .send_on_session(
                    id,
                    "Input.dispatchMouseEvent",
                    json!({
                        "type": kind,
                        "x": x,
                        "y": y,
                        "button": "left",
                        "buttons": 1,
                        "clickCount": 1,
                        "pointerType": "mouse",
                    }),
                )
                .await?;
        }
        debug!(target: "interaction-flow", connection = %id, %selector, x, y, "clicked");
        Ok(())
    }

    /// Replace the element's value, firing `input` and `change`.
    pub async fn fill_element(
        &self,
        id: &ConnectionId,
        selector: &str,
        text: &str,
        opts: &WaitOptions,
    ) -> EngineResult<()> {
        self.wait_for_element(id, selector, opts).await?;
        let object_id = self.resolve_object(id, selector).await?;
        let status = self
            .call_on_object(id, &object_id, FILL_FN, json!([{ "value": text }]))
            .await?;
        match status.as_str() {
            "filled" => {
                debug!(target: "interaction-flow", connection = %id, %selector, "filled");
                Ok(())
            }
            "not-fillable" => Err(EngineError::provider(format!(
                "selector '{selector}' is not a fillable element"
            ))),
            other => Err(EngineError::provider(format!(
                "fill returned unexpected status '{other}'"
            ))),
        }
    }

    /// Select a `<select>` option by value, falling back to its label.
    pub async fn select_option(
        &self,
        id: &ConnectionId,
        selector: &str,
        value: &str,
        opts: &WaitOptions,
    ) -> EngineResult<()> {
        self.wait_for_element(id, selector, opts).await?;
        let object_id = self.resolve_object(id, selector).await?;
        let status = self
            .call_on_object(id, &object_id, SELECT_FN, json!([{ "value": value }]))
            .await?;
        match status.as_str() {
            "selected" => {
                debug!(target: "interaction-flow", connection = %id, %selector, %value, "selected");
                Ok(())
            }
            "option-missing" => Err(EngineError::provider(format!(
                "no option with value or label '{value}' under '{selector}'"
            ))),
            other => Err(EngineError::provider(format!(
                "select returned unexpected status '{other}'"
            ))),
        }
    }

    /// Step one entry back and re-issue that navigation. The history
    /// cursor commits before the load, like a browser back button.
    pub async fn go_back(&self, id: &ConnectionId, opts: &NavigateOptions) -> EngineResult<()> {
        let target = self
            .with_state(id, |state| state.history.step_back())
            .ok_or_else(|| {
                EngineError::HistoryBoundsExceeded("already at the oldest history entry".into())
            })?;
        self.drive_navigation(id, &target, opts, false).await
    }

    /// Step one entry forward and re-issue that navigation.
    pub async fn go_forward(&self, id: &ConnectionId, opts: &NavigateOptions) -> EngineResult<()> {
        let target = self
            .with_state(id, |state| state.history.step_forward())
            .ok_or_else(|| {
                EngineError::HistoryBoundsExceeded("already at the newest history entry".into())
            })?;
        self.drive_navigation(id, &target, opts, false).await
    }

    pub fn page_state(&self, id: &ConnectionId) -> Option<PageState> {
        self.states.get(id).map(|entry| entry.value().clone())
    }

    /// Forget a page's state. Wired to the pool's close hooks so closed
    /// sessions do not leak bookkeeping.
    pub fn drop_page(&self, id: &ConnectionId) {
        if self.states.remove(id).is_some() {
            debug!(target: "interaction-flow", connection = %id, "dropped page state");
        }
    }

    async fn drive_navigation(
        &self,
        id: &ConnectionId,
        url: &str,
        opts: &NavigateOptions,
        record_history: bool,
    ) -> EngineResult<()> {
        let started = Instant::now();

        let navigate = self
            .pool
            .send_on_session(id, "Page.navigate", json!({ "url": url }))
            .await;
        let result = match navigate {
            Ok(result) => result,
            // A missing or deactivated session is the caller's problem,
            // not a page failure; no state is touched.
            Err(err @ (EngineError::ConnectionNotFound(_) | EngineError::ConnectionUnhealthy(_))) => {
                return Err(err)
            }
            Err(err) => return Err(self.navigation_failure(id, url, err.to_string())),
        };
        if let Some(text) = result.get("errorText").and_then(Value::as_str) {
            if !text.is_empty() {
                return Err(self.navigation_failure(id, url, format!("navigation rejected: {text}")));
            }
        }

        self.with_state(id, |state| {
            state.is_loading = true;
            state.is_loaded = false;
        });

        let deadline = Instant::now() + Duration::from_millis(opts.timeout_ms);
        loop {
            let ready = self
                .pool
                .send_on_session(
                    id,
                    "Runtime.evaluate",
                    json!({ "expression": "document.readyState", "returnByValue": true }),
                )
                .await;
            match ready {
                Ok(value)
                    if value.pointer("/result/value").and_then(Value::as_str)
                        == Some("complete") =>
                {
                    break
                }
                Ok(_) => {}
                Err(
                    err @ (EngineError::ConnectionNotFound(_)
                    | EngineError::ConnectionUnhealthy(_)),
                ) => {
                    self.with_state(id, |state| state.is_loading = false);
                    return Err(err);
                }
                Err(err) => {
                    debug!(target: "interaction-flow", connection = %id, %err, "readiness probe failed");
                }
            }
            if Instant::now() >= deadline {
                return Err(self.navigation_failure(
                    id,
                    url,
                    format!(
                        "page did not reach readyState \"complete\" within {}ms",
                        opts.timeout_ms
                    ),
                ));
            }
            sleep(Duration::from_millis(POLL_INTERVAL_MS)).await;
        }

        let title = match self
            .pool
            .send_on_session(
                id,
                "Runtime.evaluate",
                json!({ "expression": "document.title", "returnByValue": true }),
            )
            .await
        {
            Ok(value) => value
                .pointer("/result/value")
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_string(),
            Err(err) => {
                debug!(target: "interaction-flow", connection = %id, %err, "title probe failed");
                String::new()
            }
        };

        self.with_state(id, |state| {
            state.url = url.to_string();
            state.title = title;
            state.is_loading = false;
            state.is_loaded = true;
            if record_history {
                state.history.record(url);
            }
        });
        info!(
            target: "interaction-flow",
            connection = %id,
            %url,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "navigation complete"
        );
        let _ = self.events.send(EngineEvent::Navigated {
            connection: id.clone(),
            url: url.to_string(),
        });
        Ok(())
    }

    /// Record one navigation failure against the page and build the error.
    fn navigation_failure(&self, id: &ConnectionId, url: &str, reason: String) -> EngineError {
        self.with_state(id, |state| {
            state.is_loading = false;
            state.error_count += 1;
        });
        warn!(target: "interaction-flow", connection = %id, %url, %reason, "navigation failed");
        EngineError::NavigationFailed {
            url: url.to_string(),
            reason,
        }
    }

    /// Resolve the selector to a page-side object handle.
    async fn resolve_object(&self, id: &ConnectionId, selector: &str) -> EngineResult<String> {
        let literal = serde_json::to_string(selector)
            .map_err(|err| EngineError::internal(err.to_string()))?;
        let result = self
            .pool
            .send_on_session(
                id,
                "Runtime.evaluate",
                json!({
                    "expression": format!("document.querySelector({literal})"),
                    "returnByValue": false,
                }),
            )
            .await?;
        result
            .pointer("/result/objectId")
            .and_then(Value::as_str)
            .map(str::to_string)
            .ok_or_else(|| {
                EngineError::ElementNotFound(format!(
                    "selector '{selector}' resolved to no object"
                ))
            })
    }

    async fn call_on_object(
        &self,
        id: &ConnectionId,
        object_id: &str,
        declaration: &str,
        arguments: Value,
    ) -> EngineResult<String> {
        let result = self
            .pool
            .send_on_session(
                id,
                "Runtime.callFunctionOn",
                json!({
                    "objectId": object_id,
                    "functionDeclaration": declaration.trim(),
                    "arguments": arguments,
                    "returnByValue": true,
                }),
            )
            .await?;
        if let Some(details) = result.get("exceptionDetails") {
            let text = details
                .pointer("/exception/description")
                .or_else(|| details.get("text"))
                .and_then(Value::as_str)
                .unwrap_or("call threw");
            return Err(EngineError::provider(text.to_string()));
        }
        Ok(result
            .pointer("/result/value/status")
            .and_then(Value::as_str)
            .unwrap_or("unknown")
            .to_string())
    }

    /// Run `f` against the page state, creating it on first touch. The map
    /// guard never crosses an await.
    fn with_state<R>(&self, id: &ConnectionId, f: impl FnOnce(&mut PageState) -> R) -> R {
        let mut entry = self.states.entry(id.clone()).or_default();
        f(entry.value_mut())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cdp_pool::{PoolConfig, StubTransport};

    fn quiet_config() -> PoolConfig {
        PoolConfig {
            health_check_interval_ms: 3_600_000,
            ..PoolConfig::default()
        }
    }

    async fn paged_controller() -> (InteractionController, Arc<StubTransport>, ConnectionId) {
        let stub = StubTransport::new();
        let pool = SessionPool::with_transport(quiet_config(), stub.clone());
        let controller = InteractionController::new(pool);
        let id = ConnectionId::new("page-1");
        controller
            .create_page(id.clone(), None, &NavigateOptions::default())
            .await
            .unwrap();
        (controller, stub, id)
    }

    #[tokio::test]
    async fn navigation_commits_state_history_and_event() {
        let stub = StubTransport::new();
        let pool = SessionPool::with_transport(quiet_config(), stub.clone());
        let mut rx = pool.subscribe();
        let controller = InteractionController::new(pool);
        let id = ConnectionId::new("page-1");

        controller
            .create_page(id.clone(), Some("https://a.test/"), &NavigateOptions::default())
            .await
            .unwrap();

        let state = controller.page_state(&id).unwrap();
        assert_eq!(state.url, "https://a.test/");
        assert!(state.is_loaded);
        assert!(!state.is_loading);
        assert_eq!(state.error_count, 0);
        assert_eq!(state.history.entries(), ["https://a.test/"]);

        let mut saw_navigated = false;
        while let Ok(event) = rx.try_recv() {
            if matches!(&event, EngineEvent::Navigated { url, .. } if url == "https://a.test/") {
                saw_navigated = true;
            }
        }
        assert!(saw_navigated);
    }

    #[tokio::test]
    async fn going_back_then_navigating_discards_the_forward_branch() {
        let (controller, _stub, id) = paged_controller().await;
        let opts = NavigateOptions::default();

        controller.navigate_to_url(&id, "https://a.test/", &opts).await.unwrap();
        controller.navigate_to_url(&id, "https://b.test/", &opts).await.unwrap();

        controller.go_back(&id, &opts).await.unwrap();
        assert_eq!(controller.page_state(&id).unwrap().url, "https://a.test/");

        controller.navigate_to_url(&id, "https://c.test/", &opts).await.unwrap();

        let state = controller.page_state(&id).unwrap();
        assert_eq!(state.history.entries(), ["https://a.test/", "https://c.test/"]);
        assert_eq!(state.url, "https://c.test/");
        assert!(!state.history.can_go_forward());

        let err = controller.go_forward(&id, &opts).await.unwrap_err();
        assert!(matches!(err, EngineError::HistoryBoundsExceeded(_)));
    }

    #[tokio::test]
    async fn back_on_a_fresh_page_is_out_of_bounds() {
        let (controller, _stub, id) = paged_controller().await;

        let err = controller
            .go_back(&id, &NavigateOptions::default())
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::HistoryBoundsExceeded(_)));

        controller
            .navigate_to_url(&id, "https://only.test/", &NavigateOptions::default())
            .await
            .unwrap();
        let err = controller
            .go_back(&id, &NavigateOptions::default())
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::HistoryBoundsExceeded(_)));
    }

    #[tokio::test(start_paused = true)]
    async fn wait_gives_up_within_the_timeout_budget() {
        let (controller, _stub, id) = paged_controller().await;
        let opts = WaitOptions {
            timeout_ms: 300,
            ..WaitOptions::default()
        };

        let started = Instant::now();
        let err = controller
            .wait_for_element(&id, "#never", &opts)
            .await
            .unwrap_err();
        let elapsed = started.elapsed();

        assert!(matches!(err, EngineError::ElementNotFound(_)));
        assert!(elapsed >= Duration::from_millis(300));
        assert!(elapsed <= Duration::from_millis(300 + POLL_INTERVAL_MS));
    }

    #[tokio::test]
    async fn click_presses_and_releases_at_the_box_center() {
        let (controller, stub, id) = paged_controller().await;
        stub.respond(
            "DOM.getDocument",
            json!({ "root": { "nodeId": 1, "nodeType": 9, "nodeName": "#document" } }),
        );
        stub.respond("DOM.querySelector", json!({ "nodeId": 7 }));
        stub.respond(
            "DOM.describeNode",
            json!({ "node": { "nodeId": 7, "nodeType": 1, "nodeName": "BUTTON", "attributes": [] } }),
        );
        stub.respond("CSS.getComputedStyleForNode", json!({ "computedStyle": [] }));
        // One box model for the visibility gate, one for the click itself.
        for _ in 0..2 {
            stub.respond(
                "DOM.getBoxModel",
                json!({ "model": { "border": [10.0, 20.0, 110.0, 20.0, 110.0, 70.0, 10.0, 70.0] } }),
            );
        }
        for _ in 0..2 {
            stub.respond("Input.dispatchMouseEvent", json!({}));
        }

        controller
            .click_element(&id, "#submit", &WaitOptions::default())
            .await
            .unwrap();

        let mouse: Vec<_> = stub
            .sent()
            .into_iter()
            .filter(|cmd| cmd.method == "Input.dispatchMouseEvent")
            .collect();
        assert_eq!(mouse.len(), 2);
        assert_eq!(mouse[0].params["type"], "mousePressed");
        assert_eq!(mouse[1].params["type"], "mouseReleased");
        for cmd in &mouse {
            assert_eq!(cmd.params["x"], 60.0);
            assert_eq!(cmd.params["y"], 45.0);
            assert_eq!(cmd.params["button"], "left");
            assert_eq!(cmd.params["clickCount"], 1);
        }
    }

    #[tokio::test]
    async fn fill_calls_the_page_side_function_with_the_text() {
        let (controller, stub, id) = paged_controller().await;
        stub.respond(
            "DOM.getDocument",
            json!({ "root": { "nodeId": 1, "nodeType": 9, "nodeName": "#document" } }),
        );
        stub.respond("DOM.querySelector", json!({ "nodeId": 4 }));
        stub.respond(
            "Runtime.evaluate",
            json!({ "result": { "type": "object", "objectId": "stub-obj-1" } }),
        );
        stub.respond(
            "Runtime.callFunctionOn",
            json!({ "result": { "type": "object", "value": { "status": "filled" } } }),
        );
        let opts = WaitOptions {
            wait_for_visible: false,
            wait_for_enabled: false,
            timeout_ms: 1_000,
        };

        controller
            .fill_element(&id, "#email", "ada@lovelace.dev", &opts)
            .await
            .unwrap();

        let call = stub
            .sent()
            .into_iter()
            .find(|cmd| cmd.method == "Runtime.callFunctionOn")
            .unwrap();
        assert_eq!(call.params["objectId"], "stub-obj-1");
        assert_eq!(call.params["arguments"][0]["value"], "ada@lovelace.dev");
        let declaration = call.params["functionDeclaration"].as_str().unwrap();
        assert!(declaration.contains("dispatchEvent"));
        assert!(declaration.contains("'input'"));
    }

    #[tokio::test]
    async fn selecting_a_missing_option_is_an_operation_error() {
        let (controller, stub, id) = paged_controller().await;
        stub.respond(
            "DOM.getDocument",
            json!({ "root": { "nodeId": 1, "nodeType": 9, "nodeName": "#document" } }),
        );
        stub.respond("DOM.querySelector", json!({ "nodeId": 9 }));
        stub.respond(
            "Runtime.evaluate",
            json!({ "result": { "type": "object", "objectId": "stub-obj-2" } }),
        );
        stub.respond(
            "Runtime.callFunctionOn",
            json!({ "result": { "type": "object", "value": { "status": "option-missing" } } }),
        );
        let opts = WaitOptions {
            wait_for_visible: false,
            wait_for_enabled: false,
            timeout_ms: 1_000,
        };

        let err = controller
            .select_option(&id, "#country", "atlantis", &opts)
            .await
            .unwrap_err();
        assert!(err.to_string().contains("no option"));
    }

    #[tokio::test]
    async fn failed_navigations_bump_the_error_count() {
        let (controller, stub, id) = paged_controller().await;
        stub.respond_err(
            "Page.navigate",
            EngineError::provider("net::ERR_NAME_NOT_RESOLVED"),
        );

        let err = controller
            .navigate_to_url(&id, "https://bad.test/", &NavigateOptions::default())
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::NavigationFailed { .. }));

        let state = controller.page_state(&id).unwrap();
        assert_eq!(state.error_count, 1);
        assert!(!state.is_loaded);
        assert!(state.history.is_empty());

        controller
            .navigate_to_url(&id, "https://good.test/", &NavigateOptions::default())
            .await
            .unwrap();
        let state = controller.page_state(&id).unwrap();
        assert_eq!(state.error_count, 1);
        assert_eq!(state.history.entries(), ["https://good.test/"]);
    }

    #[tokio::test]
    async fn dropping_a_page_forgets_its_state() {
        let (controller, _stub, id) = paged_controller().await;
        assert!(controller.page_state(&id).is_some());
        controller.drop_page(&id);
        assert!(controller.page_state(&id).is_none());
    }
}
