//! Bounded element readiness polling.

use std::time::Duration;

use tokio::time::{sleep, Instant};
use tracing::trace;

use dom_inspector::DomInspector;
use webhelm_core_types::{ConnectionId, EngineError, EngineResult, NodeId, RetryPolicy};

/// Cadence of readiness probes.
pub const POLL_INTERVAL_MS: u64 = 100;

#[derive(Clone, Copy, Debug)]
pub struct WaitOptions {
    /// Overall budget for the wait, in milliseconds.
    pub timeout_ms: u64,
    /// Require the element to pass the visibility gate.
    pub wait_for_visible: bool,
    /// Require the element to carry no `disabled` attribute.
    pub wait_for_enabled: bool,
}

impl Default for WaitOptions {
    fn default() -> Self {
        Self {
            timeout_ms: RetryPolicy::default().timeout_ms,
            wait_for_visible: true,
            wait_for_enabled: true,
        }
    }
}

impl WaitOptions {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

/// Wait until `selector` resolves to an interactable node.
///
/// Probes every 100ms until the deadline. Individual probe errors are
/// swallowed and retried; only the exhausted deadline surfaces, as
/// `ElementNotFound`.
pub(crate) async fn await_element(
    inspector: &DomInspector,
    id: &ConnectionId,
    selector: &str,
    opts: &WaitOptions,
) -> EngineResult<NodeId> {
    let deadline = Instant::now() + opts.timeout();
    loop {
        match probe(inspector, id, selector, opts).await {
            Ok(Some(node_id)) => return Ok(node_id),
            Ok(None) => {}
            Err(err) => {
                trace!(target: "interaction-flow", %selector, %err, "wait probe failed");
            }
        }
        if Instant::now() >= deadline {
            return Err(EngineError::ElementNotFound(format!(
                "selector '{selector}' did not become interactable within {}ms",
                opts.timeout_ms
            )));
        }
        sleep(Duration::from_millis(POLL_INTERVAL_MS)).await;
    }
}

async fn probe(
    inspector: &DomInspector,
    id: &ConnectionId,
    selector: &str,
    opts: &WaitOptions,
) -> EngineResult<Option<NodeId>> {
    let Some(node_id) = inspector.query_selector(id, selector).await? else {
        return Ok(None);
    };
    if opts.wait_for_enabled {
        let node = inspector.describe_node(id, node_id).await?;
        if node.attribute("disabled").is_some() {
            return Ok(None);
        }
    }
    if opts.wait_for_visible && !inspector.is_visible(id, node_id).await? {
        return Ok(None);
    }
    Ok(Some(node_id))
}
