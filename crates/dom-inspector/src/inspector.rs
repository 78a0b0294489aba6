//! Protocol-backed inspection operations.

use std::collections::HashMap;

use serde_json::{json, Value};
use tracing::debug;

use cdp_pool::SessionPool;
use webhelm_core_types::{ConnectionId, EngineError, EngineResult, NodeId};

use crate::model::{BoundingBox, ElementNode, SearchFilter};
use crate::search;

/// Stateless facade over the DOM and CSS domains of a pooled session.
/// Holds no per-page state; every call round-trips to the browser.
#[derive(Clone)]
pub struct DomInspector {
    pool: SessionPool,
}

impl DomInspector {
    pub fn new(pool: SessionPool) -> Self {
        Self { pool }
    }

    /// Fetch the full document tree.
    pub async fn get_document(&self, id: &ConnectionId) -> EngineResult<ElementNode> {
        let result = self
            .pool
            .send_on_session(id, "DOM.getDocument", json!({ "depth": -1 }))
            .await?;
        result
            .get("root")
            .and_then(ElementNode::from_protocol)
            .ok_or_else(|| EngineError::provider("DOM.getDocument returned no root node"))
    }

    /// First node matching a CSS selector, or `None` when nothing matches.
    pub async fn query_selector(
        &self,
        id: &ConnectionId,
        selector: &str,
    ) -> EngineResult<Option<NodeId>> {
        let root = self.document_root(id).await?;
        let result = self
            .pool
            .send_on_session(
                id,
                "DOM.querySelector",
                json!({ "nodeId": root, "selector": selector }),
            )
            .await?;
        let node_id = result.get("nodeId").and_then(Value::as_i64).unwrap_or(0);
        Ok((node_id != 0).then_some(node_id))
    }

    /// Every node matching a CSS selector, document order.
    pub async fn query_selector_all(
        &self,
        id: &ConnectionId,
        selector: &str,
    ) -> EngineResult<Vec<NodeId>> {
        let root = self.document_root(id).await?;
        let result = self
            .pool
            .send_on_session(
                id,
                "DOM.querySelectorAll",
                json!({ "nodeId": root, "selector": selector }),
            )
            .await?;
        Ok(result
            .get("nodeIds")
            .and_then(Value::as_array)
            .map(|ids| ids.iter().filter_map(Value::as_i64).filter(|id| *id != 0).collect())
            .unwrap_or_default())
    }

    /// Shallow description of one node.
    pub async fn describe_node(
        &self,
        id: &ConnectionId,
        node_id: NodeId,
    ) -> EngineResult<ElementNode> {
        let result = self
            .pool
            .send_on_session(
                id,
                "DOM.describeNode",
                json!({ "nodeId": node_id, "depth": 0 }),
            )
            .await?;
        result
            .get("node")
            .and_then(ElementNode::from_protocol)
            .ok_or_else(|| EngineError::provider("DOM.describeNode returned no node"))
    }

    /// Computed style as a property name to value map.
    pub async fn computed_style(
        &self,
        id: &ConnectionId,
        node_id: NodeId,
    ) -> EngineResult<HashMap<String, String>> {
        let result = self
            .pool
            .send_on_session(
                id,
                "CSS.getComputedStyleForNode",
                json!({ "nodeId": node_id }),
            )
            .await?;
        let mut style = HashMap::new();
        if let Some(entries) = result.get("computedStyle").and_then(Value::as_array) {
            for entry in entries {
                if let (Some(name), Some(value)) = (
                    entry.get("name").and_then(Value::as_str),
                    entry.get("value").and_then(Value::as_str),
                ) {
                    style.insert(name.to_string(), value.to_string());
                }
            }
        }
        Ok(style)
    }

    /// Border box of one node. Detached or unrendered nodes have no box
    /// model; the provider error for that case maps to `None`.
    pub async fn bounding_box(
        &self,
        id: &ConnectionId,
        node_id: NodeId,
    ) -> EngineResult<Option<BoundingBox>> {
        let outcome = self
            .pool
            .send_on_session(id, "DOM.getBoxModel", json!({ "nodeId": node_id }))
            .await;
        match outcome {
            Ok(result) => {
                let quad: Vec<f64> = result
                    .pointer("/model/border")
                    .and_then(Value::as_array)
                    .map(|values| values.iter().filter_map(Value::as_f64).collect())
                    .unwrap_or_default();
                Ok(BoundingBox::from_quad(&quad))
            }
            Err(EngineError::Provider { hint, .. }) => {
                debug!(target: "dom-inspector", node_id, %hint, "no box model");
                Ok(None)
            }
            Err(err) => Err(err),
        }
    }

    /// Visibility gate: rendered with a non-empty box, not display:none,
    /// not visibility:hidden, opacity above zero.
    pub async fn is_visible(&self, id: &ConnectionId, node_id: NodeId) -> EngineResult<bool> {
        let style = self.computed_style(id, node_id).await.unwrap_or_default();
        if style.get("display").map(String::as_str) == Some("none") {
            return Ok(false);
        }
        if style.get("visibility").map(String::as_str) == Some("hidden") {
            return Ok(false);
        }
        let opacity = style
            .get("opacity")
            .and_then(|raw| raw.parse::<f64>().ok())
            .unwrap_or(1.0);
        if opacity <= 0.0 {
            return Ok(false);
        }
        let bbox = self.bounding_box(id, node_id).await?;
        Ok(matches!(bbox, Some(b) if b.width > 0.0 && b.height > 0.0))
    }

    /// Root-first selector path for a node, derived from a fresh tree.
    pub async fn ancestor_path(
        &self,
        id: &ConnectionId,
        node_id: NodeId,
    ) -> EngineResult<Vec<String>> {
        let tree = self.get_document(id).await?;
        Ok(search::ancestor_path(&tree, node_id))
    }

    /// Filtered depth-first search over a fresh document tree.
    pub async fn search_elements(
        &self,
        id: &ConnectionId,
        filter: &SearchFilter,
    ) -> EngineResult<Vec<ElementNode>> {
        let tree = self.get_document(id).await?;
        Ok(search::search_elements(&tree, filter))
    }

    async fn document_root(&self, id: &ConnectionId) -> EngineResult<NodeId> {
        let result = self
            .pool
            .send_on_session(id, "DOM.getDocument", json!({ "depth": 0 }))
            .await?;
        result
            .pointer("/root/nodeId")
            .and_then(Value::as_i64)
            .ok_or_else(|| EngineError::provider("DOM.getDocument returned no root node"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cdp_pool::{CreateOptions, PoolConfig, StubTransport};

    async fn pooled_inspector() -> (DomInspector, std::sync::Arc<StubTransport>, ConnectionId) {
        let stub = StubTransport::new();
        let pool = SessionPool::with_transport(
            PoolConfig {
                health_check_interval_ms: 3_600_000,
                ..PoolConfig::default()
            },
            stub.clone(),
        );
        let id = ConnectionId::new("tab-1");
        pool.create_connection(id.clone(), CreateOptions::default())
            .await
            .unwrap();
        (DomInspector::new(pool), stub, id)
    }

    #[tokio::test]
    async fn query_selector_maps_zero_to_none() {
        let (inspector, stub, id) = pooled_inspector().await;
        stub.respond(
            "DOM.getDocument",
            serde_json::json!({ "root": { "nodeId": 1, "nodeType": 9, "nodeName": "#document" } }),
        );
        stub.respond("DOM.querySelector", serde_json::json!({ "nodeId": 0 }));

        let found = inspector.query_selector(&id, "#missing").await.unwrap();
        assert_eq!(found, None);
    }

    #[tokio::test]
    async fn computed_style_flattens_property_entries() {
        let (inspector, stub, id) = pooled_inspector().await;
        stub.respond(
            "CSS.getComputedStyleForNode",
            serde_json::json!({ "computedStyle": [
                { "name": "display", "value": "block" },
                { "name": "opacity", "value": "0.5" }
            ]}),
        );

        let style = inspector.computed_style(&id, 7).await.unwrap();
        assert_eq!(style.get("display").map(String::as_str), Some("block"));
        assert_eq!(style.get("opacity").map(String::as_str), Some("0.5"));
    }

    #[tokio::test]
    async fn hidden_elements_are_not_visible() {
        let (inspector, stub, id) = pooled_inspector().await;
        stub.respond(
            "CSS.getComputedStyleForNode",
            serde_json::json!({ "computedStyle": [ { "name": "display", "value": "none" } ] }),
        );

        assert!(!inspector.is_visible(&id, 7).await.unwrap());
    }

    #[tokio::test]
    async fn rendered_elements_with_a_box_are_visible() {
        let (inspector, stub, id) = pooled_inspector().await;
        stub.respond(
            "CSS.getComputedStyleForNode",
            serde_json::json!({ "computedStyle": [
                { "name": "display", "value": "block" },
                { "name": "visibility", "value": "visible" },
                { "name": "opacity", "value": "1" }
            ]}),
        );
        stub.respond(
            "DOM.getBoxModel",
            serde_json::json!({ "model": {
                "border": [0.0, 0.0, 80.0, 0.0, 80.0, 20.0, 0.0, 20.0]
            }}),
        );

        assert!(inspector.is_visible(&id, 7).await.unwrap());
    }

    #[tokio::test]
    async fn missing_box_model_means_not_visible() {
        let (inspector, stub, id) = pooled_inspector().await;
        stub.respond(
            "CSS.getComputedStyleForNode",
            serde_json::json!({ "computedStyle": [] }),
        );
        stub.respond_err(
            "DOM.getBoxModel",
            EngineError::provider("Could not compute box model"),
        );

        assert!(!inspector.is_visible(&id, 7).await.unwrap());
    }
}
