//! Resolution entry points and the per-connection strategy memo.

use std::cmp::Ordering;
use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::broadcast;
use tracing::debug;

use dom_inspector::{search, DomInspector, ElementNode};
use webhelm_core_types::{ConnectionId, EngineError, EngineEvent, EngineResult, NodeId};

use crate::intent::{parse_intent, Intent};
use crate::scoring::{compute_score, MatchContext};
use crate::strategies::generate_robust_selectors;
use crate::types::{AlternativeMatch, DynamicElementPolicy, ElementMatch, SelectorStrategy};

/// Candidates that get a live visibility check before the final
/// ranking: the best match and both reported alternatives.
const VISIBILITY_CHECKS: usize = 3;

/// Resolves descriptions to elements and elements to selector lists.
///
/// Generated strategy lists are memoized per `(connection, node)`;
/// the pool's close notification clears a connection's entries so stale
/// node ids never leak across sessions.
#[derive(Clone)]
pub struct SelectorResolver {
    inspector: DomInspector,
    events: broadcast::Sender<EngineEvent>,
    memo: Arc<DashMap<(ConnectionId, NodeId), Vec<SelectorStrategy>>>,
}

impl SelectorResolver {
    pub fn new(inspector: DomInspector, events: broadcast::Sender<EngineEvent>) -> Self {
        Self {
            inspector,
            events,
            memo: Arc::new(DashMap::new()),
        }
    }

    /// Score every element of the live document against a free-form
    /// description and return the best match with up to two alternatives.
    ///
    /// An empty candidate set is `ElementNotFound`; a low-confidence
    /// guess is worse than no answer.
    pub async fn find_element_by_description(
        &self,
        id: &ConnectionId,
        description: &str,
        context: &MatchContext,
    ) -> EngineResult<ElementMatch> {
        let intent = parse_intent(description);
        let tree = self.inspector.get_document(id).await?;

        let mut scored: Vec<(f64, ElementNode)> = Vec::new();
        let mut stack = vec![&tree];
        while let Some(node) = stack.pop() {
            if node.is_element() {
                let score = compute_score(node, &intent, context);
                if score > 0.0 {
                    scored.push((score, node.clone()));
                }
            }
            if let Some(children) = &node.children {
                for child in children.iter().rev() {
                    stack.push(child);
                }
            }
        }

        if scored.is_empty() {
            return Err(EngineError::ElementNotFound(format!(
                "no element matched description: {description}"
            )));
        }
        scored.sort_by(|a, b| b.0.partial_cmp(&a.0).unwrap_or(Ordering::Equal));
        self.apply_visibility(id, &intent, context, &mut scored).await;

        let (confidence, best) = (scored[0].0, scored[0].1.clone());
        let selectors = self.strategies_for(id, &tree, &best);
        let selector = selectors
            .first()
            .map(|s| s.selector.clone())
            .unwrap_or_else(|| best.tag());
        let alternatives = scored
            .iter()
            .skip(1)
            .take(2)
            .map(|(score, node)| AlternativeMatch {
                node_id: node.node_id,
                selector: search::selector_hop(node),
                confidence: *score,
            })
            .collect();

        debug!(
            target: "element-resolver",
            connection = %id,
            node_id = best.node_id,
            confidence,
            "description resolved"
        );
        let _ = self.events.send(EngineEvent::ElementMatched {
            connection: id.clone(),
            node_id: best.node_id,
            selector: selector.clone(),
            confidence,
        });

        Ok(ElementMatch {
            node_id: best.node_id,
            selector,
            confidence,
            selectors,
            alternatives,
        })
    }

    /// Ranked selector strategies for a concrete node of the live
    /// document.
    pub async fn generate_selectors(
        &self,
        id: &ConnectionId,
        node_id: NodeId,
    ) -> EngineResult<Vec<SelectorStrategy>> {
        if let Some(cached) = self.memo.get(&(id.clone(), node_id)) {
            return Ok(cached.clone());
        }
        let tree = self.inspector.get_document(id).await?;
        let node = find_in_tree(&tree, node_id).ok_or_else(|| {
            EngineError::ElementNotFound(format!("node {node_id} is not in the document"))
        })?;
        Ok(self.strategies_for(id, &tree, node))
    }

    /// The declared policy for elements that re-render after load; the
    /// interaction layer owns the loop that applies it.
    pub fn dynamic_element_policy(&self) -> DynamicElementPolicy {
        DynamicElementPolicy::default()
    }

    /// Drop every memoized strategy list for one connection.
    pub fn clear_connection(&self, id: &ConnectionId) {
        self.memo.retain(|(conn, _), _| conn != id);
    }

    /// Fold live visibility into the leading candidates and re-rank.
    ///
    /// Only the entries a match can report are checked against the
    /// browser; a failed lookup leaves visibility unknown.
    async fn apply_visibility(
        &self,
        id: &ConnectionId,
        intent: &Intent,
        context: &MatchContext,
        scored: &mut [(f64, ElementNode)],
    ) {
        for (score, node) in scored.iter_mut().take(VISIBILITY_CHECKS) {
            if let Ok(visible) = self.inspector.is_visible(id, node.node_id).await {
                node.visible = Some(visible);
                *score = compute_score(node, intent, context);
            }
        }
        scored.sort_by(|a, b| b.0.partial_cmp(&a.0).unwrap_or(Ordering::Equal));
    }

    fn strategies_for(
        &self,
        id: &ConnectionId,
        tree: &ElementNode,
        node: &ElementNode,
    ) -> Vec<SelectorStrategy> {
        let key = (id.clone(), node.node_id);
        if let Some(cached) = self.memo.get(&key) {
            return cached.clone();
        }
        let hops = search::ancestor_path(tree, node.node_id);
        let strategies = generate_robust_selectors(node, &hops);
        self.memo.insert(key, strategies.clone());
        strategies
    }
}

fn find_in_tree(root: &ElementNode, node_id: NodeId) -> Option<&ElementNode> {
    let mut stack = vec![root];
    while let Some(node) = stack.pop() {
        if node.node_id == node_id {
            return Some(node);
        }
        if let Some(children) = &node.children {
            stack.extend(children.iter());
        }
    }
    None
}
