//! Core types for the resolver.

use serde::{Deserialize, Serialize};

use webhelm_core_types::NodeId;

/// One way of locating an element, in rough order of drift tolerance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StrategyKind {
    /// Direct attribute selectors: `#id`, `[data-testid=...]`, classes.
    Attribute,
    /// Accessibility attributes, `[aria-label=...]`.
    Semantic,
    /// Ancestor-path selector.
    Structural,
    /// XPath expression.
    Xpath,
    /// Composite of tag plus role/name/type predicates.
    AiEnhanced,
}

impl StrategyKind {
    pub fn name(&self) -> &'static str {
        match self {
            StrategyKind::Attribute => "attribute",
            StrategyKind::Semantic => "semantic",
            StrategyKind::Structural => "structural",
            StrategyKind::Xpath => "xpath",
            StrategyKind::AiEnhanced => "ai_enhanced",
        }
    }
}

/// A candidate selector with its estimated reliability.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SelectorStrategy {
    pub kind: StrategyKind,
    pub selector: String,
    /// Heuristic reliability in [0, 1], not a calibrated probability.
    pub confidence: f64,
    pub fallback: bool,
    pub dynamic: bool,
}

impl SelectorStrategy {
    pub fn new(kind: StrategyKind, selector: impl Into<String>, confidence: f64) -> Self {
        Self {
            kind,
            selector: selector.into(),
            confidence,
            fallback: false,
            dynamic: false,
        }
    }

    /// Fallback selectors survive markup drift at the cost of precision;
    /// they are also the ones to re-derive on dynamic pages.
    pub fn fallback(kind: StrategyKind, selector: impl Into<String>, confidence: f64) -> Self {
        Self {
            kind,
            selector: selector.into(),
            confidence,
            fallback: true,
            dynamic: true,
        }
    }

    pub fn is_high_confidence(&self) -> bool {
        self.confidence >= 0.8
    }
}

/// Best element for a description, with ranked runners-up.
#[derive(Debug, Clone, Serialize)]
pub struct ElementMatch {
    pub node_id: NodeId,
    pub selector: String,
    pub confidence: f64,
    /// Full strategy list for the matched element, best first.
    pub selectors: Vec<SelectorStrategy>,
    /// Up to two next-ranked candidates.
    pub alternatives: Vec<AlternativeMatch>,
}

#[derive(Debug, Clone, Serialize)]
pub struct AlternativeMatch {
    pub node_id: NodeId,
    pub selector: String,
    pub confidence: f64,
}

/// Declared handling policy for elements that appear, move or re-render
/// after load. The retry loop itself lives with the interaction layer.
#[derive(Debug, Clone, Serialize)]
pub struct DynamicElementPolicy {
    pub wait_timeout_ms: u64,
    pub require_attached: bool,
    pub require_visible: bool,
    pub require_enabled: bool,
    pub max_retries: u32,
    pub retry_backoff_ms: u64,
    /// Strategy kinds to fall back to when semantic or structural
    /// selectors stop matching.
    pub fallback_kinds: Vec<StrategyKind>,
}

impl Default for DynamicElementPolicy {
    fn default() -> Self {
        Self {
            wait_timeout_ms: 10_000,
            require_attached: true,
            require_visible: true,
            require_enabled: true,
            max_retries: 3,
            retry_backoff_ms: 500,
            fallback_kinds: vec![StrategyKind::Attribute, StrategyKind::Xpath],
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kind_names_are_stable() {
        assert_eq!(StrategyKind::Attribute.name(), "attribute");
        assert_eq!(StrategyKind::AiEnhanced.name(), "ai_enhanced");
        assert_eq!(
            serde_json::to_value(StrategyKind::AiEnhanced).unwrap(),
            serde_json::json!("ai_enhanced")
        );
    }

    #[test]
    fn fallback_constructor_flags_both_bits() {
        let strategy = SelectorStrategy::fallback(StrategyKind::Xpath, "//button", 0.6);
        assert!(strategy.fallback);
        assert!(strategy.dynamic);
        assert!(!strategy.is_high_confidence());
    }

    #[test]
    fn dynamic_policy_defaults() {
        let policy = DynamicElementPolicy::default();
        assert_eq!(policy.wait_timeout_ms, 10_000);
        assert_eq!(policy.max_retries, 3);
        assert_eq!(policy.retry_backoff_ms, 500);
        assert!(policy.require_attached && policy.require_visible && policy.require_enabled);
    }
}
