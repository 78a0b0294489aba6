//! Robust selector generation for a concrete element.

use std::collections::HashSet;

use dom_inspector::ElementNode;

use crate::types::{SelectorStrategy, StrategyKind};

/// Emit every selector the element's data supports, in priority order,
/// deduplicated by `(kind, selector)`.
///
/// `ancestors` is the root-first selector path for the element (its own
/// hop included), as produced by the inspector.
pub fn generate_robust_selectors(
    node: &ElementNode,
    ancestors: &[String],
) -> Vec<SelectorStrategy> {
    let mut strategies = Vec::new();

    if let Some(id) = node.id() {
        strategies.push(SelectorStrategy::new(
            StrategyKind::Attribute,
            format!("#{id}"),
            0.98,
        ));
    }

    if let Some(label) = node.attribute("aria-label").filter(|v| !v.is_empty()) {
        strategies.push(SelectorStrategy::new(
            StrategyKind::Semantic,
            format!("[aria-label=\"{label}\"]"),
            0.85,
        ));
    }

    for key in ["data-testid", "data-test-id"] {
        if let Some(value) = node.attribute(key).filter(|v| !v.is_empty()) {
            strategies.push(SelectorStrategy::new(
                StrategyKind::Attribute,
                format!("[{key}=\"{value}\"]"),
                0.95,
            ));
        }
    }

    let classes = node.classes();
    if !classes.is_empty() {
        let head: Vec<&str> = classes.iter().take(3).copied().collect();
        strategies.push(SelectorStrategy::fallback(
            StrategyKind::Attribute,
            format!(".{}", head.join(".")),
            0.7,
        ));
    }

    if !ancestors.is_empty() {
        strategies.push(SelectorStrategy::fallback(
            StrategyKind::Structural,
            ancestors.join(" > "),
            0.8,
        ));
    }

    strategies.push(SelectorStrategy::fallback(
        StrategyKind::Xpath,
        build_xpath(node, ancestors),
        0.6,
    ));

    if let Some(composite) = composite_selector(node) {
        strategies.push(SelectorStrategy::new(
            StrategyKind::AiEnhanced,
            composite,
            0.95,
        ));
    }

    dedupe(strategies)
}

/// XPath anchored at the nearest `#id` hop when one exists, otherwise an
/// absolute path of `/tag[contains(@class,...)]` segments.
fn build_xpath(node: &ElementNode, ancestors: &[String]) -> String {
    if ancestors.is_empty() {
        // detached node: best effort from the element alone
        return match node.classes().first() {
            Some(class) => format!("//{}[contains(@class,\"{class}\")]", node.tag()),
            None => format!("//{}", node.tag()),
        };
    }

    let anchor = ancestors.iter().rposition(|hop| hop.starts_with('#'));
    let (mut xpath, rest) = match anchor {
        Some(pos) => (
            format!("//*[@id=\"{}\"]", &ancestors[pos][1..]),
            &ancestors[pos + 1..],
        ),
        None => (String::new(), ancestors),
    };

    for hop in rest {
        let (tag, class) = split_hop(hop);
        match class {
            Some(class) => xpath.push_str(&format!("/{tag}[contains(@class,\"{class}\")]")),
            None => xpath.push_str(&format!("/{tag}")),
        }
    }
    xpath
}

/// Split a `tag.class` path hop; `#id` hops never reach here.
fn split_hop(hop: &str) -> (&str, Option<&str>) {
    match hop.split_once('.') {
        Some((tag, class)) => (tag, Some(class)),
        None => (hop, None),
    }
}

/// Composite selector from tag plus role/name/type predicates; `None`
/// when the element carries none of them.
fn composite_selector(node: &ElementNode) -> Option<String> {
    if !node.is_element() {
        return None;
    }
    let mut selector = node.tag();
    let mut predicates = 0;
    for key in ["role", "name", "type"] {
        if let Some(value) = node.attribute(key).filter(|v| !v.is_empty()) {
            selector.push_str(&format!("[{key}=\"{value}\"]"));
            predicates += 1;
        }
    }
    (predicates > 0).then_some(selector)
}

fn dedupe(strategies: Vec<SelectorStrategy>) -> Vec<SelectorStrategy> {
    let mut seen = HashSet::new();
    strategies
        .into_iter()
        .filter(|s| seen.insert((s.kind, s.selector.clone())))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn node(payload: serde_json::Value) -> ElementNode {
        ElementNode::from_protocol(&payload).unwrap()
    }

    #[test]
    fn bare_id_element_leads_with_the_id_selector() {
        let button = node(json!({
            "nodeId": 1, "nodeType": 1, "nodeName": "BUTTON",
            "attributes": ["id", "submit-btn"]
        }));
        let strategies = generate_robust_selectors(&button, &["#submit-btn".to_string()]);

        let first = &strategies[0];
        assert_eq!(first.kind, StrategyKind::Attribute);
        assert_eq!(first.selector, "#submit-btn");
        assert_eq!(first.confidence, 0.98);
    }

    #[test]
    fn id_always_yields_a_high_confidence_attribute_selector() {
        let input = node(json!({
            "nodeId": 1, "nodeType": 1, "nodeName": "INPUT",
            "attributes": ["id", "email", "class", "field wide", "type", "email"]
        }));
        let strategies = generate_robust_selectors(&input, &[]);
        assert!(strategies
            .iter()
            .any(|s| s.kind == StrategyKind::Attribute && s.confidence >= 0.95));
    }

    #[test]
    fn no_duplicate_kind_selector_pairs() {
        let rich = node(json!({
            "nodeId": 1, "nodeType": 1, "nodeName": "BUTTON",
            "attributes": [
                "id", "save",
                "aria-label", "Save changes",
                "data-testid", "save",
                "data-test-id", "save",
                "class", "btn btn-primary save extra",
                "role", "button",
                "type", "submit",
                "name", "save"
            ]
        }));
        let path = vec!["#root".to_string(), "button.btn".to_string()];
        let strategies = generate_robust_selectors(&rich, &path);

        let mut seen = HashSet::new();
        for strategy in &strategies {
            assert!(
                seen.insert((strategy.kind, strategy.selector.clone())),
                "duplicate pair: {:?} {}",
                strategy.kind,
                strategy.selector
            );
        }
    }

    #[test]
    fn class_selector_uses_at_most_three_classes() {
        let busy = node(json!({
            "nodeId": 1, "nodeType": 1, "nodeName": "DIV",
            "attributes": ["class", "a b c d e"]
        }));
        let strategies = generate_robust_selectors(&busy, &[]);
        let class_strategy = strategies
            .iter()
            .find(|s| s.selector.starts_with('.'))
            .unwrap();
        assert_eq!(class_strategy.selector, ".a.b.c");
        assert!(class_strategy.fallback && class_strategy.dynamic);
        assert_eq!(class_strategy.confidence, 0.7);
    }

    #[test]
    fn xpath_anchors_at_the_nearest_id() {
        let leaf = node(json!({
            "nodeId": 5, "nodeType": 1, "nodeName": "SPAN",
            "attributes": ["class", "price"]
        }));
        let path = vec![
            "html".to_string(),
            "body".to_string(),
            "#cart".to_string(),
            "div.row".to_string(),
            "span.price".to_string(),
        ];
        let strategies = generate_robust_selectors(&leaf, &path);
        let xpath = strategies
            .iter()
            .find(|s| s.kind == StrategyKind::Xpath)
            .unwrap();
        assert_eq!(
            xpath.selector,
            "//*[@id=\"cart\"]/div[contains(@class,\"row\")]/span[contains(@class,\"price\")]"
        );
        assert_eq!(xpath.confidence, 0.6);
    }

    #[test]
    fn xpath_without_id_anchor_is_an_absolute_path() {
        let leaf = node(json!({
            "nodeId": 3, "nodeType": 1, "nodeName": "EM"
        }));
        let path = vec!["html".to_string(), "body".to_string(), "em".to_string()];
        let strategies = generate_robust_selectors(&leaf, &path);
        let xpath = strategies
            .iter()
            .find(|s| s.kind == StrategyKind::Xpath)
            .unwrap();
        assert_eq!(xpath.selector, "/html/body/em");
    }

    #[test]
    fn composite_selector_combines_tag_and_predicates() {
        let input = node(json!({
            "nodeId": 1, "nodeType": 1, "nodeName": "INPUT",
            "attributes": ["type", "email", "name", "email"]
        }));
        let strategies = generate_robust_selectors(&input, &[]);
        let composite = strategies
            .iter()
            .find(|s| s.kind == StrategyKind::AiEnhanced)
            .unwrap();
        assert_eq!(composite.selector, "input[name=\"email\"][type=\"email\"]");
        assert_eq!(composite.confidence, 0.95);
    }
}
