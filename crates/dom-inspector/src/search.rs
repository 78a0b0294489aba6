//! Tree walks: filtered search and ancestor-path synthesis.
//!
//! Both walks are iterative with explicit stacks; page trees get deep
//! enough that recursion depth is not ours to spend.

use std::collections::HashMap;

use webhelm_core_types::NodeId;

use crate::model::{ElementNode, SearchFilter};

/// Depth-first search over a materialized tree, returning matching
/// element nodes in document order.
pub fn search_elements(root: &ElementNode, filter: &SearchFilter) -> Vec<ElementNode> {
    let mut matches = Vec::new();
    let mut stack = vec![root];
    while let Some(node) = stack.pop() {
        if node.is_element() && filter.matches(node) {
            matches.push(node.clone());
        }
        if let Some(children) = &node.children {
            for child in children.iter().rev() {
                stack.push(child);
            }
        }
    }
    matches
}

/// Selector for one path hop: `#id` when present, else tag plus the
/// first class, else the bare tag.
pub fn selector_hop(node: &ElementNode) -> String {
    if let Some(id) = node.id() {
        return format!("#{id}");
    }
    let tag = node.tag();
    match node.classes().first() {
        Some(class) => format!("{tag}.{class}"),
        None => tag,
    }
}

/// Root-first selector path from the document root down to `target`,
/// element hops only. Empty when the target is not in the tree.
pub fn ancestor_path(root: &ElementNode, target: NodeId) -> Vec<String> {
    let mut parents: HashMap<NodeId, NodeId> = HashMap::new();
    let mut index: HashMap<NodeId, &ElementNode> = HashMap::new();
    let mut stack = vec![root];
    while let Some(node) = stack.pop() {
        index.insert(node.node_id, node);
        if let Some(children) = &node.children {
            for child in children {
                parents.insert(child.node_id, node.node_id);
                stack.push(child);
            }
        }
    }

    if !index.contains_key(&target) {
        return Vec::new();
    }

    let mut hops = Vec::new();
    let mut cursor = Some(target);
    while let Some(id) = cursor {
        if let Some(node) = index.get(&id) {
            if node.is_element() {
                hops.push(selector_hop(node));
            }
        }
        cursor = parents.get(&id).copied();
    }
    hops.reverse();
    hops
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn sample_tree() -> ElementNode {
        ElementNode::from_protocol(&json!({
            "nodeId": 1,
            "nodeType": 9,
            "nodeName": "#document",
            "children": [{
                "nodeId": 2,
                "nodeType": 1,
                "nodeName": "HTML",
                "children": [{
                    "nodeId": 3,
                    "nodeType": 1,
                    "nodeName": "BODY",
                    "children": [
                        {
                            "nodeId": 4,
                            "nodeType": 1,
                            "nodeName": "DIV",
                            "attributes": ["id", "app"],
                            "children": [
                                {
                                    "nodeId": 5,
                                    "nodeType": 1,
                                    "nodeName": "BUTTON",
                                    "attributes": ["class", "primary wide"],
                                    "children": [{
                                        "nodeId": 6,
                                        "nodeType": 3,
                                        "nodeName": "#text",
                                        "nodeValue": "Login"
                                    }]
                                },
                                {
                                    "nodeId": 7,
                                    "nodeType": 1,
                                    "nodeName": "BUTTON",
                                    "attributes": ["class", "secondary"]
                                }
                            ]
                        }
                    ]
                }]
            }]
        }))
        .unwrap()
    }

    #[test]
    fn search_returns_matches_in_document_order() {
        let tree = sample_tree();
        let buttons = search_elements(&tree, &SearchFilter::default().with_tag("button"));
        assert_eq!(buttons.len(), 2);
        assert_eq!(buttons[0].node_id, 5);
        assert_eq!(buttons[1].node_id, 7);

        let by_text = search_elements(&tree, &SearchFilter::default().with_text("log"));
        assert_eq!(by_text.len(), 1);
        assert_eq!(by_text[0].node_id, 5);
    }

    #[test]
    fn ancestor_path_prefers_ids_and_runs_root_first() {
        let tree = sample_tree();
        let path = ancestor_path(&tree, 5);
        assert_eq!(path, vec!["html", "body", "#app", "button.primary"]);
    }

    #[test]
    fn ancestor_path_for_unknown_target_is_empty() {
        let tree = sample_tree();
        assert!(ancestor_path(&tree, 404).is_empty());
    }
}
