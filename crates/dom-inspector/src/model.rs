//! Element tree model materialized from protocol payloads.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use webhelm_core_types::NodeId;

pub const ELEMENT_NODE: i64 = 1;
pub const TEXT_NODE: i64 = 3;
pub const DOCUMENT_NODE: i64 = 9;

/// One DOM node as reported by `DOM.getDocument` / `DOM.describeNode`,
/// optionally enriched with style, geometry and visibility lookups.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ElementNode {
    pub node_id: NodeId,
    pub backend_node_id: Option<i64>,
    pub node_type: i64,
    pub node_name: String,
    pub node_value: String,
    /// Attribute pairs in wire order.
    pub attributes: Vec<(String, String)>,
    pub child_count: u32,
    pub children: Option<Vec<ElementNode>>,
    pub computed_style: Option<HashMap<String, String>>,
    pub bounding_box: Option<BoundingBox>,
    pub visible: Option<bool>,
}

impl ElementNode {
    /// Parse one protocol `DOM.Node` payload, recursing into `children`.
    /// Returns `None` when the payload has no node id.
    pub fn from_protocol(value: &Value) -> Option<Self> {
        let node_id = value.get("nodeId").and_then(Value::as_i64)?;
        let attributes = value
            .get("attributes")
            .and_then(Value::as_array)
            .map(|flat| {
                flat.chunks(2)
                    .filter_map(|pair| match pair {
                        [name, val] => {
                            Some((name.as_str()?.to_string(), val.as_str()?.to_string()))
                        }
                        _ => None,
                    })
                    .collect()
            })
            .unwrap_or_default();
        let children = value
            .get("children")
            .and_then(Value::as_array)
            .map(|kids| kids.iter().filter_map(Self::from_protocol).collect());

        Some(Self {
            node_id,
            backend_node_id: value.get("backendNodeId").and_then(Value::as_i64),
            node_type: value.get("nodeType").and_then(Value::as_i64).unwrap_or(ELEMENT_NODE),
            node_name: value
                .get("nodeName")
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_string(),
            node_value: value
                .get("nodeValue")
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_string(),
            attributes,
            child_count: value
                .get("childNodeCount")
                .and_then(Value::as_u64)
                .unwrap_or(0) as u32,
            children,
            computed_style: None,
            bounding_box: None,
            visible: None,
        })
    }

    pub fn is_element(&self) -> bool {
        self.node_type == ELEMENT_NODE
    }

    /// Lower-cased tag name.
    pub fn tag(&self) -> String {
        self.node_name.to_ascii_lowercase()
    }

    pub fn attribute(&self, name: &str) -> Option<&str> {
        self.attributes
            .iter()
            .find(|(key, _)| key == name)
            .map(|(_, value)| value.as_str())
    }

    pub fn id(&self) -> Option<&str> {
        self.attribute("id").filter(|id| !id.is_empty())
    }

    pub fn classes(&self) -> Vec<&str> {
        self.attribute("class")
            .map(|list| list.split_whitespace().collect())
            .unwrap_or_default()
    }

    /// Text carried by direct child text nodes, trimmed and joined.
    pub fn text(&self) -> String {
        let mut parts = Vec::new();
        if let Some(children) = &self.children {
            for child in children {
                if child.node_type == TEXT_NODE {
                    let trimmed = child.node_value.trim();
                    if !trimmed.is_empty() {
                        parts.push(trimmed);
                    }
                }
            }
        }
        parts.join(" ")
    }
}

/// Axis-aligned box derived from the border quad of `DOM.getBoxModel`.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct BoundingBox {
    pub x: f64,
    pub y: f64,
    pub width: f64,
    pub height: f64,
}

impl BoundingBox {
    /// Build from a protocol quad `[x1,y1, x2,y2, x3,y3, x4,y4]`.
    pub fn from_quad(quad: &[f64]) -> Option<Self> {
        if quad.len() < 8 {
            return None;
        }
        let xs: Vec<f64> = quad.iter().step_by(2).copied().collect();
        let ys: Vec<f64> = quad.iter().skip(1).step_by(2).copied().collect();
        let min_x = xs.iter().copied().fold(f64::INFINITY, f64::min);
        let max_x = xs.iter().copied().fold(f64::NEG_INFINITY, f64::max);
        let min_y = ys.iter().copied().fold(f64::INFINITY, f64::min);
        let max_y = ys.iter().copied().fold(f64::NEG_INFINITY, f64::max);
        Some(Self {
            x: min_x,
            y: min_y,
            width: max_x - min_x,
            height: max_y - min_y,
        })
    }

    pub fn center(&self) -> (f64, f64) {
        (self.x + self.width / 2.0, self.y + self.height / 2.0)
    }
}

/// Filter for tree searches; unset criteria match everything, set
/// criteria must all hold.
#[derive(Clone, Debug, Default)]
pub struct SearchFilter {
    pub tag: Option<String>,
    pub id: Option<String>,
    pub class: Option<String>,
    pub text: Option<String>,
    pub attribute: Option<(String, String)>,
}

impl SearchFilter {
    pub fn with_tag(mut self, tag: impl Into<String>) -> Self {
        self.tag = Some(tag.into());
        self
    }

    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = Some(id.into());
        self
    }

    pub fn with_class(mut self, class: impl Into<String>) -> Self {
        self.class = Some(class.into());
        self
    }

    pub fn with_text(mut self, text: impl Into<String>) -> Self {
        self.text = Some(text.into());
        self
    }

    pub fn with_attribute(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.attribute = Some((name.into(), value.into()));
        self
    }

    pub fn matches(&self, node: &ElementNode) -> bool {
        if let Some(tag) = &self.tag {
            if !node.tag().eq_ignore_ascii_case(tag) {
                return false;
            }
        }
        if let Some(id) = &self.id {
            if node.id() != Some(id.as_str()) {
                return false;
            }
        }
        if let Some(class) = &self.class {
            if !node.classes().contains(&class.as_str()) {
                return false;
            }
        }
        if let Some(text) = &self.text {
            let haystack = node.text().to_lowercase();
            if !haystack.contains(&text.to_lowercase()) {
                return false;
            }
        }
        if let Some((name, value)) = &self.attribute {
            if node.attribute(name) != Some(value.as_str()) {
                return false;
            }
        }
        true
    }
}
