//! Linear weighted scoring of elements against an intent.
//!
//! The weights are behavioral constants tuned against real pages; tests
//! pin them, do not adjust them in isolation.

use dom_inspector::ElementNode;

use crate::intent::{Intent, PreferredRole};

const ROLE_BUTTON_WEIGHT: f64 = 0.4;
const ROLE_INPUT_WEIGHT: f64 = 0.35;
const ROLE_LINK_WEIGHT: f64 = 0.3;
const KEYWORD_LONG_WEIGHT: f64 = 0.08;
const KEYWORD_SHORT_WEIGHT: f64 = 0.04;
const VISIBLE_WEIGHT: f64 = 0.1;
const CONTEXT_ROLE_WEIGHT: f64 = 0.1;
const CONTEXT_ATTRIBUTE_WEIGHT: f64 = 0.05;

/// Interaction role derived from tag and attributes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ElementRole {
    Button,
    Input,
    Link,
}

impl ElementRole {
    pub fn name(&self) -> &'static str {
        match self {
            ElementRole::Button => "button",
            ElementRole::Input => "input",
            ElementRole::Link => "link",
        }
    }
}

/// Extra hints supplied by the caller alongside the description.
#[derive(Debug, Clone, Default)]
pub struct MatchContext {
    pub role: Option<String>,
    pub attributes: Vec<(String, String)>,
}

pub fn element_role(node: &ElementNode) -> Option<ElementRole> {
    let tag = node.tag();
    let role_attr = node.attribute("role").unwrap_or_default();
    if tag == "button"
        || role_attr == "button"
        || (tag == "input"
            && matches!(node.attribute("type"), Some("submit") | Some("button")))
    {
        return Some(ElementRole::Button);
    }
    if tag == "a" || role_attr == "link" {
        return Some(ElementRole::Link);
    }
    if tag == "input" || tag == "textarea" || tag == "select" || role_attr == "textbox" {
        return Some(ElementRole::Input);
    }
    None
}

/// Score one element against an intent, clamped to 1.0.
pub fn compute_score(node: &ElementNode, intent: &Intent, context: &MatchContext) -> f64 {
    let mut score = 0.0;
    let role = element_role(node);

    match (intent.preferred_role, role) {
        (Some(PreferredRole::Button), Some(ElementRole::Button)) => score += ROLE_BUTTON_WEIGHT,
        (Some(PreferredRole::Input), Some(ElementRole::Input)) => score += ROLE_INPUT_WEIGHT,
        (Some(PreferredRole::Link), Some(ElementRole::Link)) => score += ROLE_LINK_WEIGHT,
        _ => {}
    }

    let haystack = attribute_haystack(node);
    for keyword in &intent.keywords {
        if haystack.contains(keyword.as_str()) {
            score += if keyword.len() >= 4 {
                KEYWORD_LONG_WEIGHT
            } else {
                KEYWORD_SHORT_WEIGHT
            };
        }
    }

    if node.visible == Some(true) {
        score += VISIBLE_WEIGHT;
    }

    if let Some(wanted) = context.role.as_deref() {
        let wanted = wanted.to_lowercase();
        let derived = role.map(|role| role.name());
        if node.attribute("role") == Some(wanted.as_str()) || derived == Some(wanted.as_str()) {
            score += CONTEXT_ROLE_WEIGHT;
        }
    }

    for (name, value) in &context.attributes {
        if node.attribute(name) == Some(value.as_str()) {
            score += CONTEXT_ATTRIBUTE_WEIGHT;
        }
    }

    score.min(1.0)
}

/// Concatenation of the identifying attributes keywords match against.
fn attribute_haystack(node: &ElementNode) -> String {
    let mut parts = Vec::new();
    for key in ["aria-label", "name", "id", "class"] {
        if let Some(value) = node.attribute(key) {
            parts.push(value.to_lowercase());
        }
    }
    parts.join(" ")
}
