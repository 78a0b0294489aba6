//! Natural-language description parsing.

/// Action the caller wants to perform, when one is recognizable.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ActionVerb {
    Click,
    Fill,
    Select,
}

/// Element role the description points at.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PreferredRole {
    Button,
    Link,
    Input,
}

/// Parsed description: verb, keyword set and preferred role.
#[derive(Debug, Clone)]
pub struct Intent {
    pub verb: Option<ActionVerb>,
    pub keywords: Vec<String>,
    pub preferred_role: Option<PreferredRole>,
}

const STOPWORDS: &[&str] = &["the", "and", "for", "with", "into", "from", "that", "then"];

/// Parse a free-form description like "click the login button".
pub fn parse_intent(description: &str) -> Intent {
    let lower = description.to_lowercase();

    let verb = if lower.contains("click") || lower.contains("press") {
        Some(ActionVerb::Click)
    } else if lower.contains("fill") || lower.contains("type") {
        Some(ActionVerb::Fill)
    } else if lower.contains("select") {
        Some(ActionVerb::Select)
    } else {
        None
    };

    let mut keywords: Vec<String> = Vec::new();
    for token in lower.split(|c: char| !c.is_alphanumeric()) {
        if token.len() < 3 || STOPWORDS.contains(&token) {
            continue;
        }
        if !keywords.iter().any(|k| k == token) {
            keywords.push(token.to_string());
        }
    }

    let preferred_role = if lower.contains("button") {
        Some(PreferredRole::Button)
    } else if lower.contains("link") {
        Some(PreferredRole::Link)
    } else if lower.contains("input") || lower.contains("field") || lower.contains("textbox") {
        Some(PreferredRole::Input)
    } else {
        None
    };

    Intent {
        verb,
        keywords,
        preferred_role,
    }
}
