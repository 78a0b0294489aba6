//! Static risk classification of scripts.

use serde::Serialize;

/// Risk buckets in escalation order; a scan only ever moves risk up.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum RiskLevel {
    Low,
    Medium,
    High,
    Critical,
}

/// Verdict of one scan.
#[derive(Debug, Clone, Serialize)]
pub struct ScriptValidation {
    pub is_valid: bool,
    pub reason: Option<String>,
    pub risk_level: RiskLevel,
    pub warnings: Vec<String>,
}

struct RiskPattern {
    needle: &'static str,
    risk: RiskLevel,
    label: &'static str,
}

/// Fixed scan order: critical patterns first, then descending severity.
const RISK_PATTERNS: &[RiskPattern] = &[
    RiskPattern {
        needle: "eval(",
        risk: RiskLevel::Critical,
        label: "dynamic code evaluation via eval()",
    },
    RiskPattern {
        needle: "new Function",
        risk: RiskLevel::Critical,
        label: "dynamic code evaluation via the Function constructor",
    },
    RiskPattern {
        needle: "window.location",
        risk: RiskLevel::High,
        label: "navigation rewrite through window.location",
    },
    RiskPattern {
        needle: "document.location",
        risk: RiskLevel::High,
        label: "navigation rewrite through document.location",
    },
    RiskPattern {
        needle: "fetch(",
        risk: RiskLevel::High,
        label: "network request via fetch()",
    },
    RiskPattern {
        needle: "XMLHttpRequest",
        risk: RiskLevel::High,
        label: "network request via XMLHttpRequest",
    },
    RiskPattern {
        needle: "setTimeout",
        risk: RiskLevel::Medium,
        label: "timer scheduling via setTimeout",
    },
    RiskPattern {
        needle: "setInterval",
        risk: RiskLevel::Medium,
        label: "timer scheduling via setInterval",
    },
    RiskPattern {
        needle: "localStorage",
        risk: RiskLevel::Medium,
        label: "storage access via localStorage",
    },
    RiskPattern {
        needle: "sessionStorage",
        risk: RiskLevel::Medium,
        label: "storage access via sessionStorage",
    },
    RiskPattern {
        needle: "document.cookie",
        risk: RiskLevel::Medium,
        label: "cookie access via document.cookie",
    },
];

const MAX_UNFLAGGED_LEN: usize = 10_000;

/// Scan a script against the pattern table. The first critical hit
/// invalidates the script and stops the scan; everything else only
/// escalates risk and accumulates warnings.
pub fn validate_script(script: &str) -> ScriptValidation {
    let mut risk = RiskLevel::Low;
    let mut warnings = Vec::new();

    for pattern in RISK_PATTERNS {
        if !script.contains(pattern.needle) {
            continue;
        }
        if pattern.risk == RiskLevel::Critical {
            return ScriptValidation {
                is_valid: false,
                reason: Some(format!("{} is not allowed", pattern.label)),
                risk_level: RiskLevel::Critical,
                warnings,
            };
        }
        if pattern.risk > risk {
            risk = pattern.risk;
        }
        warnings.push(pattern.label.to_string());
    }

    if script.len() > MAX_UNFLAGGED_LEN {
        warnings.push(format!(
            "script length {} exceeds {} characters",
            script.len(),
            MAX_UNFLAGGED_LEN
        ));
        if risk < RiskLevel::Medium {
            risk = RiskLevel::Medium;
        }
    }

    ScriptValidation {
        is_valid: true,
        reason: None,
        risk_level: risk,
        warnings,
    }
}
