//! Element resolution that tolerates markup drift.
//!
//! Two entry points: a natural-language description is scored against
//! every element of the live document, or a concrete node is turned into
//! a ranked list of selector strategies with per-strategy confidence.

pub mod intent;
pub mod resolver;
pub mod scoring;
pub mod strategies;
pub mod types;

pub use intent::{parse_intent, ActionVerb, Intent, PreferredRole};
pub use resolver::SelectorResolver;
pub use scoring::{compute_score, element_role, ElementRole, MatchContext};
pub use strategies::generate_robust_selectors;
pub use types::{
    AlternativeMatch, DynamicElementPolicy, ElementMatch, SelectorStrategy, StrategyKind,
};
