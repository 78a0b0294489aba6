//! Script execution with risk classification, timeouts and history.
//!
//! Every script goes through the same path: connection gate, pattern
//! scan, timeout-raced evaluation, history append. The convenience
//! wrappers only construct expressions; none of them skip validation.

pub mod executor;
pub mod history;
pub mod validate;

pub use executor::{
    ExecuteOptions, PerformanceMetrics, ScriptEngine, DEFAULT_SCRIPT_TIMEOUT_MS,
};
pub use history::{ExecutionHistory, ScriptRecord, DEFAULT_HISTORY_CAP};
pub use validate::{validate_script, RiskLevel, ScriptValidation};
