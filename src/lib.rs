//! Webhelm: pooled Chrome DevTools automation.
//!
//! The workspace splits into focused crates; this library assembles them
//! into one [`BrowserEngine`] and re-exports the types callers interact
//! with.

pub mod engine;

pub use engine::{BrowserEngine, ElementInfo, EngineConfig};

// Re-export the component surfaces callers commonly reach for.
pub use cdp_pool::{
    BrowserTransport, CommandOutcome, CreateOptions, PoolConfig, SessionInfo, SessionPool,
    StubTransport,
};
pub use dom_inspector::{BoundingBox, DomInspector, ElementNode, SearchFilter};
pub use element_resolver::{ElementMatch, SelectorResolver, SelectorStrategy, StrategyKind};
pub use interaction_flow::{
    InteractionController, NavigateOptions, PageState, Viewport, WaitOptions,
};
pub use script_engine::{
    ExecuteOptions, PerformanceMetrics, RiskLevel, ScriptEngine, ScriptRecord, ScriptValidation,
};
pub use webhelm_core_types::{
    ConnectionId, EngineError, EngineEvent, EngineResult, NodeId, RetryPolicy,
};
