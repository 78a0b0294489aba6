//! The validated, timeout-bounded execution path.

use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::Utc;
use serde::Serialize;
use serde_json::{json, Value};
use tokio::sync::broadcast;
use tokio::time::timeout;
use tracing::{debug, warn};

use cdp_pool::SessionPool;
use webhelm_core_types::{ConnectionId, EngineError, EngineEvent, EngineResult};

use crate::history::{ExecutionHistory, ScriptRecord, DEFAULT_HISTORY_CAP};
use crate::validate::validate_script;

pub const DEFAULT_SCRIPT_TIMEOUT_MS: u64 = 30_000;

/// Per-call execution knobs.
#[derive(Debug, Clone)]
pub struct ExecuteOptions {
    /// Zero means the engine default.
    pub timeout_ms: u64,
    pub await_promise: bool,
    pub return_by_value: bool,
}

impl Default for ExecuteOptions {
    fn default() -> Self {
        Self {
            timeout_ms: DEFAULT_SCRIPT_TIMEOUT_MS,
            await_promise: true,
            return_by_value: true,
        }
    }
}

/// Page timing and heap snapshot; zeroed when the page cannot answer.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct PerformanceMetrics {
    pub dom_content_loaded_ms: u64,
    pub load_event_ms: u64,
    pub js_heap_used_bytes: u64,
    pub js_heap_total_bytes: u64,
}

const PERF_EXPRESSION: &str = r#"(() => {
  const nav = performance.getEntriesByType("navigation")[0] || {};
  const memory = performance.memory || {};
  return {
    domContentLoadedMs: Math.round(nav.domContentLoadedEventEnd || 0),
    loadEventMs: Math.round(nav.loadEventEnd || 0),
    jsHeapUsedBytes: memory.usedJSHeapSize || 0,
    jsHeapTotalBytes: memory.totalJSHeapSize || 0
  };
})()"#;

/// Executes scripts on pooled connections. Cloning shares the history
/// and the event sink.
#[derive(Clone)]
pub struct ScriptEngine {
    pool: SessionPool,
    history: Arc<ExecutionHistory>,
    events: broadcast::Sender<EngineEvent>,
    default_timeout_ms: u64,
}

impl ScriptEngine {
    pub fn new(pool: SessionPool, events: broadcast::Sender<EngineEvent>) -> Self {
        Self::with_history_capacity(pool, events, DEFAULT_HISTORY_CAP)
    }

    pub fn with_history_capacity(
        pool: SessionPool,
        events: broadcast::Sender<EngineEvent>,
        capacity: usize,
    ) -> Self {
        Self {
            pool,
            history: Arc::new(ExecutionHistory::new(capacity)),
            events,
            default_timeout_ms: DEFAULT_SCRIPT_TIMEOUT_MS,
        }
    }

    /// Validate and run one script on a connection.
    ///
    /// Fails fast when the connection is gone, fails its probe, or has
    /// no Runtime domain. A critical validation verdict aborts before
    /// any evaluation. The evaluation itself races a timer; the timer
    /// winning is `ScriptTimeout`, never a hang. Every outcome lands in
    /// the history.
    pub async fn execute_script(
        &self,
        id: &ConnectionId,
        script: &str,
        opts: &ExecuteOptions,
    ) -> EngineResult<ScriptRecord> {
        if self.pool.get_connection(id).is_none() {
            return Err(EngineError::ConnectionNotFound(id.clone()));
        }
        if !self.pool.validate_connection(id).await {
            return Err(EngineError::ConnectionUnhealthy(id.clone()));
        }
        if !self.pool.is_domain_enabled(id, "Runtime") {
            return Err(EngineError::DomainEnableFailed {
                domain: "Runtime".to_string(),
                reason: "domain is not enabled on this connection".to_string(),
            });
        }

        let verdict = validate_script(script);
        if !verdict.is_valid {
            let reason = verdict
                .reason
                .unwrap_or_else(|| "script validation failed".to_string());
            self.record(failure_record(id, &reason, 0));
            return Err(EngineError::ScriptValidationFailed { reason });
        }
        for warning in &verdict.warnings {
            warn!(
                target: "script-engine",
                connection = %id,
                risk = ?verdict.risk_level,
                warning,
                "script flagged"
            );
        }

        let timeout_ms = if opts.timeout_ms == 0 {
            self.default_timeout_ms
        } else {
            opts.timeout_ms
        };
        let started = Instant::now();
        let evaluation = self.pool.send_on_session(
            id,
            "Runtime.evaluate",
            json!({
                "expression": script,
                "returnByValue": opts.return_by_value,
                "awaitPromise": opts.await_promise,
                "userGesture": true,
            }),
        );

        let response = match timeout(Duration::from_millis(timeout_ms), evaluation).await {
            Err(_) => {
                let elapsed = started.elapsed().as_millis() as u64;
                self.record(failure_record(id, "script timed out", elapsed));
                return Err(EngineError::ScriptTimeout { timeout_ms });
            }
            Ok(Err(err)) => {
                let elapsed = started.elapsed().as_millis() as u64;
                self.record(failure_record(id, &err.to_string(), elapsed));
                return Err(err);
            }
            Ok(Ok(response)) => response,
        };

        let elapsed = started.elapsed().as_millis() as u64;
        if let Some(details) = response.get("exceptionDetails") {
            let text = details
                .pointer("/exception/description")
                .and_then(Value::as_str)
                .or_else(|| details.get("text").and_then(Value::as_str))
                .unwrap_or("script threw an exception")
                .to_string();
            self.record(failure_record(id, &text, elapsed));
            return Err(EngineError::provider(text));
        }

        let record = ScriptRecord {
            connection: id.clone(),
            success: true,
            result: Some(
                response
                    .pointer("/result/value")
                    .cloned()
                    .unwrap_or(Value::Null),
            ),
            error: None,
            execution_time_ms: elapsed,
            timestamp: Utc::now(),
        };
        self.record(record.clone());
        Ok(record)
    }

    /// Call a function declaration with JSON-encoded arguments. Builds
    /// an invocation expression and funnels through `execute_script`.
    pub async fn execute_function(
        &self,
        id: &ConnectionId,
        declaration: &str,
        args: &[Value],
    ) -> EngineResult<ScriptRecord> {
        let encoded: Vec<String> = args.iter().map(Value::to_string).collect();
        let expression = format!("({declaration})({})", encoded.join(", "));
        self.execute_script(id, &expression, &ExecuteOptions::default())
            .await
    }

    /// Run a statement body as an awaited async IIFE.
    pub async fn execute_async_script(
        &self,
        id: &ConnectionId,
        body: &str,
        opts: &ExecuteOptions,
    ) -> EngineResult<ScriptRecord> {
        let expression = format!("(async () => {{ {body} }})()");
        let opts = ExecuteOptions {
            await_promise: true,
            ..opts.clone()
        };
        self.execute_script(id, &expression, &opts).await
    }

    /// Best-effort page metrics; any failure yields zeroes.
    pub async fn get_performance_metrics(&self, id: &ConnectionId) -> PerformanceMetrics {
        let response = self
            .pool
            .send_on_session(
                id,
                "Runtime.evaluate",
                json!({ "expression": PERF_EXPRESSION, "returnByValue": true }),
            )
            .await;
        match response {
            Ok(value) => value
                .pointer("/result/value")
                .map(parse_metrics)
                .unwrap_or_default(),
            Err(err) => {
                debug!(target: "script-engine", connection = %id, %err, "performance probe failed");
                PerformanceMetrics::default()
            }
        }
    }

    pub fn history(&self, id: &ConnectionId) -> Vec<ScriptRecord> {
        self.history.for_connection(id)
    }

    pub fn recent(&self, id: &ConnectionId, n: usize) -> Vec<ScriptRecord> {
        self.history.recent(id, n)
    }

    pub fn global_history(&self) -> Vec<ScriptRecord> {
        self.history.all()
    }

    fn record(&self, record: ScriptRecord) {
        let _ = self.events.send(EngineEvent::ScriptExecuted {
            connection: record.connection.clone(),
            success: record.success,
            duration_ms: record.execution_time_ms,
        });
        self.history.record(record);
    }
}

fn failure_record(id: &ConnectionId, error: &str, elapsed_ms: u64) -> ScriptRecord {
    ScriptRecord {
        connection: id.clone(),
        success: false,
        result: None,
        error: Some(error.to_string()),
        execution_time_ms: elapsed_ms,
        timestamp: Utc::now(),
    }
}

fn parse_metrics(value: &Value) -> PerformanceMetrics {
    let field = |key: &str| value.get(key).and_then(Value::as_f64).unwrap_or(0.0) as u64;
    PerformanceMetrics {
        dom_content_loaded_ms: field("domContentLoadedMs"),
        load_event_ms: field("loadEventMs"),
        js_heap_used_bytes: field("jsHeapUsedBytes"),
        js_heap_total_bytes: field("jsHeapTotalBytes"),
    }
}
