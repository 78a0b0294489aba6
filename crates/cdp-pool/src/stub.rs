//! Scriptable in-memory transport.
//!
//! Drives the test suites across the workspace and doubles as a dry-run
//! transport. Every issued command is recorded; responses come from
//! per-method scripted queues, falling back to protocol-shaped defaults so
//! the session handshake and liveness probes succeed without scripting.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::{json, Value};
use tokio::sync::mpsc;

use webhelm_core_types::EngineError;

use crate::transport::{BrowserTransport, CommandTarget, TransportEvent};

/// A command the stub has seen, in issue order.
#[derive(Clone, Debug)]
pub struct RecordedCommand {
    pub target: CommandTarget,
    pub method: String,
    pub params: Value,
}

#[derive(Clone, Debug)]
enum StubReply {
    Value(Value),
    Error(EngineError),
    /// Never respond; the caller's own deadline has to fire.
    Hang,
}

pub struct StubTransport {
    scripted: Mutex<HashMap<String, VecDeque<StubReply>>>,
    log: Mutex<Vec<RecordedCommand>>,
    events_tx: mpsc::Sender<TransportEvent>,
    events_rx: tokio::sync::Mutex<mpsc::Receiver<TransportEvent>>,
    counter: AtomicU64,
    fail_all: AtomicBool,
}

impl StubTransport {
    pub fn new() -> Arc<Self> {
        let (events_tx, events_rx) = mpsc::channel(64);
        Arc::new(Self {
            scripted: Mutex::new(HashMap::new()),
            log: Mutex::new(Vec::new()),
            events_tx,
            events_rx: tokio::sync::Mutex::new(events_rx),
            counter: AtomicU64::new(0),
            fail_all: AtomicBool::new(false),
        })
    }

    /// Queue a scripted response for the next call of `method`.
    pub fn respond(&self, method: &str, value: Value) {
        self.scripted
            .lock()
            .entry(method.to_string())
            .or_default()
            .push_back(StubReply::Value(value));
    }

    /// Queue a scripted failure for the next call of `method`.
    pub fn respond_err(&self, method: &str, err: EngineError) {
        self.scripted
            .lock()
            .entry(method.to_string())
            .or_default()
            .push_back(StubReply::Error(err));
    }

    /// Queue a call of `method` that never completes.
    pub fn hang(&self, method: &str) {
        self.scripted
            .lock()
            .entry(method.to_string())
            .or_default()
            .push_back(StubReply::Hang);
    }

    /// When set, every command fails with a retriable provider error.
    pub fn fail_all(&self, on: bool) {
        self.fail_all.store(on, Ordering::Relaxed);
    }

    /// Inject a protocol event into the pool's event pump.
    pub async fn emit(&self, event: TransportEvent) {
        let _ = self.events_tx.send(event).await;
    }

    pub fn sent(&self) -> Vec<RecordedCommand> {
        self.log.lock().clone()
    }

    pub fn sent_methods(&self) -> Vec<String> {
        self.log.lock().iter().map(|c| c.method.clone()).collect()
    }

    fn default_reply(&self, method: &str, params: &Value) -> Result<Value, EngineError> {
        let n = self.counter.fetch_add(1, Ordering::Relaxed);
        match method {
            "Target.createTarget" => Ok(json!({ "targetId": format!("stub-target-{n}") })),
            "Target.attachToTarget" => Ok(json!({ "sessionId": format!("stub-session-{n}") })),
            "Target.closeTarget" => Ok(json!({ "success": true })),
            "Target.setDiscoverTargets" => Ok(json!({})),
            "Browser.getVersion" => Ok(json!({
                "product": "Chrome/Stub",
                "protocolVersion": "1.3",
            })),
            "Runtime.evaluate" => {
                let expression = params
                    .get("expression")
                    .and_then(Value::as_str)
                    .unwrap_or_default();
                if expression.contains("document.readyState") {
                    Ok(json!({ "result": { "type": "string", "value": "complete" } }))
                } else {
                    Ok(json!({ "result": { "type": "number", "value": 2, "description": "2" } }))
                }
            }
            "Page.navigate" => Ok(json!({
                "frameId": format!("stub-frame-{n}"),
                "loaderId": format!("stub-loader-{n}"),
            })),
            m if m.ends_with(".enable") || m.ends_with(".disable") => Ok(json!({})),
            _ => Err(EngineError::provider(format!(
                "stub transport has no scripted response for {method}"
            ))),
        }
    }
}

#[async_trait]
impl BrowserTransport for StubTransport {
    async fn start(&self) -> Result<(), EngineError> {
        Ok(())
    }

    async fn next_event(&self) -> Option<TransportEvent> {
        let mut guard = self.events_rx.lock().await;
        guard.recv().await
    }

    async fn send_command(
        &self,
        target: CommandTarget,
        method: &str,
        params: Value,
    ) -> Result<Value, EngineError> {
        self.log.lock().push(RecordedCommand {
            target,
            method: method.to_string(),
            params: params.clone(),
        });

        if self.fail_all.load(Ordering::Relaxed) {
            return Err(EngineError::provider_retriable(
                "stub transport failing on request",
            ));
        }

        let scripted = {
            let mut guard = self.scripted.lock();
            guard.get_mut(method).and_then(VecDeque::pop_front)
        };

        match scripted {
            Some(StubReply::Value(value)) => Ok(value),
            Some(StubReply::Error(err)) => Err(err),
            Some(StubReply::Hang) => {
                futures::future::pending::<()>().await;
                unreachable!("pending future resolved")
            }
            None => self.default_reply(method, &params),
        }
    }
}
