//! Full-engine flows over the scriptable transport.
//!
//! These tests wire the assembled [`BrowserEngine`] against the stub
//! transport and exercise the same call sequences a tool-invocation layer
//! would issue. No browser is involved.

use std::sync::Arc;

use serde_json::json;

use webhelm::{
    BrowserEngine, ConnectionId, EngineConfig, EngineError, NavigateOptions, StrategyKind,
    StubTransport,
};

fn engine_with_stub() -> (BrowserEngine, Arc<StubTransport>) {
    let stub = StubTransport::new();
    let mut config = EngineConfig::default();
    // keep the background ticker quiet during tests
    config.pool.health_check_interval_ms = 3_600_000;
    let engine = BrowserEngine::with_transport(config, stub.clone());
    (engine, stub)
}

fn page_tree() -> serde_json::Value {
    json!({ "root": {
        "nodeId": 1, "nodeType": 9, "nodeName": "#document", "children": [
            { "nodeId": 2, "nodeType": 1, "nodeName": "HTML", "children": [
                { "nodeId": 3, "nodeType": 1, "nodeName": "BODY", "children": [
                    { "nodeId": 4, "nodeType": 1, "nodeName": "DIV", "children": [] },
                    { "nodeId": 5, "nodeType": 1, "nodeName": "DIV", "children": [] },
                    { "nodeId": 7, "nodeType": 1, "nodeName": "BUTTON",
                      "attributes": ["id", "submit-btn", "type", "submit"],
                      "children": [
                        { "nodeId": 8, "nodeType": 3, "nodeName": "#text", "nodeValue": "Submit" }
                      ] }
                ] }
            ] }
        ]
    } })
}

#[tokio::test]
async fn session_lifecycle_cleans_up_everything() {
    let (engine, _stub) = engine_with_stub();
    let id = ConnectionId::new("tab-1");

    engine
        .create_session(id.clone(), Some("https://example.com/"), &NavigateOptions::default())
        .await
        .unwrap();

    let state = engine.page_state(&id).unwrap();
    assert_eq!(state.url, "https://example.com/");
    assert!(state.is_loaded);
    assert_eq!(state.history.entries(), ["https://example.com/"]);

    let sessions = engine.list_sessions();
    assert_eq!(sessions.len(), 1);
    assert_eq!(sessions[0].id, id);
    assert!(engine.session_health(&id).is_some());

    engine.close_session(&id).await;
    assert_eq!(engine.connection_count(), 0);
    assert!(engine.page_state(&id).is_none());
    assert!(engine.session_health(&id).is_none());
}

#[tokio::test]
async fn capacity_is_enforced_through_the_facade() {
    let stub = StubTransport::new();
    let mut config = EngineConfig::default();
    config.pool.health_check_interval_ms = 3_600_000;
    config.pool.max_connections = 2;
    let engine = BrowserEngine::with_transport(config, stub);

    for n in 0..2 {
        engine
            .create_session(ConnectionId::new(format!("tab-{n}")), None, &NavigateOptions::default())
            .await
            .unwrap();
    }

    let err = engine
        .create_session(ConnectionId::new("tab-overflow"), None, &NavigateOptions::default())
        .await
        .unwrap_err();
    assert!(matches!(err, EngineError::MaxConnectionsReached { limit: 2 }));
    assert_eq!(engine.connection_count(), 2);
}

#[tokio::test]
async fn dynamic_evaluation_never_reaches_the_page() {
    let (engine, stub) = engine_with_stub();
    let id = ConnectionId::new("tab-1");
    engine
        .create_session(id.clone(), None, &NavigateOptions::default())
        .await
        .unwrap();

    let err = engine
        .execute_script(&id, "eval('1+1')")
        .await
        .unwrap_err();
    assert!(matches!(err, EngineError::ScriptValidationFailed { .. }));

    for cmd in stub.sent() {
        if cmd.method == "Runtime.evaluate" {
            let expression = cmd.params["expression"].as_str().unwrap_or_default();
            assert!(!expression.contains("eval("));
        }
    }

    let history = engine.script_history(&id);
    assert_eq!(history.len(), 1);
    assert!(!history[0].success);
}

#[tokio::test]
async fn descriptions_resolve_to_the_best_scoring_element() {
    let (engine, stub) = engine_with_stub();
    let id = ConnectionId::new("tab-1");
    engine
        .create_session(id.clone(), None, &NavigateOptions::default())
        .await
        .unwrap();

    stub.respond(
        "DOM.getDocument",
        json!({ "root": {
            "nodeId": 1, "nodeType": 9, "nodeName": "#document", "children": [
                { "nodeId": 2, "nodeType": 1, "nodeName": "BODY", "children": [
                    { "nodeId": 3, "nodeType": 1, "nodeName": "DIV", "children": [] },
                    { "nodeId": 4, "nodeType": 1, "nodeName": "BUTTON",
                      "attributes": ["id", "login"],
                      "children": [
                        { "nodeId": 5, "nodeType": 3, "nodeName": "#text", "nodeValue": "Login" }
                      ] },
                    { "nodeId": 6, "nodeType": 1, "nodeName": "DIV", "children": [] }
                ] }
            ]
        } }),
    );

    let matched = engine
        .find_element(&id, "click the login button")
        .await
        .unwrap();
    assert_eq!(matched.node_id, 4);
    assert!(matched.confidence > 0.4);
    assert_eq!(matched.selector, "#login");
}

#[tokio::test]
async fn element_info_aggregates_shape_visibility_and_selectors() {
    let (engine, stub) = engine_with_stub();
    let id = ConnectionId::new("tab-1");
    engine
        .create_session(id.clone(), None, &NavigateOptions::default())
        .await
        .unwrap();

    // One tree for the selector query, one for strategy generation.
    stub.respond("DOM.getDocument", page_tree());
    stub.respond("DOM.getDocument", page_tree());
    stub.respond("DOM.querySelector", json!({ "nodeId": 7 }));
    stub.respond(
        "DOM.describeNode",
        json!({ "node": {
            "nodeId": 7, "nodeType": 1, "nodeName": "BUTTON",
            "attributes": ["id", "submit-btn", "type", "submit"]
        } }),
    );
    stub.respond(
        "CSS.getComputedStyleForNode",
        json!({ "computedStyle": [ { "name": "display", "value": "block" } ] }),
    );
    for _ in 0..2 {
        stub.respond(
            "DOM.getBoxModel",
            json!({ "model": { "border": [0.0, 0.0, 80.0, 0.0, 80.0, 30.0, 0.0, 30.0] } }),
        );
    }

    let info = engine.get_element_info(&id, "#submit-btn").await.unwrap();
    assert_eq!(info.node_id, 7);
    assert_eq!(info.tag, "button");
    assert!(info.visible);
    assert!(info.bounding_box.is_some());
    assert!(info
        .attributes
        .contains(&("id".to_string(), "submit-btn".to_string())));

    let first = &info.selectors[0];
    assert_eq!(first.kind, StrategyKind::Attribute);
    assert_eq!(first.selector, "#submit-btn");
    assert!((first.confidence - 0.98).abs() < 1e-9);
}

#[tokio::test]
async fn events_trace_the_whole_session() {
    let (engine, _stub) = engine_with_stub();
    let mut events = engine.subscribe();
    let id = ConnectionId::new("tab-1");

    engine
        .create_session(id.clone(), Some("https://example.com/"), &NavigateOptions::default())
        .await
        .unwrap();
    engine.execute_script(&id, "1 + 1").await.unwrap();
    engine.close_session(&id).await;

    let mut kinds = Vec::new();
    while let Ok(event) = events.try_recv() {
        kinds.push(event.kind());
    }
    assert_eq!(
        kinds,
        vec![
            "connection_created",
            "navigated",
            "script_executed",
            "connection_closed"
        ]
    );
}

#[tokio::test]
async fn event_stream_bridges_to_mpsc() {
    let (engine, _stub) = engine_with_stub();
    let mut stream = engine.event_stream(16);

    let id = ConnectionId::new("tab-1");
    engine
        .create_session(id.clone(), None, &NavigateOptions::default())
        .await
        .unwrap();

    let event = tokio::time::timeout(std::time::Duration::from_secs(1), stream.recv())
        .await
        .expect("event within deadline")
        .expect("stream open");
    assert_eq!(event.kind(), "connection_created");
}

#[tokio::test]
async fn missing_elements_surface_as_not_found() {
    let (engine, stub) = engine_with_stub();
    let id = ConnectionId::new("tab-1");
    engine
        .create_session(id.clone(), None, &NavigateOptions::default())
        .await
        .unwrap();

    stub.respond("DOM.getDocument", page_tree());
    stub.respond("DOM.querySelector", json!({ "nodeId": 0 }));

    let err = engine.get_element_info(&id, "#ghost").await.unwrap_err();
    assert!(matches!(err, EngineError::ElementNotFound(_)));
}
