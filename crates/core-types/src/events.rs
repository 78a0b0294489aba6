//! Typed notification payloads published by the engine components.
//!
//! Delivery is fire-and-forget over a broadcast channel: live subscribers see
//! every event at least once, emitters never block, and a lagging subscriber
//! loses the oldest events rather than stalling the engine.

use serde::{Deserialize, Serialize};

use crate::{ConnectionId, NodeId};

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum EngineEvent {
    ConnectionCreated {
        connection: ConnectionId,
    },
    ConnectionClosed {
        connection: ConnectionId,
    },
    ConnectionFailed {
        connection: ConnectionId,
        reason: String,
    },
    ElementMatched {
        connection: ConnectionId,
        node_id: NodeId,
        selector: String,
        confidence: f64,
    },
    ScriptExecuted {
        connection: ConnectionId,
        success: bool,
        duration_ms: u64,
    },
    Navigated {
        connection: ConnectionId,
        url: String,
    },
}

impl EngineEvent {
    pub fn connection(&self) -> &ConnectionId {
        match self {
            EngineEvent::ConnectionCreated { connection }
            | EngineEvent::ConnectionClosed { connection }
            | EngineEvent::ConnectionFailed { connection, .. }
            | EngineEvent::ElementMatched { connection, .. }
            | EngineEvent::ScriptExecuted { connection, .. }
            | EngineEvent::Navigated { connection, .. } => connection,
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            EngineEvent::ConnectionCreated { .. } => "connection_created",
            EngineEvent::ConnectionClosed { .. } => "connection_closed",
            EngineEvent::ConnectionFailed { .. } => "connection_failed",
            EngineEvent::ElementMatched { .. } => "element_matched",
            EngineEvent::ScriptExecuted { .. } => "script_executed",
            EngineEvent::Navigated { .. } => "navigated",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn events_carry_their_connection() {
        let id = ConnectionId::new("tab-1");
        let event = EngineEvent::Navigated {
            connection: id.clone(),
            url: "https://example.com".into(),
        };
        assert_eq!(event.connection(), &id);
        assert_eq!(event.kind(), "navigated");
    }

    #[test]
    fn events_serialize_with_tag() {
        let event = EngineEvent::ConnectionCreated {
            connection: ConnectionId::new("tab-1"),
        };
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["event"], "connection_created");
    }
}
