//! Shared primitives for the webhelm engine crates.
//!
//! Everything here is deliberately small: identifiers, the engine-wide error
//! taxonomy, the retry policy value object and the typed event payloads that
//! flow over the notification bus.

use std::fmt;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

pub mod error;
pub mod events;
pub mod retry;

pub use error::{EngineError, EngineResult};
pub use events::EngineEvent;
pub use retry::RetryPolicy;

/// Caller-facing identifier of a pooled browser connection.
///
/// Ids are plain strings so callers can supply stable names of their own;
/// [`ConnectionId::generate`] mints a random one when they do not care.
#[derive(Clone, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
pub struct ConnectionId(pub String);

impl ConnectionId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn generate() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ConnectionId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

impl From<String> for ConnectionId {
    fn from(value: String) -> Self {
        Self(value)
    }
}

/// Protocol-level DOM node identifier (session scoped).
pub type NodeId = i64;
