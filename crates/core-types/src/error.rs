//! Engine-wide error taxonomy.

use thiserror::Error;

use crate::ConnectionId;

pub type EngineResult<T> = std::result::Result<T, EngineError>;

/// Errors surfaced by the engine components.
#[derive(Debug, Error, Clone)]
pub enum EngineError {
    /// No active connection exists under the requested id.
    #[error("connection not found: {0}")]
    ConnectionNotFound(ConnectionId),

    /// The connection exists but failed its liveness probe.
    #[error("connection unhealthy: {0}")]
    ConnectionUnhealthy(ConnectionId),

    /// A connection with this id is already pooled.
    #[error("connection already exists: {0}")]
    ConnectionExists(ConnectionId),

    /// The pool is at its configured capacity.
    #[error("connection limit reached ({limit})")]
    MaxConnectionsReached { limit: usize },

    /// A protocol domain could not be enabled during session setup.
    #[error("failed to enable domain {domain}: {reason}")]
    DomainEnableFailed { domain: String, reason: String },

    /// No element satisfied the selector or description.
    #[error("element not found: {0}")]
    ElementNotFound(String),

    /// Static script validation rejected the script outright.
    #[error("script rejected: {reason}")]
    ScriptValidationFailed { reason: String },

    /// Script evaluation exceeded its deadline.
    #[error("script timed out after {timeout_ms}ms")]
    ScriptTimeout { timeout_ms: u64 },

    /// Navigation did not reach a loaded document.
    #[error("navigation to {url} failed: {reason}")]
    NavigationFailed { url: String, reason: String },

    /// Back/forward request outside the recorded history range.
    #[error("history bounds exceeded: {0}")]
    HistoryBoundsExceeded(String),

    /// Transport or protocol level failure.
    #[error("provider error: {hint}")]
    Provider {
        code: Option<i64>,
        hint: String,
        retriable: bool,
    },

    /// Invariant violation inside the engine itself.
    #[error("internal error: {0}")]
    Internal(String),
}

impl EngineError {
    pub fn provider(hint: impl Into<String>) -> Self {
        Self::Provider {
            code: None,
            hint: hint.into(),
            retriable: false,
        }
    }

    pub fn provider_retriable(hint: impl Into<String>) -> Self {
        Self::Provider {
            code: None,
            hint: hint.into(),
            retriable: true,
        }
    }

    pub fn provider_coded(code: i64, hint: impl Into<String>) -> Self {
        Self::Provider {
            code: Some(code),
            hint: hint.into(),
            retriable: false,
        }
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal(message.into())
    }

    /// Whether a retry loop may reasonably attempt the operation again.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            EngineError::ElementNotFound(_)
                | EngineError::Provider {
                    retriable: true,
                    ..
                }
        )
    }

    /// Severity bucket (0=low, 1=medium, 2=high, 3=critical) for logging.
    pub fn severity(&self) -> u8 {
        match self {
            EngineError::Internal(_) => 3,
            EngineError::DomainEnableFailed { .. }
            | EngineError::NavigationFailed { .. }
            | EngineError::ScriptTimeout { .. }
            | EngineError::Provider { .. } => 2,
            EngineError::ConnectionUnhealthy(_)
            | EngineError::MaxConnectionsReached { .. }
            | EngineError::ScriptValidationFailed { .. } => 1,
            _ => 0,
        }
    }
}
