//! Retry policy shared by the polling and recovery loops.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// How often, how fast and for how long a caller may retry an operation.
///
/// The defaults mirror the dynamic-element handling contract: a 10s wait
/// budget, three attempts, 500ms between them.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub backoff_ms: u64,
    pub timeout_ms: u64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            backoff_ms: 500,
            timeout_ms: 10_000,
        }
    }
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, backoff_ms: u64, timeout_ms: u64) -> Self {
        Self {
            max_attempts,
            backoff_ms,
            timeout_ms,
        }
    }

    pub fn backoff(&self) -> Duration {
        Duration::from_millis(self.backoff_ms)
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    /// True while `attempt` (zero based) is still within the policy.
    pub fn allows_attempt(&self, attempt: u32) -> bool {
        attempt < self.max_attempts
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_matches_dynamic_element_contract() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.max_attempts, 3);
        assert_eq!(policy.backoff(), Duration::from_millis(500));
        assert_eq!(policy.timeout(), Duration::from_secs(10));
    }

    #[test]
    fn attempt_window() {
        let policy = RetryPolicy::new(2, 100, 1_000);
        assert!(policy.allows_attempt(0));
        assert!(policy.allows_attempt(1));
        assert!(!policy.allows_attempt(2));
    }
}
