//! Session records tracked by the pool.

use std::collections::HashMap;
use std::time::Instant;

use webhelm_core_types::ConnectionId;

/// Liveness bookkeeping for one pooled connection.
#[derive(Clone, Debug)]
pub(crate) struct Health {
    pub is_healthy: bool,
    pub last_check: Instant,
    pub error_count: u32,
    pub domain_status: HashMap<String, bool>,
}

impl Health {
    pub(crate) fn new() -> Self {
        Self {
            is_healthy: true,
            last_check: Instant::now(),
            error_count: 0,
            domain_status: HashMap::new(),
        }
    }

    /// A successful probe is the only thing that resets the failure streak.
    pub(crate) fn record_success(&mut self) {
        self.error_count = 0;
        self.is_healthy = true;
        self.last_check = Instant::now();
    }

    /// Returns the new consecutive failure count.
    pub(crate) fn record_failure(&mut self) -> u32 {
        self.error_count += 1;
        self.is_healthy = false;
        self.last_check = Instant::now();
        self.error_count
    }
}

/// One pooled browser connection: a page target plus its flat protocol session.
#[derive(Debug)]
pub(crate) struct Session {
    pub id: ConnectionId,
    pub target_id: String,
    pub protocol_session: String,
    pub active: bool,
    pub created_at: Instant,
    pub last_activity: Instant,
    pub enabled_domains: Vec<String>,
    pub health: Health,
}

impl Session {
    pub(crate) fn new(
        id: ConnectionId,
        target_id: String,
        protocol_session: String,
        enabled_domains: Vec<String>,
    ) -> Self {
        let now = Instant::now();
        let mut health = Health::new();
        for domain in &enabled_domains {
            health.domain_status.insert(domain.clone(), true);
        }
        Self {
            id,
            target_id,
            protocol_session,
            active: true,
            created_at: now,
            last_activity: now,
            enabled_domains,
            health,
        }
    }

    pub(crate) fn touch(&mut self) {
        self.last_activity = Instant::now();
    }

    pub(crate) fn domain_enabled(&self, domain: &str) -> bool {
        self.health
            .domain_status
            .get(domain)
            .copied()
            .unwrap_or(false)
    }

    pub(crate) fn info(&self) -> SessionInfo {
        SessionInfo {
            id: self.id.clone(),
            target_id: self.target_id.clone(),
            protocol_session: self.protocol_session.clone(),
            active: self.active,
            created_at: self.created_at,
            last_activity: self.last_activity,
            enabled_domains: self.enabled_domains.clone(),
        }
    }

    pub(crate) fn health_snapshot(&self) -> HealthSnapshot {
        HealthSnapshot {
            is_healthy: self.health.is_healthy,
            error_count: self.health.error_count,
            last_check: self.health.last_check,
            domain_status: self.health.domain_status.clone(),
        }
    }
}

/// Caller-facing snapshot of a pooled session.
#[derive(Clone, Debug)]
pub struct SessionInfo {
    pub id: ConnectionId,
    pub target_id: String,
    pub protocol_session: String,
    pub active: bool,
    pub created_at: Instant,
    pub last_activity: Instant,
    pub enabled_domains: Vec<String>,
}

/// Caller-facing snapshot of a session's health record.
#[derive(Clone, Debug)]
pub struct HealthSnapshot {
    pub is_healthy: bool,
    pub error_count: u32,
    pub last_check: Instant,
    pub domain_status: HashMap<String, bool>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn failure_streak_resets_only_on_success() {
        let mut health = Health::new();
        assert_eq!(health.record_failure(), 1);
        assert_eq!(health.record_failure(), 2);
        assert!(!health.is_healthy);

        health.record_success();
        assert_eq!(health.error_count, 0);
        assert!(health.is_healthy);

        assert_eq!(health.record_failure(), 1);
    }

    #[test]
    fn new_session_marks_domains_enabled() {
        let session = Session::new(
            ConnectionId::new("tab-1"),
            "target-1".into(),
            "session-1".into(),
            vec!["Page".into(), "Runtime".into()],
        );
        assert!(session.active);
        assert!(session.domain_enabled("Page"));
        assert!(session.domain_enabled("Runtime"));
        assert!(!session.domain_enabled("Network"));
    }
}
