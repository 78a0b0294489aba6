//! Bounded execution history, one global ring plus one per connection.

use std::collections::VecDeque;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use parking_lot::Mutex;
use serde::Serialize;
use serde_json::Value;

use webhelm_core_types::ConnectionId;

pub const DEFAULT_HISTORY_CAP: usize = 1000;

/// One execution outcome, success or failure.
#[derive(Debug, Clone, Serialize)]
pub struct ScriptRecord {
    pub connection: ConnectionId,
    pub success: bool,
    pub result: Option<Value>,
    pub error: Option<String>,
    pub execution_time_ms: u64,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug)]
struct Ring<T> {
    cap: usize,
    items: VecDeque<T>,
}

impl<T: Clone> Ring<T> {
    fn new(cap: usize) -> Self {
        Self {
            cap: cap.max(1),
            items: VecDeque::new(),
        }
    }

    fn push(&mut self, item: T) {
        while self.items.len() >= self.cap {
            self.items.pop_front();
        }
        self.items.push_back(item);
    }

    fn to_vec(&self) -> Vec<T> {
        self.items.iter().cloned().collect()
    }

    fn tail(&self, n: usize) -> Vec<T> {
        let skip = self.items.len().saturating_sub(n);
        self.items.iter().skip(skip).cloned().collect()
    }

    fn len(&self) -> usize {
        self.items.len()
    }
}

/// Process-lifetime record of script executions. Records outlive the
/// connections that produced them.
pub struct ExecutionHistory {
    capacity: usize,
    global: Mutex<Ring<ScriptRecord>>,
    per_connection: DashMap<ConnectionId, Mutex<Ring<ScriptRecord>>>,
}

impl ExecutionHistory {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            global: Mutex::new(Ring::new(capacity)),
            per_connection: DashMap::new(),
        }
    }

    pub fn record(&self, record: ScriptRecord) {
        self.per_connection
            .entry(record.connection.clone())
            .or_insert_with(|| Mutex::new(Ring::new(self.capacity)))
            .lock()
            .push(record.clone());
        self.global.lock().push(record);
    }

    pub fn all(&self) -> Vec<ScriptRecord> {
        self.global.lock().to_vec()
    }

    pub fn for_connection(&self, id: &ConnectionId) -> Vec<ScriptRecord> {
        self.per_connection
            .get(id)
            .map(|ring| ring.lock().to_vec())
            .unwrap_or_default()
    }

    pub fn recent(&self, id: &ConnectionId, n: usize) -> Vec<ScriptRecord> {
        self.per_connection
            .get(id)
            .map(|ring| ring.lock().tail(n))
            .unwrap_or_default()
    }

    pub fn len(&self) -> usize {
        self.global.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(conn: &str, tag: i64) -> ScriptRecord {
        ScriptRecord {
            connection: ConnectionId::new(conn),
            success: true,
            result: Some(Value::from(tag)),
            error: None,
            execution_time_ms: 1,
            timestamp: Utc::now(),
        }
    }

    #[test]
    fn eviction_is_oldest_first() {
        let history = ExecutionHistory::new(3);
        for tag in 0..5 {
            history.record(record("tab-1", tag));
        }

        let all = history.all();
        assert_eq!(all.len(), 3);
        let tags: Vec<i64> = all
            .iter()
            .filter_map(|r| r.result.as_ref().and_then(Value::as_i64))
            .collect();
        assert_eq!(tags, vec![2, 3, 4]);
    }

    #[test]
    fn per_connection_rings_are_isolated() {
        let history = ExecutionHistory::new(10);
        history.record(record("tab-1", 1));
        history.record(record("tab-2", 2));
        history.record(record("tab-1", 3));

        assert_eq!(history.for_connection(&ConnectionId::new("tab-1")).len(), 2);
        assert_eq!(history.for_connection(&ConnectionId::new("tab-2")).len(), 1);
        assert_eq!(history.len(), 3);
    }

    #[test]
    fn recent_returns_the_tail() {
        let history = ExecutionHistory::new(10);
        let id = ConnectionId::new("tab-1");
        for tag in 0..4 {
            history.record(record("tab-1", tag));
        }

        let tail = history.recent(&id, 2);
        let tags: Vec<i64> = tail
            .iter()
            .filter_map(|r| r.result.as_ref().and_then(Value::as_i64))
            .collect();
        assert_eq!(tags, vec![2, 3]);
    }
}
