//! Command and lifecycle counters for the pool.
//!
//! Two layers kept in step at every recording point: process-wide atomics
//! backing [`snapshot`] for tests and the CLI, and prometheus collectors
//! for scrape-based export.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use lazy_static::lazy_static;
use prometheus::{
    core::Collector, histogram_opts, HistogramVec, IntCounter, IntCounterVec, IntGauge, Registry,
};
use tracing::error;

/// Point-in-time view of the pool counters.
#[derive(Default, Clone, Copy, Debug, PartialEq, Eq)]
pub struct PoolMetricsSnapshot {
    pub dispatched: u64,
    pub succeeded: u64,
    pub failed: u64,
    pub latency_us_total: u64,
    pub events: u64,
    pub connections: u64,
}

struct Tallies {
    dispatched: AtomicU64,
    succeeded: AtomicU64,
    failed: AtomicU64,
    latency_us: AtomicU64,
    events: AtomicU64,
    connections: AtomicU64,
}

static TALLIES: Tallies = Tallies {
    dispatched: AtomicU64::new(0),
    succeeded: AtomicU64::new(0),
    failed: AtomicU64::new(0),
    latency_us: AtomicU64::new(0),
    events: AtomicU64::new(0),
    connections: AtomicU64::new(0),
};

lazy_static! {
    static ref COMMANDS_BY_METHOD: IntCounterVec = IntCounterVec::new(
        prometheus::Opts::new(
            "webhelm_cdp_commands_total",
            "Protocol commands dispatched through the pool"
        ),
        &["method"]
    )
    .unwrap();
    static ref FAILURES_BY_METHOD: IntCounterVec = IntCounterVec::new(
        prometheus::Opts::new(
            "webhelm_cdp_command_failures_total",
            "Protocol commands that came back as errors"
        ),
        &["method"]
    )
    .unwrap();
    static ref LATENCY_SECONDS: HistogramVec = HistogramVec::new(
        histogram_opts!(
            "webhelm_cdp_command_duration_seconds",
            "Command round-trip latency",
            vec![0.005, 0.02, 0.1, 0.3, 1.0, 3.0, 10.0]
        ),
        &["method"]
    )
    .unwrap();
    static ref EVENTS_TOTAL: IntCounter = IntCounter::new(
        "webhelm_pool_events_total",
        "Lifecycle events published by the pool"
    )
    .unwrap();
    static ref CONNECTIONS_GAUGE: IntGauge = IntGauge::new(
        "webhelm_pool_connections",
        "Connections currently held by the pool"
    )
    .unwrap();
}

fn try_register<C>(registry: &Registry, collector: C)
where
    C: Collector + Clone + Send + Sync + 'static,
{
    if let Err(err) = registry.register(Box::new(collector.clone())) {
        if !matches!(err, prometheus::Error::AlreadyReg) {
            error!(?err, "pool metric registration failed");
        }
    }
}

/// Attach the pool collectors to `registry`. Registering twice is a no-op.
pub fn register_collectors(registry: &Registry) {
    try_register(registry, COMMANDS_BY_METHOD.clone());
    try_register(registry, FAILURES_BY_METHOD.clone());
    try_register(registry, LATENCY_SECONDS.clone());
    try_register(registry, EVENTS_TOTAL.clone());
    try_register(registry, CONNECTIONS_GAUGE.clone());
}

pub fn command_dispatched(method: &str) {
    TALLIES.dispatched.fetch_add(1, Ordering::Relaxed);
    COMMANDS_BY_METHOD.with_label_values(&[method]).inc();
}

pub fn command_succeeded(method: &str, elapsed: Duration) {
    TALLIES.succeeded.fetch_add(1, Ordering::Relaxed);
    let micros = u64::try_from(elapsed.as_micros()).unwrap_or(u64::MAX);
    TALLIES.latency_us.fetch_add(micros, Ordering::Relaxed);
    LATENCY_SECONDS
        .with_label_values(&[method])
        .observe(elapsed.as_secs_f64());
}

pub fn command_failed(method: &str) {
    TALLIES.failed.fetch_add(1, Ordering::Relaxed);
    FAILURES_BY_METHOD.with_label_values(&[method]).inc();
}

pub fn event_published() {
    TALLIES.events.fetch_add(1, Ordering::Relaxed);
    EVENTS_TOTAL.inc();
}

pub fn set_connection_count(count: usize) {
    TALLIES.connections.store(count as u64, Ordering::Relaxed);
    CONNECTIONS_GAUGE.set(count as i64);
}

pub fn snapshot() -> PoolMetricsSnapshot {
    PoolMetricsSnapshot {
        dispatched: TALLIES.dispatched.load(Ordering::Relaxed),
        succeeded: TALLIES.succeeded.load(Ordering::Relaxed),
        failed: TALLIES.failed.load(Ordering::Relaxed),
        latency_us_total: TALLIES.latency_us.load(Ordering::Relaxed),
        events: TALLIES.events.load(Ordering::Relaxed),
        connections: TALLIES.connections.load(Ordering::Relaxed),
    }
}

/// Clear the atomic tallies. The prometheus collectors are cumulative and
/// are left untouched.
pub fn reset() {
    TALLIES.dispatched.store(0, Ordering::Relaxed);
    TALLIES.succeeded.store(0, Ordering::Relaxed);
    TALLIES.failed.store(0, Ordering::Relaxed);
    TALLIES.latency_us.store(0, Ordering::Relaxed);
    TALLIES.events.store(0, Ordering::Relaxed);
    set_connection_count(0);
}

#[cfg(test)]
mod tests {
    use super::*;

    // Counters are process-global and other tests in this binary touch
    // them, so compare deltas instead of absolute values.
    #[test]
    fn command_counters_accumulate() {
        let before = snapshot();
        command_dispatched("Page.navigate");
        command_succeeded("Page.navigate", Duration::from_micros(150));
        command_failed("Page.navigate");
        let after = snapshot();
        assert!(after.dispatched >= before.dispatched + 1);
        assert!(after.succeeded >= before.succeeded + 1);
        assert!(after.failed >= before.failed + 1);
        assert!(after.latency_us_total >= before.latency_us_total + 150);
    }
}
