//! Shared load counters
//!
//! 全シミュレーターから同時に更新され、レポーターだけが読み取るカウンター群。
//! ロックは使わず、各カウンターは独立したアトミック値として扱う。

use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};
use std::sync::Arc;

/// Monotonic counter. Only unsigned additions are possible.
#[derive(Debug, Default)]
pub struct Counter(AtomicU64);

impl Counter {
    pub fn incr(&self) {
        self.add(1);
    }

    pub fn add(&self, n: u64) {
        self.0.fetch_add(n, Ordering::SeqCst);
    }

    pub fn get(&self) -> u64 {
        self.0.load(Ordering::SeqCst)
    }
}

/// Signed gauge. May dip below zero when accounting runs ahead of opens.
#[derive(Debug, Default)]
pub struct Gauge(AtomicI64);

impl Gauge {
    pub fn incr(&self) {
        self.add(1);
    }

    pub fn decr(&self) {
        self.add(-1);
    }

    pub fn add(&self, delta: i64) {
        self.0.fetch_add(delta, Ordering::SeqCst);
    }

    pub fn get(&self) -> i64 {
        self.0.load(Ordering::SeqCst)
    }
}

/// Process-wide counters, shared as `Arc<MetricsRegistry>`.
#[derive(Debug, Default)]
pub struct MetricsRegistry {
    /// Data queries ever started
    pub queries_issued: Counter,
    /// Connections currently open
    pub active_connections: Gauge,
    /// Simulators that have exited by any path. Reported as `FailPS`.
    pub exited_connections: Counter,
    /// Connections parked in a stall
    pub waiting_connections: Gauge,
}

impl MetricsRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn query_issued(&self) {
        self.queries_issued.incr();
    }

    pub fn connection_opened(&self) {
        self.active_connections.incr();
    }

    /// Exit accounting. Runs once per simulator on every exit path,
    /// graceful ones included.
    pub fn connection_exited(&self) {
        self.active_connections.decr();
        self.exited_connections.incr();
    }

    pub fn stall_entered(&self) {
        self.waiting_connections.incr();
    }

    pub fn stall_exited(&self) {
        self.waiting_connections.decr();
    }

    /// Read all four counters. Each read is atomic on its own; the set is not.
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            queries_issued: self.queries_issued.get(),
            active_connections: self.active_connections.get(),
            exited_connections: self.exited_connections.get(),
            waiting_connections: self.waiting_connections.get(),
        }
    }

    /// Guard that performs the exit accounting when dropped.
    pub fn exit_guard(self: &Arc<Self>) -> ExitGuard {
        ExitGuard {
            metrics: Arc::clone(self),
        }
    }
}

/// Runs [`MetricsRegistry::connection_exited`] on drop, so a panicking or
/// aborted simulator is still counted.
#[must_use = "dropping the guard immediately records the exit"]
pub struct ExitGuard {
    metrics: Arc<MetricsRegistry>,
}

impl Drop for ExitGuard {
    fn drop(&mut self) {
        self.metrics.connection_exited();
    }
}

/// Point-in-time copy of the registry.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MetricsSnapshot {
    pub queries_issued: u64,
    pub active_connections: i64,
    pub exited_connections: u64,
    pub waiting_connections: i64,
}

impl MetricsSnapshot {
    /// Deltas of the monotonic counters since `previous`.
    pub fn delta_since(&self, previous: &MetricsSnapshot) -> MetricsDelta {
        MetricsDelta {
            queries: self.queries_issued.saturating_sub(previous.queries_issued),
            exits: self
                .exited_connections
                .saturating_sub(previous.exited_connections),
        }
    }
}

/// Per-interval change of the monotonic counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MetricsDelta {
    pub queries: u64,
    pub exits: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exit_accounting_touches_both_counters() {
        let metrics = MetricsRegistry::new();
        metrics.connection_opened();
        metrics.connection_exited();

        let snap = metrics.snapshot();
        assert_eq!(snap.active_connections, 0);
        assert_eq!(snap.exited_connections, 1);
    }

    #[test]
    fn test_exit_without_open_goes_negative() {
        let metrics = MetricsRegistry::new();
        metrics.connection_exited();
        assert_eq!(metrics.active_connections.get(), -1);
    }

    #[test]
    fn test_exit_guard_fires_once_on_drop() {
        let metrics = Arc::new(MetricsRegistry::new());
        {
            let _guard = metrics.exit_guard();
            assert_eq!(metrics.exited_connections.get(), 0);
        }
        assert_eq!(metrics.exited_connections.get(), 1);
        assert_eq!(metrics.active_connections.get(), -1);
    }

    #[test]
    fn test_stall_cycle_nets_zero() {
        let metrics = MetricsRegistry::new();
        metrics.stall_entered();
        assert_eq!(metrics.waiting_connections.get(), 1);
        metrics.stall_exited();
        assert_eq!(metrics.waiting_connections.get(), 0);
    }

    #[test]
    fn test_gauge_signed_delta() {
        let gauge = Gauge::default();
        gauge.add(5);
        gauge.add(-7);
        assert_eq!(gauge.get(), -2);
    }

    #[test]
    fn test_delta_since() {
        let before = MetricsSnapshot {
            queries_issued: 100,
            exited_connections: 3,
            ..Default::default()
        };
        let after = MetricsSnapshot {
            queries_issued: 150,
            exited_connections: 4,
            active_connections: 12,
            waiting_connections: 1,
        };
        let delta = after.delta_since(&before);
        assert_eq!(delta.queries, 50);
        assert_eq!(delta.exits, 1);
    }

    #[test]
    fn test_concurrent_producers_monotonic_reads() {
        let metrics = Arc::new(MetricsRegistry::new());
        let producers: Vec<_> = (0..8)
            .map(|_| {
                let metrics = Arc::clone(&metrics);
                std::thread::spawn(move || {
                    for _ in 0..10_000 {
                        metrics.query_issued();
                        metrics.connection_opened();
                        metrics.connection_exited();
                    }
                })
            })
            .collect();

        let mut last = metrics.snapshot();
        while producers.iter().any(|p| !p.is_finished()) {
            let snap = metrics.snapshot();
            assert!(snap.queries_issued >= last.queries_issued);
            assert!(snap.exited_connections >= last.exited_connections);
            last = snap;
        }
        for p in producers {
            p.join().unwrap();
        }

        let snap = metrics.snapshot();
        assert_eq!(snap.queries_issued, 80_000);
        assert_eq!(snap.exited_connections, 80_000);
        assert_eq!(snap.active_connections, 0);
    }
}
