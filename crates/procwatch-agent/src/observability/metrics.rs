//! Reconciliation loop counters
//!
//! Lock-free counters updated by the loop on every tick and summarised when
//! it stops.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use serde::Serialize;

/// Counter metric - monotonically increasing value
#[derive(Debug, Default)]
pub struct Counter {
    value: AtomicU64,
}

impl Counter {
    pub const fn new() -> Self {
        Self {
            value: AtomicU64::new(0),
        }
    }

    pub fn inc(&self) {
        self.value.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_by(&self, n: u64) {
        self.value.fetch_add(n, Ordering::Relaxed);
    }

    pub fn get(&self) -> u64 {
        self.value.load(Ordering::Relaxed)
    }
}

/// Gauge metric - value that can go up and down
#[derive(Debug, Default)]
pub struct Gauge {
    value: AtomicU64,
}

impl Gauge {
    pub const fn new() -> Self {
        Self {
            value: AtomicU64::new(0),
        }
    }

    pub fn set(&self, value: u64) {
        self.value.store(value, Ordering::Relaxed);
    }

    pub fn get(&self) -> u64 {
        self.value.load(Ordering::Relaxed)
    }
}

/// Per-loop health counters
#[derive(Debug)]
pub struct LoopMetrics {
    pub ticks: Counter,
    pub rescans: Counter,
    pub scan_failures: Counter,
    pub skipped_ticks: Counter,
    pub reports_emitted: Counter,
    pub sample_failures: Counter,
    pub resolver_failures: Counter,
    pub tracked_pids: Gauge,
    /// Duration of the most recent tick, in microseconds
    pub last_tick_micros: Gauge,
}

impl LoopMetrics {
    pub const fn new() -> Self {
        Self {
            ticks: Counter::new(),
            rescans: Counter::new(),
            scan_failures: Counter::new(),
            skipped_ticks: Counter::new(),
            reports_emitted: Counter::new(),
            sample_failures: Counter::new(),
            resolver_failures: Counter::new(),
            tracked_pids: Gauge::new(),
            last_tick_micros: Gauge::new(),
        }
    }

    pub fn observe_tick(&self, elapsed: Duration) {
        self.last_tick_micros
            .set(u64::try_from(elapsed.as_micros()).unwrap_or(u64::MAX));
    }

    pub fn snapshot(&self) -> LoopMetricsSnapshot {
        LoopMetricsSnapshot {
            ticks: self.ticks.get(),
            rescans: self.rescans.get(),
            scan_failures: self.scan_failures.get(),
            skipped_ticks: self.skipped_ticks.get(),
            reports_emitted: self.reports_emitted.get(),
            sample_failures: self.sample_failures.get(),
            resolver_failures: self.resolver_failures.get(),
            tracked_pids: self.tracked_pids.get(),
            last_tick_micros: self.last_tick_micros.get(),
        }
    }
}

impl Default for LoopMetrics {
    fn default() -> Self {
        Self::new()
    }
}

/// Point-in-time copy of `LoopMetrics`
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct LoopMetricsSnapshot {
    pub ticks: u64,
    pub rescans: u64,
    pub scan_failures: u64,
    pub skipped_ticks: u64,
    pub reports_emitted: u64,
    pub sample_failures: u64,
    pub resolver_failures: u64,
    pub tracked_pids: u64,
    pub last_tick_micros: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_counter() {
        let counter = Counter::new();
        assert_eq!(counter.get(), 0);

        counter.inc();
        assert_eq!(counter.get(), 1);

        counter.inc_by(10);
        assert_eq!(counter.get(), 11);
    }

    #[test]
    fn test_gauge() {
        let gauge = Gauge::new();
        gauge.set(42);
        assert_eq!(gauge.get(), 42);
        gauge.set(3);
        assert_eq!(gauge.get(), 3);
    }

    #[test]
    fn test_snapshot() {
        let metrics = LoopMetrics::new();
        metrics.ticks.inc();
        metrics.ticks.inc();
        metrics.reports_emitted.inc_by(16);
        metrics.tracked_pids.set(2);
        metrics.observe_tick(Duration::from_millis(3));

        let snapshot = metrics.snapshot();
        assert_eq!(snapshot.ticks, 2);
        assert_eq!(snapshot.reports_emitted, 16);
        assert_eq!(snapshot.tracked_pids, 2);
        assert_eq!(snapshot.last_tick_micros, 3000);
        assert_eq!(snapshot.rescans, 0);
    }
}
