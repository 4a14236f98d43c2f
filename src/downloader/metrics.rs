//! In-flight and outcome counters for archive fetches.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

#[derive(Debug, Default)]
pub struct FetchMetrics {
    in_flight_fetches: AtomicU64,
    in_flight_writes: AtomicU64,
    completed: AtomicU64,
    failed: AtomicU64,
}

/// Point-in-time copy of [`FetchMetrics`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MetricsSnapshot {
    pub in_flight_fetches: u64,
    pub in_flight_writes: u64,
    pub completed: u64,
    pub failed: u64,
}

impl FetchMetrics {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Count one fetch as in flight until the guard is dropped.
    pub fn track_fetch(self: &Arc<Self>) -> InFlightGuard {
        InFlightGuard::new(Arc::clone(self), Gauge::Fetch)
    }

    /// Count one body write as in flight until the guard is dropped.
    pub fn track_write(self: &Arc<Self>) -> InFlightGuard {
        InFlightGuard::new(Arc::clone(self), Gauge::Write)
    }

    pub fn record_success(&self) {
        self.completed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_failure(&self) {
        self.failed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            in_flight_fetches: self.in_flight_fetches.load(Ordering::Relaxed),
            in_flight_writes: self.in_flight_writes.load(Ordering::Relaxed),
            completed: self.completed.load(Ordering::Relaxed),
            failed: self.failed.load(Ordering::Relaxed),
        }
    }

    fn gauge(&self, gauge: Gauge) -> &AtomicU64 {
        match gauge {
            Gauge::Fetch => &self.in_flight_fetches,
            Gauge::Write => &self.in_flight_writes,
        }
    }
}

#[derive(Debug, Clone, Copy)]
enum Gauge {
    Fetch,
    Write,
}

/// Decrements its gauge on drop, whichever way the tracked operation exits.
#[derive(Debug)]
pub struct InFlightGuard {
    metrics: Arc<FetchMetrics>,
    gauge: Gauge,
}

impl InFlightGuard {
    fn new(metrics: Arc<FetchMetrics>, gauge: Gauge) -> Self {
        metrics.gauge(gauge).fetch_add(1, Ordering::Relaxed);
        Self { metrics, gauge }
    }
}

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        self.metrics.gauge(self.gauge).fetch_sub(1, Ordering::Relaxed);
    }
}
