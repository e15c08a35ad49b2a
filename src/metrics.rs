//! Metrics surface - lock-free counters shared with external readers.
//!
//! One cache-line-aligned record of atomics. The matcher writes with
//! relaxed ordering on the hot path; readers snapshot with acquire loads.
//! Latency lands in a power-of-ten bucket histogram spanning 1 ns to 1 s,
//! from which the snapshot answers percentile queries.

use std::sync::atomic::{AtomicU64, Ordering};

/// Decade buckets: bucket `i` counts latencies in [10^i, 10^(i+1)) ns,
/// with everything at or above 1 s clamped into the last bucket.
pub const HISTOGRAM_BUCKETS: usize = 10;

#[inline]
fn bucket_index(latency_ns: u64) -> usize {
    if latency_ns == 0 {
        return 0;
    }
    (latency_ns.ilog10() as usize).min(HISTOGRAM_BUCKETS - 1)
}

/// Preallocated atomic latency histogram.
#[derive(Default)]
#[repr(align(64))]
pub struct LatencyHistogram {
    buckets: [AtomicU64; HISTOGRAM_BUCKETS],
    samples: AtomicU64,
    sum_ns: AtomicU64,
}

impl LatencyHistogram {
    #[inline]
    pub fn record(&self, latency_ns: u64) {
        self.buckets[bucket_index(latency_ns)].fetch_add(1, Ordering::Relaxed);
        self.samples.fetch_add(1, Ordering::Relaxed);
        self.sum_ns.fetch_add(latency_ns, Ordering::Relaxed);
    }
}

/// The shared metrics record. Writers are relaxed; `snapshot` reads with
/// acquire so external observers see a consistent-enough view (individual
/// counters are never torn, though counters may lag each other).
#[repr(align(64))]
pub struct EngineMetrics {
    pub orders_received: AtomicU64,
    pub orders_processed: AtomicU64,
    pub orders_rejected: AtomicU64,
    pub trades_executed: AtomicU64,

    /// Risk rejections by reason; their sum equals `orders_rejected`
    pub risk_rejected_quantity: AtomicU64,
    pub risk_rejected_price: AtomicU64,

    pub duplicate_adds: AtomicU64,
    pub unknown_ids: AtomicU64,
    pub empty_market_drops: AtomicU64,
    pub fok_rejects: AtomicU64,

    pub queue_overflows: AtomicU64,
    pub journal_drops: AtomicU64,
    pub journal_io_errors: AtomicU64,
    pub pool_grown: AtomicU64,

    pub queue_depth: AtomicU64,
    pub queue_high_water: AtomicU64,

    /// `u64::MAX` until the first sample
    pub min_latency_ns: AtomicU64,
    pub max_latency_ns: AtomicU64,

    pub histogram: LatencyHistogram,
}

impl EngineMetrics {
    pub fn new() -> Self {
        Self {
            orders_received: AtomicU64::new(0),
            orders_processed: AtomicU64::new(0),
            orders_rejected: AtomicU64::new(0),
            trades_executed: AtomicU64::new(0),
            risk_rejected_quantity: AtomicU64::new(0),
            risk_rejected_price: AtomicU64::new(0),
            duplicate_adds: AtomicU64::new(0),
            unknown_ids: AtomicU64::new(0),
            empty_market_drops: AtomicU64::new(0),
            fok_rejects: AtomicU64::new(0),
            queue_overflows: AtomicU64::new(0),
            journal_drops: AtomicU64::new(0),
            journal_io_errors: AtomicU64::new(0),
            pool_grown: AtomicU64::new(0),
            queue_depth: AtomicU64::new(0),
            queue_high_water: AtomicU64::new(0),
            min_latency_ns: AtomicU64::new(u64::MAX),
            max_latency_ns: AtomicU64::new(0),
            histogram: LatencyHistogram::default(),
        }
    }

    /// Record one command's queue-to-done latency.
    #[inline]
    pub fn record_latency(&self, latency_ns: u64) {
        self.histogram.record(latency_ns);
        self.min_latency_ns.fetch_min(latency_ns, Ordering::Relaxed);
        self.max_latency_ns.fetch_max(latency_ns, Ordering::Relaxed);
    }

    /// Record the command queue depth observed at pop time.
    #[inline]
    pub fn record_queue_depth(&self, depth: u64) {
        self.queue_depth.store(depth, Ordering::Relaxed);
        self.queue_high_water.fetch_max(depth, Ordering::Relaxed);
    }

    /// Copy out all counters, safe from any thread at any time.
    pub fn snapshot(&self) -> MetricsSnapshot {
        let mut latency_buckets = [0u64; HISTOGRAM_BUCKETS];
        for (slot, bucket) in latency_buckets.iter_mut().zip(&self.histogram.buckets) {
            *slot = bucket.load(Ordering::Acquire);
        }

        let min = self.min_latency_ns.load(Ordering::Acquire);
        MetricsSnapshot {
            orders_received: self.orders_received.load(Ordering::Acquire),
            orders_processed: self.orders_processed.load(Ordering::Acquire),
            orders_rejected: self.orders_rejected.load(Ordering::Acquire),
            trades_executed: self.trades_executed.load(Ordering::Acquire),
            risk_rejected_quantity: self.risk_rejected_quantity.load(Ordering::Acquire),
            risk_rejected_price: self.risk_rejected_price.load(Ordering::Acquire),
            duplicate_adds: self.duplicate_adds.load(Ordering::Acquire),
            unknown_ids: self.unknown_ids.load(Ordering::Acquire),
            empty_market_drops: self.empty_market_drops.load(Ordering::Acquire),
            fok_rejects: self.fok_rejects.load(Ordering::Acquire),
            queue_overflows: self.queue_overflows.load(Ordering::Acquire),
            journal_drops: self.journal_drops.load(Ordering::Acquire),
            journal_io_errors: self.journal_io_errors.load(Ordering::Acquire),
            pool_grown: self.pool_grown.load(Ordering::Acquire),
            queue_depth: self.queue_depth.load(Ordering::Acquire),
            queue_high_water: self.queue_high_water.load(Ordering::Acquire),
            min_latency_ns: if min == u64::MAX { None } else { Some(min) },
            max_latency_ns: self.max_latency_ns.load(Ordering::Acquire),
            latency_buckets,
            latency_samples: self.histogram.samples.load(Ordering::Acquire),
            latency_sum_ns: self.histogram.sum_ns.load(Ordering::Acquire),
        }
    }
}

impl Default for EngineMetrics {
    fn default() -> Self {
        Self::new()
    }
}

/// A plain copy of the counters plus latency summary queries.
#[derive(Clone, Debug)]
pub struct MetricsSnapshot {
    pub orders_received: u64,
    pub orders_processed: u64,
    pub orders_rejected: u64,
    pub trades_executed: u64,
    pub risk_rejected_quantity: u64,
    pub risk_rejected_price: u64,
    pub duplicate_adds: u64,
    pub unknown_ids: u64,
    pub empty_market_drops: u64,
    pub fok_rejects: u64,
    pub queue_overflows: u64,
    pub journal_drops: u64,
    pub journal_io_errors: u64,
    pub pool_grown: u64,
    pub queue_depth: u64,
    pub queue_high_water: u64,
    pub min_latency_ns: Option<u64>,
    pub max_latency_ns: u64,
    pub latency_buckets: [u64; HISTOGRAM_BUCKETS],
    pub latency_samples: u64,
    pub latency_sum_ns: u64,
}

impl MetricsSnapshot {
    /// Latency at quantile `q` in [0, 1], as the upper bound of the
    /// decade bucket the quantile falls in. 0 when no samples exist.
    pub fn latency_percentile(&self, q: f64) -> u64 {
        if self.latency_samples == 0 {
            return 0;
        }
        let rank = (q.clamp(0.0, 1.0) * self.latency_samples as f64).ceil() as u64;
        let rank = rank.max(1);

        let mut cumulative = 0u64;
        for (i, &count) in self.latency_buckets.iter().enumerate() {
            cumulative += count;
            if cumulative >= rank {
                return 10u64.pow(i as u32 + 1).min(1_000_000_000);
            }
        }
        1_000_000_000
    }

    pub fn p50_latency_ns(&self) -> u64 {
        self.latency_percentile(0.50)
    }

    pub fn p90_latency_ns(&self) -> u64 {
        self.latency_percentile(0.90)
    }

    pub fn p99_latency_ns(&self) -> u64 {
        self.latency_percentile(0.99)
    }

    pub fn p999_latency_ns(&self) -> u64 {
        self.latency_percentile(0.999)
    }

    pub fn mean_latency_ns(&self) -> u64 {
        if self.latency_samples == 0 {
            0
        } else {
            self.latency_sum_ns / self.latency_samples
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bucket_index_decades() {
        assert_eq!(bucket_index(0), 0);
        assert_eq!(bucket_index(1), 0);
        assert_eq!(bucket_index(9), 0);
        assert_eq!(bucket_index(10), 1);
        assert_eq!(bucket_index(999), 2);
        assert_eq!(bucket_index(1_000), 3);
        assert_eq!(bucket_index(999_999_999), 8);
        assert_eq!(bucket_index(1_000_000_000), 9);
        assert_eq!(bucket_index(u64::MAX), 9);
    }

    #[test]
    fn test_min_max_latency() {
        let metrics = EngineMetrics::new();
        assert_eq!(metrics.snapshot().min_latency_ns, None);

        metrics.record_latency(500);
        metrics.record_latency(100);
        metrics.record_latency(2_000);

        let snap = metrics.snapshot();
        assert_eq!(snap.min_latency_ns, Some(100));
        assert_eq!(snap.max_latency_ns, 2_000);
        assert_eq!(snap.latency_samples, 3);
        assert_eq!(snap.mean_latency_ns(), 866);
    }

    #[test]
    fn test_percentiles() {
        let metrics = EngineMetrics::new();
        // 90 samples in [100, 1000), 10 samples in [10_000, 100_000)
        for _ in 0..90 {
            metrics.record_latency(500);
        }
        for _ in 0..10 {
            metrics.record_latency(50_000);
        }

        let snap = metrics.snapshot();
        assert_eq!(snap.p50_latency_ns(), 1_000);
        assert_eq!(snap.p90_latency_ns(), 1_000);
        assert_eq!(snap.p99_latency_ns(), 100_000);
    }

    #[test]
    fn test_percentile_empty() {
        let snap = EngineMetrics::new().snapshot();
        assert_eq!(snap.p50_latency_ns(), 0);
    }

    #[test]
    fn test_queue_depth_high_water() {
        let metrics = EngineMetrics::new();
        metrics.record_queue_depth(5);
        metrics.record_queue_depth(20);
        metrics.record_queue_depth(3);

        let snap = metrics.snapshot();
        assert_eq!(snap.queue_depth, 3);
        assert_eq!(snap.queue_high_water, 20);
    }
}
