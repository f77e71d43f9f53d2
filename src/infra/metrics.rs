//! Lock-free metrics collection and periodic reporting
//!
//! Uses atomics for hot-path operations to avoid mutex contention.
//! All counter updates are lock-free; reporting is the only operation
//! that resets anything (via atomic swap). The latency histogram is kept
//! twice: per report interval for the log, and cumulative for scrapes.
//!
//! NOTE: All atomics use Relaxed ordering intentionally. These are statistical
//! counters only. Do NOT use them for coordination or logic decisions; the
//! productivity numbers shown to operators come from the aggregator.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;
use tracing::info;

/// Prometheus-style exponential bucket boundaries (microseconds)
/// Buckets: ≤100, ≤200, ≤400, ≤800, ≤1600, ≤3200, ≤6400, ≤12800, ≤25600, ≤51200, >51200
pub const METRICS_BUCKET_BOUNDS: [u64; 10] =
    [100, 200, 400, 800, 1600, 3200, 6400, 12800, 25600, 51200];
pub const METRICS_NUM_BUCKETS: usize = 11;

/// Compute bucket index for a latency value using binary search
#[inline]
fn bucket_index(latency_us: u64) -> usize {
    METRICS_BUCKET_BOUNDS.partition_point(|&bound| bound < latency_us)
}

/// Update an atomic max value using compare-and-swap loop
#[inline]
fn update_atomic_max(atomic_max: &AtomicU64, new_value: u64) {
    let mut current_max = atomic_max.load(Ordering::Relaxed);
    while new_value > current_max {
        match atomic_max.compare_exchange_weak(
            current_max,
            new_value,
            Ordering::Relaxed,
            Ordering::Relaxed,
        ) {
            Ok(_) => break,
            Err(actual) => current_max = actual,
        }
    }
}

/// Swap all buckets to zero and return their values
#[inline]
fn swap_buckets(buckets: &[AtomicU64; METRICS_NUM_BUCKETS]) -> [u64; METRICS_NUM_BUCKETS] {
    let mut result = [0u64; METRICS_NUM_BUCKETS];
    for (i, bucket) in buckets.iter().enumerate() {
        result[i] = bucket.swap(0, Ordering::Relaxed);
    }
    result
}

/// Compute percentile from histogram buckets
/// Returns the upper bound of the bucket containing the percentile
fn percentile_from_buckets(buckets: &[u64; METRICS_NUM_BUCKETS], percentile: f64) -> u64 {
    let total: u64 = buckets.iter().sum();
    if total == 0 {
        return 0;
    }

    let target = (total as f64 * percentile).ceil() as u64;
    let mut cumulative = 0u64;

    // Upper bounds for each bucket (last bucket uses 2x the previous bound)
    const BUCKET_UPPER_BOUNDS: [u64; METRICS_NUM_BUCKETS] =
        [100, 200, 400, 800, 1600, 3200, 6400, 12800, 25600, 51200, 102400];

    for (i, &count) in buckets.iter().enumerate() {
        cumulative += count;
        if cumulative >= target {
            return BUCKET_UPPER_BOUNDS[i];
        }
    }
    BUCKET_UPPER_BOUNDS[METRICS_NUM_BUCKETS - 1]
}

/// Lock-free metrics collector
pub struct Metrics {
    /// Registrations committed (monotonic)
    registrations_total: AtomicU64,
    /// Commits since last report (reset on report)
    registrations_since_report: AtomicU64,
    /// Duplicate scans rejected at pre-check or commit (monotonic)
    duplicates_total: AtomicU64,
    /// Barcodes rejected by the classifier (monotonic)
    invalid_barcodes_total: AtomicU64,
    /// Station inputs outside M1..M4 (monotonic)
    invalid_stations_total: AtomicU64,
    /// Registration log write failures (monotonic)
    storage_errors_total: AtomicU64,
    /// Business days closed (monotonic)
    day_closures_total: AtomicU64,
    /// Live events a lagging subscriber never received (monotonic)
    live_events_dropped: AtomicU64,
    /// Commit latency histogram buckets (reset on report)
    commit_latency_buckets: [AtomicU64; METRICS_NUM_BUCKETS],
    /// Commit latency histogram buckets (monotonic)
    commit_latency_buckets_total: [AtomicU64; METRICS_NUM_BUCKETS],
    /// Sum of all commit latencies in microseconds (monotonic)
    commit_latency_sum_total_us: AtomicU64,
    /// Sum of commit latencies in microseconds (reset on report)
    commit_latency_sum_us: AtomicU64,
    /// Max commit latency in microseconds (reset on report)
    commit_latency_max_us: AtomicU64,
    /// Last report time (only accessed from reporter)
    last_report_time: parking_lot::Mutex<Instant>,
}

impl Metrics {
    pub fn new() -> Self {
        Self {
            registrations_total: AtomicU64::new(0),
            registrations_since_report: AtomicU64::new(0),
            duplicates_total: AtomicU64::new(0),
            invalid_barcodes_total: AtomicU64::new(0),
            invalid_stations_total: AtomicU64::new(0),
            storage_errors_total: AtomicU64::new(0),
            day_closures_total: AtomicU64::new(0),
            live_events_dropped: AtomicU64::new(0),
            commit_latency_buckets: std::array::from_fn(|_| AtomicU64::new(0)),
            commit_latency_buckets_total: std::array::from_fn(|_| AtomicU64::new(0)),
            commit_latency_sum_total_us: AtomicU64::new(0),
            commit_latency_sum_us: AtomicU64::new(0),
            commit_latency_max_us: AtomicU64::new(0),
            last_report_time: parking_lot::Mutex::new(Instant::now()),
        }
    }

    /// Record a committed registration with its commit-path latency
    #[inline]
    pub fn record_registration(&self, latency_us: u64) {
        self.registrations_total.fetch_add(1, Ordering::Relaxed);
        self.registrations_since_report.fetch_add(1, Ordering::Relaxed);
        self.commit_latency_sum_us.fetch_add(latency_us, Ordering::Relaxed);
        self.commit_latency_sum_total_us.fetch_add(latency_us, Ordering::Relaxed);
        let bucket = bucket_index(latency_us);
        self.commit_latency_buckets[bucket].fetch_add(1, Ordering::Relaxed);
        self.commit_latency_buckets_total[bucket].fetch_add(1, Ordering::Relaxed);
        update_atomic_max(&self.commit_latency_max_us, latency_us);
    }

    #[inline]
    pub fn record_duplicate(&self) {
        self.duplicates_total.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_invalid_barcode(&self) {
        self.invalid_barcodes_total.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_invalid_station(&self) {
        self.invalid_stations_total.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_storage_error(&self) {
        self.storage_errors_total.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_day_closed(&self) {
        self.day_closures_total.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_live_events_dropped(&self, count: u64) {
        self.live_events_dropped.fetch_add(count, Ordering::Relaxed);
    }

    pub fn registrations_total(&self) -> u64 {
        self.registrations_total.load(Ordering::Relaxed)
    }

    pub fn duplicates_total(&self) -> u64 {
        self.duplicates_total.load(Ordering::Relaxed)
    }

    pub fn invalid_barcodes_total(&self) -> u64 {
        self.invalid_barcodes_total.load(Ordering::Relaxed)
    }

    pub fn invalid_stations_total(&self) -> u64 {
        self.invalid_stations_total.load(Ordering::Relaxed)
    }

    /// Monotonic view for Prometheus; resets nothing
    pub fn totals(&self) -> MetricsTotals {
        let mut buckets = [0u64; METRICS_NUM_BUCKETS];
        for (i, bucket) in self.commit_latency_buckets_total.iter().enumerate() {
            buckets[i] = bucket.load(Ordering::Relaxed);
        }

        MetricsTotals {
            registrations_total: self.registrations_total.load(Ordering::Relaxed),
            duplicates_total: self.duplicates_total.load(Ordering::Relaxed),
            invalid_barcodes_total: self.invalid_barcodes_total.load(Ordering::Relaxed),
            invalid_stations_total: self.invalid_stations_total.load(Ordering::Relaxed),
            storage_errors_total: self.storage_errors_total.load(Ordering::Relaxed),
            day_closures_total: self.day_closures_total.load(Ordering::Relaxed),
            live_events_dropped: self.live_events_dropped.load(Ordering::Relaxed),
            commit_latency_buckets: buckets,
            commit_latency_sum_us: self.commit_latency_sum_total_us.load(Ordering::Relaxed),
            commit_latency_p99_us: percentile_from_buckets(&buckets, 0.99),
        }
    }

    /// Produce a summary and reset the per-interval counters
    pub fn report(&self) -> MetricsSummary {
        let elapsed = {
            let mut last = self.last_report_time.lock();
            let elapsed = last.elapsed();
            *last = Instant::now();
            elapsed
        };

        let commits = self.registrations_since_report.swap(0, Ordering::Relaxed);
        let latency_sum = self.commit_latency_sum_us.swap(0, Ordering::Relaxed);
        let latency_max = self.commit_latency_max_us.swap(0, Ordering::Relaxed);
        let buckets = swap_buckets(&self.commit_latency_buckets);

        let secs = elapsed.as_secs_f64();
        let commits_per_min = if secs > 0.0 { commits as f64 * 60.0 / secs } else { 0.0 };
        let avg = if commits > 0 { latency_sum / commits } else { 0 };

        MetricsSummary {
            registrations_total: self.registrations_total.load(Ordering::Relaxed),
            commits_per_min,
            duplicates_total: self.duplicates_total.load(Ordering::Relaxed),
            invalid_barcodes_total: self.invalid_barcodes_total.load(Ordering::Relaxed),
            invalid_stations_total: self.invalid_stations_total.load(Ordering::Relaxed),
            storage_errors_total: self.storage_errors_total.load(Ordering::Relaxed),
            day_closures_total: self.day_closures_total.load(Ordering::Relaxed),
            live_events_dropped: self.live_events_dropped.load(Ordering::Relaxed),
            commit_latency_buckets: buckets,
            commit_latency_avg_us: avg,
            commit_latency_max_us: latency_max,
            commit_latency_p99_us: percentile_from_buckets(&buckets, 0.99),
        }
    }
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}

/// Point-in-time metrics snapshot
#[derive(Debug, Clone)]
pub struct MetricsSummary {
    pub registrations_total: u64,
    pub commits_per_min: f64,
    pub duplicates_total: u64,
    pub invalid_barcodes_total: u64,
    pub invalid_stations_total: u64,
    pub storage_errors_total: u64,
    pub day_closures_total: u64,
    pub live_events_dropped: u64,
    pub commit_latency_buckets: [u64; METRICS_NUM_BUCKETS],
    pub commit_latency_avg_us: u64,
    pub commit_latency_max_us: u64,
    pub commit_latency_p99_us: u64,
}

/// Cumulative counters and latency histogram since startup
#[derive(Debug, Clone)]
pub struct MetricsTotals {
    pub registrations_total: u64,
    pub duplicates_total: u64,
    pub invalid_barcodes_total: u64,
    pub invalid_stations_total: u64,
    pub storage_errors_total: u64,
    pub day_closures_total: u64,
    pub live_events_dropped: u64,
    pub commit_latency_buckets: [u64; METRICS_NUM_BUCKETS],
    pub commit_latency_sum_us: u64,
    pub commit_latency_p99_us: u64,
}

impl MetricsSummary {
    pub fn log(&self) {
        info!(
            registrations_total = %self.registrations_total,
            commits_per_min = %format!("{:.1}", self.commits_per_min),
            duplicates_total = %self.duplicates_total,
            invalid_barcodes_total = %self.invalid_barcodes_total,
            invalid_stations_total = %self.invalid_stations_total,
            storage_errors_total = %self.storage_errors_total,
            day_closures_total = %self.day_closures_total,
            live_events_dropped = %self.live_events_dropped,
            commit_avg_us = %self.commit_latency_avg_us,
            commit_max_us = %self.commit_latency_max_us,
            commit_p99_us = %self.commit_latency_p99_us,
            "metrics"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bucket_index() {
        assert_eq!(bucket_index(50), 0);
        assert_eq!(bucket_index(100), 0);
        assert_eq!(bucket_index(101), 1);
        assert_eq!(bucket_index(51200), 9);
        assert_eq!(bucket_index(1_000_000), 10);
    }

    #[test]
    fn test_report_resets_interval_counters() {
        let metrics = Metrics::new();
        metrics.record_registration(150);
        metrics.record_registration(250);
        metrics.record_duplicate();

        let summary = metrics.report();
        assert_eq!(summary.registrations_total, 2);
        assert_eq!(summary.duplicates_total, 1);
        assert_eq!(summary.commit_latency_avg_us, 200);
        assert_eq!(summary.commit_latency_max_us, 250);
        assert_eq!(summary.commit_latency_buckets.iter().sum::<u64>(), 2);

        // Monotonic totals survive, interval histogram does not
        let summary = metrics.report();
        assert_eq!(summary.registrations_total, 2);
        assert_eq!(summary.commit_latency_buckets.iter().sum::<u64>(), 0);
        assert_eq!(summary.commit_latency_max_us, 0);
    }

    #[test]
    fn test_totals_survive_report() {
        let metrics = Metrics::new();
        metrics.record_registration(150);
        metrics.record_invalid_barcode();
        metrics.report();
        metrics.record_registration(60_000);

        let totals = metrics.totals();
        assert_eq!(totals.registrations_total, 2);
        assert_eq!(totals.invalid_barcodes_total, 1);
        assert_eq!(totals.commit_latency_buckets[1], 1);
        assert_eq!(totals.commit_latency_buckets[10], 1);
        assert_eq!(totals.commit_latency_sum_us, 60_150);

        // Reading totals resets nothing
        assert_eq!(metrics.totals().commit_latency_buckets.iter().sum::<u64>(), 2);
        assert_eq!(metrics.report().commit_latency_buckets.iter().sum::<u64>(), 1);
    }

    #[test]
    fn test_percentile_from_buckets() {
        let mut buckets = [0u64; METRICS_NUM_BUCKETS];
        buckets[0] = 99;
        buckets[5] = 1;
        assert_eq!(percentile_from_buckets(&buckets, 0.5), 100);
        assert_eq!(percentile_from_buckets(&buckets, 0.99), 100);
        assert_eq!(percentile_from_buckets(&buckets, 1.0), 3200);
        assert_eq!(percentile_from_buckets(&[0; METRICS_NUM_BUCKETS], 0.99), 0);
    }
}
