//! Monitor counters and periodic summaries
//!
//! Frame, sensor and sink paths bump atomics without locking. `report()`
//! swaps the interval counters back to zero for the periodic log line;
//! `snapshot()` reads the same values without resetting for Prometheus.
//!
//! Relaxed ordering throughout: these are statistics, never used to decide
//! control flow.

use crate::domain::types::PostureLabel;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;
use tracing::info;

/// Frame processing latency bucket boundaries (milliseconds)
/// Buckets: ≤5, ≤10, ≤25, ≤50, ≤100, ≤250, ≤500, ≤1000, ≤2500, ≤5000, >5000
const BUCKET_BOUNDS: [u64; 10] = [5, 10, 25, 50, 100, 250, 500, 1000, 2500, 5000];
const NUM_BUCKETS: usize = 11;

/// Compute bucket index for a latency value using binary search
#[inline]
fn bucket_index(latency_ms: u64) -> usize {
    BUCKET_BOUNDS.partition_point(|&bound| bound < latency_ms)
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
fn swap_buckets(buckets: &[AtomicU64; NUM_BUCKETS]) -> [u64; NUM_BUCKETS] {
    let mut result = [0u64; NUM_BUCKETS];
    for (i, bucket) in buckets.iter().enumerate() {
        result[i] = bucket.swap(0, Ordering::Relaxed);
    }
    result
}

/// Compute percentile from histogram buckets
/// Returns the upper bound of the bucket containing the percentile
fn percentile_from_buckets(buckets: &[u64; NUM_BUCKETS], percentile: f64) -> u64 {
    let total: u64 = buckets.iter().sum();
    if total == 0 {
        return 0;
    }

    let target = (total as f64 * percentile) as u64;
    let mut cumulative = 0u64;

    // Last bucket uses 2x the previous bound
    const BUCKET_UPPER_BOUNDS: [u64; NUM_BUCKETS] =
        [5, 10, 25, 50, 100, 250, 500, 1000, 2500, 5000, 10000];

    for (i, &count) in buckets.iter().enumerate() {
        cumulative += count;
        if cumulative >= target {
            return BUCKET_UPPER_BOUNDS[i];
        }
    }
    BUCKET_UPPER_BOUNDS[NUM_BUCKETS - 1]
}

/// Posture gauge values for Prometheus
pub const POSTURE_UNKNOWN: u64 = 0;
pub const POSTURE_SAFE: u64 = 1;
pub const POSTURE_SIDE: u64 = 2;
pub const POSTURE_TUMMY: u64 = 3;

fn posture_code(label: PostureLabel) -> u64 {
    match label {
        PostureLabel::Unknown => POSTURE_UNKNOWN,
        PostureLabel::Safe => POSTURE_SAFE,
        PostureLabel::Side => POSTURE_SIDE,
        PostureLabel::Tummy => POSTURE_TUMMY,
    }
}

/// Lock-free metrics collector
pub struct Metrics {
    /// Frames classified (monotonic)
    frames_total: AtomicU64,
    /// Frames where the extractor found no subject (monotonic)
    frames_no_subject: AtomicU64,
    /// Frames rejected as undecodable (monotonic)
    frames_rejected: AtomicU64,
    /// Frames since last report (reset on report)
    frames_since_report: AtomicU64,
    /// Sum of frame latencies in ms (reset on report)
    frame_latency_sum_ms: AtomicU64,
    /// Max frame latency in ms (reset on report)
    frame_latency_max_ms: AtomicU64,
    /// Frame latency histogram (reset on report)
    frame_latency_buckets: [AtomicU64; NUM_BUCKETS],
    /// Current posture label (gauge)
    posture: AtomicU64,
    /// Notification events emitted (monotonic)
    notifications_total: AtomicU64,
    /// Sensor readings accepted by the aggregator (monotonic)
    readings_total: AtomicU64,
    /// Failed sensor reads (monotonic)
    producer_errors_total: AtomicU64,
    /// Complete records flushed (monotonic)
    records_flushed_total: AtomicU64,
    /// Flush ticks that found an incomplete record (monotonic)
    flush_incomplete_total: AtomicU64,
    /// Successful sink deliveries (monotonic)
    sink_deliveries_total: AtomicU64,
    /// Failed sink deliveries (monotonic)
    sink_failures_total: AtomicU64,
    /// Websocket relay clients currently connected (gauge)
    relay_clients: AtomicU64,
    /// Last report time (only accessed from reporter)
    last_report_time: parking_lot::Mutex<Instant>,
}

impl Metrics {
    pub fn new() -> Self {
        Self {
            frames_total: AtomicU64::new(0),
            frames_no_subject: AtomicU64::new(0),
            frames_rejected: AtomicU64::new(0),
            frames_since_report: AtomicU64::new(0),
            frame_latency_sum_ms: AtomicU64::new(0),
            frame_latency_max_ms: AtomicU64::new(0),
            frame_latency_buckets: std::array::from_fn(|_| AtomicU64::new(0)),
            posture: AtomicU64::new(POSTURE_UNKNOWN),
            notifications_total: AtomicU64::new(0),
            readings_total: AtomicU64::new(0),
            producer_errors_total: AtomicU64::new(0),
            records_flushed_total: AtomicU64::new(0),
            flush_incomplete_total: AtomicU64::new(0),
            sink_deliveries_total: AtomicU64::new(0),
            sink_failures_total: AtomicU64::new(0),
            relay_clients: AtomicU64::new(0),
            last_report_time: parking_lot::Mutex::new(Instant::now()),
        }
    }

    /// Record a classified frame with its end-to-end latency (lock-free)
    #[inline]
    pub fn record_frame(&self, label: PostureLabel, latency_ms: u64) {
        self.frames_total.fetch_add(1, Ordering::Relaxed);
        self.frames_since_report.fetch_add(1, Ordering::Relaxed);
        self.frame_latency_sum_ms.fetch_add(latency_ms, Ordering::Relaxed);
        self.frame_latency_buckets[bucket_index(latency_ms)].fetch_add(1, Ordering::Relaxed);
        update_atomic_max(&self.frame_latency_max_ms, latency_ms);
        self.posture.store(posture_code(label), Ordering::Relaxed);
        if label == PostureLabel::Unknown {
            self.frames_no_subject.fetch_add(1, Ordering::Relaxed);
        }
    }

    #[inline]
    pub fn record_frame_rejected(&self) {
        self.frames_rejected.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_notification(&self) {
        self.notifications_total.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_reading(&self) {
        self.readings_total.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_producer_error(&self) {
        self.producer_errors_total.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_flush(&self, complete: bool) {
        if complete {
            self.records_flushed_total.fetch_add(1, Ordering::Relaxed);
        } else {
            self.flush_incomplete_total.fetch_add(1, Ordering::Relaxed);
        }
    }

    #[inline]
    pub fn record_sink_result(&self, ok: bool) {
        if ok {
            self.sink_deliveries_total.fetch_add(1, Ordering::Relaxed);
        } else {
            self.sink_failures_total.fetch_add(1, Ordering::Relaxed);
        }
    }

    #[inline]
    pub fn relay_client_connected(&self) {
        self.relay_clients.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn relay_client_disconnected(&self) {
        let _ = self.relay_clients.fetch_update(Ordering::Relaxed, Ordering::Relaxed, |n| {
            Some(n.saturating_sub(1))
        });
    }

    #[inline]
    pub fn frames_total(&self) -> u64 {
        self.frames_total.load(Ordering::Relaxed)
    }

    #[inline]
    pub fn sink_failures_total(&self) -> u64 {
        self.sink_failures_total.load(Ordering::Relaxed)
    }

    #[inline]
    pub fn records_flushed_total(&self) -> u64 {
        self.records_flushed_total.load(Ordering::Relaxed)
    }

    /// Calculate and return metrics summary, then reset periodic counters
    ///
    /// This is the only method that resets counters. It uses atomic swap
    /// to get a consistent snapshot while allowing concurrent updates.
    pub fn report(&self) -> MetricsSummary {
        self.summarize(true)
    }

    /// Same view as `report` without resetting anything (used by scrapes)
    pub fn snapshot(&self) -> MetricsSummary {
        self.summarize(false)
    }

    fn summarize(&self, reset: bool) -> MetricsSummary {
        let take = |a: &AtomicU64| {
            if reset {
                a.swap(0, Ordering::Relaxed)
            } else {
                a.load(Ordering::Relaxed)
            }
        };
        let frames_count = take(&self.frames_since_report);
        let latency_sum = take(&self.frame_latency_sum_ms);
        let max_latency = take(&self.frame_latency_max_ms);
        let lat_buckets = if reset {
            swap_buckets(&self.frame_latency_buckets)
        } else {
            std::array::from_fn(|i| self.frame_latency_buckets[i].load(Ordering::Relaxed))
        };

        let elapsed = {
            let mut last = self.last_report_time.lock();
            let elapsed = last.elapsed();
            if reset {
                *last = Instant::now();
            }
            elapsed
        };

        let frames_per_sec = if elapsed.as_secs_f64() > 0.0 {
            frames_count as f64 / elapsed.as_secs_f64()
        } else {
            0.0
        };
        let avg_latency = if frames_count > 0 { latency_sum / frames_count } else { 0 };

        MetricsSummary {
            frames_total: self.frames_total.load(Ordering::Relaxed),
            frames_no_subject: self.frames_no_subject.load(Ordering::Relaxed),
            frames_rejected: self.frames_rejected.load(Ordering::Relaxed),
            frames_per_sec,
            avg_frame_latency_ms: avg_latency,
            max_frame_latency_ms: max_latency,
            lat_buckets,
            lat_p50_ms: percentile_from_buckets(&lat_buckets, 0.50),
            lat_p99_ms: percentile_from_buckets(&lat_buckets, 0.99),
            posture: self.posture.load(Ordering::Relaxed),
            notifications_total: self.notifications_total.load(Ordering::Relaxed),
            readings_total: self.readings_total.load(Ordering::Relaxed),
            producer_errors_total: self.producer_errors_total.load(Ordering::Relaxed),
            records_flushed_total: self.records_flushed_total.load(Ordering::Relaxed),
            flush_incomplete_total: self.flush_incomplete_total.load(Ordering::Relaxed),
            sink_deliveries_total: self.sink_deliveries_total.load(Ordering::Relaxed),
            sink_failures_total: self.sink_failures_total.load(Ordering::Relaxed),
            relay_clients: self.relay_clients.load(Ordering::Relaxed),
        }
    }
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}

/// Number of histogram buckets (exported for Prometheus formatting)
pub const METRICS_NUM_BUCKETS: usize = NUM_BUCKETS;

/// Exported bucket bounds for Prometheus formatting
pub const METRICS_BUCKET_BOUNDS: [u64; 10] = BUCKET_BOUNDS;

#[derive(Debug)]
pub struct MetricsSummary {
    pub frames_total: u64,
    pub frames_no_subject: u64,
    pub frames_rejected: u64,
    pub frames_per_sec: f64,
    pub avg_frame_latency_ms: u64,
    pub max_frame_latency_ms: u64,
    /// Frame latency histogram buckets
    /// Bounds: ≤5, ≤10, ≤25, ≤50, ≤100, ≤250, ≤500, ≤1000, ≤2500, ≤5000, >5000 ms
    pub lat_buckets: [u64; NUM_BUCKETS],
    pub lat_p50_ms: u64,
    pub lat_p99_ms: u64,
    /// Current posture (0=unknown, 1=safe, 2=side, 3=tummy)
    pub posture: u64,
    pub notifications_total: u64,
    pub readings_total: u64,
    pub producer_errors_total: u64,
    pub records_flushed_total: u64,
    pub flush_incomplete_total: u64,
    pub sink_deliveries_total: u64,
    pub sink_failures_total: u64,
    pub relay_clients: u64,
}

impl MetricsSummary {
    pub fn log(&self) {
        info!(
            frames_total = %self.frames_total,
            frames_per_sec = format!("{:.2}", self.frames_per_sec),
            avg_frame_ms = %self.avg_frame_latency_ms,
            p99_frame_ms = %self.lat_p99_ms,
            no_subject = %self.frames_no_subject,
            notifications = %self.notifications_total,
            readings = %self.readings_total,
            producer_errors = %self.producer_errors_total,
            records = %self.records_flushed_total,
            sink_failures = %self.sink_failures_total,
            relay_clients = %self.relay_clients,
            "metrics"
        );
    }
}
