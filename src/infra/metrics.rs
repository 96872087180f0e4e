//! Lock-free metrics collection and periodic reporting
//!
//! Uses atomics for hot-path operations to avoid mutex contention.
//! Counters are monotonic; the step-duration histogram is swapped to zero
//! on every report.
//!
//! NOTE: All atomics use Relaxed ordering: these are statistical
//! counters only. Do NOT use these atomics for coordination or logic decisions.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;
use tracing::info;

/// Exponential bucket boundaries for confirmed step durations (milliseconds)
/// Buckets: ≤100, ≤200, ≤400, ≤800, ≤1600, ≤3200, ≤6400, ≤12800, ≤25600, ≤51200, >51200
const BUCKET_BOUNDS: [u64; 10] = [100, 200, 400, 800, 1600, 3200, 6400, 12800, 25600, 51200];
const NUM_BUCKETS: usize = 11;

/// Compute bucket index for a duration using binary search
#[inline]
fn bucket_index(duration_ms: u64) -> usize {
    BUCKET_BOUNDS.partition_point(|&bound| bound < duration_ms)
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

    // Upper bounds for each bucket (last bucket uses 2x the previous bound)
    const BUCKET_UPPER_BOUNDS: [u64; NUM_BUCKETS] =
        [100, 200, 400, 800, 1600, 3200, 6400, 12800, 25600, 51200, 102400];

    for (i, &count) in buckets.iter().enumerate() {
        cumulative += count;
        if cumulative >= target {
            return BUCKET_UPPER_BOUNDS[i];
        }
    }
    BUCKET_UPPER_BOUNDS[NUM_BUCKETS - 1]
}

/// Lock-free metrics collector
#[derive(Debug)]
pub struct Metrics {
    sequences_started: AtomicU64,
    sequences_completed: AtomicU64,
    sequences_failed: AtomicU64,
    config_errors: AtomicU64,
    steps_completed: AtomicU64,
    /// Moves rejected by the actuator (skipped or aborting)
    moves_rejected: AtomicU64,
    completion_timeouts: AtomicU64,
    /// Speed / digital output commands that returned an error
    aux_command_errors: AtomicU64,
    flushes: AtomicU64,
    reports_received: AtomicU64,
    reports_rejected: AtomicU64,
    stale_datagrams_dropped: AtomicU64,
    reactions_triggered: AtomicU64,
    reactions_unmapped: AtomicU64,
    cues_sent: AtomicU64,
    cues_failed: AtomicU64,
    mode_switches: AtomicU64,
    /// Step duration histogram (reset on report)
    step_buckets: [AtomicU64; NUM_BUCKETS],
    /// Sum of step durations in ms (reset on report)
    step_sum_ms: AtomicU64,
    /// Steps since last report (reset on report)
    steps_since_report: AtomicU64,
    /// Longest step since last report (reset on report)
    step_max_ms: AtomicU64,
    last_report_time: parking_lot::Mutex<Instant>,
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}

impl Metrics {
    pub fn new() -> Self {
        Self {
            sequences_started: AtomicU64::new(0),
            sequences_completed: AtomicU64::new(0),
            sequences_failed: AtomicU64::new(0),
            config_errors: AtomicU64::new(0),
            steps_completed: AtomicU64::new(0),
            moves_rejected: AtomicU64::new(0),
            completion_timeouts: AtomicU64::new(0),
            aux_command_errors: AtomicU64::new(0),
            flushes: AtomicU64::new(0),
            reports_received: AtomicU64::new(0),
            reports_rejected: AtomicU64::new(0),
            stale_datagrams_dropped: AtomicU64::new(0),
            reactions_triggered: AtomicU64::new(0),
            reactions_unmapped: AtomicU64::new(0),
            cues_sent: AtomicU64::new(0),
            cues_failed: AtomicU64::new(0),
            mode_switches: AtomicU64::new(0),
            step_buckets: std::array::from_fn(|_| AtomicU64::new(0)),
            step_sum_ms: AtomicU64::new(0),
            steps_since_report: AtomicU64::new(0),
            step_max_ms: AtomicU64::new(0),
            last_report_time: parking_lot::Mutex::new(Instant::now()),
        }
    }

    #[inline]
    pub fn record_sequence_started(&self) {
        self.sequences_started.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_sequence_completed(&self) {
        self.sequences_completed.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_sequence_failed(&self) {
        self.sequences_failed.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_config_error(&self) {
        self.config_errors.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a confirmed step and its duration from issue to completion
    #[inline]
    pub fn record_step_completed(&self, duration_ms: u64) {
        self.steps_completed.fetch_add(1, Ordering::Relaxed);
        self.steps_since_report.fetch_add(1, Ordering::Relaxed);
        self.step_sum_ms.fetch_add(duration_ms, Ordering::Relaxed);
        self.step_buckets[bucket_index(duration_ms)].fetch_add(1, Ordering::Relaxed);
        update_atomic_max(&self.step_max_ms, duration_ms);
    }

    #[inline]
    pub fn record_move_rejected(&self) {
        self.moves_rejected.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_completion_timeout(&self) {
        self.completion_timeouts.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_aux_command_error(&self) {
        self.aux_command_errors.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_flush(&self) {
        self.flushes.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_report_received(&self) {
        self.reports_received.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_report_rejected(&self) {
        self.reports_rejected.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_stale_dropped(&self, count: u64) {
        self.stale_datagrams_dropped.fetch_add(count, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_reaction(&self) {
        self.reactions_triggered.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_reaction_unmapped(&self) {
        self.reactions_unmapped.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_cue_sent(&self) {
        self.cues_sent.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_cue_failed(&self) {
        self.cues_failed.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_mode_switch(&self) {
        self.mode_switches.fetch_add(1, Ordering::Relaxed);
    }

    pub fn steps_completed(&self) -> u64 {
        self.steps_completed.load(Ordering::Relaxed)
    }

    pub fn moves_rejected(&self) -> u64 {
        self.moves_rejected.load(Ordering::Relaxed)
    }

    pub fn completion_timeouts(&self) -> u64 {
        self.completion_timeouts.load(Ordering::Relaxed)
    }

    pub fn config_errors(&self) -> u64 {
        self.config_errors.load(Ordering::Relaxed)
    }

    pub fn reports_received(&self) -> u64 {
        self.reports_received.load(Ordering::Relaxed)
    }

    pub fn reports_rejected(&self) -> u64 {
        self.reports_rejected.load(Ordering::Relaxed)
    }

    pub fn reactions_triggered(&self) -> u64 {
        self.reactions_triggered.load(Ordering::Relaxed)
    }

    pub fn cues_sent(&self) -> u64 {
        self.cues_sent.load(Ordering::Relaxed)
    }

    pub fn mode_switches(&self) -> u64 {
        self.mode_switches.load(Ordering::Relaxed)
    }

    /// Snapshot all counters and reset the step histogram
    pub fn report(&self) -> MetricsSummary {
        let step_buckets = swap_buckets(&self.step_buckets);
        let steps = self.steps_since_report.swap(0, Ordering::Relaxed);
        let step_sum = self.step_sum_ms.swap(0, Ordering::Relaxed);
        let step_max_ms = self.step_max_ms.swap(0, Ordering::Relaxed);

        let elapsed_secs = {
            let mut last = self.last_report_time.lock();
            let elapsed = last.elapsed();
            *last = Instant::now();
            elapsed.as_secs()
        };

        MetricsSummary {
            elapsed_secs,
            sequences_started: self.sequences_started.load(Ordering::Relaxed),
            sequences_completed: self.sequences_completed.load(Ordering::Relaxed),
            sequences_failed: self.sequences_failed.load(Ordering::Relaxed),
            config_errors: self.config_errors.load(Ordering::Relaxed),
            steps_completed: self.steps_completed.load(Ordering::Relaxed),
            moves_rejected: self.moves_rejected.load(Ordering::Relaxed),
            completion_timeouts: self.completion_timeouts.load(Ordering::Relaxed),
            aux_command_errors: self.aux_command_errors.load(Ordering::Relaxed),
            flushes: self.flushes.load(Ordering::Relaxed),
            reports_received: self.reports_received.load(Ordering::Relaxed),
            reports_rejected: self.reports_rejected.load(Ordering::Relaxed),
            stale_datagrams_dropped: self.stale_datagrams_dropped.load(Ordering::Relaxed),
            reactions_triggered: self.reactions_triggered.load(Ordering::Relaxed),
            reactions_unmapped: self.reactions_unmapped.load(Ordering::Relaxed),
            cues_sent: self.cues_sent.load(Ordering::Relaxed),
            cues_failed: self.cues_failed.load(Ordering::Relaxed),
            mode_switches: self.mode_switches.load(Ordering::Relaxed),
            step_buckets,
            step_avg_ms: if steps > 0 { step_sum / steps } else { 0 },
            step_max_ms,
            step_p95_ms: percentile_from_buckets(&step_buckets, 0.95),
        }
    }
}

/// Point-in-time metrics snapshot
#[derive(Debug, Clone)]
pub struct MetricsSummary {
    pub elapsed_secs: u64,
    pub sequences_started: u64,
    pub sequences_completed: u64,
    pub sequences_failed: u64,
    pub config_errors: u64,
    pub steps_completed: u64,
    pub moves_rejected: u64,
    pub completion_timeouts: u64,
    pub aux_command_errors: u64,
    pub flushes: u64,
    pub reports_received: u64,
    pub reports_rejected: u64,
    pub stale_datagrams_dropped: u64,
    pub reactions_triggered: u64,
    pub reactions_unmapped: u64,
    pub cues_sent: u64,
    pub cues_failed: u64,
    pub mode_switches: u64,
    /// Step duration histogram since last report
    pub step_buckets: [u64; NUM_BUCKETS],
    pub step_avg_ms: u64,
    pub step_max_ms: u64,
    pub step_p95_ms: u64,
}

impl MetricsSummary {
    pub fn log(&self) {
        info!(
            sequences = %self.sequences_started,
            sequences_failed = %self.sequences_failed,
            config_errors = %self.config_errors,
            steps = %self.steps_completed,
            moves_rejected = %self.moves_rejected,
            completion_timeouts = %self.completion_timeouts,
            reports = %self.reports_received,
            reports_rejected = %self.reports_rejected,
            stale_dropped = %self.stale_datagrams_dropped,
            reactions = %self.reactions_triggered,
            unmapped = %self.reactions_unmapped,
            cues = %self.cues_sent,
            cues_failed = %self.cues_failed,
            mode_switches = %self.mode_switches,
            step_avg_ms = %self.step_avg_ms,
            step_p95_ms = %self.step_p95_ms,
            step_max_ms = %self.step_max_ms,
            "metrics_summary"
        );
    }
}
