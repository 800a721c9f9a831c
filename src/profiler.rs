//! Saturation-cliff profiling.
//!
//! Past a certain thread count most workloads stop speeding up and start
//! slowing down: lock contention, cache-line thrashing, and scheduler
//! overhead eat the gains. This module runs a workload at an exponential
//! sequence of thread counts (1, 2, 4, 8, ..) and reports where throughput
//! peaked and where, if anywhere, it fell off the cliff.
//!
//! Doubling the thread count at each step finds the cliff region in
//! O(log max_threads) measurements instead of a linear sweep. The exact
//! cliff thread count may be off by up to a factor of 2; that imprecision
//! is the price of a much shorter profiling run.
//!
//! A high-variance workload can produce a spurious cliff. No statistical
//! smoothing is applied, since smoothing parameters would need their own
//! calibration; rerun with a longer `duration_per_level` instead.

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use std::time::{Duration, Instant};

use tracing::{debug, info, warn};

use crate::config::ProfileConfig;
use crate::error::Result;

/// Boxed error a workload may return to signal failure.
pub type WorkloadError = Box<dyn std::error::Error + Send + Sync>;

/// Measurements from one thread-count level.
#[derive(Debug, Clone, PartialEq)]
pub struct ProfileLevel {
    /// Number of threads the workload ran under.
    pub thread_count: usize,
    /// Completed invocations per second.
    pub throughput_ops: f64,
    /// 99th-percentile per-invocation latency.
    pub p99_latency: Duration,
}

/// Result of a profiling run.
#[derive(Debug, Clone, PartialEq)]
pub struct CliffAnalysis {
    /// Per-level measurements, in increasing thread-count order.
    pub levels: Vec<ProfileLevel>,
    /// Thread count of the best-throughput level before the cliff (or the
    /// overall best when no cliff was found).
    pub optimal_threads: usize,
    /// First thread count whose throughput fell below the cliff threshold,
    /// if any.
    pub cliff_threads: Option<usize>,
    /// Fractional throughput drop at the cliff level, in [0, 1].
    pub cliff_severity: f64,
    /// False when the workload failed and later levels were skipped. The
    /// levels measured before the failure are always retained.
    pub complete: bool,
}

/// Run `workload` at exponentially increasing thread counts and analyze
/// the resulting throughput curve.
///
/// Each level runs the workload concurrently on exactly `thread_count`
/// threads for `duration_per_level`, counting completed invocations. If the
/// workload returns an error or panics, the remaining levels are skipped and
/// the analysis is returned with `complete = false` and whatever levels
/// finished before the failure.
///
/// # Errors
///
/// Returns [`CrestError::InvalidConfig`](crate::CrestError::InvalidConfig)
/// if the config fails validation. Workload failures are not errors; they
/// produce a partial analysis.
pub fn profile<F>(workload: F, config: &ProfileConfig) -> Result<CliffAnalysis>
where
    F: Fn() -> std::result::Result<(), WorkloadError> + Sync,
{
    config.validate()?;

    let thread_counts = level_sequence(config.max_threads);
    info!(
        max_threads = config.max_threads,
        levels = thread_counts.len(),
        duration_per_level_ms = config.duration_per_level_ms,
        "profiling workload"
    );

    let failed = AtomicBool::new(false);

    for _ in 0..config.warmup_iterations {
        if run_once(&workload, &failed).is_none() {
            warn!("workload failed during warmup; aborting profile");
            return Ok(analyze_levels(Vec::new(), false, config.cliff_drop));
        }
    }

    let mut levels = Vec::with_capacity(thread_counts.len());
    let mut complete = true;

    for thread_count in thread_counts {
        let level = run_level(
            &workload,
            thread_count,
            config.duration_per_level(),
            &failed,
        );
        if failed.load(Ordering::Acquire) {
            warn!(thread_count, "workload failed; skipping remaining levels");
            complete = false;
            break;
        }
        debug!(
            thread_count,
            throughput_ops = level.throughput_ops,
            p99_latency_us = level.p99_latency.as_micros() as u64,
            "level complete"
        );
        levels.push(level);
    }

    Ok(analyze_levels(levels, complete, config.cliff_drop))
}

/// Thread counts to test: powers of two up to `max_threads`, with
/// `max_threads` itself appended when it is not a power of two.
pub(crate) fn level_sequence(max_threads: usize) -> Vec<usize> {
    let mut counts = Vec::new();
    let mut current = 1usize;
    while current <= max_threads {
        counts.push(current);
        match current.checked_mul(2) {
            Some(next) => current = next,
            None => break,
        }
    }
    if counts.last() != Some(&max_threads) {
        counts.push(max_threads);
    }
    counts
}

fn run_once<F>(workload: &F, failed: &AtomicBool) -> Option<Duration>
where
    F: Fn() -> std::result::Result<(), WorkloadError> + Sync,
{
    let start = Instant::now();
    match catch_unwind(AssertUnwindSafe(workload)) {
        Ok(Ok(())) => Some(start.elapsed()),
        Ok(Err(e)) => {
            warn!(error = %e, "workload returned an error");
            failed.store(true, Ordering::Release);
            None
        }
        Err(_) => {
            warn!("workload panicked");
            failed.store(true, Ordering::Release);
            None
        }
    }
}

fn run_level<F>(
    workload: &F,
    thread_count: usize,
    duration: Duration,
    failed: &AtomicBool,
) -> ProfileLevel
where
    F: Fn() -> std::result::Result<(), WorkloadError> + Sync,
{
    let start = Instant::now();
    let deadline = start + duration;

    let (ops, mut latencies) = thread::scope(|s| {
        let handles: Vec<_> = (0..thread_count)
            .map(|_| {
                s.spawn(|| {
                    let mut ops = 0u64;
                    let mut latencies = Vec::new();
                    while Instant::now() < deadline && !failed.load(Ordering::Acquire) {
                        match run_once(workload, failed) {
                            Some(latency) => {
                                latencies.push(latency.as_secs_f64());
                                ops += 1;
                            }
                            None => break,
                        }
                    }
                    (ops, latencies)
                })
            })
            .collect();

        let mut total_ops = 0u64;
        let mut all_latencies = Vec::new();
        for handle in handles {
            // Workers never panic: run_once catches workload unwinds.
            if let Ok((ops, latencies)) = handle.join() {
                total_ops += ops;
                all_latencies.extend(latencies);
            }
        }
        (total_ops, all_latencies)
    });

    let elapsed = start.elapsed().as_secs_f64();
    let throughput_ops = if elapsed > 0.0 {
        ops as f64 / elapsed
    } else {
        0.0
    };

    latencies.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));
    let p99 = percentile_sorted(&latencies, 99.0);

    ProfileLevel {
        thread_count,
        throughput_ops,
        p99_latency: Duration::from_secs_f64(p99),
    }
}

/// Walk a level sequence and locate the cliff.
///
/// A cliff is declared at the first level whose throughput sits at least
/// `cliff_drop` (fractionally) below the best throughput seen so far;
/// the optimal thread count is the best level strictly before it.
pub(crate) fn analyze_levels(
    levels: Vec<ProfileLevel>,
    complete: bool,
    cliff_drop: f64,
) -> CliffAnalysis {
    let mut best_throughput = 0.0f64;
    let mut optimal_threads = levels.first().map(|l| l.thread_count).unwrap_or(1);
    let mut cliff_threads = None;
    let mut cliff_severity = 0.0;

    for level in &levels {
        if cliff_threads.is_none()
            && best_throughput > 0.0
            && (best_throughput - level.throughput_ops) / best_throughput >= cliff_drop
        {
            cliff_threads = Some(level.thread_count);
            cliff_severity = (best_throughput - level.throughput_ops) / best_throughput;
        }
        if cliff_threads.is_none() && level.throughput_ops > best_throughput {
            best_throughput = level.throughput_ops;
            optimal_threads = level.thread_count;
        }
    }

    CliffAnalysis {
        levels,
        optimal_threads,
        cliff_threads,
        cliff_severity,
        complete,
    }
}

/// Calculate a percentile from a sorted slice.
fn percentile_sorted(sorted: &[f64], pct: f64) -> f64 {
    if sorted.is_empty() {
        return 0.0;
    }
    let idx = ((pct / 100.0) * (sorted.len() - 1) as f64).round() as usize;
    sorted[idx.min(sorted.len() - 1)]
}
