//! Blocking-ratio monitoring.
//!
//! The blocking ratio β = 1 − (CPU time / wall time) of recently completed
//! tasks is the signal the adaptive pool scales on: β near 1 means workers
//! spend their time waiting (I/O-bound, safe to add threads), β near 0 means
//! they burn CPU (adding threads invites contention).
//!
//! [`BlockingRatioMonitor`] aggregates per-task [`Sample`]s in a bounded
//! rolling window so the estimate tracks changes in workload character
//! within a tick or two, rather than averaging over the pool's lifetime.

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::{Duration, Instant};

/// One completed task's measurement: the atomic unit the monitor aggregates.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Sample {
    /// Wall-clock duration of the task.
    pub wall_time: Duration,
    /// Thread CPU time consumed by the task, if the platform can measure it.
    pub cpu_time: Option<Duration>,
    /// Number of active workers when the sample was captured.
    pub thread_count: usize,
}

/// Capability for measuring the current thread's consumed CPU time.
///
/// Workers read this clock before and after each task; the difference is the
/// task's CPU time. Where no per-thread CPU counter exists, the source
/// returns `None` and the blocking-ratio estimate stays at "insufficient
/// data" instead of guessing.
pub trait CpuTimeSource: Send + Sync + 'static {
    /// CPU time consumed by the calling thread so far, or `None` if
    /// unavailable on this platform.
    fn thread_cpu_time(&self) -> Option<Duration>;
}

/// Precise per-thread CPU clock backed by `CLOCK_THREAD_CPUTIME_ID`.
#[cfg(unix)]
#[derive(Debug, Default, Clone, Copy)]
pub struct ThreadCpuClock;

#[cfg(unix)]
impl CpuTimeSource for ThreadCpuClock {
    fn thread_cpu_time(&self) -> Option<Duration> {
        let mut ts = libc::timespec {
            tv_sec: 0,
            tv_nsec: 0,
        };
        let rc = unsafe { libc::clock_gettime(libc::CLOCK_THREAD_CPUTIME_ID, &mut ts) };
        if rc == 0 {
            Some(Duration::new(ts.tv_sec as u64, ts.tv_nsec as u32))
        } else {
            None
        }
    }
}

/// Wall-clock-only fallback: reports no CPU time, which keeps the
/// blocking-ratio estimate at "insufficient data".
#[derive(Debug, Default, Clone, Copy)]
pub struct WallClockOnly;

impl CpuTimeSource for WallClockOnly {
    fn thread_cpu_time(&self) -> Option<Duration> {
        None
    }
}

/// Create the best CPU time source available on this platform.
pub fn default_cpu_time_source() -> Arc<dyn CpuTimeSource> {
    #[cfg(unix)]
    {
        Arc::new(ThreadCpuClock)
    }
    #[cfg(not(unix))]
    {
        Arc::new(WallClockOnly)
    }
}

/// A usable blocking-ratio reading.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BlockingRatio {
    /// β = 1 − (Σ cpu_time / Σ wall_time), clamped to [0, 1].
    pub beta: f64,
    /// Number of samples the estimate was computed from.
    pub sample_count: usize,
    /// Time spanned by the retained window, oldest to newest sample.
    pub window_span: Duration,
}

/// Result of [`BlockingRatioMonitor::current_estimate`].
///
/// `Insufficient` is a sentinel, not an error: callers must not act on β
/// until the window holds enough CPU-measured samples.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum BetaEstimate {
    /// Too few CPU-measured samples to say anything.
    Insufficient {
        /// Samples currently retained (including ones without CPU time).
        sample_count: usize,
    },
    /// A usable reading.
    Ready(BlockingRatio),
}

impl BetaEstimate {
    /// The β value, if the estimate is usable.
    pub fn beta(&self) -> Option<f64> {
        match self {
            BetaEstimate::Ready(r) => Some(r.beta),
            BetaEstimate::Insufficient { .. } => None,
        }
    }

    /// Whether the estimate is usable.
    pub fn is_ready(&self) -> bool {
        matches!(self, BetaEstimate::Ready(_))
    }
}

/// Rolling-window aggregator of task [`Sample`]s.
///
/// Single writer, single reader: the pool's monitor thread drains the
/// worker handoff queue into this window each tick. The window is
/// count-bounded; the oldest sample is evicted on overflow so both
/// `record` and `current_estimate` are O(1).
///
/// Never panics and never errors: malformed samples (zero wall time) are
/// dropped silently and counted in [`BlockingRatioMonitor::discarded`].
pub struct BlockingRatioMonitor {
    window: VecDeque<(Sample, Instant)>,
    capacity: usize,
    min_samples: usize,
    /// Running sums over samples that carry CPU time.
    sum_wall_measured: Duration,
    sum_cpu_measured: Duration,
    measured_count: usize,
    /// Running wall-time sum over every retained sample (for mean latency).
    sum_wall_all: Duration,
    discarded: u64,
}

impl BlockingRatioMonitor {
    /// Create a monitor retaining up to `capacity` samples and requiring
    /// `min_samples` CPU-measured samples before reporting a ratio.
    pub fn new(capacity: usize, min_samples: usize) -> Self {
        Self {
            window: VecDeque::with_capacity(capacity),
            capacity,
            min_samples,
            sum_wall_measured: Duration::ZERO,
            sum_cpu_measured: Duration::ZERO,
            measured_count: 0,
            sum_wall_all: Duration::ZERO,
            discarded: 0,
        }
    }

    /// Append a sample, evicting the oldest if the window is at capacity.
    ///
    /// Samples with zero wall time are dropped and counted; CPU time is
    /// clamped to wall time so β never leaves [0, 1].
    pub fn record(&mut self, mut sample: Sample) {
        if sample.wall_time.is_zero() {
            self.discarded += 1;
            return;
        }
        if let Some(cpu) = sample.cpu_time {
            sample.cpu_time = Some(cpu.min(sample.wall_time));
        }

        if self.window.len() == self.capacity {
            if let Some((old, _)) = self.window.pop_front() {
                self.sum_wall_all = self.sum_wall_all.saturating_sub(old.wall_time);
                if let Some(cpu) = old.cpu_time {
                    self.sum_wall_measured = self.sum_wall_measured.saturating_sub(old.wall_time);
                    self.sum_cpu_measured = self.sum_cpu_measured.saturating_sub(cpu);
                    self.measured_count -= 1;
                }
            }
        }

        self.sum_wall_all += sample.wall_time;
        if let Some(cpu) = sample.cpu_time {
            self.sum_wall_measured += sample.wall_time;
            self.sum_cpu_measured += cpu;
            self.measured_count += 1;
        }
        self.window.push_back((sample, Instant::now()));
    }

    /// Compute the blocking ratio over the current window.
    pub fn current_estimate(&self) -> BetaEstimate {
        let sample_count = self.window.len();
        if self.measured_count < self.min_samples {
            return BetaEstimate::Insufficient { sample_count };
        }
        let wall = self.sum_wall_measured.as_secs_f64();
        if wall <= 0.0 {
            return BetaEstimate::Insufficient { sample_count };
        }
        let beta = (1.0 - self.sum_cpu_measured.as_secs_f64() / wall).clamp(0.0, 1.0);
        BetaEstimate::Ready(BlockingRatio {
            beta,
            sample_count: self.measured_count,
            window_span: self.window_span(),
        })
    }

    /// Mean wall-clock task duration over every retained sample.
    pub fn mean_wall_time(&self) -> Option<Duration> {
        if self.window.is_empty() {
            return None;
        }
        Some(self.sum_wall_all / self.window.len() as u32)
    }

    /// Number of samples currently retained.
    pub fn len(&self) -> usize {
        self.window.len()
    }

    /// Whether the window is empty.
    pub fn is_empty(&self) -> bool {
        self.window.is_empty()
    }

    /// Samples dropped for being malformed. Exposed for diagnostics.
    pub fn discarded(&self) -> u64 {
        self.discarded
    }

    fn window_span(&self) -> Duration {
        match (self.window.front(), self.window.back()) {
            (Some((_, oldest)), Some((_, newest))) => newest.duration_since(*oldest),
            _ => Duration::ZERO,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample(wall_ms: u64, cpu_ms: u64) -> Sample {
        Sample {
            wall_time: Duration::from_millis(wall_ms),
            cpu_time: Some(Duration::from_millis(cpu_ms)),
            thread_count: 1,
        }
    }

    #[test]
    fn test_insufficient_below_min_samples() {
        let mut monitor = BlockingRatioMonitor::new(16, 5);
        for _ in 0..4 {
            monitor.record(sample(10, 1));
        }
        assert_eq!(
            monitor.current_estimate(),
            BetaEstimate::Insufficient { sample_count: 4 }
        );
    }

    #[test]
    fn test_io_bound_beta_near_one() {
        let mut monitor = BlockingRatioMonitor::new(16, 5);
        // 10ms wall, 1ms cpu per task: β = 0.9
        for _ in 0..8 {
            monitor.record(sample(10, 1));
        }
        match monitor.current_estimate() {
            BetaEstimate::Ready(r) => {
                assert!((r.beta - 0.9).abs() < 1e-9);
                assert_eq!(r.sample_count, 8);
            }
            other => panic!("expected ready estimate, got {:?}", other),
        }
    }

    #[test]
    fn test_cpu_bound_beta_near_zero() {
        let mut monitor = BlockingRatioMonitor::new(16, 5);
        for _ in 0..8 {
            monitor.record(sample(10, 10));
        }
        let beta = monitor.current_estimate().beta().unwrap();
        assert!(beta.abs() < 1e-9);
    }

    #[test]
    fn test_eviction_keeps_estimate_rolling() {
        let mut monitor = BlockingRatioMonitor::new(5, 5);
        // Fill with CPU-bound samples, then overwrite with I/O-bound ones.
        for _ in 0..5 {
            monitor.record(sample(10, 10));
        }
        assert!(monitor.current_estimate().beta().unwrap() < 0.01);

        for _ in 0..5 {
            monitor.record(sample(10, 1));
        }
        assert_eq!(monitor.len(), 5);
        let beta = monitor.current_estimate().beta().unwrap();
        assert!((beta - 0.9).abs() < 1e-9, "stale samples kept: β = {}", beta);
    }

    #[test]
    fn test_zero_wall_time_discarded() {
        let mut monitor = BlockingRatioMonitor::new(16, 1);
        monitor.record(Sample {
            wall_time: Duration::ZERO,
            cpu_time: Some(Duration::from_millis(1)),
            thread_count: 1,
        });
        assert_eq!(monitor.len(), 0);
        assert_eq!(monitor.discarded(), 1);
    }

    #[test]
    fn test_cpu_clamped_to_wall() {
        let mut monitor = BlockingRatioMonitor::new(16, 1);
        // Scheduler jitter can make a coarse CPU reading exceed wall time.
        monitor.record(sample(5, 50));
        let beta = monitor.current_estimate().beta().unwrap();
        assert!((0.0..=1.0).contains(&beta));
        assert!(beta.abs() < 1e-9);
    }

    #[test]
    fn test_unmeasured_samples_keep_estimate_insufficient() {
        let mut monitor = BlockingRatioMonitor::new(16, 5);
        for _ in 0..10 {
            monitor.record(Sample {
                wall_time: Duration::from_millis(10),
                cpu_time: None,
                thread_count: 1,
            });
        }
        assert!(!monitor.current_estimate().is_ready());
        // Mean latency still works without CPU measurements.
        assert_eq!(monitor.mean_wall_time(), Some(Duration::from_millis(10)));
    }

    #[test]
    fn test_mean_wall_time() {
        let mut monitor = BlockingRatioMonitor::new(16, 1);
        monitor.record(sample(10, 1));
        monitor.record(sample(30, 1));
        assert_eq!(monitor.mean_wall_time(), Some(Duration::from_millis(20)));
    }

    #[cfg(unix)]
    #[test]
    fn test_thread_cpu_clock_advances() {
        let clock = ThreadCpuClock;
        let start = clock.thread_cpu_time().expect("unix thread CPU clock");
        // Burn a little CPU so the clock has something to show.
        let mut acc = 0u64;
        for i in 0..2_000_000u64 {
            acc = acc.wrapping_add(std::hint::black_box(i));
        }
        std::hint::black_box(acc);
        let end = clock.thread_cpu_time().unwrap();
        assert!(end >= start);
    }

    #[test]
    fn test_wall_clock_only_reports_none() {
        assert_eq!(WallClockOnly.thread_cpu_time(), None);
    }
}
