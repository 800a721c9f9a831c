//! Adaptive worker pool.
//!
//! The pool executes submitted tasks on a bounded, dynamically resized set
//! of worker threads. A background monitor thread owned by the pool drains
//! completed-task samples once per tick, recomputes the blocking ratio β,
//! and moves the worker count by at most one per tick: up when β says the
//! workers are mostly waiting, down (after hysteresis) when they are mostly
//! burning CPU and more threads would only add contention.
//!
//! # Concurrency discipline
//!
//! One coarse lock protects the worker set, the scaling phase, and the
//! latest metrics snapshot. It is held only for a scaling decision or a
//! snapshot swap - task execution never touches it. Workers hand completed
//! samples to the monitor through a bounded lock-free queue, so task
//! completion never contends on the scaling lock either.

use std::mem;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use crossbeam_channel::{bounded, Receiver, RecvTimeoutError, SendTimeoutError, Sender, TryRecvError};
use crossbeam_queue::ArrayQueue;
use parking_lot::Mutex;
use tracing::{debug, info, warn};

use crate::config::PoolConfig;
use crate::error::{CrestError, Result};
use crate::metrics::CrestMetrics;
use crate::monitor::{
    default_cpu_time_source, BetaEstimate, BlockingRatioMonitor, CpuTimeSource, Sample,
};
use crate::profiler::CliffAnalysis;
use crate::veto::{decide, VetoDecision, VetoPolicy, VetoRequest};

/// How often an idle worker wakes up to check its retire flag.
const WORKER_POLL: Duration = Duration::from_millis(20);

/// Pool lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PoolState {
    /// Constructed, workers not yet accepting tasks.
    Created,
    /// Accepting and executing tasks.
    Running,
    /// No longer accepting submissions; draining or cancelling.
    ShuttingDown,
    /// All owned threads accounted for.
    Stopped,
}

/// Scaling sub-state of a running pool, updated once per monitor tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScalePhase {
    /// No change this tick.
    Stable,
    /// A worker was added this tick.
    ScalingUp,
    /// A worker was retired this tick.
    ScalingDown,
}

/// Read-only view of the pool produced on every monitor tick.
#[derive(Debug, Clone, PartialEq)]
pub struct PoolMetricsSnapshot {
    /// Worker threads currently in the pool.
    pub active_workers: usize,
    /// Rolling blocking-ratio estimate.
    pub beta: BetaEstimate,
    /// Completed tasks per second over the last tick.
    pub throughput_ops: f64,
    /// Mean task wall time over the sample window.
    pub avg_latency: Duration,
    /// Tasks waiting in the submission queue.
    pub queue_depth: usize,
    /// When this snapshot was taken.
    pub timestamp: Instant,
}

/// Handle to a submitted task's eventual result.
#[derive(Debug)]
pub struct TaskHandle<R> {
    rx: Receiver<Result<R>>,
}

impl<R> TaskHandle<R> {
    /// Block until the task resolves.
    ///
    /// Resolves to the task's value, [`CrestError::Task`] if it panicked,
    /// [`CrestError::Cancelled`] if it was cancelled before starting, or
    /// [`CrestError::PoolFailure`] if the pool died underneath it.
    pub fn join(self) -> Result<R> {
        self.rx
            .recv()
            .unwrap_or_else(|_| Err(CrestError::PoolFailure))
    }

    /// Non-blocking poll: `None` while the task is still pending.
    pub fn try_join(&self) -> Option<Result<R>> {
        match self.rx.try_recv() {
            Ok(result) => Some(result),
            Err(TryRecvError::Empty) => None,
            Err(TryRecvError::Disconnected) => Some(Err(CrestError::PoolFailure)),
        }
    }
}

/// A queued unit of work.
///
/// `execute` runs the task (catching its panic) and reports success;
/// `cancel` resolves the caller's handle without running anything.
struct Job {
    execute: Box<dyn FnOnce() -> bool + Send>,
    cancel: Box<dyn FnOnce(CrestError) + Send>,
}

struct WorkerHandle {
    join: JoinHandle<()>,
    retire: Arc<AtomicBool>,
}

struct Shared {
    lifecycle: PoolState,
    phase: ScalePhase,
    workers: Vec<WorkerHandle>,
    /// Retired workers not yet joined; joined at shutdown.
    retired: Vec<JoinHandle<()>>,
    snapshot: PoolMetricsSnapshot,
    next_worker_id: usize,
}

struct Inner {
    config: PoolConfig,
    shared: Mutex<Shared>,
    /// `None` once the pool stops accepting submissions.
    jobs_tx: Mutex<Option<Sender<Job>>>,
    jobs_rx: Receiver<Job>,
    /// Worker -> monitor sample handoff. Bounded; overflow drops samples.
    samples: ArrayQueue<Sample>,
    /// Workers currently inside their loop (includes retiring ones).
    active: AtomicUsize,
    completed: AtomicU64,
    poisoned: AtomicBool,
    /// Dropped at shutdown to wake the monitor out of its tick sleep.
    monitor_stop: Mutex<Option<Sender<()>>>,
    cpu: Arc<dyn CpuTimeSource>,
    metrics: CrestMetrics,
}

/// Self-tuning worker pool driven by the blocking ratio.
///
/// # Example
///
/// ```ignore
/// use crest_rs::PoolBuilder;
///
/// let pool = PoolBuilder::new().min_workers(1).max_workers(8).build()?;
///
/// let handle = pool.submit(|| fetch_record(42));
/// let results = pool.map(|x| x * 2, (0..1000).collect())?;
///
/// let snapshot = pool.metrics();
/// println!("workers: {}", snapshot.active_workers);
///
/// pool.shutdown(true);
/// ```
pub struct AdaptivePool {
    inner: Arc<Inner>,
    monitor: Mutex<Option<JoinHandle<()>>>,
}

impl AdaptivePool {
    /// Create a pool from a validated configuration.
    ///
    /// This is typically called via [`PoolBuilder::build`](crate::PoolBuilder::build).
    pub fn new(config: PoolConfig) -> Result<Self> {
        Self::from_config(config, None)
    }

    pub(crate) fn from_config(
        config: PoolConfig,
        cpu: Option<Arc<dyn CpuTimeSource>>,
    ) -> Result<Self> {
        config.validate()?;

        let max_workers = config.effective_max_workers();
        let (jobs_tx, jobs_rx) = bounded(config.queue_capacity);
        let metrics = CrestMetrics::with_prefix(&config.prefix);
        if let Some(ref registry) = config.prometheus_registry {
            if let Err(e) = metrics.register(registry) {
                warn!(%e, "failed to register prometheus metrics");
            }
        }
        let cpu = cpu.unwrap_or_else(default_cpu_time_source);

        info!(
            prefix = %config.prefix,
            min_workers = config.min_workers,
            max_workers,
            blocking_threshold = config.blocking_threshold,
            monitor_interval_ms = config.monitor_interval_ms,
            "building adaptive pool"
        );

        let snapshot = PoolMetricsSnapshot {
            active_workers: config.min_workers,
            beta: BetaEstimate::Insufficient { sample_count: 0 },
            throughput_ops: 0.0,
            avg_latency: Duration::ZERO,
            queue_depth: 0,
            timestamp: Instant::now(),
        };
        let sample_capacity = config.window_capacity * 2;

        let inner = Arc::new(Inner {
            shared: Mutex::new(Shared {
                lifecycle: PoolState::Created,
                phase: ScalePhase::Stable,
                workers: Vec::new(),
                retired: Vec::new(),
                snapshot,
                next_worker_id: 0,
            }),
            jobs_tx: Mutex::new(Some(jobs_tx)),
            jobs_rx,
            samples: ArrayQueue::new(sample_capacity),
            active: AtomicUsize::new(0),
            completed: AtomicU64::new(0),
            poisoned: AtomicBool::new(false),
            monitor_stop: Mutex::new(None),
            cpu,
            metrics,
            config,
        });

        {
            let mut shared = inner.shared.lock();
            for _ in 0..inner.config.min_workers {
                let handle = spawn_worker(&inner, &mut shared)?;
                shared.workers.push(handle);
            }
            shared.lifecycle = PoolState::Running;
        }
        inner
            .metrics
            .active_workers
            .set(inner.config.min_workers as i64);

        let monitor = spawn_monitor(&inner)?;

        Ok(Self {
            inner,
            monitor: Mutex::new(Some(monitor)),
        })
    }

    /// Enqueue a unit of work.
    ///
    /// Non-blocking unless the submission queue is full, in which case it
    /// blocks up to the configured admission timeout.
    ///
    /// # Errors
    ///
    /// [`CrestError::SubmissionTimeout`] when the queue stayed full past the
    /// timeout, [`CrestError::PoolClosed`] after shutdown,
    /// [`CrestError::PoolFailure`] when the pool is poisoned.
    pub fn submit<F, R>(&self, f: F) -> Result<TaskHandle<R>>
    where
        F: FnOnce() -> R + Send + 'static,
        R: Send + 'static,
    {
        if self.inner.poisoned.load(Ordering::Acquire) {
            return Err(CrestError::PoolFailure);
        }
        let tx = match self.inner.jobs_tx.lock().as_ref() {
            Some(tx) => tx.clone(),
            None => return Err(CrestError::PoolClosed),
        };

        let (result_tx, result_rx) = bounded::<Result<R>>(1);
        let cancel_tx = result_tx.clone();
        let job = Job {
            execute: Box::new(move || match catch_unwind(AssertUnwindSafe(f)) {
                Ok(value) => {
                    let _ = result_tx.send(Ok(value));
                    true
                }
                Err(payload) => {
                    let _ = result_tx.send(Err(CrestError::Task(panic_message(payload.as_ref()))));
                    false
                }
            }),
            cancel: Box::new(move |err: CrestError| {
                let _ = cancel_tx.send(Err(err));
            }),
        };

        match self.inner.config.submit_timeout() {
            Some(timeout) => match tx.send_timeout(job, timeout) {
                Ok(()) => {}
                Err(SendTimeoutError::Timeout(_)) => {
                    return Err(CrestError::SubmissionTimeout(timeout));
                }
                Err(SendTimeoutError::Disconnected(_)) => return Err(CrestError::PoolClosed),
            },
            None => tx.send(job).map_err(|_| CrestError::PoolClosed)?,
        }

        Ok(TaskHandle { rx: result_rx })
    }

    /// Apply `f` to every item, returning results in input order.
    ///
    /// Fail-fast policy: if any task panics, the first failure (by input
    /// order) is returned after every sibling has finished running. Use
    /// [`AdaptivePool::map_collect`] to get per-item outcomes instead.
    pub fn map<T, R, F>(&self, f: F, items: Vec<T>) -> Result<Vec<R>>
    where
        F: Fn(T) -> R + Send + Sync + 'static,
        T: Send + 'static,
        R: Send + 'static,
    {
        let count = items.len();
        let mut out = Vec::with_capacity(count);
        let mut first_err = None;
        for result in self.map_collect(f, items) {
            match result {
                Ok(value) => out.push(value),
                Err(e) => {
                    if first_err.is_none() {
                        first_err = Some(e);
                    }
                }
            }
        }
        match first_err {
            None => Ok(out),
            Some(e) => Err(e),
        }
    }

    /// Apply `f` to every item, collecting a per-item outcome in input order.
    ///
    /// A panicking task fails only its own position; unaffected tasks
    /// continue running.
    pub fn map_collect<T, R, F>(&self, f: F, items: Vec<T>) -> Vec<Result<R>>
    where
        F: Fn(T) -> R + Send + Sync + 'static,
        T: Send + 'static,
        R: Send + 'static,
    {
        let f = Arc::new(f);
        let handles: Vec<Result<TaskHandle<R>>> = items
            .into_iter()
            .map(|item| {
                let f = Arc::clone(&f);
                self.submit(move || f(item))
            })
            .collect();

        handles
            .into_iter()
            .map(|handle| match handle {
                Ok(handle) => handle.join(),
                Err(e) => Err(e),
            })
            .collect()
    }

    /// Apply `f` to every item if the safety veto approves, otherwise run
    /// sequentially on the calling thread.
    ///
    /// The veto consults the live blocking-ratio estimate, the supplied
    /// cliff analysis (if any), and the caller-estimated speedup. The
    /// decision is returned alongside the results so callers can log it.
    pub fn map_with_veto<T, R, F>(
        &self,
        f: F,
        items: Vec<T>,
        estimated_speedup: f64,
        policy: &VetoPolicy,
        cliff: Option<&CliffAnalysis>,
    ) -> (Result<Vec<R>>, VetoDecision)
    where
        F: Fn(T) -> R + Send + Sync + 'static,
        T: Send + 'static,
        R: Send + 'static,
    {
        let snapshot = self.metrics();
        let request = VetoRequest {
            item_count: items.len(),
            estimated_speedup,
            beta: &snapshot.beta,
            cliff,
            intended_threads: self.inner.config.effective_max_workers(),
        };
        let decision = decide(&request, policy);

        if decision.approved {
            (self.map(f, items), decision)
        } else {
            debug!(
                reason = ?decision.reason,
                items = decision.item_count,
                "parallelism vetoed; running sequentially"
            );
            (Ok(items.into_iter().map(f).collect()), decision)
        }
    }

    /// Latest metrics snapshot. Never blocks on worker activity; calling it
    /// twice with no intervening monitor tick returns equal snapshots.
    pub fn metrics(&self) -> PoolMetricsSnapshot {
        self.inner.shared.lock().snapshot.clone()
    }

    /// Prometheus metrics for this pool.
    pub fn prometheus_metrics(&self) -> &CrestMetrics {
        &self.inner.metrics
    }

    /// Current lifecycle state.
    pub fn state(&self) -> PoolState {
        self.inner.shared.lock().lifecycle
    }

    /// Scaling sub-state from the latest monitor tick.
    pub fn scale_phase(&self) -> ScalePhase {
        self.inner.shared.lock().phase
    }

    /// Number of workers currently in the pool.
    pub fn active_workers(&self) -> usize {
        self.inner.shared.lock().workers.len()
    }

    /// The resolved configuration.
    pub fn config(&self) -> &PoolConfig {
        &self.inner.config
    }

    /// Stop accepting new submissions.
    ///
    /// With `wait = true`, blocks until all queued and in-flight tasks
    /// complete and the monitor thread exits. With `wait = false`, cancels
    /// queued-but-unstarted tasks (their handles resolve to
    /// [`CrestError::Cancelled`]) and returns immediately; in-flight tasks
    /// finish in the background.
    pub fn shutdown(&self, wait: bool) {
        {
            let mut shared = self.inner.shared.lock();
            match shared.lifecycle {
                PoolState::Created | PoolState::Running => {
                    shared.lifecycle = PoolState::ShuttingDown;
                }
                PoolState::ShuttingDown | PoolState::Stopped => return,
            }
        }

        // Dropping the sender stops admission; workers drain what remains.
        let tx = self.inner.jobs_tx.lock().take();
        drop(tx);

        if !wait {
            let mut cancelled = 0u64;
            while let Ok(job) = self.inner.jobs_rx.try_recv() {
                (job.cancel)(CrestError::Cancelled);
                cancelled += 1;
            }
            if cancelled > 0 {
                self.inner.metrics.tasks_cancelled.inc_by(cancelled);
                debug!(cancelled, "cancelled queued tasks");
            }
        }

        let stop = self.inner.monitor_stop.lock().take();
        drop(stop);
        if let Some(monitor) = self.monitor.lock().take() {
            let _ = monitor.join();
        }

        if wait {
            let (workers, retired) = {
                let mut shared = self.inner.shared.lock();
                (
                    mem::take(&mut shared.workers),
                    mem::take(&mut shared.retired),
                )
            };
            for handle in workers {
                let _ = handle.join.join();
            }
            for join in retired {
                let _ = join.join();
            }
        }

        self.inner.shared.lock().lifecycle = PoolState::Stopped;
        info!(prefix = %self.inner.config.prefix, "pool stopped");
    }
}

impl Drop for AdaptivePool {
    fn drop(&mut self) {
        self.shutdown(true);
    }
}

impl std::fmt::Debug for AdaptivePool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let shared = self.inner.shared.lock();
        f.debug_struct("AdaptivePool")
            .field("lifecycle", &shared.lifecycle)
            .field("phase", &shared.phase)
            .field("active_workers", &shared.workers.len())
            .finish()
    }
}

/// What the monitor should do with the worker count this tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ScaleAction {
    Grow,
    Shrink,
    Hold,
}

/// One transition per tick, never more than one worker either way.
///
/// Scale-up requires a usable β at or above the threshold; scale-down
/// requires `hysteresis_ticks` consecutive sub-threshold readings so one
/// noisy measurement cannot retire a worker. "Insufficient data" holds and
/// resets the hysteresis run.
fn next_scale_action(
    estimate: &BetaEstimate,
    active: usize,
    min_workers: usize,
    max_workers: usize,
    threshold: f64,
    hysteresis_ticks: u32,
    below_ticks: &mut u32,
) -> ScaleAction {
    match estimate {
        BetaEstimate::Insufficient { .. } => {
            *below_ticks = 0;
            ScaleAction::Hold
        }
        BetaEstimate::Ready(ratio) => {
            if ratio.beta >= threshold {
                *below_ticks = 0;
                if active < max_workers {
                    ScaleAction::Grow
                } else {
                    ScaleAction::Hold
                }
            } else {
                *below_ticks += 1;
                if *below_ticks >= hysteresis_ticks && active > min_workers {
                    *below_ticks = 0;
                    ScaleAction::Shrink
                } else {
                    ScaleAction::Hold
                }
            }
        }
    }
}

fn spawn_worker(inner: &Arc<Inner>, shared: &mut Shared) -> Result<WorkerHandle> {
    let id = shared.next_worker_id;
    shared.next_worker_id += 1;

    let retire = Arc::new(AtomicBool::new(false));
    let retire_flag = Arc::clone(&retire);
    let inner_ref = Arc::clone(inner);
    inner.active.fetch_add(1, Ordering::Release);

    let join = thread::Builder::new()
        .name(format!("{}-worker-{:04}", inner.config.prefix, id))
        .spawn(move || {
            let outcome = catch_unwind(AssertUnwindSafe(|| worker_loop(&inner_ref, &retire_flag)));
            inner_ref.active.fetch_sub(1, Ordering::Release);
            if outcome.is_err() {
                // A panic past the task wrapper means the harness itself is
                // broken, not the task: poison the whole pool.
                inner_ref.poisoned.store(true, Ordering::Release);
                warn!("worker harness crashed; pool poisoned");
            }
        })
        .map_err(CrestError::from)?;

    Ok(WorkerHandle { join, retire })
}

fn worker_loop(inner: &Inner, retire: &AtomicBool) {
    loop {
        if retire.load(Ordering::Acquire) {
            debug!("worker retiring");
            break;
        }
        match inner.jobs_rx.recv_timeout(WORKER_POLL) {
            Ok(job) => {
                let wall_start = Instant::now();
                let cpu_start = inner.cpu.thread_cpu_time();
                let ok = (job.execute)();
                let wall_time = wall_start.elapsed();
                let cpu_time = match (cpu_start, inner.cpu.thread_cpu_time()) {
                    (Some(start), Some(end)) => Some(end.saturating_sub(start)),
                    _ => None,
                };

                let _ = inner.samples.push(Sample {
                    wall_time,
                    cpu_time,
                    thread_count: inner.active.load(Ordering::Relaxed),
                });
                inner.completed.fetch_add(1, Ordering::Relaxed);
                inner.metrics.record_task(ok);
            }
            Err(RecvTimeoutError::Timeout) => continue,
            Err(RecvTimeoutError::Disconnected) => break,
        }
    }
}

fn spawn_monitor(inner: &Arc<Inner>) -> Result<JoinHandle<()>> {
    let (stop_tx, stop_rx) = bounded::<()>(1);
    *inner.monitor_stop.lock() = Some(stop_tx);
    let inner_ref = Arc::clone(inner);
    thread::Builder::new()
        .name(format!("{}-monitor", inner.config.prefix))
        .spawn(move || monitor_loop(&inner_ref, stop_rx))
        .map_err(CrestError::from)
}

fn monitor_loop(inner: &Arc<Inner>, stop_rx: Receiver<()>) {
    let interval = inner.config.monitor_interval();
    let max_workers = inner.config.effective_max_workers();
    let mut window =
        BlockingRatioMonitor::new(inner.config.window_capacity, inner.config.min_samples);
    let mut below_ticks = 0u32;
    let mut last_completed = 0u64;
    let mut last_discarded = 0u64;

    loop {
        match stop_rx.recv_timeout(interval) {
            Ok(()) | Err(RecvTimeoutError::Disconnected) => break,
            Err(RecvTimeoutError::Timeout) => {}
        }
        if inner.poisoned.load(Ordering::Acquire) {
            warn!("pool poisoned; failing pending submissions");
            fail_pending(inner);
            break;
        }

        while let Some(sample) = inner.samples.pop() {
            window.record(sample);
        }
        if window.discarded() > last_discarded {
            inner
                .metrics
                .samples_discarded
                .inc_by(window.discarded() - last_discarded);
            last_discarded = window.discarded();
        }

        let estimate = window.current_estimate();
        let completed = inner.completed.load(Ordering::Relaxed);
        let throughput_ops = (completed - last_completed) as f64 / interval.as_secs_f64();
        last_completed = completed;
        let avg_latency = window.mean_wall_time().unwrap_or(Duration::ZERO);

        let mut shared = inner.shared.lock();
        if shared.lifecycle == PoolState::Running {
            let action = next_scale_action(
                &estimate,
                shared.workers.len(),
                inner.config.min_workers,
                max_workers,
                inner.config.blocking_threshold,
                inner.config.hysteresis_ticks,
                &mut below_ticks,
            );
            match action {
                ScaleAction::Grow => match spawn_worker(inner, &mut shared) {
                    Ok(handle) => {
                        shared.workers.push(handle);
                        shared.phase = ScalePhase::ScalingUp;
                        inner.metrics.record_scale(true);
                        debug!(
                            active = shared.workers.len(),
                            beta = estimate.beta(),
                            "scaled up"
                        );
                    }
                    Err(e) => {
                        shared.phase = ScalePhase::Stable;
                        warn!(%e, "failed to add worker");
                    }
                },
                ScaleAction::Shrink => {
                    if let Some(handle) = shared.workers.pop() {
                        handle.retire.store(true, Ordering::Release);
                        shared.retired.push(handle.join);
                        shared.phase = ScalePhase::ScalingDown;
                        inner.metrics.record_scale(false);
                        debug!(
                            active = shared.workers.len(),
                            beta = estimate.beta(),
                            "scaled down"
                        );
                    }
                }
                ScaleAction::Hold => shared.phase = ScalePhase::Stable,
            }
        }

        let active = shared.workers.len();
        shared.snapshot = PoolMetricsSnapshot {
            active_workers: active,
            beta: estimate,
            throughput_ops,
            avg_latency,
            queue_depth: inner.jobs_rx.len(),
            timestamp: Instant::now(),
        };
        drop(shared);

        inner.metrics.active_workers.set(active as i64);
        inner.metrics.queue_depth.set(inner.jobs_rx.len() as i64);
        inner.metrics.throughput_ops.set(throughput_ops);
        if let Some(beta) = estimate.beta() {
            inner.metrics.blocking_ratio.set(beta);
        }
    }
}

/// Poison path: stop admission and resolve every queued handle with
/// [`CrestError::PoolFailure`].
fn fail_pending(inner: &Inner) {
    let tx = inner.jobs_tx.lock().take();
    drop(tx);
    {
        let mut shared = inner.shared.lock();
        shared.lifecycle = PoolState::ShuttingDown;
        shared.phase = ScalePhase::Stable;
    }
    while let Ok(job) = inner.jobs_rx.try_recv() {
        (job.cancel)(CrestError::PoolFailure);
    }
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&'static str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic payload".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::monitor::BlockingRatio;

    fn ready(beta: f64) -> BetaEstimate {
        BetaEstimate::Ready(BlockingRatio {
            beta,
            sample_count: 10,
            window_span: Duration::from_millis(500),
        })
    }

    fn small_pool(min: usize, max: usize) -> AdaptivePool {
        let config = PoolConfig {
            min_workers: min,
            max_workers: Some(max),
            // Long interval: these tests drive the pool directly, not the monitor.
            monitor_interval_ms: 60_000,
            ..Default::default()
        };
        AdaptivePool::new(config).expect("pool should build")
    }

    #[test]
    fn test_no_grow_on_insufficient_data() {
        let mut below = 0;
        let estimate = BetaEstimate::Insufficient { sample_count: 2 };
        let action = next_scale_action(&estimate, 1, 1, 8, 0.3, 3, &mut below);
        assert_eq!(action, ScaleAction::Hold);
    }

    #[test]
    fn test_no_grow_below_threshold() {
        let mut below = 0;
        let action = next_scale_action(&ready(0.2), 1, 1, 8, 0.3, 3, &mut below);
        assert_ne!(action, ScaleAction::Grow);
    }

    #[test]
    fn test_grow_at_threshold_under_max() {
        let mut below = 0;
        assert_eq!(
            next_scale_action(&ready(0.3), 2, 1, 8, 0.3, 3, &mut below),
            ScaleAction::Grow
        );
    }

    #[test]
    fn test_no_grow_at_max() {
        let mut below = 0;
        assert_eq!(
            next_scale_action(&ready(0.9), 8, 1, 8, 0.3, 3, &mut below),
            ScaleAction::Hold
        );
    }

    #[test]
    fn test_shrink_requires_consecutive_low_ticks() {
        let mut below = 0;
        for _ in 0..2 {
            assert_eq!(
                next_scale_action(&ready(0.1), 4, 1, 8, 0.3, 3, &mut below),
                ScaleAction::Hold
            );
        }
        assert_eq!(
            next_scale_action(&ready(0.1), 4, 1, 8, 0.3, 3, &mut below),
            ScaleAction::Shrink
        );
    }

    #[test]
    fn test_single_low_tick_amid_high_does_not_shrink() {
        let mut below = 0;
        next_scale_action(&ready(0.9), 8, 1, 8, 0.3, 3, &mut below);
        // One noisy low reading...
        assert_eq!(
            next_scale_action(&ready(0.1), 8, 1, 8, 0.3, 3, &mut below),
            ScaleAction::Hold
        );
        // ...followed by high readings resets the run.
        next_scale_action(&ready(0.9), 8, 1, 8, 0.3, 3, &mut below);
        assert_eq!(below, 0);
        assert_eq!(
            next_scale_action(&ready(0.1), 8, 1, 8, 0.3, 3, &mut below),
            ScaleAction::Hold
        );
    }

    #[test]
    fn test_no_shrink_at_min() {
        let mut below = 10;
        assert_eq!(
            next_scale_action(&ready(0.1), 1, 1, 8, 0.3, 3, &mut below),
            ScaleAction::Hold
        );
    }

    #[test]
    fn test_insufficient_resets_hysteresis() {
        let mut below = 0;
        next_scale_action(&ready(0.1), 4, 1, 8, 0.3, 3, &mut below);
        next_scale_action(&ready(0.1), 4, 1, 8, 0.3, 3, &mut below);
        assert_eq!(below, 2);
        next_scale_action(
            &BetaEstimate::Insufficient { sample_count: 0 },
            4,
            1,
            8,
            0.3,
            3,
            &mut below,
        );
        assert_eq!(below, 0);
    }

    #[test]
    fn test_submit_returns_value() {
        let pool = small_pool(1, 2);
        let handle = pool.submit(|| 21 * 2).unwrap();
        assert_eq!(handle.join().unwrap(), 42);
        pool.shutdown(true);
        assert_eq!(pool.state(), PoolState::Stopped);
    }

    #[test]
    fn test_task_panic_is_isolated() {
        let pool = small_pool(1, 2);
        let bad = pool.submit(|| -> i32 { panic!("task bug") }).unwrap();
        let good = pool.submit(|| 7).unwrap();

        match bad.join() {
            Err(CrestError::Task(msg)) => assert!(msg.contains("task bug")),
            other => panic!("expected task error, got {:?}", other),
        }
        assert_eq!(good.join().unwrap(), 7);
        assert!(pool.prometheus_metrics().tasks_failed.get() >= 1);
    }

    #[test]
    fn test_submit_after_shutdown_fails() {
        let pool = small_pool(1, 2);
        pool.shutdown(true);
        assert!(matches!(
            pool.submit(|| 1),
            Err(CrestError::PoolClosed)
        ));
    }

    #[test]
    fn test_map_preserves_order() {
        let pool = small_pool(2, 4);
        let items: Vec<u64> = (0..64).collect();
        let results = pool
            .map(
                |x| {
                    // Vary completion order.
                    thread::sleep(Duration::from_millis(x % 5));
                    x * 2
                },
                items,
            )
            .unwrap();
        assert_eq!(results, (0..64).map(|x| x * 2).collect::<Vec<_>>());
    }

    #[test]
    fn test_map_collect_isolates_failures() {
        let pool = small_pool(2, 4);
        let results = pool.map_collect(
            |x: u32| {
                if x == 3 {
                    panic!("item 3 is cursed");
                }
                x + 1
            },
            (0..6).collect(),
        );

        for (i, result) in results.iter().enumerate() {
            if i == 3 {
                assert!(matches!(result, Err(CrestError::Task(_))));
            } else {
                assert_eq!(*result.as_ref().unwrap(), i as u32 + 1);
            }
        }
    }

    #[test]
    fn test_map_fail_fast_reports_first_error() {
        let pool = small_pool(2, 4);
        let result = pool.map(
            |x: u32| {
                if x % 2 == 1 {
                    panic!("odd item");
                }
                x
            },
            (0..8).collect(),
        );
        assert!(matches!(result, Err(CrestError::Task(_))));
    }

    #[test]
    fn test_submission_timeout_on_full_queue() {
        let config = PoolConfig {
            min_workers: 1,
            max_workers: Some(1),
            queue_capacity: 1,
            submit_timeout_ms: Some(50),
            monitor_interval_ms: 60_000,
            ..Default::default()
        };
        let pool = AdaptivePool::new(config).unwrap();

        // Occupy the worker, then fill the single queue slot.
        let busy = pool
            .submit(|| thread::sleep(Duration::from_millis(400)))
            .unwrap();
        thread::sleep(Duration::from_millis(50));
        let queued = pool.submit(|| ()).unwrap();

        let start = Instant::now();
        match pool.submit(|| ()) {
            Err(CrestError::SubmissionTimeout(t)) => {
                assert_eq!(t, Duration::from_millis(50));
                assert!(start.elapsed() >= Duration::from_millis(45));
            }
            other => panic!("expected submission timeout, got {:?}", other),
        }

        busy.join().unwrap();
        queued.join().unwrap();
    }

    #[test]
    fn test_shutdown_nowait_cancels_queued() {
        let config = PoolConfig {
            min_workers: 1,
            max_workers: Some(1),
            monitor_interval_ms: 60_000,
            ..Default::default()
        };
        let pool = AdaptivePool::new(config).unwrap();

        let in_flight = pool
            .submit(|| {
                thread::sleep(Duration::from_millis(200));
                1
            })
            .unwrap();
        // Let the worker claim the first task before queueing more.
        thread::sleep(Duration::from_millis(50));
        let queued: Vec<_> = (0..3)
            .map(|_| pool.submit(|| 2).unwrap())
            .collect();

        pool.shutdown(false);

        for handle in queued {
            assert!(matches!(handle.join(), Err(CrestError::Cancelled)));
        }
        // The in-flight task finishes in the background.
        assert_eq!(in_flight.join().unwrap(), 1);
        assert!(pool.prometheus_metrics().tasks_cancelled.get() >= 3);
    }

    #[test]
    fn test_shutdown_is_idempotent() {
        let pool = small_pool(1, 2);
        pool.shutdown(true);
        pool.shutdown(true);
        pool.shutdown(false);
        assert_eq!(pool.state(), PoolState::Stopped);
    }

    #[test]
    fn test_handle_resolves_pool_failure_when_sender_lost() {
        let (tx, rx) = bounded::<Result<i32>>(1);
        drop(tx);
        let handle = TaskHandle { rx };
        assert!(matches!(handle.join(), Err(CrestError::PoolFailure)));
    }

    #[test]
    fn test_try_join_pending_then_ready() {
        let pool = small_pool(1, 2);
        let handle = pool
            .submit(|| {
                thread::sleep(Duration::from_millis(100));
                5
            })
            .unwrap();
        assert!(handle.try_join().is_none());
        thread::sleep(Duration::from_millis(300));
        assert_eq!(handle.try_join().unwrap().unwrap(), 5);
    }

    #[test]
    fn test_worker_bounds_respected_at_construction() {
        let pool = small_pool(2, 4);
        assert_eq!(pool.active_workers(), 2);
        let snapshot = pool.metrics();
        assert!(snapshot.active_workers >= 2 && snapshot.active_workers <= 4);
    }

    #[test]
    fn test_metrics_idempotent_without_activity() {
        let pool = small_pool(1, 2);
        let a = pool.metrics();
        let b = pool.metrics();
        assert_eq!(a, b);
    }

    #[test]
    fn test_panic_message_extracts_strings() {
        let payload: Box<dyn std::any::Any + Send> = Box::new("static str panic");
        assert_eq!(panic_message(payload.as_ref()), "static str panic");

        let payload: Box<dyn std::any::Any + Send> = Box::new(String::from("owned panic"));
        assert_eq!(panic_message(payload.as_ref()), "owned panic");

        let payload: Box<dyn std::any::Any + Send> = Box::new(42u32);
        assert_eq!(panic_message(payload.as_ref()), "unknown panic payload");
    }
}
