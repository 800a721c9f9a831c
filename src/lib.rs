//! # crest-rs
//!
//! **Ride the throughput crest, stop before the cliff**
//!
//! Adaptive concurrency control for batches of independent tasks. Naively
//! adding threads to a workload can *reduce* throughput past a saturation
//! cliff - lock contention, cache-line thrashing, scheduler overhead - and
//! the right worker count differs for I/O-bound versus CPU-bound work.
//! crest-rs decides the worker count at runtime from the observed blocking
//! ratio, and discovers the right count offline with an exponential
//! saturation-cliff profiler.
//!
//! ## Features
//!
//! - **Blocking-ratio monitor**: rolling estimate of β = 1 − (CPU time /
//!   wall time) over recently completed tasks
//! - **Adaptive pool**: bounded worker set resized one worker per tick on
//!   the β signal, with hysteresis against noisy readings
//! - **Saturation-cliff profiler**: measures throughput at 1, 2, 4, 8, ...
//!   threads and reports the optimal count and any cliff
//! - **Safety veto**: a pure decision function that rejects parallelism
//!   when it cannot pay for its own overhead
//! - **Flexible configuration**: files (TOML/YAML/JSON), environment
//!   variables, code, or clap CLI overrides
//! - **Prometheus metrics**: always-on counters and gauges, registry
//!   optional
//!
//! ## Quick Start
//!
//! ```ignore
//! use crest_rs::{PoolBuilder, VetoPolicy};
//!
//! fn main() -> crest_rs::Result<()> {
//!     let pool = PoolBuilder::new()
//!         .prefix("myapp")
//!         .min_workers(1)
//!         .max_workers(8)
//!         .build()?;
//!
//!     // Ordered parallel map; the pool sizes itself while it runs.
//!     let results = pool.map(|x| expensive(x), inputs)?;
//!
//!     // Or let the veto fall back to sequential when it will not pay off.
//!     let (results, decision) =
//!         pool.map_with_veto(|x| expensive(x), inputs, 2.5, &VetoPolicy::default(), None);
//!
//!     let snapshot = pool.metrics();
//!     println!("workers={} β={:?}", snapshot.active_workers, snapshot.beta);
//!
//!     pool.shutdown(true);
//!     Ok(())
//! }
//! ```
//!
//! ## Profiling a workload shape
//!
//! ```ignore
//! use crest_rs::{profile, ProfileConfig};
//!
//! let analysis = profile(|| run_one_item(), &ProfileConfig::new().max_threads(16))?;
//! match analysis.cliff_threads {
//!     Some(cliff) => println!("cliff at {} threads; use {}", cliff, analysis.optimal_threads),
//!     None => println!("scales cleanly to {} threads", analysis.optimal_threads),
//! }
//! ```
//!
//! ## Configuration
//!
//! Configuration sources are merged in order (later sources override
//! earlier): defaults, config files, environment variables, programmatic
//! overrides, CLI arguments.
//!
//! ```toml
//! prefix = "myapp"
//! min_workers = 1
//! max_workers = 8
//! blocking_threshold = 0.3
//! monitor_interval_ms = 100
//! hysteresis_ticks = 3
//! ```
//!
//! With `.env_prefix("CREST")`: `CREST_MIN_WORKERS=2`,
//! `CREST_BLOCKING_THRESHOLD=0.5`, and so on.

pub mod builder;
pub mod config;
pub mod error;
pub mod metrics;
pub mod monitor;
pub mod pool;
pub mod profiler;
pub mod veto;

pub use builder::{CrestArgs, PoolBuilder};
pub use config::{PoolConfig, ProfileConfig};
pub use error::{CrestError, Result};
pub use metrics::CrestMetrics;
pub use monitor::{
    default_cpu_time_source, BetaEstimate, BlockingRatio, BlockingRatioMonitor, CpuTimeSource,
    Sample, WallClockOnly,
};
#[cfg(unix)]
pub use monitor::ThreadCpuClock;
pub use pool::{AdaptivePool, PoolMetricsSnapshot, PoolState, ScalePhase, TaskHandle};
pub use profiler::{profile, CliffAnalysis, ProfileLevel, WorkloadError};
pub use veto::{decide, VetoDecision, VetoPolicy, VetoReason, VetoRequest};
