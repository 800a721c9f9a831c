//! Metrics exposition for crest pools.
//!
//! Counters and gauges are always maintained (atomic operations only) and
//! can optionally be registered with a Prometheus `Registry` for scraping.
//!
//! # Available Metrics
//!
//! ## Gauges (current values)
//!
//! - `crest_active_workers` - Worker threads currently in the pool
//! - `crest_blocking_ratio` - Rolling blocking-ratio estimate β
//! - `crest_queue_depth` - Tasks waiting in the submission queue
//! - `crest_throughput_ops` - Completed tasks per second
//!
//! ## Counters (cumulative)
//!
//! - `crest_tasks_completed` - Tasks that ran to completion
//! - `crest_tasks_failed` - Tasks that panicked
//! - `crest_tasks_cancelled` - Queued tasks cancelled at shutdown
//! - `crest_samples_discarded` - Malformed samples dropped by the monitor
//! - `crest_scale_up_total` - Workers added by the monitor
//! - `crest_scale_down_total` - Workers retired by the monitor

mod prometheus;

pub use prometheus::CrestMetrics;
