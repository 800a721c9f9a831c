//! Configuration types for crest-rs.

use std::time::Duration;

use prometheus::Registry;
use serde::{Deserialize, Serialize};

use crate::error::{CrestError, Result};

/// Configuration for an [`AdaptivePool`](crate::AdaptivePool).
///
/// This struct can be deserialized from TOML, YAML, JSON, or environment
/// variables using figment. All fields have defaults; [`PoolConfig::validate`]
/// is applied at build time.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct PoolConfig {
    /// Thread name and metric prefix (default: "crest").
    #[serde(default = "default_prefix")]
    pub prefix: String,

    /// Minimum number of worker threads (default: 1).
    #[serde(default = "default_min_workers")]
    pub min_workers: usize,

    /// Maximum number of worker threads, or None for available parallelism.
    #[serde(default)]
    pub max_workers: Option<usize>,

    /// Blocking-ratio threshold: at or above it the pool scales up, below it
    /// (sustained) the pool scales down (default: 0.3).
    #[serde(default = "default_blocking_threshold")]
    pub blocking_threshold: f64,

    /// Monitor tick interval in milliseconds (default: 100).
    #[serde(default = "default_monitor_interval_ms")]
    pub monitor_interval_ms: u64,

    /// Consecutive sub-threshold ticks required before retiring a worker
    /// (default: 3).
    #[serde(default = "default_hysteresis_ticks")]
    pub hysteresis_ticks: u32,

    /// Capacity of the bounded submission queue (default: 1024).
    #[serde(default = "default_queue_capacity")]
    pub queue_capacity: usize,

    /// Queue-admission timeout in milliseconds, or None to block until a
    /// slot frees up. Applies only to admission, never to task execution.
    #[serde(default)]
    pub submit_timeout_ms: Option<u64>,

    /// Number of recent samples the blocking-ratio window retains
    /// (default: 200).
    #[serde(default = "default_window_capacity")]
    pub window_capacity: usize,

    /// Minimum samples before the blocking-ratio estimate is usable
    /// (default: 5).
    #[serde(default = "default_min_samples")]
    pub min_samples: usize,

    /// Prometheus registry for metrics exposition.
    /// Not serializable - must be set programmatically.
    #[serde(skip)]
    pub prometheus_registry: Option<Registry>,
}

fn default_prefix() -> String {
    "crest".to_string()
}

fn default_min_workers() -> usize {
    1
}

fn default_blocking_threshold() -> f64 {
    0.3
}

fn default_monitor_interval_ms() -> u64 {
    100
}

fn default_hysteresis_ticks() -> u32 {
    3
}

fn default_queue_capacity() -> usize {
    1024
}

fn default_window_capacity() -> usize {
    200
}

fn default_min_samples() -> usize {
    5
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            prefix: default_prefix(),
            min_workers: default_min_workers(),
            max_workers: None,
            blocking_threshold: default_blocking_threshold(),
            monitor_interval_ms: default_monitor_interval_ms(),
            hysteresis_ticks: default_hysteresis_ticks(),
            queue_capacity: default_queue_capacity(),
            submit_timeout_ms: None,
            window_capacity: default_window_capacity(),
            min_samples: default_min_samples(),
            prometheus_registry: None,
        }
    }
}

impl PoolConfig {
    /// Create a new configuration with default values.
    pub fn new() -> Self {
        Self::default()
    }

    /// Get the effective maximum worker count.
    ///
    /// Returns the configured value or the machine's available parallelism.
    pub fn effective_max_workers(&self) -> usize {
        self.max_workers.unwrap_or_else(|| {
            std::thread::available_parallelism()
                .map(|n| n.get())
                .unwrap_or(4)
        })
    }

    /// Monitor tick interval as a [`Duration`].
    pub fn monitor_interval(&self) -> Duration {
        Duration::from_millis(self.monitor_interval_ms)
    }

    /// Queue-admission timeout as a [`Duration`], if configured.
    pub fn submit_timeout(&self) -> Option<Duration> {
        self.submit_timeout_ms.map(Duration::from_millis)
    }

    /// Validate constructor arguments.
    ///
    /// # Errors
    ///
    /// Returns [`CrestError::InvalidConfig`] naming the offending field.
    pub fn validate(&self) -> Result<()> {
        if self.min_workers < 1 {
            return Err(CrestError::InvalidConfig("min_workers must be >= 1".into()));
        }
        let max = self.effective_max_workers();
        if max < self.min_workers {
            return Err(CrestError::InvalidConfig(format!(
                "max_workers ({}) must be >= min_workers ({})",
                max, self.min_workers
            )));
        }
        if !(self.blocking_threshold > 0.0 && self.blocking_threshold < 1.0) {
            return Err(CrestError::InvalidConfig(
                "blocking_threshold must be in (0, 1)".into(),
            ));
        }
        if self.monitor_interval_ms == 0 {
            return Err(CrestError::InvalidConfig(
                "monitor_interval_ms must be > 0".into(),
            ));
        }
        if self.hysteresis_ticks < 1 {
            return Err(CrestError::InvalidConfig(
                "hysteresis_ticks must be >= 1".into(),
            ));
        }
        if self.queue_capacity < 1 {
            return Err(CrestError::InvalidConfig(
                "queue_capacity must be >= 1".into(),
            ));
        }
        if self.window_capacity < 1 {
            return Err(CrestError::InvalidConfig(
                "window_capacity must be >= 1".into(),
            ));
        }
        if self.min_samples < 1 {
            return Err(CrestError::InvalidConfig("min_samples must be >= 1".into()));
        }
        Ok(())
    }
}

/// Configuration for a saturation-cliff profiling run.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ProfileConfig {
    /// Largest thread count to test (default: available parallelism).
    #[serde(default = "default_max_threads")]
    pub max_threads: usize,

    /// How long each thread-count level runs, in milliseconds (default: 1000).
    #[serde(default = "default_duration_per_level_ms")]
    pub duration_per_level_ms: u64,

    /// Single-threaded warmup invocations before the first level
    /// (default: 10).
    #[serde(default = "default_warmup_iterations")]
    pub warmup_iterations: usize,

    /// Fractional throughput drop from the best level so far that declares a
    /// cliff (default: 0.2).
    #[serde(default = "default_cliff_drop")]
    pub cliff_drop: f64,
}

fn default_max_threads() -> usize {
    std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(4)
}

fn default_duration_per_level_ms() -> u64 {
    1000
}

fn default_warmup_iterations() -> usize {
    10
}

fn default_cliff_drop() -> f64 {
    0.2
}

impl Default for ProfileConfig {
    fn default() -> Self {
        Self {
            max_threads: default_max_threads(),
            duration_per_level_ms: default_duration_per_level_ms(),
            warmup_iterations: default_warmup_iterations(),
            cliff_drop: default_cliff_drop(),
        }
    }
}

impl ProfileConfig {
    /// Create a new profiling config with defaults.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the largest thread count to test.
    pub fn max_threads(mut self, n: usize) -> Self {
        self.max_threads = n;
        self
    }

    /// Set the per-level run duration in milliseconds.
    pub fn duration_per_level_ms(mut self, ms: u64) -> Self {
        self.duration_per_level_ms = ms;
        self
    }

    /// Set the number of warmup invocations.
    pub fn warmup_iterations(mut self, n: usize) -> Self {
        self.warmup_iterations = n;
        self
    }

    /// Set the fractional throughput drop that declares a cliff.
    pub fn cliff_drop(mut self, drop: f64) -> Self {
        self.cliff_drop = drop;
        self
    }

    /// Per-level run duration as a [`Duration`].
    pub fn duration_per_level(&self) -> Duration {
        Duration::from_millis(self.duration_per_level_ms)
    }

    /// Validate profiling arguments.
    pub fn validate(&self) -> Result<()> {
        if self.max_threads < 1 {
            return Err(CrestError::InvalidConfig("max_threads must be >= 1".into()));
        }
        if self.duration_per_level_ms == 0 {
            return Err(CrestError::InvalidConfig(
                "duration_per_level_ms must be > 0".into(),
            ));
        }
        if !(self.cliff_drop > 0.0 && self.cliff_drop < 1.0) {
            return Err(CrestError::InvalidConfig(
                "cliff_drop must be in (0, 1)".into(),
            ));
        }
        Ok(())
    }
}
