//! Builder pattern for constructing adaptive pools.
//!
//! The builder supports multiple configuration sources using figment:
//! - Default values
//! - Config files (TOML, YAML, JSON)
//! - Environment variables
//! - Programmatic overrides
//! - CLI arguments via clap

use std::path::Path;
use std::sync::Arc;

use figment::providers::{Env, Format, Json, Serialized, Toml, Yaml};
use figment::Figment;
use prometheus::Registry;

use crate::config::PoolConfig;
use crate::error::Result;
use crate::monitor::CpuTimeSource;
use crate::pool::AdaptivePool;

/// Builder for constructing an [`AdaptivePool`].
///
/// Configuration sources are merged in the following order (later sources
/// override earlier):
/// 1. Default values
/// 2. Config files (in order added)
/// 3. Environment variables
/// 4. Programmatic overrides
/// 5. CLI arguments (via `with_cli_args`)
///
/// # Examples
///
/// ```ignore
/// use crest_rs::PoolBuilder;
///
/// let pool = PoolBuilder::new()
///     .file("crest.toml")
///     .env_prefix("CREST")
///     .min_workers(2)
///     .max_workers(8)
///     .build()?;
/// ```
pub struct PoolBuilder {
    figment: Figment,
    prometheus_registry: Option<Registry>,
    cpu_time_source: Option<Arc<dyn CpuTimeSource>>,
}

impl Default for PoolBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for PoolBuilder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PoolBuilder")
            .field("figment", &self.figment)
            .field(
                "prometheus_registry",
                &self.prometheus_registry.as_ref().map(|_| "<Registry>"),
            )
            .field(
                "cpu_time_source",
                &self.cpu_time_source.as_ref().map(|_| "<CpuTimeSource>"),
            )
            .finish()
    }
}

impl PoolBuilder {
    /// Create a new builder with default configuration.
    pub fn new() -> Self {
        Self {
            figment: Figment::from(Serialized::defaults(PoolConfig::default())),
            prometheus_registry: None,
            cpu_time_source: None,
        }
    }

    /// Add a configuration file.
    ///
    /// Supports TOML, YAML, and JSON formats (detected by extension).
    /// Files are merged in the order they are added.
    pub fn file<P: AsRef<Path>>(mut self, path: P) -> Self {
        let path = path.as_ref();
        let extension = path.extension().and_then(|e| e.to_str()).unwrap_or("");

        self.figment = match extension.to_lowercase().as_str() {
            "toml" => self.figment.merge(Toml::file(path)),
            "yaml" | "yml" => self.figment.merge(Yaml::file(path)),
            "json" => self.figment.merge(Json::file(path)),
            _ => self.figment.merge(Toml::file(path)),
        };
        self
    }

    /// Add environment variables with a prefix.
    ///
    /// Variables are expected in the format `{PREFIX}_{KEY}`, e.g.
    /// `CREST_MIN_WORKERS`, `CREST_BLOCKING_THRESHOLD`.
    pub fn env_prefix(mut self, prefix: &str) -> Self {
        self.figment = self.figment.merge(Env::prefixed(&format!("{}_", prefix)));
        self
    }

    /// Set the thread name and metric prefix.
    ///
    /// Threads are named `{prefix}-worker-{NNNN}` and `{prefix}-monitor`.
    pub fn prefix(mut self, prefix: impl Into<String>) -> Self {
        self.figment = self
            .figment
            .merge(Serialized::default("prefix", prefix.into()));
        self
    }

    /// Set the minimum number of worker threads. Default: 1.
    pub fn min_workers(mut self, n: usize) -> Self {
        self.figment = self.figment.merge(Serialized::default("min_workers", n));
        self
    }

    /// Set the maximum number of worker threads.
    ///
    /// Default is the machine's available parallelism.
    pub fn max_workers(mut self, n: usize) -> Self {
        self.figment = self.figment.merge(Serialized::default("max_workers", n));
        self
    }

    /// Set the blocking-ratio threshold in (0, 1). Default: 0.3.
    ///
    /// At or above the threshold the monitor adds workers; sustained
    /// readings below it retire workers.
    pub fn blocking_threshold(mut self, threshold: f64) -> Self {
        self.figment = self
            .figment
            .merge(Serialized::default("blocking_threshold", threshold));
        self
    }

    /// Set the monitor tick interval in milliseconds. Default: 100.
    pub fn monitor_interval_ms(mut self, ms: u64) -> Self {
        self.figment = self
            .figment
            .merge(Serialized::default("monitor_interval_ms", ms));
        self
    }

    /// Set how many consecutive sub-threshold ticks precede a scale-down.
    /// Default: 3.
    pub fn hysteresis_ticks(mut self, ticks: u32) -> Self {
        self.figment = self
            .figment
            .merge(Serialized::default("hysteresis_ticks", ticks));
        self
    }

    /// Set the bounded submission queue capacity. Default: 1024.
    pub fn queue_capacity(mut self, capacity: usize) -> Self {
        self.figment = self
            .figment
            .merge(Serialized::default("queue_capacity", capacity));
        self
    }

    /// Set the queue-admission timeout in milliseconds.
    ///
    /// Applies only to admission on a full queue, never to task execution.
    /// Default: none (block until a slot frees up).
    pub fn submit_timeout_ms(mut self, ms: u64) -> Self {
        self.figment = self
            .figment
            .merge(Serialized::default("submit_timeout_ms", Some(ms)));
        self
    }

    /// Provide an external Prometheus registry for metrics exposition.
    ///
    /// When a registry is provided, pool metrics will be registered and
    /// available for scraping.
    pub fn prometheus_registry(mut self, registry: Registry) -> Self {
        self.prometheus_registry = Some(registry);
        self
    }

    /// Override the CPU time source.
    ///
    /// The default is the platform's per-thread CPU clock where one exists,
    /// falling back to a wall-clock-only source that keeps the blocking
    /// ratio at "insufficient data". Tests inject synthetic sources here.
    pub fn cpu_time_source(mut self, source: Arc<dyn CpuTimeSource>) -> Self {
        self.cpu_time_source = Some(source);
        self
    }

    /// Apply CLI argument overrides.
    ///
    /// This method applies any non-None values from the [`CrestArgs`] struct.
    pub fn with_cli_args(mut self, args: &CrestArgs) -> Self {
        if let Some(ref prefix) = args.crest_prefix {
            self.figment = self
                .figment
                .merge(Serialized::default("prefix", prefix.clone()));
        }
        if let Some(n) = args.crest_min_workers {
            self.figment = self.figment.merge(Serialized::default("min_workers", n));
        }
        if let Some(n) = args.crest_max_workers {
            self.figment = self.figment.merge(Serialized::default("max_workers", n));
        }
        if let Some(threshold) = args.crest_blocking_threshold {
            self.figment = self
                .figment
                .merge(Serialized::default("blocking_threshold", threshold));
        }
        if let Some(ms) = args.crest_monitor_interval_ms {
            self.figment = self
                .figment
                .merge(Serialized::default("monitor_interval_ms", ms));
        }
        self
    }

    /// Build the pool.
    ///
    /// # Errors
    ///
    /// Returns an error if configuration extraction fails, a constructor
    /// argument is out of range, or thread spawning fails.
    pub fn build(self) -> Result<AdaptivePool> {
        let mut config: PoolConfig = self.figment.extract().map_err(Box::new)?;
        config.prometheus_registry = self.prometheus_registry;
        AdaptivePool::from_config(config, self.cpu_time_source)
    }

    /// Extract the merged configuration without building a pool.
    pub fn into_config(self) -> Result<PoolConfig> {
        let mut config: PoolConfig = self.figment.extract().map_err(Box::new)?;
        config.prometheus_registry = self.prometheus_registry;
        Ok(config)
    }
}

/// CLI arguments for crest pool configuration.
///
/// Use with clap's `Parser` derive macro and apply to a [`PoolBuilder`]
/// using `with_cli_args`.
///
/// # Examples
///
/// ```ignore
/// use clap::Parser;
/// use crest_rs::{CrestArgs, PoolBuilder};
///
/// #[derive(Parser)]
/// struct MyArgs {
///     #[command(flatten)]
///     crest: CrestArgs,
/// }
///
/// let args = MyArgs::parse();
/// let pool = PoolBuilder::new().with_cli_args(&args.crest).build()?;
/// ```
#[derive(Debug, Default, Clone, clap::Args)]
pub struct CrestArgs {
    /// Thread name and metric prefix
    #[arg(long)]
    pub crest_prefix: Option<String>,

    /// Minimum number of worker threads
    #[arg(long)]
    pub crest_min_workers: Option<usize>,

    /// Maximum number of worker threads
    #[arg(long)]
    pub crest_max_workers: Option<usize>,

    /// Blocking-ratio threshold in (0, 1)
    #[arg(long)]
    pub crest_blocking_threshold: Option<f64>,

    /// Monitor tick interval in milliseconds
    #[arg(long)]
    pub crest_monitor_interval_ms: Option<u64>,
}
