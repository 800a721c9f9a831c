//! Prometheus metrics for crest pool observability.
//!
//! Counters work standalone without a Registry - registration is only
//! needed for exposition (scraping). Metric names use a `{prefix}_` prefix
//! shared with the pool's thread names (default: "crest").

use prometheus::{Gauge, IntCounter, IntGauge, Opts, Registry};

/// Prometheus metrics for a crest pool.
///
/// Counters are always incremented (atomic ops only). Registration to a
/// Registry is optional - only needed for exposition.
#[derive(Clone)]
pub struct CrestMetrics {
    // === Gauges (current values) ===
    /// Worker threads currently in the pool.
    pub active_workers: IntGauge,

    /// Rolling blocking-ratio estimate β.
    pub blocking_ratio: Gauge,

    /// Tasks waiting in the submission queue.
    pub queue_depth: IntGauge,

    /// Completed tasks per second over the last monitor tick.
    pub throughput_ops: Gauge,

    // === Counters (cumulative) ===
    /// Tasks that ran to completion.
    pub tasks_completed: IntCounter,

    /// Tasks that panicked.
    pub tasks_failed: IntCounter,

    /// Queued tasks cancelled at shutdown.
    pub tasks_cancelled: IntCounter,

    /// Malformed samples dropped by the blocking-ratio monitor.
    pub samples_discarded: IntCounter,

    /// Workers added by the monitor.
    pub scale_up_total: IntCounter,

    /// Workers retired by the monitor.
    pub scale_down_total: IntCounter,
}

impl Default for CrestMetrics {
    fn default() -> Self {
        Self::new()
    }
}

impl CrestMetrics {
    /// Create metrics with the default prefix "crest".
    pub fn new() -> Self {
        Self::with_prefix("crest")
    }

    /// Create metrics with a custom prefix.
    ///
    /// Metric names will be `{prefix}_active_workers`, `{prefix}_tasks_completed`,
    /// etc. The prefix is sanitized to be a valid Prometheus metric name:
    /// hyphens and other invalid characters are replaced with underscores.
    pub fn with_prefix(prefix: &str) -> Self {
        // Valid chars: [a-zA-Z_:] for first char, [a-zA-Z0-9_:] for rest
        let prefix: String = prefix
            .chars()
            .enumerate()
            .map(|(i, c)| {
                if i == 0 {
                    if c.is_ascii_alphabetic() || c == '_' || c == ':' {
                        c
                    } else {
                        '_'
                    }
                } else if c.is_ascii_alphanumeric() || c == '_' || c == ':' {
                    c
                } else {
                    '_'
                }
            })
            .collect();

        Self {
            active_workers: IntGauge::with_opts(Opts::new(
                format!("{}_active_workers", prefix),
                "Worker threads currently in the pool",
            ))
            .expect("metric creation should not fail"),

            blocking_ratio: Gauge::with_opts(Opts::new(
                format!("{}_blocking_ratio", prefix),
                "Rolling blocking-ratio estimate",
            ))
            .expect("metric creation should not fail"),

            queue_depth: IntGauge::with_opts(Opts::new(
                format!("{}_queue_depth", prefix),
                "Tasks waiting in the submission queue",
            ))
            .expect("metric creation should not fail"),

            throughput_ops: Gauge::with_opts(Opts::new(
                format!("{}_throughput_ops", prefix),
                "Completed tasks per second",
            ))
            .expect("metric creation should not fail"),

            tasks_completed: IntCounter::with_opts(Opts::new(
                format!("{}_tasks_completed", prefix),
                "Tasks that ran to completion",
            ))
            .expect("metric creation should not fail"),

            tasks_failed: IntCounter::with_opts(Opts::new(
                format!("{}_tasks_failed", prefix),
                "Tasks that panicked",
            ))
            .expect("metric creation should not fail"),

            tasks_cancelled: IntCounter::with_opts(Opts::new(
                format!("{}_tasks_cancelled", prefix),
                "Queued tasks cancelled at shutdown",
            ))
            .expect("metric creation should not fail"),

            samples_discarded: IntCounter::with_opts(Opts::new(
                format!("{}_samples_discarded", prefix),
                "Malformed samples dropped by the monitor",
            ))
            .expect("metric creation should not fail"),

            scale_up_total: IntCounter::with_opts(Opts::new(
                format!("{}_scale_up_total", prefix),
                "Workers added by the monitor",
            ))
            .expect("metric creation should not fail"),

            scale_down_total: IntCounter::with_opts(Opts::new(
                format!("{}_scale_down_total", prefix),
                "Workers retired by the monitor",
            ))
            .expect("metric creation should not fail"),
        }
    }

    /// Register all metrics with a Registry for exposition.
    ///
    /// # Errors
    ///
    /// Returns an error if any metric fails to register (e.g., duplicate names).
    pub fn register(&self, registry: &Registry) -> Result<(), prometheus::Error> {
        registry.register(Box::new(self.active_workers.clone()))?;
        registry.register(Box::new(self.blocking_ratio.clone()))?;
        registry.register(Box::new(self.queue_depth.clone()))?;
        registry.register(Box::new(self.throughput_ops.clone()))?;
        registry.register(Box::new(self.tasks_completed.clone()))?;
        registry.register(Box::new(self.tasks_failed.clone()))?;
        registry.register(Box::new(self.tasks_cancelled.clone()))?;
        registry.register(Box::new(self.samples_discarded.clone()))?;
        registry.register(Box::new(self.scale_up_total.clone()))?;
        registry.register(Box::new(self.scale_down_total.clone()))?;
        Ok(())
    }

    /// Record a scaling event.
    #[inline]
    pub fn record_scale(&self, up: bool) {
        if up {
            self.scale_up_total.inc();
        } else {
            self.scale_down_total.inc();
        }
    }

    /// Record a task outcome.
    #[inline]
    pub fn record_task(&self, ok: bool) {
        if ok {
            self.tasks_completed.inc();
        } else {
            self.tasks_failed.inc();
        }
    }
}

impl std::fmt::Debug for CrestMetrics {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CrestMetrics")
            .field("active_workers", &self.active_workers.get())
            .field("tasks_completed", &self.tasks_completed.get())
            .field("tasks_failed", &self.tasks_failed.get())
            .field("scale_up_total", &self.scale_up_total.get())
            .field("scale_down_total", &self.scale_down_total.get())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_metrics_creation() {
        let metrics = CrestMetrics::new();
        assert_eq!(metrics.active_workers.get(), 0);
        assert_eq!(metrics.tasks_completed.get(), 0);
    }

    #[test]
    fn test_task_recording() {
        let metrics = CrestMetrics::new();

        metrics.record_task(true);
        metrics.record_task(true);
        metrics.record_task(false);

        assert_eq!(metrics.tasks_completed.get(), 2);
        assert_eq!(metrics.tasks_failed.get(), 1);
    }

    #[test]
    fn test_scale_recording() {
        let metrics = CrestMetrics::new();

        metrics.record_scale(true);
        metrics.record_scale(true);
        metrics.record_scale(false);

        assert_eq!(metrics.scale_up_total.get(), 2);
        assert_eq!(metrics.scale_down_total.get(), 1);
    }

    #[test]
    fn test_registry_integration() {
        let metrics = CrestMetrics::new();
        let registry = Registry::new();

        metrics
            .register(&registry)
            .expect("registration should succeed");

        metrics.tasks_completed.inc();

        let families = registry.gather();
        assert!(!families.is_empty());
        assert!(families
            .iter()
            .any(|f| f.get_name() == "crest_tasks_completed"));
    }

    #[test]
    fn test_custom_prefix_sanitized() {
        let metrics = CrestMetrics::with_prefix("my-pool");
        let registry = Registry::new();
        metrics
            .register(&registry)
            .expect("registration should succeed");

        let families = registry.gather();
        assert!(families
            .iter()
            .any(|f| f.get_name() == "my_pool_active_workers"));
        assert!(!families.iter().any(|f| f.get_name().contains('-')));
    }

    #[test]
    fn test_metrics_clone_shares_counters() {
        let metrics = CrestMetrics::new();
        metrics.tasks_completed.inc();

        let cloned = metrics.clone();
        assert_eq!(cloned.tasks_completed.get(), 1);

        cloned.tasks_completed.inc();
        assert_eq!(metrics.tasks_completed.get(), 2);
    }
}
