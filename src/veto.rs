//! Safety veto: decide whether parallelism is worth attempting at all.
//!
//! Parallel execution has fixed per-call overhead (thread handoff, result
//! collection). Below a minimum item count or estimated speedup, sequential
//! execution is both simpler and faster, and a known saturation cliff at or
//! under the intended thread count means parallelism would actively hurt.
//!
//! [`decide`] is a pure function with no side effects and no internal
//! state, consumed both by profiler callers and by
//! [`AdaptivePool::map_with_veto`](crate::AdaptivePool::map_with_veto).

use serde::{Deserialize, Serialize};

use crate::monitor::BetaEstimate;
use crate::profiler::CliffAnalysis;

/// Why parallelism was rejected, or `None` when it was approved.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VetoReason {
    /// Too few items to amortize parallel overhead.
    NotEnoughItems,
    /// The externally estimated speedup does not clear the floor.
    LowEstimatedSpeedup,
    /// A profiled saturation cliff sits at or below the intended thread count.
    CliffDetected,
    /// The blocking ratio is already below the configured floor; adding
    /// threads would mostly add contention.
    ContentionAlreadyLow,
    /// Approved.
    None,
}

/// Thresholds for the veto decision.
///
/// The 100-item floor and 1.1x speedup floor are policy defaults, not
/// derived constants; tune them per workload.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VetoPolicy {
    /// Minimum item count for parallelism (default: 100).
    #[serde(default = "default_min_items")]
    pub min_items: usize,

    /// Minimum estimated speedup for parallelism (default: 1.1).
    #[serde(default = "default_min_speedup")]
    pub min_speedup: f64,

    /// Optional blocking-ratio floor: a usable β below it vetoes
    /// parallelism with [`VetoReason::ContentionAlreadyLow`]. Disabled by
    /// default.
    #[serde(default)]
    pub min_beta: Option<f64>,
}

fn default_min_items() -> usize {
    100
}

fn default_min_speedup() -> f64 {
    1.1
}

impl Default for VetoPolicy {
    fn default() -> Self {
        Self {
            min_items: default_min_items(),
            min_speedup: default_min_speedup(),
            min_beta: None,
        }
    }
}

/// Inputs to a veto decision.
#[derive(Debug, Clone, Copy)]
pub struct VetoRequest<'a> {
    /// Number of items the caller wants to process.
    pub item_count: usize,
    /// Externally estimated speedup from parallel execution (e.g. from a
    /// break-even calculator).
    pub estimated_speedup: f64,
    /// Current blocking-ratio estimate.
    pub beta: &'a BetaEstimate,
    /// Profiled cliff analysis for this workload shape, if one exists.
    pub cliff: Option<&'a CliffAnalysis>,
    /// Thread count the caller intends to use.
    pub intended_threads: usize,
}

/// Outcome of a veto decision. Created fresh per call; never retained.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct VetoDecision {
    /// Whether parallel execution was approved.
    pub approved: bool,
    /// First matching rejection rule, or `None` on approval.
    pub reason: VetoReason,
    /// Item count the decision was made for.
    pub item_count: usize,
    /// The usable β at decision time, if one existed.
    pub beta_at_decision: Option<f64>,
}

/// Decide whether to run in parallel. First matching rule wins.
pub fn decide(request: &VetoRequest<'_>, policy: &VetoPolicy) -> VetoDecision {
    let beta_at_decision = request.beta.beta();
    let rejected = |reason| VetoDecision {
        approved: false,
        reason,
        item_count: request.item_count,
        beta_at_decision,
    };

    if request.item_count < policy.min_items {
        return rejected(VetoReason::NotEnoughItems);
    }
    if request.estimated_speedup < policy.min_speedup {
        return rejected(VetoReason::LowEstimatedSpeedup);
    }
    if let Some(cliff_threads) = request.cliff.and_then(|c| c.cliff_threads) {
        if cliff_threads <= request.intended_threads {
            return rejected(VetoReason::CliffDetected);
        }
    }
    if let (Some(floor), Some(beta)) = (policy.min_beta, beta_at_decision) {
        if beta < floor {
            return rejected(VetoReason::ContentionAlreadyLow);
        }
    }

    VetoDecision {
        approved: true,
        reason: VetoReason::None,
        item_count: request.item_count,
        beta_at_decision,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::monitor::BlockingRatio;
    use crate::profiler::{analyze_levels, ProfileLevel};
    use std::time::Duration;

    fn ready(beta: f64) -> BetaEstimate {
        BetaEstimate::Ready(BlockingRatio {
            beta,
            sample_count: 20,
            window_span: Duration::from_secs(1),
        })
    }

    fn request<'a>(
        item_count: usize,
        estimated_speedup: f64,
        beta: &'a BetaEstimate,
        cliff: Option<&'a CliffAnalysis>,
    ) -> VetoRequest<'a> {
        VetoRequest {
            item_count,
            estimated_speedup,
            beta,
            cliff,
            intended_threads: 8,
        }
    }

    fn cliff_at(threads: usize) -> CliffAnalysis {
        let levels = vec![
            ProfileLevel {
                thread_count: threads / 2,
                throughput_ops: 1000.0,
                p99_latency: Duration::from_millis(1),
            },
            ProfileLevel {
                thread_count: threads,
                throughput_ops: 500.0,
                p99_latency: Duration::from_millis(5),
            },
        ];
        analyze_levels(levels, true, 0.2)
    }

    #[test]
    fn test_size_rule_dominates() {
        // High speedup and high beta cannot rescue a tiny workload.
        let beta = ready(0.95);
        for count in [0, 1, 10, 99] {
            let decision = decide(&request(count, 10.0, &beta, None), &VetoPolicy::default());
            assert!(!decision.approved);
            assert_eq!(decision.reason, VetoReason::NotEnoughItems);
            assert_eq!(decision.item_count, count);
        }
    }

    #[test]
    fn test_low_speedup_rejected() {
        let beta = ready(0.9);
        let decision = decide(&request(1000, 1.05, &beta, None), &VetoPolicy::default());
        assert!(!decision.approved);
        assert_eq!(decision.reason, VetoReason::LowEstimatedSpeedup);
    }

    #[test]
    fn test_cliff_at_or_below_intended_threads_rejected() {
        let beta = ready(0.9);
        let cliff = cliff_at(8);
        let decision = decide(
            &request(1000, 3.0, &beta, Some(&cliff)),
            &VetoPolicy::default(),
        );
        assert!(!decision.approved);
        assert_eq!(decision.reason, VetoReason::CliffDetected);
    }

    #[test]
    fn test_cliff_above_intended_threads_approved() {
        let beta = ready(0.9);
        let cliff = cliff_at(16);
        let decision = decide(
            &request(1000, 3.0, &beta, Some(&cliff)),
            &VetoPolicy::default(),
        );
        assert!(decision.approved);
        assert_eq!(decision.reason, VetoReason::None);
    }

    #[test]
    fn test_approval_carries_beta() {
        let beta = ready(0.72);
        let decision = decide(&request(500, 2.0, &beta, None), &VetoPolicy::default());
        assert!(decision.approved);
        assert_eq!(decision.beta_at_decision, Some(0.72));
    }

    #[test]
    fn test_insufficient_beta_does_not_block_approval() {
        let beta = BetaEstimate::Insufficient { sample_count: 2 };
        let decision = decide(&request(500, 2.0, &beta, None), &VetoPolicy::default());
        assert!(decision.approved);
        assert_eq!(decision.beta_at_decision, None);
    }

    #[test]
    fn test_min_beta_floor_is_opt_in() {
        let beta = ready(0.05);
        // Default policy: low beta alone never vetoes.
        let decision = decide(&request(500, 2.0, &beta, None), &VetoPolicy::default());
        assert!(decision.approved);

        let policy = VetoPolicy {
            min_beta: Some(0.2),
            ..Default::default()
        };
        let decision = decide(&request(500, 2.0, &beta, None), &policy);
        assert!(!decision.approved);
        assert_eq!(decision.reason, VetoReason::ContentionAlreadyLow);
    }

    #[test]
    fn test_rule_order_size_before_speedup() {
        let beta = ready(0.9);
        let decision = decide(&request(10, 0.5, &beta, None), &VetoPolicy::default());
        assert_eq!(decision.reason, VetoReason::NotEnoughItems);
    }

    #[test]
    fn test_policy_serialization() {
        let policy = VetoPolicy::default();
        let json = serde_json::to_string(&policy).unwrap();
        let parsed: VetoPolicy = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed.min_items, 100);
        assert!((parsed.min_speedup - 1.1).abs() < f64::EPSILON);
        assert!(parsed.min_beta.is_none());
    }
}
