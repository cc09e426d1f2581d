//! # Orchestrators
//!
//! Drive a dynamics model, controller, and integrator over a horizon
//! and collect the resulting trajectory. All four variants share
//! [`ExecutionStats`] bookkeeping and an [`ExecuteOptions`] bag; they
//! differ only in how they partition and schedule the per-step work.
//!
//! ## Submodules
//!
//! - [`sequential`]: the reference implementation every other variant
//!   must match byte-for-byte on identical inputs.
//! - [`batch`]: active-mask vectorized rollout over `(B, D)` states.
//! - [`parallel`]: worker-pool fan-out of independent sequential runs.
//! - [`realtime`]: sequential rollout paced by a wall-clock scheduler.

pub mod batch;
pub mod parallel;
pub mod realtime;
pub mod sequential;

use crate::result::Metadata;
use std::time::Duration;

/// Counters shared by every orchestrator instance, accumulated across
/// calls to `execute`: total runs, total steps, total wall-clock time,
/// and the derived average per-step time.
#[derive(Debug, Clone, Copy, Default)]
pub struct ExecutionStats {
    pub total_simulations: u64,
    pub total_steps: u64,
    pub total_time: Duration,
}

impl ExecutionStats {
    pub fn record_run(&mut self, steps: u64, elapsed: Duration) {
        self.total_simulations += 1;
        self.total_steps += steps;
        self.total_time += elapsed;
    }

    pub fn avg_step_time(&self) -> Duration {
        if self.total_steps == 0 {
            Duration::ZERO
        } else {
            self.total_time / self.total_steps as u32
        }
    }

    pub fn reset(&mut self) {
        *self = ExecutionStats::default();
    }
}

/// Options accepted by every orchestrator's `execute`. `stop_fn`
/// provides cooperative per-step cancellation; `None` means "run the
/// full horizon".
pub struct ExecuteOptions<'a> {
    pub safety_guards: bool,
    pub stop_fn: Option<&'a (dyn Fn(&[f64]) -> bool + Sync)>,
    pub t0: f64,
}

impl<'a> Default for ExecuteOptions<'a> {
    fn default() -> Self {
        ExecuteOptions {
            safety_guards: true,
            stop_fn: None,
            t0: 0.0,
        }
    }
}

/// Populates the flag the cost evaluator reads to treat truncation
/// uniformly regardless of cause.
pub(crate) fn mark_truncated(meta: &mut Metadata, truncated: bool, reason: Option<&str>) {
    meta.set("truncated", truncated);
    if let Some(reason) = reason {
        meta.set("truncation_reason", reason);
    }
}
