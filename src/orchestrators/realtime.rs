//! Wraps [`Sequential`] with wall-clock pacing via
//! [`RealTimeScheduler`].

use super::sequential::{ControlSource, Sequential};
use super::{ExecuteOptions, ExecutionStats};
use crate::dynamics::DerivativeDynamics;
use crate::error::{SimError, SimResult};
use crate::integrators::Integrator;
use crate::result::{Metadata, ResultContainer};
use crate::time_domain::RealTimeScheduler;
use std::time::Duration;

/// What a [`ViolationHandler`] requests after a missed deadline.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ViolationAction {
    Continue,
    Abort,
    Degrade,
}

pub type ViolationHandler<'a> = dyn Fn(usize, Duration, Duration) -> ViolationAction + 'a;

pub struct RealTime<'a> {
    inner: Sequential<'a>,
    scheduler: RealTimeScheduler,
    violation_handler: Option<&'a ViolationHandler<'a>>,
}

impl<'a> RealTime<'a> {
    pub fn new(dynamics: &'a dyn DerivativeDynamics, integrator: Box<dyn Integrator>, period: Duration) -> Self {
        RealTime {
            inner: Sequential::new(dynamics, integrator),
            scheduler: RealTimeScheduler::new(period, Duration::from_millis(1)),
            violation_handler: None,
        }
    }

    pub fn with_violation_handler(mut self, handler: &'a ViolationHandler<'a>) -> Self {
        self.violation_handler = Some(handler);
        self
    }

    pub fn stats(&self) -> ExecutionStats {
        self.inner.stats()
    }

    /// Runs the horizon one step at a time, pacing each iteration
    /// against the wall clock. Degraded mode disables pacing for the
    /// remainder of the run but keeps executing steps.
    pub fn execute(
        &mut self,
        x0: &[f64],
        control: ControlSource,
        dt: f64,
        horizon: usize,
        opts: &ExecuteOptions,
    ) -> SimResult<ResultContainer> {
        let sequence = match control {
            ControlSource::Sequence(seq) => seq,
            ControlSource::Live(_) => {
                return Err(SimError::invalid_input(
                    "real-time orchestrator requires a precomputed control sequence in this build",
                ))
            }
        };

        self.scheduler.reset();

        let mut degraded = false;
        let mut result: Option<ResultContainer> = None;
        let mut abort_at: Option<usize> = None;

        for step in 0..horizon {
            let single_opts = ExecuteOptions {
                safety_guards: opts.safety_guards,
                stop_fn: opts.stop_fn,
                t0: opts.t0 + step as f64 * dt,
            };
            let start = std::time::Instant::now();
            let one_step_control = ControlSource::Sequence(vec![sequence[step].clone()]);
            let partial = self.inner.execute(x0, one_step_control, dt, 1, &single_opts)?;
            let elapsed = start.elapsed();

            if !degraded {
                self.scheduler.start_step();
                let outcome = self.scheduler.wait_for_next_step();
                if matches!(outcome, crate::time_domain::DeadlineOutcome::Missed) {
                    if let Some(handler) = self.violation_handler {
                        match handler(step, elapsed, self.scheduler.stats().target_period) {
                            ViolationAction::Continue => {}
                            ViolationAction::Abort => {
                                abort_at = Some(step);
                                result = Some(partial);
                                break;
                            }
                            ViolationAction::Degrade => degraded = true,
                        }
                    }
                }
            }
            result = Some(partial);
        }

        let mut meta = Metadata::new();
        let stats = self.scheduler.stats();
        meta.set("missed_deadlines", stats.missed_deadlines);
        meta.set("total_steps", stats.total_steps);
        if let Some(step) = abort_at {
            meta.set("aborted_at_step", step);
        }

        let mut final_result = result.unwrap_or_else(|| {
            ResultContainer::new(vec![opts.t0], vec![x0.to_vec()], vec![], Metadata::new())
        });
        final_result = ResultContainer::new(
            final_result.times(),
            final_result.states(),
            final_result.controls(),
            meta,
        );
        Ok(final_result)
    }
}
