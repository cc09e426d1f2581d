//! Primary/fallback integrator adapter: switches to Forward Euler
//! after repeated failures of the primary method, and as a last
//! resort halves `dt` once before giving up and holding state still.

use super::fixed_step::ForwardEuler;
use super::{is_finite_vec, Integrator, IntegratorStats};
use crate::dynamics::DerivativeDynamics;
use crate::error::SimResult;

const CONSECUTIVE_FAILURE_LIMIT: u32 = 3;

/// Wraps any [`Integrator`] and degrades to Forward Euler once it has
/// failed (errored or produced a non-finite state) on
/// [`CONSECUTIVE_FAILURE_LIMIT`] consecutive steps. If even the
/// fallback fails, the wrapper halves `dt` exactly once and retries;
/// if that also fails, it returns the unmodified input state rather
/// than propagating the error, so a rollout can continue degraded
/// rather than abort.
#[derive(Debug)]
pub struct SafetyWrapper {
    primary: Box<dyn Integrator>,
    fallback: ForwardEuler,
    consecutive_failures: u32,
    degraded: bool,
    stats: IntegratorStats,
}

impl SafetyWrapper {
    pub fn new(primary: Box<dyn Integrator>) -> Self {
        SafetyWrapper {
            primary,
            fallback: ForwardEuler::new(),
            consecutive_failures: 0,
            degraded: false,
            stats: IntegratorStats::default(),
        }
    }

    pub fn is_degraded(&self) -> bool {
        self.degraded
    }

    fn try_step(
        &mut self,
        f: &dyn DerivativeDynamics,
        x: &[f64],
        u: &[f64],
        dt: f64,
        t: f64,
    ) -> Option<Vec<f64>> {
        let integrator: &mut dyn Integrator = if self.degraded {
            &mut self.fallback
        } else {
            self.primary.as_mut()
        };
        match integrator.step_checked(f, x, u, dt, t) {
            Ok(x_new) if is_finite_vec(&x_new) => Some(x_new),
            _ => None,
        }
    }
}

/// Small helper trait so `try_step` can treat an `Err` and a `Result`
/// uniformly without borrowing `self` twice.
trait StepChecked {
    fn step_checked(
        &mut self,
        f: &dyn DerivativeDynamics,
        x: &[f64],
        u: &[f64],
        dt: f64,
        t: f64,
    ) -> SimResult<Vec<f64>>;
}

impl<I: Integrator + ?Sized> StepChecked for I {
    fn step_checked(
        &mut self,
        f: &dyn DerivativeDynamics,
        x: &[f64],
        u: &[f64],
        dt: f64,
        t: f64,
    ) -> SimResult<Vec<f64>> {
        self.integrate(f, x, u, dt, t)
    }
}

impl Integrator for SafetyWrapper {
    fn order(&self) -> u32 {
        if self.degraded {
            self.fallback.order()
        } else {
            self.primary.order()
        }
    }

    fn stats(&self) -> IntegratorStats {
        self.stats
    }

    fn reset_stats(&mut self) {
        self.stats.reset();
        self.primary.reset_stats();
        self.fallback.reset_stats();
        self.consecutive_failures = 0;
        self.degraded = false;
    }

    fn integrate(
        &mut self,
        f: &dyn DerivativeDynamics,
        x: &[f64],
        u: &[f64],
        dt: f64,
        t: f64,
    ) -> SimResult<Vec<f64>> {
        if let Some(x_new) = self.try_step(f, x, u, dt, t) {
            self.consecutive_failures = 0;
            self.stats.total_steps += 1;
            self.stats.accepted_steps += 1;
            return Ok(x_new);
        }

        self.consecutive_failures += 1;
        if !self.degraded && self.consecutive_failures >= CONSECUTIVE_FAILURE_LIMIT {
            self.degraded = true;
            self.consecutive_failures = 0;
        }

        if let Some(x_new) = self.try_step(f, x, u, dt, t) {
            self.stats.total_steps += 1;
            self.stats.accepted_steps += 1;
            return Ok(x_new);
        }

        // Ultimate fallback: halve dt once and retry forward Euler.
        if let Some(x_new) = self.try_step(f, x, u, dt / 2.0, t) {
            self.stats.total_steps += 1;
            self.stats.accepted_steps += 1;
            return Ok(x_new);
        }

        self.stats.total_steps += 1;
        self.stats.rejected_steps += 1;
        Ok(x.to_vec())
    }
}
