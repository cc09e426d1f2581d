//! # Numerical Integrator Layer
//!
//! Uniform contract: `integrate(f, x, u, dt, t) -> x'` where
//! `f(t, x, u) -> dx/dt`. Every integrator tracks resettable call
//! statistics and publishes its method order and whether it adapts
//! its own step size.
//!
//! ## Submodules
//!
//! - [`fixed_step`]: Forward/Backward Euler, RK2, RK4, RK 3/8
//! - [`adaptive`]: Dormand-Prince 4(5) with PI step control
//! - [`zoh`]: exact zero-order hold for linear time-invariant systems
//! - [`factory`]: string-keyed construction with aliasing
//! - [`safety_wrapper`]: primary/fallback integrator adapter

pub mod adaptive;
pub mod factory;
pub mod fixed_step;
pub mod safety_wrapper;
pub mod zoh;

use crate::dynamics::DerivativeDynamics;
use crate::error::SimError;

/// Running counters maintained by every integrator, resettable via
/// [`IntegratorStats::reset`].
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct IntegratorStats {
    pub total_steps: u64,
    pub accepted_steps: u64,
    pub rejected_steps: u64,
    pub function_evaluations: u64,
}

impl IntegratorStats {
    pub fn reset(&mut self) {
        *self = IntegratorStats::default();
    }

    fn record(&mut self, evaluations: u64, accepted: bool) {
        self.total_steps += 1;
        self.function_evaluations += evaluations;
        if accepted {
            self.accepted_steps += 1;
        } else {
            self.rejected_steps += 1;
        }
    }
}

/// Outcome of one adaptive integration attempt.
pub struct AdaptiveStepResult {
    pub x_new: Vec<f64>,
    pub accepted: bool,
    pub error_estimate: f64,
    pub dt_suggest: f64,
}

/// A fixed-step integrator: consumes exactly the step it's given and
/// always accepts.
pub trait Integrator: Send + std::fmt::Debug {
    /// Method order, e.g. `4` for classical RK4.
    fn order(&self) -> u32;

    fn adaptive(&self) -> bool {
        false
    }

    fn stats(&self) -> IntegratorStats;
    fn reset_stats(&mut self);

    /// Advances `x` by `dt` using the continuous-time derivative `f`.
    fn integrate(
        &mut self,
        f: &dyn DerivativeDynamics,
        x: &[f64],
        u: &[f64],
        dt: f64,
        t: f64,
    ) -> Result<Vec<f64>, SimError>;
}

/// An integrator that additionally proposes its own next step size
/// from a local error estimate (Dormand-Prince 4(5)).
pub trait AdaptiveIntegrator: Integrator {
    fn integrate_adaptive(
        &mut self,
        f: &dyn DerivativeDynamics,
        x: &[f64],
        u: &[f64],
        dt: f64,
        t: f64,
        rtol: f64,
        atol: f64,
    ) -> Result<AdaptiveStepResult, SimError>;
}

/// RMS error norm shared by every adaptive method:
/// `||err / (atol + rtol * max(|x|, |x_new|))||_RMS`.
pub(crate) fn rms_error_norm(err: &[f64], x: &[f64], x_new: &[f64], atol: f64, rtol: f64) -> f64 {
    let n = err.len().max(1) as f64;
    let sum_sq: f64 = err
        .iter()
        .zip(x.iter())
        .zip(x_new.iter())
        .map(|((e, xi), xni)| {
            let scale = atol + rtol * xi.abs().max(xni.abs());
            (e / scale).powi(2)
        })
        .sum();
    (sum_sq / n).sqrt()
}

pub(crate) fn vec_add_scaled(a: &[f64], b: &[f64], scale: f64) -> Vec<f64> {
    a.iter().zip(b).map(|(ai, bi)| ai + bi * scale).collect()
}

pub(crate) fn is_finite_vec(v: &[f64]) -> bool {
    v.iter().all(|x| x.is_finite())
}
