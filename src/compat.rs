//! # Dialect Compatibility Shim
//!
//! Bridges the two dynamics dialects in [`crate::dynamics`] so either
//! can be driven by tooling written against the other: a
//! [`StepDynamics`] plant gets a synthetic derivative via central
//! finite differences, and a [`DerivativeDynamics`] plant gets a
//! synthetic `step` via its own internal clock and a fixed-step
//! integrator.

use crate::dynamics::{DerivativeDynamics, StepDynamics};
use crate::error::SimResult;
use crate::integrators::fixed_step::Rk4;
use crate::integrators::Integrator;
use std::sync::Mutex;

/// Forward-difference step for the synthetic derivative. Chosen to
/// balance truncation error against floating-point cancellation for
/// `f64` state components of order unity.
const FD_DELTA: f64 = 1e-6;

/// Adapts a [`StepDynamics`] plant to [`DerivativeDynamics`] by
/// estimating `dx/dt` as `(step(x, u, dt) - x) / dt` using a fixed,
/// small `dt` independent of the integrator's step — the
/// finite-difference step and the integration step are different
/// concerns and must not be conflated. A failing underlying step is
/// treated as momentarily stationary rather than propagated, since a
/// single probe step failing doesn't mean the real step at the
/// caller's `dt` would.
pub struct LegacyToDerivative<'a> {
    inner: &'a dyn StepDynamics,
}

impl<'a> LegacyToDerivative<'a> {
    pub fn new(inner: &'a dyn StepDynamics) -> Self {
        LegacyToDerivative { inner }
    }
}

impl<'a> DerivativeDynamics for LegacyToDerivative<'a> {
    fn derivative(&self, _t: f64, x: &[f64], u: &[f64]) -> SimResult<Vec<f64>> {
        match self.inner.step(x, u, FD_DELTA) {
            Ok(forward) => Ok(forward
                .iter()
                .zip(x)
                .map(|(f, xi)| (f - xi) / FD_DELTA)
                .collect()),
            Err(_) => Ok(vec![0.0; x.len()]),
        }
    }

    fn state_dim(&self) -> Option<usize> {
        self.inner.state_dim()
    }
}

/// Adapts a [`DerivativeDynamics`] plant to [`StepDynamics`] by
/// advancing an internal clock and delegating to an integrator
/// (classical RK4 by default — matches the accuracy legacy callers
/// of `step(x, u, dt)` typically expect from a black-box plant).
///
/// The internal clock is a best-effort approximation of absolute time:
/// callers that skip around in time (rather than stepping forward
/// monotonically) will see the shim's notion of `t` drift from theirs.
pub struct DerivativeToLegacy<'a> {
    inner: &'a dyn DerivativeDynamics,
    clock: Mutex<f64>,
    integrator: Mutex<Rk4>,
}

impl<'a> DerivativeToLegacy<'a> {
    pub fn new(inner: &'a dyn DerivativeDynamics) -> Self {
        DerivativeToLegacy {
            inner,
            clock: Mutex::new(0.0),
            integrator: Mutex::new(Rk4::new()),
        }
    }

    pub fn current_time(&self) -> f64 {
        *self.clock.lock().unwrap()
    }

    pub fn reset_clock(&self) {
        *self.clock.lock().unwrap() = 0.0;
    }
}

impl<'a> StepDynamics for DerivativeToLegacy<'a> {
    fn step(&self, x: &[f64], u: &[f64], dt: f64) -> SimResult<Vec<f64>> {
        let t = *self.clock.lock().unwrap();
        let x_new = self.integrator.lock().unwrap().integrate(self.inner, x, u, dt, t)?;
        *self.clock.lock().unwrap() = t + dt;
        Ok(x_new)
    }

    fn state_dim(&self) -> Option<usize> {
        self.inner.state_dim()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Linear;
    impl StepDynamics for Linear {
        fn step(&self, x: &[f64], u: &[f64], dt: f64) -> SimResult<Vec<f64>> {
            Ok(x.iter()
                .zip(u.iter().chain(std::iter::repeat(&0.0)))
                .map(|(xi, ui)| xi + (-2.0 * xi + ui) * dt)
                .collect())
        }

        fn state_dim(&self) -> Option<usize> {
            Some(1)
        }
    }

    struct DirectDerivative;
    impl DerivativeDynamics for DirectDerivative {
        fn derivative(&self, _t: f64, x: &[f64], _u: &[f64]) -> SimResult<Vec<f64>> {
            Ok(x.iter().map(|xi| -xi).collect())
        }
    }

    #[test]
    fn legacy_to_derivative_approximates_analytic_slope() {
        let legacy = Linear;
        let shim = LegacyToDerivative::new(&legacy);
        let dx = shim.derivative(0.0, &[1.0], &[0.0]).unwrap();
        assert!((dx[0] - (-2.0)).abs() < 1e-4);
        assert_eq!(shim.state_dim(), Some(1));
    }

    #[test]
    fn derivative_to_legacy_advances_internal_clock() {
        let model = DirectDerivative;
        let shim = DerivativeToLegacy::new(&model);
        assert_eq!(shim.current_time(), 0.0);
        shim.step(&[1.0], &[], 0.1).unwrap();
        assert!((shim.current_time() - 0.1).abs() < 1e-12);
        shim.step(&[1.0], &[], 0.1).unwrap();
        assert!((shim.current_time() - 0.2).abs() < 1e-12);
    }

    #[test]
    fn derivative_to_legacy_matches_rk4_trajectory() {
        let model = DirectDerivative;
        let shim = DerivativeToLegacy::new(&model);
        let mut direct = Rk4::new();
        let via_shim = shim.step(&[1.0], &[], 0.05).unwrap();
        let expected = direct.integrate(&model, &[1.0], &[], 0.05, 0.0).unwrap();
        assert!((via_shim[0] - expected[0]).abs() < 1e-12);
    }
}
