//! Fixed-step, non-adaptive integrators: Forward/Backward Euler,
//! midpoint RK2, classical RK4, and the Runge-Kutta 3/8 rule.

use super::{is_finite_vec, vec_add_scaled, Integrator, IntegratorStats};
use crate::dynamics::DerivativeDynamics;
use crate::error::{SimError, SimResult};

/// `x_{n+1} = x_n + dt * f(t, x_n, u)`.
#[derive(Debug, Default)]
pub struct ForwardEuler {
    stats: IntegratorStats,
}

impl ForwardEuler {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Integrator for ForwardEuler {
    fn order(&self) -> u32 {
        1
    }

    fn stats(&self) -> IntegratorStats {
        self.stats
    }

    fn reset_stats(&mut self) {
        self.stats.reset();
    }

    fn integrate(
        &mut self,
        f: &dyn DerivativeDynamics,
        x: &[f64],
        u: &[f64],
        dt: f64,
        t: f64,
    ) -> SimResult<Vec<f64>> {
        let dx = f.derivative(t, x, u)?;
        self.stats.function_evaluations += 1;
        self.stats.total_steps += 1;
        self.stats.accepted_steps += 1;
        Ok(vec_add_scaled(x, &dx, dt))
    }
}

/// Implicit Euler solved by fixed-point iteration on the residual
/// `x_{n+1} - x_n - dt * f(t+dt, x_{n+1}, u) = 0`. Falls back to a
/// forward-Euler step (counted as successful, to preserve rollout
/// progress) if the iteration fails to converge within `max_iter`.
#[derive(Debug)]
pub struct BackwardEuler {
    stats: IntegratorStats,
    max_iter: usize,
    tol: f64,
}

impl Default for BackwardEuler {
    fn default() -> Self {
        BackwardEuler {
            stats: IntegratorStats::default(),
            max_iter: 10,
            tol: 1e-9,
        }
    }
}

impl BackwardEuler {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_max_iter(mut self, max_iter: usize) -> Self {
        self.max_iter = max_iter;
        self
    }
}

impl Integrator for BackwardEuler {
    fn order(&self) -> u32 {
        1
    }

    fn stats(&self) -> IntegratorStats {
        self.stats
    }

    fn reset_stats(&mut self) {
        self.stats.reset();
    }

    fn integrate(
        &mut self,
        f: &dyn DerivativeDynamics,
        x: &[f64],
        u: &[f64],
        dt: f64,
        t: f64,
    ) -> SimResult<Vec<f64>> {
        let mut guess = vec_add_scaled(x, &f.derivative(t, x, u)?, dt);
        self.stats.function_evaluations += 1;
        let t_next = t + dt;

        let mut converged = false;
        for _ in 0..self.max_iter {
            let dx = f.derivative(t_next, &guess, u)?;
            self.stats.function_evaluations += 1;
            let next = vec_add_scaled(x, &dx, dt);
            let delta: f64 = next
                .iter()
                .zip(&guess)
                .map(|(a, b)| (a - b).abs())
                .fold(0.0, f64::max);
            guess = next;
            if delta < self.tol {
                converged = true;
                break;
            }
        }

        self.stats.total_steps += 1;
        if converged && is_finite_vec(&guess) {
            self.stats.accepted_steps += 1;
            Ok(guess)
        } else {
            // Non-convergence falls back to forward Euler; still a
            // successful step.
            self.stats.accepted_steps += 1;
            let dx = f.derivative(t, x, u)?;
            self.stats.function_evaluations += 1;
            Ok(vec_add_scaled(x, &dx, dt))
        }
    }
}

/// Midpoint-rule second-order Runge-Kutta.
#[derive(Debug, Default)]
pub struct Rk2 {
    stats: IntegratorStats,
}

impl Rk2 {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Integrator for Rk2 {
    fn order(&self) -> u32 {
        2
    }

    fn stats(&self) -> IntegratorStats {
        self.stats
    }

    fn reset_stats(&mut self) {
        self.stats.reset();
    }

    fn integrate(
        &mut self,
        f: &dyn DerivativeDynamics,
        x: &[f64],
        u: &[f64],
        dt: f64,
        t: f64,
    ) -> SimResult<Vec<f64>> {
        let k1 = f.derivative(t, x, u)?;
        let mid = vec_add_scaled(x, &k1, dt / 2.0);
        let k2 = f.derivative(t + dt / 2.0, &mid, u)?;
        self.stats.function_evaluations += 2;
        self.stats.total_steps += 1;
        self.stats.accepted_steps += 1;
        Ok(vec_add_scaled(x, &k2, dt))
    }
}

/// Classical fourth-order Runge-Kutta.
#[derive(Debug, Default)]
pub struct Rk4 {
    stats: IntegratorStats,
}

impl Rk4 {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Integrator for Rk4 {
    fn order(&self) -> u32 {
        4
    }

    fn stats(&self) -> IntegratorStats {
        self.stats
    }

    fn reset_stats(&mut self) {
        self.stats.reset();
    }

    fn integrate(
        &mut self,
        f: &dyn DerivativeDynamics,
        x: &[f64],
        u: &[f64],
        dt: f64,
        t: f64,
    ) -> SimResult<Vec<f64>> {
        let k1 = f.derivative(t, x, u)?;
        let k2 = f.derivative(t + dt / 2.0, &vec_add_scaled(x, &k1, dt / 2.0), u)?;
        let k3 = f.derivative(t + dt / 2.0, &vec_add_scaled(x, &k2, dt / 2.0), u)?;
        let k4 = f.derivative(t + dt, &vec_add_scaled(x, &k3, dt), u)?;
        self.stats.function_evaluations += 4;
        self.stats.total_steps += 1;
        self.stats.accepted_steps += 1;

        let x_new = (0..x.len())
            .map(|i| x[i] + dt / 6.0 * (k1[i] + 2.0 * k2[i] + 2.0 * k3[i] + k4[i]))
            .collect();
        Ok(x_new)
    }
}

/// The Runge-Kutta 3/8 rule: same order as classical RK4 with
/// alternative tableau weights, included for its smaller error
/// constant on oscillatory systems.
#[derive(Debug, Default)]
pub struct Rk38 {
    stats: IntegratorStats,
}

impl Rk38 {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Integrator for Rk38 {
    fn order(&self) -> u32 {
        4
    }

    fn stats(&self) -> IntegratorStats {
        self.stats
    }

    fn reset_stats(&mut self) {
        self.stats.reset();
    }

    fn integrate(
        &mut self,
        f: &dyn DerivativeDynamics,
        x: &[f64],
        u: &[f64],
        dt: f64,
        t: f64,
    ) -> SimResult<Vec<f64>> {
        let k1 = f.derivative(t, x, u)?;
        let k2 = f.derivative(t + dt / 3.0, &vec_add_scaled(x, &k1, dt / 3.0), u)?;

        let x3: Vec<f64> = (0..x.len())
            .map(|i| x[i] + dt * (-k1[i] / 3.0 + k2[i]))
            .collect();
        let k3 = f.derivative(t + 2.0 * dt / 3.0, &x3, u)?;

        let x4: Vec<f64> = (0..x.len())
            .map(|i| x[i] + dt * (k1[i] - k2[i] + k3[i]))
            .collect();
        let k4 = f.derivative(t + dt, &x4, u)?;

        self.stats.function_evaluations += 4;
        self.stats.total_steps += 1;
        self.stats.accepted_steps += 1;

        let x_new = (0..x.len())
            .map(|i| x[i] + dt / 8.0 * (k1[i] + 3.0 * k2[i] + 3.0 * k3[i] + k4[i]))
            .collect();
        Ok(x_new)
    }
}

/// Shared constructor error for integrators that validate their own
/// parameters (e.g. `BackwardEuler::with_max_iter(0)`).
pub fn invalid_param(name: &str, value: impl std::fmt::Display) -> SimError {
    SimError::invalid_input(format!("invalid integrator parameter {name}={value}"))
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Exponential;
    impl DerivativeDynamics for Exponential {
        fn derivative(&self, _t: f64, x: &[f64], _u: &[f64]) -> SimResult<Vec<f64>> {
            Ok(x.iter().map(|xi| -xi).collect())
        }
    }

    #[test]
    fn forward_euler_matches_analytic_to_first_order() {
        let mut integ = ForwardEuler::new();
        let dyn_model = Exponential;
        let x_new = integ.integrate(&dyn_model, &[1.0], &[], 0.01, 0.0).unwrap();
        assert!((x_new[0] - 0.99).abs() < 1e-12);
        assert_eq!(integ.stats().function_evaluations, 1);
    }

    #[test]
    fn rk4_is_more_accurate_than_euler_for_same_dt() {
        let dyn_model = Exponential;
        let dt = 0.1;
        let mut euler = ForwardEuler::new();
        let mut rk4 = Rk4::new();

        let exact = (-dt as f64).exp();
        let e_err = (euler.integrate(&dyn_model, &[1.0], &[], dt, 0.0).unwrap()[0] - exact).abs();
        let rk4_err = (rk4.integrate(&dyn_model, &[1.0], &[], dt, 0.0).unwrap()[0] - exact).abs();
        assert!(rk4_err < e_err);
    }

    #[test]
    fn rk2_and_rk38_are_finite_and_stable() {
        let dyn_model = Exponential;
        let mut rk2 = Rk2::new();
        let mut rk38 = Rk38::new();
        let a = rk2.integrate(&dyn_model, &[2.0], &[], 0.05, 0.0).unwrap();
        let b = rk38.integrate(&dyn_model, &[2.0], &[], 0.05, 0.0).unwrap();
        assert!(is_finite_vec(&a));
        assert!(is_finite_vec(&b));
        assert_eq!(rk2.order(), 2);
        assert_eq!(rk38.order(), 4);
    }

    #[test]
    fn backward_euler_converges_on_linear_system() {
        let dyn_model = Exponential;
        let mut be = BackwardEuler::new();
        let x_new = be.integrate(&dyn_model, &[1.0], &[], 0.01, 0.0).unwrap();
        // Implicit Euler for x' = -x: x_new = x / (1 + dt)
        let expected = 1.0 / 1.01;
        assert!((x_new[0] - expected).abs() < 1e-6);
    }
}
