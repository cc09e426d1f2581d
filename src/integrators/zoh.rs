//! Exact zero-order-hold discretization for linear time-invariant
//! systems via the augmented-matrix exponential, with an RK4 fallback
//! for nonlinear plants.

use super::fixed_step::Rk4;
use super::{Integrator, IntegratorStats};
use crate::dynamics::{DerivativeDynamics, LinearTimeInvariant};
use crate::error::SimResult;

/// Discretizes `dx/dt = A x + B u` exactly over a fixed `dt` by
/// exponentiating the augmented matrix
/// `M = [[A, B], [0, 0]]`, `exp(M*dt) = [[A_d, B_d], [0, I]]`.
/// Caches `(A_d, B_d)` keyed on `dt` since most callers hold `dt` fixed
/// across a rollout.
#[derive(Debug)]
pub struct ZeroOrderHold {
    stats: IntegratorStats,
    cached_dt: Option<f64>,
    a_d: Vec<f64>,
    b_d: Vec<f64>,
    fallback: Rk4,
}

impl ZeroOrderHold {
    pub fn new() -> Self {
        ZeroOrderHold {
            stats: IntegratorStats::default(),
            cached_dt: None,
            a_d: Vec::new(),
            b_d: Vec::new(),
            fallback: Rk4::new(),
        }
    }

    fn ensure_cache(&mut self, plant: &dyn LinearTimeInvariant, dt: f64) {
        if self.cached_dt == Some(dt) {
            return;
        }
        let n = plant.state_dim_exact();
        let m = plant.input_dim();
        let (a_d, b_d) = discretize(plant.a_matrix(), plant.b_matrix(), n, m, dt);
        self.a_d = a_d;
        self.b_d = b_d;
        self.cached_dt = Some(dt);
    }

    /// Advances `x` using the cached exact discretization of `plant`.
    pub fn integrate_lti(
        &mut self,
        plant: &dyn LinearTimeInvariant,
        x: &[f64],
        u: &[f64],
        dt: f64,
    ) -> SimResult<Vec<f64>> {
        self.ensure_cache(plant, dt);
        let n = plant.state_dim_exact();
        let m = plant.input_dim();
        self.stats.total_steps += 1;
        self.stats.accepted_steps += 1;
        let mut x_new = vec![0.0; n];
        for i in 0..n {
            let mut acc = 0.0;
            for j in 0..n {
                acc += self.a_d[i * n + j] * x[j];
            }
            for j in 0..m {
                acc += self.b_d[i * m + j] * u.get(j).copied().unwrap_or(0.0);
            }
            x_new[i] = acc;
        }
        Ok(x_new)
    }
}

impl Default for ZeroOrderHold {
    fn default() -> Self {
        Self::new()
    }
}

impl Integrator for ZeroOrderHold {
    fn order(&self) -> u32 {
        // Exact for LTI plants; the documented order applies only to
        // the RK4 fallback path used for non-LTI dynamics.
        4
    }

    fn stats(&self) -> IntegratorStats {
        self.stats
    }

    fn reset_stats(&mut self) {
        self.stats.reset();
        self.fallback.reset_stats();
    }

    /// Generic `DerivativeDynamics` entry point: falls back to RK4
    /// since the exact exponential path requires [`LinearTimeInvariant`]
    /// matrices, which aren't available through the generic trait.
    fn integrate(
        &mut self,
        f: &dyn DerivativeDynamics,
        x: &[f64],
        u: &[f64],
        dt: f64,
        t: f64,
    ) -> SimResult<Vec<f64>> {
        let out = self.fallback.integrate(f, x, u, dt, t)?;
        let fb_stats = self.fallback.stats();
        self.stats.total_steps += 1;
        self.stats.accepted_steps += 1;
        self.stats.function_evaluations = fb_stats.function_evaluations;
        Ok(out)
    }
}

/// Computes `(A_d, B_d)` via the scaling-and-squaring-free series
/// expansion of the augmented matrix exponential. `n` and `m` are the
/// state and input dimensions; matrices are row-major.
fn discretize(a: &[f64], b: &[f64], n: usize, m: usize, dt: f64) -> (Vec<f64>, Vec<f64>) {
    let dim = n + m;
    let mut aug = vec![0.0; dim * dim];
    for i in 0..n {
        for j in 0..n {
            aug[i * dim + j] = a[i * n + j] * dt;
        }
        for j in 0..m {
            aug[i * dim + (n + j)] = b[i * m + j] * dt;
        }
    }
    // Bottom-right (m x m) block and bottom-left stay zero: the
    // augmented matrix is block upper-triangular, which is exactly
    // what makes exp(M)'s lower-right block come out to I.

    let exp_aug = matrix_exp(&aug, dim);

    let mut a_d = vec![0.0; n * n];
    for i in 0..n {
        for j in 0..n {
            a_d[i * n + j] = exp_aug[i * dim + j];
        }
    }
    let mut b_d = vec![0.0; n * m];
    for i in 0..n {
        for j in 0..m {
            b_d[i * m + j] = exp_aug[i * dim + (n + j)];
        }
    }
    (a_d, b_d)
}

/// Matrix exponential via scaling-and-squaring with a truncated Taylor
/// series, adequate for the modest state dimensions this kernel deals
/// with (no need for Pade approximants here).
fn matrix_exp(m: &[f64], dim: usize) -> Vec<f64> {
    let norm: f64 = m.iter().fold(0.0_f64, |acc, v| acc.max(v.abs())) * dim as f64;
    let scale_pow = if norm > 0.0 {
        (norm.log2().ceil() as i32 + 1).max(0)
    } else {
        0
    };
    let scale = 2f64.powi(scale_pow);
    let scaled: Vec<f64> = m.iter().map(|v| v / scale).collect();

    let mut result = identity(dim);
    let mut term = identity(dim);
    for k in 1..=18 {
        term = mat_mul(&term, &scaled, dim);
        let factorial_k = k as f64;
        for v in term.iter_mut() {
            *v /= factorial_k;
        }
        for (r, t) in result.iter_mut().zip(&term) {
            *r += t;
        }
    }

    for _ in 0..scale_pow {
        result = mat_mul(&result, &result, dim);
    }
    result
}

fn identity(dim: usize) -> Vec<f64> {
    let mut out = vec![0.0; dim * dim];
    for i in 0..dim {
        out[i * dim + i] = 1.0;
    }
    out
}

fn mat_mul(a: &[f64], b: &[f64], dim: usize) -> Vec<f64> {
    let mut out = vec![0.0; dim * dim];
    for i in 0..dim {
        for k in 0..dim {
            let aik = a[i * dim + k];
            if aik == 0.0 {
                continue;
            }
            for j in 0..dim {
                out[i * dim + j] += aik * b[k * dim + j];
            }
        }
    }
    out
}
