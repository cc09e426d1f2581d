//! Embedded Dormand-Prince 4(5) with PI step-size control.

use super::{is_finite_vec, rms_error_norm, AdaptiveIntegrator, AdaptiveStepResult, Integrator, IntegratorStats};
use crate::dynamics::DerivativeDynamics;
use crate::error::SimResult;

// Butcher tableau (Dormand & Prince, 1980).
const C2: f64 = 1.0 / 5.0;
const C3: f64 = 3.0 / 10.0;
const C4: f64 = 4.0 / 5.0;
const C5: f64 = 8.0 / 9.0;
const C6: f64 = 1.0;
const C7: f64 = 1.0;

const A21: f64 = 1.0 / 5.0;
const A31: f64 = 3.0 / 40.0;
const A32: f64 = 9.0 / 40.0;
const A41: f64 = 44.0 / 45.0;
const A42: f64 = -56.0 / 15.0;
const A43: f64 = 32.0 / 9.0;
const A51: f64 = 19372.0 / 6561.0;
const A52: f64 = -25360.0 / 2187.0;
const A53: f64 = 64448.0 / 6561.0;
const A54: f64 = -212.0 / 729.0;
const A61: f64 = 9017.0 / 3168.0;
const A62: f64 = -355.0 / 33.0;
const A63: f64 = 46732.0 / 5247.0;
const A64: f64 = 49.0 / 176.0;
const A65: f64 = -5103.0 / 18656.0;
const A71: f64 = 35.0 / 384.0;
const A73: f64 = 500.0 / 1113.0;
const A74: f64 = 125.0 / 192.0;
const A75: f64 = -2187.0 / 6784.0;
const A76: f64 = 11.0 / 84.0;

// 5th-order solution weights (= row 7, the FSAL point).
const B1: f64 = 35.0 / 384.0;
const B3: f64 = 500.0 / 1113.0;
const B4: f64 = 125.0 / 192.0;
const B5: f64 = -2187.0 / 6784.0;
const B6: f64 = 11.0 / 84.0;

// 4th-order embedded weights, used only to form the error estimate.
const E1: f64 = 5179.0 / 57600.0;
const E3: f64 = 7571.0 / 16695.0;
const E4: f64 = 393.0 / 640.0;
const E5: f64 = -92097.0 / 339200.0;
const E6: f64 = 187.0 / 2100.0;
const E7: f64 = 1.0 / 40.0;

/// Dormand-Prince 4(5): fifth-order propagation with a fourth-order
/// embedded error estimate, 7 derivative evaluations per accepted
/// step (6 on steps following an accepted one, FSAL is not exploited
/// here to keep the evaluator side effect-free across rejections).
#[derive(Debug)]
pub struct DormandPrince45 {
    stats: IntegratorStats,
}

impl Default for DormandPrince45 {
    fn default() -> Self {
        DormandPrince45 {
            stats: IntegratorStats::default(),
        }
    }
}

impl DormandPrince45 {
    pub fn new() -> Self {
        Self::default()
    }

    fn stages(
        &mut self,
        f: &dyn DerivativeDynamics,
        x: &[f64],
        u: &[f64],
        dt: f64,
        t: f64,
    ) -> SimResult<[Vec<f64>; 7]> {
        let n = x.len();
        let combine = |base: &[f64], terms: &[(f64, &Vec<f64>)]| -> Vec<f64> {
            (0..n)
                .map(|i| base[i] + dt * terms.iter().map(|(c, k)| c * k[i]).sum::<f64>())
                .collect()
        };

        let k1 = f.derivative(t, x, u)?;
        let x2 = combine(x, &[(A21, &k1)]);
        let k2 = f.derivative(t + C2 * dt, &x2, u)?;
        let x3 = combine(x, &[(A31, &k1), (A32, &k2)]);
        let k3 = f.derivative(t + C3 * dt, &x3, u)?;
        let x4 = combine(x, &[(A41, &k1), (A42, &k2), (A43, &k3)]);
        let k4 = f.derivative(t + C4 * dt, &x4, u)?;
        let x5 = combine(x, &[(A51, &k1), (A52, &k2), (A53, &k3), (A54, &k4)]);
        let k5 = f.derivative(t + C5 * dt, &x5, u)?;
        let x6 = combine(x, &[(A61, &k1), (A62, &k2), (A63, &k3), (A64, &k4), (A65, &k5)]);
        let k6 = f.derivative(t + C6 * dt, &x6, u)?;
        let x7 = combine(
            x,
            &[(A71, &k1), (A73, &k3), (A74, &k4), (A75, &k5), (A76, &k6)],
        );
        let k7 = f.derivative(t + C7 * dt, &x7, u)?;

        self.stats.function_evaluations += 7;
        Ok([k1, k2, k3, k4, k5, k6, k7])
    }
}

impl Integrator for DormandPrince45 {
    fn order(&self) -> u32 {
        5
    }

    fn adaptive(&self) -> bool {
        true
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
        let [k1, _, k3, k4, k5, k6, _] = self.stages(f, x, u, dt, t)?;
        self.stats.total_steps += 1;
        self.stats.accepted_steps += 1;
        let n = x.len();
        Ok((0..n)
            .map(|i| {
                x[i] + dt
                    * (B1 * k1[i] + B3 * k3[i] + B4 * k4[i] + B5 * k5[i] + B6 * k6[i])
            })
            .collect())
    }
}

impl AdaptiveIntegrator for DormandPrince45 {
    fn integrate_adaptive(
        &mut self,
        f: &dyn DerivativeDynamics,
        x: &[f64],
        u: &[f64],
        dt: f64,
        t: f64,
        rtol: f64,
        atol: f64,
    ) -> SimResult<AdaptiveStepResult> {
        let n = x.len();
        let [k1, _, k3, k4, k5, k6, k7] = self.stages(f, x, u, dt, t)?;

        let x_new: Vec<f64> = (0..n)
            .map(|i| x[i] + dt * (B1 * k1[i] + B3 * k3[i] + B4 * k4[i] + B5 * k5[i] + B6 * k6[i]))
            .collect();

        let err: Vec<f64> = (0..n)
            .map(|i| {
                dt * ((B1 - E1) * k1[i]
                    + (B3 - E3) * k3[i]
                    + (B4 - E4) * k4[i]
                    + (B5 - E5) * k5[i]
                    + (B6 - E6) * k6[i]
                    - E7 * k7[i])
            })
            .collect();

        let error_estimate = rms_error_norm(&err, x, &x_new, atol, rtol);
        let accepted = error_estimate <= 1.0 && is_finite_vec(&x_new);

        self.stats.total_steps += 1;
        if accepted {
            self.stats.accepted_steps += 1;
        } else {
            self.stats.rejected_steps += 1;
        }

        // PI-flavoured step suggestion: classic error-feedback formula
        // with safety factor and a 5x/0.1x growth/shrink clamp (same
        // clamp as `AdaptiveStepController`, kept here so the
        // integrator can be used standalone without a controller).
        let safety = 0.9;
        let order = self.order() as f64;
        let factor = if error_estimate > 0.0 {
            safety * error_estimate.powf(-1.0 / (order + 1.0))
        } else {
            5.0
        };
        let dt_suggest = dt * factor.clamp(0.1, 5.0);

        let x_result = if accepted { x_new } else { x.to_vec() };

        Ok(AdaptiveStepResult {
            x_new: x_result,
            accepted,
            error_estimate,
            dt_suggest,
        })
    }
}
