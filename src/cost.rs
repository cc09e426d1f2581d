//! # Cost Evaluator
//!
//! Composite cost from a batch trajectory tensor: integrated state
//! error, control effort, control slew, and sliding-variable energy,
//! each normalized and linearly combined, with a graded penalty for
//! early-terminated (unstable) rollouts.

use crate::batch_sim::{BatchSimConfig, BatchSimulator, BatchTrajectory};
use crate::controller::{ControllerFactory, ControllerHistory, ControllerState};
use crate::dynamics::StepDynamics;
use crate::error::{SimError, SimResult};

const FALL_ANGLE_LIMIT: f64 = std::f64::consts::FRAC_PI_2;
const EXPLODE_LIMIT: f64 = 1e6;
const DEFAULT_U_MAX_FALLBACK: f64 = 150.0;
const NORMALIZATION_FLOOR: f64 = 1e-12;
const DEFAULT_INSTABILITY_KAPPA: f64 = 100.0;

#[derive(Debug, Clone, Copy)]
pub struct CostWeights {
    pub state_error: f64,
    pub control_effort: f64,
    pub control_rate: f64,
    pub sliding: f64,
}

impl Default for CostWeights {
    fn default() -> Self {
        CostWeights {
            state_error: 1.0,
            control_effort: 0.1,
            control_rate: 0.1,
            sliding: 0.1,
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct NormalizationThresholds {
    pub ise: f64,
    pub effort: f64,
    pub slew: f64,
    pub sigma_energy: f64,
}

impl Default for NormalizationThresholds {
    fn default() -> Self {
        NormalizationThresholds {
            ise: 1.0,
            effort: 1.0,
            slew: 1.0,
            sigma_energy: 1.0,
        }
    }
}

pub struct CostEvaluator<'a> {
    dynamics: &'a dyn StepDynamics,
    weights: CostWeights,
    normalization: NormalizationThresholds,
    instability_penalty: Option<f64>,
    u_max: f64,
    min_cost_floor: f64,
}

fn normalize(value: f64, threshold: f64) -> f64 {
    if threshold > NORMALIZATION_FLOOR {
        value / threshold
    } else {
        value
    }
}

impl<'a> CostEvaluator<'a> {
    /// `u_max` resolution: an explicit argument wins unconditionally;
    /// otherwise a probe controller (built with a dummy unit-gain
    /// vector of the right arity) is queried for `max_force`, falling
    /// back to [`DEFAULT_U_MAX_FALLBACK`].
    pub fn new(
        dynamics: &'a dyn StepDynamics,
        weights: CostWeights,
        normalization: NormalizationThresholds,
        instability_penalty: Option<f64>,
        u_max: Option<f64>,
        probe_factory: Option<(&dyn ControllerFactory, usize)>,
    ) -> Self {
        let resolved_u_max = u_max.unwrap_or_else(|| {
            probe_factory
                .and_then(|(factory, gain_arity)| {
                    factory
                        .build(&vec![1.0; gain_arity])
                        .ok()
                        .and_then(|c| c.max_force())
                })
                .unwrap_or(DEFAULT_U_MAX_FALLBACK)
        });

        CostEvaluator {
            dynamics,
            weights,
            normalization,
            instability_penalty,
            u_max: resolved_u_max,
            min_cost_floor: 0.0,
        }
    }

    /// Builds an evaluator from the TOML-loadable `[cost_function]`
    /// table instead of raw weight/threshold primitives.
    pub fn from_config(
        dynamics: &'a dyn StepDynamics,
        cfg: &crate::config::CostFunctionConfig,
        u_max: Option<f64>,
        probe_factory: Option<(&dyn ControllerFactory, usize)>,
    ) -> Self {
        let weights = CostWeights {
            state_error: cfg.weights.state_error,
            control_effort: cfg.weights.control_effort,
            control_rate: cfg.weights.control_rate,
            sliding: cfg.weights.sliding,
        };
        let normalization = NormalizationThresholds {
            ise: cfg.normalisation.ise,
            effort: cfg.normalisation.effort,
            slew: cfg.normalisation.slew,
            sigma_energy: cfg.normalisation.sigma_energy,
        };
        Self::new(dynamics, weights, normalization, cfg.instability_penalty, u_max, probe_factory)
            .with_min_cost_floor(cfg.min_cost_floor)
    }

    pub fn with_min_cost_floor(mut self, floor: f64) -> Self {
        self.min_cost_floor = floor;
        self
    }

    fn instability_penalty_value(&self) -> f64 {
        if let Some(p) = self.instability_penalty {
            return p.max(f64::MIN_POSITIVE);
        }
        let n = &self.normalization;
        let sum = normalize(1.0, n.ise) + normalize(1.0, n.effort) + normalize(1.0, n.slew) + normalize(1.0, n.sigma_energy);
        (DEFAULT_INSTABILITY_KAPPA * sum).max(1.0)
    }

    /// `evaluate_batch(P) -> J`, `P: (B, G)`.
    pub fn evaluate_batch(
        &self,
        factory: &dyn ControllerFactory,
        particles: &[Vec<f64>],
        sim_time: f64,
        dt: f64,
    ) -> Vec<f64> {
        self.evaluate_batch_inner(factory, particles, None, sim_time, dt)
    }

    /// Same as [`CostEvaluator::evaluate_batch`] but pins every row to
    /// a shared initial condition, for the robust evaluator's
    /// per-scenario dispatch.
    pub fn evaluate_batch_with_initial_state(
        &self,
        factory: &dyn ControllerFactory,
        particles: &[Vec<f64>],
        x0: &[f64],
        sim_time: f64,
        dt: f64,
    ) -> Vec<f64> {
        self.evaluate_batch_inner(factory, particles, Some(x0), sim_time, dt)
    }

    fn evaluate_batch_inner(
        &self,
        factory: &dyn ControllerFactory,
        particles: &[Vec<f64>],
        x0: Option<&[f64]>,
        sim_time: f64,
        dt: f64,
    ) -> Vec<f64> {
        let penalty = self.instability_penalty_value();
        let valid: Vec<bool> = particles
            .iter()
            .map(|row| row.iter().all(|g| g.is_finite()))
            .collect();

        if valid.iter().all(|v| !*v) {
            return vec![penalty; particles.len()];
        }

        let valid_rows: Vec<Vec<f64>> = particles
            .iter()
            .zip(&valid)
            .filter(|(_, v)| **v)
            .map(|(row, _)| row.clone())
            .collect();

        let sim = BatchSimulator::new(self.dynamics);
        let config = BatchSimConfig {
            sim_time,
            dt,
            u_max: Some(self.u_max),
            initial_state: x0.map(|s| vec![s.to_vec()]),
            ..Default::default()
        };

        let traj = match sim.run(factory, &valid_rows, &config) {
            Ok(t) => t,
            Err(e) => {
                log::warn!("cost evaluator: batch simulation failed, applying instability penalty to all rows: {e}");
                return vec![penalty; particles.len()];
            }
        };

        let costs = self.compute_cost_from_traj(&traj, dt);

        let mut result = Vec::with_capacity(particles.len());
        let mut costs_iter = costs.into_iter();
        for is_valid in &valid {
            if *is_valid {
                result.push(costs_iter.next().unwrap_or(penalty));
            } else {
                result.push(penalty);
            }
        }
        result
    }

    fn compute_cost_from_traj(&self, traj: &BatchTrajectory, dt: f64) -> Vec<f64> {
        let batch = traj.states.len();
        let mut out = Vec::with_capacity(batch);

        for r in 0..batch {
            let states = &traj.states[r];
            let controls = &traj.controls[r];
            let sigmas = &traj.sigmas[r];
            let n_samples = states.len();

            // Per-row failure step: first index where the pendulum
            // falls (|x_1| > pi/2) or the state explodes (|x_d| > 1e6).
            let mut failure_step = n_samples;
            for (k, state) in states.iter().enumerate() {
                let fall = state.get(1).map_or(false, |v| v.abs() > FALL_ANGLE_LIMIT);
                let explode = state.iter().any(|v| v.abs() > EXPLODE_LIMIT);
                if fall || explode {
                    failure_step = k;
                    break;
                }
            }

            let mask_len = failure_step.saturating_sub(1).min(controls.len());

            let mut ise = 0.0;
            for state in states.iter().take(mask_len) {
                ise += state.iter().map(|v| v * v).sum::<f64>() * dt;
            }

            let mut effort = 0.0;
            let mut slew = 0.0;
            let mut prev_u = controls.first().copied().unwrap_or(0.0);
            for &u in controls.iter().take(mask_len) {
                effort += u * u * dt;
                let du = u - prev_u;
                slew += du * du * dt;
                prev_u = u;
            }

            let mut sigma_energy = 0.0;
            for &s in sigmas.iter().take(mask_len) {
                sigma_energy += s * s * dt;
            }

            let n = &self.normalization;
            let w = &self.weights;
            let mut j = w.state_error * normalize(ise, n.ise)
                + w.control_effort * normalize(effort, n.effort)
                + w.control_rate * normalize(slew, n.slew)
                + w.sliding * normalize(sigma_energy, n.sigma_energy);

            let horizon = controls.len();
            if failure_step < horizon {
                let h = horizon as f64;
                j *= 1.0 + (h - failure_step as f64) / h;
            }

            out.push(j.max(self.min_cost_floor));
        }

        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::controller::{Controller, ControllerError, ControlOutput};

    struct UnitMassPlant;
    impl StepDynamics for UnitMassPlant {
        fn step(&self, x: &[f64], u: &[f64], dt: f64) -> SimResult<Vec<f64>> {
            Ok(vec![x[0] + x[1] * dt, x[1] + u[0] * dt])
        }
        fn state_dim(&self) -> Option<usize> {
            Some(2)
        }
    }

    struct ProportionalController {
        gain: f64,
    }
    impl Controller for ProportionalController {
        fn compute_control(
            &self,
            x: &[f64],
            state: ControllerState,
            history: ControllerHistory,
        ) -> Result<ControlOutput, ControllerError> {
            Ok(ControlOutput {
                u: -self.gain * x[0],
                state,
                history,
                sigma: Some(x[0]),
            })
        }
        fn max_force(&self) -> Option<f64> {
            Some(5.0)
        }
    }

    struct PFactory;
    impl ControllerFactory for PFactory {
        fn build(&self, gains: &[f64]) -> SimResult<Box<dyn Controller>> {
            if !gains[0].is_finite() {
                return Err(SimError::invalid_input("non-finite gain"));
            }
            Ok(Box::new(ProportionalController { gain: gains[0] }))
        }
    }

    #[test]
    fn non_finite_gains_receive_the_instability_penalty() {
        let plant = UnitMassPlant;
        let eval = CostEvaluator::new(
            &plant,
            CostWeights::default(),
            NormalizationThresholds::default(),
            Some(42.0),
            Some(5.0),
            None,
        );
        let particles = vec![vec![f64::NAN], vec![1.0]];
        let costs = eval.evaluate_batch(&PFactory, &particles, 1.0, 0.1);
        assert_eq!(costs[0], 42.0);
        assert!(costs[1] != 42.0 || costs[1] >= 0.0);
    }

    #[test]
    fn cost_is_non_negative_for_finite_gains() {
        let plant = UnitMassPlant;
        let eval = CostEvaluator::new(
            &plant,
            CostWeights::default(),
            NormalizationThresholds::default(),
            None,
            Some(5.0),
            None,
        );
        let particles = vec![vec![1.0], vec![2.0]];
        let costs = eval.evaluate_batch(&PFactory, &particles, 1.0, 0.1);
        assert!(costs.iter().all(|c| *c >= 0.0));
    }

    #[test]
    fn from_config_threads_weights_and_min_cost_floor() {
        let plant = UnitMassPlant;
        let cfg = crate::config::CostFunctionConfig {
            min_cost_floor: 10.0,
            ..crate::config::CostFunctionConfig::default()
        };
        let eval = CostEvaluator::from_config(&plant, &cfg, Some(5.0), None);
        let particles = vec![vec![0.0]];
        let costs = eval.evaluate_batch(&PFactory, &particles, 0.2, 0.05);
        assert!(costs[0] >= 10.0 - 1e-9);
    }

    #[test]
    fn u_max_falls_back_to_probe_controller_max_force() {
        let plant = UnitMassPlant;
        let eval = CostEvaluator::new(
            &plant,
            CostWeights::default(),
            NormalizationThresholds::default(),
            None,
            None,
            Some((&PFactory, 1)),
        );
        assert_eq!(eval.u_max, 5.0);
    }
}
