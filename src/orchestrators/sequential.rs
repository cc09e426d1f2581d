//! The reference orchestrator: a linear loop over the horizon. Every
//! other orchestrator variant must reproduce this one's trajectories
//! exactly when fed identical inputs and a sequential scheduler.

use super::{mark_truncated, ExecuteOptions, ExecutionStats};
use crate::controller::{Controller, ControllerHistory, ControllerState};
use crate::dynamics::DerivativeDynamics;
use crate::error::{SimError, SimResult};
use crate::integrators::Integrator;
use crate::result::{Metadata, ResultContainer};
use crate::safety::SafetyGuardManager;
use std::time::Instant;

/// Either a precomputed control sequence or a live controller: each
/// step's `u_i` comes from the sequence at that index, or from calling
/// the controller's `compute_control`.
pub enum ControlSource<'a> {
    Sequence(Vec<Vec<f64>>),
    Live(&'a dyn Controller),
}

pub struct Sequential<'a> {
    dynamics: &'a dyn DerivativeDynamics,
    integrator: Box<dyn Integrator>,
    guards: SafetyGuardManager,
    stats: ExecutionStats,
}

impl<'a> Sequential<'a> {
    pub fn new(dynamics: &'a dyn DerivativeDynamics, integrator: Box<dyn Integrator>) -> Self {
        Sequential {
            dynamics,
            integrator,
            guards: SafetyGuardManager::new(),
            stats: ExecutionStats::default(),
        }
    }

    pub fn with_guards(mut self, guards: SafetyGuardManager) -> Self {
        self.guards = guards;
        self
    }

    pub fn stats(&self) -> ExecutionStats {
        self.stats
    }

    pub fn execute(
        &mut self,
        x0: &[f64],
        control: ControlSource,
        dt: f64,
        horizon: usize,
        opts: &ExecuteOptions,
    ) -> SimResult<ResultContainer> {
        if dt <= 0.0 {
            return Err(SimError::invalid_input("dt must be strictly positive"));
        }
        if !x0.iter().all(|v| v.is_finite()) {
            return Err(SimError::invalid_input("initial state must be finite"));
        }

        let wall_start = Instant::now();
        let mut times = Vec::with_capacity(horizon + 1);
        let mut states = Vec::with_capacity(horizon + 1);
        let mut controls = Vec::with_capacity(horizon);

        let mut x = x0.to_vec();
        let mut t = opts.t0;
        times.push(t);
        states.push(x.clone());

        let mut controller_state = ControllerState::default();
        let mut controller_history = ControllerHistory::default();
        let mut meta = Metadata::new();
        let mut truncated_at: Option<usize> = None;

        for i in 0..horizon {
            if opts.safety_guards && !self.guards.is_empty() {
                if let Err(err) = self.guards.check_all(&x, i) {
                    log::warn!("sequential orchestrator: guard violation at step {i}: {err}");
                    truncated_at = Some(i);
                    mark_truncated(&mut meta, true, Some("safety_violation"));
                    break;
                }
            }

            let u = match &control {
                ControlSource::Sequence(seq) => seq
                    .get(i)
                    .cloned()
                    .ok_or_else(|| SimError::invalid_input("control sequence shorter than horizon"))?,
                ControlSource::Live(controller) => {
                    let state = std::mem::take(&mut controller_state);
                    let history = std::mem::replace(&mut controller_history, ControllerHistory::default());
                    let out = controller.compute_control(&x, state, history).map_err(|e| match e {
                        crate::controller::ControllerError::Sim(s) => s,
                        crate::controller::ControllerError::Diverged(msg) => {
                            SimError::NumericFailure { step: i, reason: msg }
                        }
                    })?;
                    controller_state = out.state;
                    controller_history = out.history;
                    vec![out.u]
                }
            };
            controls.push(u.clone());

            let x_new = self.integrator.integrate(self.dynamics, &x, &u, dt, t)?;
            if !x_new.iter().all(|v| v.is_finite()) {
                log::error!("sequential orchestrator: non-finite state at step {i}");
                truncated_at = Some(i);
                mark_truncated(&mut meta, true, Some("numeric_failure"));
                break;
            }

            x = x_new;
            t += dt;
            times.push(t);
            states.push(x.clone());
            self.stats.total_steps += 1;

            if let Some(stop_fn) = opts.stop_fn {
                if stop_fn(&x) {
                    truncated_at = Some(i + 1);
                    mark_truncated(&mut meta, true, Some("stop_fn"));
                    break;
                }
            }
        }

        if truncated_at.is_none() {
            mark_truncated(&mut meta, false, None);
        }

        self.stats.record_run(states.len() as u64, wall_start.elapsed());
        Ok(ResultContainer::new(times, states, controls, meta))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Decay;
    impl DerivativeDynamics for Decay {
        fn derivative(&self, _t: f64, x: &[f64], u: &[f64]) -> SimResult<Vec<f64>> {
            Ok(vec![-x[0] + u.first().copied().unwrap_or(0.0)])
        }
    }

    #[test]
    fn initial_state_is_preserved_exactly() {
        let dyn_model = Decay;
        let mut orch = Sequential::new(&dyn_model, Box::new(crate::integrators::fixed_step::Rk4::new()));
        let result = orch
            .execute(
                &[1.0],
                ControlSource::Sequence(vec![vec![0.0]; 5]),
                0.01,
                5,
                &ExecuteOptions::default(),
            )
            .unwrap();
        assert_eq!(result.states()[0], vec![1.0]);
        assert_eq!(result.len(), 6);
    }

    #[test]
    fn stop_fn_truncates_rollout() {
        let dyn_model = Decay;
        let mut orch = Sequential::new(&dyn_model, Box::new(crate::integrators::fixed_step::Rk4::new()));
        let stop = |x: &[f64]| x[0] < 0.5;
        let opts = ExecuteOptions {
            stop_fn: Some(&stop),
            ..Default::default()
        };
        let result = orch
            .execute(&[1.0], ControlSource::Sequence(vec![vec![0.0]; 200]), 0.01, 200, &opts)
            .unwrap();
        assert!(result.len() < 201);
        assert_eq!(result.metadata().get("truncated"), Some("true"));
    }

    #[test]
    fn rejects_non_positive_dt() {
        let dyn_model = Decay;
        let mut orch = Sequential::new(&dyn_model, Box::new(crate::integrators::fixed_step::Rk4::new()));
        let err = orch
            .execute(&[1.0], ControlSource::Sequence(vec![]), 0.0, 1, &ExecuteOptions::default())
            .unwrap_err();
        assert!(matches!(err, SimError::InvalidInput(_)));
    }
}
