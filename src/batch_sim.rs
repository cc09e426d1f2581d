//! # Batch Simulator
//!
//! The hottest path: runs one controller per particle against a
//! shared [`StepDynamics`] model, vectorized across the batch and
//! synchronized step-by-step.

use crate::controller::{Controller, ControllerError, ControllerFactory, ControllerHistory, ControllerState};
use crate::dynamics::StepDynamics;
use crate::error::{SimError, SimResult};

const FALLBACK_STATE_DIM: usize = 6;

/// Per-row saturation resolution order: explicit `u_max` argument,
/// then each controller's own `max_force`, then unbounded.
fn resolve_saturation(u_max: Option<f64>, controllers: &[Box<dyn Controller>]) -> Vec<f64> {
    match u_max {
        Some(u) => vec![u; controllers.len()],
        None => controllers.iter().map(|c| c.max_force().unwrap_or(f64::INFINITY)).collect(),
    }
}

/// Dense output of one batch rollout: `(times, states, controls, sigmas)`.
#[derive(Debug)]
pub struct BatchTrajectory {
    pub times: Vec<f64>,
    pub states: Vec<Vec<Vec<f64>>>,
    pub controls: Vec<Vec<f64>>,
    pub sigmas: Vec<Vec<f64>>,
}

pub struct BatchSimConfig {
    pub sim_time: f64,
    pub dt: f64,
    pub u_max: Option<f64>,
    pub initial_state: Option<Vec<Vec<f64>>>,
    pub convergence_tol: Option<f64>,
    pub grace_period: f64,
}

impl Default for BatchSimConfig {
    fn default() -> Self {
        BatchSimConfig {
            sim_time: 1.0,
            dt: 0.01,
            u_max: None,
            initial_state: None,
            convergence_tol: None,
            grace_period: 0.0,
        }
    }
}

/// Runs a population of gain vectors through a shared dynamics model.
pub struct BatchSimulator<'a> {
    dynamics: &'a dyn StepDynamics,
}

impl<'a> BatchSimulator<'a> {
    pub fn new(dynamics: &'a dyn StepDynamics) -> Self {
        BatchSimulator { dynamics }
    }

    /// Runs the batch described by `particles: (B, G)` through
    /// `factory`, returning a uniformly shaped trajectory tensor.
    pub fn run(
        &self,
        factory: &dyn ControllerFactory,
        particles: &[Vec<f64>],
        config: &BatchSimConfig,
    ) -> SimResult<BatchTrajectory> {
        let batch = particles.len();
        if batch == 0 {
            return Err(SimError::invalid_input("particles batch must be non-empty"));
        }
        if config.dt <= 0.0 {
            return Err(SimError::invalid_input("dt must be strictly positive"));
        }

        let horizon = (config.sim_time / config.dt).round() as usize;

        // Step 1: build controllers, retrying once on factory failure
        // before giving up on the particle entirely.
        let mut controllers: Vec<Box<dyn Controller>> = Vec::with_capacity(batch);
        for (row, gains) in particles.iter().enumerate() {
            let built = match factory.build(gains) {
                Ok(c) => Ok(c),
                Err(first_err) => {
                    log::warn!("batch simulator: controller factory failed for particle {row}, retrying once: {first_err}");
                    factory.build(gains)
                }
            };
            match built {
                Ok(c) => controllers.push(c),
                Err(reason) => {
                    return Err(SimError::FactoryFailure {
                        particle: row,
                        reason: reason.to_string(),
                    })
                }
            }
        }

        let state_dim = controllers
            .iter()
            .find_map(|c| c.state_dim())
            .or_else(|| self.dynamics.state_dim())
            .unwrap_or(FALLBACK_STATE_DIM);

        let rows0: Vec<Vec<f64>> = match &config.initial_state {
            Some(rows) if rows.len() == batch => rows.clone(),
            Some(rows) if rows.len() == 1 => vec![rows[0].clone(); batch],
            Some(_) => {
                return Err(SimError::invalid_input(
                    "initial_state batch dimension does not match particles",
                ))
            }
            None => vec![vec![0.0; state_dim]; batch],
        };

        let saturation = resolve_saturation(config.u_max, &controllers);

        let mut states: Vec<Vec<Vec<f64>>> = rows0.iter().map(|r| vec![r.clone()]).collect();
        let mut controls: Vec<Vec<f64>> = vec![Vec::with_capacity(horizon); batch];
        let mut sigmas: Vec<Vec<f64>> = vec![Vec::with_capacity(horizon); batch];
        let mut row_states: Vec<Option<ControllerState>> =
            controllers.iter().map(|c| Some(c.initialize_state())).collect();
        let mut row_histories: Vec<Option<ControllerHistory>> =
            controllers.iter().map(|c| Some(c.initialize_history())).collect();

        let mut times = vec![0.0];
        let mut terminated_at = horizon;

        'outer: for i in 0..horizon {
            let t = i as f64 * config.dt;
            let mut sigma_row = vec![0.0; batch];

            for r in 0..batch {
                let controller = &controllers[r];
                let x = states[r].last().unwrap().clone();
                let cs = row_states[r].take().unwrap_or_default();
                let ch = row_histories[r].take().unwrap_or_default();

                let out = match controller.compute_control(&x, cs, ch) {
                    Ok(out) => out,
                    Err(ControllerError::Diverged(reason)) => {
                        log::warn!("batch simulator: terminating batch at step {i}: {reason}");
                        terminated_at = i;
                        break 'outer;
                    }
                    Err(ControllerError::Sim(e)) => return Err(e),
                };

                let u = out.u.clamp(-saturation[r], saturation[r]);
                sigma_row[r] = out.sigma.unwrap_or(0.0);
                row_states[r] = Some(out.state);
                row_histories[r] = Some(out.history);

                let x_new = self.dynamics.step(&x, &[u], config.dt)?;
                if !x_new.iter().all(|v| v.is_finite()) {
                    log::warn!("batch simulator: non-finite state for row {r} at step {i}, terminating batch");
                    terminated_at = i;
                    break 'outer;
                }

                states[r].push(x_new);
                controls[r].push(u);
                sigmas[r].push(sigma_row[r]);
            }

            times.push((i + 1) as f64 * config.dt);

            if let Some(tol) = config.convergence_tol {
                if t >= config.grace_period {
                    let max_sigma = sigma_row.iter().fold(0.0_f64, |acc, s| acc.max(s.abs()));
                    if max_sigma < tol {
                        terminated_at = i + 1;
                        break 'outer;
                    }
                }
            }
        }

        // Uniform truncation: every row truncates to the same length,
        // matching the point the batch as a whole stopped advancing.
        let len = terminated_at + 1;
        for row in states.iter_mut() {
            row.truncate(len);
        }
        for row in controls.iter_mut() {
            row.truncate(terminated_at);
        }
        for row in sigmas.iter_mut() {
            row.truncate(terminated_at);
        }
        times.truncate(len);

        Ok(BatchTrajectory {
            times,
            states,
            controls,
            sigmas,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct UnitMassPlant;
    impl StepDynamics for UnitMassPlant {
        fn step(&self, x: &[f64], u: &[f64], dt: f64) -> SimResult<Vec<f64>> {
            // x = [position, velocity]
            let a = u[0];
            Ok(vec![x[0] + x[1] * dt, x[1] + a * dt])
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
        ) -> Result<crate::controller::ControlOutput, ControllerError> {
            Ok(crate::controller::ControlOutput {
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
            Ok(Box::new(ProportionalController { gain: gains[0] }))
        }
    }

    #[test]
    fn produces_uniform_batch_shape() {
        let plant = UnitMassPlant;
        let sim = BatchSimulator::new(&plant);
        let particles = vec![vec![1.0], vec![2.0], vec![0.5]];
        let config = BatchSimConfig {
            sim_time: 1.0,
            dt: 0.1,
            initial_state: Some(vec![vec![1.0, 0.0]]),
            ..Default::default()
        };
        let traj = sim.run(&PFactory, &particles, &config).unwrap();
        assert_eq!(traj.states.len(), 3);
        let h = traj.states[0].len();
        assert!(traj.states.iter().all(|s| s.len() == h));
        assert!(traj.controls.iter().all(|c| c.len() == h - 1));
    }

    #[test]
    fn saturates_control_to_resolved_limit() {
        let plant = UnitMassPlant;
        let sim = BatchSimulator::new(&plant);
        let particles = vec![vec![1e6]];
        let config = BatchSimConfig {
            sim_time: 0.1,
            dt: 0.1,
            initial_state: Some(vec![vec![1.0, 0.0]]),
            u_max: Some(3.0),
            ..Default::default()
        };
        let traj = sim.run(&PFactory, &particles, &config).unwrap();
        assert!(traj.controls[0].iter().all(|u| u.abs() <= 3.0 + 1e-9));
    }

    #[test]
    fn convergence_stops_early_after_grace_period() {
        let plant = UnitMassPlant;
        let sim = BatchSimulator::new(&plant);
        let particles = vec![vec![5.0]];
        let config = BatchSimConfig {
            sim_time: 10.0,
            dt: 0.01,
            initial_state: Some(vec![vec![0.001, 0.0]]),
            convergence_tol: Some(1e-2),
            grace_period: 0.0,
            ..Default::default()
        };
        let traj = sim.run(&PFactory, &particles, &config).unwrap();
        assert!(traj.times.len() < 1001);
    }

    struct FlakyFactory {
        attempts: std::sync::atomic::AtomicU32,
        fail_times: u32,
    }
    impl ControllerFactory for FlakyFactory {
        fn build(&self, gains: &[f64]) -> SimResult<Box<dyn Controller>> {
            let attempts = self.attempts.fetch_add(1, std::sync::atomic::Ordering::SeqCst) + 1;
            if attempts <= self.fail_times {
                return Err(SimError::invalid_input("transient factory failure"));
            }
            Ok(Box::new(ProportionalController { gain: gains[0] }))
        }
    }

    #[test]
    fn factory_failure_succeeds_after_one_retry() {
        let plant = UnitMassPlant;
        let sim = BatchSimulator::new(&plant);
        let factory = FlakyFactory {
            attempts: std::sync::atomic::AtomicU32::new(0),
            fail_times: 1,
        };
        let particles = vec![vec![1.0]];
        let config = BatchSimConfig {
            sim_time: 0.1,
            dt: 0.1,
            initial_state: Some(vec![vec![1.0, 0.0]]),
            ..Default::default()
        };
        assert!(sim.run(&factory, &particles, &config).is_ok());
        assert_eq!(factory.attempts.load(std::sync::atomic::Ordering::SeqCst), 2);
    }

    #[test]
    fn factory_failure_on_second_attempt_surfaces_as_factory_failure() {
        let plant = UnitMassPlant;
        let sim = BatchSimulator::new(&plant);
        let factory = FlakyFactory {
            attempts: std::sync::atomic::AtomicU32::new(0),
            fail_times: 2,
        };
        let particles = vec![vec![1.0]];
        let config = BatchSimConfig {
            sim_time: 0.1,
            dt: 0.1,
            initial_state: Some(vec![vec![1.0, 0.0]]),
            ..Default::default()
        };
        let err = sim.run(&factory, &particles, &config).unwrap_err();
        assert!(matches!(err, SimError::FactoryFailure { particle: 0, .. }));
    }
}
