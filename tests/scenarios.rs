//! End-to-end scenarios S1-S6, grounded on the concrete examples in
//! the simulation kernel's testable-properties section.

use sliding_mode_sim::batch_sim::{BatchSimConfig, BatchSimulator};
use sliding_mode_sim::controller::{ControlOutput, Controller, ControllerError, ControllerFactory, ControllerHistory, ControllerState};
use sliding_mode_sim::cost::{CostEvaluator, CostWeights, NormalizationThresholds};
use sliding_mode_sim::dynamics::DerivativeDynamics;
use sliding_mode_sim::error::{SimError, SimResult};
use sliding_mode_sim::integrators::fixed_step::Rk4;
use sliding_mode_sim::orchestrators::batch::{BatchOrchestrator, ControlInput};
use sliding_mode_sim::orchestrators::sequential::{ControlSource, Sequential};
use sliding_mode_sim::orchestrators::ExecuteOptions;
use sliding_mode_sim::robust::{RobustEvaluator, ScenarioDistribution};
use std::f64::consts::FRAC_PI_2;

/// A 6-state linear decay, stood in for the double-inverted-pendulum
/// Lagrangian the kernel is agnostic to (`dynamics.rs`'s collaborator
/// contract): every component relaxes toward zero under no control.
struct DecayingSixState;
impl DerivativeDynamics for DecayingSixState {
    fn derivative(&self, _t: f64, x: &[f64], u: &[f64]) -> SimResult<Vec<f64>> {
        let f = u.first().copied().unwrap_or(0.0);
        Ok(x.iter().map(|xi| -0.05 * xi + f).collect())
    }

    fn state_dim(&self) -> Option<usize> {
        Some(6)
    }
}

/// Same state layout but unstable in the tilt channel, so a stop
/// condition on `|x[1]|` actually fires inside the horizon.
struct UnstableTilt;
impl DerivativeDynamics for UnstableTilt {
    fn derivative(&self, _t: f64, x: &[f64], _u: &[f64]) -> SimResult<Vec<f64>> {
        let mut dx = vec![0.0; x.len()];
        dx[1] = 1.4 * x[1];
        Ok(dx)
    }

    fn state_dim(&self) -> Option<usize> {
        Some(6)
    }
}

#[test]
fn s1_single_rollout_zero_control_small_tilt() {
    let dyn_model = DecayingSixState;
    let x0 = vec![0.0, 0.1, 0.05, 0.0, 0.0, 0.0];
    let mut orch = Sequential::new(&dyn_model, Box::new(Rk4::new()));
    let result = orch
        .execute(
            &x0,
            ControlSource::Sequence(vec![vec![0.0]; 500]),
            0.01,
            500,
            &ExecuteOptions::default(),
        )
        .unwrap();

    assert_eq!(result.len(), 501);
    assert_eq!(result.states()[0], x0);
    for state in result.states() {
        assert!(state.iter().all(|v| v.is_finite()));
    }
}

#[test]
fn s2_batch_linear_perturbation_sweep_matches_sequential_row() {
    let dyn_model = DecayingSixState;
    let n = 10;
    let linspace: Vec<f64> = (0..n).map(|i| -0.1 + i as f64 * (0.2 / (n - 1) as f64)).collect();
    let x0: Vec<Vec<f64>> = linspace.iter().map(|&a| vec![0.0, a, 0.0, 0.0, 0.0, 0.0]).collect();

    let mut batch_orch = BatchOrchestrator::new(&dyn_model, || Box::new(Rk4::new()));
    let batch_result = batch_orch
        .execute(&x0, ControlInput::Scalar(0.0), 0.01, 500, &ExecuteOptions::default())
        .unwrap();

    assert_eq!(batch_result.len(), 10);
    for row in batch_result.stacked_states() {
        assert_eq!(row.len(), 501);
        assert_eq!(row[0].len(), 6);
    }

    // Last row's tilt (0.1) matches S1's small-tilt scenario component-for-component.
    let last_row_x0 = x0.last().unwrap().clone();
    let mut seq_orch = Sequential::new(&dyn_model, Box::new(Rk4::new()));
    let seq_result = seq_orch
        .execute(
            &last_row_x0,
            ControlSource::Sequence(vec![vec![0.0]; 500]),
            0.01,
            500,
            &ExecuteOptions::default(),
        )
        .unwrap();

    let batch_last_row = batch_result.get(9).unwrap().states();
    for (a, b) in batch_last_row.iter().zip(seq_result.states().iter()) {
        for (va, vb) in a.iter().zip(b.iter()) {
            assert!((va - vb).abs() < 1e-9);
        }
    }
}

#[test]
fn s3_early_stop_on_tilt_magnitude() {
    let dyn_model = UnstableTilt;
    let x0 = vec![0.0, 0.1, 0.05, 0.0, 0.0, 0.0];
    let stop = |x: &[f64]| x[1].abs() > FRAC_PI_2;
    let opts = ExecuteOptions {
        stop_fn: Some(&stop),
        ..Default::default()
    };
    let mut orch = Sequential::new(&dyn_model, Box::new(Rk4::new()));
    let result = orch
        .execute(&x0, ControlSource::Sequence(vec![vec![0.0]; 500]), 0.01, 500, &opts)
        .unwrap();

    assert!(result.len() <= 201, "expected early stop near k=200, got len {}", result.len());
    assert_eq!(result.metadata().get("truncated"), Some("true"));
}

/// Diverges under exactly zero control, mirroring the pendulum falling
/// the instant a zero-gain controller supplies no corrective force.
struct FallsUnderZeroControl;
impl sliding_mode_sim::dynamics::StepDynamics for FallsUnderZeroControl {
    fn step(&self, x: &[f64], u: &[f64], dt: f64) -> SimResult<Vec<f64>> {
        if u[0].abs() < 1e-12 {
            return Err(SimError::NumericFailure {
                step: 0,
                reason: "pendulum falls under zero control".to_string(),
            });
        }
        Ok(vec![x[0] + x[1] * dt, x[1] + u[0] * dt])
    }

    fn state_dim(&self) -> Option<usize> {
        Some(2)
    }
}

struct ZeroGainController {
    gain: f64,
}
impl Controller for ZeroGainController {
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

struct ZeroGainFactory;
impl ControllerFactory for ZeroGainFactory {
    fn build(&self, gains: &[f64]) -> SimResult<Box<dyn Controller>> {
        Ok(Box::new(ZeroGainController { gain: gains[0] }))
    }
}

#[test]
fn s4_zero_gains_receive_exactly_the_configured_instability_penalty() {
    let plant = FallsUnderZeroControl;
    let eval = CostEvaluator::new(
        &plant,
        CostWeights::default(),
        NormalizationThresholds::default(),
        Some(77.0),
        Some(5.0),
        None,
    );
    let particles = vec![vec![0.0, 0.0]];
    let costs = eval.evaluate_batch(&ZeroGainFactory, &particles, 1.0, 0.1);
    assert_eq!(costs[0], 77.0);
}

#[test]
fn s5_robust_evaluator_determinism() {
    struct UnitMassPlant;
    impl sliding_mode_sim::dynamics::StepDynamics for UnitMassPlant {
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
    }
    struct PFactory;
    impl ControllerFactory for PFactory {
        fn build(&self, gains: &[f64]) -> SimResult<Box<dyn Controller>> {
            Ok(Box::new(ProportionalController { gain: gains[0] }))
        }
    }

    let plant = UnitMassPlant;
    let distribution = ScenarioDistribution {
        nominal_fraction: 0.2,
        moderate_fraction: 0.3,
        large_fraction: 0.5,
    };

    let a = RobustEvaluator::new(
        &plant, CostWeights::default(), NormalizationThresholds::default(), None, Some(5.0), None,
        15, distribution, 2, 12345, 0.2, 0.5,
    ).unwrap();
    let b = RobustEvaluator::new(
        &plant, CostWeights::default(), NormalizationThresholds::default(), None, Some(5.0), None,
        15, distribution, 2, 12345, 0.2, 0.5,
    ).unwrap();

    assert_eq!(a.scenarios(), b.scenarios());

    let particles = vec![vec![1.0], vec![2.0]];
    let costs_a = a.evaluate_batch_robust(&PFactory, &particles, 0.5, 0.05);
    let costs_b = b.evaluate_batch_robust(&PFactory, &particles, 0.5, 0.05);
    assert_eq!(costs_a, costs_b);
}

struct AggressiveController;
impl Controller for AggressiveController {
    fn compute_control(
        &self,
        x: &[f64],
        state: ControllerState,
        history: ControllerHistory,
    ) -> Result<ControlOutput, ControllerError> {
        Ok(ControlOutput {
            u: 1_000_000.0,
            state,
            history,
            sigma: Some(x.first().copied().unwrap_or(0.0)),
        })
    }
}

struct AggressiveFactory;
impl ControllerFactory for AggressiveFactory {
    fn build(&self, _gains: &[f64]) -> SimResult<Box<dyn Controller>> {
        Ok(Box::new(AggressiveController))
    }
}

#[test]
fn s6_saturation_enforcement() {
    struct UnitMassPlant;
    impl sliding_mode_sim::dynamics::StepDynamics for UnitMassPlant {
        fn step(&self, x: &[f64], u: &[f64], dt: f64) -> SimResult<Vec<f64>> {
            Ok(vec![x[0] + x[1] * dt, x[1] + u[0] * dt])
        }
        fn state_dim(&self) -> Option<usize> {
            Some(2)
        }
    }

    let plant = UnitMassPlant;
    let sim = BatchSimulator::new(&plant);
    let config = BatchSimConfig {
        sim_time: 0.2,
        dt: 0.1,
        initial_state: Some(vec![vec![0.0, 0.0]]),
        u_max: Some(150.0),
        ..Default::default()
    };
    let traj = sim.run(&AggressiveFactory, &[vec![0.0]], &config).unwrap();
    for &u in &traj.controls[0] {
        assert!(u.abs() <= 150.0 + 1e-10);
    }
}
