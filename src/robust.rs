//! # Robust Multi-Scenario Evaluator
//!
//! Extends [`CostEvaluator`] with a fixed, seeded sample of initial
//! conditions stratified into nominal/moderate/large perturbation
//! strata, aggregating per-scenario costs via `mean + alpha * max` to
//! penalize brittle controllers that excel nominally but fail under
//! large perturbations.
//!
//! No standalone Python source implements this evaluator; it is
//! grounded directly on the construction-time RNG seeding and
//! `evaluate_batch` dispatch pattern of `cost_evaluator.py`'s
//! `ControllerCostEvaluator` (see DESIGN.md).

use crate::config::{CostFunctionConfig, RobustnessConfig};
use crate::cost::{CostEvaluator, CostWeights, NormalizationThresholds};
use crate::controller::ControllerFactory;
use crate::dynamics::StepDynamics;
use crate::error::{SimError, SimResult};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

#[derive(Debug, Clone, Copy)]
pub struct ScenarioDistribution {
    pub nominal_fraction: f64,
    pub moderate_fraction: f64,
    pub large_fraction: f64,
}

impl Default for ScenarioDistribution {
    fn default() -> Self {
        ScenarioDistribution {
            nominal_fraction: 0.2,
            moderate_fraction: 0.3,
            large_fraction: 0.5,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Stratum {
    Nominal,
    Moderate,
    Large,
}

/// One sampled initial condition: `(cart_position=0, angle, cart_vel, angle_vel, ...)`
/// generalized to an arbitrary state dimension with the angle
/// perturbation applied to index 1, matching the reference plant's
/// convention.
#[derive(Debug, Clone, PartialEq)]
pub struct Scenario {
    pub state: Vec<f64>,
}

pub struct RobustEvaluator<'a> {
    inner: CostEvaluator<'a>,
    scenarios: Vec<Scenario>,
    alpha: f64,
}

impl<'a> RobustEvaluator<'a> {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        dynamics: &'a dyn StepDynamics,
        weights: CostWeights,
        normalization: NormalizationThresholds,
        instability_penalty: Option<f64>,
        u_max: Option<f64>,
        probe_factory: Option<(&dyn ControllerFactory, usize)>,
        n_scenarios: usize,
        distribution: ScenarioDistribution,
        state_dim: usize,
        seed: u64,
        moderate_range: f64,
        large_range: f64,
    ) -> SimResult<Self> {
        let total = distribution.nominal_fraction + distribution.moderate_fraction + distribution.large_fraction;
        if (total - 1.0).abs() > 1e-6 {
            return Err(SimError::invalid_input(format!(
                "scenario_distribution fractions must sum to 1, got {total}"
            )));
        }
        if state_dim < 2 {
            return Err(SimError::invalid_input(
                "state_dim must be at least 2 to hold an angle component",
            ));
        }

        let mut rng = StdRng::seed_from_u64(seed);
        let counts = stratify(n_scenarios, &distribution);
        let mut scenarios = Vec::with_capacity(n_scenarios);
        for (stratum, count) in counts {
            for _ in 0..count {
                scenarios.push(sample_scenario(&mut rng, stratum, state_dim, moderate_range, large_range));
            }
        }

        Ok(RobustEvaluator {
            inner: CostEvaluator::new(dynamics, weights, normalization, instability_penalty, u_max, probe_factory),
            scenarios,
            alpha: 0.0,
        })
    }

    /// Builds an evaluator from the TOML-loadable config structs
    /// instead of raw primitives, so `[cost_function]` and
    /// `[pso.robustness]` actually drive evaluator behavior.
    pub fn from_config(
        dynamics: &'a dyn StepDynamics,
        cost_cfg: &CostFunctionConfig,
        robustness_cfg: &RobustnessConfig,
        state_dim: usize,
        u_max: Option<f64>,
        probe_factory: Option<(&dyn ControllerFactory, usize)>,
    ) -> SimResult<Self> {
        let weights = CostWeights {
            state_error: cost_cfg.weights.state_error,
            control_effort: cost_cfg.weights.control_effort,
            control_rate: cost_cfg.weights.control_rate,
            sliding: cost_cfg.weights.sliding,
        };
        let normalization = NormalizationThresholds {
            ise: cost_cfg.normalisation.ise,
            effort: cost_cfg.normalisation.effort,
            slew: cost_cfg.normalisation.slew,
            sigma_energy: cost_cfg.normalisation.sigma_energy,
        };
        let distribution = ScenarioDistribution {
            nominal_fraction: robustness_cfg.scenario_distribution.nominal_fraction,
            moderate_fraction: robustness_cfg.scenario_distribution.moderate_fraction,
            large_fraction: robustness_cfg.scenario_distribution.large_fraction,
        };

        let evaluator = Self::new(
            dynamics,
            weights,
            normalization,
            cost_cfg.instability_penalty,
            u_max,
            probe_factory,
            robustness_cfg.n_scenarios,
            distribution,
            state_dim,
            robustness_cfg.seed,
            robustness_cfg.moderate_range,
            robustness_cfg.large_range,
        )?;
        Ok(evaluator
            .with_alpha(robustness_cfg.worst_case_weight)
            .with_min_cost_floor(cost_cfg.min_cost_floor))
    }

    pub fn with_alpha(mut self, alpha: f64) -> Self {
        self.alpha = alpha.clamp(0.0, 1.0);
        self
    }

    pub fn with_min_cost_floor(mut self, floor: f64) -> Self {
        self.inner = self.inner.with_min_cost_floor(floor);
        self
    }

    pub fn scenarios(&self) -> &[Scenario] {
        &self.scenarios
    }

    /// `evaluate_batch_robust(P) -> J_robust`: mean + alpha*max over
    /// scenarios, column-wise across the population.
    pub fn evaluate_batch_robust(
        &self,
        factory: &dyn ControllerFactory,
        particles: &[Vec<f64>],
        sim_time: f64,
        dt: f64,
    ) -> Vec<f64> {
        let p = particles.len();
        let mut sum = vec![0.0; p];
        let mut max_cost = vec![0.0_f64; p];

        for scenario in &self.scenarios {
            let costs = self.evaluate_scenario(factory, particles, &scenario.state, sim_time, dt);
            for r in 0..p {
                sum[r] += costs[r];
                max_cost[r] = max_cost[r].max(costs[r]);
            }
        }

        let n = self.scenarios.len().max(1) as f64;
        (0..p).map(|r| sum[r] / n + self.alpha * max_cost[r]).collect()
    }

    pub fn evaluate_single_robust(&self, factory: &dyn ControllerFactory, gains: &[f64], sim_time: f64, dt: f64) -> f64 {
        self.evaluate_batch_robust(factory, &[gains.to_vec()], sim_time, dt)[0]
    }

    fn evaluate_scenario(
        &self,
        factory: &dyn ControllerFactory,
        particles: &[Vec<f64>],
        x0: &[f64],
        sim_time: f64,
        dt: f64,
    ) -> Vec<f64> {
        // Delegate to the cost evaluator's batch path with a shared
        // initial condition for every row in this scenario.
        self.inner.evaluate_batch_with_initial_state(factory, particles, x0, sim_time, dt)
    }
}

fn stratify(n: usize, dist: &ScenarioDistribution) -> Vec<(Stratum, usize)> {
    let nominal = (n as f64 * dist.nominal_fraction).floor() as usize;
    let moderate = (n as f64 * dist.moderate_fraction).floor() as usize;
    // The large stratum absorbs any rounding remainder.
    let large = n.saturating_sub(nominal + moderate);
    vec![(Stratum::Nominal, nominal), (Stratum::Moderate, moderate), (Stratum::Large, large)]
}

fn sample_scenario(rng: &mut StdRng, stratum: Stratum, state_dim: usize, moderate_range: f64, large_range: f64) -> Scenario {
    let (angle_range, vel_range) = match stratum {
        Stratum::Nominal => (0.0, 0.0),
        Stratum::Moderate => (moderate_range, moderate_range),
        Stratum::Large => (large_range, large_range),
    };

    let mut state = vec![0.0; state_dim];
    // index 0: cart position, always zero at k=0.
    state[0] = 0.0;
    state[1] = if angle_range > 0.0 {
        rng.random_range(-angle_range..=angle_range)
    } else {
        0.0
    };
    for component in state.iter_mut().skip(2) {
        *component = if vel_range > 0.0 {
            rng.random_range(-vel_range..=vel_range)
        } else {
            0.0
        };
    }
    Scenario { state }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::controller::{Controller, ControllerError, ControlOutput, ControllerHistory, ControllerState};

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
    }

    struct PFactory;
    impl ControllerFactory for PFactory {
        fn build(&self, gains: &[f64]) -> SimResult<Box<dyn Controller>> {
            Ok(Box::new(ProportionalController { gain: gains[0] }))
        }
    }

    #[test]
    fn same_seed_yields_bit_identical_scenarios() {
        let plant = UnitMassPlant;
        let a = RobustEvaluator::new(
            &plant, CostWeights::default(), NormalizationThresholds::default(), None, Some(5.0), None,
            15, ScenarioDistribution { nominal_fraction: 0.2, moderate_fraction: 0.3, large_fraction: 0.5 }, 2, 12345,
            0.2, 0.5,
        ).unwrap();
        let b = RobustEvaluator::new(
            &plant, CostWeights::default(), NormalizationThresholds::default(), None, Some(5.0), None,
            15, ScenarioDistribution { nominal_fraction: 0.2, moderate_fraction: 0.3, large_fraction: 0.5 }, 2, 12345,
            0.2, 0.5,
        ).unwrap();
        assert_eq!(a.scenarios(), b.scenarios());
    }

    #[test]
    fn rejects_distribution_not_summing_to_one() {
        let plant = UnitMassPlant;
        let result = RobustEvaluator::new(
            &plant, CostWeights::default(), NormalizationThresholds::default(), None, Some(5.0), None,
            10, ScenarioDistribution { nominal_fraction: 0.5, moderate_fraction: 0.5, large_fraction: 0.5 }, 2, 1,
            0.2, 0.5,
        );
        assert!(result.is_err());
    }

    #[test]
    fn increasing_alpha_never_decreases_robust_cost() {
        let plant = UnitMassPlant;
        let particles = vec![vec![1.0]];

        let low_eval = RobustEvaluator::new(
            &plant, CostWeights::default(), NormalizationThresholds::default(), None, Some(5.0), None,
            10, ScenarioDistribution::default(), 2, 7, 0.2, 0.5,
        ).unwrap().with_alpha(0.1);
        let high_eval = RobustEvaluator::new(
            &plant, CostWeights::default(), NormalizationThresholds::default(), None, Some(5.0), None,
            10, ScenarioDistribution::default(), 2, 7, 0.2, 0.5,
        ).unwrap().with_alpha(0.9);

        let low = low_eval.evaluate_batch_robust(&PFactory, &particles, 0.5, 0.05)[0];
        let high = high_eval.evaluate_batch_robust(&PFactory, &particles, 0.5, 0.05)[0];
        assert!(high >= low - 1e-9);
    }

    #[test]
    fn from_config_threads_robustness_and_cost_function_settings() {
        use crate::config::{CostFunctionConfig, RobustnessConfig};

        let plant = UnitMassPlant;
        let mut robustness_cfg = RobustnessConfig::default();
        robustness_cfg.n_scenarios = 6;
        robustness_cfg.worst_case_weight = 0.5;
        robustness_cfg.seed = 99;
        let cost_cfg = CostFunctionConfig {
            min_cost_floor: 3.0,
            ..CostFunctionConfig::default()
        };

        let eval = RobustEvaluator::from_config(&plant, &cost_cfg, &robustness_cfg, 2, Some(5.0), None).unwrap();
        assert_eq!(eval.scenarios().len(), 6);
        let costs = eval.evaluate_batch_robust(&PFactory, &[vec![0.0]], 0.2, 0.05);
        assert!(costs[0] >= 3.0 - 1e-9);
    }
}
