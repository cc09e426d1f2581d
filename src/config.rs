//! # Configuration
//!
//! Typed mirrors of the simulation's options table, loadable from a
//! TOML file via `serde`. Every field carries a default so a missing
//! or partial file degrades gracefully; unknown top-level keys are
//! logged rather than rejected.

use crate::error::{SimError, SimResult};
use serde::Deserialize;
use std::path::Path;

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SafetyConfig {
    pub energy_max: f64,
    pub bounds_lower: Option<Vec<f64>>,
    pub bounds_upper: Option<Vec<f64>>,
}

impl Default for SafetyConfig {
    fn default() -> Self {
        SafetyConfig {
            energy_max: 1e6,
            bounds_lower: None,
            bounds_upper: None,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SimulationConfig {
    pub dt: f64,
    pub duration: f64,
    pub initial_state: Vec<f64>,
    pub use_full_dynamics: bool,
    pub integration_method: String,
    pub real_time: bool,
    pub safety: SafetyConfig,
}

impl Default for SimulationConfig {
    fn default() -> Self {
        SimulationConfig {
            dt: 0.01,
            duration: 5.0,
            initial_state: vec![0.0, 0.1, 0.05, 0.0, 0.0, 0.0],
            use_full_dynamics: false,
            integration_method: "rk4".to_string(),
            real_time: false,
            safety: SafetyConfig::default(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct CostWeightsConfig {
    pub state_error: f64,
    pub control_effort: f64,
    pub control_rate: f64,
    pub sliding: f64,
}

impl Default for CostWeightsConfig {
    fn default() -> Self {
        CostWeightsConfig {
            state_error: 1.0,
            control_effort: 0.1,
            control_rate: 0.1,
            sliding: 0.1,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct NormalizationConfig {
    pub ise: f64,
    pub effort: f64,
    pub slew: f64,
    pub sigma_energy: f64,
}

impl Default for NormalizationConfig {
    fn default() -> Self {
        NormalizationConfig {
            ise: 1.0,
            effort: 1.0,
            slew: 1.0,
            sigma_energy: 1.0,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct CostFunctionConfig {
    pub weights: CostWeightsConfig,
    pub normalisation: NormalizationConfig,
    pub instability_penalty: Option<f64>,
    pub min_cost_floor: f64,
}

impl Default for CostFunctionConfig {
    fn default() -> Self {
        CostFunctionConfig {
            weights: CostWeightsConfig::default(),
            normalisation: NormalizationConfig::default(),
            instability_penalty: None,
            min_cost_floor: 0.0,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ScenarioDistributionConfig {
    pub nominal_fraction: f64,
    pub moderate_fraction: f64,
    pub large_fraction: f64,
}

impl Default for ScenarioDistributionConfig {
    fn default() -> Self {
        ScenarioDistributionConfig {
            nominal_fraction: 0.2,
            moderate_fraction: 0.3,
            large_fraction: 0.5,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RobustnessConfig {
    pub enabled: bool,
    pub n_scenarios: usize,
    pub worst_case_weight: f64,
    pub scenario_distribution: ScenarioDistributionConfig,
    pub nominal_range: f64,
    pub moderate_range: f64,
    pub large_range: f64,
    pub seed: u64,
}

impl Default for RobustnessConfig {
    fn default() -> Self {
        RobustnessConfig {
            enabled: false,
            n_scenarios: 15,
            worst_case_weight: 0.3,
            scenario_distribution: ScenarioDistributionConfig::default(),
            nominal_range: 0.0,
            moderate_range: 0.2,
            large_range: 0.5,
            seed: 0,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct PsoConfig {
    pub robustness: RobustnessConfig,
}

impl Default for PsoConfig {
    fn default() -> Self {
        PsoConfig {
            robustness: RobustnessConfig::default(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Config {
    pub simulation: SimulationConfig,
    pub cost_function: CostFunctionConfig,
    pub pso: PsoConfig,
    pub global_seed: u64,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            simulation: SimulationConfig::default(),
            cost_function: CostFunctionConfig::default(),
            pso: PsoConfig::default(),
            global_seed: 0,
        }
    }
}

const RECOGNIZED_TOP_LEVEL_KEYS: &[&str] = &["simulation", "cost_function", "pso", "global_seed"];

impl Config {
    /// Loads a config from a TOML file, warning (not failing) on any
    /// unrecognized top-level key rather than rejecting the file.
    pub fn load(path: &Path) -> SimResult<Self> {
        let text = std::fs::read_to_string(path)
            .map_err(|e| SimError::invalid_input(format!("failed to read config file {path:?}: {e}")))?;
        Self::parse(&text)
    }

    pub fn parse(text: &str) -> SimResult<Self> {
        let raw: toml::Value = toml::from_str(text)
            .map_err(|e| SimError::invalid_input(format!("invalid TOML: {e}")))?;

        if let Some(table) = raw.as_table() {
            for key in table.keys() {
                if !RECOGNIZED_TOP_LEVEL_KEYS.contains(&key.as_str()) {
                    log::warn!("config: ignoring unrecognized top-level key '{key}'");
                }
            }
        }

        toml::from_str(text).map_err(|e| SimError::invalid_input(format!("config deserialization failed: {e}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_matches_spec_table_defaults() {
        let cfg = Config::default();
        assert_eq!(cfg.simulation.dt, 0.01);
        assert_eq!(cfg.pso.robustness.n_scenarios, 15);
    }

    #[test]
    fn partial_toml_fills_remaining_fields_with_defaults() {
        let cfg = Config::parse("[simulation]\ndt = 0.005\n").unwrap();
        assert_eq!(cfg.simulation.dt, 0.005);
        assert_eq!(cfg.simulation.duration, 5.0);
    }

    #[test]
    fn unrecognized_top_level_key_is_tolerated() {
        let cfg = Config::parse("[not_a_real_section]\nfoo = 1\n").unwrap();
        assert_eq!(cfg.simulation.dt, 0.01);
    }

    #[test]
    fn invalid_toml_is_an_invalid_input_error() {
        let err = Config::parse("not valid = = toml").unwrap_err();
        assert!(matches!(err, SimError::InvalidInput(_)));
    }
}
