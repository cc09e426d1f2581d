use clap::{Parser, Subcommand};
use sliding_mode_sim::batch_sim::{BatchSimConfig, BatchSimulator};
use sliding_mode_sim::config::Config;
use sliding_mode_sim::controller::{ControlOutput, Controller, ControllerError, ControllerFactory, ControllerHistory, ControllerState};
use sliding_mode_sim::cost::CostEvaluator;
use sliding_mode_sim::dynamics::StepDynamics;
use sliding_mode_sim::error::SimResult;
use sliding_mode_sim::integrators::factory::IntegratorFactory;
use sliding_mode_sim::robust::RobustEvaluator;
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "smsim", about = "Sliding-mode simulation kernel driver")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Runs a canned rollout end-to-end and prints a trajectory summary.
    Run {
        #[arg(long)]
        config: Option<PathBuf>,
    },
    /// Lists the integrator keys the factory accepts, with their order
    /// and adaptivity.
    ListIntegrators,
}

/// A minimal linear plant used by `smsim run` when no richer dynamics
/// model is linked in (the double-inverted-pendulum Lagrangian is an
/// external collaborator, out of scope for this crate).
struct DemoPlant;
impl StepDynamics for DemoPlant {
    fn step(&self, x: &[f64], u: &[f64], dt: f64) -> SimResult<Vec<f64>> {
        Ok(x.iter()
            .enumerate()
            .map(|(i, xi)| xi + (-xi + u.first().copied().unwrap_or(0.0)) * dt * (0.1 * (i + 1) as f64))
            .collect())
    }

    fn state_dim(&self) -> Option<usize> {
        Some(6)
    }
}

struct DemoController {
    gain: f64,
}
impl Controller for DemoController {
    fn compute_control(
        &self,
        x: &[f64],
        state: ControllerState,
        history: ControllerHistory,
    ) -> Result<ControlOutput, ControllerError> {
        Ok(ControlOutput {
            u: -self.gain * x.get(1).copied().unwrap_or(0.0),
            state,
            history,
            sigma: x.get(1).copied(),
        })
    }

    fn max_force(&self) -> Option<f64> {
        Some(150.0)
    }
}

struct DemoFactory;
impl ControllerFactory for DemoFactory {
    fn build(&self, gains: &[f64]) -> SimResult<Box<dyn Controller>> {
        Ok(Box::new(DemoController { gain: gains.first().copied().unwrap_or(1.0) }))
    }
}

fn run(config_path: Option<PathBuf>) -> Result<(), Box<dyn std::error::Error>> {
    let config = match config_path {
        Some(path) => Config::load(&path)?,
        None => Config::default(),
    };

    log::info!("running demo rollout with dt={} duration={}", config.simulation.dt, config.simulation.duration);

    let plant = DemoPlant;
    let sim = BatchSimulator::new(&plant);
    let batch_config = BatchSimConfig {
        sim_time: config.simulation.duration,
        dt: config.simulation.dt,
        initial_state: Some(vec![config.simulation.initial_state.clone()]),
        ..Default::default()
    };

    let traj = sim.run(&DemoFactory, &[vec![5.0]], &batch_config)?;
    println!(
        "rollout complete: {} samples, final state {:?}",
        traj.times.len(),
        traj.states[0].last().unwrap_or(&vec![])
    );

    let particles = vec![vec![5.0]];
    if config.pso.robustness.enabled {
        let robust = RobustEvaluator::from_config(
            &plant,
            &config.cost_function,
            &config.pso.robustness,
            config.simulation.initial_state.len(),
            None,
            Some((&DemoFactory, 1)),
        )?;
        let cost = robust.evaluate_single_robust(&DemoFactory, &particles[0], config.simulation.duration, config.simulation.dt);
        println!("robust cost (over {} scenarios): {cost:.6}", robust.scenarios().len());
    } else {
        let eval = CostEvaluator::from_config(&plant, &config.cost_function, None, Some((&DemoFactory, 1)));
        let cost = eval.evaluate_batch(&DemoFactory, &particles, config.simulation.duration, config.simulation.dt)[0];
        println!("cost: {cost:.6}");
    }

    Ok(())
}

fn list_integrators() {
    let factory = IntegratorFactory::new();
    println!("{:<16} {:>6} {:>10}", "key", "order", "adaptive");
    for key in factory.list_available() {
        if let Ok(info) = factory.describe(key) {
            println!("{:<16} {:>6} {:>10}", info.key, info.order, info.adaptive);
        }
    }
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::init();
    let cli = Cli::parse();

    match cli.command {
        Commands::Run { config } => run(config)?,
        Commands::ListIntegrators => list_integrators(),
    }

    Ok(())
}
