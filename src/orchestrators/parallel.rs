//! Worker-pool fan-out: partitions a batch across `rayon`'s global
//! pool and delegates each row to a freshly constructed
//! [`Sequential`] orchestrator — no mutable state is shared between
//! workers.

use super::sequential::{ControlSource, Sequential};
use super::ExecuteOptions;
use crate::dynamics::DerivativeDynamics;
use crate::error::SimResult;
use crate::integrators::Integrator;
use crate::result::ResultContainer;
use rayon::prelude::*;

/// Runs one [`Sequential`] rollout per row of `x0`, each with its own
/// dynamics reference and a fresh integrator instance. A failed row
/// yields `None` rather than aborting the batch.
pub fn execute_parallel<'a, F>(
    dynamics: &'a (dyn DerivativeDynamics + Sync),
    make_integrator: F,
    x0_rows: &[Vec<f64>],
    control_rows: &[Vec<Vec<f64>>],
    dt: f64,
    horizon: usize,
    opts: &ExecuteOptions,
) -> Vec<Option<ResultContainer>>
where
    F: Fn() -> Box<dyn Integrator> + Sync,
{
    x0_rows
        .par_iter()
        .zip(control_rows.par_iter())
        .map(|(x0, u_seq)| -> Option<ResultContainer> {
            let mut orch = Sequential::new(dynamics, make_integrator());
            let local_opts = ExecuteOptions {
                safety_guards: opts.safety_guards,
                stop_fn: opts.stop_fn,
                t0: opts.t0,
            };
            orch.execute(x0, ControlSource::Sequence(u_seq.clone()), dt, horizon, &local_opts)
                .ok()
        })
        .collect()
}

/// Same as [`execute_parallel`] but surfaces the first row's error
/// instead of silently dropping it, for callers that want an
/// all-or-nothing contract.
pub fn execute_parallel_strict<'a, F>(
    dynamics: &'a (dyn DerivativeDynamics + Sync),
    make_integrator: F,
    x0_rows: &[Vec<f64>],
    control_rows: &[Vec<Vec<f64>>],
    dt: f64,
    horizon: usize,
    opts: &ExecuteOptions,
) -> SimResult<Vec<ResultContainer>>
where
    F: Fn() -> Box<dyn Integrator> + Sync,
{
    x0_rows
        .par_iter()
        .zip(control_rows.par_iter())
        .map(|(x0, u_seq)| {
            let mut orch = Sequential::new(dynamics, make_integrator());
            let local_opts = ExecuteOptions {
                safety_guards: opts.safety_guards,
                stop_fn: opts.stop_fn,
                t0: opts.t0,
            };
            orch.execute(x0, ControlSource::Sequence(u_seq.clone()), dt, horizon, &local_opts)
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Decay;
    impl DerivativeDynamics for Decay {
        fn derivative(&self, _t: f64, x: &[f64], _u: &[f64]) -> SimResult<Vec<f64>> {
            Ok(vec![-x[0]])
        }
    }

    #[test]
    fn matches_sequential_trajectory_for_identical_inputs() {
        let dyn_model = Decay;
        let x0_rows = vec![vec![1.0], vec![2.0]];
        let control_rows = vec![vec![vec![0.0]; 10]; 2];
        let results = execute_parallel(
            &dyn_model,
            || Box::new(crate::integrators::fixed_step::Rk4::new()),
            &x0_rows,
            &control_rows,
            0.01,
            10,
            &ExecuteOptions::default(),
        );

        let mut reference = Sequential::new(&dyn_model, Box::new(crate::integrators::fixed_step::Rk4::new()));
        let expected = reference
            .execute(&[1.0], ControlSource::Sequence(control_rows[0].clone()), 0.01, 10, &ExecuteOptions::default())
            .unwrap();

        assert_eq!(results[0].as_ref().unwrap().states(), expected.states());
    }

    #[test]
    fn strict_variant_surfaces_errors() {
        let dyn_model = Decay;
        let x0_rows = vec![vec![1.0]];
        let control_rows = vec![vec![]]; // too short
        let result = execute_parallel_strict(
            &dyn_model,
            || Box::new(crate::integrators::fixed_step::Rk4::new()),
            &x0_rows,
            &control_rows,
            0.01,
            10,
            &ExecuteOptions::default(),
        );
        assert!(result.is_err());
    }
}
