//! Active-mask vectorized orchestrator. Each row stops independently
//! but the underlying tensor keeps a uniform shape: inactive rows are
//! back-filled with their last valid state at read time rather than
//! by reshaping storage.

use super::{mark_truncated, ExecuteOptions, ExecutionStats};
use crate::dynamics::DerivativeDynamics;
use crate::error::{SimError, SimResult};
use crate::integrators::Integrator;
use crate::result::{BatchResultContainer, Metadata, ResultContainer};
use crate::safety::SafetyGuardManager;

/// Per-row control input, already normalized to `(B, H, M)`.
pub enum ControlInput {
    /// Shared across all rows and time steps.
    Scalar(f64),
    /// One sequence, tiled across every row.
    Shared(Vec<Vec<f64>>),
    /// `(B, H, M)`, accepted verbatim.
    PerRow(Vec<Vec<Vec<f64>>>),
}

impl ControlInput {
    fn normalize(&self, batch: usize, horizon: usize) -> SimResult<Vec<Vec<Vec<f64>>>> {
        match self {
            ControlInput::Scalar(v) => Ok(vec![vec![vec![*v]; horizon]; batch]),
            ControlInput::Shared(seq) => {
                if seq.len() < horizon {
                    return Err(SimError::invalid_input(
                        "shared control sequence shorter than horizon",
                    ));
                }
                Ok(vec![seq[..horizon].to_vec(); batch])
            }
            ControlInput::PerRow(rows) => {
                if rows.len() != batch {
                    return Err(SimError::invalid_input(
                        "per-row control input's batch dimension does not match x0",
                    ));
                }
                for row in rows {
                    if row.len() < horizon {
                        return Err(SimError::invalid_input(
                            "per-row control sequence shorter than horizon",
                        ));
                    }
                }
                Ok(rows.iter().map(|r| r[..horizon].to_vec()).collect())
            }
        }
    }
}

/// Promotes `x0` to `(B, D)`: a single row is tiled `batch` times.
pub fn normalize_initial_state(x0: &[Vec<f64>], batch: usize) -> SimResult<Vec<Vec<f64>>> {
    match x0.len() {
        1 => Ok(vec![x0[0].clone(); batch]),
        n if n == batch => Ok(x0.to_vec()),
        _ => Err(SimError::invalid_input(
            "initial state batch dimension does not match requested batch size",
        )),
    }
}

pub struct BatchOrchestrator<'a> {
    dynamics: &'a dyn DerivativeDynamics,
    make_integrator: Box<dyn Fn() -> Box<dyn Integrator> + 'a>,
    guards: SafetyGuardManager,
    stats: ExecutionStats,
}

impl<'a> BatchOrchestrator<'a> {
    pub fn new(
        dynamics: &'a dyn DerivativeDynamics,
        make_integrator: impl Fn() -> Box<dyn Integrator> + 'a,
    ) -> Self {
        BatchOrchestrator {
            dynamics,
            make_integrator: Box::new(make_integrator),
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
        x0: &[Vec<f64>],
        control: ControlInput,
        dt: f64,
        horizon: usize,
        opts: &ExecuteOptions,
    ) -> SimResult<BatchResultContainer> {
        if dt <= 0.0 {
            return Err(SimError::invalid_input("dt must be strictly positive"));
        }
        let batch = x0.len().max(1);
        let rows0 = normalize_initial_state(x0, batch)?;
        let u = control.normalize(batch, horizon)?;

        let mut integrators: Vec<Box<dyn Integrator>> = (0..batch).map(|_| (self.make_integrator)()).collect();
        let mut times = vec![opts.t0];
        let mut states: Vec<Vec<Vec<f64>>> = rows0.iter().map(|r| vec![r.clone()]).collect();
        let mut controls: Vec<Vec<Vec<f64>>> = vec![Vec::with_capacity(horizon); batch];
        let mut active = vec![true; batch];
        let mut last_valid_len = vec![1usize; batch];
        let mut t = opts.t0;

        for i in 0..horizon {
            for r in 0..batch {
                if !active[r] {
                    // Back-fill: repeat the last valid state so storage
                    // stays uniformly shaped.
                    let last = states[r].last().unwrap().clone();
                    states[r].push(last);
                    continue;
                }

                let x = states[r].last().unwrap().clone();
                if opts.safety_guards && !self.guards.is_empty() {
                    if let Err(err) = self.guards.check_all(&x, i) {
                        log::warn!("batch orchestrator: guard violation at step {i} row {r}: {err}");
                        active[r] = false;
                        last_valid_len[r] = states[r].len();
                        states[r].push(x);
                        continue;
                    }
                }
                if let Some(stop_fn) = opts.stop_fn {
                    if stop_fn(&x) {
                        active[r] = false;
                        last_valid_len[r] = states[r].len();
                        states[r].push(x);
                        continue;
                    }
                }

                let u_ri = &u[r][i];
                let x_new = integrators[r].integrate(self.dynamics, &x, u_ri, dt, t)?;
                if !x_new.iter().all(|v| v.is_finite()) {
                    active[r] = false;
                    last_valid_len[r] = states[r].len();
                    states[r].push(x);
                    continue;
                }

                controls[r].push(u_ri.clone());
                states[r].push(x_new);
                last_valid_len[r] = states[r].len();
            }
            t += dt;
            times.push(t);
            self.stats.total_steps += 1;

            if !active.iter().any(|a| *a) {
                break;
            }
        }

        let mut batch_result = BatchResultContainer::new();
        for r in 0..batch {
            let valid_len = last_valid_len[r];
            let row_times = times[..valid_len].to_vec();
            let row_states = states[r][..valid_len].to_vec();
            let row_controls = controls[r][..valid_len.saturating_sub(1)].to_vec();
            let mut meta = Metadata::new();
            mark_truncated(&mut meta, valid_len < times.len(), None);
            batch_result.insert(r, ResultContainer::new(row_times, row_states, row_controls, meta));
        }

        self.stats.record_run(horizon as u64, std::time::Duration::ZERO);
        Ok(batch_result)
    }
}
