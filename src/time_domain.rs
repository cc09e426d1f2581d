//! # Time Domain Module
//!
//! Scalar clock bookkeeping, a real-time step scheduler with
//! weakly-hard `(m, k)` accounting, and the adaptive step-size
//! controllers used by the embedded Runge-Kutta integrators.
//!
//! ## Submodules
//!
//! None — this module is intentionally flat; the three types below
//! (`TimeManager`, `RealTimeScheduler`, `AdaptiveStepController`) are
//! independent collaborators composed by the orchestrators.

use crate::error::{SimError, SimResult};
use std::collections::VecDeque;
use std::time::{Duration, Instant};

/// Sentinel returned by [`TimeManager::remaining_steps`] when the
/// manager has no configured horizon. Never converts `f64::INFINITY`
/// to an integer; callers must check for this sentinel instead.
pub const UNBOUNDED_STEPS: usize = usize::MAX;

/// Drives `(dt, total_time, horizon, t, step_index)` bookkeeping for a
/// single rollout.
///
/// Exactly one of `total_time`/`horizon` may be derived from the
/// other; supplying both requires they agree to within `1e-9`.
#[derive(Debug, Clone, Copy)]
pub struct TimeManager {
    dt: f64,
    total_time: Option<f64>,
    horizon: Option<usize>,
    current_time: f64,
    current_step: usize,
    start_wall_time: Option<Instant>,
}

impl TimeManager {
    const CONSISTENCY_EPS: f64 = 1e-9;

    /// Constructs a manager, deriving whichever of `total_time`/
    /// `horizon` is absent. Fails if both are given and disagree.
    pub fn new(dt: f64, total_time: Option<f64>, horizon: Option<usize>) -> SimResult<Self> {
        if !(dt > 0.0) {
            return Err(SimError::invalid_input(format!("dt must be > 0, got {dt}")));
        }

        let (total_time, horizon) = match (total_time, horizon) {
            (Some(tt), Some(h)) => {
                let computed = h as f64 * dt;
                if (computed - tt).abs() >= Self::CONSISTENCY_EPS {
                    return Err(SimError::invalid_input(format!(
                        "inconsistent time specification: {h} * {dt} = {computed} != {tt}"
                    )));
                }
                (Some(tt), Some(h))
            }
            (Some(tt), None) => (Some(tt), Some((tt / dt).ceil() as usize)),
            (None, Some(h)) => (Some(h as f64 * dt), Some(h)),
            (None, None) => (None, None),
        };

        Ok(TimeManager {
            dt,
            total_time,
            horizon,
            current_time: 0.0,
            current_step: 0,
            start_wall_time: None,
        })
    }

    pub fn dt(&self) -> f64 {
        self.dt
    }

    pub fn current_time(&self) -> f64 {
        self.current_time
    }

    pub fn current_step(&self) -> usize {
        self.current_step
    }

    pub fn horizon(&self) -> Option<usize> {
        self.horizon
    }

    /// Fraction of `total_time` elapsed, clamped to `[0, 1]`. `0.0`
    /// when the manager is unbounded.
    pub fn progress(&self) -> f64 {
        match self.total_time {
            Some(tt) if tt > 0.0 => (self.current_time / tt).min(1.0),
            _ => 0.0,
        }
    }

    /// Marks wall-clock start and resets simulated time to zero.
    pub fn start(&mut self) {
        self.start_wall_time = Some(Instant::now());
        self.current_time = 0.0;
        self.current_step = 0;
    }

    /// Advances simulated time by `dt` (or the manager's default),
    /// returning the new `(t, step)`.
    pub fn advance(&mut self, dt: Option<f64>) -> (f64, usize) {
        let dt = dt.unwrap_or(self.dt);
        self.current_time += dt;
        self.current_step += 1;
        (self.current_time, self.current_step)
    }

    pub fn is_finished(&self) -> bool {
        match (self.total_time, self.horizon) {
            (Some(tt), _) => self.current_time >= tt,
            (None, Some(h)) => self.current_step >= h,
            (None, None) => false,
        }
    }

    /// `+inf`-equivalent (`f64::INFINITY`) when unbounded.
    pub fn remaining_time(&self) -> f64 {
        match self.total_time {
            Some(tt) => (tt - self.current_time).max(0.0),
            None => f64::INFINITY,
        }
    }

    /// [`UNBOUNDED_STEPS`] sentinel when the manager has no horizon —
    /// never silently overflows.
    pub fn remaining_steps(&self) -> usize {
        match self.horizon {
            Some(h) => h.saturating_sub(self.current_step),
            None => UNBOUNDED_STEPS,
        }
    }

    /// `[0, dt, 2*dt, ..., horizon*dt]`. Fails if no horizon is set.
    pub fn time_vector(&self) -> SimResult<Vec<f64>> {
        let horizon = self
            .horizon
            .ok_or_else(|| SimError::invalid_input("cannot generate time vector without horizon"))?;
        Ok((0..=horizon).map(|k| k as f64 * self.dt).collect())
    }

    pub fn wall_clock_elapsed(&self) -> f64 {
        match self.start_wall_time {
            Some(t0) => t0.elapsed().as_secs_f64(),
            None => 0.0,
        }
    }

    /// Ratio of simulated time to wall-clock time; `+inf` before any
    /// wall time has elapsed.
    pub fn real_time_factor(&self) -> f64 {
        let elapsed = self.wall_clock_elapsed();
        if elapsed == 0.0 {
            f64::INFINITY
        } else {
            self.current_time / elapsed
        }
    }
}

/// Whether a deadline in [`RealTimeScheduler::wait_for_next_step`] was
/// met or missed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeadlineOutcome {
    Met,
    Missed,
}

/// Cooperative real-time pacing: arms a deadline `target_period` in
/// the future and sleeps until it, advancing the deadline by exactly
/// `target_period` each cycle (never by measured elapsed time) to
/// avoid phase drift.
pub struct RealTimeScheduler {
    target_period: Duration,
    tolerance: Duration,
    next_deadline: Option<Instant>,
    missed_deadlines: u64,
    total_steps: u64,
    /// Ring of the last `window` outcomes for weakly-hard `(m, k)` queries.
    history: VecDeque<DeadlineOutcome>,
    window: usize,
}

/// Aggregate timing statistics exposed after a real-time run.
#[derive(Debug, Clone, Copy)]
pub struct TimingStats {
    pub missed_deadlines: u64,
    pub total_steps: u64,
    pub target_period: Duration,
    pub tolerance: Duration,
}

impl RealTimeScheduler {
    pub fn new(target_period: Duration, tolerance: Duration) -> Self {
        RealTimeScheduler {
            target_period,
            tolerance,
            next_deadline: None,
            missed_deadlines: 0,
            total_steps: 0,
            history: VecDeque::new(),
            window: 64,
        }
    }

    /// Arms the next deadline at `now + period`, or `prev + period` if
    /// a deadline was already armed, preserving phase.
    pub fn start_step(&mut self) {
        let now = Instant::now();
        self.next_deadline = Some(match self.next_deadline {
            Some(prev) => prev + self.target_period,
            None => now + self.target_period,
        });
    }

    /// Blocks until the armed deadline (if any), returning whether it
    /// was met within `tolerance`. Missed deadlines are counted but
    /// never abort the caller.
    pub fn wait_for_next_step(&mut self) -> DeadlineOutcome {
        let outcome = match self.next_deadline {
            None => DeadlineOutcome::Met,
            Some(deadline) => {
                let now = Instant::now();
                if now > deadline + self.tolerance {
                    DeadlineOutcome::Missed
                } else {
                    if deadline > now {
                        std::thread::sleep(deadline - now);
                    }
                    DeadlineOutcome::Met
                }
            }
        };

        if outcome == DeadlineOutcome::Missed {
            self.missed_deadlines += 1;
        }
        self.total_steps += 1;
        self.history.push_back(outcome);
        if self.history.len() > self.window {
            self.history.pop_front();
        }
        outcome
    }

    pub fn stats(&self) -> TimingStats {
        TimingStats {
            missed_deadlines: self.missed_deadlines,
            total_steps: self.total_steps,
            target_period: self.target_period,
            tolerance: self.tolerance,
        }
    }

    /// Weakly-hard check: were there at most `m` misses in the last
    /// `k` deadlines? `k` is clamped to the retained window size.
    pub fn weakly_hard(&self, m: usize, k: usize) -> bool {
        let k = k.min(self.history.len());
        let misses = self
            .history
            .iter()
            .rev()
            .take(k)
            .filter(|o| **o == DeadlineOutcome::Missed)
            .count();
        misses <= m
    }

    pub fn reset(&mut self) {
        self.next_deadline = None;
        self.missed_deadlines = 0;
        self.total_steps = 0;
        self.history.clear();
    }
}

/// Growth/shrink clamps shared by the basic and PI step controllers.
const MAX_GROWTH: f64 = 5.0;
const MAX_SHRINK: f64 = 0.1;

/// Proposes the next step size for an embedded adaptive integrator
/// from a local error estimate, with an optional PI term that weights
/// by the previous step's error (Söderlind-style control).
///
/// `dt_new = clip(dt * safety * (tol/err)^(1/p) * (err_prev/err)^beta, dt_min, dt_max)`
/// degrading to the plain power-law rule when no previous error is
/// available (first step, or `beta == 0`).
#[derive(Debug, Clone, Copy)]
pub struct AdaptiveStepController {
    pub dt_min: f64,
    pub dt_max: f64,
    pub safety: f64,
    /// Proportional exponent of the PI term; `0.0` disables it.
    pub alpha: f64,
    /// PI weighting exponent (ignored when `alpha == 0.0`).
    pub beta: f64,
    prev_error: Option<f64>,
}

impl AdaptiveStepController {
    pub fn new(dt_min: f64, dt_max: f64, safety: f64) -> Self {
        AdaptiveStepController {
            dt_min,
            dt_max,
            safety,
            alpha: 0.0,
            beta: 0.0,
            prev_error: None,
        }
    }

    /// Enables the PI variant with proportional exponent `alpha`.
    pub fn with_pi(mut self, alpha: f64) -> Self {
        self.alpha = alpha;
        self.beta = 0.4 * alpha;
        self
    }

    /// Proposes `dt_new` and whether to accept the step, given the
    /// method order `p`, current `dt`, local error `err`, and `tol`.
    pub fn update(&mut self, dt: f64, err: f64, tol: f64, order: u32) -> (f64, bool) {
        let accept = err <= tol;
        let err = err.max(f64::EPSILON);
        let p = order as f64;

        let mut factor = self.safety * (tol / err).powf(1.0 / p);
        if self.alpha > 0.0 {
            if let Some(prev) = self.prev_error {
                let prev = prev.max(f64::EPSILON);
                factor *= (prev / err).powf(self.beta);
            }
        }
        factor = factor.clamp(MAX_SHRINK, MAX_GROWTH);

        let dt_new = (dt * factor).clamp(self.dt_min, self.dt_max);
        self.prev_error = Some(err);
        (dt_new, accept)
    }

    pub fn reset(&mut self) {
        self.prev_error = None;
    }
}
