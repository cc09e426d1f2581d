//! # Controller Contract
//!
//! External collaborator: a sliding-mode (or any other) controller
//! carries an opaque `(state, history)` pair across steps to avoid
//! hidden globals. [`ControllerState`] is an enum over controller
//! variants, and concrete controllers pack their internal fields into
//! one of its variants or extend it with their own via
//! [`ControllerState::Custom`].

use crate::error::SimError;

/// Error surface for [`Controller::compute_control`]. `Diverged` is a
/// soft, recoverable failure: the batch simulator truncates on it
/// rather than treating it as a hard failure. Any other variant is a
/// genuine fault and propagates out of the batch simulator as an `Err`.
#[derive(Debug, Clone, thiserror::Error)]
pub enum ControllerError {
    #[error("controller diverged: {0}")]
    Diverged(String),
    #[error(transparent)]
    Sim(#[from] SimError),
}

/// Opaque controller-internal state, persisted across steps of a
/// single rollout and never shared between particles.
#[derive(Debug, Default)]
pub enum ControllerState {
    #[default]
    Stateless,
    /// Generic numeric scratch space (integral/derivative terms,
    /// previous error, ...) for controllers that don't need a bespoke
    /// variant.
    Scalars(Vec<f64>),
    /// Escape hatch for controllers whose state doesn't fit the above.
    Custom(Box<dyn std::any::Any + Send>),
}

/// Append-only, size-bounded log of recent controller activity: a
/// ring buffer that caps memory use for long horizons.
#[derive(Debug, Clone)]
pub struct ControllerHistory {
    capacity: usize,
    entries: std::collections::VecDeque<f64>,
}

impl ControllerHistory {
    pub fn new(capacity: usize) -> Self {
        ControllerHistory {
            capacity: capacity.max(1),
            entries: std::collections::VecDeque::with_capacity(capacity),
        }
    }

    pub fn push(&mut self, value: f64) {
        if self.entries.len() == self.capacity {
            self.entries.pop_front();
        }
        self.entries.push_back(value);
    }

    pub fn as_slice_contiguous(&self) -> Vec<f64> {
        self.entries.iter().copied().collect()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl Default for ControllerHistory {
    fn default() -> Self {
        ControllerHistory::new(4096)
    }
}

/// What [`Controller::compute_control`] returns: the control value,
/// the carried-forward `(state, history)`, and an optional sliding
/// surface sample `sigma` used by the cost evaluator's sigma-energy
/// term.
pub struct ControlOutput {
    pub u: f64,
    pub state: ControllerState,
    pub history: ControllerHistory,
    pub sigma: Option<f64>,
}

/// A stateful sliding-mode (or other) controller.
///
/// Implementors whose gains are invalid (e.g. non-finite) should fail
/// from their constructing [`ControllerFactory`], not from
/// `compute_control` — by the time a controller exists it is assumed
/// well-formed.
pub trait Controller: Send {
    fn initialize_state(&self) -> ControllerState {
        ControllerState::Stateless
    }

    fn initialize_history(&self) -> ControllerHistory {
        ControllerHistory::default()
    }

    /// Computes one control sample from the current state and the
    /// controller's carried-forward `(state, history)`.
    fn compute_control(
        &self,
        x: &[f64],
        state: ControllerState,
        history: ControllerHistory,
    ) -> Result<ControlOutput, ControllerError>;

    /// Declared state dimension, when known ahead of simulation.
    /// Probed before falling back to the dynamics model's dimension,
    /// then to `D=6`.
    fn state_dim(&self) -> Option<usize> {
        None
    }

    /// Per-controller saturation override. `None` means "defer to the
    /// batch-level `u_max` or `+inf`".
    fn max_force(&self) -> Option<f64> {
        None
    }
}

/// `factory(gains) -> Controller`, required pure with respect to its
/// argument — the parallel orchestrator and batch simulator may invoke
/// it concurrently across particles.
pub trait ControllerFactory: Send + Sync {
    fn build(&self, gains: &[f64]) -> Result<Box<dyn Controller>, SimError>;
}

impl<F> ControllerFactory for F
where
    F: Fn(&[f64]) -> Result<Box<dyn Controller>, SimError> + Send + Sync,
{
    fn build(&self, gains: &[f64]) -> Result<Box<dyn Controller>, SimError> {
        self(gains)
    }
}
