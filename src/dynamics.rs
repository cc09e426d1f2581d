//! # Dynamics Contract
//!
//! External collaborator: the kernel consumes any plant satisfying one
//! of two dialects and is otherwise opaque to the physics. Only the
//! contract lives here; concrete plants (e.g. the double-inverted-
//! pendulum Lagrangian) are out of scope.

use crate::error::SimError;

/// Legacy dialect: advances the state directly given a control and a
/// step size. The majority of plants in this codebase's domain expose
/// only this form.
pub trait StepDynamics: Send + Sync {
    /// Returns the next state, or an error if the step diverged.
    /// Returning a non-finite vector is equivalent to an error — the
    /// orchestrator treats both as [`SimError::NumericFailure`].
    fn step(&self, x: &[f64], u: &[f64], dt: f64) -> Result<Vec<f64>, SimError>;

    /// State dimension, when introspectable. The kernel tolerates
    /// `None` and falls back to inferring `D` from the initial state.
    fn state_dim(&self) -> Option<usize> {
        None
    }
}

/// Integrator-style dialect: exposes the continuous-time derivative
/// directly, which every integrator in [`crate::integrators`] prefers
/// over the finite-difference approximation in [`crate::compat`].
pub trait DerivativeDynamics: Send + Sync {
    /// `f(t, x, u) -> dx/dt`.
    fn derivative(&self, t: f64, x: &[f64], u: &[f64]) -> Result<Vec<f64>, SimError>;

    fn state_dim(&self) -> Option<usize> {
        None
    }
}

/// A dynamics model exposing a linear time-invariant state-space
/// realization `dx/dt = A x + B u`, consumed by [`crate::integrators::ZeroOrderHold`]
/// for exact discretization.
pub trait LinearTimeInvariant: DerivativeDynamics {
    /// Row-major `D x D` state matrix.
    fn a_matrix(&self) -> &[f64];
    /// Row-major `D x M` input matrix.
    fn b_matrix(&self) -> &[f64];
    fn state_dim_exact(&self) -> usize;
    fn input_dim(&self) -> usize;
}
