//! Typed error taxonomy for the simulation kernel.
//!
//! The kernel never returns silently-incorrect data: a call either
//! produces a valid (possibly truncated) result or raises one of the
//! variants below. Propagation policy is fixed by the caller's layer,
//! not by this type: integrators and guards never handle their own
//! errors, the orchestrator is the single point that decides whether a
//! `SafetyViolation`/`NumericFailure` truncates a rollout, and the cost
//! evaluator is the only place a simulator-level error turns into a
//! penalty vector instead of propagating further.

use thiserror::Error;

/// The five error kinds recognized by the kernel.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum SimError {
    /// Malformed or inconsistent call arguments (`dt <= 0`, non-finite
    /// initial state, `horizon * dt != total_time`, unknown integrator
    /// key, ...). Always fatal for the current call; never retried.
    #[error("invalid input: {0}")]
    InvalidInput(String),

    /// A safety guard rejected a state. Carries the frozen-substring
    /// message required by legacy downstream string matching.
    #[error("{message}")]
    SafetyViolation {
        kind: SafetyViolationKind,
        step: usize,
        message: String,
    },

    /// Non-finite state, integrator divergence, or a dynamics-model
    /// failure that the orchestrator must truncate around.
    #[error("numeric failure at step {step}: {reason}")]
    NumericFailure { step: usize, reason: String },

    /// A real-time deadline was missed. Recorded, never fatal on its
    /// own — only a `violation_handler` requesting `Abort` turns this
    /// into rollout termination.
    #[error("timing violation: missed deadline at step {step} by {overrun_secs:.6}s")]
    TimingViolation { step: usize, overrun_secs: f64 },

    /// A controller factory failed to construct a controller for a
    /// particle, after the one permitted retry.
    #[error("controller factory failed for particle {particle}: {reason}")]
    FactoryFailure { particle: usize, reason: String },
}

/// Discriminant for [`SimError::SafetyViolation`], mirroring the guard
/// that raised it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SafetyViolationKind {
    NaN,
    EnergyCap,
    Bounds,
}

impl SimError {
    pub fn invalid_input(msg: impl Into<String>) -> Self {
        SimError::InvalidInput(msg.into())
    }
}

pub type SimResult<T> = Result<T, SimError>;
