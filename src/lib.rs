//! Deterministic, batch-capable simulation kernel for rigid-body
//! dynamics driven by sliding-mode controllers, plus the cost and
//! safety layer a population-based optimizer drives to tune
//! controller gains.

pub mod batch_sim;
pub mod compat;
pub mod config;
pub mod controller;
pub mod cost;
pub mod dynamics;
pub mod error;
pub mod integrators;
pub mod orchestrators;
pub mod result;
pub mod robust;
pub mod safety;
pub mod time_domain;
