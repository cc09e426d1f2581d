//! # Result Containers
//!
//! Typed trajectory stores. Accessors return owned copies so that a
//! container handed off to a caller can never be mutated out from
//! under the orchestrator that produced it, and so a container handed
//! off once cannot alias a later generation's buffers.

use crate::error::{SimError, SimResult};
use std::collections::BTreeMap;

/// Free-form run metadata (guard-violation flags, timing stats, ...).
#[derive(Debug, Clone, Default)]
pub struct Metadata {
    entries: BTreeMap<String, String>,
}

impl Metadata {
    pub fn new() -> Self {
        Metadata::default()
    }

    pub fn set(&mut self, key: impl Into<String>, value: impl ToString) -> &mut Self {
        self.entries.insert(key.into(), value.to_string());
        self
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.entries.get(key).map(|s| s.as_str())
    }
}

/// A single rollout: `(times, states, controls)` plus metadata.
#[derive(Debug, Clone)]
pub struct ResultContainer {
    times: Vec<f64>,
    states: Vec<Vec<f64>>,
    controls: Vec<Vec<f64>>,
    metadata: Metadata,
}

impl ResultContainer {
    pub fn new(
        times: Vec<f64>,
        states: Vec<Vec<f64>>,
        controls: Vec<Vec<f64>>,
        metadata: Metadata,
    ) -> Self {
        ResultContainer {
            times,
            states,
            controls,
            metadata,
        }
    }

    pub fn times(&self) -> Vec<f64> {
        self.times.clone()
    }

    pub fn states(&self) -> Vec<Vec<f64>> {
        self.states.clone()
    }

    pub fn controls(&self) -> Vec<Vec<f64>> {
        self.controls.clone()
    }

    pub fn metadata(&self) -> Metadata {
        self.metadata.clone()
    }

    pub fn len(&self) -> usize {
        self.states.len()
    }

    pub fn is_empty(&self) -> bool {
        self.states.is_empty()
    }

    /// External export is out of scope; this dispatch stub exists so
    /// callers can wire a real exporter behind it without changing the
    /// container's public surface.
    pub fn export(&self, format: &str, _path: &std::path::Path) -> SimResult<()> {
        match format {
            "csv" | "json" | "hdf5" => Err(SimError::invalid_input(format!(
                "export format '{format}' requires an external exporter, none is linked in this build"
            ))),
            other => Err(SimError::invalid_input(format!(
                "unsupported export format '{other}'"
            ))),
        }
    }
}

/// Ordered `batch_index -> per-row result` mapping with a global,
/// stacked read.
#[derive(Debug, Clone, Default)]
pub struct BatchResultContainer {
    rows: BTreeMap<usize, ResultContainer>,
}

impl BatchResultContainer {
    pub fn new() -> Self {
        BatchResultContainer::default()
    }

    pub fn insert(&mut self, index: usize, row: ResultContainer) {
        self.rows.insert(index, row);
    }

    pub fn get(&self, index: usize) -> Option<&ResultContainer> {
        self.rows.get(&index)
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Shared time vector, taken from the first entry in ascending
    /// batch-index order.
    pub fn get_times(&self) -> Option<Vec<f64>> {
        self.rows.values().next().map(|r| r.times())
    }

    /// Stacks every row's states in ascending index order into a
    /// `(B, H+1, D)` nested tensor.
    pub fn stacked_states(&self) -> Vec<Vec<Vec<f64>>> {
        self.rows.values().map(|r| r.states()).collect()
    }

    pub fn stacked_controls(&self) -> Vec<Vec<Vec<f64>>> {
        self.rows.values().map(|r| r.controls()).collect()
    }
}
