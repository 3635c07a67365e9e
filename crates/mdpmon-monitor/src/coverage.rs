//! Coverage of the model's reachable `(state, action)` pairs.
//!
//! The action of a pair is the arc's coverage label: its observable action
//! when one is mapped, its raw action otherwise. The target set is fixed
//! when the tracker is built from the model.

use log::debug;
use mdpmon_model::{Model, StateIndex};
use serde::Serialize;
use std::collections::BTreeSet;
use std::fmt;

/// Tracks which reachable `(state, action)` pairs have been exercised.
#[derive(Debug, Clone)]
pub struct CoverageTracker {
    /// Every distinct pair over arcs leaving a reachable state.
    targets: BTreeSet<(StateIndex, String)>,
    /// Pairs exercised so far (always a subset of `targets`).
    visited: BTreeSet<(StateIndex, String)>,
    /// Executions recorded, including repeats.
    executions: u64,
}

impl CoverageTracker {
    pub fn new(model: &Model) -> Self {
        Self {
            targets: model.coverage_pairs(),
            visited: BTreeSet::new(),
            executions: 0,
        }
    }

    /// Record that `action` was exercised at `state`. Returns `true` when
    /// the pair was not covered before.
    pub fn add_execution(&mut self, state: StateIndex, action: &str) -> bool {
        self.executions += 1;
        let pair = (state, action.to_string());
        if !self.targets.contains(&pair) {
            debug!("Execution ({}, {}) is outside the coverage set", state, action);
            return false;
        }
        self.visited.insert(pair)
    }

    /// Fraction of target pairs exercised. A model without reachable arcs
    /// is fully covered.
    pub fn coverage(&self) -> f64 {
        if self.targets.is_empty() {
            1.0
        } else {
            self.visited.len() as f64 / self.targets.len() as f64
        }
    }

    /// Forget every execution.
    pub fn clear(&mut self) {
        self.visited.clear();
        self.executions = 0;
    }

    pub fn stats(&self) -> CoverageStats {
        CoverageStats {
            covered: self.visited.len(),
            total: self.targets.len(),
            executions: self.executions,
            ratio: self.coverage(),
        }
    }

    /// Target pairs not exercised yet.
    pub fn uncovered(&self) -> impl Iterator<Item = &(StateIndex, String)> {
        self.targets.difference(&self.visited)
    }
}

impl fmt::Display for CoverageTracker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.stats())
    }
}

/// Coverage statistics.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CoverageStats {
    pub covered: usize,
    pub total: usize,
    pub executions: u64,
    pub ratio: f64,
}

impl fmt::Display for CoverageStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "coverage: {}/{} ({:.2}%)",
            self.covered,
            self.total,
            self.ratio * 100.0
        )
    }
}
