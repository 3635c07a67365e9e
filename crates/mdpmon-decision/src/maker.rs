//! The decision-maker capability and its factory.

use crate::adaptive::{CountDecisionMaker, DistanceDecisionMaker};
use crate::flat::FlatDecisionMaker;
use log::debug;
use mdpmon_model::{MixedPolicy, Model, PolicyEntry, StateIndex};
use rand::distributions::{Distribution, WeightedIndex};
use rand::Rng;
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Chooses the next action to exercise at a state and absorbs feedback
/// from the monitor.
///
/// The monitor holds one instance behind this trait and never branches on
/// the concrete type.
pub trait DecisionMaker: Send {
    /// Next action to exercise at `state`, or `None` when the policy lists
    /// no admissible action there.
    ///
    /// Every returned `(state, action)` pair is counted in
    /// [`selections`](Self::selections).
    fn next_action(&mut self, state: StateIndex) -> Option<String>;

    /// Called once per transition taken from an uncertain state.
    fn update_count(&mut self, state: StateIndex);

    /// Called with the latest HPD region size of an uncertain state.
    fn update_distance(&mut self, state: StateIndex, distance: f64);

    /// How many times each `(state, action)` pair has been returned.
    fn selections(&self) -> &SelectionCounts;

    /// Short strategy name for logs and reports.
    fn name(&self) -> &'static str;
}

/// Per `(state, action)` selection counters.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SelectionCounts {
    counts: BTreeMap<(StateIndex, String), u64>,
}

impl SelectionCounts {
    /// Count one selection of `action` at `state`.
    pub fn record(&mut self, state: StateIndex, action: &str) {
        *self
            .counts
            .entry((state, action.to_string()))
            .or_insert(0) += 1;
    }

    /// Times `action` was selected at `state`.
    pub fn get(&self, state: StateIndex, action: &str) -> u64 {
        self.counts
            .get(&(state, action.to_string()))
            .copied()
            .unwrap_or(0)
    }

    /// Total selections across all pairs.
    pub fn total(&self) -> u64 {
        self.counts.values().sum()
    }

    /// `(state, action, count)` in state then action order.
    pub fn iter(&self) -> impl Iterator<Item = (StateIndex, &str, u64)> {
        self.counts
            .iter()
            .map(|((s, a), &n)| (*s, a.as_str(), n))
    }
}

/// Which [`DecisionMaker`] variant to build.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum DecisionStrategy {
    /// Uniform among the policy's actions.
    #[default]
    Flat,
    /// Epsilon-greedy on the policy, decaying with state visits.
    Count,
    /// Policy reweighted toward actions leading to uncertain states.
    Distance,
}

/// Unrecognised strategy name.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("unknown decision strategy {0:?} (expected flat, count or distance)")]
pub struct UnknownStrategy(pub String);

impl FromStr for DecisionStrategy {
    type Err = UnknownStrategy;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "flat" | "uniform" => Ok(Self::Flat),
            "count" => Ok(Self::Count),
            "distance" => Ok(Self::Distance),
            _ => Err(UnknownStrategy(s.to_string())),
        }
    }
}

impl fmt::Display for DecisionStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Flat => "flat",
            Self::Count => "count",
            Self::Distance => "distance",
        };
        f.write_str(name)
    }
}

/// Build the decision maker selected by `strategy`.
pub fn build(
    strategy: DecisionStrategy,
    policy: MixedPolicy,
    model: &Model,
    seed: u64,
) -> Box<dyn DecisionMaker> {
    debug!("Building {} decision maker (seed {})", strategy, seed);
    match strategy {
        DecisionStrategy::Flat => Box::new(FlatDecisionMaker::new(policy, seed)),
        DecisionStrategy::Count => Box::new(CountDecisionMaker::new(policy, seed)),
        DecisionStrategy::Distance => Box::new(DistanceDecisionMaker::new(policy, model, seed)),
    }
}

/// Index of a uniformly chosen entry.
pub(crate) fn pick_uniform(rng: &mut impl Rng, entries: &[PolicyEntry]) -> Option<usize> {
    if entries.is_empty() {
        None
    } else {
        Some(rng.gen_range(0..entries.len()))
    }
}

/// Index drawn proportionally to `weights`; falls back to uniform when the
/// weights carry no usable mass.
pub(crate) fn pick_weighted(
    rng: &mut impl Rng,
    entries: &[PolicyEntry],
    weights: &[f64],
) -> Option<usize> {
    match WeightedIndex::new(weights) {
        Ok(dist) => Some(dist.sample(rng)),
        Err(_) => pick_uniform(rng, entries),
    }
}
