//! Bayesian estimation of the uncertain transition distributions.
//!
//! One [`UncertainParameter`] exists per `(state, action)` prior the model
//! declares. Its posterior starts as a copy of the prior and absorbs every
//! observed transition taken from that state under that action.
//!
//! Convergence is checked jointly: nothing is evaluated until *every*
//! posterior has collected more than `sample_threshold` fresh samples. At
//! that point all counters are reset and the check passes only if every
//! posterior's distance is below the tolerance. A rarely visited state
//! therefore holds back the verdict for all others.

use crate::dirichlet::Dirichlet;
use log::debug;
use mdpmon_model::{Model, StateIndex};

/// Prior and posterior of one uncertain `(state, action)`.
#[derive(Debug, Clone)]
pub struct UncertainParameter {
    pub state: StateIndex,
    pub prior: Dirichlet,
    pub posterior: Dirichlet,
    /// Outcome of the latest joint convergence check.
    pub converged: bool,
}

impl UncertainParameter {
    pub fn action(&self) -> &str {
        self.prior.action()
    }
}

/// All uncertain parameters of a model.
#[derive(Debug, Clone)]
pub struct BayesianEstimator {
    params: Vec<UncertainParameter>,
    /// `by_state[s]` = indices into `params` of the priors declared at `s`.
    by_state: Vec<Vec<usize>>,
    sample_threshold: u64,
    tolerance: f64,
}

impl BayesianEstimator {
    pub fn new(model: &Model, hpd_level: f64, sample_threshold: u64, tolerance: f64) -> Self {
        let k = model.num_states();
        let mut params = Vec::new();
        let mut by_state = vec![Vec::new(); k];
        for (state, spec) in model.priors() {
            let prior = Dirichlet::new(spec.action.clone(), spec.dense_alpha(k), hpd_level);
            by_state[state].push(params.len());
            params.push(UncertainParameter {
                state,
                posterior: prior.clone(),
                prior,
                converged: false,
            });
        }
        debug!(
            "Estimator tracks {} uncertain parameters over {} states",
            params.len(),
            k
        );
        Self {
            params,
            by_state,
            sample_threshold,
            tolerance,
        }
    }

    pub fn parameters(&self) -> &[UncertainParameter] {
        &self.params
    }

    pub fn is_empty(&self) -> bool {
        self.params.is_empty()
    }

    pub fn is_uncertain(&self, state: StateIndex) -> bool {
        self.by_state.get(state).is_some_and(|p| !p.is_empty())
    }

    /// Record a transition `state --action--> dst`. Returns the index of the
    /// updated parameter, or `None` when no prior matches the action.
    pub fn observe(&mut self, state: StateIndex, action: &str, dst: StateIndex) -> Option<usize> {
        let index = self
            .by_state
            .get(state)?
            .iter()
            .copied()
            .find(|&i| self.params[i].action() == action)?;
        self.params[index].posterior.update(dst).then_some(index)
    }

    /// Whether every posterior has more than the threshold of fresh samples.
    pub fn thresholds_met(&self) -> bool {
        !self.params.is_empty()
            && self
                .params
                .iter()
                .all(|p| p.posterior.count() > self.sample_threshold)
    }

    /// Run the joint convergence check if its thresholds are met. Resets
    /// every counter and returns whether all posteriors converged; returns
    /// `None` without side effects otherwise.
    pub fn check_convergence(&mut self) -> Option<bool> {
        if !self.thresholds_met() {
            return None;
        }
        let tolerance = self.tolerance;
        let mut all = true;
        for p in &mut self.params {
            p.posterior.reset_count();
            p.converged = p.posterior.converged(tolerance);
            all &= p.converged;
        }
        Some(all)
    }

    /// Sum of the posteriors' sample sizes.
    pub fn total_samples(&self) -> u64 {
        self.params.iter().map(|p| p.posterior.sample_size()).sum()
    }

    /// Largest posterior distance among the priors of `state`.
    pub fn state_distance(&self, state: StateIndex) -> Option<f64> {
        self.by_state
            .get(state)?
            .iter()
            .map(|&i| self.params[i].posterior.distance())
            .reduce(f64::max)
    }

    /// `(state, distance)` for every uncertain state, in state order.
    pub fn state_distances(&self) -> Vec<(StateIndex, f64)> {
        (0..self.by_state.len())
            .filter_map(|s| self.state_distance(s).map(|d| (s, d)))
            .collect()
    }
}
