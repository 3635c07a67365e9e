//! Adaptive decision makers driven by monitor feedback.

use crate::maker::{pick_uniform, pick_weighted, DecisionMaker, SelectionCounts};
use mdpmon_model::{MixedPolicy, Model, StateIndex};
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;

/// Epsilon-greedy on the mixed policy.
///
/// At a state visited `n` times (as reported through
/// [`update_count`](DecisionMaker::update_count)) the maker explores
/// uniformly with probability `1 / sqrt(1 + n)` and otherwise samples the
/// policy's own distribution. Rarely visited states are explored broadly;
/// well-known states follow the solver's policy.
pub struct CountDecisionMaker {
    policy: MixedPolicy,
    rng: ChaCha8Rng,
    counts: SelectionCounts,
    visits: Vec<u64>,
}

impl CountDecisionMaker {
    pub fn new(policy: MixedPolicy, seed: u64) -> Self {
        let visits = vec![0; policy.num_states()];
        Self {
            policy,
            rng: ChaCha8Rng::seed_from_u64(seed),
            counts: SelectionCounts::default(),
            visits,
        }
    }

    /// Transitions observed from `state` so far.
    pub fn visits(&self, state: StateIndex) -> u64 {
        self.visits.get(state).copied().unwrap_or(0)
    }

    /// Current exploration probability at `state`.
    pub fn epsilon(&self, state: StateIndex) -> f64 {
        1.0 / (1.0 + self.visits(state) as f64).sqrt()
    }
}

impl DecisionMaker for CountDecisionMaker {
    fn next_action(&mut self, state: StateIndex) -> Option<String> {
        let epsilon = self.epsilon(state);
        let entries = self.policy.actions(state);
        let i = if self.rng.gen::<f64>() < epsilon {
            pick_uniform(&mut self.rng, entries)?
        } else {
            let weights: Vec<f64> = entries.iter().map(|e| e.probability).collect();
            pick_weighted(&mut self.rng, entries, &weights)?
        };
        let action = entries[i].action.clone();
        self.counts.record(state, &action);
        Some(action)
    }

    fn update_count(&mut self, state: StateIndex) {
        if let Some(v) = self.visits.get_mut(state) {
            *v += 1;
        }
    }

    fn update_distance(&mut self, _state: StateIndex, _distance: f64) {}

    fn selections(&self) -> &SelectionCounts {
        &self.counts
    }

    fn name(&self) -> &'static str {
        "count"
    }
}

/// Minimum weight multiplier, so actions leading only to certain states
/// keep a chance of being picked.
pub const DISTANCE_FLOOR: f64 = 0.01;

/// Reweights the policy toward actions whose successors are still
/// uncertain.
///
/// The weight of action `a` at state `s` is
/// `p(a) * (DISTANCE_FLOOR + mean distance of the uncertain successors of a)`,
/// where a successor's distance is the latest HPD region size reported
/// through [`update_distance`](DecisionMaker::update_distance). States that
/// never reported a distance count as certain.
pub struct DistanceDecisionMaker {
    policy: MixedPolicy,
    rng: ChaCha8Rng,
    counts: SelectionCounts,
    /// `successors[state][entry]`: destinations of the policy entry's action.
    successors: Vec<Vec<Vec<StateIndex>>>,
    distances: Vec<Option<f64>>,
}

impl DistanceDecisionMaker {
    pub fn new(policy: MixedPolicy, model: &Model, seed: u64) -> Self {
        let successors = (0..policy.num_states())
            .map(|s| {
                policy
                    .actions(s)
                    .iter()
                    .map(|e| {
                        if s < model.num_states() {
                            model.successors(s, &e.action)
                        } else {
                            Vec::new()
                        }
                    })
                    .collect::<Vec<_>>()
            })
            .collect();
        Self {
            rng: ChaCha8Rng::seed_from_u64(seed),
            counts: SelectionCounts::default(),
            successors,
            distances: vec![None; model.num_states()],
            policy,
        }
    }

    /// Latest distance reported for `state`.
    pub fn distance(&self, state: StateIndex) -> Option<f64> {
        self.distances.get(state).copied().flatten()
    }

    /// Selection weights of the policy entries at `state`.
    pub fn weights(&self, state: StateIndex) -> Vec<f64> {
        self.policy
            .actions(state)
            .iter()
            .enumerate()
            .map(|(i, e)| {
                let known: Vec<f64> = self
                    .successors
                    .get(state)
                    .and_then(|s| s.get(i))
                    .map(|dsts| dsts.iter().filter_map(|&d| self.distance(d)).collect())
                    .unwrap_or_default();
                let uncertainty = if known.is_empty() {
                    0.0
                } else {
                    known.iter().sum::<f64>() / known.len() as f64
                };
                e.probability * (DISTANCE_FLOOR + uncertainty)
            })
            .collect()
    }
}

impl DecisionMaker for DistanceDecisionMaker {
    fn next_action(&mut self, state: StateIndex) -> Option<String> {
        let weights = self.weights(state);
        let entries = self.policy.actions(state);
        let i = pick_weighted(&mut self.rng, entries, &weights)?;
        let action = entries[i].action.clone();
        self.counts.record(state, &action);
        Some(action)
    }

    fn update_count(&mut self, _state: StateIndex) {}

    fn update_distance(&mut self, state: StateIndex, distance: f64) {
        if let Some(d) = self.distances.get_mut(state) {
            *d = Some(distance);
        }
    }

    fn selections(&self) -> &SelectionCounts {
        &self.counts
    }

    fn name(&self) -> &'static str {
        "distance"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mdpmon_model::{ModelBuilder, PolicyEntry};

    /// `S` can `probe` toward the uncertain state `U` or `rest` toward the
    /// certain state `C`.
    fn model() -> Model {
        ModelBuilder::new()
            .initial_state("S")
            .state("U")
            .state("C")
            .arc("S", "U", "probe", "probe")
            .arc("S", "C", "rest", "rest")
            .arc("U", "S", "back", "back")
            .arc("C", "S", "home", "home")
            .prior("U", "back", &[("S", 1.0)])
            .build()
            .unwrap()
    }

    fn policy() -> MixedPolicy {
        let mut policy = MixedPolicy::new(3);
        policy
            .set(
                0,
                vec![PolicyEntry::new("probe", 0.5), PolicyEntry::new("rest", 0.5)],
            )
            .unwrap();
        policy
    }

    #[test]
    fn test_count_epsilon_decays() {
        let mut dm = CountDecisionMaker::new(policy(), 1);
        assert_eq!(dm.epsilon(0), 1.0);
        for _ in 0..3 {
            dm.update_count(0);
        }
        assert_eq!(dm.visits(0), 3);
        assert!((dm.epsilon(0) - 0.5).abs() < 1e-12);
        dm.update_count(99);
        assert_eq!(dm.visits(99), 0);
    }

    #[test]
    fn test_count_follows_policy_when_well_visited() {
        let mut skewed = MixedPolicy::new(1);
        skewed
            .set(0, vec![PolicyEntry::new("a", 1.0), PolicyEntry::new("b", 0.0)])
            .unwrap();
        let mut dm = CountDecisionMaker::new(skewed, 3);
        for _ in 0..9999 {
            dm.update_count(0);
        }
        // epsilon = 0.01: nearly every draw follows the policy.
        for _ in 0..500 {
            dm.next_action(0).unwrap();
        }
        assert!(dm.selections().get(0, "a") > 480);
        assert_eq!(dm.selections().total(), 500);
    }

    #[test]
    fn test_count_no_actions() {
        let mut dm = CountDecisionMaker::new(policy(), 1);
        assert_eq!(dm.next_action(2), None);
    }

    #[test]
    fn test_distance_weights_favor_uncertain_successors() {
        let model = model();
        let mut dm = DistanceDecisionMaker::new(policy(), &model, 5);

        // No feedback yet: both actions weigh the floor.
        let w = dm.weights(0);
        assert!((w[0] - w[1]).abs() < 1e-12);

        dm.update_distance(1, 0.8);
        assert_eq!(dm.distance(1), Some(0.8));
        let w = dm.weights(0);
        assert!(w[0] > w[1] * 10.0);

        for _ in 0..300 {
            dm.next_action(0).unwrap();
        }
        assert!(dm.selections().get(0, "probe") > dm.selections().get(0, "rest"));
    }

    #[test]
    fn test_distance_out_of_range_feedback_ignored() {
        let model = model();
        let mut dm = DistanceDecisionMaker::new(policy(), &model, 5);
        dm.update_distance(42, 1.0);
        assert_eq!(dm.distance(42), None);
    }
}
