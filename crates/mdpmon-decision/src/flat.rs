//! Flat (uniform) decision maker, the exploration baseline.

use crate::maker::{pick_uniform, DecisionMaker, SelectionCounts};
use mdpmon_model::{MixedPolicy, StateIndex};
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;

/// Draws uniformly among the actions the policy admits at a state,
/// ignoring the policy's probabilities and all monitor feedback.
pub struct FlatDecisionMaker {
    policy: MixedPolicy,
    rng: ChaCha8Rng,
    counts: SelectionCounts,
}

impl FlatDecisionMaker {
    pub fn new(policy: MixedPolicy, seed: u64) -> Self {
        Self {
            policy,
            rng: ChaCha8Rng::seed_from_u64(seed),
            counts: SelectionCounts::default(),
        }
    }
}

impl DecisionMaker for FlatDecisionMaker {
    fn next_action(&mut self, state: StateIndex) -> Option<String> {
        let entries = self.policy.actions(state);
        let i = pick_uniform(&mut self.rng, entries)?;
        let action = entries[i].action.clone();
        self.counts.record(state, &action);
        Some(action)
    }

    fn update_count(&mut self, _state: StateIndex) {}

    fn update_distance(&mut self, _state: StateIndex, _distance: f64) {}

    fn selections(&self) -> &SelectionCounts {
        &self.counts
    }

    fn name(&self) -> &'static str {
        "flat"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mdpmon_model::PolicyEntry;

    fn policy() -> MixedPolicy {
        let mut policy = MixedPolicy::new(2);
        // Heavily skewed on purpose: the flat maker must ignore it.
        policy
            .set(
                0,
                vec![PolicyEntry::new("a", 0.99), PolicyEntry::new("b", 0.01)],
            )
            .unwrap();
        policy
    }

    #[test]
    fn test_flat_ignores_policy_probabilities() {
        let mut dm = FlatDecisionMaker::new(policy(), 42);
        for _ in 0..2000 {
            dm.next_action(0).unwrap();
        }
        let a = dm.selections().get(0, "a");
        let b = dm.selections().get(0, "b");
        assert_eq!(a + b, 2000);
        // Uniform: both near 1000.
        assert!(a > 850 && b > 850, "a={} b={}", a, b);
    }

    #[test]
    fn test_flat_no_actions() {
        let mut dm = FlatDecisionMaker::new(policy(), 42);
        assert_eq!(dm.next_action(1), None);
        assert_eq!(dm.next_action(9), None);
        assert_eq!(dm.selections().total(), 0);
    }

    #[test]
    fn test_flat_feedback_is_noop() {
        let mut dm = FlatDecisionMaker::new(policy(), 42);
        dm.update_count(0);
        dm.update_distance(0, 0.5);
        assert_eq!(dm.selections().total(), 0);
    }

    #[test]
    fn test_flat_deterministic_per_seed() {
        let mut a = FlatDecisionMaker::new(policy(), 7);
        let mut b = FlatDecisionMaker::new(policy(), 7);
        let seq_a: Vec<_> = (0..50).map(|_| a.next_action(0)).collect();
        let seq_b: Vec<_> = (0..50).map(|_| b.next_action(0)).collect();
        assert_eq!(seq_a, seq_b);
    }
}
