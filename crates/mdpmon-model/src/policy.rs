//! Mixed policy: per-state probability distribution over admissible
//! actions, as produced by the external MDP solver.
//!
//! The policy file maps state names to the ordered list of admissible
//! actions:
//!
//! ```json
//! { "A": [ { "action": "go", "probability": 0.7 },
//!          { "action": "wait", "probability": 0.3 } ] }
//! ```

use crate::model::{Model, StateIndex};
use crate::spec::LoadError;
use log::warn;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};
use std::fs;
use std::path::Path;
use thiserror::Error;

/// Errors raised while building a policy.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum PolicyError {
    #[error("policy references unknown state: {0}")]
    UnknownState(String),

    #[error("state index {index} out of range (policy covers {len} states)")]
    StateOutOfRange { index: usize, len: usize },

    #[error("invalid probability {probability} for {state}/{action}")]
    InvalidProbability {
        state: String,
        action: String,
        probability: f64,
    },

    #[error("action {action} listed twice for state {state}")]
    DuplicateAction { state: String, action: String },

    #[error("actions for state {0} carry no probability mass")]
    ZeroMass(String),
}

/// One admissible action and its selection probability.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PolicyEntry {
    pub action: String,
    pub probability: f64,
}

impl PolicyEntry {
    pub fn new(action: impl Into<String>, probability: f64) -> Self {
        Self {
            action: action.into(),
            probability,
        }
    }
}

/// Per-state mixed policy, indexed by [`StateIndex`].
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MixedPolicy {
    entries: Vec<Vec<PolicyEntry>>,
}

impl MixedPolicy {
    /// An empty policy covering `num_states` states.
    pub fn new(num_states: usize) -> Self {
        Self {
            entries: vec![Vec::new(); num_states],
        }
    }

    /// Uniform policy over the distinct actions leaving each state.
    pub fn uniform(model: &Model) -> Self {
        let entries: Vec<Vec<PolicyEntry>> = (0..model.num_states())
            .map(|s| {
                let actions = model.actions(s);
                let p = 1.0 / actions.len().max(1) as f64;
                actions
                    .into_iter()
                    .map(|a| PolicyEntry::new(a, p))
                    .collect::<Vec<_>>()
            })
            .collect();
        Self { entries }
    }

    /// Set the admissible actions of `state`.
    ///
    /// Probabilities must be finite and non-negative, and a non-empty list
    /// must carry some mass. They need not sum to one.
    pub fn set(&mut self, state: StateIndex, entries: Vec<PolicyEntry>) -> Result<(), PolicyError> {
        let len = self.entries.len();
        if state >= len {
            return Err(PolicyError::StateOutOfRange { index: state, len });
        }

        let name = state.to_string();
        let mut seen = HashSet::new();
        for e in &entries {
            if !e.probability.is_finite() || e.probability < 0.0 {
                return Err(PolicyError::InvalidProbability {
                    state: name,
                    action: e.action.clone(),
                    probability: e.probability,
                });
            }
            if !seen.insert(e.action.as_str()) {
                return Err(PolicyError::DuplicateAction {
                    state: name,
                    action: e.action.clone(),
                });
            }
        }
        if !entries.is_empty() && entries.iter().all(|e| e.probability == 0.0) {
            return Err(PolicyError::ZeroMass(name));
        }

        self.entries[state] = entries;
        Ok(())
    }

    /// Admissible actions at `state` (empty when the policy says nothing).
    pub fn actions(&self, state: StateIndex) -> &[PolicyEntry] {
        self.entries.get(state).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Number of states the policy covers.
    pub fn num_states(&self) -> usize {
        self.entries.len()
    }

    /// Resolve a name-keyed policy against `model`.
    ///
    /// Actions that no arc of the state carries are kept but logged: the
    /// solver and the model may disagree, and the monitor will flag any
    /// resulting unmatched event on its own.
    pub fn from_spec(
        model: &Model,
        spec: BTreeMap<String, Vec<PolicyEntry>>,
    ) -> Result<Self, PolicyError> {
        let mut policy = Self::new(model.num_states());
        for (name, entries) in spec {
            let state = model
                .index_of(&name)
                .ok_or_else(|| PolicyError::UnknownState(name.clone()))?;
            let available = model.actions(state);
            for e in &entries {
                if !available.contains(&e.action.as_str()) {
                    warn!(
                        "Policy action {} at state {} matches no outgoing arc",
                        e.action, name
                    );
                }
            }
            policy.set(state, entries).map_err(|e| rename_state(e, &name))?;
        }
        Ok(policy)
    }

    /// Load a policy file and resolve it against `model`.
    pub fn load<P: AsRef<Path>>(path: P, model: &Model) -> Result<Self, LoadError> {
        let json = fs::read_to_string(path)?;
        let spec: BTreeMap<String, Vec<PolicyEntry>> = serde_json::from_str(&json)?;
        Ok(Self::from_spec(model, spec)?)
    }
}

/// Replace the numeric state placeholder of [`MixedPolicy::set`] errors
/// with the state's name.
fn rename_state(err: PolicyError, name: &str) -> PolicyError {
    match err {
        PolicyError::InvalidProbability {
            action,
            probability,
            ..
        } => PolicyError::InvalidProbability {
            state: name.to_string(),
            action,
            probability,
        },
        PolicyError::DuplicateAction { action, .. } => PolicyError::DuplicateAction {
            state: name.to_string(),
            action,
        },
        PolicyError::ZeroMass(_) => PolicyError::ZeroMass(name.to_string()),
        other => other,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::spec::ModelBuilder;

    fn model() -> Model {
        ModelBuilder::new()
            .initial_state("A")
            .state("B")
            .arc("A", "B", "go", "go")
            .arc("A", "A", "stay", "wait")
            .arc("B", "A", "back", "back")
            .build()
            .unwrap()
    }

    #[test]
    fn test_uniform_policy() {
        let policy = MixedPolicy::uniform(&model());
        let a = policy.actions(0);
        assert_eq!(a.len(), 2);
        assert_eq!(a[0].action, "go");
        assert_eq!(a[1].action, "wait");
        assert!((a[0].probability - 0.5).abs() < 1e-12);
        assert_eq!(policy.actions(1).len(), 1);
        assert!(policy.actions(7).is_empty());
    }

    #[test]
    fn test_from_spec() {
        let mut spec = BTreeMap::new();
        spec.insert(
            "A".to_string(),
            vec![PolicyEntry::new("go", 0.7), PolicyEntry::new("wait", 0.3)],
        );
        let policy = MixedPolicy::from_spec(&model(), spec).unwrap();
        assert_eq!(policy.actions(0).len(), 2);
        assert!(policy.actions(1).is_empty());
    }

    #[test]
    fn test_from_spec_unknown_state() {
        let mut spec = BTreeMap::new();
        spec.insert("Z".to_string(), vec![PolicyEntry::new("go", 1.0)]);
        assert_eq!(
            MixedPolicy::from_spec(&model(), spec).unwrap_err(),
            PolicyError::UnknownState("Z".to_string())
        );
    }

    #[test]
    fn test_set_rejects_negative_probability() {
        let mut policy = MixedPolicy::new(2);
        let err = policy
            .set(0, vec![PolicyEntry::new("go", -0.1)])
            .unwrap_err();
        assert!(matches!(err, PolicyError::InvalidProbability { .. }));
    }

    #[test]
    fn test_set_rejects_duplicates_and_zero_mass() {
        let mut policy = MixedPolicy::new(1);
        let err = policy
            .set(0, vec![PolicyEntry::new("go", 0.5), PolicyEntry::new("go", 0.5)])
            .unwrap_err();
        assert!(matches!(err, PolicyError::DuplicateAction { .. }));

        let err = policy
            .set(0, vec![PolicyEntry::new("go", 0.0)])
            .unwrap_err();
        assert_eq!(err, PolicyError::ZeroMass("0".to_string()));

        let err = policy.set(3, Vec::new()).unwrap_err();
        assert_eq!(err, PolicyError::StateOutOfRange { index: 3, len: 1 });
    }

    #[test]
    fn test_error_names_state() {
        let mut spec = BTreeMap::new();
        spec.insert("B".to_string(), vec![PolicyEntry::new("back", 0.0)]);
        assert_eq!(
            MixedPolicy::from_spec(&model(), spec).unwrap_err(),
            PolicyError::ZeroMass("B".to_string())
        );
    }

    #[test]
    fn test_load_policy_file() {
        let path = std::env::temp_dir().join("mdpmon_test_policy_load.json");
        fs::write(
            &path,
            r#"{ "A": [ { "action": "go", "probability": 1.0 } ], "B": [] }"#,
        )
        .unwrap();

        let policy = MixedPolicy::load(&path, &model()).unwrap();
        assert_eq!(policy.actions(0)[0].action, "go");
        assert!(policy.actions(1).is_empty());

        let _ = fs::remove_file(&path);
    }
}
