//! Serde interchange form of a model, the fluent builder, and file loading.
//!
//! The interchange form references states by name so it can be written by
//! hand or emitted by whatever front end parses the MDP description
//! language:
//!
//! ```json
//! {
//!   "states": [
//!     { "name": "A", "initial": true,
//!       "priors": [ { "action": "go", "concentration": { "A": 1, "B": 1, "C": 1 } } ] },
//!     { "name": "B" },
//!     { "name": "C" }
//!   ],
//!   "arcs": [
//!     { "src": "A", "dst": "B", "event": "go", "action": "go" },
//!     { "src": "B", "dst": "C", "event": "go", "action": "go" }
//!   ],
//!   "observables": [ { "src": "A", "event": "go", "observable": "g" } ]
//! }
//! ```

use crate::model::{
    ConcentrationParam, Model, ModelError, ObservableMap, PriorSpec, State, Transition,
};
use crate::policy::PolicyError;
use serde::{Deserialize, Serialize};
use snafu::Snafu;
use std::collections::{BTreeMap, HashMap};
use std::fs;
use std::path::Path;

/// Errors from loading model or policy files.
#[derive(Debug, Snafu)]
pub enum LoadError {
    #[snafu(display("I/O error"), context(false))]
    Io { source: std::io::Error },

    #[snafu(display("JSON error"), context(false))]
    Json { source: serde_json::Error },

    #[snafu(display("invalid model: {source}"), context(false))]
    Model { source: ModelError },

    #[snafu(display("invalid policy: {source}"), context(false))]
    Policy { source: PolicyError },
}

/// A prior over the outcome of `action`, keyed by destination state name.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PriorEntry {
    pub action: String,
    #[serde(default)]
    pub concentration: BTreeMap<String, f64>,
}

/// A state in the interchange form.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StateSpec {
    pub name: String,
    #[serde(default)]
    pub initial: bool,
    #[serde(default)]
    pub priors: Vec<PriorEntry>,
}

/// An arc in the interchange form.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArcSpec {
    pub src: String,
    pub dst: String,
    pub event: String,
    pub action: String,
}

/// Observable mapping, identifying the arc by source state and event name.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ObservableSpec {
    pub src: String,
    pub event: String,
    pub observable: String,
}

/// Complete interchange form of a model.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ModelSpec {
    pub states: Vec<StateSpec>,
    #[serde(default)]
    pub arcs: Vec<ArcSpec>,
    #[serde(default)]
    pub observables: Vec<ObservableSpec>,
}

impl ModelSpec {
    /// Resolve names to indices and validate.
    pub fn resolve(&self) -> Result<Model, ModelError> {
        let index: HashMap<&str, usize> = self
            .states
            .iter()
            .enumerate()
            .map(|(i, s)| (s.name.as_str(), i))
            .collect();
        let lookup = |name: &str| {
            index
                .get(name)
                .copied()
                .ok_or_else(|| ModelError::UnknownState(name.to_string()))
        };

        let mut states = Vec::with_capacity(self.states.len());
        for s in &self.states {
            let mut priors = Vec::with_capacity(s.priors.len());
            for p in &s.priors {
                let concentration = p
                    .concentration
                    .iter()
                    .map(|(dst, &alpha)| {
                        Ok(ConcentrationParam {
                            dst: lookup(dst)?,
                            alpha,
                        })
                    })
                    .collect::<Result<Vec<_>, ModelError>>()?;
                priors.push(PriorSpec {
                    action: p.action.clone(),
                    concentration,
                });
            }
            states.push(State {
                name: s.name.clone(),
                initial: s.initial,
                priors,
            });
        }

        let transitions = self
            .arcs
            .iter()
            .map(|a| {
                Ok(Transition {
                    src: lookup(&a.src)?,
                    dst: lookup(&a.dst)?,
                    event: a.event.clone(),
                    action: a.action.clone(),
                })
            })
            .collect::<Result<Vec<_>, ModelError>>()?;

        let observables = self
            .observables
            .iter()
            .map(|o| {
                let src = lookup(&o.src)?;
                let transition = transitions
                    .iter()
                    .position(|t| t.src == src && t.event == o.event)
                    .ok_or_else(|| ModelError::UnknownArc {
                        state: o.src.clone(),
                        event: o.event.clone(),
                    })?;
                Ok(ObservableMap {
                    transition,
                    observable: o.observable.clone(),
                })
            })
            .collect::<Result<Vec<_>, ModelError>>()?;

        Model::new(states, transitions, observables)
    }
}

impl Model {
    /// Load a model from its JSON interchange form.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Model, LoadError> {
        let json = fs::read_to_string(path)?;
        let spec: ModelSpec = serde_json::from_str(&json)?;
        Ok(spec.resolve()?)
    }
}

/// Fluent builder over [`ModelSpec`], for tests and embedding callers.
///
/// # Example
///
/// ```
/// use mdpmon_model::ModelBuilder;
///
/// let model = ModelBuilder::new()
///     .initial_state("idle")
///     .state("busy")
///     .arc("idle", "busy", "start", "run")
///     .arc("busy", "idle", "done", "finish")
///     .observable("idle", "start", "r")
///     .build()
///     .unwrap();
///
/// assert_eq!(model.coverage_label(0), "r");
/// ```
#[derive(Debug, Clone, Default)]
pub struct ModelBuilder {
    spec: ModelSpec,
}

impl ModelBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add the initial state.
    pub fn initial_state(mut self, name: impl Into<String>) -> Self {
        self.spec.states.push(StateSpec {
            name: name.into(),
            initial: true,
            priors: Vec::new(),
        });
        self
    }

    /// Add a non-initial state.
    pub fn state(mut self, name: impl Into<String>) -> Self {
        self.spec.states.push(StateSpec {
            name: name.into(),
            initial: false,
            priors: Vec::new(),
        });
        self
    }

    /// Add an arc `src --event--> dst` belonging to `action`.
    pub fn arc(
        mut self,
        src: impl Into<String>,
        dst: impl Into<String>,
        event: impl Into<String>,
        action: impl Into<String>,
    ) -> Self {
        self.spec.arcs.push(ArcSpec {
            src: src.into(),
            dst: dst.into(),
            event: event.into(),
            action: action.into(),
        });
        self
    }

    /// Declare a Dirichlet prior on `action` at `state`.
    ///
    /// A state not added yet is created as a non-initial state.
    pub fn prior(mut self, state: &str, action: impl Into<String>, alpha: &[(&str, f64)]) -> Self {
        let entry = PriorEntry {
            action: action.into(),
            concentration: alpha.iter().map(|(k, v)| (k.to_string(), *v)).collect(),
        };
        match self.spec.states.iter_mut().find(|s| s.name == state) {
            Some(s) => s.priors.push(entry),
            None => self.spec.states.push(StateSpec {
                name: state.to_string(),
                initial: false,
                priors: vec![entry],
            }),
        }
        self
    }

    /// Map the arc leaving `src` on `event` to an observable action.
    pub fn observable(
        mut self,
        src: impl Into<String>,
        event: impl Into<String>,
        observable: impl Into<String>,
    ) -> Self {
        self.spec.observables.push(ObservableSpec {
            src: src.into(),
            event: event.into(),
            observable: observable.into(),
        });
        self
    }

    /// The interchange form built so far.
    pub fn spec(&self) -> &ModelSpec {
        &self.spec
    }

    pub fn build(self) -> Result<Model, ModelError> {
        self.spec.resolve()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const ABC: &str = r#"{
        "states": [
            { "name": "A", "initial": true,
              "priors": [ { "action": "go", "concentration": { "A": 1, "B": 2, "C": 3 } } ] },
            { "name": "B" },
            { "name": "C" }
        ],
        "arcs": [
            { "src": "A", "dst": "B", "event": "go", "action": "go" },
            { "src": "B", "dst": "C", "event": "go", "action": "go" }
        ],
        "observables": [ { "src": "B", "event": "go", "observable": "g" } ]
    }"#;

    #[test]
    fn test_resolve_from_json() {
        let spec: ModelSpec = serde_json::from_str(ABC).unwrap();
        let model = spec.resolve().unwrap();

        assert_eq!(model.num_states(), 3);
        assert_eq!(model.initial_state(), 0);
        let prior = &model.state(0).priors[0];
        assert_eq!(prior.action, "go");
        assert_eq!(prior.dense_alpha(3), vec![1.0, 2.0, 3.0]);
        assert_eq!(model.coverage_label(1), "g");
        assert_eq!(model.coverage_label(0), "go");
    }

    #[test]
    fn test_resolve_unknown_state() {
        let spec = ModelBuilder::new()
            .initial_state("A")
            .arc("A", "Nope", "go", "go")
            .spec()
            .clone();
        assert_eq!(
            spec.resolve().unwrap_err(),
            ModelError::UnknownState("Nope".to_string())
        );
    }

    #[test]
    fn test_resolve_unknown_observable_arc() {
        let err = ModelBuilder::new()
            .initial_state("A")
            .observable("A", "missing", "x")
            .build()
            .unwrap_err();
        assert!(matches!(err, ModelError::UnknownArc { .. }));
    }

    #[test]
    fn test_builder_prior_attaches_to_existing_state() {
        let model = ModelBuilder::new()
            .initial_state("A")
            .state("B")
            .arc("A", "B", "go", "go")
            .prior("A", "go", &[("B", 5.0)])
            .build()
            .unwrap();
        assert_eq!(model.num_states(), 2);
        assert!(model.state(0).is_uncertain());
        assert!(!model.state(1).is_uncertain());
    }

    #[test]
    fn test_load_model_file() {
        let path = std::env::temp_dir().join("mdpmon_test_model_load.json");
        fs::write(&path, ABC).unwrap();

        let model = Model::load(&path).unwrap();
        assert_eq!(model.index_of("B"), Some(1));

        let _ = fs::remove_file(&path);
    }

    #[test]
    fn test_load_missing_file() {
        let err = Model::load("/nonexistent/model.json").unwrap_err();
        assert!(matches!(err, LoadError::Io { .. }));
    }

    #[test]
    fn test_load_invalid_json() {
        let path = std::env::temp_dir().join("mdpmon_test_model_bad.json");
        fs::write(&path, "{ not json").unwrap();

        let err = Model::load(&path).unwrap_err();
        assert!(matches!(err, LoadError::Json { .. }));

        let _ = fs::remove_file(&path);
    }

    #[test]
    fn test_load_invalid_model() {
        let path = std::env::temp_dir().join("mdpmon_test_model_invalid.json");
        fs::write(&path, r#"{ "states": [ { "name": "A" } ] }"#).unwrap();

        let err = Model::load(&path).unwrap_err();
        assert!(matches!(err, LoadError::Model { .. }));

        let _ = fs::remove_file(&path);
    }
}
