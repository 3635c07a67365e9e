//! Arena-indexed MDP model.
//!
//! A [`Model`] is immutable once built. [`Model::new`] validates the raw
//! parts and derives the lookup tables the monitor needs:
//!
//! | Table        | Key               | Value                                  |
//! |--------------|-------------------|----------------------------------------|
//! | `outgoing`   | state index       | indices of arcs leaving that state     |
//! | `observable` | transition index  | observable action label, if mapped     |
//! | `reachable`  | state index       | reachable from the initial state       |

use log::debug;
use std::collections::{BTreeSet, HashSet, VecDeque};
use thiserror::Error;

/// Position of a state in [`Model::states`].
pub type StateIndex = usize;

/// Position of an arc in [`Model::transitions`].
pub type TransitionIndex = usize;

/// Errors raised while validating a model.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ModelError {
    #[error("model has no states")]
    Empty,

    #[error("model has no initial state")]
    NoInitialState,

    #[error("model has more than one initial state: {first} and {second}")]
    MultipleInitialStates { first: String, second: String },

    #[error("duplicate state name: {0}")]
    DuplicateState(String),

    #[error("unknown state: {0}")]
    UnknownState(String),

    #[error("state index {index} out of range (model has {len} states)")]
    StateOutOfRange { index: usize, len: usize },

    #[error("transition index {index} out of range (model has {len} transitions)")]
    TransitionOutOfRange { index: usize, len: usize },

    #[error("state {state} has more than one outgoing arc for event {event}")]
    DuplicateEvent { state: String, event: String },

    #[error("unknown arc: no event {event} leaves state {state}")]
    UnknownArc { state: String, event: String },

    #[error("state {state} declares more than one prior for action {action}")]
    DuplicatePrior { state: String, action: String },

    #[error("invalid concentration {alpha} in prior of {state}/{action} (must be finite and > 0)")]
    InvalidAlpha {
        state: String,
        action: String,
        alpha: f64,
    },

    #[error("transition {0} is mapped to more than one observable action")]
    DuplicateObservable(TransitionIndex),
}

/// A concentration parameter of a Dirichlet prior, attached to one
/// destination state.
#[derive(Debug, Clone, PartialEq)]
pub struct ConcentrationParam {
    pub dst: StateIndex,
    pub alpha: f64,
}

/// Prior belief over the destination of `action` taken from a state.
///
/// Destinations not listed in `concentration` default to
/// [`PriorSpec::DEFAULT_ALPHA`].
#[derive(Debug, Clone, PartialEq)]
pub struct PriorSpec {
    pub action: String,
    pub concentration: Vec<ConcentrationParam>,
}

impl PriorSpec {
    /// Concentration assigned to destinations the prior does not mention.
    pub const DEFAULT_ALPHA: f64 = 1.0;

    /// Expand into a dense concentration vector of dimension `k`.
    pub fn dense_alpha(&self, k: usize) -> Vec<f64> {
        let mut alpha = vec![Self::DEFAULT_ALPHA; k];
        for c in &self.concentration {
            if c.dst < k {
                alpha[c.dst] = c.alpha;
            }
        }
        alpha
    }
}

/// A model state.
#[derive(Debug, Clone, PartialEq)]
pub struct State {
    pub name: String,
    pub initial: bool,
    pub priors: Vec<PriorSpec>,
}

impl State {
    /// Create a non-initial state without priors.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            initial: false,
            priors: Vec::new(),
        }
    }

    /// Whether the state declares uncertainty over any of its actions.
    pub fn is_uncertain(&self) -> bool {
        !self.priors.is_empty()
    }
}

/// Directed arc `src --event/action--> dst`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Transition {
    pub src: StateIndex,
    pub dst: StateIndex,
    /// Name of the observed event that fires this arc.
    pub event: String,
    /// Action the arc belongs to.
    pub action: String,
}

/// Maps an arc onto the observable action used by coverage accounting.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ObservableMap {
    pub transition: TransitionIndex,
    pub observable: String,
}

/// Validated, immutable MDP model.
#[derive(Debug, Clone)]
pub struct Model {
    states: Vec<State>,
    transitions: Vec<Transition>,
    outgoing: Vec<Vec<TransitionIndex>>,
    observable: Vec<Option<String>>,
    initial: StateIndex,
    reachable: Vec<bool>,
}

impl Model {
    /// Validate the raw parts and build the lookup tables.
    pub fn new(
        states: Vec<State>,
        transitions: Vec<Transition>,
        observables: Vec<ObservableMap>,
    ) -> Result<Self, ModelError> {
        if states.is_empty() {
            return Err(ModelError::Empty);
        }

        let mut names = HashSet::new();
        let mut initial: Option<StateIndex> = None;
        for (i, s) in states.iter().enumerate() {
            if !names.insert(s.name.as_str()) {
                return Err(ModelError::DuplicateState(s.name.clone()));
            }
            if s.initial {
                if let Some(first) = initial {
                    return Err(ModelError::MultipleInitialStates {
                        first: states[first].name.clone(),
                        second: s.name.clone(),
                    });
                }
                initial = Some(i);
            }
        }
        let initial = initial.ok_or(ModelError::NoInitialState)?;

        let len = states.len();
        for s in &states {
            let mut actions = HashSet::new();
            for prior in &s.priors {
                if !actions.insert(prior.action.as_str()) {
                    return Err(ModelError::DuplicatePrior {
                        state: s.name.clone(),
                        action: prior.action.clone(),
                    });
                }
                for c in &prior.concentration {
                    if c.dst >= len {
                        return Err(ModelError::StateOutOfRange { index: c.dst, len });
                    }
                    if !c.alpha.is_finite() || c.alpha <= 0.0 {
                        return Err(ModelError::InvalidAlpha {
                            state: s.name.clone(),
                            action: prior.action.clone(),
                            alpha: c.alpha,
                        });
                    }
                }
            }
        }

        let mut outgoing: Vec<Vec<TransitionIndex>> = vec![Vec::new(); len];
        for (i, t) in transitions.iter().enumerate() {
            for index in [t.src, t.dst] {
                if index >= len {
                    return Err(ModelError::StateOutOfRange { index, len });
                }
            }
            let duplicate = outgoing[t.src]
                .iter()
                .any(|&other| transitions[other].event == t.event);
            if duplicate {
                return Err(ModelError::DuplicateEvent {
                    state: states[t.src].name.clone(),
                    event: t.event.clone(),
                });
            }
            outgoing[t.src].push(i);
        }

        let mut observable: Vec<Option<String>> = vec![None; transitions.len()];
        for m in observables {
            let slot = observable
                .get_mut(m.transition)
                .ok_or(ModelError::TransitionOutOfRange {
                    index: m.transition,
                    len: transitions.len(),
                })?;
            if slot.is_some() {
                return Err(ModelError::DuplicateObservable(m.transition));
            }
            *slot = Some(m.observable);
        }

        let reachable = reachability(initial, &outgoing, &transitions);

        debug!(
            "Model built: {} states, {} transitions, initial state {}",
            len,
            transitions.len(),
            states[initial].name
        );

        Ok(Self {
            states,
            transitions,
            outgoing,
            observable,
            initial,
            reachable,
        })
    }

    /// All states, in index order.
    pub fn states(&self) -> &[State] {
        &self.states
    }

    /// State at `index`.
    ///
    /// # Panics
    ///
    /// Panics if `index` is out of range, like slice indexing.
    pub fn state(&self, index: StateIndex) -> &State {
        &self.states[index]
    }

    /// Number of states; also the dimension of every Dirichlet.
    pub fn num_states(&self) -> usize {
        self.states.len()
    }

    /// All arcs, in index order.
    pub fn transitions(&self) -> &[Transition] {
        &self.transitions
    }

    /// Arc at `index`.
    ///
    /// # Panics
    ///
    /// Panics if `index` is out of range.
    pub fn transition(&self, index: TransitionIndex) -> &Transition {
        &self.transitions[index]
    }

    /// The unique initial state.
    pub fn initial_state(&self) -> StateIndex {
        self.initial
    }

    /// Look a state up by name.
    pub fn index_of(&self, name: &str) -> Option<StateIndex> {
        self.states.iter().position(|s| s.name == name)
    }

    /// Indices of the arcs leaving `state`.
    pub fn outgoing(&self, state: StateIndex) -> &[TransitionIndex] {
        self.outgoing.get(state).map(Vec::as_slice).unwrap_or(&[])
    }

    /// The arc leaving `state` whose event name is `event`.
    pub fn find_transition(&self, state: StateIndex, event: &str) -> Option<TransitionIndex> {
        self.outgoing(state)
            .iter()
            .copied()
            .find(|&t| self.transitions[t].event == event)
    }

    /// Observable action mapped onto an arc, if any.
    pub fn observable(&self, transition: TransitionIndex) -> Option<&str> {
        self.observable.get(transition).and_then(|o| o.as_deref())
    }

    /// Label used by coverage accounting: the observable action when the arc
    /// is mapped, the raw action otherwise.
    pub fn coverage_label(&self, transition: TransitionIndex) -> &str {
        self.observable(transition)
            .unwrap_or(&self.transitions[transition].action)
    }

    /// Whether `state` can be reached from the initial state.
    pub fn is_reachable(&self, state: StateIndex) -> bool {
        self.reachable.get(state).copied().unwrap_or(false)
    }

    /// Distinct `(state, coverage label)` pairs over arcs leaving reachable
    /// states.
    pub fn coverage_pairs(&self) -> BTreeSet<(StateIndex, String)> {
        self.transitions
            .iter()
            .enumerate()
            .filter(|(_, t)| self.is_reachable(t.src))
            .map(|(i, t)| (t.src, self.coverage_label(i).to_string()))
            .collect()
    }

    /// Destinations of the arcs leaving `state` under `action`.
    pub fn successors(&self, state: StateIndex, action: &str) -> Vec<StateIndex> {
        let mut dsts: Vec<StateIndex> = self
            .outgoing(state)
            .iter()
            .map(|&t| &self.transitions[t])
            .filter(|t| t.action == action)
            .map(|t| t.dst)
            .collect();
        dsts.sort_unstable();
        dsts.dedup();
        dsts
    }

    /// Distinct actions available at `state`, in arc order.
    pub fn actions(&self, state: StateIndex) -> Vec<&str> {
        let mut actions: Vec<&str> = Vec::new();
        for &t in self.outgoing(state) {
            let action = self.transitions[t].action.as_str();
            if !actions.contains(&action) {
                actions.push(action);
            }
        }
        actions
    }

    /// Every `(state, prior)` declaring uncertainty, in state order.
    pub fn priors(&self) -> impl Iterator<Item = (StateIndex, &PriorSpec)> {
        self.states
            .iter()
            .enumerate()
            .flat_map(|(i, s)| s.priors.iter().map(move |p| (i, p)))
    }
}

/// Breadth-first reachability from the initial state.
fn reachability(
    initial: StateIndex,
    outgoing: &[Vec<TransitionIndex>],
    transitions: &[Transition],
) -> Vec<bool> {
    let mut seen = vec![false; outgoing.len()];
    let mut queue = VecDeque::new();
    seen[initial] = true;
    queue.push_back(initial);

    while let Some(state) = queue.pop_front() {
        for &t in &outgoing[state] {
            let dst = transitions[t].dst;
            if !seen[dst] {
                seen[dst] = true;
                queue.push_back(dst);
            }
        }
    }

    seen
}
