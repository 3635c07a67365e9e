//! MDP model inputs for the mdpmon runtime monitor.
//!
//! The monitor never parses the textual MDP description language. It works
//! on an already structured model: states, labelled arcs between them,
//! optional Dirichlet priors over the outcome of an action, and an optional
//! mapping from arcs to observable action labels. This crate owns that
//! structure and the mixed policy produced by the external MDP solver.
//!
//! # Arena layout
//!
//! Everything is addressed by integer index, assigned once when the model is
//! built:
//!
//! ```text
//! states:      [A, B, C]                    StateIndex = position
//! transitions: [A -go-> B, B -go-> C]       TransitionIndex = position
//! outgoing:    A -> [0], B -> [1], C -> []
//! observable:  0 -> Some("g"), 1 -> None
//! ```
//!
//! Per-state and per-arc associations are plain vector lookups, so the
//! monitor's hot path (find the arc whose event matches) is a scan over a
//! handful of indices.
//!
//! # Example
//!
//! ```
//! use mdpmon_model::ModelBuilder;
//!
//! let model = ModelBuilder::new()
//!     .initial_state("A")
//!     .state("B")
//!     .arc("A", "B", "go", "go")
//!     .prior("A", "go", &[("A", 1.0), ("B", 1.0)])
//!     .build()
//!     .unwrap();
//!
//! assert_eq!(model.num_states(), 2);
//! assert_eq!(model.find_transition(model.initial_state(), "go"), Some(0));
//! ```
//!
//! # Module Structure
//!
//! - [`model`]: arena-indexed model and its validation
//! - [`spec`]: serde interchange form, builder and file loading
//! - [`policy`]: mixed policy (per-state action distribution)

pub mod model;
pub mod policy;
pub mod spec;

pub use model::{
    ConcentrationParam, Model, ModelError, ObservableMap, PriorSpec, State, StateIndex,
    Transition, TransitionIndex,
};
pub use policy::{MixedPolicy, PolicyEntry, PolicyError};
pub use spec::{ArcSpec, LoadError, ModelBuilder, ModelSpec, ObservableSpec, PriorEntry, StateSpec};
