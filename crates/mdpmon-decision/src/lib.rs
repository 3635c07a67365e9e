//! Action selection for the system under test.
//!
//! While the monitor learns the uncertain transition probabilities, a
//! driver keeps asking "which action should the system exercise next?".
//! The answer comes from a [`DecisionMaker`], drawing from the mixed policy
//! computed by an external MDP solver and optionally reweighted by feedback
//! from the monitor:
//!
//! ```text
//! driver ──next_action(s)──→ DecisionMaker ←──update_count(s)──── Monitor
//!                                          ←──update_distance(s)─ Monitor
//! ```
//!
//! # Variants
//!
//! | Strategy   | Type                      | Uses feedback              |
//! |------------|---------------------------|----------------------------|
//! | `flat`     | [`FlatDecisionMaker`]     | none (uniform baseline)    |
//! | `count`    | [`CountDecisionMaker`]    | state visit counts         |
//! | `distance` | [`DistanceDecisionMaker`] | posterior HPD region sizes |
//!
//! All variants are seeded and deterministic for a given seed.

pub mod adaptive;
pub mod flat;
pub mod maker;

pub use adaptive::{CountDecisionMaker, DistanceDecisionMaker};
pub use flat::FlatDecisionMaker;
pub use maker::{build, DecisionMaker, DecisionStrategy, SelectionCounts, UnknownStrategy};
