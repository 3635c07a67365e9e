//! Online Bayesian runtime verification of MDP-modeled systems.
//!
//! A [`Monitor`] consumes a live stream of events observed on a system
//! under test and checks each against the model: every event must match an
//! arc leaving the current state. Along the way it learns the transition
//! probabilities the model leaves uncertain, tracks how much of the model
//! has been exercised, and decides when the session has seen enough.
//!
//! # Components
//!
//! | Module         | Role                                                       |
//! |----------------|------------------------------------------------------------|
//! | [`dirichlet`]  | Dirichlet belief: conjugate update, mean, mode, HPD region |
//! | [`estimator`]  | Prior/posterior per uncertain `(state, action)`            |
//! | [`coverage`]   | Exercised reachable `(state, action)` pairs                |
//! | [`checkpoint`] | Rendezvous handing the current state to a reader           |
//! | [`monitor`]    | Event loop, conformance checks, termination                |
//! | [`report`]     | Final report and violation diagnostics                     |
//!
//! # Termination
//!
//! | Mode          | Stops when                                                   |
//! |---------------|--------------------------------------------------------------|
//! | `coverage`    | coverage reaches the target (checked every `sample_size` samples) |
//! | `convergence` | every posterior's HPD region size drops below the tolerance  |
//! | `limit`       | the total sample count reaches `limit`                       |
//!
//! # Example
//!
//! ```no_run
//! use mdpmon_decision::{build, DecisionStrategy};
//! use mdpmon_model::{MixedPolicy, ModelBuilder};
//! use mdpmon_monitor::{share, CheckPoint, Event, Monitor, MonitorConfig};
//! use std::sync::Arc;
//!
//! let model = Arc::new(
//!     ModelBuilder::new()
//!         .initial_state("A")
//!         .state("B")
//!         .arc("A", "B", "go", "go")
//!         .arc("B", "A", "back", "back")
//!         .prior("A", "go", &[])
//!         .build()
//!         .unwrap(),
//! );
//! let policy = MixedPolicy::uniform(&model);
//! let decision = share(build(DecisionStrategy::Flat, policy, &model, 42));
//!
//! let (monitor, sender) = Monitor::new(
//!     model,
//!     decision,
//!     Arc::new(CheckPoint::new()),
//!     MonitorConfig::default(),
//! )
//! .unwrap();
//! let handle = monitor.launch(sender).unwrap();
//! handle.add_event(Event::now("go")).unwrap();
//! handle.stop().unwrap();
//! let report = handle.join().unwrap();
//! assert_eq!(report.final_state, "B");
//! ```

pub mod checkpoint;
pub mod config;
pub mod coverage;
pub mod dirichlet;
pub mod estimator;
pub mod event;
pub mod monitor;
pub mod report;

pub use checkpoint::CheckPoint;
pub use config::{FileError, MonitorConfig, Termination};
pub use coverage::{CoverageStats, CoverageTracker};
pub use dirichlet::Dirichlet;
pub use estimator::{BayesianEstimator, UncertainParameter};
pub use event::{now_millis, Event, EventKind};
pub use monitor::{
    share, Control, EventSender, Monitor, MonitorError, MonitorHandle, MonitorPhase,
    SharedDecisionMaker, TraceEntry,
};
pub use report::{
    format_report, format_violation, save_report, MonitorReport, ParameterReport,
    SelectionReport,
};
