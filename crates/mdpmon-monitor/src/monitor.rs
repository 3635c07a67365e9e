//! The monitor: event loop, model conformance and termination.
//!
//! ```text
//!  producers ──add_event──→ [ mpsc queue ] ──recv──→ Monitor thread
//!                                                     │
//!        ┌──────────────────────┬─────────────────────┼──────────────────┐
//!        ▼                      ▼                     ▼                  ▼
//!   arc lookup           BayesianEstimator     CoverageTracker     DecisionMaker
//!   (violation → Err)    (posterior update,    (state, label)      (update_count,
//!                         convergence check)                        update_distance)
//! ```
//!
//! Events are handled strictly in arrival order. A transition event whose
//! name matches no arc leaving the current state is a protocol violation:
//! the loop returns [`MonitorError::ProtocolViolation`] and the state is
//! left untouched. Termination (coverage, convergence or sample limit) is
//! requested from inside the loop; events already queued at that point are
//! still handled before the session ends. The queue and the
//! [`CheckPoint`] are closed as soon as the loop ends, so later
//! `add_event` and `read_state` calls fail with
//! [`MonitorError::QueueClosed`] instead of waiting on a stopped monitor.

use crate::checkpoint::CheckPoint;
use crate::config::{MonitorConfig, Termination};
use crate::coverage::CoverageTracker;
use crate::estimator::BayesianEstimator;
use crate::event::{now_millis, Event, EventKind};
use crate::report::{format_report, MonitorReport, ParameterReport, SelectionReport};
use log::{debug, error, info, warn};
use mdpmon_decision::DecisionMaker;
use mdpmon_model::{Model, StateIndex};
use serde::Serialize;
use std::collections::VecDeque;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread::{self, JoinHandle};
use thiserror::Error;

/// Decision maker shared between the monitor (feedback) and drivers
/// (action queries).
pub type SharedDecisionMaker = Arc<Mutex<Box<dyn DecisionMaker>>>;

/// Wrap a decision maker for sharing.
pub fn share(decision: Box<dyn DecisionMaker>) -> SharedDecisionMaker {
    Arc::new(Mutex::new(decision))
}

/// Errors that end a monitoring session.
#[derive(Error, Debug)]
pub enum MonitorError {
    #[error("protocol violation: event {event} does not match any arc leaving state {state}")]
    ProtocolViolation {
        state: String,
        event: String,
        /// Most recent transitions before the violation, oldest first.
        trace: Vec<TraceEntry>,
    },

    /// The monitor is no longer consuming events.
    #[error("event queue closed")]
    QueueClosed,

    #[error("monitor thread panicked")]
    Panicked,

    #[error("failed to spawn monitor thread: {0}")]
    Spawn(#[from] std::io::Error),

    #[error("invalid configuration: {0}")]
    Config(String),
}

impl MonitorError {
    /// Process exit code for this error.
    pub fn exit_code(&self) -> i32 {
        match self {
            MonitorError::ProtocolViolation { .. } => 1,
            MonitorError::QueueClosed | MonitorError::Panicked => 1,
            MonitorError::Spawn(_) | MonitorError::Config(_) => 2,
        }
    }
}

/// One matched transition, kept for violation diagnostics.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TraceEntry {
    pub from: String,
    pub event: String,
    pub to: String,
    pub timestamp: u64,
}

impl fmt::Display for TraceEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} --{}--> {} @ {}",
            self.from, self.event, self.to, self.timestamp
        )
    }
}

/// What the loop does after an event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Control {
    Continue,
    Stop,
}

/// Lifecycle of a monitor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MonitorPhase {
    Uninitialized,
    Running,
    Terminated,
}

/// Producer side of the event queue. Cheap to clone.
#[derive(Debug, Clone)]
pub struct EventSender {
    tx: Sender<Event>,
}

impl EventSender {
    /// Enqueue an event. Fails only once the monitor is gone.
    pub fn add_event(&self, event: Event) -> Result<(), MonitorError> {
        self.tx.send(event).map_err(|_| MonitorError::QueueClosed)
    }

    pub fn stop(&self) -> Result<(), MonitorError> {
        self.add_event(Event::stop())
    }

    pub fn reset(&self) -> Result<(), MonitorError> {
        self.add_event(Event::reset())
    }
}

/// Online verifier of an event stream against a model.
pub struct Monitor {
    model: Arc<Model>,
    config: MonitorConfig,
    /// `None` once the session has ended.
    queue: Option<Receiver<Event>>,
    checkpoint: Arc<CheckPoint>,
    decision: SharedDecisionMaker,
    estimator: BayesianEstimator,
    coverage: CoverageTracker,
    phase: MonitorPhase,
    current_state: StateIndex,
    /// Milliseconds since the UNIX epoch of the latest transition or reset.
    current_time: u64,
    /// Transition events handled, including a rejected one.
    event_count: u64,
    /// Transitions matched against the model.
    transitions: u64,
    /// Transitions taken from uncertain states.
    uncertain_transitions: u64,
    /// Progress value at which coverage was last checked.
    last_coverage_check: u64,
    stop_requested: bool,
    trace: VecDeque<TraceEntry>,
    running: Arc<AtomicBool>,
}

impl Monitor {
    /// Build a monitor and the sender feeding its queue.
    pub fn new(
        model: Arc<Model>,
        decision: SharedDecisionMaker,
        checkpoint: Arc<CheckPoint>,
        config: MonitorConfig,
    ) -> Result<(Self, EventSender), MonitorError> {
        config.validate()?;
        let (tx, queue) = mpsc::channel();
        let estimator = BayesianEstimator::new(
            &model,
            config.hpd_level,
            config.sample_size,
            config.tolerance,
        );
        let coverage = CoverageTracker::new(&model);

        {
            let mut dm = lock_decision(&decision);
            for (state, distance) in estimator.state_distances() {
                dm.update_distance(state, distance);
            }
        }

        let monitor = Self {
            current_state: model.initial_state(),
            trace: VecDeque::with_capacity(config.trace_len),
            model,
            config,
            queue: Some(queue),
            checkpoint,
            decision,
            estimator,
            coverage,
            phase: MonitorPhase::Uninitialized,
            current_time: 0,
            event_count: 0,
            transitions: 0,
            uncertain_transitions: 0,
            last_coverage_check: 0,
            stop_requested: false,
            running: Arc::new(AtomicBool::new(true)),
        };
        Ok((monitor, EventSender { tx }))
    }

    /// Move to the initial state and stamp the current time.
    pub fn set_initial_state(&mut self) {
        self.current_state = self.model.initial_state();
        self.current_time = now_millis();
        self.phase = MonitorPhase::Running;
        debug!("Set current state: {}", self.current_state_name());
    }

    /// The model events are checked against.
    pub fn model(&self) -> &Model {
        &self.model
    }

    /// Validated configuration of this session.
    pub fn config(&self) -> &MonitorConfig {
        &self.config
    }

    /// Where the monitor is in its lifecycle.
    pub fn phase(&self) -> MonitorPhase {
        self.phase
    }

    /// Index of the current model state.
    pub fn current_state(&self) -> StateIndex {
        self.current_state
    }

    /// Name of the current model state.
    pub fn current_state_name(&self) -> &str {
        &self.model.state(self.current_state).name
    }

    /// Timestamp of the latest transition or reset, in milliseconds.
    pub fn current_time(&self) -> u64 {
        self.current_time
    }

    /// Transition events handled so far, including a rejected one.
    pub fn event_count(&self) -> u64 {
        self.event_count
    }

    /// Priors and posteriors of the uncertain parameters.
    pub fn estimator(&self) -> &BayesianEstimator {
        &self.estimator
    }

    /// Exercised `(state, label)` pairs.
    pub fn coverage(&self) -> &CoverageTracker {
        &self.coverage
    }

    /// Recent transitions, oldest first.
    pub fn trace(&self) -> impl Iterator<Item = &TraceEntry> {
        self.trace.iter()
    }

    /// Whether a termination condition has fired.
    pub fn stop_requested(&self) -> bool {
        self.stop_requested
    }

    /// Handle one event.
    pub fn handle_event(&mut self, event: Event) -> Result<Control, MonitorError> {
        if self.phase == MonitorPhase::Uninitialized {
            self.set_initial_state();
        }
        match event.kind() {
            EventKind::Stop => Ok(Control::Stop),
            EventKind::Reset => {
                self.set_initial_state();
                Ok(Control::Continue)
            }
            EventKind::ReadState => {
                let checkpoint = Arc::clone(&self.checkpoint);
                checkpoint.join_with_state(self.current_state_name());
                Ok(Control::Continue)
            }
            EventKind::Transition => {
                self.check_event(&event)?;
                Ok(Control::Continue)
            }
        }
    }

    fn check_event(&mut self, event: &Event) -> Result<(), MonitorError> {
        self.event_count += 1;
        let src = self.current_state;
        let model = Arc::clone(&self.model);

        let Some(t) = model.find_transition(src, event.name()) else {
            let state = self.current_state_name().to_string();
            error!("Unexpected event {} in state {}", event.name(), state);
            for entry in &self.trace {
                error!("  {}", entry);
            }
            error!("**** TEST FAILED ****");
            return Err(MonitorError::ProtocolViolation {
                state,
                event: event.name().to_string(),
                trace: self.trace.iter().cloned().collect(),
            });
        };
        let arc = model.transition(t);
        self.transitions += 1;

        if self.estimator.is_uncertain(src) {
            self.observe_uncertain(src, &arc.action, arc.dst);
        }

        self.coverage.add_execution(src, model.coverage_label(t));
        self.check_progress();

        self.current_state = arc.dst;
        self.current_time = event.timestamp();
        if self.config.trace_len > 0 {
            if self.trace.len() == self.config.trace_len {
                self.trace.pop_front();
            }
            self.trace.push_back(TraceEntry {
                from: model.state(src).name.clone(),
                event: event.name().to_string(),
                to: model.state(arc.dst).name.clone(),
                timestamp: event.timestamp(),
            });
        }
        debug!(
            "{} --{}--> {}",
            model.state(src).name,
            event.name(),
            self.current_state_name()
        );
        Ok(())
    }

    /// Posterior update, convergence check and decision feedback for a
    /// transition leaving an uncertain state.
    fn observe_uncertain(&mut self, src: StateIndex, action: &str, dst: StateIndex) {
        self.uncertain_transitions += 1;
        self.estimator.observe(src, action, dst);

        let interval = self.config.report_interval;
        if interval > 0 && self.uncertain_transitions % interval == 0 {
            for p in self.estimator.parameters() {
                info!(
                    "{}/{} after {} samples: distance {:.4}",
                    self.model.state(p.state).name,
                    p.action(),
                    p.posterior.sample_size(),
                    p.posterior.distance()
                );
            }
        }

        if let Some(converged) = self.estimator.check_convergence() {
            debug!(
                "Convergence check at {} samples: {}",
                self.estimator.total_samples(),
                if converged { "converged" } else { "not converged" }
            );
            if converged && self.config.termination == Termination::Convergence {
                info!("All posteriors converged below {}", self.config.tolerance);
                self.request_stop();
            }
        }

        let mut dm = lock_decision(&self.decision);
        dm.update_count(src);
        for (state, distance) in self.estimator.state_distances() {
            dm.update_distance(state, distance);
        }
    }

    /// Coverage logging and the sample-driven termination modes.
    fn check_progress(&mut self) {
        let progress = if self.estimator.is_empty() {
            self.transitions
        } else {
            self.estimator.total_samples()
        };

        if progress != self.last_coverage_check && progress % self.config.sample_size == 0 {
            self.last_coverage_check = progress;
            info!("{} samples, {}", progress, self.coverage);
            if self.config.termination == Termination::Coverage
                && self.coverage.coverage() >= self.config.coverage
            {
                info!("Coverage target {} reached", self.config.coverage);
                self.request_stop();
            }
        }

        if self.config.termination == Termination::Limit && progress >= self.config.limit {
            info!("Test limit {} reached", self.config.limit);
            self.request_stop();
        }
    }

    fn request_stop(&mut self) {
        if !self.stop_requested {
            debug!("Stop requested after {} events", self.event_count);
            self.stop_requested = true;
        }
    }

    /// Snapshot of everything learned so far.
    pub fn report(&self) -> MonitorReport {
        let model = &self.model;
        let parameters = self
            .estimator
            .parameters()
            .iter()
            .map(|p| {
                let level = p.posterior.hpd_level();
                ParameterReport {
                    state: model.state(p.state).name.clone(),
                    action: p.action().to_string(),
                    prior: p.prior.alpha().to_vec(),
                    posterior: p.posterior.alpha().to_vec(),
                    sample_size: p.posterior.sample_size(),
                    mode: p.posterior.mode(),
                    mean: p.posterior.mean(),
                    hpd_level: level,
                    hpd_region: p.posterior.hpd_region(level),
                    distance: p.posterior.distance(),
                    converged: p.converged,
                }
            })
            .collect();

        let dm = lock_decision(&self.decision);
        let selections = dm
            .selections()
            .iter()
            .map(|(state, action, count)| SelectionReport {
                state: model
                    .states()
                    .get(state)
                    .map(|s| s.name.clone())
                    .unwrap_or_else(|| state.to_string()),
                action: action.to_string(),
                count,
            })
            .collect();

        MonitorReport {
            termination: self.config.termination,
            final_state: self.current_state_name().to_string(),
            events_processed: self.event_count,
            transitions: self.transitions,
            total_samples: self.estimator.total_samples(),
            coverage: self.coverage.stats(),
            decision_maker: dm.name().to_string(),
            selections,
            parameters,
        }
    }

    /// Run the event loop on the current thread until a stop event, a
    /// protocol violation or the queue closing.
    pub fn run(mut self) -> Result<MonitorReport, MonitorError> {
        let result = self.event_loop();
        self.close_queue();
        self.phase = MonitorPhase::Terminated;
        result
    }

    /// Stop accepting events and release parked readers. Events still
    /// queued are discarded.
    fn close_queue(&mut self) {
        let Some(queue) = self.queue.take() else {
            return;
        };
        self.running.store(false, Ordering::SeqCst);
        let discarded = queue.try_iter().count();
        drop(queue);
        self.checkpoint.close();
        if discarded > 0 {
            warn!("Discarded {} events queued after the monitor stopped", discarded);
        }
    }

    fn next_event(&self) -> Result<Event, MonitorError> {
        let queue = self.queue.as_ref().ok_or(MonitorError::QueueClosed)?;
        queue.recv().map_err(|_| {
            warn!("Event queue closed without a stop event");
            MonitorError::QueueClosed
        })
    }

    fn event_loop(&mut self) -> Result<MonitorReport, MonitorError> {
        self.set_initial_state();
        info!(
            "Monitor started in state {} ({} uncertain parameters, termination {})",
            self.current_state_name(),
            self.estimator.parameters().len(),
            self.config.termination
        );

        loop {
            let event = self.next_event()?;
            if self.handle_event(event)? == Control::Stop {
                break;
            }
            if self.stop_requested {
                let backlog: Vec<Event> = self
                    .queue
                    .as_ref()
                    .map(|queue| queue.try_iter().collect())
                    .unwrap_or_default();
                debug!("Handling {} queued events before stopping", backlog.len());
                for event in backlog {
                    if self.handle_event(event)? == Control::Stop {
                        break;
                    }
                }
                break;
            }
        }
        self.close_queue();

        info!(
            "Monitor stopped after {} events in state {}",
            self.event_count,
            self.current_state_name()
        );
        let report = self.report();
        info!("\n{}", format_report(&report));
        let delay = self.config.drain_delay();
        if !delay.is_zero() {
            thread::sleep(delay);
        }
        Ok(report)
    }

    /// Run the event loop on a dedicated thread.
    pub fn launch(self, sender: EventSender) -> Result<MonitorHandle, MonitorError> {
        let model = Arc::clone(&self.model);
        let checkpoint = Arc::clone(&self.checkpoint);
        let decision = Arc::clone(&self.decision);
        let running = Arc::clone(&self.running);
        let thread = thread::Builder::new()
            .name("mdpmon-monitor".to_string())
            .spawn(move || self.run())?;
        Ok(MonitorHandle {
            sender,
            model,
            checkpoint,
            decision,
            running,
            thread,
        })
    }
}

/// Control surface of a monitor running on its own thread.
pub struct MonitorHandle {
    sender: EventSender,
    model: Arc<Model>,
    checkpoint: Arc<CheckPoint>,
    decision: SharedDecisionMaker,
    running: Arc<AtomicBool>,
    thread: JoinHandle<Result<MonitorReport, MonitorError>>,
}

impl MonitorHandle {
    /// Another producer for the same queue.
    pub fn sender(&self) -> EventSender {
        self.sender.clone()
    }

    /// Enqueue an event. Fails once the loop has ended.
    pub fn add_event(&self, event: Event) -> Result<(), MonitorError> {
        self.sender.add_event(event)
    }

    /// Enqueue a stop event.
    pub fn stop(&self) -> Result<(), MonitorError> {
        self.sender.stop()
    }

    /// Whether the event loop is still running.
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Ask the monitor for its current state. Blocks until the monitor
    /// reaches the request in its queue; fails with
    /// [`MonitorError::QueueClosed`] if the loop ends first.
    pub fn read_state(&self) -> Result<String, MonitorError> {
        if !self.is_running() {
            return Err(MonitorError::QueueClosed);
        }
        self.add_event(Event::read_state())?;
        self.checkpoint.join().ok_or(MonitorError::QueueClosed)
    }

    /// Ask the decision maker what to exercise from the monitor's current
    /// state.
    pub fn next_action(&self) -> Result<Option<String>, MonitorError> {
        let state = self.read_state()?;
        let Some(index) = self.model.index_of(&state) else {
            return Ok(None);
        };
        Ok(lock_decision(&self.decision).next_action(index))
    }

    /// Wait for the event loop to finish.
    pub fn join(self) -> Result<MonitorReport, MonitorError> {
        self.thread.join().unwrap_or(Err(MonitorError::Panicked))
    }
}

fn lock_decision(decision: &SharedDecisionMaker) -> MutexGuard<'_, Box<dyn DecisionMaker>> {
    decision.lock().unwrap_or_else(|e| {
        warn!("Decision maker lock poisoned; recovering");
        PoisonError::into_inner(e)
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use mdpmon_decision::{FlatDecisionMaker, SelectionCounts};
    use mdpmon_model::{MixedPolicy, ModelBuilder};

    /// A(initial) -go-> B -go-> C, uncertain prior at A over `go`.
    fn abc() -> Arc<Model> {
        Arc::new(
            ModelBuilder::new()
                .initial_state("A")
                .state("B")
                .state("C")
                .arc("A", "B", "go", "go")
                .arc("B", "C", "go", "go")
                .prior("A", "go", &[("A", 1.0), ("B", 1.0), ("C", 1.0)])
                .build()
                .unwrap(),
        )
    }

    /// A -go-> B -back-> A, uncertain prior at A over `go`.
    fn ping_pong() -> Arc<Model> {
        Arc::new(
            ModelBuilder::new()
                .initial_state("A")
                .state("B")
                .arc("A", "B", "go", "go")
                .arc("B", "A", "back", "back")
                .prior("A", "go", &[])
                .build()
                .unwrap(),
        )
    }

    fn config() -> MonitorConfig {
        MonitorConfig {
            drain_delay_ms: 0,
            ..Default::default()
        }
    }

    fn flat(model: &Model) -> SharedDecisionMaker {
        share(Box::new(FlatDecisionMaker::new(MixedPolicy::uniform(model), 1)))
    }

    fn monitor(model: Arc<Model>, config: MonitorConfig) -> Monitor {
        let decision = flat(&model);
        let (monitor, _tx) =
            Monitor::new(model, decision, Arc::new(CheckPoint::new()), config).unwrap();
        monitor
    }

    #[derive(Default)]
    struct Feedback {
        counts: Vec<StateIndex>,
        distances: Vec<(StateIndex, f64)>,
    }

    /// Records monitor feedback into a shared log.
    struct Recorder {
        log: Arc<Mutex<Feedback>>,
        selections: SelectionCounts,
    }

    impl DecisionMaker for Recorder {
        fn next_action(&mut self, _state: StateIndex) -> Option<String> {
            None
        }
        fn update_count(&mut self, state: StateIndex) {
            self.log.lock().unwrap().counts.push(state);
        }
        fn update_distance(&mut self, state: StateIndex, distance: f64) {
            self.log.lock().unwrap().distances.push((state, distance));
        }
        fn selections(&self) -> &SelectionCounts {
            &self.selections
        }
        fn name(&self) -> &'static str {
            "recorder"
        }
    }

    #[test]
    fn test_valid_events_follow_arcs() {
        let mut m = monitor(abc(), config());
        assert_eq!(m.phase(), MonitorPhase::Uninitialized);

        m.handle_event(Event::new("go", 10)).unwrap();
        m.handle_event(Event::new("go", 20)).unwrap();

        assert_eq!(m.phase(), MonitorPhase::Running);
        assert_eq!(m.current_state_name(), "C");
        assert_eq!(m.current_time(), 20);
        let p = &m.estimator().parameters()[0];
        assert_eq!(p.posterior.alpha(), &[1.0, 2.0, 1.0]);
        assert_eq!(p.posterior.sample_size(), 1);
        assert_eq!(m.event_count(), 2);
    }

    #[test]
    fn test_protocol_violation_keeps_state() {
        let mut m = monitor(abc(), config());
        m.set_initial_state();
        let err = m.handle_event(Event::new("bad", 1)).unwrap_err();

        match &err {
            MonitorError::ProtocolViolation { state, event, trace } => {
                assert_eq!(state, "A");
                assert_eq!(event, "bad");
                assert!(trace.is_empty());
            }
            other => panic!("unexpected error: {other}"),
        }
        assert_eq!(err.exit_code(), 1);
        assert_eq!(m.current_state(), 0);
        assert_eq!(m.estimator().total_samples(), 0);
    }

    #[test]
    fn test_violation_carries_trace() {
        let mut m = monitor(abc(), config());
        m.handle_event(Event::new("go", 1)).unwrap();
        let err = m.handle_event(Event::new("stop-now", 2)).unwrap_err();
        let MonitorError::ProtocolViolation { state, trace, .. } = err else {
            panic!("expected a protocol violation");
        };
        assert_eq!(state, "B");
        assert_eq!(trace.len(), 1);
        assert_eq!(trace[0].to_string(), "A --go--> B @ 1");
    }

    #[test]
    fn test_reset_returns_to_initial_state() {
        let mut m = monitor(abc(), config());
        m.handle_event(Event::new("go", 1)).unwrap();
        assert_eq!(m.current_state_name(), "B");
        assert_eq!(m.handle_event(Event::reset()).unwrap(), Control::Continue);
        assert_eq!(m.current_state_name(), "A");
        assert_eq!(m.handle_event(Event::stop()).unwrap(), Control::Stop);
    }

    #[test]
    fn test_trace_is_bounded() {
        let cfg = MonitorConfig {
            trace_len: 2,
            ..config()
        };
        let mut m = monitor(ping_pong(), cfg);
        for (i, name) in ["go", "back", "go", "back", "go"].iter().enumerate() {
            m.handle_event(Event::new(*name, i as u64)).unwrap();
        }
        let trace: Vec<String> = m.trace().map(|e| e.to_string()).collect();
        assert_eq!(trace, vec!["B --back--> A @ 3", "A --go--> B @ 4"]);
    }

    #[test]
    fn test_limit_requests_stop_once_reached() {
        let cfg = MonitorConfig {
            termination: Termination::Limit,
            limit: 2,
            ..config()
        };
        let mut m = monitor(ping_pong(), cfg);
        for name in ["go", "back", "go"] {
            assert!(!m.stop_requested());
            m.handle_event(Event::new(name, 0)).unwrap();
        }
        // Only transitions from A count as samples.
        assert_eq!(m.estimator().total_samples(), 2);
        assert!(m.stop_requested());
    }

    #[test]
    fn test_coverage_requests_stop_when_target_met() {
        let model = Arc::new(
            ModelBuilder::new()
                .initial_state("A")
                .state("B")
                .arc("A", "B", "go", "go")
                .arc("B", "A", "back", "back")
                .build()
                .unwrap(),
        );
        let cfg = MonitorConfig {
            sample_size: 1,
            ..config()
        };
        let mut m = monitor(model, cfg);
        m.handle_event(Event::new("go", 0)).unwrap();
        assert!(!m.stop_requested());
        m.handle_event(Event::new("back", 0)).unwrap();
        assert_eq!(m.coverage().coverage(), 1.0);
        assert!(m.stop_requested());
    }

    #[test]
    fn test_convergence_requests_stop() {
        let cfg = MonitorConfig {
            termination: Termination::Convergence,
            sample_size: 5,
            tolerance: 0.5,
            ..config()
        };
        let mut m = monitor(ping_pong(), cfg);
        for _ in 0..5 {
            m.handle_event(Event::new("go", 0)).unwrap();
            m.handle_event(Event::new("back", 0)).unwrap();
        }
        assert!(!m.stop_requested());
        m.handle_event(Event::new("go", 0)).unwrap();
        assert!(m.stop_requested());
        assert!(m.estimator().parameters()[0].converged);
    }

    #[test]
    fn test_decision_feedback() {
        let log = Arc::new(Mutex::new(Feedback::default()));
        let decision = share(Box::new(Recorder {
            log: Arc::clone(&log),
            selections: SelectionCounts::default(),
        }));
        let (mut m, _tx) =
            Monitor::new(ping_pong(), decision, Arc::new(CheckPoint::new()), config()).unwrap();
        // One distance per uncertain state at construction.
        assert_eq!(log.lock().unwrap().distances.len(), 1);

        m.handle_event(Event::new("go", 0)).unwrap();
        m.handle_event(Event::new("back", 0)).unwrap();

        let log = log.lock().unwrap();
        // Only the transition from the uncertain state A counts.
        assert_eq!(log.counts, vec![0]);
        assert_eq!(log.distances.len(), 2);
        assert!(log.distances[1].1 < log.distances[0].1);
    }

    #[test]
    fn test_invalid_config_rejected() {
        let model = abc();
        let decision = flat(&model);
        let cfg = MonitorConfig {
            sample_size: 0,
            ..config()
        };
        let err = Monitor::new(model, decision, Arc::new(CheckPoint::new()), cfg)
            .err()
            .unwrap();
        assert_eq!(err.exit_code(), 2);
    }

    #[test]
    fn test_report_contents() {
        let mut m = monitor(abc(), config());
        m.handle_event(Event::new("go", 0)).unwrap();
        let report = m.report();
        assert_eq!(report.final_state, "B");
        assert_eq!(report.total_samples, 1);
        assert_eq!(report.decision_maker, "flat");
        let p = &report.parameters[0];
        assert_eq!(p.state, "A");
        assert_eq!(p.posterior, vec![1.0, 2.0, 1.0]);
        assert_eq!(p.mode, None);
        assert!((p.mean.iter().sum::<f64>() - 1.0).abs() < 1e-12);
    }

    #[test]
    fn test_launched_monitor_stops_on_limit() {
        let cfg = MonitorConfig {
            termination: Termination::Limit,
            limit: 3,
            ..config()
        };
        let model = Arc::new(
            ModelBuilder::new()
                .initial_state("A")
                .state("B")
                .arc("A", "A", "loop", "loop")
                .arc("A", "B", "leave", "loop")
                .prior("A", "loop", &[])
                .build()
                .unwrap(),
        );
        let decision = flat(&model);
        let (m, tx) = Monitor::new(model, decision, Arc::new(CheckPoint::new()), cfg).unwrap();
        let handle = m.launch(tx).unwrap();
        for i in 0..3 {
            handle.add_event(Event::new("loop", i)).unwrap();
        }
        // No explicit stop: the limit ends the session.
        let report = handle.join().unwrap();
        assert_eq!(report.total_samples, 3);
        assert_eq!(report.final_state, "A");
    }

    #[test]
    fn test_read_state_after_limit_stop_fails() {
        let cfg = MonitorConfig {
            termination: Termination::Limit,
            limit: 1,
            drain_delay_ms: 2_000,
            ..config()
        };
        let model = Arc::new(
            ModelBuilder::new()
                .initial_state("A")
                .arc("A", "A", "loop", "loop")
                .prior("A", "loop", &[])
                .build()
                .unwrap(),
        );
        let decision = flat(&model);
        let checkpoint = Arc::new(CheckPoint::new());
        let (m, tx) = Monitor::new(model, decision, Arc::clone(&checkpoint), cfg).unwrap();
        let handle = m.launch(tx).unwrap();
        handle.add_event(Event::new("loop", 1)).unwrap();

        // The loop closes the queue before its drain delay.
        while !checkpoint.is_closed() {
            thread::sleep(std::time::Duration::from_millis(1));
        }
        assert!(!handle.is_running());
        assert!(matches!(handle.read_state(), Err(MonitorError::QueueClosed)));
        assert!(matches!(
            handle.add_event(Event::new("loop", 2)),
            Err(MonitorError::QueueClosed)
        ));

        let report = handle.join().unwrap();
        assert_eq!(report.total_samples, 1);
    }

    #[test]
    fn test_reader_parked_when_monitor_stops_is_released() {
        let model = abc();
        let decision = flat(&model);
        let checkpoint = Arc::new(CheckPoint::new());
        let (m, tx) = Monitor::new(model, decision, Arc::clone(&checkpoint), config()).unwrap();
        let reader = {
            let checkpoint = Arc::clone(&checkpoint);
            thread::spawn(move || checkpoint.join())
        };
        while !checkpoint.is_waiting() {
            thread::sleep(std::time::Duration::from_millis(1));
        }

        tx.stop().unwrap();
        let report = m.run().unwrap();
        assert_eq!(report.final_state, "A");
        assert_eq!(reader.join().unwrap(), None);
        assert!(matches!(tx.add_event(Event::new("go", 1)), Err(MonitorError::QueueClosed)));
    }

    /// Collects formatted log records for assertions.
    struct CaptureLog {
        lines: Mutex<Vec<String>>,
    }

    impl log::Log for CaptureLog {
        fn enabled(&self, metadata: &log::Metadata) -> bool {
            metadata.level() <= log::Level::Info
        }

        fn log(&self, record: &log::Record) {
            if self.enabled(record.metadata()) {
                self.lines.lock().unwrap().push(record.args().to_string());
            }
        }

        fn flush(&self) {}
    }

    static CAPTURE: CaptureLog = CaptureLog {
        lines: Mutex::new(Vec::new()),
    };

    #[test]
    fn test_final_report_is_logged() {
        log::set_logger(&CAPTURE).unwrap();
        log::set_max_level(log::LevelFilter::Info);

        let model = abc();
        let decision = flat(&model);
        let (m, tx) = Monitor::new(model, decision, Arc::new(CheckPoint::new()), config()).unwrap();
        tx.add_event(Event::new("go", 1)).unwrap();
        tx.stop().unwrap();
        m.run().unwrap();

        let lines = CAPTURE.lines.lock().unwrap();
        let logged = lines
            .iter()
            .find(|line| line.contains("mdpmon Monitoring Report"))
            .expect("report logged");
        assert!(logged.contains("Final state:            B"));
        assert!(logged.contains("State A / action go"));
    }

    #[test]
    fn test_launched_monitor_read_state_and_next_action() {
        let model = abc();
        let decision = flat(&model);
        let (m, tx) = Monitor::new(model, decision, Arc::new(CheckPoint::new()), config()).unwrap();
        let handle = m.launch(tx).unwrap();

        assert_eq!(handle.read_state().unwrap(), "A");
        handle.add_event(Event::new("go", 1)).unwrap();
        assert_eq!(handle.read_state().unwrap(), "B");
        assert_eq!(handle.next_action().unwrap().as_deref(), Some("go"));
        assert!(handle.is_running());

        handle.stop().unwrap();
        let report = handle.join().unwrap();
        assert_eq!(report.final_state, "B");
        assert_eq!(report.selections.len(), 1);
        assert_eq!(report.selections[0].state, "B");
    }

    #[test]
    fn test_launched_monitor_reports_violation() {
        let model = abc();
        let decision = flat(&model);
        let (m, tx) = Monitor::new(model, decision, Arc::new(CheckPoint::new()), config()).unwrap();
        let handle = m.launch(tx).unwrap();
        handle.add_event(Event::new("bad", 1)).unwrap();
        let err = handle.join().unwrap_err();
        assert_eq!(err.exit_code(), 1);
    }

    #[test]
    fn test_queue_closed_without_stop() {
        let model = abc();
        let decision = flat(&model);
        let (m, tx) = Monitor::new(model, decision, Arc::new(CheckPoint::new()), config()).unwrap();
        drop(tx);
        assert!(matches!(m.run(), Err(MonitorError::QueueClosed)));
    }
}
