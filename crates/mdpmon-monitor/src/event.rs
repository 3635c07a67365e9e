//! Runtime events fed to the monitor.

use std::fmt;
use std::time::{SystemTime, UNIX_EPOCH};

/// What an event asks the monitor to do.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventKind {
    /// An observed transition, matched by name against the current state's
    /// outgoing arcs.
    Transition,
    /// Finish the session and report.
    Stop,
    /// Return to the initial state.
    Reset,
    /// Publish the current state through the checkpoint.
    ReadState,
}

/// A named, timestamped event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Event {
    name: String,
    /// Milliseconds since the UNIX epoch.
    timestamp: u64,
    kind: EventKind,
}

impl Event {
    /// An observed transition event.
    pub fn new(name: impl Into<String>, timestamp: u64) -> Self {
        Self {
            name: name.into(),
            timestamp,
            kind: EventKind::Transition,
        }
    }

    /// An observed transition stamped with the current wall-clock time.
    pub fn now(name: impl Into<String>) -> Self {
        Self::new(name, now_millis())
    }

    pub fn stop() -> Self {
        Self::control("stop", EventKind::Stop)
    }

    pub fn reset() -> Self {
        Self::control("reset", EventKind::Reset)
    }

    pub fn read_state() -> Self {
        Self::control("readState", EventKind::ReadState)
    }

    fn control(name: &str, kind: EventKind) -> Self {
        Self {
            name: name.to_string(),
            timestamp: now_millis(),
            kind,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn timestamp(&self) -> u64 {
        self.timestamp
    }

    pub fn kind(&self) -> EventKind {
        self.kind
    }
}

impl fmt::Display for Event {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.kind {
            EventKind::Transition => write!(f, "{}@{}", self.name, self.timestamp),
            _ => write!(f, "<{}>", self.name),
        }
    }
}

/// Wall-clock time in milliseconds since the UNIX epoch.
pub fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}
