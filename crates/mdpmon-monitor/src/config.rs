//! Termination policy and monitor configuration.

use crate::monitor::MonitorError;
use serde::{Deserialize, Serialize};
use snafu::Snafu;
use std::fmt;
use std::fs;
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;

/// Errors from reading or writing monitor files (config, JSON report).
#[derive(Debug, Snafu)]
pub enum FileError {
    #[snafu(display("I/O error"), context(false))]
    Io { source: std::io::Error },

    #[snafu(display("JSON error"), context(false))]
    Json { source: serde_json::Error },
}

/// When the monitor decides it has seen enough.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Termination {
    /// Stop once the coverage ratio reaches the target.
    #[default]
    Coverage,
    /// Stop once every uncertain posterior is narrower than the tolerance.
    Convergence,
    /// Stop after a fixed number of samples from uncertain states.
    Limit,
}

impl FromStr for Termination {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "coverage" => Ok(Self::Coverage),
            "convergence" => Ok(Self::Convergence),
            "limit" => Ok(Self::Limit),
            _ => Err(format!(
                "unknown termination {:?} (expected coverage, convergence or limit)",
                s
            )),
        }
    }
}

impl fmt::Display for Termination {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Coverage => "coverage",
            Self::Convergence => "convergence",
            Self::Limit => "limit",
        };
        f.write_str(name)
    }
}

/// Configuration for a monitoring session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MonitorConfig {
    /// Termination mode.
    pub termination: Termination,
    /// Target coverage ratio for [`Termination::Coverage`].
    pub coverage: f64,
    /// Per-posterior sample threshold of the joint convergence check; also
    /// the period (in total samples) of coverage logging and checks.
    pub sample_size: u64,
    /// Sample budget for [`Termination::Limit`].
    pub limit: u64,
    /// A posterior whose HPD region size is below this has converged.
    pub tolerance: f64,
    /// Probability mass of the reported HPD region.
    pub hpd_level: f64,
    /// Pause before building the final report, letting in-flight logging
    /// settle.
    pub drain_delay_ms: u64,
    /// Number of recent transitions kept for violation diagnostics.
    pub trace_len: usize,
    /// Log a posterior summary every this many uncertain transitions
    /// (0 = never).
    pub report_interval: u64,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            termination: Termination::Coverage,
            coverage: 1.0,
            sample_size: 50,
            limit: 1000,
            tolerance: 0.05,
            hpd_level: 0.95,
            drain_delay_ms: 500,
            trace_len: 20,
            report_interval: 10,
        }
    }
}

impl MonitorConfig {
    /// Load a JSON config; missing fields keep their defaults.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, FileError> {
        let json = fs::read_to_string(path)?;
        let config = serde_json::from_str(&json)?;
        Ok(config)
    }

    pub fn drain_delay(&self) -> Duration {
        Duration::from_millis(self.drain_delay_ms)
    }

    /// Reject settings the monitor cannot honour.
    pub fn validate(&self) -> Result<(), MonitorError> {
        if !(0.0..=1.0).contains(&self.coverage) {
            return Err(MonitorError::Config(format!(
                "coverage target {} outside [0, 1]",
                self.coverage
            )));
        }
        if self.sample_size == 0 {
            return Err(MonitorError::Config("sample_size must be positive".into()));
        }
        if self.limit == 0 {
            return Err(MonitorError::Config("limit must be positive".into()));
        }
        if !self.tolerance.is_finite() || self.tolerance <= 0.0 {
            return Err(MonitorError::Config(format!(
                "tolerance {} must be finite and positive",
                self.tolerance
            )));
        }
        if !(self.hpd_level > 0.0 && self.hpd_level < 1.0) {
            return Err(MonitorError::Config(format!(
                "hpd_level {} outside (0, 1)",
                self.hpd_level
            )));
        }
        Ok(())
    }
}
