//! Final report: inferred parameters, coverage and decision statistics.

use crate::config::{FileError, Termination};
use crate::coverage::CoverageStats;
use crate::monitor::TraceEntry;
use serde::Serialize;
use std::fs;
use std::path::Path;

/// Inference summary for one uncertain `(state, action)`.
#[derive(Debug, Clone, Serialize)]
pub struct ParameterReport {
    pub state: String,
    pub action: String,
    pub prior: Vec<f64>,
    pub posterior: Vec<f64>,
    pub sample_size: u64,
    /// `None` when some posterior concentration is at most one.
    pub mode: Option<Vec<f64>>,
    pub mean: Vec<f64>,
    pub hpd_level: f64,
    pub hpd_region: Vec<(f64, f64)>,
    /// Widest HPD interval.
    pub distance: f64,
    pub converged: bool,
}

/// How often the decision maker proposed an action at a state.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SelectionReport {
    pub state: String,
    pub action: String,
    pub count: u64,
}

/// Everything the monitor learned in one session.
#[derive(Debug, Clone, Serialize)]
pub struct MonitorReport {
    pub termination: Termination,
    pub final_state: String,
    /// Transition events handled, including a rejected one.
    pub events_processed: u64,
    /// Transitions matched against the model.
    pub transitions: u64,
    /// Sum of the posteriors' sample sizes.
    pub total_samples: u64,
    pub coverage: CoverageStats,
    pub decision_maker: String,
    pub selections: Vec<SelectionReport>,
    pub parameters: Vec<ParameterReport>,
}

/// Render a vector as `[0.2500, 0.7500]`.
pub fn format_vector(values: &[f64]) -> String {
    let items: Vec<String> = values.iter().map(|v| format!("{:.4}", v)).collect();
    format!("[{}]", items.join(", "))
}

fn format_region(region: &[(f64, f64)]) -> String {
    let items: Vec<String> = region
        .iter()
        .map(|(lo, hi)| format!("[{:.4}, {:.4}]", lo, hi))
        .collect();
    format!("[{}]", items.join(", "))
}

/// Format a monitor report as human-readable text.
pub fn format_report(report: &MonitorReport) -> String {
    let mut output = String::new();

    output.push_str("═══════════════════════════════════════════════════════════════════════\n");
    output.push_str("  mdpmon Monitoring Report\n");
    output.push_str("═══════════════════════════════════════════════════════════════════════\n\n");

    output.push_str(&format!("Termination mode:       {}\n", report.termination));
    output.push_str(&format!("Final state:            {}\n", report.final_state));
    output.push_str(&format!("Events processed:       {}\n", report.events_processed));
    output.push_str(&format!("Transitions:            {}\n", report.transitions));
    output.push_str(&format!("Total samples:          {}\n", report.total_samples));
    output.push_str(&format!("{}\n", report.coverage));
    output.push('\n');

    output.push_str("─── Inferred Parameters ───────────────────────────────────────────────\n");
    if report.parameters.is_empty() {
        output.push_str("No uncertain states.\n");
    }
    for p in &report.parameters {
        output.push_str(&format!("State {} / action {}\n", p.state, p.action));
        output.push_str(&format!("  Prior:                {}\n", format_vector(&p.prior)));
        output.push_str(&format!("  Posterior:            {}\n", format_vector(&p.posterior)));
        output.push_str(&format!("  Samples:              {}\n", p.sample_size));
        let mode = p
            .mode
            .as_deref()
            .map(format_vector)
            .unwrap_or_else(|| "n/a".to_string());
        output.push_str(&format!("  Mode:                 {}\n", mode));
        output.push_str(&format!("  Mean:                 {}\n", format_vector(&p.mean)));
        output.push_str(&format!(
            "  {:.0}% HPD region:      {}\n",
            p.hpd_level * 100.0,
            format_region(&p.hpd_region)
        ));
        output.push_str(&format!("  HPD region size:      {:.4}\n", p.distance));
        output.push_str(&format!(
            "  Converged:            {}\n",
            if p.converged { "yes" } else { "no" }
        ));
    }
    output.push('\n');

    output.push_str("─── Decision Maker ────────────────────────────────────────────────────\n");
    output.push_str(&format!("Strategy:               {}\n", report.decision_maker));
    let total: u64 = report.selections.iter().map(|s| s.count).sum();
    output.push_str(&format!("Actions proposed:       {}\n", total));
    for s in &report.selections {
        output.push_str(&format!("  {:<20} {:<20} {}\n", s.state, s.action, s.count));
    }

    output
}

/// Format the diagnostics of a rejected event.
pub fn format_violation(state: &str, event: &str, trace: &[TraceEntry]) -> String {
    let mut output = String::new();
    output.push_str(&format!("Current state: {}\n", state));
    output.push_str(&format!("Unexpected event: {}\n", event));
    if !trace.is_empty() {
        output.push_str("─── Recent Transitions ────────────────────────────────────────────────\n");
        for entry in trace {
            output.push_str(&format!("  {}\n", entry));
        }
    }
    output.push_str("**** TEST FAILED ****\n");
    output
}

/// Write the report as pretty-printed JSON.
pub fn save_report<P: AsRef<Path>>(report: &MonitorReport, path: P) -> Result<(), FileError> {
    let json = serde_json::to_string_pretty(report)?;
    fs::write(path, json)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn report() -> MonitorReport {
        MonitorReport {
            termination: Termination::Limit,
            final_state: "C".to_string(),
            events_processed: 2,
            transitions: 2,
            total_samples: 1,
            coverage: CoverageStats {
                covered: 2,
                total: 2,
                executions: 2,
                ratio: 1.0,
            },
            decision_maker: "flat".to_string(),
            selections: vec![SelectionReport {
                state: "A".to_string(),
                action: "go".to_string(),
                count: 3,
            }],
            parameters: vec![ParameterReport {
                state: "A".to_string(),
                action: "go".to_string(),
                prior: vec![1.0, 1.0, 1.0],
                posterior: vec![1.0, 2.0, 1.0],
                sample_size: 1,
                mode: None,
                mean: vec![0.25, 0.5, 0.25],
                hpd_level: 0.95,
                hpd_region: vec![(0.0, 0.6), (0.1, 0.9), (0.0, 0.6)],
                distance: 0.8,
                converged: false,
            }],
        }
    }

    #[test]
    fn test_format_vector() {
        assert_eq!(format_vector(&[0.25, 0.75]), "[0.2500, 0.7500]");
        assert_eq!(format_vector(&[]), "[]");
    }

    #[test]
    fn test_format_report() {
        let formatted = format_report(&report());
        assert!(formatted.contains("mdpmon Monitoring Report"));
        assert!(formatted.contains("Final state:            C"));
        assert!(formatted.contains("Posterior:            [1.0000, 2.0000, 1.0000]"));
        assert!(formatted.contains("Mode:                 n/a"));
        assert!(formatted.contains("95% HPD region"));
        assert!(formatted.contains("coverage: 2/2 (100.00%)"));
        assert!(formatted.contains("Actions proposed:       3"));
    }

    #[test]
    fn test_format_report_without_parameters() {
        let mut r = report();
        r.parameters.clear();
        assert!(format_report(&r).contains("No uncertain states."));
    }

    #[test]
    fn test_format_violation() {
        let trace = vec![TraceEntry {
            from: "A".to_string(),
            event: "go".to_string(),
            to: "B".to_string(),
            timestamp: 5,
        }];
        let text = format_violation("B", "bad", &trace);
        assert!(text.contains("Current state: B"));
        assert!(text.contains("A --go--> B"));
        assert!(text.ends_with("**** TEST FAILED ****\n"));
    }

    #[test]
    fn test_save_report_json() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("report.json");
        save_report(&report(), &path).unwrap();

        let json: serde_json::Value =
            serde_json::from_str(&fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(json["final_state"], "C");
        assert_eq!(json["termination"], "limit");
        assert!(json["parameters"][0]["mode"].is_null());
    }
}
