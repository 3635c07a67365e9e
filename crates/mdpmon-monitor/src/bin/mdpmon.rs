//! CLI for the mdpmon runtime monitor.
//!
//! # Usage
//!
//! ```bash
//! # Check a model (and optionally a policy) and print a summary
//! mdpmon check --model model.json --policy policy.json
//!
//! # Monitor events read from stdin, one per line
//! producer | mdpmon run --model model.json --policy policy.json
//!
//! # Stop after 500 samples and keep the report as JSON
//! mdpmon run --model model.json --termination limit --limit 500 --report-json out.json
//! ```
//!
//! # Event input
//!
//! Each line is `<event> [timestamp_ms]`. Blank lines and lines starting
//! with `#` are skipped. Control lines:
//!
//! | Line     | Effect                                              |
//! |----------|-----------------------------------------------------|
//! | `!stop`  | end the session                                     |
//! | `!reset` | return the monitor to the initial state             |
//! | `!state` | print the monitor's current state                   |
//! | `!next`  | print the decision maker's next action for it       |
//!
//! End of input stops the session.
//!
//! # Exit codes
//!
//! `0` clean stop, `1` protocol violation, `2` bad model/policy/config.

use clap::{Args, Parser, Subcommand};
use log::warn;
use mdpmon_decision::DecisionStrategy;
use mdpmon_model::{MixedPolicy, Model};
use mdpmon_monitor::{
    format_report, format_violation, save_report, share, CheckPoint, Event, Monitor,
    MonitorConfig, MonitorError, Termination,
};
use std::error::Error;
use std::fs::File;
use std::io::{self, BufRead, BufReader};
use std::sync::Arc;

#[derive(Parser)]
#[command(name = "mdpmon")]
#[command(about = "Online Bayesian runtime monitor for MDP-modeled systems")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Monitor an event stream against a model.
    Run(RunArgs),

    /// Validate a model and policy and print a summary.
    Check {
        /// Model file (JSON).
        #[arg(short, long)]
        model: String,

        /// Mixed policy file (JSON).
        #[arg(short, long)]
        policy: Option<String>,
    },
}

#[derive(Args)]
struct RunArgs {
    /// Model file (JSON).
    #[arg(short, long)]
    model: String,

    /// Mixed policy file (JSON). Defaults to uniform over each state's actions.
    #[arg(short, long)]
    policy: Option<String>,

    /// Monitor config file (JSON). Flags below override its fields.
    #[arg(short, long)]
    config: Option<String>,

    /// Read events from this file instead of stdin.
    #[arg(short, long)]
    events: Option<String>,

    /// Termination mode: "coverage", "convergence" or "limit".
    #[arg(short, long)]
    termination: Option<Termination>,

    /// Target coverage ratio in [0, 1].
    #[arg(long)]
    coverage: Option<f64>,

    /// Sample threshold of convergence checks and coverage period.
    #[arg(long)]
    sample_size: Option<u64>,

    /// Sample budget for limit termination.
    #[arg(short, long)]
    limit: Option<u64>,

    /// HPD region size below which a posterior has converged.
    #[arg(long)]
    tolerance: Option<f64>,

    /// Probability mass of the HPD region.
    #[arg(long)]
    hpd_level: Option<f64>,

    /// Pause before the final report, in milliseconds.
    #[arg(long)]
    drain_delay_ms: Option<u64>,

    /// Decision strategy: "flat", "count" or "distance".
    #[arg(short, long, default_value = "flat")]
    decision: DecisionStrategy,

    /// Random seed for the decision maker.
    #[arg(short, long, default_value = "42")]
    seed: u64,

    /// Also write the report as JSON to this path.
    #[arg(long)]
    report_json: Option<String>,
}

/// One parsed input line.
#[derive(Debug, PartialEq)]
enum Input {
    Event(Event),
    Stop,
    Reset,
    State,
    Next,
}

fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let cli = Cli::parse();

    let code = match cli.command {
        Commands::Run(args) => cmd_run(args),
        Commands::Check { model, policy } => cmd_check(&model, policy.as_deref()),
    };
    std::process::exit(code);
}

fn cmd_run(args: RunArgs) -> i32 {
    let (model, policy) = match load_inputs(&args.model, args.policy.as_deref()) {
        Ok(inputs) => inputs,
        Err(code) => return code,
    };

    let mut config = match &args.config {
        Some(path) => match MonitorConfig::load(path) {
            Ok(config) => config,
            Err(e) => {
                eprintln!("Error: failed to load config {}: {}", path, error_chain(&e));
                return 2;
            }
        },
        None => MonitorConfig::default(),
    };
    apply_overrides(&mut config, &args);

    eprintln!("═══════════════════════════════════════════════════════════════════════");
    eprintln!("  mdpmon");
    eprintln!("═══════════════════════════════════════════════════════════════════════");
    eprintln!();
    eprintln!("Configuration:");
    eprintln!("  Model:          {}", args.model);
    eprintln!("  States:         {}", model.num_states());
    eprintln!("  Termination:    {}", config.termination);
    eprintln!("  Sample size:    {}", config.sample_size);
    match config.termination {
        Termination::Coverage => eprintln!("  Coverage:       {}", config.coverage),
        Termination::Convergence => eprintln!("  Tolerance:      {}", config.tolerance),
        Termination::Limit => eprintln!("  Limit:          {}", config.limit),
    }
    eprintln!("  Decision:       {}", args.decision);
    eprintln!("  Seed:           {}", args.seed);
    eprintln!();

    let model = Arc::new(model);
    let decision = share(mdpmon_decision::build(
        args.decision,
        policy,
        &model,
        args.seed,
    ));
    let checkpoint = Arc::new(CheckPoint::new());

    let handle = match Monitor::new(model, decision, checkpoint, config)
        .and_then(|(monitor, sender)| monitor.launch(sender))
    {
        Ok(handle) => handle,
        Err(e) => {
            eprintln!("Error: {}", e);
            return e.exit_code();
        }
    };

    let reader: Box<dyn BufRead> = match &args.events {
        Some(path) => match File::open(path) {
            Ok(file) => Box::new(BufReader::new(file)),
            Err(e) => {
                eprintln!("Error: failed to open events file {}: {}", path, e);
                let _ = handle.stop();
                let _ = handle.join();
                return 2;
            }
        },
        None => Box::new(io::stdin().lock()),
    };

    for line in reader.lines() {
        let line = match line {
            Ok(line) => line,
            Err(e) => {
                warn!("Failed to read event input: {}", e);
                break;
            }
        };
        if !handle.is_running() {
            break;
        }
        let sent = match parse_line(&line) {
            None => continue,
            Some(Input::Event(event)) => handle.add_event(event),
            Some(Input::Stop) => handle.stop(),
            Some(Input::Reset) => handle.add_event(Event::reset()),
            Some(Input::State) => handle.read_state().map(|state| println!("state: {}", state)),
            Some(Input::Next) => handle
                .next_action()
                .map(|action| println!("next: {}", action.as_deref().unwrap_or("n/a"))),
        };
        if sent.is_err() {
            break;
        }
    }
    // End of input; harmless if the monitor already stopped.
    let _ = handle.stop();

    match handle.join() {
        Ok(report) => {
            println!("{}", format_report(&report));
            if let Some(path) = &args.report_json {
                if let Err(e) = save_report(&report, path) {
                    eprintln!("Error: failed to write report {}: {}", path, error_chain(&e));
                    return 2;
                }
                eprintln!("Report written to {}", path);
            }
            0
        }
        Err(e) => {
            match &e {
                MonitorError::ProtocolViolation {
                    state,
                    event,
                    trace,
                } => eprint!("{}", format_violation(state, event, trace)),
                other => eprintln!("Error: {}", other),
            }
            e.exit_code()
        }
    }
}

fn cmd_check(model_path: &str, policy_path: Option<&str>) -> i32 {
    let (model, policy) = match load_inputs(model_path, policy_path) {
        Ok(inputs) => inputs,
        Err(code) => return code,
    };

    let reachable = (0..model.num_states())
        .filter(|&s| model.is_reachable(s))
        .count();
    println!("Model:                  {}", model_path);
    println!(
        "Initial state:          {}",
        model.state(model.initial_state()).name
    );
    println!(
        "States:                 {} ({} reachable)",
        model.num_states(),
        reachable
    );
    println!("Transitions:            {}", model.transitions().len());
    println!("Coverage pairs:         {}", model.coverage_pairs().len());
    println!("Uncertain parameters:   {}", model.priors().count());
    for (state, prior) in model.priors() {
        println!("  {} / {}", model.state(state).name, prior.action);
    }
    if policy_path.is_some() {
        let covered = (0..policy.num_states())
            .filter(|&s| !policy.actions(s).is_empty())
            .count();
        println!("Policy states:          {}", covered);
    }
    0
}

/// Load the model and the policy (uniform when no path is given). On
/// failure the error is printed and the exit code returned.
fn load_inputs(model_path: &str, policy_path: Option<&str>) -> Result<(Model, MixedPolicy), i32> {
    let model = Model::load(model_path).map_err(|e| {
        eprintln!("Error: failed to load model {}: {}", model_path, error_chain(&e));
        2
    })?;
    let policy = match policy_path {
        Some(path) => MixedPolicy::load(path, &model).map_err(|e| {
            eprintln!("Error: failed to load policy {}: {}", path, error_chain(&e));
            2
        })?,
        None => MixedPolicy::uniform(&model),
    };
    Ok((model, policy))
}

fn apply_overrides(config: &mut MonitorConfig, args: &RunArgs) {
    if let Some(termination) = args.termination {
        config.termination = termination;
    }
    if let Some(coverage) = args.coverage {
        config.coverage = coverage;
    }
    if let Some(sample_size) = args.sample_size {
        config.sample_size = sample_size;
    }
    if let Some(limit) = args.limit {
        config.limit = limit;
    }
    if let Some(tolerance) = args.tolerance {
        config.tolerance = tolerance;
    }
    if let Some(hpd_level) = args.hpd_level {
        config.hpd_level = hpd_level;
    }
    if let Some(delay) = args.drain_delay_ms {
        config.drain_delay_ms = delay;
    }
}

fn parse_line(line: &str) -> Option<Input> {
    let line = line.trim();
    if line.is_empty() || line.starts_with('#') {
        return None;
    }
    match line {
        "!stop" => return Some(Input::Stop),
        "!reset" => return Some(Input::Reset),
        "!state" => return Some(Input::State),
        "!next" => return Some(Input::Next),
        _ => {}
    }
    let mut parts = line.split_whitespace();
    let name = parts.next()?;
    let event = match parts.next().map(str::parse::<u64>) {
        Some(Ok(timestamp)) => Event::new(name, timestamp),
        Some(Err(_)) => {
            warn!("Ignoring malformed timestamp in line {:?}", line);
            Event::now(name)
        }
        None => Event::now(name),
    };
    Some(Input::Event(event))
}

/// Render an error with its chain of sources.
fn error_chain(e: &dyn Error) -> String {
    let mut text = e.to_string();
    let mut source = e.source();
    while let Some(inner) = source {
        text.push_str(": ");
        text.push_str(&inner.to_string());
        source = inner.source();
    }
    text
}
