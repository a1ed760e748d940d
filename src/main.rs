//! cwm-incremental
//!
//! Runs maintenance scenarios: loads rules and base facts, materializes them,
//! then applies each update batch and reports what changed.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::{Parser, ValueEnum};
use indexmap::IndexMap;
use serde::Deserialize;
use serde_json::Value;

use cwm_incremental::{
    init_logging, CwmConfig, EqualityMode, IncrementalEngine, IncrementalMonitor, LogLevel,
    MonitorKind, RecordingMonitor, Strategy, TracingMonitor, Triple,
};

#[derive(Parser)]
#[command(name = "cwm-incremental")]
#[command(version = "0.1.0")]
#[command(about = "Incremental materialization maintenance with DRed and FBF", long_about = None)]
struct Cli {
    /// Scenario file (JSON or TOML)
    #[arg(value_name = "SCENARIO")]
    scenario: PathBuf,

    /// Deletion strategy
    #[arg(long, value_enum)]
    strategy: Option<StrategyArg>,

    /// Worker threads (0 = one per core)
    #[arg(long)]
    workers: Option<usize>,

    /// Equality mode
    #[arg(long, value_enum)]
    equality: Option<EqualityArg>,

    /// Evaluate all rules together instead of level by level
    #[arg(long = "no-levels")]
    no_levels: bool,

    /// Configuration file (defaults to the usual search path)
    #[arg(long)]
    config: Option<PathBuf>,

    /// Configuration profile (fast, exact, safe or a custom one)
    #[arg(long)]
    profile: Option<String>,

    /// Logging verbosity
    #[arg(long = "log-level", value_enum)]
    log_level: Option<LogLevelArg>,

    /// Include the recorded monitor events in the report
    #[arg(long)]
    events: bool,
}

#[derive(Copy, Clone, PartialEq, Eq, ValueEnum)]
enum StrategyArg {
    Dred,
    Fbf,
}

#[derive(Copy, Clone, PartialEq, Eq, ValueEnum)]
enum EqualityArg {
    Off,
    NoUna,
    Una,
}

#[derive(Copy, Clone, PartialEq, Eq, ValueEnum)]
enum LogLevelArg {
    Quiet,
    Normal,
    Verbose,
    Debug,
}

/// A rule with its stratification level
#[derive(Debug, Deserialize)]
struct ScenarioRule {
    #[serde(default)]
    level: usize,
    rule: String,
}

/// One update: retractions are applied before assertions
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct Batch {
    name: Option<String>,
    delete: Vec<String>,
    insert: Vec<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct Scenario {
    /// Interned first, so their ids are stable across runs
    resources: Vec<String>,
    rules: Vec<ScenarioRule>,
    facts: Vec<String>,
    batches: Vec<Batch>,
}

impl Scenario {
    fn load(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read scenario: {}", path.display()))?;
        match path.extension().and_then(|e| e.to_str()) {
            Some("toml") => toml::from_str(&content)
                .with_context(|| format!("Invalid TOML scenario: {}", path.display())),
            _ => serde_json::from_str(&content)
                .with_context(|| format!("Invalid JSON scenario: {}", path.display())),
        }
    }
}

fn load_config(cli: &Cli) -> Result<CwmConfig> {
    let mut config = match &cli.config {
        Some(path) => CwmConfig::load_from_file(path)?,
        None => CwmConfig::load()?,
    };
    if let Some(profile) = &cli.profile {
        config.apply_profile(profile)?;
    }
    if let Some(strategy) = cli.strategy {
        config.maintenance.strategy = match strategy {
            StrategyArg::Dred => Strategy::Dred,
            StrategyArg::Fbf => Strategy::Fbf,
        };
    }
    if let Some(workers) = cli.workers {
        config.maintenance.workers = workers;
    }
    if let Some(equality) = cli.equality {
        config.equality.mode = match equality {
            EqualityArg::Off => EqualityMode::Off,
            EqualityArg::NoUna => EqualityMode::NoUna,
            EqualityArg::Una => EqualityMode::Una,
        };
    }
    if cli.no_levels {
        config.maintenance.by_levels = false;
    }
    if let Some(level) = cli.log_level {
        config.general.log_level = match level {
            LogLevelArg::Quiet => LogLevel::Quiet,
            LogLevelArg::Normal => LogLevel::Normal,
            LogLevelArg::Verbose => LogLevel::Verbose,
            LogLevelArg::Debug => LogLevel::Debug,
        };
    }
    if cli.events {
        config.maintenance.monitor = MonitorKind::Record;
    }
    Ok(config)
}

fn parse_facts(engine: &mut IncrementalEngine, facts: &[String]) -> Result<Vec<Triple>> {
    facts
        .iter()
        .map(|fact| engine.parse_triple(fact).with_context(|| format!("Invalid fact: {}", fact)))
        .collect()
}

fn render_facts(engine: &IncrementalEngine) -> Vec<String> {
    let mut facts: Vec<String> = engine
        .materialized_facts()
        .iter()
        .map(|t| engine.dictionary().display_triple(t))
        .collect();
    facts.sort();
    facts
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    let config = load_config(&cli)?;
    init_logging(config.general.log_level);

    let scenario = Scenario::load(&cli.scenario)?;
    let monitor_kind = config.maintenance.monitor;
    let mut engine = IncrementalEngine::new(config);

    for resource in &scenario.resources {
        engine.resource(resource);
    }
    for rule in &scenario.rules {
        engine
            .add_rule_str(&rule.rule, rule.level)
            .with_context(|| format!("Invalid rule: {}", rule.rule))?;
    }
    for fact in parse_facts(&mut engine, &scenario.facts)? {
        engine.add_fact(fact);
    }
    let size = engine.materialize()?;

    let mut reports = Vec::with_capacity(scenario.batches.len() + 1);
    let mut initial: IndexMap<&str, Value> = IndexMap::new();
    initial.insert("batch", Value::from("initial"));
    initial.insert("size", Value::from(size));
    initial.insert("facts", Value::from(render_facts(&engine)));
    reports.push(initial);

    for (index, batch) in scenario.batches.iter().enumerate() {
        let deletions = parse_facts(&mut engine, &batch.delete)?;
        let insertions = parse_facts(&mut engine, &batch.insert)?;

        let recording = RecordingMonitor::new();
        let tracing_monitor = (monitor_kind == MonitorKind::Tracing)
            .then(|| TracingMonitor::with_dictionary(engine.dictionary().clone()));
        let monitor: Option<&dyn IncrementalMonitor> = match monitor_kind {
            MonitorKind::Off => None,
            MonitorKind::Tracing => tracing_monitor.as_ref().map(|m| m as &dyn IncrementalMonitor),
            MonitorKind::Record => Some(&recording),
        };
        let stats = engine.apply_changes(&deletions, &insertions, monitor)?;

        let mut report: IndexMap<&str, Value> = IndexMap::new();
        let name = batch.name.clone().unwrap_or_else(|| format!("batch {}", index + 1));
        report.insert("batch", Value::from(name));
        report.insert("stats", serde_json::to_value(&stats)?);
        report.insert("size", Value::from(engine.materialized_facts().len()));
        report.insert("facts", Value::from(render_facts(&engine)));
        if monitor_kind == MonitorKind::Record {
            report.insert("events", serde_json::to_value(recording.take_events())?);
        }
        reports.push(report);
    }

    println!("{}", serde_json::to_string_pretty(&reports)?);
    Ok(())
}
