//! Common CLI types and workspace loading shared across commands.

use anyhow::{Context, Result};
use clap::ValueEnum;
use gridval_algo::{Engine, InMemoryIntervalStore, IntervalStore, ScoreStore};
use gridval_core::{EngineConfig, LoadDiagnostics};
use gridval_io::{load_assets, load_entities, load_intervals, RunStore};
use serde::Serialize;
use std::io::{self, Stdout, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tabwriter::TabWriter;
use tracing::{debug, info, warn};

use crate::cli::Cli;

/// Output format for structured results.
#[derive(ValueEnum, Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum OutputFormat {
    /// Human-readable aligned table
    #[default]
    Table,
    /// Pretty-printed JSON
    Json,
}

pub fn print_json<T: Serialize>(value: &T) -> Result<()> {
    serde_json::to_writer_pretty(io::stdout(), value).context("serializing output to JSON")?;
    println!();
    Ok(())
}

pub fn table_writer() -> TabWriter<Stdout> {
    TabWriter::new(io::stdout())
}

/// Key/value rows, aligned.
pub fn print_fields(rows: &[(&str, String)]) -> Result<()> {
    let mut writer = table_writer();
    for (key, value) in rows {
        writeln!(writer, "{key}\t{value}")?;
    }
    writer.flush()?;
    Ok(())
}

pub fn opt<T: std::fmt::Display>(value: Option<T>) -> String {
    value.map_or_else(|| "-".to_string(), |v| v.to_string())
}

pub fn money(value: f64) -> String {
    format!("${value:.2}")
}

pub fn log_diagnostics(source: &str, diag: &LoadDiagnostics) {
    if diag.diagnostics.has_issues() {
        warn!(source, summary = %diag.diagnostics.summary(), "load issues");
        for issue in &diag.diagnostics.issues {
            debug!(source, "{issue}");
        }
    }
}

pub fn load_config(cli: &Cli) -> Result<EngineConfig> {
    let config = EngineConfig::load_or_default(cli.config.as_deref())
        .context("loading engine configuration")?;
    Ok(config)
}

pub fn open_run_store(cli: &Cli) -> Result<RunStore> {
    RunStore::open(&cli.store)
}

fn default_intervals(cli: &Cli, explicit: Option<&Path>) -> Option<PathBuf> {
    match explicit {
        Some(path) => Some(path.to_path_buf()),
        None => {
            let path = cli.data.join("intervals.csv");
            path.exists().then_some(path)
        }
    }
}

/// Build an engine over the data directory and the persisted run store.
///
/// Interval data is only loaded for commands that need it (retrospective).
pub fn build_engine(cli: &Cli, intervals: Option<&Path>, with_intervals: bool) -> Result<Engine> {
    let config = load_config(cli)?;

    let (entities, diag) = load_entities(&cli.data)
        .with_context(|| format!("loading entities from {}", cli.data.display()))?;
    log_diagnostics("entities", &diag);

    // a missing store directory means nothing has been scored yet
    let scores = if cli.store.exists() {
        open_run_store(cli)?.load()?
    } else {
        ScoreStore::new()
    };
    let scores = Arc::new(scores);

    let interval_store: Arc<dyn IntervalStore> = match with_intervals
        .then(|| default_intervals(cli, intervals))
        .flatten()
    {
        Some(path) => {
            let (store, diag) = load_intervals(&path)?;
            log_diagnostics("intervals", &diag);
            Arc::new(store)
        }
        None => Arc::new(InMemoryIntervalStore::new()),
    };

    let engine = Engine::new(config, entities, scores, interval_store)?;

    let assets_path = cli.data.join("assets.csv");
    if assets_path.exists() {
        let (assets, diag) = load_assets(&assets_path)?;
        log_diagnostics("assets", &diag);
        engine.register_assets(assets);
    } else {
        info!(path = %assets_path.display(), "no asset registry");
    }
    Ok(engine)
}
