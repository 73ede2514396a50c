use chrono::{DateTime, Utc};
use clap::{CommandFactory, Parser, Subcommand, ValueEnum, ValueHint};
use clap_complete::Shell;
use std::path::PathBuf;

use crate::common::OutputFormat;

#[derive(Parser, Debug)]
#[command(author, version, about = "Locational DER constraint-relief valuation", long_about = None)]
pub struct Cli {
    /// Set the logging level
    #[arg(long, default_value = "info", global = true)]
    pub log_level: tracing::Level,

    /// Engine config file (defaults to ~/.gridval/config.toml when present)
    #[arg(long, global = true, value_hint = ValueHint::FilePath)]
    pub config: Option<PathBuf>,

    /// Directory holding the entity files and optional assets.csv / intervals.csv
    #[arg(long, default_value = ".", global = true, value_hint = ValueHint::DirPath)]
    pub data: PathBuf,

    /// Pipeline run store directory
    #[arg(long, default_value = "runs", global = true, value_hint = ValueHint::DirPath)]
    pub store: PathBuf,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Resolve a coordinate to its grid hierarchy
    Resolve {
        #[arg(long, allow_negative_numbers = true)]
        lat: f64,
        #[arg(long, allow_negative_numbers = true)]
        lon: f64,
        #[arg(long, value_enum, default_value_t = OutputFormat::Table)]
        format: OutputFormat,
    },
    /// Prospective valuation of a DER at a coordinate
    Valuate {
        #[arg(long, allow_negative_numbers = true)]
        lat: f64,
        #[arg(long, allow_negative_numbers = true)]
        lon: f64,
        /// DER type (a key of the configured profile table)
        #[arg(long = "der-type", default_value = "solar")]
        der_type: String,
        /// Nameplate capacity in MW
        #[arg(long = "capacity-mw", allow_negative_numbers = true)]
        capacity_mw: f64,
        /// Value against this pipeline run instead of the latest
        #[arg(long)]
        run: Option<u64>,
        #[arg(long, value_enum, default_value_t = OutputFormat::Table)]
        format: OutputFormat,
    },
    /// Retrospective valuation of a registered asset over [start, end)
    Retro {
        /// Asset id from assets.csv
        asset_id: String,
        /// RFC 3339 start (inclusive)
        #[arg(long)]
        start: DateTime<Utc>,
        /// RFC 3339 end (exclusive)
        #[arg(long)]
        end: DateTime<Utc>,
        /// Interval CSV (defaults to <data>/intervals.csv)
        #[arg(long, value_hint = ValueHint::FilePath)]
        intervals: Option<PathBuf>,
        #[arg(long)]
        run: Option<u64>,
        #[arg(long, value_enum, default_value_t = OutputFormat::Table)]
        format: OutputFormat,
    },
    /// Portfolio summary of registered assets within one ISO
    Portfolio {
        /// ISO code, e.g. PJM
        iso: String,
        #[arg(long, value_enum, default_value_t = OutputFormat::Table)]
        format: OutputFormat,
    },
    /// Run the scoring pipeline over an interval CSV and persist the run
    Score {
        /// Interval CSV (level,entity_id,hour,congestion_component,loading_pct)
        #[arg(value_hint = ValueHint::FilePath)]
        intervals: PathBuf,
        /// Window start (defaults to the earliest hour in the file)
        #[arg(long)]
        start: Option<DateTime<Utc>>,
        /// Window end (defaults to one hour past the latest hour in the file)
        #[arg(long)]
        end: Option<DateTime<Utc>>,
        #[arg(long, value_enum, default_value_t = OutputFormat::Table)]
        format: OutputFormat,
    },
    /// Inspect persisted pipeline runs
    Runs {
        #[command(subcommand)]
        command: RunsCommands,
    },
    /// Value every registered asset in parallel
    Batch {
        /// Output directory for valuations.jsonl and batch_manifest.json
        #[arg(short, long, value_hint = ValueHint::DirPath)]
        out: PathBuf,
        #[arg(long, value_enum, default_value_t = BatchTask::Prospective)]
        task: BatchTask,
        /// Retrospective window start
        #[arg(long, required_if_eq("task", "retrospective"))]
        start: Option<DateTime<Utc>>,
        /// Retrospective window end
        #[arg(long, required_if_eq("task", "retrospective"))]
        end: Option<DateTime<Utc>>,
        /// Interval CSV for retrospective jobs (defaults to <data>/intervals.csv)
        #[arg(long, value_hint = ValueHint::FilePath)]
        intervals: Option<PathBuf>,
        #[arg(long)]
        run: Option<u64>,
        /// Worker threads (0 = one per CPU)
        #[arg(long, default_value_t = 0)]
        threads: usize,
    },
    /// Engine configuration
    Config {
        #[command(subcommand)]
        command: ConfigCommands,
    },
    /// Generate shell completion scripts
    Completions {
        /// Shell type
        #[arg(value_enum)]
        shell: Shell,
        /// Write output to a file instead of stdout
        #[arg(short, long)]
        out: Option<PathBuf>,
    },
}

#[derive(Subcommand, Debug)]
pub enum RunsCommands {
    /// List persisted runs
    List {
        #[arg(long, value_enum, default_value_t = OutputFormat::Table)]
        format: OutputFormat,
    },
    /// Describe one run (defaults to the latest)
    Describe {
        run_id: Option<u64>,
        /// Number of most constrained records to show
        #[arg(long, default_value_t = 10)]
        top: usize,
        #[arg(long, value_enum, default_value_t = OutputFormat::Table)]
        format: OutputFormat,
    },
}

#[derive(Subcommand, Debug)]
pub enum ConfigCommands {
    /// Print the effective configuration as TOML
    Show,
    /// Write the default configuration to a file
    Init {
        /// Target path (defaults to ~/.gridval/config.toml)
        #[arg(long, value_hint = ValueHint::FilePath)]
        out: Option<PathBuf>,
        /// Overwrite an existing file
        #[arg(long)]
        force: bool,
    },
}

#[derive(ValueEnum, Clone, Copy, Debug, PartialEq, Eq)]
pub enum BatchTask {
    Prospective,
    Retrospective,
}

pub fn build_cli_command() -> clap::Command {
    Cli::command()
}
