use std::process::ExitCode;

use anyhow::Result;
use clap::Parser;
use gridval_cli::{Cli, Commands};
use gridval_core::{ErrorKind, GridvalError};
use tracing::debug;
use tracing_subscriber::FmtSubscriber;

mod commands;

fn run(cli: &Cli) -> Result<()> {
    match &cli.command {
        Commands::Resolve { lat, lon, format } => {
            commands::resolve::handle(cli, *lat, *lon, *format)
        }
        Commands::Valuate {
            lat,
            lon,
            der_type,
            capacity_mw,
            run,
            format,
        } => commands::valuate::handle(cli, *lat, *lon, der_type, *capacity_mw, *run, *format),
        Commands::Retro {
            asset_id,
            start,
            end,
            intervals,
            run,
            format,
        } => commands::retro::handle(
            cli,
            asset_id,
            *start,
            *end,
            intervals.as_deref(),
            *run,
            *format,
        ),
        Commands::Portfolio { iso, format } => commands::portfolio::handle(cli, iso, *format),
        Commands::Score {
            intervals,
            start,
            end,
            format,
        } => commands::score::handle(cli, intervals, *start, *end, *format),
        Commands::Runs { command } => commands::runs::handle(cli, command),
        Commands::Batch {
            out,
            task,
            start,
            end,
            intervals,
            run,
            threads,
        } => commands::batch::handle(
            cli,
            out,
            *task,
            *start,
            *end,
            intervals.as_deref(),
            *run,
            *threads,
        ),
        Commands::Config { command } => commands::config::handle(cli, command),
        Commands::Completions { shell, out } => {
            commands::completions::handle(*shell, out.as_deref())
        }
    }
}

/// Exit status by failure category, so scripts can tell a bad request from
/// missing data without parsing messages.
fn exit_code(err: &anyhow::Error) -> u8 {
    let kind = err
        .chain()
        .find_map(|e| e.downcast_ref::<GridvalError>())
        .map(GridvalError::kind);
    match kind {
        Some(ErrorKind::InputValidation) => 2,
        Some(ErrorKind::DataAvailability) => 3,
        Some(ErrorKind::Configuration) => 4,
        Some(ErrorKind::Internal) | None => 1,
    }
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    let subscriber = FmtSubscriber::builder()
        .with_max_level(cli.log_level)
        .with_writer(std::io::stderr)
        .finish();
    if tracing::subscriber::set_global_default(subscriber).is_err() {
        eprintln!("warning: a global tracing subscriber was already set");
    }
    debug!(data = %cli.data.display(), store = %cli.store.display(), "gridval starting");

    match run(&cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            eprintln!("error: {err:#}");
            ExitCode::from(exit_code(&err))
        }
    }
}
