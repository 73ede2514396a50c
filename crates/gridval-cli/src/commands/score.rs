use std::path::Path;

use anyhow::{bail, Result};
use chrono::{DateTime, Duration, Utc};
use gridval_algo::{floor_hour, run_pipeline, ScoreWindow};
use gridval_cli::common::{
    load_config, log_diagnostics, open_run_store, print_fields, print_json, OutputFormat,
};
use gridval_cli::Cli;
use gridval_io::read_observations;
use tracing::info;

use super::runs::run_rows;

pub fn handle(
    cli: &Cli,
    intervals: &Path,
    start: Option<DateTime<Utc>>,
    end: Option<DateTime<Utc>>,
    format: OutputFormat,
) -> Result<()> {
    let config = load_config(cli)?;
    let (observations, diag) = read_observations(intervals)?;
    log_diagnostics("intervals", &diag);

    let first = observations.iter().map(|o| o.hour).min();
    let last = observations.iter().map(|o| o.hour).max();
    let start = match start.or(first) {
        Some(t) => t,
        None => bail!("no window start given and {} has no observations", intervals.display()),
    };
    let end = match end.or_else(|| last.map(|t| floor_hour(t) + Duration::hours(1))) {
        Some(t) => t,
        None => bail!("no window end given and {} has no observations", intervals.display()),
    };
    let window = ScoreWindow::new(start, end)?;

    let disk = open_run_store(cli)?;
    let _lock = disk.lock()?;
    let store = disk.load()?;
    let run = run_pipeline(&store, &observations, window, &config.scoring)?;
    let generation = store.generation(run.id)?;
    disk.save_generation(&generation)?;
    info!(
        run = %run.id,
        records = run.record_count,
        store = %disk.dir().display(),
        "scored and persisted"
    );

    match format {
        OutputFormat::Json => print_json(generation.run()),
        OutputFormat::Table => print_fields(&run_rows(generation.run())),
    }
}
