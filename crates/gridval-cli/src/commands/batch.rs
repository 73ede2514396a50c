use std::path::Path;

use anyhow::{anyhow, Result};
use chrono::{DateTime, Utc};
use gridval_batch::{jobs_from_assets, run_batch, BatchRunnerConfig, TaskKind};
use gridval_cli::common::{build_engine, print_fields};
use gridval_cli::{BatchTask, Cli};
use gridval_core::RunId;

#[allow(clippy::too_many_arguments)]
pub fn handle(
    cli: &Cli,
    out: &Path,
    task: BatchTask,
    start: Option<DateTime<Utc>>,
    end: Option<DateTime<Utc>>,
    intervals: Option<&Path>,
    run: Option<u64>,
    threads: usize,
) -> Result<()> {
    let task = match task {
        BatchTask::Prospective => TaskKind::Prospective,
        BatchTask::Retrospective => TaskKind::Retrospective {
            start: start.ok_or_else(|| anyhow!("--start is required for retrospective batches"))?,
            end: end.ok_or_else(|| anyhow!("--end is required for retrospective batches"))?,
        },
    };
    let retrospective = matches!(task, TaskKind::Retrospective { .. });
    let engine = build_engine(cli, intervals, retrospective)?;
    let registry = engine.assets();

    let config = BatchRunnerConfig {
        engine: &engine,
        jobs: jobs_from_assets(registry.assets(), task),
        output_root: out.to_path_buf(),
        task,
        run: run.map(RunId::new),
        threads,
    };
    let summary = run_batch(&config)?;
    print_fields(&[
        ("pipeline run", summary.pipeline_run_id.to_string()),
        ("succeeded", summary.success.to_string()),
        ("failed", summary.failure.to_string()),
        ("valuations", summary.valuations_path.display().to_string()),
        ("manifest", summary.manifest_path.display().to_string()),
    ])
}
