use crate::job::{BatchJob, BatchJobRecord, JobStatus, TaskKind};
use crate::manifest::{write_batch_manifest, BatchManifest};
use anyhow::{Context, Result};
use chrono::Utc;
use gridval_algo::Engine;
use gridval_core::{RetrospectiveValuation, RunId, ValuationResult};
use rayon::prelude::*;
use rayon::ThreadPoolBuilder;
use serde::Serialize;
use std::fs::{self, File};
use std::io::{BufWriter, Write};
use std::path::PathBuf;
use tracing::{info, warn};

pub struct BatchRunnerConfig<'a> {
    pub engine: &'a Engine,
    pub jobs: Vec<BatchJob>,
    pub output_root: PathBuf,
    pub task: TaskKind,
    /// Pin every job to this run; defaults to the latest completed run at start
    pub run: Option<RunId>,
    /// Worker threads; 0 means one per CPU
    pub threads: usize,
}

pub struct BatchSummary {
    pub success: usize,
    pub failure: usize,
    pub pipeline_run_id: RunId,
    pub manifest_path: PathBuf,
    pub valuations_path: PathBuf,
    pub jobs: Vec<BatchJobRecord>,
}

/// Result line written to `valuations.jsonl`.
#[derive(Debug, Clone, Serialize)]
#[serde(untagged)]
pub enum JobOutput {
    Prospective(ValuationResult),
    Retrospective(RetrospectiveValuation),
}

impl JobOutput {
    pub fn value_per_kw_year(&self) -> f64 {
        match self {
            JobOutput::Prospective(v) => v.value_per_kw_year,
            JobOutput::Retrospective(v) => v.value_per_kw_year,
        }
    }
}

#[derive(Serialize)]
struct ValuationLine<'a> {
    job_id: &'a str,
    asset_id: &'a str,
    valuation: &'a JobOutput,
}

/// Value every job on a sized rayon pool and write `valuations.jsonl` plus
/// `batch_manifest.json` under the output root. Results are written in job
/// order regardless of completion order.
pub fn run_batch(config: &BatchRunnerConfig<'_>) -> Result<BatchSummary> {
    fs::create_dir_all(&config.output_root).with_context(|| {
        format!(
            "creating batch output root '{}'",
            config.output_root.display()
        )
    })?;

    let run_id = config
        .engine
        .score_store()
        .generation_or_latest(config.run)
        .context("selecting pipeline run for batch")?
        .id();

    let thread_count = if config.threads == 0 {
        num_cpus::get()
    } else {
        config.threads
    };
    let pool = ThreadPoolBuilder::new()
        .num_threads(thread_count)
        .build()
        .context("building Rayon thread pool for batch runs")?;
    info!(
        jobs = config.jobs.len(),
        threads = thread_count,
        run = %run_id,
        task = config.task.as_str(),
        "starting batch"
    );

    let outcomes: Vec<(BatchJobRecord, Option<JobOutput>)> = pool.install(|| {
        config
            .jobs
            .par_iter()
            .map(|job| run_job(job, config, run_id))
            .collect()
    });

    let valuations_path = config.output_root.join("valuations.jsonl");
    let file = File::create(&valuations_path)
        .with_context(|| format!("creating '{}'", valuations_path.display()))?;
    let mut writer = BufWriter::new(file);
    for (record, output) in &outcomes {
        if let Some(output) = output {
            let line = ValuationLine {
                job_id: &record.job_id,
                asset_id: &record.asset_id,
                valuation: output,
            };
            serde_json::to_writer(&mut writer, &line).context("serializing valuation line")?;
            writer.write_all(b"\n")?;
        }
    }
    writer
        .flush()
        .with_context(|| format!("writing '{}'", valuations_path.display()))?;

    let job_records: Vec<BatchJobRecord> = outcomes.into_iter().map(|(r, _)| r).collect();
    let success = job_records
        .iter()
        .filter(|record| record.status == JobStatus::Ok)
        .count();
    let failure = job_records.len() - success;

    let manifest = BatchManifest {
        created_at: Utc::now(),
        task: config.task,
        pipeline_run_id: Some(run_id),
        num_jobs: job_records.len(),
        success,
        failure,
        jobs: job_records.clone(),
    };
    let manifest_path = config.output_root.join("batch_manifest.json");
    write_batch_manifest(&manifest_path, &manifest)?;
    info!(success, failure, manifest = %manifest_path.display(), "batch finished");

    Ok(BatchSummary {
        success,
        failure,
        pipeline_run_id: run_id,
        manifest_path,
        valuations_path,
        jobs: job_records,
    })
}

fn run_job(
    job: &BatchJob,
    config: &BatchRunnerConfig<'_>,
    run_id: RunId,
) -> (BatchJobRecord, Option<JobOutput>) {
    let engine = config.engine;
    let asset = &job.asset;
    let outcome = engine
        .resolve_geo(asset.location.lat, asset.location.lon)
        .and_then(|ctx| match config.task {
            TaskKind::Prospective => engine
                .valuate_prospective_at(
                    &ctx,
                    &asset.der_type,
                    asset.capacity_mw.value(),
                    Some(run_id),
                )
                .map(JobOutput::Prospective),
            TaskKind::Retrospective { start, end } => engine
                .valuate_retrospective_at(asset, &ctx, start, end, Some(run_id))
                .map(JobOutput::Retrospective),
        });

    let mut record = BatchJobRecord {
        job_id: job.job_id.clone(),
        asset_id: asset.asset_id.to_string(),
        der_type: asset.der_type.clone(),
        status: JobStatus::Ok,
        error: None,
        value_per_kw_year: None,
    };
    match outcome {
        Ok(output) => {
            record.value_per_kw_year = Some(output.value_per_kw_year());
            (record, Some(output))
        }
        Err(err) => {
            warn!(job = %job.job_id, error = %err, "batch job failed");
            record.status = JobStatus::Error;
            record.error = Some(err.to_string());
            (record, None)
        }
    }
}
