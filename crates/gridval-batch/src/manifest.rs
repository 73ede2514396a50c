use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use gridval_core::RunId;
use serde::{Deserialize, Serialize};
use std::fs::{self, File};
use std::path::Path;

use crate::job::{BatchJobRecord, TaskKind};

#[derive(Debug, Serialize, Deserialize)]
pub struct BatchManifest {
    pub created_at: DateTime<Utc>,
    pub task: TaskKind,
    /// Run every job in the batch was valued against
    pub pipeline_run_id: Option<RunId>,
    pub num_jobs: usize,
    pub success: usize,
    pub failure: usize,
    pub jobs: Vec<BatchJobRecord>,
}

pub fn write_batch_manifest(path: &Path, manifest: &BatchManifest) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)
            .with_context(|| format!("creating manifest directory '{}'", parent.display()))?;
    }
    let json =
        serde_json::to_string_pretty(manifest).context("serializing batch manifest to JSON")?;
    fs::write(path, json)
        .with_context(|| format!("writing batch manifest '{}'", path.display()))?;
    Ok(())
}

pub fn load_batch_manifest(path: &Path) -> Result<BatchManifest> {
    let file = File::open(path)
        .with_context(|| format!("opening batch manifest '{}'", path.display()))?;
    serde_json::from_reader(file)
        .with_context(|| format!("parsing batch manifest '{}'", path.display()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::job::JobStatus;
    use tempfile::NamedTempFile;

    #[test]
    fn manifest_writes_and_reads_back() {
        let record = BatchJobRecord {
            job_id: "prospective:A1".into(),
            asset_id: "A1".into(),
            der_type: "solar".into(),
            status: JobStatus::Error,
            error: Some("unsupported DER type: fusion".into()),
            value_per_kw_year: None,
        };
        let manifest = BatchManifest {
            created_at: Utc::now(),
            task: TaskKind::Prospective,
            pipeline_run_id: Some(RunId::new(3)),
            num_jobs: 1,
            success: 0,
            failure: 1,
            jobs: vec![record],
        };
        let tmp = NamedTempFile::new().unwrap();
        write_batch_manifest(tmp.path(), &manifest).unwrap();
        let parsed = load_batch_manifest(tmp.path()).unwrap();
        assert_eq!(parsed.task, TaskKind::Prospective);
        assert_eq!(parsed.pipeline_run_id, Some(RunId::new(3)));
        assert_eq!(parsed.jobs[0].status, JobStatus::Error);
    }
}
