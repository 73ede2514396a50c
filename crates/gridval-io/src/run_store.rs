//! On-disk pipeline run store.
//!
//! ```text
//! <dir>/run-<id>.jsonl   one ScoreRecord per line
//! <dir>/run-<id>.json    PipelineRun metadata (status = completed)
//! <dir>/LATEST           id of the latest published run
//! <dir>/LOCK             held by the one process writing a run
//! ```
//!
//! A generation is written records first, then metadata, then `LATEST`. Every
//! file goes through a temp file and a rename, so a crash leaves either the
//! previous pointer or the new one. Runs above `LATEST` were never published
//! and are ignored on load.
//!
//! A writer takes [`RunStore::lock`] before loading the store and keeps the
//! guard until its run is saved, so two processes never allocate the same
//! run id. A run id that already has metadata on disk is never overwritten.

use std::fs::{self, File, OpenOptions};
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};

use anyhow::{anyhow, bail, Context, Result};
use gridval_algo::{ScoreGeneration, ScoreStore};
use gridval_core::{PipelineRun, RunId, RunStatus, ScoreRecord};
use tracing::{debug, info, warn};

const LATEST: &str = "LATEST";
const LOCK: &str = "LOCK";

/// Exclusive write access to a run store. Released on drop.
#[derive(Debug)]
pub struct WriteLock {
    path: PathBuf,
}

impl Drop for WriteLock {
    fn drop(&mut self) {
        if let Err(e) = fs::remove_file(&self.path) {
            warn!(path = %self.path.display(), error = %e, "failed to release run store lock");
        }
    }
}

#[derive(Debug, Clone)]
pub struct RunStore {
    dir: PathBuf,
}

impl RunStore {
    /// Open (creating if needed) a run store directory.
    pub fn open(dir: impl Into<PathBuf>) -> Result<Self> {
        let dir = dir.into();
        fs::create_dir_all(&dir)
            .with_context(|| format!("creating run store: {}", dir.display()))?;
        Ok(Self { dir })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn metadata_path(&self, id: RunId) -> PathBuf {
        self.dir.join(format!("run-{}.json", id.value()))
    }

    fn records_path(&self, id: RunId) -> PathBuf {
        self.dir.join(format!("run-{}.jsonl", id.value()))
    }

    /// Take the store's write lock. Fails if another writer holds it; a lock
    /// left behind by a crashed writer has to be removed by hand.
    pub fn lock(&self) -> Result<WriteLock> {
        let path = self.dir.join(LOCK);
        let mut file = OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&path)
            .with_context(|| {
                format!(
                    "run store {} is locked by another writer (remove {} if no writer is running)",
                    self.dir.display(),
                    path.display()
                )
            })?;
        writeln!(file, "{}", std::process::id())
            .with_context(|| format!("writing {}", path.display()))?;
        debug!(path = %path.display(), "run store locked");
        Ok(WriteLock { path })
    }

    /// Id named by the `LATEST` pointer, if one has been written.
    pub fn latest_pointer(&self) -> Result<Option<RunId>> {
        let path = self.dir.join(LATEST);
        if !path.exists() {
            return Ok(None);
        }
        let text = fs::read_to_string(&path)
            .with_context(|| format!("reading {}", path.display()))?;
        let id: u64 = text
            .trim()
            .parse()
            .with_context(|| format!("parsing run id in {}", path.display()))?;
        Ok(Some(RunId::new(id)))
    }

    /// Persist a completed generation and publish it if it is newer than the
    /// current pointer.
    pub fn save_generation(&self, generation: &ScoreGeneration) -> Result<()> {
        let run = generation.run();
        if run.status != RunStatus::Completed {
            bail!("run {} is {}, only completed runs are persisted", run.id, run.status.as_str());
        }

        let metadata_path = self.metadata_path(run.id);
        if metadata_path.exists() {
            bail!(
                "run {} already exists in {}; refusing to overwrite it",
                run.id,
                self.dir.display()
            );
        }

        let records_path = self.records_path(run.id);
        write_atomic(&records_path, |w| {
            for record in generation.records() {
                serde_json::to_writer(&mut *w, record).context("serializing score record")?;
                w.write_all(b"\n")?;
            }
            Ok(())
        })?;

        write_atomic(&metadata_path, |w| {
            serde_json::to_writer_pretty(&mut *w, run).context("serializing run metadata")?;
            Ok(())
        })?;

        let newer = self
            .latest_pointer()?
            .map_or(true, |current| current < run.id);
        if newer {
            write_atomic(&self.dir.join(LATEST), |w| {
                write!(w, "{}", run.id.value())?;
                Ok(())
            })?;
            info!(run = %run.id, dir = %self.dir.display(), "published run");
        }
        Ok(())
    }

    /// Metadata of every published completed run, in id order.
    pub fn list_runs(&self) -> Result<Vec<PipelineRun>> {
        let Some(latest) = self.latest_pointer()? else {
            return Ok(Vec::new());
        };
        let mut runs = Vec::new();
        for path in self.metadata_files()? {
            let run: PipelineRun = read_json(&path)?;
            if run.status != RunStatus::Completed {
                debug!(run = %run.id, "ignoring run not marked completed");
                continue;
            }
            if run.id > latest {
                warn!(run = %run.id, %latest, "ignoring unpublished run above LATEST");
                continue;
            }
            runs.push(run);
        }
        runs.sort_by_key(|r| r.id);
        Ok(runs)
    }

    /// Rebuild a [`ScoreStore`] with the persisted run ids and latest pointer.
    pub fn load(&self) -> Result<ScoreStore> {
        let runs = self.list_runs()?;
        if let Some(latest) = self.latest_pointer()? {
            if !runs.iter().any(|r| r.id == latest) {
                bail!(
                    "LATEST names run {latest} but {} has no completed metadata for it",
                    self.dir.display()
                );
            }
        }

        let mut generations = Vec::with_capacity(runs.len());
        for run in runs {
            let records = self.read_records(run.id)?;
            let id = run.id;
            let generation = ScoreGeneration::from_parts(run, records)
                .with_context(|| format!("rebuilding run {id}"))?;
            generations.push(generation);
        }
        info!(runs = generations.len(), dir = %self.dir.display(), "loaded run store");
        Ok(ScoreStore::restore(generations, Vec::new()))
    }

    fn read_records(&self, id: RunId) -> Result<Vec<ScoreRecord>> {
        let path = self.records_path(id);
        let file = File::open(&path).with_context(|| format!("opening {}", path.display()))?;
        let mut records = Vec::new();
        for (i, line) in BufReader::new(file).lines().enumerate() {
            let line = line.with_context(|| format!("reading {}", path.display()))?;
            if line.trim().is_empty() {
                continue;
            }
            let record: ScoreRecord = serde_json::from_str(&line)
                .with_context(|| format!("parsing {} line {}", path.display(), i + 1))?;
            records.push(record);
        }
        Ok(records)
    }

    fn metadata_files(&self) -> Result<Vec<PathBuf>> {
        let mut out = Vec::new();
        let entries = fs::read_dir(&self.dir)
            .with_context(|| format!("listing {}", self.dir.display()))?;
        for entry in entries {
            let path = entry?.path();
            let is_metadata = path
                .file_name()
                .and_then(|n| n.to_str())
                .and_then(|n| n.strip_prefix("run-"))
                .and_then(|n| n.strip_suffix(".json"))
                .is_some_and(|id| id.parse::<u64>().is_ok());
            if is_metadata {
                out.push(path);
            }
        }
        Ok(out)
    }
}

fn read_json<T: serde::de::DeserializeOwned>(path: &Path) -> Result<T> {
    let file = File::open(path).with_context(|| format!("opening {}", path.display()))?;
    serde_json::from_reader(BufReader::new(file))
        .with_context(|| format!("parsing {}", path.display()))
}

/// Write through a sibling temp file, fsync it and rename it into place.
fn write_atomic<F>(path: &Path, fill: F) -> Result<()>
where
    F: FnOnce(&mut BufWriter<File>) -> Result<()>,
{
    let file_name = path
        .file_name()
        .and_then(|n| n.to_str())
        .ok_or_else(|| anyhow!("invalid path: {}", path.display()))?;
    let tmp = path.with_file_name(format!(".{file_name}.tmp"));

    let file = File::create(&tmp).with_context(|| format!("creating {}", tmp.display()))?;
    let mut writer = BufWriter::new(file);
    fill(&mut writer)?;
    let file = writer
        .into_inner()
        .map_err(|e| anyhow!("flushing {}: {}", tmp.display(), e.error()))?;
    file.sync_all()
        .with_context(|| format!("syncing {}", tmp.display()))?;

    fs::rename(&tmp, path)
        .with_context(|| format!("renaming {} to {}", tmp.display(), path.display()))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone, Utc};
    use gridval_algo::{run_pipeline, IntervalObservation, ScoreWindow};
    use gridval_core::{GridLevel, ScoringConfig};
    use tempfile::TempDir;

    fn observations(congestion: f64) -> Vec<IntervalObservation> {
        let start = Utc.with_ymd_and_hms(2024, 7, 1, 0, 0, 0).unwrap();
        (0..6)
            .map(|h| IntervalObservation {
                level: GridLevel::Zone,
                entity_id: "PECO".into(),
                hour: start + Duration::hours(h),
                congestion_component: Some(congestion),
                loading_pct: None,
            })
            .collect()
    }

    fn window() -> ScoreWindow {
        let start = Utc.with_ymd_and_hms(2024, 7, 1, 0, 0, 0).unwrap();
        ScoreWindow::new(start, start + Duration::hours(24)).unwrap()
    }

    #[test]
    fn saved_generations_reload_with_same_ids() {
        let dir = TempDir::new().unwrap();
        let disk = RunStore::open(dir.path()).unwrap();
        let store = ScoreStore::new();
        let config = ScoringConfig::default();

        for c in [0.5, 4.0] {
            let run = run_pipeline(&store, &observations(c), window(), &config).unwrap();
            disk.save_generation(&store.generation(run.id).unwrap()).unwrap();
        }
        assert_eq!(disk.latest_pointer().unwrap(), Some(RunId::new(2)));

        let reloaded = disk.load().unwrap();
        assert_eq!(reloaded.latest_run_id(), Some(RunId::new(2)));
        let first = reloaded
            .score_for(RunId::new(1), GridLevel::Zone, "PECO")
            .unwrap()
            .unwrap();
        assert_eq!(first.congestion_score, Some(0.0));
        let second = reloaded
            .score_for(RunId::new(2), GridLevel::Zone, "PECO")
            .unwrap()
            .unwrap();
        assert_eq!(second.congestion_score, Some(1.0));
    }

    #[test]
    fn second_writer_is_refused_until_lock_released() {
        let dir = TempDir::new().unwrap();
        let disk = RunStore::open(dir.path()).unwrap();
        let held = disk.lock().unwrap();
        let err = disk.lock().unwrap_err();
        assert!(format!("{err:#}").contains("locked by another writer"));
        drop(held);
        assert!(!dir.path().join("LOCK").exists());
        disk.lock().unwrap();
    }

    #[test]
    fn existing_run_id_is_never_overwritten() {
        let dir = TempDir::new().unwrap();
        let disk = RunStore::open(dir.path()).unwrap();

        // two writers that loaded the same empty store both allocate run 1
        let first = ScoreStore::new();
        let run = run_pipeline(&first, &observations(0.5), window(), &ScoringConfig::default())
            .unwrap();
        disk.save_generation(&first.generation(run.id).unwrap()).unwrap();

        let second = ScoreStore::new();
        let run = run_pipeline(&second, &observations(4.0), window(), &ScoringConfig::default())
            .unwrap();
        let err = disk
            .save_generation(&second.generation(run.id).unwrap())
            .unwrap_err();
        assert!(err.to_string().contains("already exists"));

        let reloaded = disk.load().unwrap();
        let kept = reloaded
            .score_for(RunId::new(1), GridLevel::Zone, "PECO")
            .unwrap()
            .unwrap();
        assert_eq!(kept.congestion_score, Some(0.0));
    }

    #[test]
    fn empty_directory_loads_empty_store() {
        let dir = TempDir::new().unwrap();
        let store = RunStore::open(dir.path().join("runs")).unwrap().load().unwrap();
        assert!(store.latest().is_none());
        assert!(store.runs().is_empty());
    }

    #[test]
    fn unpublished_and_incomplete_runs_are_ignored() {
        let dir = TempDir::new().unwrap();
        let disk = RunStore::open(dir.path()).unwrap();
        let store = ScoreStore::new();
        let run = run_pipeline(&store, &observations(2.0), window(), &ScoringConfig::default())
            .unwrap();
        disk.save_generation(&store.generation(run.id).unwrap()).unwrap();

        // run 2 metadata written but LATEST never flipped
        let mut orphan = run.clone();
        orphan.id = RunId::new(2);
        fs::write(
            dir.path().join("run-2.json"),
            serde_json::to_string(&orphan).unwrap(),
        )
        .unwrap();
        // records with no completed metadata
        fs::write(dir.path().join("run-3.jsonl"), "").unwrap();

        let reloaded = disk.load().unwrap();
        let ids: Vec<RunId> = reloaded.runs().iter().map(|r| r.id).collect();
        assert_eq!(ids, vec![RunId::new(1)]);
        assert_eq!(reloaded.latest_run_id(), Some(RunId::new(1)));
        assert!(!dir.path().join(".LATEST.tmp").exists());
    }
}
