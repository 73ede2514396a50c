//! Append-only, versioned score store.
//!
//! Each pipeline run becomes an immutable [`ScoreGeneration`]. A single
//! [`RunWriter`] at a time buffers records privately. [`RunWriter::commit`] first
//! appends the finished generation and then flips the latest-completed pointer,
//! so readers never observe a partially written run. Failed and in-progress runs
//! stay visible in [`ScoreStore::runs`] but are never selectable as latest.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use chrono::Utc;
use gridval_core::{
    GridLevel, GridvalError, GridvalResult, PipelineRun, RunId, RunStatus, ScoreRecord,
    ScoringConfig,
};
use parking_lot::RwLock;
use tracing::{info, warn};

use crate::scoring::ScoreWindow;

/// Every record of one completed run.
#[derive(Debug, Clone)]
pub struct ScoreGeneration {
    run: PipelineRun,
    records: BTreeMap<(GridLevel, String), ScoreRecord>,
}

impl ScoreGeneration {
    /// Reassemble a completed generation (used when loading a persisted store).
    pub fn from_parts(run: PipelineRun, records: Vec<ScoreRecord>) -> GridvalResult<Self> {
        if run.status != RunStatus::Completed {
            return Err(GridvalError::PipelineRunNotFound(run.id.value()));
        }
        let mut map = BTreeMap::new();
        for record in records {
            if record.pipeline_run_id != run.id {
                return Err(GridvalError::Parse(format!(
                    "record for {} {} belongs to run {}, not {}",
                    record.level, record.entity_id, record.pipeline_run_id, run.id
                )));
            }
            map.insert((record.level, record.entity_id.clone()), record);
        }
        Ok(Self { run, records: map })
    }

    pub fn run(&self) -> &PipelineRun {
        &self.run
    }

    pub fn id(&self) -> RunId {
        self.run.id
    }

    pub fn get(&self, level: GridLevel, entity_id: &str) -> Option<&ScoreRecord> {
        self.records.get(&(level, entity_id.to_string()))
    }

    /// Records in (level, entity) order.
    pub fn records(&self) -> impl Iterator<Item = &ScoreRecord> {
        self.records.values()
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

#[derive(Default)]
struct StoreState {
    runs: BTreeMap<RunId, PipelineRun>,
    generations: BTreeMap<RunId, Arc<ScoreGeneration>>,
    next_id: u64,
}

pub struct ScoreStore {
    state: RwLock<StoreState>,
    latest: RwLock<Option<Arc<ScoreGeneration>>>,
    writer_open: AtomicBool,
}

impl Default for ScoreStore {
    fn default() -> Self {
        Self::new()
    }
}

impl ScoreStore {
    pub fn new() -> Self {
        Self {
            state: RwLock::new(StoreState {
                next_id: 1,
                ..Default::default()
            }),
            latest: RwLock::new(None),
            writer_open: AtomicBool::new(false),
        }
    }

    /// Rebuild a store from persisted generations and any non-completed run
    /// metadata. The latest pointer is the highest completed run.
    pub fn restore(generations: Vec<ScoreGeneration>, other_runs: Vec<PipelineRun>) -> Self {
        let mut state = StoreState::default();
        for run in other_runs {
            state.runs.insert(run.id, run);
        }
        for generation in generations {
            let id = generation.id();
            state.runs.insert(id, generation.run.clone());
            state.generations.insert(id, Arc::new(generation));
        }
        state.next_id = state
            .runs
            .keys()
            .next_back()
            .map_or(1, |id| id.value() + 1);
        let latest = state.generations.values().next_back().cloned();
        Self {
            state: RwLock::new(state),
            latest: RwLock::new(latest),
            writer_open: AtomicBool::new(false),
        }
    }

    /// Start a new run. Fails while another writer is open.
    pub fn begin_run(
        &self,
        window: ScoreWindow,
        config: &ScoringConfig,
    ) -> GridvalResult<RunWriter<'_>> {
        if self
            .writer_open
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return Err(GridvalError::DataUnavailable(
                "another pipeline run is in progress".to_string(),
            ));
        }

        let mut state = self.state.write();
        let id = RunId::new(state.next_id);
        state.next_id += 1;
        let run = PipelineRun {
            id,
            status: RunStatus::InProgress,
            window_start: window.start,
            window_end: window.end,
            started_at: Utc::now(),
            finished_at: None,
            congestion_weight: config.congestion_weight,
            loading_weight: config.loading_weight,
            record_count: 0,
            failure_reason: None,
        };
        state.runs.insert(id, run.clone());
        info!(run = %id, "pipeline run started");

        Ok(RunWriter {
            store: self,
            run,
            records: BTreeMap::new(),
            finished: false,
        })
    }

    /// Highest completed run id.
    pub fn latest_run_id(&self) -> Option<RunId> {
        self.latest.read().as_ref().map(|g| g.id())
    }

    pub fn latest(&self) -> Option<Arc<ScoreGeneration>> {
        self.latest.read().clone()
    }

    /// A completed generation by id.
    pub fn generation(&self, run_id: RunId) -> GridvalResult<Arc<ScoreGeneration>> {
        self.state
            .read()
            .generations
            .get(&run_id)
            .cloned()
            .ok_or(GridvalError::PipelineRunNotFound(run_id.value()))
    }

    /// Pinned run if given, else the latest completed one.
    pub fn generation_or_latest(
        &self,
        run_id: Option<RunId>,
    ) -> GridvalResult<Arc<ScoreGeneration>> {
        match run_id {
            Some(id) => self.generation(id),
            None => self.latest().ok_or(GridvalError::NoCompletedRun),
        }
    }

    /// `Ok(None)` when the run exists but has no record for the entity.
    pub fn score_for(
        &self,
        run_id: RunId,
        level: GridLevel,
        entity_id: &str,
    ) -> GridvalResult<Option<ScoreRecord>> {
        Ok(self.generation(run_id)?.get(level, entity_id).cloned())
    }

    /// Metadata for every run ever started, in id order.
    pub fn runs(&self) -> Vec<PipelineRun> {
        self.state.read().runs.values().cloned().collect()
    }

    pub fn run(&self, run_id: RunId) -> Option<PipelineRun> {
        self.state.read().runs.get(&run_id).cloned()
    }

    fn finish(&self, run: PipelineRun, generation: Option<Arc<ScoreGeneration>>) {
        {
            let mut state = self.state.write();
            state.runs.insert(run.id, run);
            if let Some(generation) = &generation {
                state.generations.insert(generation.id(), generation.clone());
            }
        }
        if let Some(generation) = generation {
            let mut latest = self.latest.write();
            if latest.as_ref().map_or(true, |cur| cur.id() < generation.id()) {
                *latest = Some(generation);
            }
        }
        self.writer_open.store(false, Ordering::Release);
    }
}

/// Exclusive writer for one in-progress run.
pub struct RunWriter<'a> {
    store: &'a ScoreStore,
    run: PipelineRun,
    records: BTreeMap<(GridLevel, String), ScoreRecord>,
    finished: bool,
}

impl RunWriter<'_> {
    pub fn run_id(&self) -> RunId {
        self.run.id
    }

    /// Buffer a record. Records are immutable, so a duplicate key is rejected.
    pub fn push(&mut self, record: ScoreRecord) -> GridvalResult<()> {
        if record.pipeline_run_id != self.run.id {
            return Err(GridvalError::Other(format!(
                "record tagged with run {} pushed to run {}",
                record.pipeline_run_id, self.run.id
            )));
        }
        let key = (record.level, record.entity_id.clone());
        if self.records.contains_key(&key) {
            return Err(GridvalError::Other(format!(
                "duplicate score record for {} {} in run {}",
                key.0, key.1, self.run.id
            )));
        }
        self.records.insert(key, record);
        Ok(())
    }

    /// Publish the run and make it the latest completed run.
    pub fn commit(mut self) -> GridvalResult<Arc<ScoreGeneration>> {
        self.finished = true;
        let mut run = self.run.clone();
        run.status = RunStatus::Completed;
        run.finished_at = Some(Utc::now());
        run.record_count = self.records.len();

        let generation = Arc::new(ScoreGeneration {
            run: run.clone(),
            records: std::mem::take(&mut self.records),
        });
        self.store.finish(run, Some(generation.clone()));
        info!(
            run = %generation.id(),
            records = generation.len(),
            "pipeline run committed; latest pointer flipped"
        );
        Ok(generation)
    }

    pub fn fail(mut self, reason: &str) {
        self.mark_failed(reason);
    }

    fn mark_failed(&mut self, reason: &str) {
        self.finished = true;
        let mut run = self.run.clone();
        run.status = RunStatus::Failed;
        run.finished_at = Some(Utc::now());
        run.failure_reason = Some(reason.to_string());
        warn!(run = %run.id, reason, "pipeline run failed");
        self.store.finish(run, None);
    }
}

impl Drop for RunWriter<'_> {
    fn drop(&mut self) {
        if !self.finished {
            self.mark_failed("writer dropped before commit");
        }
    }
}
