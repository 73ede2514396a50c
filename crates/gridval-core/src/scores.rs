//! Versioned congestion and loading scores.
//!
//! Every pipeline run produces a new generation of [`ScoreRecord`]s keyed by
//! `(pipeline_run_id, level, entity_id)`. Records are never mutated after a run
//! is written, which is what lets a retrospective computation be pinned to a
//! historical run and reproduced exactly.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

pub const HOURS_PER_DAY: usize = 24;

/// Hierarchy level a score or entity belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GridLevel {
    Zone,
    Substation,
    Feeder,
    Pnode,
}

impl GridLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            GridLevel::Zone => "zone",
            GridLevel::Substation => "substation",
            GridLevel::Feeder => "feeder",
            GridLevel::Pnode => "pnode",
        }
    }
}

impl fmt::Display for GridLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for GridLevel {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "zone" => Ok(GridLevel::Zone),
            "substation" => Ok(GridLevel::Substation),
            "feeder" => Ok(GridLevel::Feeder),
            "pnode" | "pricing_node" => Ok(GridLevel::Pnode),
            other => Err(format!("unknown grid level '{other}'")),
        }
    }
}

/// Pipeline run identifier; strictly increasing across runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RunId(u64);

impl RunId {
    #[inline]
    pub fn new(value: u64) -> Self {
        RunId(value)
    }
    #[inline]
    pub fn value(&self) -> u64 {
        self.0
    }
    #[inline]
    pub fn next(&self) -> Self {
        RunId(self.0 + 1)
    }
}

impl fmt::Display for RunId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    InProgress,
    Completed,
    Failed,
}

impl RunStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            RunStatus::InProgress => "in_progress",
            RunStatus::Completed => "completed",
            RunStatus::Failed => "failed",
        }
    }
}

/// Metadata for one scoring batch over a fixed historical window.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineRun {
    pub id: RunId,
    pub status: RunStatus,
    pub window_start: DateTime<Utc>,
    pub window_end: DateTime<Utc>,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
    /// Blend weights used for `combined_score` in this run
    pub congestion_weight: f64,
    pub loading_weight: f64,
    pub record_count: usize,
    pub failure_reason: Option<String>,
}

/// Categorical bucketing of `combined_score`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConstraintTier {
    Unscored,
    Low,
    Moderate,
    Elevated,
    Critical,
}

impl ConstraintTier {
    /// Tiers counted as "constrained" in portfolio summaries.
    pub fn is_constrained(&self) -> bool {
        matches!(self, ConstraintTier::Elevated | ConstraintTier::Critical)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ConstraintTier::Unscored => "unscored",
            ConstraintTier::Low => "low",
            ConstraintTier::Moderate => "moderate",
            ConstraintTier::Elevated => "elevated",
            ConstraintTier::Critical => "critical",
        }
    }
}

/// Score for one entity in one pipeline run. Immutable once written.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScoreRecord {
    pub pipeline_run_id: RunId,
    pub level: GridLevel,
    pub entity_id: String,
    /// Share of hours with binding congestion, in [0, 1]
    pub congestion_score: Option<f64>,
    /// Share of hours above the loading threshold, in [0, 1]
    pub loading_score: Option<f64>,
    pub combined_score: Option<f64>,
    pub constraint_tier: ConstraintTier,
    pub period_start: DateTime<Utc>,
    pub period_end: DateTime<Utc>,
    pub observed_hours: u32,
    pub constrained_hours: u32,
    /// Constrained hours bucketed by UTC hour of day
    pub constrained_hour_profile: [u32; HOURS_PER_DAY],
    /// Mean congestion component of the locational price, $/MWh
    pub avg_congestion_component: Option<f64>,
    pub peak_loading_pct: Option<f64>,
}
