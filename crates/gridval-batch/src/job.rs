use chrono::{DateTime, Utc};
use gridval_core::DerAsset;
use serde::{Deserialize, Serialize};

/// What each job computes for its asset.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum TaskKind {
    /// Forward-looking value against the pinned or latest run
    Prospective,
    /// Realised value over a historical interval
    Retrospective {
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    },
}

impl TaskKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            TaskKind::Prospective => "prospective",
            TaskKind::Retrospective { .. } => "retrospective",
        }
    }
}

#[derive(Debug, Clone)]
pub struct BatchJob {
    pub job_id: String,
    pub asset: DerAsset,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Ok,
    Error,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatchJobRecord {
    pub job_id: String,
    pub asset_id: String,
    pub der_type: String,
    pub status: JobStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub value_per_kw_year: Option<f64>,
}

/// One job per asset, identified as `<task>:<asset_id>`.
pub fn jobs_from_assets(assets: &[DerAsset], task: TaskKind) -> Vec<BatchJob> {
    assets
        .iter()
        .map(|asset| BatchJob {
            job_id: format!("{}:{}", task.as_str(), asset.asset_id),
            asset: asset.clone(),
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use gridval_core::{AssetId, GeoPoint, Megawatts};

    #[test]
    fn jobs_from_assets_builds_identifiers() {
        let assets = vec![DerAsset {
            asset_id: AssetId::new("A1"),
            location: GeoPoint::new(39.95, -75.16),
            der_type: "solar".into(),
            capacity_mw: Megawatts(2.0),
        }];
        let jobs = jobs_from_assets(&assets, TaskKind::Prospective);
        assert_eq!(jobs.len(), 1);
        assert_eq!(jobs[0].job_id, "prospective:A1");
    }
}
