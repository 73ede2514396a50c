//! Hourly interval CSV.
//!
//! ```text
//! level,entity_id,hour,congestion_component,loading_pct
//! zone,PECO,2024-07-01T12:00:00Z,14.2,
//! substation,PECO-0142,2024-07-01T12:00:00Z,,86.5
//! ```
//!
//! `hour` is RFC 3339 and is snapped to the start of its hour on read. Rows
//! for an entity-hour that already appeared replace the earlier row when
//! scored or stored. Either metric may be empty.

use std::path::Path;

use anyhow::Result;
use chrono::{DateTime, Utc};
use gridval_algo::{floor_hour, InMemoryIntervalStore, IntervalObservation};
use gridval_core::{GridLevel, LoadDiagnostics};
use serde::Deserialize;
use tracing::info;

use crate::rows::read_rows;

#[derive(Debug, Deserialize)]
struct IntervalRow {
    level: String,
    entity_id: String,
    hour: DateTime<Utc>,
    #[serde(default)]
    congestion_component: Option<f64>,
    #[serde(default)]
    loading_pct: Option<f64>,
}

fn finite(value: Option<f64>) -> bool {
    value.map_or(true, f64::is_finite)
}

/// Parse every valid row of an interval CSV, in file order.
pub fn read_observations(path: &Path) -> Result<(Vec<IntervalObservation>, LoadDiagnostics)> {
    let mut diag = LoadDiagnostics::new();
    let rows: Vec<(usize, IntervalRow)> = read_rows(path, "intervals", &mut diag)?;
    let mut out = Vec::with_capacity(rows.len());
    for (line, row) in rows {
        let level: GridLevel = match row.level.parse() {
            Ok(level) => level,
            Err(msg) => {
                diag.skip_row("intervals", &msg, line);
                continue;
            }
        };
        if row.entity_id.is_empty() {
            diag.skip_row("intervals", "empty entity_id", line);
            continue;
        }
        if !finite(row.congestion_component) || !finite(row.loading_pct) {
            diag.skip_row("intervals", "non-finite metric value", line);
            continue;
        }
        out.push(IntervalObservation {
            level,
            entity_id: row.entity_id,
            hour: floor_hour(row.hour),
            congestion_component: row.congestion_component,
            loading_pct: row.loading_pct,
        });
    }
    info!(
        path = %path.display(),
        observations = out.len(),
        skipped = diag.stats.skipped_rows,
        "read interval data"
    );
    Ok((out, diag))
}

/// Load an interval CSV into an in-memory store.
pub fn load_intervals(path: &Path) -> Result<(InMemoryIntervalStore, LoadDiagnostics)> {
    let (observations, diag) = read_observations(path)?;
    Ok((InMemoryIntervalStore::from_observations(observations), diag))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use gridval_algo::{score_observations, IntervalStore, ScoreWindow};
    use gridval_core::{RunId, ScoringConfig};
    use std::fs;
    use tempfile::NamedTempFile;

    #[test]
    fn parses_levels_and_optional_metrics() {
        let file = NamedTempFile::new().unwrap();
        fs::write(
            file.path(),
            "level,entity_id,hour,congestion_component,loading_pct\n\
             zone,PECO,2024-07-01T12:00:00Z,14.2,\n\
             substation,PECO-0142,2024-07-01T12:30:00Z,,86.5\n\
             region,X,2024-07-01T12:00:00Z,1,\n\
             zone,PECO,not-a-time,1,\n",
        )
        .unwrap();

        let (store, diag) = load_intervals(file.path()).unwrap();
        assert_eq!(store.len(), 2);
        assert_eq!(diag.stats.skipped_rows, 2);

        let noon = Utc.with_ymd_and_hms(2024, 7, 1, 12, 0, 0).unwrap();
        let sub = store
            .observations(
                GridLevel::Substation,
                "PECO-0142",
                noon,
                noon + chrono::Duration::hours(1),
            )
            .unwrap();
        assert_eq!(sub.len(), 1);
        assert_eq!(sub[0].hour, noon);
        assert_eq!(sub[0].loading_pct, Some(86.5));
        assert_eq!(sub[0].congestion_component, None);
    }

    #[test]
    fn quarter_hour_rows_score_like_the_store() {
        let file = NamedTempFile::new().unwrap();
        fs::write(
            file.path(),
            "level,entity_id,hour,congestion_component,loading_pct\n\
             zone,PECO,2024-07-01T12:00:00Z,5,\n\
             zone,PECO,2024-07-01T12:15:00Z,5,\n\
             zone,PECO,2024-07-01T12:30:00Z,5,\n\
             zone,PECO,2024-07-01T12:45:00Z,5,\n\
             zone,PECO,2024-07-01T13:00:00Z,0.1,\n",
        )
        .unwrap();

        let (observations, _) = read_observations(file.path()).unwrap();
        let noon = Utc.with_ymd_and_hms(2024, 7, 1, 12, 0, 0).unwrap();
        assert!(observations.iter().all(|o| o.hour == floor_hour(o.hour)));

        let window = ScoreWindow::new(noon, noon + chrono::Duration::hours(2)).unwrap();
        let records =
            score_observations(RunId::new(1), &observations, window, &ScoringConfig::default());
        assert_eq!(records[0].observed_hours, 2);
        assert_eq!(records[0].congestion_score, Some(0.5));

        let store = InMemoryIntervalStore::from_observations(observations);
        assert_eq!(store.len(), 2);
    }
}
