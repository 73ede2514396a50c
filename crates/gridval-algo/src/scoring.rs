//! Congestion and loading scoring over hourly interval data.
//!
//! A pipeline run folds every [`IntervalObservation`] in a fixed window into one
//! [`HourlyAccumulator`] per (level, entity), then turns each accumulator into a
//! [`ScoreRecord`]. Accumulators merge associatively, so the retrospective path
//! can aggregate per-day chunks in parallel and reduce them in a fixed order.

use std::collections::BTreeMap;

use chrono::{DateTime, Duration, DurationRound, Timelike, Utc};
use gridval_core::{
    GridLevel, GridvalError, GridvalResult, PipelineRun, RunId, ScoreRecord, ScoringConfig,
    HOURS_PER_DAY,
};
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::store::ScoreStore;

/// One hour of measured data for one entity. Either metric may be missing.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IntervalObservation {
    pub level: GridLevel,
    pub entity_id: String,
    /// Start of the hour, UTC
    pub hour: DateTime<Utc>,
    /// Congestion component of the locational price, $/MWh
    pub congestion_component: Option<f64>,
    /// Loading as percent of rating
    pub loading_pct: Option<f64>,
}

/// Half-open UTC window `[start, end)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScoreWindow {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

impl ScoreWindow {
    pub fn new(start: DateTime<Utc>, end: DateTime<Utc>) -> GridvalResult<Self> {
        if start < end {
            Ok(Self { start, end })
        } else {
            Err(GridvalError::InvalidInterval { start, end })
        }
    }

    pub fn contains(&self, t: DateTime<Utc>) -> bool {
        self.start <= t && t < self.end
    }

    /// Every hour start in `[floor(start), end)`.
    pub fn hours(&self) -> Vec<DateTime<Utc>> {
        let mut hour = floor_hour(self.start);
        let mut hours = Vec::new();
        while hour < self.end {
            hours.push(hour);
            hour += Duration::hours(1);
        }
        hours
    }
}

/// Truncate a timestamp to the start of its hour.
pub fn floor_hour(t: DateTime<Utc>) -> DateTime<Utc> {
    t.duration_trunc(Duration::hours(1)).unwrap_or(t)
}

/// Running totals for one entity.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct HourlyAccumulator {
    pub observed_hours: u32,
    pub congestion_hours: u32,
    pub congestion_binding: u32,
    pub congestion_sum: f64,
    pub loading_hours: u32,
    pub loading_binding: u32,
    pub peak_loading_pct: Option<f64>,
    pub constrained_hours: u32,
    pub constrained_hour_profile: [u32; HOURS_PER_DAY],
}

impl HourlyAccumulator {
    pub fn observe(&mut self, obs: &IntervalObservation, config: &ScoringConfig) {
        self.observed_hours += 1;
        let mut binding = false;

        if let Some(c) = obs.congestion_component.filter(|c| c.is_finite()) {
            self.congestion_hours += 1;
            self.congestion_sum += c;
            if c.abs() >= config.binding_congestion_usd_per_mwh {
                self.congestion_binding += 1;
                binding = true;
            }
        }
        if let Some(l) = obs.loading_pct.filter(|l| l.is_finite()) {
            self.loading_hours += 1;
            self.peak_loading_pct = Some(self.peak_loading_pct.map_or(l, |p| p.max(l)));
            if l >= config.loading_threshold_pct {
                self.loading_binding += 1;
                binding = true;
            }
        }
        if binding {
            self.constrained_hours += 1;
            self.constrained_hour_profile[obs.hour.hour() as usize] += 1;
        }
    }

    pub fn merge(&mut self, other: &HourlyAccumulator) {
        self.observed_hours += other.observed_hours;
        self.congestion_hours += other.congestion_hours;
        self.congestion_binding += other.congestion_binding;
        self.congestion_sum += other.congestion_sum;
        self.loading_hours += other.loading_hours;
        self.loading_binding += other.loading_binding;
        self.peak_loading_pct = match (self.peak_loading_pct, other.peak_loading_pct) {
            (Some(a), Some(b)) => Some(a.max(b)),
            (a, b) => a.or(b),
        };
        self.constrained_hours += other.constrained_hours;
        for (mine, theirs) in self
            .constrained_hour_profile
            .iter_mut()
            .zip(other.constrained_hour_profile.iter())
        {
            *mine += theirs;
        }
    }

    pub fn congestion_score(&self) -> Option<f64> {
        ratio(self.congestion_binding, self.congestion_hours)
    }

    pub fn loading_score(&self) -> Option<f64> {
        ratio(self.loading_binding, self.loading_hours)
    }

    pub fn into_record(
        self,
        run_id: RunId,
        level: GridLevel,
        entity_id: impl Into<String>,
        window: ScoreWindow,
        config: &ScoringConfig,
    ) -> ScoreRecord {
        let congestion_score = self.congestion_score();
        let loading_score = self.loading_score();
        let combined_score = config.combine(congestion_score, loading_score);
        ScoreRecord {
            pipeline_run_id: run_id,
            level,
            entity_id: entity_id.into(),
            congestion_score,
            loading_score,
            combined_score,
            constraint_tier: config.tier_for(combined_score),
            period_start: window.start,
            period_end: window.end,
            observed_hours: self.observed_hours,
            constrained_hours: self.constrained_hours,
            constrained_hour_profile: self.constrained_hour_profile,
            avg_congestion_component: (self.congestion_hours > 0)
                .then(|| self.congestion_sum / self.congestion_hours as f64),
            peak_loading_pct: self.peak_loading_pct,
        }
    }
}

fn ratio(num: u32, den: u32) -> Option<f64> {
    (den > 0).then(|| num as f64 / den as f64)
}

/// Group in-window observations by (level, entity). Ordered for deterministic output.
///
/// Timestamps are snapped to the hour and each entity-hour counts once; a later
/// observation for the same hour replaces an earlier one, as in
/// [`InMemoryIntervalStore::insert`](crate::InMemoryIntervalStore::insert).
pub fn accumulate<'a>(
    observations: impl IntoIterator<Item = &'a IntervalObservation>,
    window: ScoreWindow,
    config: &ScoringConfig,
) -> BTreeMap<(GridLevel, String), HourlyAccumulator> {
    let mut hourly: BTreeMap<(GridLevel, String), BTreeMap<DateTime<Utc>, &IntervalObservation>> =
        BTreeMap::new();
    for obs in observations {
        let hour = floor_hour(obs.hour);
        if !window.contains(hour) {
            continue;
        }
        hourly
            .entry((obs.level, obs.entity_id.clone()))
            .or_default()
            .insert(hour, obs);
    }
    hourly
        .into_iter()
        .map(|(key, hours)| {
            let mut acc = HourlyAccumulator::default();
            for obs in hours.into_values() {
                acc.observe(obs, config);
            }
            (key, acc)
        })
        .collect()
}

/// Score records for one run, one per (level, entity) present in the window.
pub fn score_observations(
    run_id: RunId,
    observations: &[IntervalObservation],
    window: ScoreWindow,
    config: &ScoringConfig,
) -> Vec<ScoreRecord> {
    accumulate(observations, window, config)
        .into_iter()
        .map(|((level, entity_id), acc)| acc.into_record(run_id, level, entity_id, window, config))
        .collect()
}

/// Run a complete scoring batch and publish it as the latest completed run.
///
/// The run is recorded as failed if any record is rejected, and readers never
/// see it until the commit succeeds.
pub fn run_pipeline(
    store: &ScoreStore,
    observations: &[IntervalObservation],
    window: ScoreWindow,
    config: &ScoringConfig,
) -> GridvalResult<PipelineRun> {
    let mut writer = store.begin_run(window, config)?;
    let run_id = writer.run_id();
    info!(run = %run_id, observations = observations.len(), "scoring pipeline run");

    let records = score_observations(run_id, observations, window, config);
    if records.is_empty() {
        let reason = format!(
            "no interval observations in window {} .. {}",
            window.start, window.end
        );
        writer.fail(&reason);
        return Err(GridvalError::DataUnavailable(reason));
    }
    for record in records {
        writer.push(record)?;
    }
    let generation = writer.commit()?;
    Ok(generation.run().clone())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn hour(h: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 7, 1, 0, 0, 0).unwrap() + Duration::hours(h as i64)
    }

    fn obs(
        level: GridLevel,
        id: &str,
        h: u32,
        c: Option<f64>,
        l: Option<f64>,
    ) -> IntervalObservation {
        IntervalObservation {
            level,
            entity_id: id.into(),
            hour: hour(h),
            congestion_component: c,
            loading_pct: l,
        }
    }

    fn window() -> ScoreWindow {
        ScoreWindow::new(hour(0), hour(48)).unwrap()
    }

    #[test]
    fn window_rejects_reversed_bounds() {
        assert!(matches!(
            ScoreWindow::new(hour(5), hour(5)),
            Err(GridvalError::InvalidInterval { .. })
        ));
    }

    #[test]
    fn window_hours_start_at_floor() {
        let w = ScoreWindow::new(hour(1) + Duration::minutes(30), hour(4)).unwrap();
        assert_eq!(w.hours(), vec![hour(1), hour(2), hour(3)]);
    }

    #[test]
    fn scores_are_binding_hour_fractions() {
        let config = ScoringConfig::default();
        let observations = vec![
            obs(GridLevel::Zone, "PECO", 14, Some(12.0), None),
            obs(GridLevel::Zone, "PECO", 15, Some(-3.0), None),
            obs(GridLevel::Zone, "PECO", 16, Some(0.2), None),
            obs(GridLevel::Zone, "PECO", 17, Some(0.0), None),
        ];
        let records = score_observations(RunId::new(1), &observations, window(), &config);
        assert_eq!(records.len(), 1);
        let r = &records[0];
        assert_eq!(r.congestion_score, Some(0.5));
        assert_eq!(r.loading_score, None);
        assert_eq!(r.combined_score, Some(0.5));
        assert_eq!(r.constrained_hours, 2);
        assert_eq!(r.constrained_hour_profile[14], 1);
        assert_eq!(r.constrained_hour_profile[15], 1);
        assert!((r.avg_congestion_component.unwrap() - 2.3).abs() < 1e-12);
    }

    #[test]
    fn loading_and_congestion_blend() {
        let config = ScoringConfig::default();
        let observations = vec![
            obs(GridLevel::Substation, "S1", 1, Some(5.0), Some(85.0)),
            obs(GridLevel::Substation, "S1", 2, Some(0.0), Some(60.0)),
        ];
        let r = &score_observations(RunId::new(1), &observations, window(), &config)[0];
        assert_eq!(r.congestion_score, Some(0.5));
        assert_eq!(r.loading_score, Some(0.5));
        assert!((r.combined_score.unwrap() - 0.5).abs() < 1e-12);
        assert_eq!(r.peak_loading_pct, Some(85.0));
        // one hour binding on both metrics counts once
        assert_eq!(r.constrained_hours, 1);
    }

    #[test]
    fn out_of_window_observations_are_ignored() {
        let config = ScoringConfig::default();
        let observations = vec![obs(GridLevel::Zone, "PECO", 60, Some(50.0), None)];
        assert!(score_observations(RunId::new(1), &observations, window(), &config).is_empty());
    }

    #[test]
    fn sub_hourly_rows_count_once_per_hour() {
        let config = ScoringConfig::default();
        let mut observations: Vec<_> = [0, 15, 30, 45]
            .iter()
            .map(|m| IntervalObservation {
                hour: hour(12) + Duration::minutes(*m),
                ..obs(GridLevel::Zone, "PECO", 12, Some(5.0), None)
            })
            .collect();
        observations.push(obs(GridLevel::Zone, "PECO", 13, Some(0.1), None));

        let r = &score_observations(RunId::new(1), &observations, window(), &config)[0];
        assert_eq!(r.observed_hours, 2);
        assert_eq!(r.constrained_hours, 1);
        assert_eq!(r.constrained_hour_profile[12], 1);
        assert_eq!(r.congestion_score, Some(0.5));
    }

    #[test]
    fn later_row_for_same_hour_wins() {
        let config = ScoringConfig::default();
        let observations = vec![
            obs(GridLevel::Zone, "PECO", 5, Some(9.0), None),
            obs(GridLevel::Zone, "PECO", 5, Some(0.0), None),
        ];
        let r = &score_observations(RunId::new(1), &observations, window(), &config)[0];
        assert_eq!(r.observed_hours, 1);
        assert_eq!(r.congestion_score, Some(0.0));
        assert_eq!(r.avg_congestion_component, Some(0.0));
    }

    #[test]
    fn merge_matches_single_pass() {
        let config = ScoringConfig::default();
        let observations: Vec<_> = (0..48)
            .map(|h| obs(GridLevel::Zone, "Z", h, Some((h % 5) as f64), Some(70.0 + h as f64)))
            .collect();
        let mut whole = HourlyAccumulator::default();
        observations.iter().for_each(|o| whole.observe(o, &config));

        let mut first = HourlyAccumulator::default();
        let mut second = HourlyAccumulator::default();
        observations[..24].iter().for_each(|o| first.observe(o, &config));
        observations[24..].iter().for_each(|o| second.observe(o, &config));
        first.merge(&second);
        assert_eq!(first, whole);
    }

    #[test]
    fn run_pipeline_publishes_latest() {
        let store = ScoreStore::new();
        let observations = vec![obs(GridLevel::Zone, "PECO", 3, Some(4.0), None)];
        let run = run_pipeline(&store, &observations, window(), &ScoringConfig::default()).unwrap();
        assert_eq!(store.latest_run_id(), Some(run.id));
        assert_eq!(run.record_count, 1);
        let rec = store
            .score_for(run.id, GridLevel::Zone, "PECO")
            .unwrap()
            .unwrap();
        assert_eq!(rec.congestion_score, Some(1.0));
    }

    #[test]
    fn empty_pipeline_run_fails_and_is_not_latest() {
        let store = ScoreStore::new();
        let err = run_pipeline(&store, &[], window(), &ScoringConfig::default()).unwrap_err();
        assert!(matches!(err, GridvalError::DataUnavailable(_)));
        assert_eq!(store.latest_run_id(), None);
        assert_eq!(store.runs()[0].status, gridval_core::RunStatus::Failed);
    }
}
