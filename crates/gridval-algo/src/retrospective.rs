//! Retrospective valuation over a closed, measured interval.
//!
//! The zone's period-average score from the pinned run is replaced by a score
//! measured over `[floor(start), end)`. Every hour of that interval must carry
//! backing data for the resolved zone, or the request fails with
//! `IntervalDataUnavailable`; nothing is interpolated. The interval is split
//! into calendar-day chunks that are aggregated in parallel and merged in date
//! order, so the result does not depend on scheduling.

use std::collections::{BTreeMap, BTreeSet};

use chrono::{DateTime, NaiveDate, Utc};
use gridval_core::{
    DerAsset, GeoContext, GridLevel, GridvalError, GridvalResult, RetrospectiveValuation,
    ScoringConfig, HOURS_PER_DAY,
};
use rayon::prelude::*;
use tracing::debug;

use crate::intervals::IntervalStore;
use crate::scoring::{HourlyAccumulator, IntervalObservation, ScoreWindow};
use crate::store::ScoreGeneration;
use crate::valuation::{check_request, LevelScores, Valuator};

pub const HOURS_PER_YEAR: f64 = 8760.0;

/// Value an asset over `[start, end)` against a pinned score generation.
pub fn valuate_retrospective(
    valuator: &Valuator<'_>,
    intervals: &dyn IntervalStore,
    generation: &ScoreGeneration,
    asset: &DerAsset,
    ctx: &GeoContext,
    start: DateTime<Utc>,
    end: DateTime<Utc>,
) -> GridvalResult<RetrospectiveValuation> {
    let window = ScoreWindow::new(start, end)?;
    let config = valuator.config();
    let request = check_request(config, &asset.der_type, asset.capacity_mw.value())?;

    let zone_code = ctx.zone_code.as_ref().ok_or_else(|| {
        GridvalError::DataUnavailable(format!(
            "asset {} does not resolve to a zone; no interval data to measure",
            asset.asset_id
        ))
    })?;

    let hours = window.hours();
    let measured = ScoreWindow {
        start: hours.first().copied().unwrap_or(start),
        end,
    };
    let observations =
        intervals.observations(GridLevel::Zone, zone_code.as_str(), measured.start, end)?;
    require_full_coverage(zone_code.as_str(), &hours, &observations)?;

    let accumulator = aggregate_by_day(&observations, &config.scoring);
    let zone_record = accumulator.into_record(
        generation.id(),
        GridLevel::Zone,
        zone_code.as_str(),
        measured,
        &config.scoring,
    );
    debug!(
        asset = %asset.asset_id,
        zone = %zone_code,
        hours = hours.len(),
        constrained = zone_record.constrained_hours,
        "measured retrospective zone score"
    );

    let scores = LevelScores {
        zone: Some(&zone_record),
        ..LevelScores::lookup(generation, ctx)
    };
    let parts = valuator.components(ctx, &scores, request, generation.id());

    let interval_hours = hours.len() as u32;
    let value_per_kw_year = parts.value_per_kw_year();
    let actual_savings_mwh: f64 = (0..HOURS_PER_DAY)
        .map(|h| {
            zone_record.constrained_hour_profile[h] as f64
                * asset.capacity_mw.value()
                * request.profile.availability_at(h)
        })
        .sum();

    Ok(RetrospectiveValuation {
        asset_id: asset.asset_id.clone(),
        geo_context: ctx.clone(),
        der_type: asset.der_type.clone(),
        capacity_mw: asset.capacity_mw,
        pipeline_run_id: generation.id(),
        retrospective_start: start,
        retrospective_end: end,
        interval_hours,
        constrained_hours: zone_record.constrained_hours,
        actual_savings_mwh,
        value_breakdown: parts.breakdown,
        total_constraint_relief_value: parts.total() * interval_hours as f64 / HOURS_PER_YEAR,
        coincidence_factor: parts.coincidence_factor,
        effective_capacity_mw: parts.effective_capacity_mw,
        value_per_kw_year,
        value_tier: config.tiers.classify(value_per_kw_year),
        warnings: parts.warnings,
    })
}

/// Fail unless every hour has an observation with at least one metric.
fn require_full_coverage(
    zone_code: &str,
    hours: &[DateTime<Utc>],
    observations: &[IntervalObservation],
) -> GridvalResult<()> {
    let covered: BTreeSet<DateTime<Utc>> = observations
        .iter()
        .filter(|o| o.congestion_component.is_some() || o.loading_pct.is_some())
        .map(|o| o.hour)
        .collect();
    let missing: Vec<&DateTime<Utc>> = hours.iter().filter(|h| !covered.contains(*h)).collect();
    match missing.first() {
        None => Ok(()),
        Some(first) => Err(GridvalError::IntervalDataUnavailable {
            zone_code: zone_code.to_string(),
            missing_hours: missing.len(),
            first_missing: **first,
        }),
    }
}

fn aggregate_by_day(
    observations: &[IntervalObservation],
    config: &ScoringConfig,
) -> HourlyAccumulator {
    let mut days: BTreeMap<NaiveDate, Vec<&IntervalObservation>> = BTreeMap::new();
    for obs in observations {
        days.entry(obs.hour.date_naive()).or_default().push(obs);
    }
    let chunks: Vec<Vec<&IntervalObservation>> = days.into_values().collect();

    let partials: Vec<HourlyAccumulator> = chunks
        .par_iter()
        .map(|chunk| {
            let mut acc = HourlyAccumulator::default();
            for obs in chunk {
                acc.observe(obs, config);
            }
            acc
        })
        .collect();

    partials
        .iter()
        .fold(HourlyAccumulator::default(), |mut total, part| {
            total.merge(part);
            total
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::intervals::InMemoryIntervalStore;
    use chrono::{Duration, TimeZone};
    use gridval_core::{
        AssetId, EngineConfig, EntitySet, GeoPoint, Megawatts, PipelineRun, ResolutionDepth,
        RunId, RunStatus, ZoneCode,
    };

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 7, 1, 0, 0, 0).unwrap()
    }

    fn generation() -> ScoreGeneration {
        let run = PipelineRun {
            id: RunId::new(7),
            status: RunStatus::Completed,
            window_start: t0() - Duration::days(30),
            window_end: t0(),
            started_at: t0(),
            finished_at: Some(t0()),
            congestion_weight: 0.6,
            loading_weight: 0.4,
            record_count: 0,
            failure_reason: None,
        };
        ScoreGeneration::from_parts(run, vec![]).unwrap()
    }

    fn ctx() -> GeoContext {
        let mut ctx = GeoContext::unresolved(GeoPoint::new(39.95, -75.16));
        ctx.iso_code = Some("PJM".into());
        ctx.zone_code = Some(ZoneCode::new("PECO"));
        ctx.resolution_depth = ResolutionDepth::Zone;
        ctx.errors.push("no substation indexed for territory PECO".into());
        ctx
    }

    fn asset(der: &str) -> DerAsset {
        DerAsset {
            asset_id: AssetId::new("A-1"),
            location: GeoPoint::new(39.95, -75.16),
            der_type: der.into(),
            capacity_mw: Megawatts(2.0),
        }
    }

    /// Three days of hourly data, binding from 12:00 to 15:59 each day.
    fn intervals(skip: Option<i64>) -> InMemoryIntervalStore {
        let observations = (0..72)
            .filter(|h| Some(*h) != skip)
            .map(|h| {
                let hour = t0() + Duration::hours(h);
                let binding = (12..16).contains(&(h % 24));
                IntervalObservation {
                    level: GridLevel::Zone,
                    entity_id: "PECO".into(),
                    hour,
                    congestion_component: Some(if binding { 30.0 } else { 0.1 }),
                    loading_pct: None,
                }
            });
        InMemoryIntervalStore::from_observations(observations)
    }

    #[test]
    fn measured_interval_drives_value() {
        let config = EngineConfig::default();
        let entities = EntitySet::default();
        let valuator = Valuator::new(&config, &entities);
        let result = valuate_retrospective(
            &valuator,
            &intervals(None),
            &generation(),
            &asset("storage"),
            &ctx(),
            t0(),
            t0() + Duration::hours(72),
        )
        .unwrap();

        assert_eq!(result.interval_hours, 72);
        assert_eq!(result.constrained_hours, 12);
        assert_eq!(result.pipeline_run_id, RunId::new(7));
        // storage availability is a flat 0.9
        assert!((result.actual_savings_mwh - 12.0 * 2.0 * 0.9).abs() < 1e-9);
        let annual = 200_000.0 * (12.0 / 72.0) * 1.0 * 2.0 * 0.9;
        assert!((result.value_breakdown.zone_congestion_value - annual).abs() < 1e-6);
        assert!(
            (result.total_constraint_relief_value - annual * 72.0 / HOURS_PER_YEAR).abs() < 1e-6
        );
        assert!((result.value_per_kw_year - annual / 1.8 / 1000.0).abs() < 1e-9);
    }

    #[test]
    fn one_missing_hour_fails_the_whole_interval() {
        let config = EngineConfig::default();
        let entities = EntitySet::default();
        let valuator = Valuator::new(&config, &entities);
        let err = valuate_retrospective(
            &valuator,
            &intervals(Some(30)),
            &generation(),
            &asset("solar"),
            &ctx(),
            t0(),
            t0() + Duration::hours(72),
        )
        .unwrap_err();
        match err {
            GridvalError::IntervalDataUnavailable {
                zone_code,
                missing_hours,
                first_missing,
            } => {
                assert_eq!(zone_code, "PECO");
                assert_eq!(missing_hours, 1);
                assert_eq!(first_missing, t0() + Duration::hours(30));
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn reversed_interval_is_rejected() {
        let config = EngineConfig::default();
        let entities = EntitySet::default();
        let valuator = Valuator::new(&config, &entities);
        let err = valuate_retrospective(
            &valuator,
            &intervals(None),
            &generation(),
            &asset("solar"),
            &ctx(),
            t0() + Duration::hours(5),
            t0(),
        )
        .unwrap_err();
        assert!(matches!(err, GridvalError::InvalidInterval { .. }));
    }

    #[test]
    fn unresolved_zone_is_data_unavailable() {
        let config = EngineConfig::default();
        let entities = EntitySet::default();
        let valuator = Valuator::new(&config, &entities);
        let mut unresolved = GeoContext::unresolved(GeoPoint::new(0.0, 0.0));
        unresolved.errors.push("no zone boundary contains point".into());
        let err = valuate_retrospective(
            &valuator,
            &intervals(None),
            &generation(),
            &asset("solar"),
            &unresolved,
            t0(),
            t0() + Duration::hours(3),
        )
        .unwrap_err();
        assert!(matches!(err, GridvalError::DataUnavailable(_)));
    }

    #[test]
    fn day_chunks_reduce_like_a_single_pass() {
        let config = EngineConfig::default();
        let observations = intervals(None).all();
        let mut single = HourlyAccumulator::default();
        observations
            .iter()
            .for_each(|o| single.observe(o, &config.scoring));
        assert_eq!(aggregate_by_day(&observations, &config.scoring), single);
    }

    #[test]
    fn partial_hour_start_includes_floored_hour() {
        let config = EngineConfig::default();
        let entities = EntitySet::default();
        let valuator = Valuator::new(&config, &entities);
        let result = valuate_retrospective(
            &valuator,
            &intervals(None),
            &generation(),
            &asset("wind"),
            &ctx(),
            t0() + Duration::minutes(30),
            t0() + Duration::hours(2),
        )
        .unwrap();
        assert_eq!(result.interval_hours, 2);
    }
}
