//! Prospective constraint-relief valuation.
//!
//! ```text
//! eff   = capacity_mw × coincidence_factor
//! zone  = zone_rate × combined_score × der_weight × eff
//! sub   = sub_rate × (peak − threshold) / max(100 − peak, min_headroom) × eff   (peak > threshold)
//! feed  = feeder_rate × (1 − hosting / scarcity_threshold) × eff              (hosting < threshold)
//! total = zone × pnode_multiplier + sub + feed
//! ```
//!
//! Missing scores degrade a component to zero (or the multiplier to 1.0) and
//! leave a warning on the result. They never fail the request.

use gridval_core::{
    DerProfile, EngineConfig, EntitySet, GeoContext, GridLevel, GridvalError, GridvalResult,
    Megawatts, RunId, ScoreRecord, ValuationResult, ValueBreakdown,
};

use crate::store::ScoreGeneration;

/// Effective capacities below this value count as zero.
pub const MIN_EFFECTIVE_MW: f64 = 1e-9;

/// Score records for each resolved level of one context.
#[derive(Debug, Clone, Copy, Default)]
pub struct LevelScores<'a> {
    pub zone: Option<&'a ScoreRecord>,
    pub pnode: Option<&'a ScoreRecord>,
    pub substation: Option<&'a ScoreRecord>,
}

impl<'a> LevelScores<'a> {
    pub fn lookup(generation: &'a ScoreGeneration, ctx: &GeoContext) -> Self {
        Self {
            zone: ctx
                .zone_code
                .as_ref()
                .and_then(|z| generation.get(GridLevel::Zone, z.as_str())),
            pnode: ctx
                .pnode_ref
                .as_ref()
                .and_then(|p| generation.get(GridLevel::Pnode, p.as_str())),
            substation: ctx
                .substation_ref
                .as_ref()
                .and_then(|s| generation.get(GridLevel::Substation, s.as_str())),
        }
    }
}

/// Annualised component values before tiering.
#[derive(Debug, Clone, PartialEq)]
pub struct Components {
    pub breakdown: ValueBreakdown,
    pub coincidence_factor: f64,
    pub effective_capacity_mw: Megawatts,
    pub warnings: Vec<String>,
}

impl Components {
    pub fn total(&self) -> f64 {
        self.breakdown.total()
    }

    pub fn value_per_kw_year(&self) -> f64 {
        if self.effective_capacity_mw.value() < MIN_EFFECTIVE_MW {
            0.0
        } else {
            self.total() / self.effective_capacity_mw.value() / 1000.0
        }
    }
}

/// Validated DER request parameters.
#[derive(Debug, Clone, Copy)]
pub struct DerRequest<'a> {
    pub der_type: &'a str,
    pub profile: &'a DerProfile,
    pub capacity: Megawatts,
}

/// Reject a request before any computation: unknown DER type or bad capacity.
pub fn check_request<'a>(
    config: &'a EngineConfig,
    der_type: &'a str,
    capacity_mw: f64,
) -> GridvalResult<DerRequest<'a>> {
    let profile = config.der_profile(der_type)?;
    if !capacity_mw.is_finite() || capacity_mw <= 0.0 {
        return Err(GridvalError::InvalidCapacity(capacity_mw));
    }
    Ok(DerRequest {
        der_type,
        profile,
        capacity: Megawatts(capacity_mw),
    })
}

pub struct Valuator<'a> {
    config: &'a EngineConfig,
    entities: &'a EntitySet,
}

impl<'a> Valuator<'a> {
    pub fn new(config: &'a EngineConfig, entities: &'a EntitySet) -> Self {
        Self { config, entities }
    }

    pub fn config(&self) -> &EngineConfig {
        self.config
    }

    /// Value a resolved context against one completed score generation.
    pub fn prospective(
        &self,
        ctx: &GeoContext,
        generation: &ScoreGeneration,
        request: DerRequest<'_>,
    ) -> ValuationResult {
        let scores = LevelScores::lookup(generation, ctx);
        let parts = self.components(ctx, &scores, request, generation.id());
        let value_per_kw_year = parts.value_per_kw_year();
        ValuationResult {
            geo_context: ctx.clone(),
            der_type: request.der_type.to_string(),
            capacity_mw: request.capacity,
            pipeline_run_id: generation.id(),
            value_breakdown: parts.breakdown,
            total_constraint_relief_value: parts.total(),
            coincidence_factor: parts.coincidence_factor,
            effective_capacity_mw: parts.effective_capacity_mw,
            value_per_kw_year,
            value_tier: self.config.tiers.classify(value_per_kw_year),
            warnings: parts.warnings,
        }
    }

    /// Compute every component. `scores.zone` may be a measured record that
    /// replaces the run's period average.
    pub fn components(
        &self,
        ctx: &GeoContext,
        scores: &LevelScores<'_>,
        request: DerRequest<'_>,
        run_id: RunId,
    ) -> Components {
        let mut warnings = Vec::new();
        let rates = &self.config.valuation;

        let coincidence_factor = match scores.zone {
            Some(zone) if zone.constrained_hours > 0 => {
                request.profile.coincidence(&zone.constrained_hour_profile)
            }
            Some(zone) => {
                warnings.push(format!(
                    "no constrained hours recorded for zone {}; coincidence uses mean availability",
                    zone.entity_id
                ));
                request.profile.coincidence(&zone.constrained_hour_profile)
            }
            None => request.profile.mean_availability().clamp(0.0, 1.0),
        };
        let eff = request.capacity * coincidence_factor;

        let zone_congestion_value = match (&ctx.zone_code, scores.zone) {
            (None, _) => {
                warnings.push("no zone resolved; zone congestion value is 0".to_string());
                0.0
            }
            (Some(code), None) => {
                warnings.push(format!(
                    "no zone score for {code} in run {run_id}; zone congestion value is 0"
                ));
                0.0
            }
            (Some(code), Some(zone)) => match zone.combined_score {
                Some(combined) => {
                    rates.zone_congestion_rate_usd_per_mw_year
                        * combined
                        * request.profile.weight
                        * eff.value()
                }
                None => {
                    warnings.push(format!(
                        "zone {code} has no combined score in run {run_id}; zone congestion value is 0"
                    ));
                    0.0
                }
            },
        };

        let pnode_multiplier = self.pnode_multiplier(ctx, scores, &mut warnings);
        let substation_loading_value = self.substation_value(ctx, scores, eff, &mut warnings);
        let feeder_capacity_value = self.feeder_value(ctx, eff, &mut warnings);

        Components {
            breakdown: ValueBreakdown {
                zone_congestion_value,
                pnode_multiplier,
                substation_loading_value,
                feeder_capacity_value,
            },
            coincidence_factor,
            effective_capacity_mw: eff,
            warnings,
        }
    }

    fn pnode_multiplier(
        &self,
        ctx: &GeoContext,
        scores: &LevelScores<'_>,
        warnings: &mut Vec<String>,
    ) -> f64 {
        let Some(pnode) = &ctx.pnode_ref else {
            return 1.0;
        };
        let node_avg = scores.pnode.and_then(|r| r.avg_congestion_component);
        let zone_avg = scores.zone.and_then(|r| r.avg_congestion_component);
        match (node_avg, zone_avg) {
            (Some(node), Some(zone)) if zone.abs() > f64::EPSILON => {
                let rates = &self.config.valuation;
                (node.abs() / zone.abs())
                    .clamp(rates.pnode_multiplier_min, rates.pnode_multiplier_max)
            }
            (Some(_), Some(_)) => {
                warnings.push(format!(
                    "zone average congestion is zero; pricing node {pnode} multiplier is 1.0"
                ));
                1.0
            }
            _ => {
                warnings.push(format!(
                    "no congestion average for pricing node {pnode} or its zone; multiplier is 1.0"
                ));
                1.0
            }
        }
    }

    fn substation_value(
        &self,
        ctx: &GeoContext,
        scores: &LevelScores<'_>,
        eff: Megawatts,
        warnings: &mut Vec<String>,
    ) -> f64 {
        let Some(sub_id) = &ctx.substation_ref else {
            return 0.0;
        };
        let peak = scores.substation.and_then(|r| r.peak_loading_pct).or_else(|| {
            self.entities
                .substation(sub_id)
                .and_then(|s| s.peak_loading_pct)
        });
        let Some(peak) = peak else {
            warnings.push(format!(
                "no peak loading for substation {sub_id}; loading value is 0"
            ));
            return 0.0;
        };
        let rates = &self.config.valuation;
        if peak <= rates.loading_threshold_pct {
            return 0.0;
        }
        let headroom = (100.0 - peak).max(rates.min_headroom_pct);
        rates.substation_loading_rate_usd_per_mw_year
            * (peak - rates.loading_threshold_pct)
            / headroom
            * eff.value()
    }

    fn feeder_value(&self, ctx: &GeoContext, eff: Megawatts, warnings: &mut Vec<String>) -> f64 {
        let Some(feeder_id) = &ctx.feeder_ref else {
            return 0.0;
        };
        let Some(hosting) = self
            .entities
            .feeder(feeder_id)
            .and_then(|f| f.hosting_capacity_mw)
        else {
            warnings.push(format!(
                "no hosting capacity for feeder {feeder_id}; capacity value is 0"
            ));
            return 0.0;
        };
        let rates = &self.config.valuation;
        if hosting >= rates.hosting_scarcity_threshold_mw {
            return 0.0;
        }
        let scarcity =
            (1.0 - hosting.max(0.0) / rates.hosting_scarcity_threshold_mw).clamp(0.0, 1.0);
        rates.feeder_capacity_rate_usd_per_mw_year * scarcity * eff.value()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scoring::{score_observations, ScoreWindow};
    use crate::IntervalObservation;
    use chrono::{DateTime, Duration, TimeZone, Utc};
    use gridval_core::{
        Feeder, FeederId, GeoPoint, PipelineRun, PnodeId, ResolutionDepth, RunStatus,
        ScoringConfig, Substation, SubstationId, ValueTier, ZoneCode, HOURS_PER_DAY,
    };

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 7, 1, 0, 0, 0).unwrap()
    }

    fn run(id: u64) -> PipelineRun {
        PipelineRun {
            id: RunId::new(id),
            status: RunStatus::Completed,
            window_start: t0(),
            window_end: t0() + Duration::days(1),
            started_at: t0(),
            finished_at: Some(t0()),
            congestion_weight: 0.6,
            loading_weight: 0.4,
            record_count: 0,
            failure_reason: None,
        }
    }

    fn zone_record(combined: Option<f64>, noon_hours: u32) -> ScoreRecord {
        let mut profile = [0u32; HOURS_PER_DAY];
        profile[12] = noon_hours;
        ScoreRecord {
            pipeline_run_id: RunId::new(1),
            level: GridLevel::Zone,
            entity_id: "PECO".into(),
            congestion_score: combined,
            loading_score: None,
            combined_score: combined,
            constraint_tier: ScoringConfig::default().tier_for(combined),
            period_start: t0(),
            period_end: t0() + Duration::days(1),
            observed_hours: 24,
            constrained_hours: noon_hours,
            constrained_hour_profile: profile,
            avg_congestion_component: Some(10.0),
            peak_loading_pct: None,
        }
    }

    fn zone_ctx() -> GeoContext {
        let mut ctx = GeoContext::unresolved(GeoPoint::new(39.95, -75.16));
        ctx.iso_code = Some("PJM".into());
        ctx.zone_code = Some(ZoneCode::new("PECO"));
        ctx.resolution_depth = ResolutionDepth::Zone;
        ctx.errors.push("nearest substation exceeds 5km cutoff: 12.3km".into());
        ctx
    }

    fn value(
        config: &EngineConfig,
        entities: &EntitySet,
        ctx: &GeoContext,
        records: Vec<ScoreRecord>,
        der: &str,
        mw: f64,
    ) -> ValuationResult {
        let generation = ScoreGeneration::from_parts(run(1), records).unwrap();
        let request = check_request(config, der, mw).unwrap();
        Valuator::new(config, entities).prospective(ctx, &generation, request)
    }

    #[test]
    fn zone_only_solar_example() {
        let config = EngineConfig::default();
        let entities = EntitySet::default();
        let result = value(
            &config,
            &entities,
            &zone_ctx(),
            vec![zone_record(Some(0.9), 10)],
            "solar",
            5.0,
        );
        let b = result.value_breakdown;
        assert_eq!(b.substation_loading_value, 0.0);
        assert_eq!(b.feeder_capacity_value, 0.0);
        assert_eq!(b.pnode_multiplier, 1.0);
        assert_eq!(result.total_constraint_relief_value, b.zone_congestion_value);

        // noon solar availability is 0.9
        assert!((result.coincidence_factor - 0.9).abs() < 1e-12);
        let expected = 200_000.0 * 0.9 * 0.8 * 5.0 * 0.9;
        assert!((b.zone_congestion_value - expected).abs() < 1e-6);
        assert!((result.value_per_kw_year - 144.0).abs() < 1e-9);
        assert_eq!(result.value_tier, ValueTier::High);
    }

    #[test]
    fn unsupported_der_and_bad_capacity_rejected() {
        let config = EngineConfig::default();
        assert!(matches!(
            check_request(&config, "fusion", 1.0),
            Err(GridvalError::UnsupportedDerType(_))
        ));
        assert!(matches!(
            check_request(&config, "solar", 0.0),
            Err(GridvalError::InvalidCapacity(_))
        ));
        assert!(matches!(
            check_request(&config, "solar", f64::NAN),
            Err(GridvalError::InvalidCapacity(_))
        ));
    }

    #[test]
    fn zero_effective_capacity_yields_zero_per_kw() {
        let config = EngineConfig::default();
        let entities = EntitySet::default();
        let mut night = zone_record(Some(0.9), 0);
        night.constrained_hours = 6;
        night.constrained_hour_profile[2] = 6;
        let result = value(&config, &entities, &zone_ctx(), vec![night], "solar", 5.0);
        assert_eq!(result.coincidence_factor, 0.0);
        assert_eq!(result.effective_capacity_mw.value(), 0.0);
        assert_eq!(result.value_per_kw_year, 0.0);
        assert_eq!(result.value_tier, ValueTier::Low);
    }

    #[test]
    fn higher_combined_score_never_lowers_value() {
        let config = EngineConfig::default();
        let entities = EntitySet::default();
        let mut last = f64::NEG_INFINITY;
        for step in 0..=10 {
            let combined = step as f64 / 10.0;
            let result = value(
                &config,
                &entities,
                &zone_ctx(),
                vec![zone_record(Some(combined), 4)],
                "storage",
                2.0,
            );
            assert!(result.total_constraint_relief_value >= last);
            last = result.total_constraint_relief_value;
        }
    }

    #[test]
    fn missing_zone_score_degrades_with_warning() {
        let config = EngineConfig::default();
        let entities = EntitySet::default();
        let result = value(&config, &entities, &zone_ctx(), vec![], "wind", 3.0);
        assert_eq!(result.total_constraint_relief_value, 0.0);
        assert!(result.warnings.iter().any(|w| w.contains("no zone score for PECO")));
        // no zone record: coincidence falls back to mean availability
        assert!((result.coincidence_factor - 0.35).abs() < 1e-12);
    }

    #[test]
    fn substation_feeder_and_pnode_components() {
        let config = EngineConfig::default();
        let entities = EntitySet::new(
            vec![],
            vec![],
            vec![Substation::new(SubstationId::new("S1")).with_peak_loading_pct(95.0)],
            vec![Feeder::new(FeederId::new("F1")).with_hosting_capacity_mw(0.5)],
            vec![],
        );
        let mut ctx = zone_ctx();
        ctx.substation_ref = Some(SubstationId::new("S1"));
        ctx.feeder_ref = Some(FeederId::new("F1"));
        ctx.pnode_ref = Some(PnodeId::new("P1"));
        ctx.resolution_depth = ResolutionDepth::FeederOrPnode;

        let start = t0();
        let pnode_obs = IntervalObservation {
            level: GridLevel::Pnode,
            entity_id: "P1".into(),
            hour: start,
            congestion_component: Some(25.0),
            loading_pct: None,
        };
        let window = ScoreWindow::new(start, start + Duration::days(1)).unwrap();
        let mut records =
            score_observations(RunId::new(1), &[pnode_obs], window, &ScoringConfig::default());
        records.push(zone_record(Some(0.5), 4));

        let result = value(&config, &entities, &ctx, records, "storage", 1.0);
        let b = result.value_breakdown;
        let eff = 0.9;
        assert!((b.pnode_multiplier - 2.5).abs() < 1e-12);
        let sub_expected = 50_000.0 * (95.0 - 80.0) / 5.0 * eff;
        assert!((b.substation_loading_value - sub_expected).abs() < 1e-6);
        let feeder_expected = 40_000.0 * (1.0 - 0.5 / 2.0) * eff;
        assert!((b.feeder_capacity_value - feeder_expected).abs() < 1e-6);
        let total = b.zone_congestion_value * 2.5 + sub_expected + feeder_expected;
        assert!((result.total_constraint_relief_value - total).abs() < 1e-6);
    }

    #[test]
    fn fully_loaded_substation_uses_headroom_floor() {
        let config = EngineConfig::default();
        let entities = EntitySet::new(
            vec![],
            vec![],
            vec![Substation::new(SubstationId::new("S1")).with_peak_loading_pct(104.0)],
            vec![],
            vec![],
        );
        let mut ctx = zone_ctx();
        ctx.substation_ref = Some(SubstationId::new("S1"));
        let records = vec![zone_record(Some(0.2), 3)];
        let result = value(&config, &entities, &ctx, records, "storage", 1.0);
        let expected = 50_000.0 * 24.0 / 1.0 * 0.9;
        assert!((result.value_breakdown.substation_loading_value - expected).abs() < 1e-6);
        assert!(result.value_breakdown.substation_loading_value.is_finite());
    }
}
