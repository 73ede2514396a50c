use std::sync::Arc;

use chrono::{DateTime, Duration, TimeZone, Utc};
use geo::{polygon, MultiPolygon};
use gridval_algo::{
    run_pipeline, Engine, InMemoryIntervalStore, IntervalObservation, ScoreStore, ScoreWindow,
};
use gridval_core::{
    AssetId, Confidence, DerAsset, EngineConfig, EntitySet, GeoPoint, GridLevel, GridvalError,
    IsoRegion, Megawatts, PricingNode, PnodeId, ResolutionDepth, Substation, SubstationId,
    ValueTier, Zone, ZoneCode,
};

const KM_PER_DEG_LAT: f64 = 111.195;

fn t0() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 6, 1, 0, 0, 0).unwrap()
}

fn square(min_lon: f64, min_lat: f64, max_lon: f64, max_lat: f64) -> MultiPolygon<f64> {
    MultiPolygon(vec![polygon![
        (x: min_lon, y: min_lat),
        (x: max_lon, y: min_lat),
        (x: max_lon, y: max_lat),
        (x: min_lon, y: max_lat),
    ]])
}

fn pjm_entities() -> EntitySet {
    EntitySet::new(
        vec![
            Zone::new(ZoneCode::new("PECO"), "PJM", square(-75.4, 39.8, -74.9, 40.2))
                .with_utility("PECO Energy"),
            Zone::new(ZoneCode::new("JCPL"), "PJM", square(-74.9, 39.8, -74.0, 40.6)),
        ],
        vec![IsoRegion {
            iso_code: "PJM".into(),
            boundary: square(-80.0, 37.0, -73.5, 42.0),
        }],
        vec![
            Substation::new(SubstationId::new("PECO-0142"))
                .with_zone(ZoneCode::new("PECO"))
                .with_location(GeoPoint::new(39.95 + 1.2 / KM_PER_DEG_LAT, -75.16))
                .with_peak_loading_pct(70.0),
            Substation::new(SubstationId::new("JCPL-0007"))
                .with_zone(ZoneCode::new("JCPL"))
                .with_location(GeoPoint::new(40.3, -74.5))
                .with_peak_loading_pct(92.0),
        ],
        vec![],
        vec![PricingNode::new(PnodeId::new("JCPL-NODE"))
            .with_zone(ZoneCode::new("JCPL"))
            .with_location(GeoPoint::new(40.31, -74.5))],
    )
}

/// Ten noon hours per zone; `binding` of them carry 30 $/MWh congestion.
fn zone_observations(zone: &str, binding: u32) -> Vec<IntervalObservation> {
    (0..10)
        .map(|day| IntervalObservation {
            level: GridLevel::Zone,
            entity_id: zone.into(),
            hour: t0() + Duration::days(day as i64) + Duration::hours(12),
            congestion_component: Some(if day < binding { 30.0 } else { 0.0 }),
            loading_pct: None,
        })
        .collect()
}

fn window() -> ScoreWindow {
    ScoreWindow::new(t0(), t0() + Duration::days(10)).unwrap()
}

fn engine_with_run(peco_binding: u32) -> Engine {
    let mut observations = zone_observations("PECO", peco_binding);
    observations.extend(zone_observations("JCPL", 5));
    let store = Arc::new(ScoreStore::new());
    run_pipeline(&store, &observations, window(), &EngineConfig::default().scoring).unwrap();
    let intervals = InMemoryIntervalStore::from_observations(observations);
    Engine::new(
        EngineConfig::default(),
        pjm_entities(),
        store,
        Arc::new(intervals),
    )
    .unwrap()
}

#[test]
fn philadelphia_resolves_to_substation_with_high_confidence() {
    let engine = engine_with_run(9);
    let ctx = engine.resolve_geo(39.95, -75.16).unwrap();
    assert_eq!(ctx.iso_code.as_deref(), Some("PJM"));
    assert_eq!(ctx.zone_code, Some(ZoneCode::new("PECO")));
    assert_eq!(ctx.resolution_depth, ResolutionDepth::Substation);
    assert_eq!(ctx.confidence, Confidence::High);
    assert!((ctx.substation_distance_km.unwrap().value() - 1.2).abs() < 0.01);
}

#[test]
fn points_inside_a_zone_resolve_to_it() {
    let engine = engine_with_run(9);
    for i in 1..20 {
        for j in 1..20 {
            let lat = 39.8 + 0.4 * i as f64 / 20.0;
            let lon = -75.4 + 0.5 * j as f64 / 20.0;
            let ctx = engine.resolve_geo(lat, lon).unwrap();
            assert_eq!(ctx.zone_code, Some(ZoneCode::new("PECO")), "({lat}, {lon})");
            assert!(ctx.resolution_depth >= ResolutionDepth::Zone);
            assert!(ctx.is_consistent());
        }
    }
}

#[test]
fn points_outside_every_zone_are_degraded() {
    let engine = engine_with_run(9);
    for (lat, lon) in [(38.5, -77.0), (45.0, -100.0), (-10.0, 20.0), (41.9, -73.6)] {
        let ctx = engine.resolve_geo(lat, lon).unwrap();
        assert!(ctx.zone_code.is_none());
        assert!(matches!(
            ctx.resolution_depth,
            ResolutionDepth::Unresolved | ResolutionDepth::Iso
        ));
        assert!(!ctx.errors.is_empty());
        assert_eq!(ctx.confidence, Confidence::Low);
    }
}

#[test]
fn zone_only_solar_valuation_example() {
    let engine = engine_with_run(9);
    // inside PECO but far from its only substation
    let result = engine
        .valuate_prospective(40.15, -74.95, "solar", 5.0)
        .unwrap();
    assert_eq!(result.geo_context.resolution_depth, ResolutionDepth::Zone);
    let b = result.value_breakdown;
    assert_eq!(b.substation_loading_value, 0.0);
    assert_eq!(b.feeder_capacity_value, 0.0);
    assert_eq!(b.pnode_multiplier, 1.0);
    assert!(b.zone_congestion_value > 0.0);
    assert_eq!(result.total_constraint_relief_value, b.zone_congestion_value);
    assert!((result.coincidence_factor - 0.9).abs() < 1e-12);
}

#[test]
fn prospective_valuation_is_deterministic() {
    let engine = engine_with_run(7);
    let a = engine.valuate_prospective(40.3, -74.52, "storage", 3.0).unwrap();
    let b = engine.valuate_prospective(40.3, -74.52, "storage", 3.0).unwrap();
    assert_eq!(
        serde_json::to_string(&a).unwrap(),
        serde_json::to_string(&b).unwrap()
    );

    // a fresh engine over the same inputs computes the same bits
    let fresh = engine_with_run(7);
    let c = fresh.valuate_prospective(40.3, -74.52, "storage", 3.0).unwrap();
    assert_eq!(
        a.total_constraint_relief_value.to_bits(),
        c.total_constraint_relief_value.to_bits()
    );
}

#[test]
fn more_congestion_never_lowers_value() {
    let mut last = f64::NEG_INFINITY;
    for binding in 1..=10 {
        let engine = engine_with_run(binding);
        let value = engine
            .valuate_prospective(39.95, -75.16, "storage", 2.0)
            .unwrap()
            .total_constraint_relief_value;
        assert!(value >= last, "binding={binding}");
        last = value;
    }
}

#[test]
fn zero_effective_capacity_is_not_an_error() {
    let engine = engine_with_run(9);
    let result = engine
        .valuate_prospective(39.95, -75.16, "solar", 1e-12)
        .unwrap();
    assert_eq!(result.value_per_kw_year, 0.0);
    assert_eq!(result.value_tier, ValueTier::Low);
}

#[test]
fn tier_boundaries_come_from_one_table() {
    let engine = engine_with_run(9);
    let tiers = engine.config().tiers;
    assert_eq!(tiers.classify(150.0), ValueTier::Premium);
    assert_eq!(tiers.classify(149.999), ValueTier::High);
}

#[test]
fn jcpl_point_picks_up_pnode_and_overloaded_substation() {
    let engine = engine_with_run(9);
    let result = engine
        .valuate_prospective(40.3, -74.501, "storage", 1.0)
        .unwrap();
    let ctx = &result.geo_context;
    assert_eq!(ctx.resolution_depth, ResolutionDepth::FeederOrPnode);
    assert_eq!(ctx.pnode_ref, Some(PnodeId::new("JCPL-NODE")));
    // no pnode record in the run: multiplier falls back with a warning
    assert_eq!(result.value_breakdown.pnode_multiplier, 1.0);
    assert!(result.warnings.iter().any(|w| w.contains("JCPL-NODE")));
    assert!(result.value_breakdown.substation_loading_value > 0.0);
}

#[test]
fn empty_iso_portfolio_lists_all_tiers() {
    let engine = engine_with_run(9);
    let summary = engine.portfolio_summary("CAISO");
    assert_eq!(summary.total_portfolio_value, 0.0);
    for tier in ValueTier::ALL {
        assert_eq!(summary.tier_distribution.get(&tier), Some(&0));
    }
}

#[test]
fn portfolio_rolls_up_registered_assets() {
    let engine = engine_with_run(9).with_assets(vec![
        asset("A-1", 39.95, -75.16, "storage"),
        asset("A-2", 40.3, -74.5, "solar"),
        asset("A-3", 40.1, -75.0, "wind"),
    ]);
    let summary = engine.portfolio_summary("PJM");
    assert_eq!(summary.total_zones, 2);
    assert_eq!(summary.total_substations, 2);
    assert_eq!(summary.overloaded_substations, 1);
    // PECO 0.9 is critical, JCPL 0.5 is elevated
    assert_eq!(summary.constrained_zones, 2);
    assert_eq!(summary.total_der_locations, 3);
    assert_eq!(summary.tier_distribution.values().sum::<usize>(), 3);
    let peco = summary
        .top_zones
        .iter()
        .find(|z| z.zone_code == ZoneCode::new("PECO"))
        .unwrap();
    assert_eq!(peco.der_count, 2);
    assert!(summary
        .top_zones
        .windows(2)
        .all(|w| w[0].avg_constraint_value >= w[1].avg_constraint_value));

    // a second summary hits the cache and agrees
    let again = engine.portfolio_summary("PJM");
    assert_eq!(again.total_portfolio_value, summary.total_portfolio_value);
}

#[test]
fn new_run_invalidates_portfolio_cache() {
    let engine = engine_with_run(2).with_assets(vec![asset("A-1", 39.95, -75.16, "storage")]);
    let before = engine.portfolio_summary("PJM").total_portfolio_value;

    let mut observations = zone_observations("PECO", 10);
    observations.extend(zone_observations("JCPL", 5));
    run_pipeline(
        engine.score_store(),
        &observations,
        window(),
        &engine.config().scoring,
    )
    .unwrap();

    let after = engine.portfolio_summary("PJM");
    assert_eq!(after.pipeline_run_id, engine.score_store().latest_run_id());
    assert!(after.total_portfolio_value > before);
}

fn asset(id: &str, lat: f64, lon: f64, der: &str) -> DerAsset {
    DerAsset {
        asset_id: AssetId::new(id),
        location: GeoPoint::new(lat, lon),
        der_type: der.into(),
        capacity_mw: Megawatts(2.0),
    }
}

#[test]
fn retrospective_missing_hour_fails() {
    let engine = engine_with_run(9).with_assets(vec![asset("A-1", 39.95, -75.16, "storage")]);
    // only noon hours are backed, so a two-hour interval spanning 12:00-14:00 misses 13:00
    let start = t0() + Duration::hours(12);
    let err = engine
        .valuate_retrospective(&AssetId::new("A-1"), start, start + Duration::hours(2))
        .unwrap_err();
    assert!(matches!(
        err,
        GridvalError::IntervalDataUnavailable { missing_hours: 1, .. }
    ));
}

#[test]
fn retrospective_over_backed_hour_succeeds() {
    let engine = engine_with_run(9).with_assets(vec![asset("A-1", 39.95, -75.16, "storage")]);
    let start = t0() + Duration::hours(12);
    let result = engine
        .valuate_retrospective(&AssetId::new("A-1"), start, start + Duration::hours(1))
        .unwrap();
    assert_eq!(result.interval_hours, 1);
    assert_eq!(result.constrained_hours, 1);
    assert!((result.actual_savings_mwh - 2.0 * 0.9).abs() < 1e-12);
    assert_eq!(result.pipeline_run_id, engine.score_store().latest_run_id().unwrap());
}

#[test]
fn refresh_swaps_snapshot_for_new_requests_only() {
    let engine = engine_with_run(9);
    let before = engine.resolver();
    engine.refresh_entities(EntitySet::default());
    // the old snapshot still resolves
    assert_eq!(
        before.resolve(GeoPoint::new(39.95, -75.16)).zone_code,
        Some(ZoneCode::new("PECO"))
    );
    let ctx = engine.resolve_geo(39.95, -75.16).unwrap();
    assert_eq!(ctx.resolution_depth, ResolutionDepth::Unresolved);
}

#[test]
fn concurrent_resolution_is_consistent() {
    let engine = Arc::new(engine_with_run(9));
    let expected = engine.resolve_geo(39.95, -75.16).unwrap();
    let handles: Vec<_> = (0..8)
        .map(|_| {
            let engine = engine.clone();
            std::thread::spawn(move || engine.resolve_geo(39.95, -75.16).unwrap())
        })
        .collect();
    for handle in handles {
        assert_eq!(handle.join().unwrap(), expected);
    }
}
