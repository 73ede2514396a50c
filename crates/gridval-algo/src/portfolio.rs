//! Per-ISO portfolio roll-up of DER valuations.
//!
//! The aggregator never resolves or scores anything itself. It reads the latest
//! cached valuation per asset and asks a [`ValuationProvider`] for a fresh one
//! only when the cached result was computed against an older pipeline run.

use std::collections::BTreeMap;

use gridval_core::{
    DerAsset, EngineConfig, EntitySet, GridEntity, GridLevel, GridvalResult, PortfolioSummary,
    RunId, ValuationResult, ZoneCode, ZoneRanking,
};
use rayon::prelude::*;
use tracing::{debug, warn};

use crate::cache::ValuationCache;
use crate::store::ScoreGeneration;

/// Source of fresh valuations for registered assets.
pub trait ValuationProvider: Sync {
    fn valuate_asset(&self, asset: &DerAsset) -> GridvalResult<ValuationResult>;
}

/// Latest valuation per asset, in asset order.
///
/// A cached result is reused only when it was computed against `latest`.
/// Assets that cannot be valued (unsupported DER type and the like) are left
/// out with a warning in the log.
pub fn latest_valuations(
    assets: &[DerAsset],
    latest: Option<RunId>,
    cache: &ValuationCache,
    provider: &dyn ValuationProvider,
) -> Vec<ValuationResult> {
    let Some(latest) = latest else {
        debug!("no completed pipeline run; portfolio has no valuations");
        return Vec::new();
    };

    let results: Vec<Option<ValuationResult>> = assets
        .par_iter()
        .map(|asset| {
            if let Some(cached) = cache.latest_for_asset(&asset.asset_id) {
                if cached.pipeline_run_id == latest {
                    return Some(cached);
                }
            }
            match provider.valuate_asset(asset) {
                Ok(result) => {
                    cache.record_asset(asset.asset_id.clone(), result.clone());
                    Some(result)
                }
                Err(e) => {
                    warn!(asset = %asset.asset_id, error = %e, "skipping asset in portfolio");
                    None
                }
            }
        })
        .collect();

    results.into_iter().flatten().collect()
}

/// Build the summary for one ISO. Never fails: an ISO with no data yields
/// [`PortfolioSummary::empty`].
pub fn summarize(
    iso_code: &str,
    config: &EngineConfig,
    entities: &EntitySet,
    generation: Option<&ScoreGeneration>,
    valuations: &[ValuationResult],
) -> PortfolioSummary {
    let mut summary = PortfolioSummary::empty(iso_code);
    summary.pipeline_run_id = generation.map(|g| g.id());

    for zone in entities.zones_in_iso(iso_code) {
        summary.total_zones += 1;
        let constrained = generation
            .and_then(|g| g.get(GridLevel::Zone, zone.code.as_str()))
            .is_some_and(|r| r.constraint_tier.is_constrained());
        if constrained {
            summary.constrained_zones += 1;
        }
    }

    let threshold = config.valuation.loading_threshold_pct;
    for sub in &entities.substations {
        let in_iso = entities
            .zone_of(GridEntity::Substation(sub))
            .is_some_and(|z| z.iso_code == iso_code);
        if !in_iso {
            continue;
        }
        summary.total_substations += 1;
        let peak = generation
            .and_then(|g| g.get(GridLevel::Substation, sub.id.as_str()))
            .and_then(|r| r.peak_loading_pct)
            .or(sub.peak_loading_pct);
        if peak.is_some_and(|p| p > threshold) {
            summary.overloaded_substations += 1;
        }
    }

    let in_iso: Vec<&ValuationResult> = valuations
        .iter()
        .filter(|v| v.geo_context.iso_code.as_deref() == Some(iso_code))
        .collect();
    if in_iso.is_empty() {
        return summary;
    }

    summary.total_der_locations = in_iso.len();
    summary.total_portfolio_value = in_iso.iter().map(|v| v.total_constraint_relief_value).sum();
    summary.avg_value_per_kw_year =
        in_iso.iter().map(|v| v.value_per_kw_year).sum::<f64>() / in_iso.len() as f64;
    for v in &in_iso {
        let tier = config.tiers.classify(v.value_per_kw_year);
        *summary.tier_distribution.entry(tier).or_insert(0) += 1;
    }

    let mut by_zone: BTreeMap<&ZoneCode, (f64, usize)> = BTreeMap::new();
    for v in &in_iso {
        if let Some(zone) = &v.geo_context.zone_code {
            let entry = by_zone.entry(zone).or_insert((0.0, 0));
            entry.0 += v.total_constraint_relief_value;
            entry.1 += 1;
        }
    }
    let mut ranking: Vec<ZoneRanking> = by_zone
        .into_iter()
        .map(|(zone, (sum, count))| ZoneRanking {
            zone_code: zone.clone(),
            avg_constraint_value: sum / count as f64,
            der_count: count,
        })
        .collect();
    ranking.sort_by(|a, b| {
        b.avg_constraint_value
            .total_cmp(&a.avg_constraint_value)
            .then_with(|| a.zone_code.cmp(&b.zone_code))
    });
    ranking.truncate(config.portfolio.top_zones);
    summary.top_zones = ranking;

    summary
}
