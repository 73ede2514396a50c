//! Valuation cache.
//!
//! Cached results are never authoritative. They are keyed by everything the
//! result depends on, so a hit is always identical to a recomputation. Only
//! results for the newest run the cache has seen are kept; publishing a newer
//! run retires everything computed against older ones.

use std::sync::atomic::{AtomicU64, Ordering};

use dashmap::DashMap;
use gridval_core::{AssetId, GeoContext, Megawatts, RunId, ValuationResult};
use tracing::debug;

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheKey {
    resolved: String,
    run: RunId,
    capacity_bits: u64,
    der_type: String,
}

impl CacheKey {
    pub fn new(ctx: &GeoContext, run: RunId, capacity: Megawatts, der_type: &str) -> Self {
        Self {
            resolved: ctx.resolved_key(),
            run,
            capacity_bits: capacity.value().to_bits(),
            der_type: der_type.to_string(),
        }
    }

    pub fn run(&self) -> RunId {
        self.run
    }
}

#[derive(Default)]
pub struct ValuationCache {
    by_key: DashMap<CacheKey, ValuationResult>,
    /// Most recent prospective valuation per registered asset
    by_asset: DashMap<AssetId, ValuationResult>,
    /// Newest run id seen; 0 before any
    current_run: AtomicU64,
}

impl ValuationCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Note the latest completed run. When it moves forward, entries computed
    /// against older runs are evicted.
    pub fn advance_to(&self, latest: RunId) {
        let previous = self.current_run.fetch_max(latest.value(), Ordering::AcqRel);
        if previous < latest.value() {
            self.by_key.retain(|key, _| key.run == latest);
            self.by_asset
                .retain(|_, result| result.pipeline_run_id == latest);
            debug!(run = %latest, entries = self.by_key.len(), "valuation cache advanced");
        }
    }

    fn is_current(&self, run: RunId) -> bool {
        self.current_run.load(Ordering::Acquire) == run.value()
    }

    /// Cached result re-pointed at `ctx`. Distances and resolver warnings belong
    /// to the query point; the values depend only on the resolved entities.
    pub fn get(&self, key: &CacheKey, ctx: &GeoContext) -> Option<ValuationResult> {
        self.by_key.get(key).map(|hit| {
            let mut result = hit.value().clone();
            result.geo_context = ctx.clone();
            result
        })
    }

    /// Results for any run other than the current one are not stored.
    pub fn insert(&self, key: CacheKey, result: ValuationResult) {
        if self.is_current(key.run) {
            self.by_key.insert(key, result);
        }
    }

    pub fn latest_for_asset(&self, asset_id: &AssetId) -> Option<ValuationResult> {
        self.by_asset.get(asset_id).map(|r| r.value().clone())
    }

    pub fn record_asset(&self, asset_id: AssetId, result: ValuationResult) {
        if self.is_current(result.pipeline_run_id) {
            self.by_asset.insert(asset_id, result);
        }
    }

    pub fn len(&self) -> usize {
        self.by_key.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_key.is_empty()
    }
}
