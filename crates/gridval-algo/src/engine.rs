//! Request-facing engine.
//!
//! [`Engine`] holds a validated configuration, the current entity snapshot,
//! the score store, the interval store and the asset registry. Every request
//! operation takes `&self` and may run concurrently with any other.
//! [`Engine::refresh_entities`] and [`Engine::register_assets`] build their
//! replacement first and then swap an `Arc` under a short write lock, so
//! in-flight requests finish against the snapshot they started with.
//!
//! The valuation cache lives inside the entity snapshot. A request reads the
//! snapshot once and resolves, values and caches against it, so a result
//! computed from a retired entity set can only land in the retired cache.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use gridval_core::{
    AssetId, DerAsset, EngineConfig, EntitySet, GeoContext, GeoPoint, GridvalError,
    GridvalResult, PortfolioSummary, RetrospectiveValuation, RunId, ValuationResult,
};
use parking_lot::RwLock;
use tracing::{debug, info};

use crate::cache::{CacheKey, ValuationCache};
use crate::intervals::IntervalStore;
use crate::portfolio::{self, ValuationProvider};
use crate::resolver::HierarchyResolver;
use crate::retrospective;
use crate::store::ScoreStore;
use crate::valuation::{check_request, Valuator};

/// Known DER locations, indexed by asset id.
#[derive(Debug, Clone, Default)]
pub struct AssetRegistry {
    assets: Vec<DerAsset>,
    index: HashMap<AssetId, usize>,
}

impl AssetRegistry {
    /// Later duplicates of an asset id replace earlier ones.
    pub fn new(assets: Vec<DerAsset>) -> Self {
        let mut deduped: Vec<DerAsset> = Vec::with_capacity(assets.len());
        let mut index = HashMap::new();
        for asset in assets {
            match index.get(&asset.asset_id) {
                Some(&i) => deduped[i] = asset,
                None => {
                    index.insert(asset.asset_id.clone(), deduped.len());
                    deduped.push(asset);
                }
            }
        }
        Self {
            assets: deduped,
            index,
        }
    }

    pub fn get(&self, asset_id: &AssetId) -> Option<&DerAsset> {
        self.index.get(asset_id).map(|&i| &self.assets[i])
    }

    pub fn assets(&self) -> &[DerAsset] {
        &self.assets
    }

    pub fn len(&self) -> usize {
        self.assets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.assets.is_empty()
    }
}

/// Entity set, resolver and the valuations computed from them.
struct Snapshot {
    resolver: Arc<HierarchyResolver>,
    cache: ValuationCache,
}

impl Snapshot {
    fn new(entities: EntitySet, config: &EngineConfig) -> Self {
        Self {
            resolver: Arc::new(HierarchyResolver::build(
                Arc::new(entities),
                config.resolver.clone(),
            )),
            cache: ValuationCache::new(),
        }
    }
}

pub struct Engine {
    config: EngineConfig,
    snapshot: RwLock<Arc<Snapshot>>,
    scores: Arc<ScoreStore>,
    intervals: Arc<dyn IntervalStore>,
    assets: RwLock<Arc<AssetRegistry>>,
}

impl Engine {
    /// Build an engine. An invalid configuration is rejected here, once.
    pub fn new(
        config: EngineConfig,
        entities: EntitySet,
        scores: Arc<ScoreStore>,
        intervals: Arc<dyn IntervalStore>,
    ) -> GridvalResult<Self> {
        config.validate()?;
        let snapshot = Snapshot::new(entities, &config);
        Ok(Self {
            config,
            snapshot: RwLock::new(Arc::new(snapshot)),
            scores,
            intervals,
            assets: RwLock::new(Arc::new(AssetRegistry::default())),
        })
    }

    pub fn with_assets(self, assets: Vec<DerAsset>) -> Self {
        self.register_assets(assets);
        self
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    fn snapshot(&self) -> Arc<Snapshot> {
        self.snapshot.read().clone()
    }

    /// Current resolver snapshot.
    pub fn resolver(&self) -> Arc<HierarchyResolver> {
        self.snapshot().resolver.clone()
    }

    pub fn entities(&self) -> Arc<EntitySet> {
        self.resolver().entities().clone()
    }

    pub fn score_store(&self) -> &Arc<ScoreStore> {
        &self.scores
    }

    pub fn assets(&self) -> Arc<AssetRegistry> {
        self.assets.read().clone()
    }

    /// Swap in a new entity set. The new snapshot starts with an empty cache
    /// because resolved keys may now point at different entities.
    pub fn refresh_entities(&self, entities: EntitySet) {
        let snapshot = Arc::new(Snapshot::new(entities, &self.config));
        *self.snapshot.write() = snapshot;
        info!("entity set refreshed; resolver snapshot swapped");
    }

    pub fn register_assets(&self, assets: Vec<DerAsset>) {
        let registry = Arc::new(AssetRegistry::new(assets));
        info!(assets = registry.len(), "asset registry replaced");
        *self.assets.write() = registry;
    }

    pub fn resolve_geo(&self, lat: f64, lon: f64) -> GridvalResult<GeoContext> {
        let point = GeoPoint::validated(lat, lon)?;
        Ok(self.resolver().resolve(point))
    }

    /// Resolve and value a point against the latest completed run.
    pub fn valuate_prospective(
        &self,
        lat: f64,
        lon: f64,
        der_type: &str,
        capacity_mw: f64,
    ) -> GridvalResult<ValuationResult> {
        let point = GeoPoint::validated(lat, lon)?;
        check_request(&self.config, der_type, capacity_mw)?;
        let snapshot = self.snapshot();
        let ctx = snapshot.resolver.resolve(point);
        self.valuate_in(&snapshot, &ctx, der_type, capacity_mw, None)
    }

    /// Value an already resolved context, optionally pinned to a historical run.
    pub fn valuate_prospective_at(
        &self,
        ctx: &GeoContext,
        der_type: &str,
        capacity_mw: f64,
        run: Option<RunId>,
    ) -> GridvalResult<ValuationResult> {
        self.valuate_in(&self.snapshot(), ctx, der_type, capacity_mw, run)
    }

    fn valuate_in(
        &self,
        snapshot: &Snapshot,
        ctx: &GeoContext,
        der_type: &str,
        capacity_mw: f64,
        run: Option<RunId>,
    ) -> GridvalResult<ValuationResult> {
        let request = check_request(&self.config, der_type, capacity_mw)?;
        let generation = self.scores.generation_or_latest(run)?;
        if let Some(latest) = self.scores.latest_run_id() {
            snapshot.cache.advance_to(latest);
        }

        let key = CacheKey::new(ctx, generation.id(), request.capacity, der_type);
        if let Some(hit) = snapshot.cache.get(&key, ctx) {
            debug!(run = %generation.id(), der_type, "valuation cache hit");
            return Ok(hit);
        }

        let result = Valuator::new(&self.config, snapshot.resolver.entities())
            .prospective(ctx, &generation, request);
        snapshot.cache.insert(key, result.clone());
        Ok(result)
    }

    /// Retrospective valuation of a registered asset against the latest run.
    pub fn valuate_retrospective(
        &self,
        asset_id: &AssetId,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> GridvalResult<RetrospectiveValuation> {
        let asset = self.asset(asset_id)?;
        let point = GeoPoint::validated(asset.location.lat, asset.location.lon)?;
        let snapshot = self.snapshot();
        let ctx = snapshot.resolver.resolve(point);
        self.retrospective_in(&snapshot, &asset, &ctx, start, end, None)
    }

    pub fn valuate_retrospective_at(
        &self,
        asset: &DerAsset,
        ctx: &GeoContext,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
        run: Option<RunId>,
    ) -> GridvalResult<RetrospectiveValuation> {
        self.retrospective_in(&self.snapshot(), asset, ctx, start, end, run)
    }

    fn retrospective_in(
        &self,
        snapshot: &Snapshot,
        asset: &DerAsset,
        ctx: &GeoContext,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
        run: Option<RunId>,
    ) -> GridvalResult<RetrospectiveValuation> {
        if start >= end {
            return Err(GridvalError::InvalidInterval { start, end });
        }
        let generation = self.scores.generation_or_latest(run)?;
        let valuator = Valuator::new(&self.config, snapshot.resolver.entities());
        retrospective::valuate_retrospective(
            &valuator,
            self.intervals.as_ref(),
            &generation,
            asset,
            ctx,
            start,
            end,
        )
    }

    /// Prospective valuation of a registered asset, remembered as its latest.
    pub fn valuate_asset_by_id(&self, asset_id: &AssetId) -> GridvalResult<ValuationResult> {
        let asset = self.asset(asset_id)?;
        self.valuate_asset(&asset)
    }

    pub fn portfolio_summary(&self, iso_code: &str) -> PortfolioSummary {
        let snapshot = self.snapshot();
        let latest = self.scores.latest();
        if let Some(generation) = &latest {
            snapshot.cache.advance_to(generation.id());
        }
        let registry = self.assets();
        let provider = SnapshotProvider {
            engine: self,
            snapshot: &snapshot,
        };
        let valuations = portfolio::latest_valuations(
            registry.assets(),
            latest.as_ref().map(|g| g.id()),
            &snapshot.cache,
            &provider,
        );
        portfolio::summarize(
            iso_code,
            &self.config,
            snapshot.resolver.entities(),
            latest.as_deref(),
            &valuations,
        )
    }

    fn asset(&self, asset_id: &AssetId) -> GridvalResult<DerAsset> {
        self.assets()
            .get(asset_id)
            .cloned()
            .ok_or_else(|| GridvalError::UnknownAsset(asset_id.to_string()))
    }

    fn valuate_asset_in(
        &self,
        snapshot: &Snapshot,
        asset: &DerAsset,
    ) -> GridvalResult<ValuationResult> {
        let point = GeoPoint::validated(asset.location.lat, asset.location.lon)?;
        check_request(&self.config, &asset.der_type, asset.capacity_mw.value())?;
        let ctx = snapshot.resolver.resolve(point);
        let result =
            self.valuate_in(snapshot, &ctx, &asset.der_type, asset.capacity_mw.value(), None)?;
        snapshot
            .cache
            .record_asset(asset.asset_id.clone(), result.clone());
        Ok(result)
    }
}

impl ValuationProvider for Engine {
    fn valuate_asset(&self, asset: &DerAsset) -> GridvalResult<ValuationResult> {
        self.valuate_asset_in(&self.snapshot(), asset)
    }
}

/// Values portfolio assets against one pinned snapshot.
struct SnapshotProvider<'a> {
    engine: &'a Engine,
    snapshot: &'a Snapshot,
}

impl ValuationProvider for SnapshotProvider<'_> {
    fn valuate_asset(&self, asset: &DerAsset) -> GridvalResult<ValuationResult> {
        self.engine.valuate_asset_in(self.snapshot, asset)
    }
}
