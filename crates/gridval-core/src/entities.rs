//! Grid entities and the flat, per-refresh [`EntitySet`].
//!
//! Each refresh cycle loads zones, substations, feeders and pricing nodes as
//! independent collections. Parent links are identifiers; [`EntitySet`] builds
//! the id indexes that resolve them. An entity set is never mutated after
//! construction. A refresh builds a new one.

use std::collections::HashMap;

use geo::MultiPolygon;
use serde::{Deserialize, Serialize};

use crate::scores::GridLevel;
use crate::{FeederId, GeoPoint, PnodeId, SubstationId, ZoneCode};

/// Coarse ISO footprint, used only when no zone boundary contains a point.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IsoRegion {
    pub iso_code: String,
    pub boundary: MultiPolygon<f64>,
}

/// Pricing/congestion zone within an ISO.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Zone {
    pub code: ZoneCode,
    pub iso_code: String,
    /// Utility whose territory the zone covers; feeder datasets are keyed by it
    pub utility: Option<String>,
    pub centroid: Option<GeoPoint>,
    pub boundary: MultiPolygon<f64>,
}

impl Zone {
    pub fn new(code: ZoneCode, iso_code: impl Into<String>, boundary: MultiPolygon<f64>) -> Self {
        Self {
            code,
            iso_code: iso_code.into(),
            utility: None,
            centroid: None,
            boundary,
        }
    }

    pub fn with_utility(mut self, utility: impl Into<String>) -> Self {
        self.utility = Some(utility.into());
        self
    }

    pub fn with_centroid(mut self, centroid: GeoPoint) -> Self {
        self.centroid = Some(centroid);
        self
    }

    /// Key under which this zone's substations and feeders are indexed.
    pub fn territory_key(&self) -> &str {
        self.utility.as_deref().unwrap_or(self.code.as_str())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Substation {
    pub id: SubstationId,
    pub name: Option<String>,
    /// Parent zone; `None` when the source data lacks the link
    pub zone: Option<ZoneCode>,
    pub utility: Option<String>,
    pub location: Option<GeoPoint>,
    pub rated_capacity_mw: Option<f64>,
    /// Static peak loading from the utility filing, percent of rating
    pub peak_loading_pct: Option<f64>,
}

impl Substation {
    pub fn new(id: SubstationId) -> Self {
        Self {
            id,
            name: None,
            zone: None,
            utility: None,
            location: None,
            rated_capacity_mw: None,
            peak_loading_pct: None,
        }
    }

    pub fn with_zone(mut self, zone: ZoneCode) -> Self {
        self.zone = Some(zone);
        self
    }

    pub fn with_utility(mut self, utility: impl Into<String>) -> Self {
        self.utility = Some(utility.into());
        self
    }

    pub fn with_location(mut self, location: GeoPoint) -> Self {
        self.location = Some(location);
        self
    }

    pub fn with_peak_loading_pct(mut self, pct: f64) -> Self {
        self.peak_loading_pct = Some(pct);
        self
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Feeder {
    pub id: FeederId,
    pub substation: Option<SubstationId>,
    pub utility: Option<String>,
    pub circuit_id: Option<String>,
    pub location: Option<GeoPoint>,
    /// Remaining hosting capacity in MW
    pub hosting_capacity_mw: Option<f64>,
}

impl Feeder {
    pub fn new(id: FeederId) -> Self {
        Self {
            id,
            substation: None,
            utility: None,
            circuit_id: None,
            location: None,
            hosting_capacity_mw: None,
        }
    }

    pub fn with_substation(mut self, substation: SubstationId) -> Self {
        self.substation = Some(substation);
        self
    }

    pub fn with_utility(mut self, utility: impl Into<String>) -> Self {
        self.utility = Some(utility.into());
        self
    }

    pub fn with_circuit(mut self, circuit_id: impl Into<String>) -> Self {
        self.circuit_id = Some(circuit_id.into());
        self
    }

    pub fn with_location(mut self, location: GeoPoint) -> Self {
        self.location = Some(location);
        self
    }

    pub fn with_hosting_capacity_mw(mut self, mw: f64) -> Self {
        self.hosting_capacity_mw = Some(mw);
        self
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PricingNode {
    pub id: PnodeId,
    pub zone: Option<ZoneCode>,
    pub location: Option<GeoPoint>,
}

impl PricingNode {
    pub fn new(id: PnodeId) -> Self {
        Self {
            id,
            zone: None,
            location: None,
        }
    }

    pub fn with_zone(mut self, zone: ZoneCode) -> Self {
        self.zone = Some(zone);
        self
    }

    pub fn with_location(mut self, location: GeoPoint) -> Self {
        self.location = Some(location);
        self
    }
}

/// Borrowed view over any entity kind.
#[derive(Debug, Clone, Copy)]
pub enum GridEntity<'a> {
    Zone(&'a Zone),
    Substation(&'a Substation),
    Feeder(&'a Feeder),
    PricingNode(&'a PricingNode),
}

impl<'a> GridEntity<'a> {
    pub fn id(&self) -> &'a str {
        match self {
            GridEntity::Zone(z) => z.code.as_str(),
            GridEntity::Substation(s) => s.id.as_str(),
            GridEntity::Feeder(f) => f.id.as_str(),
            GridEntity::PricingNode(p) => p.id.as_str(),
        }
    }

    pub fn level(&self) -> GridLevel {
        match self {
            GridEntity::Zone(_) => GridLevel::Zone,
            GridEntity::Substation(_) => GridLevel::Substation,
            GridEntity::Feeder(_) => GridLevel::Feeder,
            GridEntity::PricingNode(_) => GridLevel::Pnode,
        }
    }

    pub fn centroid(&self) -> Option<GeoPoint> {
        match self {
            GridEntity::Zone(z) => z.centroid,
            GridEntity::Substation(s) => s.location,
            GridEntity::Feeder(f) => f.location,
            GridEntity::PricingNode(p) => p.location,
        }
    }

    /// Parent reference as (level, id), if the source data provided one.
    pub fn parent(&self) -> Option<(GridLevel, &'a str)> {
        match self {
            GridEntity::Zone(_) => None,
            GridEntity::Substation(s) => s.zone.as_ref().map(|z| (GridLevel::Zone, z.as_str())),
            GridEntity::Feeder(f) => f
                .substation
                .as_ref()
                .map(|s| (GridLevel::Substation, s.as_str())),
            GridEntity::PricingNode(p) => p.zone.as_ref().map(|z| (GridLevel::Zone, z.as_str())),
        }
    }
}

/// Immutable entity collection for one ingestion cycle.
#[derive(Debug, Clone, Default)]
pub struct EntitySet {
    pub zones: Vec<Zone>,
    pub iso_regions: Vec<IsoRegion>,
    pub substations: Vec<Substation>,
    pub feeders: Vec<Feeder>,
    pub pnodes: Vec<PricingNode>,
    zone_index: HashMap<ZoneCode, usize>,
    substation_index: HashMap<SubstationId, usize>,
    feeder_index: HashMap<FeederId, usize>,
    pnode_index: HashMap<PnodeId, usize>,
}

impl EntitySet {
    /// Build an entity set and its id indexes. Later duplicates of an id shadow
    /// earlier ones in lookups.
    pub fn new(
        zones: Vec<Zone>,
        iso_regions: Vec<IsoRegion>,
        substations: Vec<Substation>,
        feeders: Vec<Feeder>,
        pnodes: Vec<PricingNode>,
    ) -> Self {
        let zone_index = zones
            .iter()
            .enumerate()
            .map(|(i, z)| (z.code.clone(), i))
            .collect();
        let substation_index = substations
            .iter()
            .enumerate()
            .map(|(i, s)| (s.id.clone(), i))
            .collect();
        let feeder_index = feeders
            .iter()
            .enumerate()
            .map(|(i, f)| (f.id.clone(), i))
            .collect();
        let pnode_index = pnodes
            .iter()
            .enumerate()
            .map(|(i, p)| (p.id.clone(), i))
            .collect();
        Self {
            zones,
            iso_regions,
            substations,
            feeders,
            pnodes,
            zone_index,
            substation_index,
            feeder_index,
            pnode_index,
        }
    }

    pub fn zone(&self, code: &ZoneCode) -> Option<&Zone> {
        self.zone_index.get(code).map(|&i| &self.zones[i])
    }

    pub fn substation(&self, id: &SubstationId) -> Option<&Substation> {
        self.substation_index.get(id).map(|&i| &self.substations[i])
    }

    pub fn feeder(&self, id: &FeederId) -> Option<&Feeder> {
        self.feeder_index.get(id).map(|&i| &self.feeders[i])
    }

    pub fn pnode(&self, id: &PnodeId) -> Option<&PricingNode> {
        self.pnode_index.get(id).map(|&i| &self.pnodes[i])
    }

    /// Look up any entity by level and id.
    pub fn get(&self, level: GridLevel, id: &str) -> Option<GridEntity<'_>> {
        match level {
            GridLevel::Zone => self.zone(&ZoneCode::new(id)).map(GridEntity::Zone),
            GridLevel::Substation => self
                .substation(&SubstationId::new(id))
                .map(GridEntity::Substation),
            GridLevel::Feeder => self.feeder(&FeederId::new(id)).map(GridEntity::Feeder),
            GridLevel::Pnode => self.pnode(&PnodeId::new(id)).map(GridEntity::PricingNode),
        }
    }

    /// Resolve an entity's parent through the id indexes. Dangling links yield `None`.
    pub fn parent_of(&self, entity: GridEntity<'_>) -> Option<GridEntity<'_>> {
        let (level, id) = entity.parent()?;
        self.get(level, id)
    }

    /// Zone an entity ultimately belongs to, following parent links upward.
    pub fn zone_of(&self, entity: GridEntity<'_>) -> Option<&Zone> {
        let mut current = self.get(entity.level(), entity.id())?;
        loop {
            if let GridEntity::Zone(zone) = current {
                return Some(zone);
            }
            current = self.parent_of(current)?;
        }
    }

    /// Search partition for an entity: utility territory for substations and
    /// feeders (own utility, else inherited from the parent chain), zone code
    /// for pricing nodes.
    pub fn territory_of(&self, entity: GridEntity<'_>) -> Option<String> {
        match entity {
            GridEntity::Zone(z) => Some(z.territory_key().to_string()),
            GridEntity::Substation(s) => s
                .utility
                .clone()
                .or_else(|| self.parent_of(entity).and_then(|p| self.territory_of(p))),
            GridEntity::Feeder(f) => f
                .utility
                .clone()
                .or_else(|| self.parent_of(entity).and_then(|p| self.territory_of(p))),
            GridEntity::PricingNode(p) => p.zone.as_ref().map(|z| z.as_str().to_string()),
        }
    }

    pub fn zones_in_iso<'a>(&'a self, iso_code: &'a str) -> impl Iterator<Item = &'a Zone> + 'a {
        self.zones.iter().filter(move |z| z.iso_code == iso_code)
    }

    pub fn is_empty(&self) -> bool {
        self.zones.is_empty()
            && self.iso_regions.is_empty()
            && self.substations.is_empty()
            && self.feeders.is_empty()
            && self.pnodes.is_empty()
    }
}
