//! Spatial hierarchy resolver: (lat, lon) to ISO, zone, substation, feeder and
//! pricing node.
//!
//! A [`HierarchyResolver`] is an immutable snapshot built from one
//! [`EntitySet`]. Building it precomputes zone bounding boxes and areas and one
//! [`SpatialIndex`] per territory for each searchable level. Resolution only reads
//! the snapshot, so a single resolver serves any number of concurrent calls, and a
//! refresh builds a new one rather than touching this one.
//!
//! Degraded steps never fail. Each one appends a warning to
//! [`GeoContext::errors`] and the result carries whatever depth was reached.

use std::collections::HashMap;
use std::sync::Arc;

use geo::{Area, BoundingRect, Contains, Rect};
use gridval_core::{
    Confidence, Diagnostics, EntitySet, GeoContext, GeoPoint, GridEntity, Kilometers,
    ResolutionDepth, ResolverConfig,
};
use tracing::debug;

use crate::spatial::{Nearest, SpatialIndex};

struct ZoneShape {
    bbox: Option<Rect<f64>>,
    area: f64,
}

/// Per-territory nearest-neighbour indexes over entity positions in the
/// [`EntitySet`] vectors.
type TerritoryIndex = HashMap<String, SpatialIndex<usize>>;

pub struct HierarchyResolver {
    entities: Arc<EntitySet>,
    config: ResolverConfig,
    zone_shapes: Vec<ZoneShape>,
    iso_shapes: Vec<ZoneShape>,
    substations: TerritoryIndex,
    feeders: TerritoryIndex,
    pnodes: TerritoryIndex,
    diagnostics: Diagnostics,
}

impl HierarchyResolver {
    pub fn build(entities: Arc<EntitySet>, config: ResolverConfig) -> Self {
        let mut diagnostics = Diagnostics::new();

        let zone_shapes = entities
            .zones
            .iter()
            .map(|z| ZoneShape {
                bbox: z.boundary.bounding_rect(),
                area: z.boundary.unsigned_area(),
            })
            .collect();
        let iso_shapes = entities
            .iso_regions
            .iter()
            .map(|r| ZoneShape {
                bbox: r.boundary.bounding_rect(),
                area: r.boundary.unsigned_area(),
            })
            .collect();

        let substations = index_by_territory(
            &entities,
            entities.substations.iter().map(GridEntity::Substation),
            &mut diagnostics,
        );
        let feeders = index_by_territory(
            &entities,
            entities.feeders.iter().map(GridEntity::Feeder),
            &mut diagnostics,
        );
        let pnodes = index_by_territory(
            &entities,
            entities.pnodes.iter().map(GridEntity::PricingNode),
            &mut diagnostics,
        );

        debug!(
            zones = entities.zones.len(),
            substation_territories = substations.len(),
            feeder_territories = feeders.len(),
            pnode_territories = pnodes.len(),
            skipped = diagnostics.warning_count(),
            "built hierarchy resolver"
        );

        Self {
            entities,
            config,
            zone_shapes,
            iso_shapes,
            substations,
            feeders,
            pnodes,
            diagnostics,
        }
    }

    pub fn entities(&self) -> &Arc<EntitySet> {
        &self.entities
    }

    pub fn config(&self) -> &ResolverConfig {
        &self.config
    }

    /// Entities that could not be indexed (no location or no territory).
    pub fn diagnostics(&self) -> &Diagnostics {
        &self.diagnostics
    }

    /// Whether a feeder-level dataset exists for a territory.
    pub fn has_feeder_data(&self, territory: &str) -> bool {
        self.feeders.contains_key(territory)
    }

    /// Attach the grid hierarchy to a point. Never fails; see the module docs.
    pub fn resolve(&self, point: GeoPoint) -> GeoContext {
        let mut ctx = GeoContext::unresolved(point);

        let Some(zone_idx) = self.containing_zone(point, &mut ctx.errors) else {
            ctx.errors.push("no zone boundary contains point".to_string());
            match self.containing_iso(point) {
                Some(iso_code) => {
                    ctx.errors
                        .push(format!("resolved to {iso_code} ISO boundary only"));
                    ctx.iso_code = Some(iso_code);
                    ctx.resolution_depth = ResolutionDepth::Iso;
                }
                None => ctx.errors.push("no ISO boundary contains point".to_string()),
            }
            return ctx;
        };

        let zone = &self.entities.zones[zone_idx];
        ctx.iso_code = Some(zone.iso_code.clone());
        ctx.zone_code = Some(zone.code.clone());
        let territory = zone.territory_key();

        if let Some(hit) = self.nearest_within(
            &self.substations,
            territory,
            point,
            "substation",
            self.config.substation_cutoff_km,
            &mut ctx.errors,
        ) {
            let sub = &self.entities.substations[*hit.item];
            ctx.substation_ref = Some(sub.id.clone());
            ctx.substation_distance_km = Some(hit.distance);
        }

        if self.has_feeder_data(territory) {
            if let Some(hit) = self.nearest_within(
                &self.feeders,
                territory,
                point,
                "feeder",
                self.config.feeder_cutoff_for(territory),
                &mut ctx.errors,
            ) {
                let feeder = &self.entities.feeders[*hit.item];
                ctx.feeder_ref = Some(feeder.id.clone());
                ctx.feeder_distance_km = Some(hit.distance);
                ctx.circuit_ref = feeder.circuit_id.clone();
            }
        } else {
            ctx.errors
                .push(format!("no feeder-level dataset for utility {territory}"));
        }

        if let Some(hit) = self.nearest_within(
            &self.pnodes,
            zone.code.as_str(),
            point,
            "pricing node",
            self.config.pnode_cutoff_km,
            &mut ctx.errors,
        ) {
            let pnode = &self.entities.pnodes[*hit.item];
            ctx.pnode_ref = Some(pnode.id.clone());
            ctx.pnode_distance_km = Some(hit.distance);
        }

        ctx.resolution_depth = ctx.deepest_attached();
        ctx.confidence = if ctx.substation_ref.is_some() || ctx.feeder_ref.is_some() {
            Confidence::High
        } else {
            Confidence::Medium
        };
        ctx
    }

    /// Smallest-area zone containing the point, ties broken by zone code.
    fn containing_zone(&self, point: GeoPoint, errors: &mut Vec<String>) -> Option<usize> {
        let pt = point.to_point();
        let mut hits: Vec<usize> = self
            .zone_shapes
            .iter()
            .enumerate()
            .filter(|(_, shape)| shape.bbox.is_some_and(|b| b.contains(&pt)))
            .map(|(i, _)| i)
            .filter(|&i| self.entities.zones[i].boundary.contains(&pt))
            .collect();
        hits.sort_by(|&a, &b| {
            self.zone_shapes[a]
                .area
                .total_cmp(&self.zone_shapes[b].area)
                .then_with(|| self.entities.zones[a].code.cmp(&self.entities.zones[b].code))
        });

        if hits.len() > 1 {
            let codes: Vec<&str> = hits
                .iter()
                .map(|&i| self.entities.zones[i].code.as_str())
                .collect();
            errors.push(format!(
                "point lies in {} overlapping zones ({}); chose smallest: {}",
                hits.len(),
                codes.join(", "),
                codes[0]
            ));
        }
        hits.first().copied()
    }

    fn containing_iso(&self, point: GeoPoint) -> Option<String> {
        let pt = point.to_point();
        self.entities
            .iso_regions
            .iter()
            .zip(&self.iso_shapes)
            .filter(|(region, shape)| {
                shape.bbox.is_some_and(|b| b.contains(&pt)) && region.boundary.contains(&pt)
            })
            .min_by(|(ra, sa), (rb, sb)| {
                sa.area
                    .total_cmp(&sb.area)
                    .then_with(|| ra.iso_code.cmp(&rb.iso_code))
            })
            .map(|(region, _)| region.iso_code.clone())
    }

    fn nearest_within<'a>(
        &'a self,
        indexes: &'a TerritoryIndex,
        territory: &str,
        point: GeoPoint,
        label: &str,
        cutoff_km: f64,
        errors: &mut Vec<String>,
    ) -> Option<Nearest<'a, usize>> {
        let Some(hit) = indexes.get(territory).and_then(|idx| idx.nearest(point)) else {
            errors.push(format!("no {label} indexed for territory {territory}"));
            return None;
        };
        if hit.distance.value() > cutoff_km {
            errors.push(format!(
                "nearest {label} exceeds {} cutoff: {}",
                format_cutoff(cutoff_km),
                hit.distance
            ));
            return None;
        }
        Some(hit)
    }
}

/// `5km`, `2.5km`: cutoffs print without a trailing `.0`.
fn format_cutoff(km: f64) -> String {
    if km.fract() == 0.0 {
        format!("{km:.0}km")
    } else {
        format!("{}", Kilometers(km))
    }
}

fn index_by_territory<'a>(
    entities: &'a EntitySet,
    items: impl Iterator<Item = GridEntity<'a>>,
    diagnostics: &mut Diagnostics,
) -> TerritoryIndex {
    let mut grouped: HashMap<String, Vec<(GeoPoint, usize)>> = HashMap::new();
    for (pos, entity) in items.enumerate() {
        let category = format!("index.{}", entity.level());
        let Some(location) = entity.centroid() else {
            diagnostics.add_warning_with_entity(
                &category,
                "no location; not searchable",
                entity.id(),
            );
            continue;
        };
        let Some(territory) = entities.territory_of(entity) else {
            diagnostics.add_warning_with_entity(
                &category,
                "no utility or resolvable parent; not searchable",
                entity.id(),
            );
            continue;
        };
        grouped.entry(territory).or_default().push((location, pos));
    }
    grouped
        .into_iter()
        .map(|(territory, points)| (territory, SpatialIndex::build(points)))
        .collect()
}
