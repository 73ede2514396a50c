//! Static nearest-neighbour index over geographic points.
//!
//! Points are embedded as unit vectors on the sphere and bulk-loaded into an
//! `rstar` R-tree. Chord length between unit vectors is monotone in
//! great-circle distance, so the nearest point by chord is the nearest point on
//! the sphere without any special handling of the antimeridian or the poles.
//!
//! The index is built once per entity refresh and only read afterwards. It is
//! `Sync` whenever `T` is, so a single instance serves concurrent lookups.

use geo::HaversineDistance;
use gridval_core::{GeoPoint, Kilometers};
use rstar::primitives::GeomWithData;
use rstar::RTree;

/// Unit vector tagged with the insertion sequence of its item.
type Node = GeomWithData<[f64; 3], usize>;

/// Closest indexed item to a query point.
#[derive(Debug, Clone, Copy)]
pub struct Nearest<'a, T> {
    pub item: &'a T,
    pub location: GeoPoint,
    /// Haversine distance from the query point
    pub distance: Kilometers,
}

pub struct SpatialIndex<T> {
    tree: RTree<Node>,
    items: Vec<(GeoPoint, T)>,
}

impl<T> SpatialIndex<T> {
    /// Build the tree. Among equidistant points, the one inserted first wins.
    pub fn build(items: impl IntoIterator<Item = (GeoPoint, T)>) -> Self {
        let items: Vec<(GeoPoint, T)> = items.into_iter().collect();
        let nodes = items
            .iter()
            .enumerate()
            .map(|(seq, (location, _))| GeomWithData::new(unit_vector(*location), seq))
            .collect();
        Self {
            tree: RTree::bulk_load(nodes),
            items,
        }
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn nearest(&self, point: GeoPoint) -> Option<Nearest<'_, T>> {
        let target = unit_vector(point);
        let mut candidates = self.tree.nearest_neighbor_iter_with_distance_2(&target);
        let (first, best_d) = candidates.next()?;
        // the iterator yields by distance; scan the tied prefix for the earliest insert
        let seq = candidates
            .take_while(|(_, d)| *d <= best_d)
            .map(|(node, _)| node.data)
            .fold(first.data, usize::min);

        let (location, item) = &self.items[seq];
        Some(Nearest {
            item,
            location: *location,
            distance: haversine_km(point, *location),
        })
    }
}

/// Great-circle distance between two points.
pub fn haversine_km(a: GeoPoint, b: GeoPoint) -> Kilometers {
    Kilometers::from_meters(a.to_point().haversine_distance(&b.to_point()))
}

fn unit_vector(p: GeoPoint) -> [f64; 3] {
    let (lat, lon) = (p.lat.to_radians(), p.lon.to_radians());
    [lat.cos() * lon.cos(), lat.cos() * lon.sin(), lat.sin()]
}
