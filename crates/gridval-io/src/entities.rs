//! Entity directory loader.
//!
//! ```text
//! <dir>/zones.json        required
//! <dir>/isos.json         optional ISO footprints
//! <dir>/substations.csv   required
//! <dir>/feeders.csv       optional
//! <dir>/pnodes.csv        optional
//! ```
//!
//! Boundaries are lists of exterior rings in `[lon, lat]` order, one polygon
//! per ring. Parent links that are empty or name an entity not in the files
//! load as `None` and are counted in `unresolved_parents`.

use std::collections::{HashMap, HashSet};
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use geo::{LineString, MultiPolygon, Polygon};
use gridval_core::{
    DiagnosticIssue, EntitySet, Feeder, FeederId, GeoPoint, IsoRegion, LoadDiagnostics, PnodeId,
    PricingNode, Severity, Substation, SubstationId, Zone, ZoneCode,
};
use serde::Deserialize;
use tracing::{debug, info};

use crate::rows::{location, read_rows};

/// File layout of an entity directory.
#[derive(Debug, Clone)]
pub struct EntityPaths {
    pub zones: PathBuf,
    pub isos: PathBuf,
    pub substations: PathBuf,
    pub feeders: PathBuf,
    pub pnodes: PathBuf,
}

impl EntityPaths {
    pub fn in_dir(dir: &Path) -> Self {
        Self {
            zones: dir.join("zones.json"),
            isos: dir.join("isos.json"),
            substations: dir.join("substations.csv"),
            feeders: dir.join("feeders.csv"),
            pnodes: dir.join("pnodes.csv"),
        }
    }
}

#[derive(Debug, Deserialize)]
struct ZoneRecord {
    zone_code: String,
    iso_code: String,
    #[serde(default)]
    utility: Option<String>,
    #[serde(default)]
    centroid: Option<GeoPoint>,
    boundary: Vec<Vec<[f64; 2]>>,
}

#[derive(Debug, Deserialize)]
struct IsoRecord {
    iso_code: String,
    boundary: Vec<Vec<[f64; 2]>>,
}

#[derive(Debug, Deserialize)]
struct SubstationRow {
    substation_id: String,
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    zone_code: Option<String>,
    #[serde(default)]
    utility: Option<String>,
    #[serde(default)]
    lat: Option<f64>,
    #[serde(default)]
    lon: Option<f64>,
    #[serde(default)]
    rated_capacity_mw: Option<f64>,
    #[serde(default)]
    peak_loading_pct: Option<f64>,
}

#[derive(Debug, Deserialize)]
struct FeederRow {
    feeder_id: String,
    #[serde(default)]
    substation_id: Option<String>,
    #[serde(default)]
    utility: Option<String>,
    #[serde(default)]
    circuit_id: Option<String>,
    #[serde(default)]
    lat: Option<f64>,
    #[serde(default)]
    lon: Option<f64>,
    #[serde(default)]
    hosting_capacity_mw: Option<f64>,
}

#[derive(Debug, Deserialize)]
struct PnodeRow {
    pnode_id: String,
    #[serde(default)]
    zone_code: Option<String>,
    #[serde(default)]
    lat: Option<f64>,
    #[serde(default)]
    lon: Option<f64>,
}

/// Load the entity files found in `dir`.
pub fn load_entities(dir: &Path) -> Result<(EntitySet, LoadDiagnostics)> {
    load_entity_files(&EntityPaths::in_dir(dir))
}

pub fn load_entity_files(paths: &EntityPaths) -> Result<(EntitySet, LoadDiagnostics)> {
    let mut diag = LoadDiagnostics::new();

    let zones = load_zones(&paths.zones, &mut diag)?;
    let isos = if paths.isos.exists() {
        load_isos(&paths.isos, &mut diag)?
    } else {
        debug!(path = %paths.isos.display(), "no ISO footprint file");
        Vec::new()
    };
    let zone_codes: HashSet<&ZoneCode> = zones.iter().map(|z| &z.code).collect();

    let substations = load_substations(&paths.substations, &zone_codes, &mut diag)?;
    let substation_ids: HashSet<&SubstationId> = substations.iter().map(|s| &s.id).collect();

    let feeders = if paths.feeders.exists() {
        load_feeders(&paths.feeders, &substation_ids, &mut diag)?
    } else {
        Vec::new()
    };
    let pnodes = if paths.pnodes.exists() {
        load_pnodes(&paths.pnodes, &zone_codes, &mut diag)?
    } else {
        Vec::new()
    };

    diag.stats.zones = zones.len();
    diag.stats.iso_regions = isos.len();
    diag.stats.substations = substations.len();
    diag.stats.feeders = feeders.len();
    diag.stats.pnodes = pnodes.len();
    info!(
        zones = diag.stats.zones,
        substations = diag.stats.substations,
        feeders = diag.stats.feeders,
        pnodes = diag.stats.pnodes,
        skipped = diag.stats.skipped_rows,
        "loaded entity set"
    );

    Ok((EntitySet::new(zones, isos, substations, feeders, pnodes), diag))
}

fn read_json<T: for<'de> Deserialize<'de>>(path: &Path) -> Result<T> {
    let text = fs::read_to_string(path)
        .with_context(|| format!("reading {}", path.display()))?;
    serde_json::from_str(&text).with_context(|| format!("parsing {}", path.display()))
}

fn rings_to_multipolygon(rings: &[Vec<[f64; 2]>]) -> Result<MultiPolygon<f64>, String> {
    if rings.is_empty() {
        return Err("boundary has no rings".to_string());
    }
    let mut polygons = Vec::with_capacity(rings.len());
    for (i, ring) in rings.iter().enumerate() {
        if ring.len() < 3 {
            return Err(format!("ring {i} has {} points (need at least 3)", ring.len()));
        }
        for &[lon, lat] in ring {
            GeoPoint::validated(lat, lon).map_err(|e| format!("ring {i}: {e}"))?;
        }
        let exterior: LineString<f64> = ring.iter().map(|&[lon, lat]| (lon, lat)).collect();
        polygons.push(Polygon::new(exterior, vec![]));
    }
    Ok(MultiPolygon(polygons))
}

fn skip_entity(diag: &mut LoadDiagnostics, category: &str, entity: &str, message: &str) {
    diag.stats.skipped_rows += 1;
    diag.diagnostics
        .add(DiagnosticIssue::new(Severity::Error, category, message).with_entity(entity));
}

fn load_zones(path: &Path, diag: &mut LoadDiagnostics) -> Result<Vec<Zone>> {
    let records: Vec<ZoneRecord> = read_json(path)?;
    let mut position: HashMap<String, usize> = HashMap::new();
    let mut zones: Vec<Zone> = Vec::with_capacity(records.len());
    for rec in records {
        let entity = format!("Zone {}", rec.zone_code);
        let boundary = match rings_to_multipolygon(&rec.boundary) {
            Ok(b) => b,
            Err(msg) => {
                skip_entity(diag, "zones", &entity, &msg);
                continue;
            }
        };
        let mut zone = Zone::new(ZoneCode::new(rec.zone_code.as_str()), rec.iso_code, boundary);
        zone.utility = rec.utility.filter(|u| !u.is_empty());
        zone.centroid = rec.centroid;
        match position.get(&rec.zone_code) {
            Some(&i) => {
                diag.diagnostics.add_warning_with_entity(
                    "zones",
                    "duplicate zone code; later entry wins",
                    &entity,
                );
                zones[i] = zone;
            }
            None => {
                position.insert(rec.zone_code, zones.len());
                zones.push(zone);
            }
        }
    }
    Ok(zones)
}

fn load_isos(path: &Path, diag: &mut LoadDiagnostics) -> Result<Vec<IsoRegion>> {
    let records: Vec<IsoRecord> = read_json(path)?;
    let mut isos = Vec::with_capacity(records.len());
    for rec in records {
        match rings_to_multipolygon(&rec.boundary) {
            Ok(boundary) => isos.push(IsoRegion {
                iso_code: rec.iso_code,
                boundary,
            }),
            Err(msg) => skip_entity(diag, "isos", &format!("ISO {}", rec.iso_code), &msg),
        }
    }
    Ok(isos)
}

fn load_substations(
    path: &Path,
    zones: &HashSet<&ZoneCode>,
    diag: &mut LoadDiagnostics,
) -> Result<Vec<Substation>> {
    let rows: Vec<(usize, SubstationRow)> = read_rows(path, "substations", diag)?;
    let mut out = Vec::with_capacity(rows.len());
    for (line, row) in rows {
        let location = match location(row.lat, row.lon) {
            Ok(loc) => loc,
            Err(msg) => {
                diag.skip_row("substations", &msg, line);
                continue;
            }
        };
        let entity = format!("Substation {}", row.substation_id);
        let mut sub = Substation::new(SubstationId::new(row.substation_id));
        sub.name = row.name;
        sub.utility = row.utility;
        sub.location = location;
        sub.rated_capacity_mw = row.rated_capacity_mw;
        sub.peak_loading_pct = row.peak_loading_pct;
        sub.zone = match row.zone_code {
            Some(code) if zones.contains(&ZoneCode::new(code.as_str())) => {
                Some(ZoneCode::new(code))
            }
            Some(code) => {
                diag.unresolved_parent(&entity, &format!("zone {code} not loaded"));
                None
            }
            None => {
                diag.unresolved_parent(&entity, "no parent zone");
                None
            }
        };
        out.push(sub);
    }
    Ok(out)
}

fn load_feeders(
    path: &Path,
    substations: &HashSet<&SubstationId>,
    diag: &mut LoadDiagnostics,
) -> Result<Vec<Feeder>> {
    let rows: Vec<(usize, FeederRow)> = read_rows(path, "feeders", diag)?;
    let mut out = Vec::with_capacity(rows.len());
    for (line, row) in rows {
        let location = match location(row.lat, row.lon) {
            Ok(loc) => loc,
            Err(msg) => {
                diag.skip_row("feeders", &msg, line);
                continue;
            }
        };
        if row.hosting_capacity_mw.is_some_and(|mw| !mw.is_finite() || mw < 0.0) {
            diag.skip_row("feeders", "hosting_capacity_mw must be >= 0", line);
            continue;
        }
        let entity = format!("Feeder {}", row.feeder_id);
        let mut feeder = Feeder::new(FeederId::new(row.feeder_id));
        feeder.utility = row.utility;
        feeder.circuit_id = row.circuit_id;
        feeder.location = location;
        feeder.hosting_capacity_mw = row.hosting_capacity_mw;
        feeder.substation = match row.substation_id {
            Some(id) if substations.contains(&SubstationId::new(id.as_str())) => {
                Some(SubstationId::new(id))
            }
            Some(id) => {
                diag.unresolved_parent(&entity, &format!("substation {id} not loaded"));
                None
            }
            None => {
                diag.unresolved_parent(&entity, "no parent substation");
                None
            }
        };
        out.push(feeder);
    }
    Ok(out)
}

fn load_pnodes(
    path: &Path,
    zones: &HashSet<&ZoneCode>,
    diag: &mut LoadDiagnostics,
) -> Result<Vec<PricingNode>> {
    let rows: Vec<(usize, PnodeRow)> = read_rows(path, "pnodes", diag)?;
    let mut out = Vec::with_capacity(rows.len());
    for (line, row) in rows {
        let location = match location(row.lat, row.lon) {
            Ok(loc) => loc,
            Err(msg) => {
                diag.skip_row("pnodes", &msg, line);
                continue;
            }
        };
        let entity = format!("PricingNode {}", row.pnode_id);
        let mut pnode = PricingNode::new(PnodeId::new(row.pnode_id));
        pnode.location = location;
        pnode.zone = match row.zone_code {
            Some(code) if zones.contains(&ZoneCode::new(code.as_str())) => {
                Some(ZoneCode::new(code))
            }
            Some(code) => {
                diag.unresolved_parent(&entity, &format!("zone {code} not loaded"));
                None
            }
            None => {
                diag.unresolved_parent(&entity, "no parent zone");
                None
            }
        };
        out.push(pnode);
    }
    Ok(out)
}
