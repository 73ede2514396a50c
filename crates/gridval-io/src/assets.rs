//! DER asset registry CSV: `asset_id,lat,lon,der_type,capacity_mw`.

use std::fs;
use std::path::Path;

use anyhow::{Context, Result};
use gridval_core::{AssetId, DerAsset, GeoPoint, LoadDiagnostics, Megawatts};
use serde::{Deserialize, Serialize};

use crate::rows::read_rows;

#[derive(Debug, Serialize, Deserialize)]
struct AssetRow {
    asset_id: String,
    lat: f64,
    lon: f64,
    der_type: String,
    capacity_mw: f64,
}

/// Load registered assets. Rows with bad coordinates or a non-positive
/// capacity are skipped. DER types are checked later, per request.
pub fn load_assets(path: &Path) -> Result<(Vec<DerAsset>, LoadDiagnostics)> {
    let mut diag = LoadDiagnostics::new();
    let rows: Vec<(usize, AssetRow)> = read_rows(path, "assets", &mut diag)?;
    let mut assets = Vec::with_capacity(rows.len());
    for (line, row) in rows {
        let location = match GeoPoint::validated(row.lat, row.lon) {
            Ok(p) => p,
            Err(e) => {
                diag.skip_row("assets", &e.to_string(), line);
                continue;
            }
        };
        if !(row.capacity_mw.is_finite() && row.capacity_mw > 0.0) {
            diag.skip_row("assets", "capacity_mw must be > 0", line);
            continue;
        }
        assets.push(DerAsset {
            asset_id: AssetId::new(row.asset_id),
            location,
            der_type: row.der_type,
            capacity_mw: Megawatts(row.capacity_mw),
        });
    }
    Ok((assets, diag))
}

/// Write assets in the registry format, replacing `path` atomically.
pub fn write_assets(path: &Path, assets: &[DerAsset]) -> Result<()> {
    let tmp = path.with_extension("csv.tmp");
    {
        let mut wtr = csv::Writer::from_path(&tmp)
            .with_context(|| format!("creating {}", tmp.display()))?;
        for a in assets {
            wtr.serialize(AssetRow {
                asset_id: a.asset_id.to_string(),
                lat: a.location.lat,
                lon: a.location.lon,
                der_type: a.der_type.clone(),
                capacity_mw: a.capacity_mw.value(),
            })
            .context("writing asset row")?;
        }
        wtr.flush().context("flushing asset CSV")?;
    }
    fs::rename(&tmp, path).with_context(|| format!("renaming to {}", path.display()))?;
    Ok(())
}
