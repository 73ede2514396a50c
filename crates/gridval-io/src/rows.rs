//! Shared CSV row reading.

use std::path::Path;

use anyhow::{Context, Result};
use csv::{ReaderBuilder, Trim};
use gridval_core::{GeoPoint, LoadDiagnostics};
use serde::de::DeserializeOwned;

/// Deserialize every row of a headered CSV file. Rows that fail to parse are
/// recorded in `diag` under `category` with their line number and skipped.
pub(crate) fn read_rows<T: DeserializeOwned>(
    path: &Path,
    category: &str,
    diag: &mut LoadDiagnostics,
) -> Result<Vec<(usize, T)>> {
    let mut rdr = ReaderBuilder::new()
        .has_headers(true)
        .trim(Trim::All)
        .from_path(path)
        .with_context(|| format!("opening CSV: {}", path.display()))?;
    let headers = rdr
        .headers()
        .with_context(|| format!("reading CSV header: {}", path.display()))?
        .clone();

    let mut rows = Vec::new();
    for result in rdr.records() {
        let record = result.with_context(|| format!("reading CSV: {}", path.display()))?;
        let line = record.position().map_or(0, |p| p.line() as usize);
        match record.deserialize::<T>(Some(&headers)) {
            Ok(row) => rows.push((line, row)),
            Err(e) => diag.skip_row(category, &e.to_string(), line),
        }
    }
    Ok(rows)
}

/// Combine optional lat/lon columns. Both absent is `Ok(None)`; one absent or
/// an out-of-range value is an error message for the caller to record.
pub(crate) fn location(lat: Option<f64>, lon: Option<f64>) -> Result<Option<GeoPoint>, String> {
    match (lat, lon) {
        (None, None) => Ok(None),
        (Some(lat), Some(lon)) => GeoPoint::validated(lat, lon)
            .map(Some)
            .map_err(|e| e.to_string()),
        _ => Err("lat and lon must both be present or both empty".to_string()),
    }
}
