use std::path::Path;

use anyhow::Result;
use chrono::{DateTime, Utc};
use gridval_cli::common::{build_engine, money, opt, print_fields, print_json, OutputFormat};
use gridval_cli::Cli;
use gridval_core::{AssetId, GridvalError, RetrospectiveValuation, RunId};

use super::valuate::breakdown_rows;

pub fn handle(
    cli: &Cli,
    asset_id: &str,
    start: DateTime<Utc>,
    end: DateTime<Utc>,
    intervals: Option<&Path>,
    run: Option<u64>,
    format: OutputFormat,
) -> Result<()> {
    let engine = build_engine(cli, intervals, true)?;
    let asset_id = AssetId::new(asset_id);
    let result = match run {
        None => engine.valuate_retrospective(&asset_id, start, end)?,
        Some(run) => {
            let registry = engine.assets();
            let asset = registry
                .get(&asset_id)
                .ok_or_else(|| GridvalError::UnknownAsset(asset_id.to_string()))?;
            let ctx = engine.resolve_geo(asset.location.lat, asset.location.lon)?;
            engine.valuate_retrospective_at(asset, &ctx, start, end, Some(RunId::new(run)))?
        }
    };
    match format {
        OutputFormat::Json => print_json(&result),
        OutputFormat::Table => print_retrospective(&result),
    }
}

fn print_retrospective(v: &RetrospectiveValuation) -> Result<()> {
    let mut rows = vec![
        ("asset", v.asset_id.to_string()),
        ("zone", opt(v.geo_context.zone_code.as_ref())),
        ("der type", v.der_type.clone()),
        ("capacity", v.capacity_mw.to_string()),
        ("pipeline run", v.pipeline_run_id.to_string()),
        (
            "interval",
            format!("{} .. {}", v.retrospective_start, v.retrospective_end),
        ),
        ("hours", v.interval_hours.to_string()),
        ("constrained hours", v.constrained_hours.to_string()),
        ("savings MWh", format!("{:.3}", v.actual_savings_mwh)),
    ];
    rows.extend(breakdown_rows(&v.value_breakdown));
    rows.extend([
        ("interval value", money(v.total_constraint_relief_value)),
        ("$/kW-yr", format!("{:.2}", v.value_per_kw_year)),
        ("tier", v.value_tier.to_string()),
    ]);
    for warning in &v.warnings {
        rows.push(("warning", warning.clone()));
    }
    print_fields(&rows)
}
