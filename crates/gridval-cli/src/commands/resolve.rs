use anyhow::Result;
use gridval_cli::common::{opt, print_fields, print_json, build_engine, OutputFormat};
use gridval_cli::Cli;
use gridval_core::{GeoContext, Kilometers};

pub fn handle(cli: &Cli, lat: f64, lon: f64, format: OutputFormat) -> Result<()> {
    let engine = build_engine(cli, None, false)?;
    let ctx = engine.resolve_geo(lat, lon)?;
    match format {
        OutputFormat::Json => print_json(&ctx),
        OutputFormat::Table => print_context(&ctx),
    }
}

fn with_distance<T: std::fmt::Display>(id: Option<&T>, km: Option<Kilometers>) -> String {
    match (id, km) {
        (Some(id), Some(km)) => format!("{id} ({km})"),
        (Some(id), None) => id.to_string(),
        _ => "-".to_string(),
    }
}

pub fn print_context(ctx: &GeoContext) -> Result<()> {
    let mut rows = vec![
        ("point", ctx.point.to_string()),
        ("iso", opt(ctx.iso_code.as_ref())),
        ("zone", opt(ctx.zone_code.as_ref())),
        (
            "substation",
            with_distance(ctx.substation_ref.as_ref(), ctx.substation_distance_km),
        ),
        ("pnode", with_distance(ctx.pnode_ref.as_ref(), ctx.pnode_distance_km)),
        ("feeder", with_distance(ctx.feeder_ref.as_ref(), ctx.feeder_distance_km)),
        ("circuit", opt(ctx.circuit_ref.as_ref())),
        ("depth", ctx.resolution_depth.to_string()),
        ("confidence", ctx.confidence.to_string()),
    ];
    for warning in &ctx.errors {
        rows.push(("warning", warning.clone()));
    }
    print_fields(&rows)
}
