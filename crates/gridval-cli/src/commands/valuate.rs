use anyhow::Result;
use gridval_cli::common::{build_engine, money, opt, print_fields, print_json, OutputFormat};
use gridval_cli::Cli;
use gridval_core::{RunId, ValuationResult, ValueBreakdown};

pub fn handle(
    cli: &Cli,
    lat: f64,
    lon: f64,
    der_type: &str,
    capacity_mw: f64,
    run: Option<u64>,
    format: OutputFormat,
) -> Result<()> {
    let engine = build_engine(cli, None, false)?;
    let result = match run {
        None => engine.valuate_prospective(lat, lon, der_type, capacity_mw)?,
        Some(run) => {
            let ctx = engine.resolve_geo(lat, lon)?;
            engine.valuate_prospective_at(&ctx, der_type, capacity_mw, Some(RunId::new(run)))?
        }
    };
    match format {
        OutputFormat::Json => print_json(&result),
        OutputFormat::Table => print_valuation(&result),
    }
}

pub fn breakdown_rows(b: &ValueBreakdown) -> Vec<(&'static str, String)> {
    vec![
        ("zone congestion", money(b.zone_congestion_value)),
        ("pnode multiplier", format!("{:.3}", b.pnode_multiplier)),
        ("substation loading", money(b.substation_loading_value)),
        ("feeder capacity", money(b.feeder_capacity_value)),
    ]
}

fn print_valuation(v: &ValuationResult) -> Result<()> {
    let mut rows = vec![
        ("zone", opt(v.geo_context.zone_code.as_ref())),
        ("depth", v.geo_context.resolution_depth.to_string()),
        ("der type", v.der_type.clone()),
        ("capacity", v.capacity_mw.to_string()),
        ("pipeline run", v.pipeline_run_id.to_string()),
    ];
    rows.extend(breakdown_rows(&v.value_breakdown));
    rows.extend([
        ("total $/yr", money(v.total_constraint_relief_value)),
        ("coincidence", format!("{:.3}", v.coincidence_factor)),
        ("effective capacity", v.effective_capacity_mw.to_string()),
        ("$/kW-yr", format!("{:.2}", v.value_per_kw_year)),
        ("tier", v.value_tier.to_string()),
    ]);
    for warning in v.warnings.iter().chain(&v.geo_context.errors) {
        rows.push(("warning", warning.clone()));
    }
    print_fields(&rows)
}
