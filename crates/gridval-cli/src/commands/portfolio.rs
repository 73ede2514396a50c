use std::io::Write;

use anyhow::Result;
use gridval_cli::common::{
    build_engine, money, opt, print_fields, print_json, table_writer, OutputFormat,
};
use gridval_cli::Cli;
use gridval_core::PortfolioSummary;

pub fn handle(cli: &Cli, iso: &str, format: OutputFormat) -> Result<()> {
    let engine = build_engine(cli, None, false)?;
    let summary = engine.portfolio_summary(iso);
    match format {
        OutputFormat::Json => print_json(&summary),
        OutputFormat::Table => print_summary(&summary),
    }
}

fn print_summary(s: &PortfolioSummary) -> Result<()> {
    let mut rows = vec![
        ("iso", s.iso_code.clone()),
        ("pipeline run", opt(s.pipeline_run_id)),
        ("zones", format!("{} ({} constrained)", s.total_zones, s.constrained_zones)),
        (
            "substations",
            format!("{} ({} overloaded)", s.total_substations, s.overloaded_substations),
        ),
        ("DER locations", s.total_der_locations.to_string()),
        ("portfolio $/yr", money(s.total_portfolio_value)),
        ("avg $/kW-yr", format!("{:.2}", s.avg_value_per_kw_year)),
    ];
    for (tier, count) in s.tier_distribution.iter().rev() {
        rows.push(("tier", format!("{tier}: {count}")));
    }
    print_fields(&rows)?;

    if !s.top_zones.is_empty() {
        println!();
        let mut writer = table_writer();
        writeln!(writer, "ZONE\tAVG $/YR\tDERS")?;
        for zone in &s.top_zones {
            writeln!(
                writer,
                "{}\t{}\t{}",
                zone.zone_code,
                money(zone.avg_constraint_value),
                zone.der_count
            )?;
        }
        writer.flush()?;
    }
    Ok(())
}
