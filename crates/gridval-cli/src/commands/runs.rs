use std::io::Write;

use anyhow::Result;
use gridval_algo::ScoreStore;
use gridval_cli::common::{
    open_run_store, opt, print_fields, print_json, table_writer, OutputFormat,
};
use gridval_cli::{Cli, RunsCommands};
use gridval_core::{PipelineRun, RunId, ScoreRecord};
use serde::Serialize;

pub fn handle(cli: &Cli, command: &RunsCommands) -> Result<()> {
    // a missing store directory lists as empty rather than being created
    let store = if cli.store.exists() {
        open_run_store(cli)?.load()?
    } else {
        ScoreStore::new()
    };
    match command {
        RunsCommands::List { format } => list(&store, *format),
        RunsCommands::Describe {
            run_id,
            top,
            format,
        } => describe(&store, run_id.map(RunId::new), *top, *format),
    }
}

pub fn run_rows(run: &PipelineRun) -> Vec<(&'static str, String)> {
    vec![
        ("run", run.id.to_string()),
        ("status", run.status.as_str().to_string()),
        ("window", format!("{} .. {}", run.window_start, run.window_end)),
        ("started", run.started_at.to_string()),
        ("finished", opt(run.finished_at)),
        (
            "weights",
            format!(
                "congestion {:.2} / loading {:.2}",
                run.congestion_weight, run.loading_weight
            ),
        ),
        ("records", run.record_count.to_string()),
    ]
}

fn list(store: &ScoreStore, format: OutputFormat) -> Result<()> {
    let runs = store.runs();
    if format == OutputFormat::Json {
        return print_json(&runs);
    }
    let latest = store.latest_run_id();
    let mut writer = table_writer();
    writeln!(writer, "RUN\tSTATUS\tWINDOW START\tWINDOW END\tRECORDS\tLATEST")?;
    for run in &runs {
        writeln!(
            writer,
            "{}\t{}\t{}\t{}\t{}\t{}",
            run.id,
            run.status.as_str(),
            run.window_start.to_rfc3339(),
            run.window_end.to_rfc3339(),
            run.record_count,
            if Some(run.id) == latest { "*" } else { "" }
        )?;
    }
    writer.flush()?;
    Ok(())
}

#[derive(Serialize)]
struct RunDescription<'a> {
    run: &'a PipelineRun,
    most_constrained: Vec<&'a ScoreRecord>,
}

fn describe(
    store: &ScoreStore,
    run_id: Option<RunId>,
    top: usize,
    format: OutputFormat,
) -> Result<()> {
    let generation = store.generation_or_latest(run_id)?;
    let mut records: Vec<&ScoreRecord> = generation.records().collect();
    records.sort_by(|a, b| {
        b.combined_score
            .unwrap_or(-1.0)
            .total_cmp(&a.combined_score.unwrap_or(-1.0))
            .then_with(|| (a.level, &a.entity_id).cmp(&(b.level, &b.entity_id)))
    });
    records.truncate(top);

    if format == OutputFormat::Json {
        return print_json(&RunDescription {
            run: generation.run(),
            most_constrained: records,
        });
    }

    print_fields(&run_rows(generation.run()))?;
    if records.is_empty() {
        return Ok(());
    }
    println!();
    let mut writer = table_writer();
    writeln!(writer, "LEVEL\tENTITY\tCOMBINED\tTIER\tCONSTRAINED HOURS")?;
    for r in records {
        writeln!(
            writer,
            "{}\t{}\t{}\t{}\t{}/{}",
            r.level,
            r.entity_id,
            r.combined_score.map_or_else(|| "-".to_string(), |s| format!("{s:.3}")),
            r.constraint_tier.as_str(),
            r.constrained_hours,
            r.observed_hours
        )?;
    }
    writer.flush()?;
    Ok(())
}
