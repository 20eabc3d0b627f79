//! pipeline-runner: headless runner for the lead scoring feature pipeline.
//!
//! Usage:
//!   pipeline-runner --db lead_scoring.db --data-dir ./data --mode training
//!   pipeline-runner --source ./data/leadscoring_inference.csv --mode inference
//!   pipeline-runner --stage interactions --mode auto
//!   pipeline-runner --export model_input.csv

use anyhow::{bail, Context, Result};
use leadscore_core::{
    config::PipelineConfig,
    engine::PipelineEngine,
    frame::write_csv,
    schema::{CATEGORICAL_VARIABLES_MAPPED, STAGE_TABLES, MODEL_INPUT},
    store::{PipelineStore, StoreStatus},
    types::RunMode,
};
use std::{env, fs::File, io::BufWriter};

fn main() -> Result<()> {
    env_logger::init();

    let args: Vec<String> = env::args().collect();
    let db = string_arg(&args, "--db").unwrap_or("lead_scoring.db");
    let data_dir = string_arg(&args, "--data-dir").unwrap_or("./data");
    let default_source = format!("{data_dir}/leadscoring.csv");
    let source = string_arg(&args, "--source").unwrap_or(&default_source);
    let mode_arg = string_arg(&args, "--mode").unwrap_or("training");
    let stage = string_arg(&args, "--stage");
    let export = string_arg(&args, "--export");
    let json = args.iter().any(|a| a == "--json");
    let run_id = string_arg(&args, "--run-id")
        .map(String::from)
        .unwrap_or_else(default_run_id);

    let (store, status) = PipelineStore::bootstrap(db)?;
    if status == StoreStatus::Created {
        log::info!("New store created at {db}");
    }

    let mode = resolve_mode(mode_arg, &store, stage)?;
    let config = PipelineConfig::load(data_dir)?;

    if !json {
        println!("Lead scoring pipeline: pipeline-runner");
        println!("  run_id:    {run_id}");
        println!("  mode:      {mode}");
        println!("  db:        {db}");
        println!("  data_dir:  {data_dir}");
        println!("  source:    {source}");
        println!();
    }

    let mut engine = PipelineEngine::build(run_id.clone(), mode, &config, source, store)?;
    match stage {
        Some(name) => {
            engine.run_stage(name)?;
        }
        None => {
            engine.run_all()?;
        }
    }

    if let Some(path) = export {
        let mut table = engine.store.read_table(MODEL_INPUT)?;
        let file = File::create(path).with_context(|| format!("Cannot create {path}"))?;
        write_csv(&mut table, BufWriter::new(file))?;
        log::info!("Exported {} rows of {MODEL_INPUT} to {path}", table.height());
    }

    print_summary(&engine, json)
}

/// `auto` keeps the legacy behaviour: training when the collapsed table
/// carries the label column, inference otherwise. It needs that table to
/// exist already, so it only works for single-stage reruns.
fn resolve_mode(arg: &str, store: &PipelineStore, stage: Option<&str>) -> Result<RunMode> {
    if arg != "auto" {
        return arg.parse().map_err(anyhow::Error::msg);
    }
    if stage != Some("interactions") {
        bail!("--mode auto is only supported together with --stage interactions");
    }
    let table = store.read_table(CATEGORICAL_VARIABLES_MAPPED)?;
    Ok(RunMode::detect(&table))
}

#[derive(serde::Serialize)]
struct TableSummary {
    table:   &'static str,
    rows:    i64,
    columns: usize,
}

#[derive(serde::Serialize)]
struct RunSummary<'a> {
    run_id: &'a str,
    mode:   RunMode,
    events: usize,
    tables: Vec<TableSummary>,
}

fn print_summary(engine: &PipelineEngine, json: bool) -> Result<()> {
    let mut tables = Vec::new();
    for name in STAGE_TABLES {
        if engine.store.table_exists(name)? {
            tables.push(TableSummary {
                table:   name,
                rows:    engine.store.table_row_count(name)?,
                columns: engine.store.read_table(name)?.width(),
            });
        }
    }
    let summary = RunSummary {
        run_id: &engine.run_id,
        mode:   engine.mode,
        events: engine.run_events()?.len(),
        tables,
    };

    if json {
        println!("{}", serde_json::to_string_pretty(&summary)?);
        return Ok(());
    }

    println!("=== RUN SUMMARY ===");
    println!("  run_id:       {}", summary.run_id);
    println!("  stages:       {}", engine.stage_names().join(" → "));
    println!("  events:       {}", summary.events);
    println!();
    println!("=== TABLES ===");
    for t in &summary.tables {
        println!("  {:<30} {:>8} rows  {:>3} columns", t.table, t.rows, t.columns);
    }
    Ok(())
}

/// `run-<utc timestamp>-<8 hex chars>`, sortable by start time.
fn default_run_id() -> String {
    let stamp = chrono::Utc::now().format("%Y%m%dT%H%M%S");
    let suffix = uuid::Uuid::new_v4().simple().to_string();
    format!("run-{stamp}-{}", &suffix[..8])
}

fn string_arg<'a>(args: &'a [String], flag: &str) -> Option<&'a str> {
    args.windows(2)
        .find(|w| w[0] == flag)
        .map(|w| w[1].as_str())
}
