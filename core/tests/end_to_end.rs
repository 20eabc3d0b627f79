//! End-to-end runs through all four stages.
//!
//! Tests cover: the worked single-row example, the shipped sample data in
//! both modes, the stage log, run status bookkeeping and failure handling.

use leadscore_core::{
    config::{InteractionMapping, PipelineConfig, SignificantLevels, OTHERS_LEVEL},
    engine::PipelineEngine,
    error::PipelineError,
    schema::{
        APP_COMPLETE_FLAG, CATEGORICAL_VARIABLES_MAPPED, CITY_TIER, CITY_TIER_MAPPED,
        FIRST_PLATFORM, INTERACTIONS_MAPPED, LOADED_DATA, MODEL_INPUT, TOTAL_LEADS_DROPPED,
    },
    store::{PipelineStore, RunStatus},
    types::RunMode,
};
use polars::prelude::*;
use std::path::{Path, PathBuf};

const DATA_DIR: &str = concat!(env!("CARGO_MANIFEST_DIR"), "/../data");

const HEADER: &str = "created_date,city_mapped,first_platform_c,first_utm_medium_c,\
                      first_utm_source_c,total_leads_dropped,referred_lead,app_complete_flag,A,B";

const INFERENCE_HEADER: &str = "created_date,city_mapped,first_platform_c,first_utm_medium_c,\
                                first_utm_source_c,total_leads_dropped,referred_lead,A,B";

fn write_source(body: &str) -> PathBuf {
    write_csv_file(HEADER, body)
}

fn write_csv_file(header: &str, body: &str) -> PathBuf {
    let path = std::env::temp_dir().join(format!("leadscore-e2e-{}.csv", uuid::Uuid::new_v4()));
    std::fs::write(&path, format!("{header}\n{body}")).expect("write temp csv");
    path
}

fn fresh_store() -> PipelineStore {
    let _ = env_logger::builder().is_test(true).try_init();
    let store = PipelineStore::in_memory().expect("in-memory store");
    store.migrate().expect("migration");
    store
}

/// Interaction columns A and B mapped to cat1 and cat2; C, D and E
/// complete the five categories but never occur. Platform allow-list
/// {p1, p2}.
fn example_config() -> PipelineConfig {
    let mut config = PipelineConfig::default_test();
    config.significant_levels = SignificantLevels {
        platform: ["p1", "p2"].into_iter().map(String::from).collect(),
        medium:   ["m1"].into_iter().map(String::from).collect(),
        source:   ["s1"].into_iter().map(String::from).collect(),
    };
    config.interaction_mapping = InteractionMapping::new([
        ("A", "cat1"),
        ("B", "cat2"),
        ("C", "cat3"),
        ("D", "cat4"),
        ("E", "cat5"),
    ]);
    config
}

fn number(table: &DataFrame, row: usize, column: &str) -> Option<f64> {
    table
        .column(column)
        .unwrap_or_else(|_| panic!("column {column} missing"))
        .f64()
        .unwrap_or_else(|_| panic!("column {column} is not numeric"))
        .get(row)
}

fn text<'a>(table: &'a DataFrame, row: usize, column: &str) -> Option<&'a str> {
    table
        .column(column)
        .unwrap_or_else(|_| panic!("column {column} missing"))
        .str()
        .unwrap_or_else(|_| panic!("column {column} is not text"))
        .get(row)
}

fn has(table: &DataFrame, column: &str) -> bool {
    table.column(column).is_ok()
}

fn remove_store_files(path: &Path) {
    for suffix in ["", "-wal", "-shm"] {
        std::fs::remove_file(format!("{}{suffix}", path.display())).ok();
    }
}

#[test]
fn single_row_example_flows_through_every_stage() {
    let path = write_source("2021-07-01,X,unknown_platform,m1,s1,,0,1,3,\n");
    let mut engine = PipelineEngine::build(
        "e2e-example".into(),
        RunMode::Training,
        &example_config(),
        &path,
        fresh_store(),
    )
    .unwrap();

    engine.run_all().unwrap();

    let loaded = engine.store.read_table(LOADED_DATA).unwrap();
    assert_eq!(number(&loaded, 0, TOTAL_LEADS_DROPPED), Some(0.0));

    let tiered = engine.store.read_table(CITY_TIER_MAPPED).unwrap();
    assert_eq!(number(&tiered, 0, CITY_TIER), Some(3.0));
    assert!(!has(&tiered, "city_mapped"));

    let collapsed = engine.store.read_table(CATEGORICAL_VARIABLES_MAPPED).unwrap();
    assert_eq!(text(&collapsed, 0, FIRST_PLATFORM), Some(OTHERS_LEVEL));

    let interactions = engine.store.read_table(INTERACTIONS_MAPPED).unwrap();
    assert_eq!(interactions.height(), 1);
    assert_eq!(number(&interactions, 0, CITY_TIER), Some(3.0));
    assert_eq!(text(&interactions, 0, FIRST_PLATFORM), Some(OTHERS_LEVEL));
    assert_eq!(number(&interactions, 0, TOTAL_LEADS_DROPPED), Some(0.0));
    assert_eq!(number(&interactions, 0, "cat1"), Some(3.0));
    assert_eq!(number(&interactions, 0, "cat2"), Some(0.0));
    assert!(!has(&interactions, "A") && !has(&interactions, "B"));

    let model_input = engine.store.read_table(MODEL_INPUT).unwrap();
    assert!(!has(&model_input, "created_date"));
    assert_eq!(model_input.width(), interactions.width() - 1);

    std::fs::remove_file(path).ok();
}

#[test]
fn shipped_sample_runs_in_training_mode() {
    let config = PipelineConfig::load(DATA_DIR).unwrap();
    let source = format!("{DATA_DIR}/leadscoring.csv");
    let mut engine =
        PipelineEngine::build("e2e-sample".into(), RunMode::Training, &config, source, fresh_store())
            .unwrap();

    engine.run_all().unwrap();

    let loaded = engine.store.read_table(LOADED_DATA).unwrap();
    assert_eq!(loaded.height(), 7);

    // Two leads only differ in platform and source, both outside the
    // allow-lists; after collapsing they are the same row.
    let collapsed = engine.store.read_table(CATEGORICAL_VARIABLES_MAPPED).unwrap();
    assert_eq!(collapsed.height(), 6);

    let interactions = engine.store.read_table(INTERACTIONS_MAPPED).unwrap();
    let categories: Vec<&str> = config.interaction_mapping.categories().into_iter().collect();
    assert_eq!(
        interactions.width(),
        config.index_columns(RunMode::Training).len() + categories.len()
    );
    assert_eq!(interactions.height(), 6);

    let model_input = engine.store.read_table(MODEL_INPUT).unwrap();
    for column in &config.settings.not_features {
        assert!(!has(&model_input, column), "{column} leaked into the model input");
    }
    assert!(has(&model_input, APP_COMPLETE_FLAG));
}

#[test]
fn shipped_config_keeps_every_category_feature() {
    let config = PipelineConfig::load(DATA_DIR).unwrap();
    let source = format!("{DATA_DIR}/leadscoring.csv");
    let mut engine =
        PipelineEngine::build("e2e-features".into(), RunMode::Training, &config, source, fresh_store())
            .unwrap();

    engine.run_all().unwrap();

    let model_input = engine.store.read_table(MODEL_INPUT).unwrap();
    let mut expected: Vec<String> = config
        .index_columns(RunMode::Training)
        .iter()
        .filter(|c| c.as_str() != "created_date")
        .cloned()
        .collect();
    expected.extend(
        [
            "assistance_interaction",
            "career_interaction",
            "payment_interaction",
            "social_interaction",
            "syllabus_interaction",
        ]
        .map(String::from),
    );
    let columns: Vec<String> = model_input.get_column_names().into_iter().map(String::from).collect();
    assert_eq!(columns, expected);
}

#[test]
fn unlabelled_source_runs_in_inference_mode() {
    let config = PipelineConfig::load(DATA_DIR).unwrap();
    let raw = std::fs::read_to_string(format!("{DATA_DIR}/leadscoring.csv")).unwrap();
    // Strip the label column from the shipped sample.
    let mut lines = raw.lines();
    let header: Vec<&str> = lines.next().unwrap().split(',').collect();
    let label = header.iter().position(|c| *c == APP_COMPLETE_FLAG).unwrap();
    let strip = |line: &str| -> String {
        line.split(',')
            .enumerate()
            .filter(|(i, _)| *i != label)
            .map(|(_, cell)| cell)
            .collect::<Vec<_>>()
            .join(",")
    };
    let header = strip(&header.join(","));
    let body: String = lines.map(|l| format!("{}\n", strip(l))).collect();
    let path = write_csv_file(&header, &body);

    let mut engine =
        PipelineEngine::build("e2e-inference".into(), RunMode::Inference, &config, &path, fresh_store())
            .unwrap();
    engine.run_all().unwrap();

    let interactions = engine.store.read_table(INTERACTIONS_MAPPED).unwrap();
    let model_input = engine.store.read_table(MODEL_INPUT).unwrap();
    for table in [&interactions, &model_input] {
        assert!(!has(table, APP_COMPLETE_FLAG));
        for category in config.interaction_mapping.categories() {
            assert!(has(table, category), "{category} missing");
        }
    }
    assert_eq!(
        interactions.width(),
        config.index_columns(RunMode::Inference).len() + 5
    );
    assert_eq!(interactions.height(), 6);
    assert_eq!(engine.store.run_status("e2e-inference").unwrap(), Some(RunStatus::Completed));

    std::fs::remove_file(path).ok();
}

#[test]
fn minimal_unlabelled_source_runs_in_inference_mode() {
    let path = write_csv_file(INFERENCE_HEADER, "2021-07-01,mumbai,p1,m1,s1,2,,4,1\n");
    let mut engine = PipelineEngine::build(
        "e2e-inference-min".into(),
        RunMode::Inference,
        &example_config(),
        &path,
        fresh_store(),
    )
    .unwrap();

    engine.run_all().unwrap();

    let model_input = engine.store.read_table(MODEL_INPUT).unwrap();
    let columns: Vec<&str> = model_input.get_column_names();
    assert_eq!(
        columns,
        vec![
            CITY_TIER,
            FIRST_PLATFORM,
            "first_utm_medium_c",
            "first_utm_source_c",
            TOTAL_LEADS_DROPPED,
            "referred_lead",
            "cat1",
            "cat2",
            "cat3",
            "cat4",
            "cat5",
        ]
    );
    assert_eq!(number(&model_input, 0, CITY_TIER), Some(1.0));
    assert_eq!(number(&model_input, 0, "referred_lead"), Some(0.0));
    assert_eq!(number(&model_input, 0, "cat1"), Some(4.0));
    assert_eq!(number(&model_input, 0, "cat2"), Some(1.0));

    std::fs::remove_file(path).ok();
}

#[test]
fn completed_run_is_logged() {
    let path = write_source("2021-07-01,X,p1,m1,s1,1,0,1,3,1\n");
    let mut engine = PipelineEngine::build(
        "e2e-log".into(),
        RunMode::Training,
        &example_config(),
        &path,
        fresh_store(),
    )
    .unwrap();

    let events = engine.run_all().unwrap();

    assert_eq!(engine.store.run_status("e2e-log").unwrap(), Some(RunStatus::Completed));

    let logged = engine.run_events().unwrap();
    assert_eq!(logged.len(), events.len() + 1, "every event plus run_started is logged");
    assert_eq!(logged.first().map(|e| e.event_type.as_str()), Some("run_started"));
    assert_eq!(logged.last().map(|e| e.event_type.as_str()), Some("run_completed"));

    let stages_started = logged.iter().filter(|e| e.event_type == "stage_started").count();
    let stages_completed = logged.iter().filter(|e| e.event_type == "stage_completed").count();
    assert_eq!(stages_started, 4);
    assert_eq!(stages_completed, 4);

    let replaced: Vec<&str> = logged
        .iter()
        .filter(|e| e.event_type == "table_replaced")
        .map(|e| e.stage.as_str())
        .collect();
    assert_eq!(
        replaced,
        vec!["ingestion", "city_tier", "categorical_levels", "interactions", "interactions"]
    );

    std::fs::remove_file(path).ok();
}

#[test]
fn unmapped_interaction_type_fails_the_run() {
    let path = write_source("2021-07-01,X,p1,m1,s1,1,0,1,3,1\n");
    let mut config = example_config();
    config.interaction_mapping = InteractionMapping::new([
        ("A", "cat1"),
        ("C", "cat2"),
        ("D", "cat3"),
        ("E", "cat4"),
        ("F", "cat5"),
    ]);

    let mut engine =
        PipelineEngine::build("e2e-fail".into(), RunMode::Training, &config, &path, fresh_store())
            .unwrap();

    let err = engine.run_all().unwrap_err();
    match err {
        PipelineError::MappingIncomplete { interaction_types } => {
            assert_eq!(interaction_types, vec!["B".to_string()]);
        }
        other => panic!("expected MappingIncomplete, got {other:?}"),
    }

    assert_eq!(engine.store.run_status("e2e-fail").unwrap(), Some(RunStatus::Failed));
    // Earlier stages stay committed, the failed stage wrote nothing.
    assert!(engine.store.table_exists(CATEGORICAL_VARIABLES_MAPPED).unwrap());
    assert!(!engine.store.table_exists(INTERACTIONS_MAPPED).unwrap());
    assert!(!engine.store.table_exists(MODEL_INPUT).unwrap());

    std::fs::remove_file(path).ok();
}

#[test]
fn single_stage_rerun_uses_stored_input() {
    let path = write_source("2021-07-01,X,p1,m1,s1,1,0,1,3,1\n");
    let mut engine = PipelineEngine::build(
        "e2e-rerun".into(),
        RunMode::Training,
        &example_config(),
        &path,
        fresh_store(),
    )
    .unwrap();
    engine.run_all().unwrap();
    let first = engine.store.read_table(INTERACTIONS_MAPPED).unwrap();

    // Rerun the last stage alone over the stored collapsed table.
    let store = engine.store;
    let collapsed = store.read_table(CATEGORICAL_VARIABLES_MAPPED).unwrap();
    let mode = RunMode::detect(&collapsed);
    assert_eq!(mode, RunMode::Training);

    let mut rerun =
        PipelineEngine::build("e2e-rerun-2".into(), mode, &example_config(), &path, store)
            .unwrap();
    rerun.run_stage("interactions").unwrap();

    let second = rerun.store.read_table(INTERACTIONS_MAPPED).unwrap();
    assert!(first.equals_missing(&second));
    assert_eq!(number(&second, 0, "cat1"), Some(3.0));
    assert_eq!(number(&second, 0, "cat2"), Some(1.0));

    // A single-stage run is closed like a full run.
    assert_eq!(rerun.store.run_status("e2e-rerun-2").unwrap(), Some(RunStatus::Completed));
    let logged: Vec<String> =
        rerun.run_events().unwrap().into_iter().map(|e| e.event_type).collect();
    assert_eq!(logged.first().map(String::as_str), Some("run_started"));
    assert_eq!(logged.last().map(String::as_str), Some("run_completed"));

    std::fs::remove_file(path).ok();
}

#[test]
fn inference_over_labelled_table_reports_label_as_unmapped() {
    let path = write_source("2021-07-01,X,p1,m1,s1,1,0,1,3,1\n");
    let mut engine = PipelineEngine::build(
        "e2e-label".into(),
        RunMode::Training,
        &example_config(),
        &path,
        fresh_store(),
    )
    .unwrap();
    engine.run_stage("ingestion").unwrap();
    engine.run_stage("city_tier").unwrap();
    engine.run_stage("categorical_levels").unwrap();
    assert_eq!(engine.store.run_status("e2e-label").unwrap(), Some(RunStatus::Completed));

    let mut inference = PipelineEngine::build(
        "e2e-label-2".into(),
        RunMode::Inference,
        &example_config(),
        &path,
        engine.store,
    )
    .unwrap();
    let err = inference.run_stage("interactions").unwrap_err();
    match err {
        PipelineError::MappingIncomplete { interaction_types } => {
            assert_eq!(interaction_types, vec![APP_COMPLETE_FLAG.to_string()]);
        }
        other => panic!("expected MappingIncomplete, got {other:?}"),
    }
    assert_eq!(inference.store.run_status("e2e-label-2").unwrap(), Some(RunStatus::Failed));

    std::fs::remove_file(path).ok();
}

#[test]
fn unknown_stage_name_is_rejected() {
    let mut engine = PipelineEngine::build(
        "e2e-unknown".into(),
        RunMode::Training,
        &example_config(),
        "unused.csv",
        fresh_store(),
    )
    .unwrap();

    let err = engine.run_stage("feature_selection").unwrap_err();
    assert!(
        matches!(err, PipelineError::StageNotFound { ref name } if name == "feature_selection"),
        "unexpected error: {err:?}"
    );
    assert_eq!(engine.store.run_status("e2e-unknown").unwrap(), None);
}

#[test]
fn stage_names_follow_execution_order() {
    let engine = PipelineEngine::build(
        "e2e-order".into(),
        RunMode::Inference,
        &example_config(),
        "unused.csv",
        fresh_store(),
    )
    .unwrap();
    assert_eq!(
        engine.stage_names(),
        vec!["ingestion", "city_tier", "categorical_levels", "interactions"]
    );
}

#[test]
fn failure_to_log_completion_marks_run_failed() {
    let db = std::env::temp_dir().join(format!("leadscore-e2e-{}.db", uuid::Uuid::new_v4()));
    let db_str = db.to_str().expect("utf-8 temp path");
    let (store, _) = PipelineStore::bootstrap(db_str).unwrap();

    // Reject the closing event only, so every stage succeeds.
    let conn = rusqlite::Connection::open(db_str).unwrap();
    conn.execute_batch(
        "CREATE TRIGGER reject_run_completed BEFORE INSERT ON stage_log
         WHEN NEW.event_type = 'run_completed'
         BEGIN SELECT RAISE(ABORT, 'run_completed rejected'); END;",
    )
    .unwrap();
    drop(conn);

    let path = write_source("2021-07-01,X,p1,m1,s1,1,0,1,3,1\n");
    let mut engine =
        PipelineEngine::build("e2e-close".into(), RunMode::Training, &example_config(), &path, store)
            .unwrap();
    let err = engine.run_all().unwrap_err();
    assert!(matches!(err, PipelineError::Database(_)), "unexpected error: {err:?}");
    assert_eq!(engine.store.run_status("e2e-close").unwrap(), Some(RunStatus::Failed));

    let store = engine.store;
    let mut single =
        PipelineEngine::build("e2e-close-2".into(), RunMode::Training, &example_config(), &path, store)
            .unwrap();
    assert!(single.run_stage("ingestion").is_err());
    assert_eq!(single.store.run_status("e2e-close-2").unwrap(), Some(RunStatus::Failed));

    drop(single);
    remove_store_files(&db);
    std::fs::remove_file(path).ok();
}
