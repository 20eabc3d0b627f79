//! Pipeline events: the record of what each stage did.
//!
//! RULE: Stages report through events; the engine persists them.
//! Variants are only ever added, never removed or reordered.

use crate::types::{RunId, RunMode};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum PipelineEvent {
    // ── Engine events ──────────────────────────────
    RunStarted {
        run_id: RunId,
        mode:   RunMode,
    },
    RunCompleted {
        run_id: RunId,
    },
    StageStarted {
        stage: String,
    },
    StageCompleted {
        stage: String,
    },

    // ── Stage events ───────────────────────────────
    NullsFilled {
        table:  String,
        column: String,
        filled: usize,
    },
    CityTierDefaulted {
        unmapped_rows: usize,
    },
    LevelsCollapsed {
        column:         String,
        collapsed_rows: usize,
    },
    DuplicatesRemoved {
        table:   String,
        removed: usize,
    },
    IndexColumnsSelected {
        mode:    RunMode,
        columns: Vec<String>,
    },
    TableReplaced {
        table:   String,
        rows:    usize,
        columns: Vec<String>,
    },
}

impl PipelineEvent {
    /// Stable name for the event_type column in stage_log.
    pub fn type_name(&self) -> &'static str {
        match self {
            PipelineEvent::RunStarted { .. }           => "run_started",
            PipelineEvent::RunCompleted { .. }         => "run_completed",
            PipelineEvent::StageStarted { .. }         => "stage_started",
            PipelineEvent::StageCompleted { .. }       => "stage_completed",
            PipelineEvent::NullsFilled { .. }          => "nulls_filled",
            PipelineEvent::CityTierDefaulted { .. }    => "city_tier_defaulted",
            PipelineEvent::LevelsCollapsed { .. }      => "levels_collapsed",
            PipelineEvent::DuplicatesRemoved { .. }    => "duplicates_removed",
            PipelineEvent::IndexColumnsSelected { .. } => "index_columns_selected",
            PipelineEvent::TableReplaced { .. }        => "table_replaced",
        }
    }
}
