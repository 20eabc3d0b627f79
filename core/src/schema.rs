//! Fixed table and column names shared by the stages.
//!
//! RULE: A stage's output table name is the next stage's input.
//! Names are part of the pipeline contract and never change per run.

use crate::types::TableName;

// ── Stage tables (in pipeline order) ──────────────────────────

pub const LOADED_DATA:                  TableName = "loaded_data";
pub const CITY_TIER_MAPPED:             TableName = "city_tier_mapped";
pub const CATEGORICAL_VARIABLES_MAPPED: TableName = "categorical_variables_mapped";
pub const INTERACTIONS_MAPPED:          TableName = "interactions_mapped";
pub const MODEL_INPUT:                  TableName = "model_input";

pub const STAGE_TABLES: [TableName; 5] = [
    LOADED_DATA,
    CITY_TIER_MAPPED,
    CATEGORICAL_VARIABLES_MAPPED,
    INTERACTIONS_MAPPED,
    MODEL_INPUT,
];

// ── Columns ───────────────────────────────────────────────────

pub const TOTAL_LEADS_DROPPED: &str = "total_leads_dropped";
pub const REFERRED_LEAD:       &str = "referred_lead";

pub const CITY_MAPPED: &str = "city_mapped";
pub const CITY_TIER:   &str = "city_tier";

pub const FIRST_PLATFORM: &str = "first_platform_c";
pub const FIRST_MEDIUM:   &str = "first_utm_medium_c";
pub const FIRST_SOURCE:   &str = "first_utm_source_c";

/// Training label. Present in training data, absent at inference.
pub const APP_COMPLETE_FLAG: &str = "app_complete_flag";

/// Long-form columns produced while unpivoting interactions.
pub const INTERACTION_TYPE:    &str = "interaction_type";
pub const INTERACTION_VALUE:   &str = "interaction_value";
pub const INTERACTION_MAPPING: &str = "interaction_mapping";
