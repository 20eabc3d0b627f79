//! Shared primitive types used across the pipeline.

use crate::{frame::has_column, schema::APP_COMPLETE_FLAG};
use polars::prelude::DataFrame;
use serde::{Deserialize, Serialize};
use std::{fmt, str::FromStr};

/// The canonical run identifier.
pub type RunId = String;

/// Name of a table in the staging store.
pub type TableName = &'static str;

/// Selects which index-column set the interaction reshaper preserves.
///
/// Training data carries the label column; inference data does not.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunMode {
    Training,
    Inference,
}

impl RunMode {
    /// Pick the mode from the presence of the label column.
    /// Callers should prefer passing the mode explicitly.
    pub fn detect(table: &DataFrame) -> Self {
        if has_column(table, APP_COMPLETE_FLAG) {
            RunMode::Training
        } else {
            RunMode::Inference
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            RunMode::Training  => "training",
            RunMode::Inference => "inference",
        }
    }
}

impl fmt::Display for RunMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RunMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "training"  => Ok(RunMode::Training),
            "inference" => Ok(RunMode::Inference),
            other       => Err(format!("unknown run mode '{other}'")),
        }
    }
}
