use thiserror::Error;

#[derive(Error, Debug)]
pub enum PipelineError {
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    #[error("DataFrame error: {0}")]
    Polars(#[from] polars::error::PolarsError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Source '{path}' is unavailable: {reason}")]
    SourceUnavailable { path: String, reason: String },

    #[error("Table '{table}' not found in store")]
    TableNotFound { table: String },

    #[error("Table '{table}' is missing column '{column}'")]
    MissingColumn { table: String, column: String },

    #[error("Table '{table}' has duplicate column '{column}'")]
    DuplicateColumn { table: String, column: String },

    #[error("Column '{column}' in table '{table}' must be numeric")]
    NonNumericColumn { table: String, column: String },

    #[error("Table '{table}' has no columns")]
    EmptySchema { table: String },

    #[error("Interaction types without a category mapping: {}", .interaction_types.join(", "))]
    MappingIncomplete { interaction_types: Vec<String> },

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Stage '{name}' not found")]
    StageNotFound { name: String },

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

pub type PipelineResult<T> = Result<T, PipelineError>;
