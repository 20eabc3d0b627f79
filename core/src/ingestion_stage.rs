//! Ingestion stage. Loads the raw lead file into `loaded_data`.
//!
//! Execution: first stage; has no input table.
//! The counter columns listed in `zero_fill_columns` have their missing
//! values replaced by 0. Everything else passes through unchanged.

use crate::{
    error::{PipelineError, PipelineResult},
    event::PipelineEvent,
    frame::{normalize, require_numeric},
    schema::LOADED_DATA,
    stage::{table_replaced, PipelineStage},
    store::PipelineStore,
    types::TableName,
};
use polars::prelude::*;
use std::{
    collections::HashSet,
    fs::File,
    path::{Path, PathBuf},
};

/// Cell contents read as missing, on top of the empty string.
pub const NULL_MARKERS: [&str; 7] = ["NA", "N/A", "NaN", "nan", "NULL", "null", "None"];

const RAW_SOURCE: &str = "raw source";

pub struct IngestionStage {
    source:            PathBuf,
    zero_fill_columns: Vec<String>,
}

impl IngestionStage {
    pub fn new(source: impl Into<PathBuf>, zero_fill_columns: Vec<String>) -> Self {
        Self { source: source.into(), zero_fill_columns }
    }
}

impl PipelineStage for IngestionStage {
    fn name(&self) -> &'static str { "ingestion" }

    fn input_table(&self) -> Option<TableName> { None }

    fn output_tables(&self) -> &'static [TableName] { &[LOADED_DATA] }

    fn run(&self, store: &PipelineStore) -> PipelineResult<Vec<PipelineEvent>> {
        let raw = read_source(&self.source)?;
        log::info!(
            "{}: read {} rows from {}",
            self.name(),
            raw.height(),
            self.source.display()
        );

        let (table, filled) = fill_missing_counters(raw, &self.zero_fill_columns)?;
        let mut events: Vec<PipelineEvent> = filled
            .into_iter()
            .map(|(column, filled)| {
                log::debug!("{}: filled {filled} missing '{column}' values with 0", self.name());
                PipelineEvent::NullsFilled { table: LOADED_DATA.to_string(), column, filled }
            })
            .collect();

        store.replace_table(LOADED_DATA, &table)?;
        events.push(table_replaced(self.name(), LOADED_DATA, &table));
        Ok(events)
    }
}

/// Read the raw CSV file into a normalized frame.
///
/// A column is numeric when every non-missing cell parses as a number;
/// otherwise it is text. Any failure to open or parse the file is
/// reported as an unavailable source.
pub fn read_source(path: &Path) -> PipelineResult<DataFrame> {
    let unavailable = |reason: String| PipelineError::SourceUnavailable {
        path: path.display().to_string(),
        reason,
    };

    check_layout(path).map_err(|e| match e {
        PipelineError::Csv(e) => unavailable(e.to_string()),
        PipelineError::Io(e)  => unavailable(e.to_string()),
        other => other,
    })?;

    let null_values = NULL_MARKERS.iter().map(|m| m.to_string()).collect();
    let raw = LazyCsvReader::new(path)
        .with_has_header(true)
        .with_infer_schema_length(None)
        .with_null_values(Some(NullValues::AllColumns(null_values)))
        .finish()
        .and_then(|lf| lf.collect())
        .map_err(|e| unavailable(e.to_string()))?;
    normalize(raw)
}

/// Reject duplicate headers and rows whose width differs from the header.
fn check_layout(path: &Path) -> PipelineResult<()> {
    let mut rdr = csv::ReaderBuilder::new()
        .has_headers(true)
        .from_reader(File::open(path)?);

    let mut seen = HashSet::new();
    for header in rdr.headers()?.iter() {
        if !seen.insert(header.to_string()) {
            return Err(PipelineError::DuplicateColumn {
                table:  RAW_SOURCE.to_string(),
                column: header.to_string(),
            });
        }
    }
    for record in rdr.records() {
        record?;
    }
    Ok(())
}

/// Replace missing values in each counter column with 0.
/// Every column is checked before any is modified. Returns the frame and
/// the number of values filled per column.
pub fn fill_missing_counters(
    table:   DataFrame,
    columns: &[String],
) -> PipelineResult<(DataFrame, Vec<(String, usize)>)> {
    let filled = columns
        .iter()
        .map(|c| require_numeric(&table, RAW_SOURCE, c).map(|s| (c.clone(), s.null_count())))
        .collect::<PipelineResult<Vec<_>>>()?;

    let fills: Vec<Expr> = columns
        .iter()
        .map(|c| col(c).cast(DataType::Float64).fill_null(lit(0.0)))
        .collect();
    let table = table.lazy().with_columns(fills).collect()?;
    Ok((table, filled))
}
