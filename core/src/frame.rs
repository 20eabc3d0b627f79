//! DataFrame helpers shared by the stages and the store.
//!
//! Stage tables hold two column kinds only: `Float64` numbers and
//! `String` text. Every frame read from the raw file or the store is
//! brought into that shape by [`normalize`].

use crate::error::{PipelineError, PipelineResult};
use polars::prelude::*;
use std::io::Write;

/// Bring every column to `Float64` or `String`.
///
/// Integer and float columns become `Float64`. A column with no
/// non-missing value is numeric. Anything else is cast to text.
pub fn normalize(frame: DataFrame) -> PipelineResult<DataFrame> {
    let columns = frame
        .get_columns()
        .iter()
        .map(|s| {
            let all_missing = s.null_count() == s.len();
            let target = if s.dtype().is_numeric() || all_missing {
                DataType::Float64
            } else {
                DataType::String
            };
            if s.dtype() == &target {
                Ok(s.clone())
            } else {
                s.cast(&target)
            }
        })
        .collect::<PolarsResult<Vec<_>>>()?;
    Ok(DataFrame::new(columns)?)
}

pub fn has_column(frame: &DataFrame, column: &str) -> bool {
    frame.get_column_names().contains(&column)
}

pub fn column_names(frame: &DataFrame) -> Vec<String> {
    frame.get_column_names().into_iter().map(String::from).collect()
}

/// The named column, or a schema error naming `table`.
pub fn require_column<'a>(
    frame:  &'a DataFrame,
    table:  &str,
    column: &str,
) -> PipelineResult<&'a Series> {
    frame.column(column).map_err(|_| PipelineError::MissingColumn {
        table:  table.to_string(),
        column: column.to_string(),
    })
}

/// Like [`require_column`], and the column must hold numbers.
/// A column without any value counts as numeric.
pub fn require_numeric<'a>(
    frame:  &'a DataFrame,
    table:  &str,
    column: &str,
) -> PipelineResult<&'a Series> {
    let series = require_column(frame, table, column)?;
    if series.dtype().is_numeric() || series.null_count() == series.len() {
        Ok(series)
    } else {
        Err(PipelineError::NonNumericColumn {
            table:  table.to_string(),
            column: column.to_string(),
        })
    }
}

/// Write the frame as CSV with a header row. Missing values are empty.
pub fn write_csv<W: Write>(frame: &mut DataFrame, writer: W) -> PipelineResult<()> {
    CsvWriter::new(writer).include_header(true).finish(frame)?;
    Ok(())
}
