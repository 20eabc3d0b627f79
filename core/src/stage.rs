//! Stage trait.
//!
//! RULE: Every stage implements PipelineStage.
//! A stage reads at most one table written by the stage before it,
//! writes only the tables it owns, and reports what it did as events.
//! Execution order is fixed and documented in engine.rs.

use crate::{
    error::PipelineResult,
    event::PipelineEvent,
    frame::column_names,
    store::PipelineStore,
    types::TableName,
};
use polars::prelude::DataFrame;

/// The contract every stage must fulfill.
pub trait PipelineStage {
    /// Unique stable name for this stage.
    fn name(&self) -> &'static str;

    /// Table this stage reads, or `None` for the ingestion stage.
    fn input_table(&self) -> Option<TableName>;

    /// Tables this stage replaces on every run.
    fn output_tables(&self) -> &'static [TableName];

    /// Read the input, transform it and replace the output tables.
    /// Nothing is written when an error is returned.
    fn run(&self, store: &PipelineStore) -> PipelineResult<Vec<PipelineEvent>>;
}

/// Log a stage output the same way for every stage and build its event.
pub(crate) fn table_replaced(stage: &str, name: TableName, table: &DataFrame) -> PipelineEvent {
    let columns = column_names(table);
    log::info!(
        "{stage}: replaced '{name}' ({} rows, {} columns)",
        table.height(),
        columns.len()
    );
    log::debug!("{stage}: '{name}' columns: {columns:?}");
    PipelineEvent::TableReplaced {
        table: name.to_string(),
        rows: table.height(),
        columns,
    }
}
