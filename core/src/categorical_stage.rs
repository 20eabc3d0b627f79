//! Categorical level collapser.
//!
//! Execution: third stage; reads `city_tier_mapped`, writes
//! `categorical_variables_mapped`.
//!
//! For platform, medium and source (in that order) every value outside
//! the column's allow-list becomes OTHERS_LEVEL. Collapsing can make rows
//! identical, so exact duplicates are removed once all three are done.
//! This is the only stage that can reduce the row count.

use crate::{
    config::{SignificantLevels, OTHERS_LEVEL},
    error::PipelineResult,
    event::PipelineEvent,
    frame::require_column,
    schema::{CATEGORICAL_VARIABLES_MAPPED, CITY_TIER_MAPPED},
    stage::{table_replaced, PipelineStage},
    store::PipelineStore,
    types::TableName,
};
use polars::prelude::*;
use std::collections::BTreeSet;

pub struct CategoricalStage {
    levels: SignificantLevels,
}

impl CategoricalStage {
    pub fn new(levels: SignificantLevels) -> Self {
        Self { levels }
    }
}

impl PipelineStage for CategoricalStage {
    fn name(&self) -> &'static str { "categorical_levels" }

    fn input_table(&self) -> Option<TableName> { Some(CITY_TIER_MAPPED) }

    fn output_tables(&self) -> &'static [TableName] { &[CATEGORICAL_VARIABLES_MAPPED] }

    fn run(&self, store: &PipelineStore) -> PipelineResult<Vec<PipelineEvent>> {
        let input = store.read_table(CITY_TIER_MAPPED)?;
        let (table, report) = collapse_all(&input, &self.levels)?;

        let mut events: Vec<PipelineEvent> = report
            .collapsed
            .iter()
            .map(|(column, collapsed_rows)| {
                log::debug!(
                    "{}: {collapsed_rows} rows of '{column}' collapsed to '{OTHERS_LEVEL}'",
                    self.name()
                );
                PipelineEvent::LevelsCollapsed {
                    column:         column.to_string(),
                    collapsed_rows: *collapsed_rows,
                }
            })
            .collect();

        if report.duplicates_removed > 0 {
            log::info!("{}: removed {} duplicate rows", self.name(), report.duplicates_removed);
        }
        events.push(PipelineEvent::DuplicatesRemoved {
            table:   CATEGORICAL_VARIABLES_MAPPED.to_string(),
            removed: report.duplicates_removed,
        });

        store.replace_table(CATEGORICAL_VARIABLES_MAPPED, &table)?;
        events.push(table_replaced(self.name(), CATEGORICAL_VARIABLES_MAPPED, &table));
        Ok(events)
    }
}

/// Collapse one column to its allow-list.
///
/// Rows are partitioned into "outside the allow-list" (value overwritten
/// with OTHERS_LEVEL) and "inside"; the result is the first partition
/// followed by the second, each keeping its relative order. Nulls and
/// numbers are outside every allow-list. Returns the table and the number
/// of rows collapsed.
pub fn collapse_levels(
    table:   &DataFrame,
    column:  &str,
    allowed: &BTreeSet<String>,
) -> PipelineResult<(DataFrame, usize)> {
    let levels = require_column(table, CITY_TIER_MAPPED, column)?;
    let keep: BooleanChunked = match levels.dtype() {
        DataType::String => levels
            .str()?
            .into_iter()
            .map(|v| v.is_some_and(|v| allowed.contains(v)))
            .collect(),
        _ => BooleanChunked::full(column, false, levels.len()),
    };

    let mut as_text = table.clone();
    as_text.with_column(levels.cast(&DataType::String)?)?;

    let mut outside = as_text.filter(&!&keep)?;
    let inside = as_text.filter(&keep)?;
    let collapsed_rows = outside.height();
    outside.with_column(Series::new(column, vec![OTHERS_LEVEL; collapsed_rows]))?;
    outside.vstack_mut(&inside)?;
    Ok((outside, collapsed_rows))
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CollapseReport {
    /// Rows collapsed per designated column, in collapse order.
    pub collapsed:          Vec<(&'static str, usize)>,
    pub duplicates_removed: usize,
}

/// Apply every allow-list, then drop duplicate rows keeping the first.
pub fn collapse_all(
    table:  &DataFrame,
    levels: &SignificantLevels,
) -> PipelineResult<(DataFrame, CollapseReport)> {
    let mut report = CollapseReport::default();
    let mut current = table.clone();
    for (column, allowed) in levels.by_column() {
        let (collapsed, rows) = collapse_levels(&current, column, allowed)?;
        report.collapsed.push((column, rows));
        current = collapsed;
    }

    let before = current.height();
    let unique = current
        .lazy()
        .unique_stable(None, UniqueKeepStrategy::First)
        .collect()?;
    report.duplicates_removed = before - unique.height();
    Ok((unique, report))
}
