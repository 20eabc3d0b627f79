//! Interaction reshaper. Folds sparse per-interaction counters into one
//! dense column per canonical interaction category.
//!
//! Execution: last stage; reads `categorical_variables_mapped`, writes
//! `interactions_mapped` and `model_input` in one transaction.
//!
//! Steps:
//!   1. Unpivot every non-index column into (index, interaction_type,
//!      interaction_value) rows, missing values as 0.
//!   2. Replace interaction_type by its category. An unmapped type means
//!      the static mapping is out of date: the run fails.
//!   3. Sum values per (index tuple, category) and pivot categories back
//!      into columns, sorted by category name. Groups are sorted by index
//!      tuple so the output does not depend on input row order.
//!   4. Drop the non-feature columns to get the model input.

use crate::{
    config::InteractionMapping,
    error::{PipelineError, PipelineResult},
    event::PipelineEvent,
    frame::{column_names, require_column, require_numeric},
    schema::{CATEGORICAL_VARIABLES_MAPPED, INTERACTIONS_MAPPED, INTERACTION_MAPPING,
             INTERACTION_TYPE, INTERACTION_VALUE, MODEL_INPUT},
    stage::{table_replaced, PipelineStage},
    store::PipelineStore,
    types::{RunMode, TableName},
};
use polars::prelude::*;
use std::collections::BTreeSet;

/// Name used in errors about the intermediate unpivoted table.
const LONG_FORM: &str = "unpivoted interactions";

pub struct InteractionStage {
    mode:          RunMode,
    index_columns: Vec<String>,
    mapping:       InteractionMapping,
    not_features:  Vec<String>,
}

impl InteractionStage {
    pub fn new(
        mode:          RunMode,
        index_columns: Vec<String>,
        mapping:       InteractionMapping,
        not_features:  Vec<String>,
    ) -> Self {
        Self { mode, index_columns, mapping, not_features }
    }
}

impl PipelineStage for InteractionStage {
    fn name(&self) -> &'static str { "interactions" }

    fn input_table(&self) -> Option<TableName> { Some(CATEGORICAL_VARIABLES_MAPPED) }

    fn output_tables(&self) -> &'static [TableName] { &[INTERACTIONS_MAPPED, MODEL_INPUT] }

    fn run(&self, store: &PipelineStore) -> PipelineResult<Vec<PipelineEvent>> {
        let input = store.read_table(CATEGORICAL_VARIABLES_MAPPED)?;
        log::info!(
            "{}: {} mode, index columns {:?}",
            self.name(),
            self.mode,
            self.index_columns
        );

        let interactions = reshape_interactions(&input, &self.index_columns, &self.mapping)?;
        let model_input = project_model_input(&interactions, &self.not_features)?;

        store.replace_tables(&[
            (INTERACTIONS_MAPPED, &interactions),
            (MODEL_INPUT, &model_input),
        ])?;

        Ok(vec![
            PipelineEvent::IndexColumnsSelected {
                mode:    self.mode,
                columns: self.index_columns.clone(),
            },
            table_replaced(self.name(), INTERACTIONS_MAPPED, &interactions),
            table_replaced(self.name(), MODEL_INPUT, &model_input),
        ])
    }
}

/// Steps 1 to 3: the wide per-entity table of category sums.
pub fn reshape_interactions(
    table:         &DataFrame,
    index_columns: &[String],
    mapping:       &InteractionMapping,
) -> PipelineResult<DataFrame> {
    let long = unpivot(table, index_columns)?;
    let categorized = attach_categories(&long, mapping)?;
    let categories: Vec<&str> = mapping.categories().into_iter().collect();
    pivot_sum(&categorized, index_columns, &categories)
}

/// Step 1: one row per (input row, interaction column).
///
/// Output columns are the index columns, then `interaction_type` and
/// `interaction_value`. Rows are ordered column by column, then by input
/// row. Missing values become 0.
pub fn unpivot(table: &DataFrame, index_columns: &[String]) -> PipelineResult<DataFrame> {
    for column in index_columns {
        require_column(table, CATEGORICAL_VARIABLES_MAPPED, column)?;
    }
    let value_columns: Vec<String> = column_names(table)
        .into_iter()
        .filter(|c| !index_columns.contains(c))
        .collect();
    for column in &value_columns {
        require_numeric(table, CATEGORICAL_VARIABLES_MAPPED, column)?;
    }

    let index: Vec<Expr> = index_columns.iter().map(|c| col(c)).collect();
    let long_form = |interaction_type: &str, value: Expr| {
        let mut exprs = index.clone();
        exprs.push(lit(interaction_type).alias(INTERACTION_TYPE));
        exprs.push(value.alias(INTERACTION_VALUE));
        table.clone().lazy().select(exprs)
    };

    if value_columns.is_empty() {
        return Ok(long_form("", lit(0.0)).limit(0).collect()?);
    }
    let parts: Vec<LazyFrame> = value_columns
        .iter()
        .map(|c| long_form(c.as_str(), col(c).cast(DataType::Float64).fill_null(lit(0.0))))
        .collect();
    Ok(concat(parts, UnionArgs::default())?.collect()?)
}

/// Step 2: replace `interaction_type` with `interaction_mapping`.
/// Fails with every unmapped type if any row has no mapping entry.
pub fn attach_categories(
    long:    &DataFrame,
    mapping: &InteractionMapping,
) -> PipelineResult<DataFrame> {
    let types = require_column(long, LONG_FORM, INTERACTION_TYPE)?.str()?;

    let unmapped: BTreeSet<&str> = types
        .into_iter()
        .flatten()
        .filter(|t| mapping.category(t).is_none())
        .collect();
    if !unmapped.is_empty() {
        return Err(PipelineError::MappingIncomplete {
            interaction_types: unmapped.into_iter().map(String::from).collect(),
        });
    }

    let categories: Vec<Option<&str>> = types
        .into_iter()
        .map(|t| t.and_then(|t| mapping.category(t)))
        .collect();
    let mut out = long.clone();
    out.with_column(Series::new(INTERACTION_TYPE, categories))?;
    out.rename(INTERACTION_TYPE, INTERACTION_MAPPING)?;
    Ok(out)
}

/// Step 3: sum values per (index tuple, category) and spread categories
/// into columns, one per entry of `categories` in that order. A category
/// with no contribution sums to 0. Rows are sorted by index tuple, nulls
/// first.
pub fn pivot_sum(
    long:          &DataFrame,
    index_columns: &[String],
    categories:    &[&str],
) -> PipelineResult<DataFrame> {
    require_column(long, LONG_FORM, INTERACTION_MAPPING)?;
    require_numeric(long, LONG_FORM, INTERACTION_VALUE)?;

    let index: Vec<Expr> = index_columns.iter().map(|c| col(c)).collect();
    let sums: Vec<Expr> = categories
        .iter()
        .map(|category| {
            col(INTERACTION_VALUE)
                .filter(col(INTERACTION_MAPPING).eq(lit(*category)))
                .sum()
                .alias(category)
        })
        .collect();

    let wide = long
        .clone()
        .lazy()
        .group_by(index.clone())
        .agg(sums)
        .sort_by_exprs(index, SortMultipleOptions::default())
        .collect()?;
    Ok(wide)
}

/// Step 4: the model input is the pivot without the non-feature columns.
pub fn project_model_input(
    interactions: &DataFrame,
    not_features: &[String],
) -> PipelineResult<DataFrame> {
    for column in not_features {
        require_column(interactions, INTERACTIONS_MAPPED, column)?;
    }
    let keep: Vec<String> = column_names(interactions)
        .into_iter()
        .filter(|c| !not_features.contains(c))
        .collect();
    Ok(interactions.select(keep)?)
}
