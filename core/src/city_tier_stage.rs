//! Geographic tier mapper: replaces `city_mapped` with `city_tier`.
//!
//! Execution: second stage; reads `loaded_data`, writes `city_tier_mapped`.
//! Cities missing from the lookup (and null cities) get DEFAULT_CITY_TIER.
//! A lookup miss is expected and never an error.

use crate::{
    config::DEFAULT_CITY_TIER,
    error::PipelineResult,
    event::PipelineEvent,
    frame::require_column,
    schema::{CITY_MAPPED, CITY_TIER, CITY_TIER_MAPPED, LOADED_DATA},
    stage::{table_replaced, PipelineStage},
    store::PipelineStore,
    types::TableName,
};
use polars::prelude::*;
use std::collections::BTreeMap;

pub struct CityTierStage {
    tiers: BTreeMap<String, f64>,
}

impl CityTierStage {
    pub fn new(tiers: BTreeMap<String, f64>) -> Self {
        Self { tiers }
    }
}

impl PipelineStage for CityTierStage {
    fn name(&self) -> &'static str { "city_tier" }

    fn input_table(&self) -> Option<TableName> { Some(LOADED_DATA) }

    fn output_tables(&self) -> &'static [TableName] { &[CITY_TIER_MAPPED] }

    fn run(&self, store: &PipelineStore) -> PipelineResult<Vec<PipelineEvent>> {
        let input = store.read_table(LOADED_DATA)?;
        let (output, unmapped_rows) = map_city_tier(&input, &self.tiers)?;
        if unmapped_rows > 0 {
            log::debug!(
                "{}: {unmapped_rows} of {} rows defaulted to tier {DEFAULT_CITY_TIER:?}",
                self.name(),
                input.height()
            );
        }

        store.replace_table(CITY_TIER_MAPPED, &output)?;
        Ok(vec![
            PipelineEvent::CityTierDefaulted { unmapped_rows },
            table_replaced(self.name(), CITY_TIER_MAPPED, &output),
        ])
    }
}

/// Attach `city_tier` and drop `city_mapped`. Row count and order are
/// preserved. Returns the table and the number of rows that fell back to
/// the default tier.
pub fn map_city_tier(
    input: &DataFrame,
    tiers: &BTreeMap<String, f64>,
) -> PipelineResult<(DataFrame, usize)> {
    let city = require_column(input, LOADED_DATA, CITY_MAPPED)?;

    let found: Vec<Option<f64>> = match city.dtype() {
        DataType::String => city
            .str()?
            .into_iter()
            .map(|name| name.and_then(|name| tiers.get(name).copied()))
            .collect(),
        // Numeric city codes are looked up by their printed form.
        dtype if dtype.is_numeric() => city
            .cast(&DataType::Float64)?
            .f64()?
            .into_iter()
            .map(|code| code.and_then(|code| tiers.get(&code.to_string()).copied()))
            .collect(),
        _ => vec![None; city.len()],
    };
    let unmapped = found.iter().filter(|t| t.is_none()).count();
    let tier: Vec<f64> = found.into_iter().map(|t| t.unwrap_or(DEFAULT_CITY_TIER)).collect();

    let mut output = input.drop(CITY_MAPPED)?;
    output.with_column(Series::new(CITY_TIER, tier))?;
    Ok((output, unmapped))
}
