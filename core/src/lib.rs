//! Lead scoring feature pipeline.
//!
//! Four stages turn the raw lead file into a model-ready table, each one
//! reading the previous stage's table from a SQLite staging store and
//! replacing its own. See engine.rs for the execution order.

pub mod categorical_stage;
pub mod city_tier_stage;
pub mod config;
pub mod engine;
pub mod error;
pub mod event;
pub mod frame;
pub mod ingestion_stage;
pub mod interaction_stage;
pub mod schema;
pub mod stage;
pub mod store;
pub mod types;
