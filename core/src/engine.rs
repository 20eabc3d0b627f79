//! The pipeline engine.
//!
//! EXECUTION ORDER (fixed, documented, never reordered):
//!   1. Ingestion           raw csv              → loaded_data
//!   2. City tier           loaded_data          → city_tier_mapped
//!   3. Categorical levels  city_tier_mapped     → categorical_variables_mapped
//!   4. Interactions        categorical_variables_mapped
//!                                               → interactions_mapped, model_input
//!
//! RULES:
//!   - Stages execute in registration order.
//!   - A stage starts only after the previous stage's tables are committed.
//!   - No stage calls another stage; tables in the store are the only hand-off.
//!   - Every event a stage reports is recorded in the stage log.
//!   - A failed stage aborts the run; nothing is retried.

use crate::{
    categorical_stage::CategoricalStage,
    city_tier_stage::CityTierStage,
    config::PipelineConfig,
    error::{PipelineError, PipelineResult},
    event::PipelineEvent,
    ingestion_stage::IngestionStage,
    interaction_stage::InteractionStage,
    stage::PipelineStage,
    store::{PipelineStore, RunStatus, StageLogEntry},
    types::{RunId, RunMode},
};
use std::path::PathBuf;

pub struct PipelineEngine {
    pub run_id: RunId,
    pub mode:   RunMode,
    pub store:  PipelineStore,
    stages:     Vec<Box<dyn PipelineStage>>,
    started:    bool,
}

impl PipelineEngine {
    pub fn new(run_id: RunId, mode: RunMode, store: PipelineStore) -> Self {
        Self {
            run_id,
            mode,
            store,
            stages: Vec::new(),
            started: false,
        }
    }

    /// Build a fully wired engine with all stages registered.
    /// Call this instead of new() + manual register() calls.
    pub fn build(
        run_id: RunId,
        mode:   RunMode,
        config: &PipelineConfig,
        source: impl Into<PathBuf>,
        store:  PipelineStore,
    ) -> PipelineResult<Self> {
        config.validate()?;
        let mut engine = PipelineEngine::new(run_id, mode, store);

        // EXECUTION ORDER: see module docs.
        engine.register(Box::new(IngestionStage::new(
            source,
            config.settings.zero_fill_columns.clone(),
        )));
        engine.register(Box::new(CityTierStage::new(config.city_tiers.clone())));
        engine.register(Box::new(CategoricalStage::new(
            config.significant_levels.clone(),
        )));
        engine.register(Box::new(InteractionStage::new(
            mode,
            config.index_columns(mode).to_vec(),
            config.interaction_mapping.clone(),
            config.settings.not_features.clone(),
        )));
        Ok(engine)
    }

    /// Register a stage. Call in the documented execution order.
    pub fn register(&mut self, stage: Box<dyn PipelineStage>) {
        self.stages.push(stage);
    }

    pub fn stage_names(&self) -> Vec<&'static str> {
        self.stages.iter().map(|s| s.name()).collect()
    }

    /// Run every stage in order. On failure the run is marked failed and
    /// the error is returned; tables of earlier stages stay committed.
    pub fn run_all(&mut self) -> PipelineResult<Vec<PipelineEvent>> {
        self.begin()?;
        let mut events = Vec::new();
        for idx in 0..self.stages.len() {
            match self.run_index(idx) {
                Ok(stage_events) => events.extend(stage_events),
                Err(e) => return Err(self.fail(e)),
            }
        }
        events.push(self.complete()?);
        Ok(events)
    }

    /// Run a single stage by name against whatever its input table holds.
    /// The run is marked completed or failed like a full run.
    pub fn run_stage(&mut self, name: &str) -> PipelineResult<Vec<PipelineEvent>> {
        let idx = self
            .stages
            .iter()
            .position(|s| s.name() == name)
            .ok_or_else(|| PipelineError::StageNotFound { name: name.to_string() })?;
        self.begin()?;
        let mut events = self.run_index(idx).map_err(|e| self.fail(e))?;
        events.push(self.complete()?);
        Ok(events)
    }

    /// All recorded events of this run, oldest first.
    pub fn run_events(&self) -> PipelineResult<Vec<StageLogEntry>> {
        self.store.events_for_run(&self.run_id)
    }

    fn begin(&mut self) -> PipelineResult<()> {
        if self.started {
            return Ok(());
        }
        self.store
            .insert_run(&self.run_id, self.mode, env!("CARGO_PKG_VERSION"))?;
        self.started = true;
        let event = PipelineEvent::RunStarted {
            run_id: self.run_id.clone(),
            mode:   self.mode,
        };
        self.record("engine", &event).map_err(|e| self.fail(e))?;
        log::info!("Run {} started in {} mode", self.run_id, self.mode);
        Ok(())
    }

    fn run_index(&self, idx: usize) -> PipelineResult<Vec<PipelineEvent>> {
        let stage = &self.stages[idx];
        let name = stage.name();

        let started = PipelineEvent::StageStarted { stage: name.to_string() };
        self.record(name, &started)?;
        log::debug!(
            "Stage {name}: {:?} → {:?}",
            stage.input_table(),
            stage.output_tables()
        );

        let mut events = vec![started];
        let stage_events = stage.run(&self.store)?;
        for event in &stage_events {
            self.record(name, event)?;
        }
        events.extend(stage_events);

        let completed = PipelineEvent::StageCompleted { stage: name.to_string() };
        self.record(name, &completed)?;
        events.push(completed);
        Ok(events)
    }

    fn record(&self, stage: &str, event: &PipelineEvent) -> PipelineResult<()> {
        let entry = StageLogEntry {
            id:         None,
            run_id:     self.run_id.clone(),
            stage:      stage.to_string(),
            event_type: event.type_name().to_string(),
            payload:    serde_json::to_string(event)?,
        };
        self.store.append_event(&entry)
    }

    /// Record `RunCompleted` and close the run. A failure here still marks
    /// the run failed.
    fn complete(&self) -> PipelineResult<PipelineEvent> {
        let done = PipelineEvent::RunCompleted { run_id: self.run_id.clone() };
        self.record("engine", &done)
            .and_then(|()| self.store.finish_run(&self.run_id, RunStatus::Completed))
            .map_err(|e| self.fail(e))?;
        log::info!("Run {} completed", self.run_id);
        Ok(done)
    }

    fn fail(&self, error: PipelineError) -> PipelineError {
        log::error!("Run {} failed: {error}", self.run_id);
        if let Err(e) = self.store.finish_run(&self.run_id, RunStatus::Failed) {
            log::warn!("Could not mark run {} as failed: {e}", self.run_id);
        }
        error
    }
}
