use super::PipelineStore;
use crate::{error::PipelineResult, types::RunMode};
use rusqlite::{params, OptionalExtension};

/// A persisted pipeline event.
#[derive(Debug, Clone, PartialEq)]
pub struct StageLogEntry {
    pub id:         Option<i64>,
    pub run_id:     String,
    pub stage:      String,
    pub event_type: String,
    pub payload:    String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunStatus {
    Running,
    Completed,
    Failed,
}

impl RunStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            RunStatus::Running   => "running",
            RunStatus::Completed => "completed",
            RunStatus::Failed    => "failed",
        }
    }

    fn parse(s: &str) -> Self {
        match s {
            "completed" => RunStatus::Completed,
            "failed"    => RunStatus::Failed,
            _           => RunStatus::Running,
        }
    }
}

impl PipelineStore {
    // ── Run ────────────────────────────────────────────────────

    pub fn insert_run(&self, run_id: &str, mode: RunMode, version: &str) -> PipelineResult<()> {
        self.conn.execute(
            "INSERT INTO pipeline_run (run_id, mode, version, started_at, status)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                run_id,
                mode.as_str(),
                version,
                chrono::Utc::now().to_rfc3339(),
                RunStatus::Running.as_str(),
            ],
        )?;
        Ok(())
    }

    pub fn finish_run(&self, run_id: &str, status: RunStatus) -> PipelineResult<()> {
        self.conn.execute(
            "UPDATE pipeline_run SET status = ?2, finished_at = ?3 WHERE run_id = ?1",
            params![run_id, status.as_str(), chrono::Utc::now().to_rfc3339()],
        )?;
        Ok(())
    }

    pub fn run_status(&self, run_id: &str) -> PipelineResult<Option<RunStatus>> {
        let status = self
            .conn
            .query_row(
                "SELECT status FROM pipeline_run WHERE run_id = ?1",
                params![run_id],
                |row| row.get::<_, String>(0),
            )
            .optional()?;
        Ok(status.as_deref().map(RunStatus::parse))
    }

    // ── Stage log ──────────────────────────────────────────────

    pub fn append_event(&self, entry: &StageLogEntry) -> PipelineResult<()> {
        self.conn.execute(
            "INSERT INTO stage_log (run_id, stage, event_type, payload)
             VALUES (?1, ?2, ?3, ?4)",
            params![entry.run_id, entry.stage, entry.event_type, entry.payload],
        )?;
        Ok(())
    }

    pub fn events_for_run(&self, run_id: &str) -> PipelineResult<Vec<StageLogEntry>> {
        let mut stmt = self.conn.prepare(
            "SELECT id, run_id, stage, event_type, payload
             FROM stage_log WHERE run_id = ?1
             ORDER BY id ASC",
        )?;
        let entries = stmt
            .query_map(params![run_id], |row| {
                Ok(StageLogEntry {
                    id:         Some(row.get(0)?),
                    run_id:     row.get(1)?,
                    stage:      row.get(2)?,
                    event_type: row.get(3)?,
                    payload:    row.get(4)?,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(entries)
    }
}
