//! SQLite persistence layer.
//!
//! RULE: Only the store talks to the database.
//! Stages call store methods and never execute SQL directly.

mod run_log;
mod tables;

pub use run_log::{RunStatus, StageLogEntry};

use crate::error::PipelineResult;
use rusqlite::Connection;
use std::path::Path;

/// Outcome of [`PipelineStore::bootstrap`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreStatus {
    Existing,
    Created,
}

pub struct PipelineStore {
    conn: Connection,
    path: Option<String>, // None for :memory:, Some(path) for file
}

impl PipelineStore {
    pub fn open(path: &str) -> PipelineResult<Self> {
        let conn = Connection::open_with_flags(
            path,
            rusqlite::OpenFlags::SQLITE_OPEN_READ_WRITE
                | rusqlite::OpenFlags::SQLITE_OPEN_CREATE
                | rusqlite::OpenFlags::SQLITE_OPEN_URI,
        )?;
        // WAL mode only for real files (shared-memory and :memory: ignore it).
        let _ = conn.execute_batch("PRAGMA journal_mode=WAL;");
        conn.execute_batch("PRAGMA foreign_keys=ON;")?;
        Ok(Self {
            conn,
            path: Some(path.to_string()),
        })
    }

    /// Open an in-memory database (used in tests).
    pub fn in_memory() -> PipelineResult<Self> {
        let conn = Connection::open(":memory:")?;
        conn.execute_batch("PRAGMA foreign_keys=ON;")?;
        Ok(Self { conn, path: None })
    }

    /// Open the database file at `path`, creating it when absent, and apply
    /// migrations. Reports whether the file already existed.
    pub fn bootstrap(path: &str) -> PipelineResult<(Self, StoreStatus)> {
        let status = if Path::new(path).is_file() {
            log::info!("Store already exists at {path}");
            StoreStatus::Existing
        } else {
            log::info!("Creating store at {path}");
            StoreStatus::Created
        };
        let store = Self::open(path)?;
        store.migrate()?;
        Ok((store, status))
    }

    /// Reopen a new connection to the same database.
    /// For in-memory databases, this returns a new in-memory database (isolated).
    pub fn reopen(&self) -> PipelineResult<Self> {
        match &self.path {
            Some(p) => Self::open(p),
            None => Self::in_memory(),
        }
    }

    /// Apply all schema migrations in order.
    pub fn migrate(&self) -> PipelineResult<()> {
        self.conn
            .execute_batch(include_str!("../../../migrations/001_foundation.sql"))?;
        Ok(())
    }
}
