use super::PipelineStore;
use crate::error::{PipelineError, PipelineResult};
use polars::prelude::*;
use rusqlite::{params, types::ValueRef, OptionalExtension, Transaction};

type SqlValue = rusqlite::types::Value;

fn quote_ident(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

fn is_real(decl: &str) -> bool {
    matches!(decl.to_ascii_uppercase().as_str(), "REAL" | "INTEGER" | "NUMERIC")
}

/// Column buffer filled row by row while reading a table.
enum ColumnBuf {
    Number(Vec<Option<f64>>),
    Text(Vec<Option<String>>),
}

impl ColumnBuf {
    fn push(&mut self, value: ValueRef<'_>) {
        match self {
            ColumnBuf::Number(values) => values.push(match value {
                ValueRef::Integer(i) => Some(i as f64),
                ValueRef::Real(f)    => Some(f),
                _                    => None,
            }),
            ColumnBuf::Text(values) => values.push(match value {
                ValueRef::Null       => None,
                ValueRef::Integer(i) => Some(i.to_string()),
                ValueRef::Real(f)    => Some(f.to_string()),
                ValueRef::Text(b) | ValueRef::Blob(b) => {
                    Some(String::from_utf8_lossy(b).into_owned())
                }
            }),
        }
    }

    fn into_series(self, name: &str) -> Series {
        match self {
            ColumnBuf::Number(values) => Series::new(name, values),
            ColumnBuf::Text(values)   => Series::new(name, values),
        }
    }
}

/// SQL values of one column, numbers as REAL and everything else as TEXT.
fn sql_column(series: &Series) -> PipelineResult<(&'static str, Vec<SqlValue>)> {
    if series.dtype().is_numeric() {
        let numbers = series.cast(&DataType::Float64)?;
        let values = numbers
            .f64()?
            .into_iter()
            .map(|v| v.map_or(SqlValue::Null, SqlValue::Real))
            .collect();
        Ok(("REAL", values))
    } else {
        let text = series.cast(&DataType::String)?;
        let values = text
            .str()?
            .into_iter()
            .map(|v| v.map_or(SqlValue::Null, |s| SqlValue::Text(s.to_string())))
            .collect();
        Ok(("TEXT", values))
    }
}

impl PipelineStore {
    // ── Stage tables ──────────────────────────────────────────

    pub fn table_exists(&self, name: &str) -> PipelineResult<bool> {
        let found = self
            .conn
            .query_row(
                "SELECT 1 FROM sqlite_master WHERE type = 'table' AND name = ?1",
                params![name],
                |_| Ok(()),
            )
            .optional()?;
        Ok(found.is_some())
    }

    /// Read a whole table in insertion order. REAL columns come back as
    /// `Float64`, every other column as `String`.
    pub fn read_table(&self, name: &str) -> PipelineResult<DataFrame> {
        if !self.table_exists(name)? {
            return Err(PipelineError::TableNotFound { table: name.to_string() });
        }

        let mut info = self
            .conn
            .prepare(&format!("PRAGMA table_info({})", quote_ident(name)))?;
        let columns = info
            .query_map([], |row| {
                let col_name: String = row.get(1)?;
                let decl: String = row.get(2)?;
                Ok((col_name, decl))
            })?
            .collect::<Result<Vec<_>, _>>()?;

        let mut buffers: Vec<ColumnBuf> = columns
            .iter()
            .map(|(_, decl)| {
                if is_real(decl) {
                    ColumnBuf::Number(Vec::new())
                } else {
                    ColumnBuf::Text(Vec::new())
                }
            })
            .collect();

        let mut stmt = self
            .conn
            .prepare(&format!("SELECT * FROM {} ORDER BY rowid", quote_ident(name)))?;
        let mut rows = stmt.query([])?;
        while let Some(row) = rows.next()? {
            for (i, buffer) in buffers.iter_mut().enumerate() {
                buffer.push(row.get_ref(i)?);
            }
        }

        let series = columns
            .iter()
            .zip(buffers)
            .map(|((col_name, _), buffer)| buffer.into_series(col_name))
            .collect();
        Ok(DataFrame::new(series)?)
    }

    /// Drop and recreate `name` with the contents of `table`, atomically.
    pub fn replace_table(&self, name: &str, table: &DataFrame) -> PipelineResult<()> {
        self.replace_tables(&[(name, table)])
    }

    /// Replace several tables in a single transaction: either every table
    /// is committed or none is.
    pub fn replace_tables(&self, tables: &[(&str, &DataFrame)]) -> PipelineResult<()> {
        let tx = self.conn.unchecked_transaction()?;
        for (name, table) in tables {
            write_table(&tx, name, table)?;
        }
        tx.commit()?;
        Ok(())
    }

    pub fn table_row_count(&self, name: &str) -> PipelineResult<i64> {
        if !self.table_exists(name)? {
            return Err(PipelineError::TableNotFound { table: name.to_string() });
        }
        let count = self.conn.query_row(
            &format!("SELECT COUNT(*) FROM {}", quote_ident(name)),
            [],
            |row| row.get(0),
        )?;
        Ok(count)
    }
}

fn write_table(tx: &Transaction<'_>, name: &str, table: &DataFrame) -> PipelineResult<()> {
    if table.width() == 0 {
        return Err(PipelineError::EmptySchema { table: name.to_string() });
    }

    let columns = table
        .get_columns()
        .iter()
        .map(|s| sql_column(s).map(|(decl, values)| (s.name(), decl, values)))
        .collect::<PipelineResult<Vec<_>>>()?;

    let ident = quote_ident(name);
    let column_defs = columns
        .iter()
        .map(|(col_name, decl, _)| format!("{} {decl}", quote_ident(col_name)))
        .collect::<Vec<_>>()
        .join(", ");
    tx.execute_batch(&format!(
        "DROP TABLE IF EXISTS {ident}; CREATE TABLE {ident} ({column_defs});"
    ))?;

    let placeholders = (1..=columns.len())
        .map(|i| format!("?{i}"))
        .collect::<Vec<_>>()
        .join(", ");
    let mut stmt = tx.prepare(&format!("INSERT INTO {ident} VALUES ({placeholders})"))?;
    for row in 0..table.height() {
        stmt.execute(rusqlite::params_from_iter(
            columns.iter().map(|(_, _, values)| &values[row]),
        ))?;
    }
    Ok(())
}
