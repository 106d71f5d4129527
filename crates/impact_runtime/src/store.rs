//! `SQLite` run history: initialization and query functions.

use refinery::embed_migrations;
use rusqlite::{params, Connection, Transaction};
use std::path::Path;
use thiserror::Error;

embed_migrations!("migrations");

const DB_FILE: &str = "history.sqlite";

/// Errors that can occur during storage operations.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("migration error: {0}")]
    Migration(#[from] refinery::Error),
}

/// A test target result to insert into the database.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TestRunRow {
    pub target: String,
    pub result: String,
    pub duration_ms: i64,
}

/// A completed sequence.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SequenceInfo {
    pub sequence_id: String,
    pub kind: String,
    pub result: String,
}

/// Initializes the `SQLite` database at `<history_dir>/history.sqlite`.
pub fn init_storage(history_dir: &Path) -> Result<(), StoreError> {
    let mut conn = Connection::open(history_dir.join(DB_FILE))?;
    migrations::runner().run(&mut conn)?;
    Ok(())
}

/// Opens a connection to the database.
pub fn open_connection(history_dir: &Path) -> Result<Connection, StoreError> {
    Ok(Connection::open(history_dir.join(DB_FILE))?)
}

/// Inserts a new sequence record.
pub fn insert_sequence(
    tx: &Transaction,
    sequence_id: &str,
    kind: &str,
    started_at: i64,
) -> Result<(), StoreError> {
    tx.execute(
        "INSERT INTO sequences (sequence_id, kind, started_at) VALUES (?1, ?2, ?3)",
        params![sequence_id, kind, started_at],
    )?;
    Ok(())
}

/// Marks a sequence as completed with its overall result.
pub fn complete_sequence(
    tx: &Transaction,
    sequence_id: &str,
    result: &str,
    completed_at: i64,
) -> Result<(), StoreError> {
    tx.execute(
        "UPDATE sequences SET result = ?1, completed_at = ?2 WHERE sequence_id = ?3",
        params![result, completed_at, sequence_id],
    )?;
    Ok(())
}

/// Inserts the test target results of a sequence in batch.
pub fn insert_test_runs(tx: &Transaction, sequence_id: &str, runs: &[TestRunRow]) -> Result<(), StoreError> {
    let mut stmt = tx.prepare(
        "INSERT INTO test_runs (sequence_id, target, result, duration_ms) VALUES (?1, ?2, ?3, ?4)",
    )?;
    for run in runs {
        stmt.execute(params![sequence_id, run.target, run.result, run.duration_ms])?;
    }
    Ok(())
}

/// Gets the most recent completed sequences.
pub fn get_recent_sequences(conn: &Connection, limit: usize) -> Result<Vec<SequenceInfo>, StoreError> {
    let mut stmt = conn.prepare(
        "SELECT sequence_id, kind, result FROM sequences \
         WHERE completed_at IS NOT NULL \
         ORDER BY started_at DESC, rowid DESC LIMIT ?1",
    )?;
    let rows = stmt.query_map(params![limit], |row| {
        Ok(SequenceInfo {
            sequence_id: row.get(0)?,
            kind: row.get(1)?,
            result: row.get(2)?,
        })
    })?;
    rows.collect::<Result<Vec<_>, _>>()
        .map_err(StoreError::from)
}

/// Gets the targets whose most recent run in a completed sequence failed to execute.
///
/// Runs that never started (`not_run`) do not count as the most recent run.
pub fn get_failed_to_execute_targets(conn: &Connection) -> Result<Vec<String>, StoreError> {
    let mut stmt = conn.prepare(
        "SELECT latest.target FROM test_runs latest \
         WHERE latest.result = 'failed_to_execute' \
         AND latest.rowid = ( \
             SELECT MAX(t.rowid) FROM test_runs t \
             JOIN sequences s ON s.sequence_id = t.sequence_id \
             WHERE t.target = latest.target \
             AND t.result != 'not_run' \
             AND s.completed_at IS NOT NULL \
         ) \
         ORDER BY latest.target",
    )?;
    let rows = stmt.query_map([], |row| row.get(0))?;
    rows.collect::<Result<Vec<_>, _>>()
        .map_err(StoreError::from)
}
