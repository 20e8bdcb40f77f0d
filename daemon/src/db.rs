//! SQLite database operations

use crate::error::StoreError;
use crate::record::ProcessRecord;
use crate::store::SnapshotBackend;
use rusqlite::{params, Connection, ErrorCode, Transaction, TransactionBehavior};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

const SELECT_COLUMNS: &str =
    "SELECT hostname, pid, parent_pid, name, cpu_usage, memory_usage, timestamp FROM processes";

/// SQLite-backed process table. Every operation opens its own connection so
/// a retried write never inherits a lock from the previous attempt.
pub struct Database {
    path: PathBuf,
    busy_timeout: Duration,
    closed: AtomicBool,
}

impl Database {
    pub fn open(path: &Path) -> Result<Self, StoreError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).ok();
        }
        let db = Self {
            path: path.to_path_buf(),
            busy_timeout: Duration::ZERO,
            closed: AtomicBool::new(false),
        };
        db.connect()?;
        Ok(db)
    }

    pub fn open_default() -> Result<Self, StoreError> {
        Self::open(&Self::default_path())
    }

    pub fn default_path() -> PathBuf {
        directories::ProjectDirs::from("", "", "proctab")
            .map(|dirs| dirs.data_dir().join("proctab.db"))
            .unwrap_or_else(|| PathBuf::from("proctab.db"))
    }

    /// How long SQLite itself waits on a lock before reporting it busy.
    pub fn with_busy_timeout(mut self, busy_timeout: Duration) -> Self {
        self.busy_timeout = busy_timeout;
        self
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn init_schema(&self) -> Result<(), StoreError> {
        let conn = self.connect()?;
        let _mode: String = conn.query_row("PRAGMA journal_mode = WAL", [], |row| row.get(0))?;
        conn.execute_batch(include_str!("../schema.sql"))?;
        Ok(())
    }

    fn connect(&self) -> Result<Connection, StoreError> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(StoreError::Closed);
        }
        let conn = Connection::open(&self.path)?;
        conn.busy_timeout(self.busy_timeout)?;
        Ok(conn)
    }

    fn insert_all(tx: &Transaction, records: &[ProcessRecord]) -> rusqlite::Result<usize> {
        let mut stmt = tx.prepare_cached(
            "INSERT INTO processes (hostname, pid, parent_pid, name, cpu_usage, memory_usage, timestamp)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
        )?;
        for r in records {
            stmt.execute(params![
                r.hostname,
                r.pid,
                r.parent_pid,
                r.name,
                r.cpu_usage,
                r.memory_usage,
                r.timestamp
            ])?;
        }
        Ok(records.len())
    }

    fn map_record(row: &rusqlite::Row) -> rusqlite::Result<ProcessRecord> {
        Ok(ProcessRecord {
            hostname: row.get(0)?,
            pid: row.get(1)?,
            parent_pid: row.get(2)?,
            name: row.get(3)?,
            cpu_usage: row.get(4)?,
            memory_usage: row.get(5)?,
            timestamp: row.get(6)?,
        })
    }
}

impl SnapshotBackend for Database {
    fn replace_host(&self, hostname: &str, records: &[ProcessRecord]) -> Result<usize, StoreError> {
        let mut conn = self.connect()?;
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
        tx.execute("DELETE FROM processes WHERE hostname = ?1", params![hostname])?;
        let count = Self::insert_all(&tx, records)?;
        tx.commit()?;
        Ok(count)
    }

    fn insert_records(&self, records: &[ProcessRecord]) -> Result<usize, StoreError> {
        let mut conn = self.connect()?;
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
        let count = Self::insert_all(&tx, records)?;
        tx.commit()?;
        Ok(count)
    }

    fn list_records(&self) -> Result<Vec<ProcessRecord>, StoreError> {
        let conn = self.connect()?;
        let mut stmt = conn.prepare(&format!("{} ORDER BY id", SELECT_COLUMNS))?;
        let rows = stmt.query_map([], Self::map_record)?;
        Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
    }

    fn delete_all(&self) -> Result<usize, StoreError> {
        let mut conn = self.connect()?;
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
        let count = tx.execute("DELETE FROM processes", [])?;
        tx.commit()?;
        Ok(count)
    }

    fn close(&self) -> Result<(), StoreError> {
        let conn = self.connect()?;
        self.closed.store(true, Ordering::SeqCst);
        conn.query_row("PRAGMA wal_checkpoint(TRUNCATE)", [], |_| Ok(()))?;
        Ok(())
    }
}

impl From<rusqlite::Error> for StoreError {
    fn from(e: rusqlite::Error) -> Self {
        match e.sqlite_error_code() {
            Some(ErrorCode::DatabaseBusy) | Some(ErrorCode::DatabaseLocked) => {
                StoreError::Contention(e.to_string())
            }
            _ => StoreError::Backend(e.to_string()),
        }
    }
}
