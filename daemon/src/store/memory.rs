//! In-memory backend with injectable contention

use crate::error::StoreError;
use crate::record::ProcessRecord;
use crate::store::SnapshotBackend;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::RwLock;

#[derive(Default)]
pub struct MemoryBackend {
    rows: RwLock<Vec<ProcessRecord>>,
    contended: AtomicU32,
    write_attempts: AtomicU32,
    closed: AtomicBool,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Rejects the next `n` write attempts with [`StoreError::Contention`].
    pub fn contend_next(&self, n: u32) {
        self.contended.store(n, Ordering::SeqCst);
    }

    /// Rejects every write attempt until `contend_next(0)`.
    pub fn contend_always(&self) {
        self.contended.store(u32::MAX, Ordering::SeqCst);
    }

    pub fn write_attempts(&self) -> u32 {
        self.write_attempts.load(Ordering::SeqCst)
    }

    fn begin_write(&self) -> Result<(), StoreError> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(StoreError::Closed);
        }
        self.write_attempts.fetch_add(1, Ordering::SeqCst);
        let contended = self
            .contended
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| match n {
                0 => None,
                u32::MAX => Some(u32::MAX),
                n => Some(n - 1),
            })
            .is_ok();
        if contended {
            Err(StoreError::Contention("table is locked".to_string()))
        } else {
            Ok(())
        }
    }

    fn poisoned() -> StoreError {
        StoreError::Backend("row lock poisoned".to_string())
    }
}

impl SnapshotBackend for MemoryBackend {
    fn replace_host(&self, hostname: &str, records: &[ProcessRecord]) -> Result<usize, StoreError> {
        self.begin_write()?;
        let mut rows = self.rows.write().map_err(|_| Self::poisoned())?;
        rows.retain(|r| r.hostname != hostname);
        rows.extend_from_slice(records);
        Ok(records.len())
    }

    fn insert_records(&self, records: &[ProcessRecord]) -> Result<usize, StoreError> {
        self.begin_write()?;
        let mut rows = self.rows.write().map_err(|_| Self::poisoned())?;
        rows.extend_from_slice(records);
        Ok(records.len())
    }

    fn list_records(&self) -> Result<Vec<ProcessRecord>, StoreError> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(StoreError::Closed);
        }
        let rows = self.rows.read().map_err(|_| Self::poisoned())?;
        Ok(rows.clone())
    }

    fn delete_all(&self) -> Result<usize, StoreError> {
        self.begin_write()?;
        let mut rows = self.rows.write().map_err(|_| Self::poisoned())?;
        let count = rows.len();
        rows.clear();
        Ok(count)
    }

    fn close(&self) -> Result<(), StoreError> {
        self.closed.store(true, Ordering::SeqCst);
        Ok(())
    }
}
