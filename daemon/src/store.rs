//! Latest-snapshot-per-host storage

pub mod memory;

use crate::error::StoreError;
use crate::record::{self, FieldErrors, ProcessRecord, ValidationErrors};
use crate::retry::{RetryError, RetryPolicy, Sleeper, ThreadSleeper};
use chrono::Utc;
use std::sync::Arc;
use tracing::{debug, info};

/// Single-attempt storage primitives. Implementations report lock races as
/// [`StoreError::Contention`] and must leave no partial effect behind when
/// they do.
pub trait SnapshotBackend: Send + Sync {
    /// Deletes every row for `hostname` and inserts `records`, as one unit.
    fn replace_host(&self, hostname: &str, records: &[ProcessRecord]) -> Result<usize, StoreError>;
    /// Inserts `records` as one unit without deleting anything.
    fn insert_records(&self, records: &[ProcessRecord]) -> Result<usize, StoreError>;
    fn list_records(&self) -> Result<Vec<ProcessRecord>, StoreError>;
    fn delete_all(&self) -> Result<usize, StoreError>;
    fn close(&self) -> Result<(), StoreError> {
        Ok(())
    }
}

impl<B: SnapshotBackend + ?Sized> SnapshotBackend for Arc<B> {
    fn replace_host(&self, hostname: &str, records: &[ProcessRecord]) -> Result<usize, StoreError> {
        (**self).replace_host(hostname, records)
    }

    fn insert_records(&self, records: &[ProcessRecord]) -> Result<usize, StoreError> {
        (**self).insert_records(records)
    }

    fn list_records(&self) -> Result<Vec<ProcessRecord>, StoreError> {
        (**self).list_records()
    }

    fn delete_all(&self) -> Result<usize, StoreError> {
        (**self).delete_all()
    }

    fn close(&self) -> Result<(), StoreError> {
        (**self).close()
    }
}

pub struct SnapshotStore {
    backend: Box<dyn SnapshotBackend>,
    policy: RetryPolicy,
    sleeper: Arc<dyn Sleeper>,
}

impl SnapshotStore {
    pub fn new(backend: impl SnapshotBackend + 'static) -> Self {
        Self {
            backend: Box::new(backend),
            policy: RetryPolicy::default(),
            sleeper: Arc::new(ThreadSleeper),
        }
    }

    pub fn with_retry_policy(mut self, policy: RetryPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn with_sleeper(mut self, sleeper: impl Sleeper + 'static) -> Self {
        self.sleeper = Arc::new(sleeper);
        self
    }

    /// Replaces everything stored for `hostname` with `records`. Readers see
    /// either the old set or the new one in full.
    pub fn replace_snapshot(&self, hostname: &str, records: Vec<ProcessRecord>) -> Result<usize, StoreError> {
        if hostname.trim().is_empty() {
            return Err(ValidationErrors::batch("hostname may not be blank.").into());
        }
        let records = checked(records, Some(hostname))?;
        let count = self.with_retry(|| self.backend.replace_host(hostname, &records))?;
        info!(hostname, count, "snapshot replaced");
        Ok(count)
    }

    /// Stores `records` alongside whatever is already there. Nothing is
    /// written unless every record validates.
    pub fn append_records(&self, records: Vec<ProcessRecord>) -> Result<usize, StoreError> {
        let records = checked(records, None)?;
        let count = self.with_retry(|| self.backend.insert_records(&records))?;
        info!(count, "records appended");
        Ok(count)
    }

    /// Parses a JSON upload body and appends it.
    pub fn upload(&self, body: &serde_json::Value) -> Result<usize, StoreError> {
        let records = record::parse_batch(body, Utc::now())?;
        self.append_records(records)
    }

    pub fn list_all(&self) -> Result<Vec<ProcessRecord>, StoreError> {
        self.backend.list_records()
    }

    pub fn clear_all(&self) -> Result<usize, StoreError> {
        let count = self.with_retry(|| self.backend.delete_all())?;
        info!(count, "all records deleted");
        Ok(count)
    }

    pub fn close(&self) -> Result<(), StoreError> {
        self.backend.close()
    }

    fn with_retry<T>(&self, mut op: impl FnMut() -> Result<T, StoreError>) -> Result<T, StoreError> {
        self.policy
            .run(self.sleeper.as_ref(), StoreError::is_transient, |attempt| {
                debug!(attempt, "store write attempt");
                op()
            })
            .map_err(|e| match e {
                RetryError::Exhausted { attempts, .. } => StoreError::Unavailable { attempts },
                RetryError::Aborted(e) => e,
            })
    }
}

/// Validates and normalizes a batch; when `hostname` is given every record
/// must carry it.
fn checked(records: Vec<ProcessRecord>, hostname: Option<&str>) -> Result<Vec<ProcessRecord>, ValidationErrors> {
    let len = records.len();
    let mut failures: Vec<(usize, FieldErrors)> = Vec::new();
    let records: Vec<ProcessRecord> = records
        .into_iter()
        .enumerate()
        .map(|(index, record)| {
            let record = record.normalize();
            let mut errors = record.validate().err().unwrap_or_default();
            if let Some(expected) = hostname {
                if record.hostname != expected {
                    errors
                        .entry("hostname".to_string())
                        .or_default()
                        .push(format!("Expected \"{}\".", expected));
                }
            }
            if !errors.is_empty() {
                failures.push((index, errors));
            }
            record
        })
        .collect();

    if failures.is_empty() {
        Ok(records)
    } else {
        Err(ValidationErrors::records(len, failures))
    }
}
