//! Process snapshot sources

pub mod fixed;
#[cfg(target_os = "linux")]
pub mod linux;

pub use fixed::FixedCollector;
#[cfg(target_os = "linux")]
pub use linux::LinuxProcessCollector;

use crate::record::{ProcessRecord, UNKNOWN_NAME};
use chrono::{DateTime, Utc};
use std::fmt;
use std::sync::Arc;
use tracing::debug;

/// What a source could read about one process. Fields it could not resolve
/// are left empty and defaulted when the sample becomes a record.
#[derive(Debug, Clone, PartialEq)]
pub struct ProcessSample {
    pub pid: i64,
    pub parent_pid: Option<i64>,
    pub name: Option<String>,
    pub cpu_usage: Option<f64>,
    pub memory_usage: Option<f64>,
}

impl ProcessSample {
    pub fn new(pid: i64) -> Self {
        Self { pid, parent_pid: None, name: None, cpu_usage: None, memory_usage: None }
    }

    pub fn into_record(self, hostname: &str, timestamp: DateTime<Utc>) -> ProcessRecord {
        let usage = |v: Option<f64>| v.filter(|v| v.is_finite() && *v >= 0.0).unwrap_or(0.0);
        ProcessRecord {
            hostname: hostname.to_string(),
            pid: self.pid,
            parent_pid: self.parent_pid,
            name: self
                .name
                .filter(|n| !n.trim().is_empty())
                .unwrap_or_else(|| UNKNOWN_NAME.to_string()),
            cpu_usage: usage(self.cpu_usage),
            memory_usage: usage(self.memory_usage),
            timestamp,
        }
    }
}

/// Why a process was left out of a scan.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SkipReason {
    /// Exited between listing and reading.
    Gone(i64),
    AccessDenied(i64),
    Unreadable { pid: i64, detail: String },
}

impl fmt::Display for SkipReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SkipReason::Gone(pid) => write!(f, "process {} disappeared", pid),
            SkipReason::AccessDenied(pid) => write!(f, "access denied to process {}", pid),
            SkipReason::Unreadable { pid, detail } => {
                write!(f, "process {} unreadable: {}", pid, detail)
            }
        }
    }
}

/// A best-effort enumeration of live processes. Each item is read on demand;
/// a failed read is yielded as a [`SkipReason`] instead of ending the scan.
pub trait ProcessCollector: Send + Sync {
    fn scan(&self) -> Box<dyn Iterator<Item = Result<ProcessSample, SkipReason>> + '_>;
}

/// The scanner for the machine this process runs on.
pub fn system_collector() -> Arc<dyn ProcessCollector> {
    #[cfg(target_os = "linux")]
    {
        Arc::new(LinuxProcessCollector::new())
    }
    #[cfg(not(target_os = "linux"))]
    {
        tracing::warn!("no process scanner for this platform, scans will be empty");
        Arc::new(FixedCollector::default())
    }
}

/// Runs one scan and turns every readable process into a record for `hostname`.
pub fn take_snapshot(collector: &dyn ProcessCollector, hostname: &str) -> Vec<ProcessRecord> {
    let mut skipped = 0usize;
    let records: Vec<ProcessRecord> = collector
        .scan()
        .filter_map(|entry| match entry {
            Ok(sample) => Some(sample.into_record(hostname, Utc::now())),
            Err(reason) => {
                debug!(%reason, "skipping process");
                skipped += 1;
                None
            }
        })
        .collect();
    debug!(hostname, collected = records.len(), skipped, "scan finished");
    records
}
