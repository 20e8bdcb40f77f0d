//! Remote agent: scans the local host and pushes the result to a collector's
//! upload endpoint.

use crate::collector::{self, ProcessCollector};
use crate::record::ProcessRecord;
use anyhow::{Context, Result};
use std::time::Duration;
use tracing::info;

#[async_trait::async_trait]
pub trait Uploader: Send + Sync {
    /// Sends one batch and returns the HTTP status the collector answered with.
    async fn upload(&self, records: &[ProcessRecord]) -> Result<u16>;
}

pub struct HttpUploader {
    client: reqwest::Client,
    url: String,
}

impl HttpUploader {
    /// `timeout` bounds each whole request, connect through body.
    pub fn new(url: impl Into<String>, timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .context("failed to build HTTP client")?;
        Ok(Self { client, url: url.into() })
    }
}

#[async_trait::async_trait]
impl Uploader for HttpUploader {
    async fn upload(&self, records: &[ProcessRecord]) -> Result<u16> {
        let response = self
            .client
            .post(&self.url)
            .json(records)
            .send()
            .await
            .with_context(|| format!("failed to POST {}", self.url))?;
        Ok(response.status().as_u16())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RunOutcome {
    /// The scan came back empty; nothing was sent.
    Skipped,
    Uploaded { count: usize, status: u16 },
}

pub async fn run_once(
    collector: &dyn ProcessCollector,
    hostname: &str,
    uploader: &dyn Uploader,
) -> Result<RunOutcome> {
    let snapshot = collector::take_snapshot(collector, hostname);
    if snapshot.is_empty() {
        info!(hostname, "empty snapshot, nothing to upload");
        return Ok(RunOutcome::Skipped);
    }
    let count = snapshot.len();
    let status = uploader.upload(&snapshot).await?;
    info!(hostname, count, status, "uploaded processes");
    Ok(RunOutcome::Uploaded { count, status })
}
