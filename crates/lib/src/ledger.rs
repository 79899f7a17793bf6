//! Failure ledger: structured records of fetch tasks that gave up, in discovery order.
//!
//! The ledger file is written only when something failed; its absence means a clean run.

use crate::fetch::FetchTask;
use crate::sink::JsonSink;
use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;

/// One failed fetch task with what is needed to reissue it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FailureRecord {
    #[serde(flatten)]
    pub task: FetchTask,
    /// Attempts made before giving up.
    pub attempts: u32,
    /// True when the error was not retryable (e.g. 404); false when retries ran out.
    pub permanent: bool,
    pub error: String,
    pub failed_at: DateTime<Utc>,
    #[serde(default)]
    pub retry_hint: String,
}

impl FailureRecord {
    pub fn new(task: FetchTask, error: impl Into<String>, attempts: u32, permanent: bool) -> Self {
        let retry_hint = task.kind.retry_hint().to_string();
        Self {
            task,
            attempts,
            permanent,
            error: error.into(),
            failed_at: Utc::now(),
            retry_hint,
        }
    }
}

/// Serialized form of the ledger.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LedgerDocument {
    pub generated_at: DateTime<Utc>,
    pub total_failed: usize,
    #[serde(default)]
    pub counts_by_kind: BTreeMap<String, usize>,
    pub failures: Vec<FailureRecord>,
}

/// Accumulates failure records for one run.
#[derive(Debug, Default)]
pub struct FailureLedger {
    records: Vec<FailureRecord>,
}

impl FailureLedger {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&mut self, failure: FailureRecord) {
        self.records.push(failure);
    }

    pub fn has_failures(&self) -> bool {
        !self.records.is_empty()
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn records(&self) -> &[FailureRecord] {
        &self.records
    }

    pub fn to_document(&self) -> LedgerDocument {
        let mut counts_by_kind = BTreeMap::new();
        for r in &self.records {
            *counts_by_kind
                .entry(r.task.kind.as_str().to_string())
                .or_insert(0) += 1;
        }
        LedgerDocument {
            generated_at: Utc::now(),
            total_failed: self.records.len(),
            counts_by_kind,
            failures: self.records.clone(),
        }
    }

    /// Write the ledger to `path` if and only if it holds at least one record.
    /// Returns whether anything was written.
    pub fn flush(&self, sink: &mut dyn JsonSink, path: &Path) -> Result<bool> {
        if !self.has_failures() {
            return Ok(false);
        }
        let value = serde_json::to_value(self.to_document()).context("serializing failure ledger")?;
        sink.write(path, &value)?;
        Ok(true)
    }
}

/// Read a ledger file written by a previous run.
pub fn read_ledger(path: &Path) -> Result<LedgerDocument> {
    let s = std::fs::read_to_string(path)
        .with_context(|| format!("reading failure ledger {}", path.display()))?;
    serde_json::from_str(&s).with_context(|| format!("parsing failure ledger {}", path.display()))
}
