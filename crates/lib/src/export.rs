//! Run orchestration: full export and retry of a previous run's failures.

use crate::api::ApiClient;
use crate::consolidate::Consolidator;
use crate::fetch::{FetchTask, Pipeline, PipelineError, RetryPolicy};
use crate::ledger::{FailureLedger, FailureRecord};
use crate::model::EntityNode;
use crate::sink::JsonSink;
use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

pub const DEFAULT_OUTPUT: &str = "consolidated_phone_data.json";
pub const DEFAULT_FAILED_OUTPUT: &str = "failed_items.json";
pub const DEFAULT_RECOVERED_OUTPUT: &str = "recovered_items.json";

#[derive(Debug, Clone)]
pub struct ExportOptions {
    /// Stop after this many users; None exports all of them.
    pub max_count: Option<usize>,
    pub output: PathBuf,
    pub failed_output: PathBuf,
}

impl Default for ExportOptions {
    fn default() -> Self {
        Self {
            max_count: None,
            output: PathBuf::from(DEFAULT_OUTPUT),
            failed_output: PathBuf::from(DEFAULT_FAILED_OUTPUT),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExportSummary {
    pub users: usize,
    pub failures: usize,
    pub ledger_written: bool,
}

/// Walk the account, write the consolidated document, then the ledger if anything failed.
/// The document is written even when the ledger is not empty. A rejected API key fails
/// the export before anything is written.
pub async fn run_export(
    client: &dyn ApiClient,
    policy: &RetryPolicy,
    options: &ExportOptions,
    sink: &mut dyn JsonSink,
) -> Result<ExportSummary> {
    let mut ledger = FailureLedger::new();
    let users = Pipeline::new(client, policy, &mut ledger)
        .run(options.max_count)
        .await?;

    let mut consolidator = Consolidator::new();
    consolidator.extend(users);
    let doc = consolidator.finalize();
    doc.write(sink, &options.output)
        .with_context(|| format!("writing {}", options.output.display()))?;
    log::info!(
        "wrote {} user(s), {} phone number(s), {} conversation(s), {} message(s), {} call(s), {} transcript(s) to {}",
        doc.total_users,
        doc.total_phone_numbers,
        doc.total_conversations,
        doc.total_messages,
        doc.total_calls,
        doc.total_transcripts,
        options.output.display()
    );

    let ledger_written = ledger.flush(sink, &options.failed_output)?;
    if ledger_written {
        log::warn!(
            "{} fetch(es) failed; details in {}",
            ledger.len(),
            options.failed_output.display()
        );
    } else {
        log::info!("no failures recorded");
    }
    Ok(ExportSummary {
        users: doc.total_users,
        failures: ledger.len(),
        ledger_written,
    })
}

#[derive(Debug, Clone)]
pub struct RetryOptions {
    /// Ledger file the failures were read from.
    pub input: PathBuf,
    pub output: PathBuf,
    pub failed_output: PathBuf,
}

impl Default for RetryOptions {
    fn default() -> Self {
        Self {
            input: PathBuf::from(DEFAULT_FAILED_OUTPUT),
            output: PathBuf::from(DEFAULT_RECOVERED_OUTPUT),
            failed_output: PathBuf::from(DEFAULT_FAILED_OUTPUT),
        }
    }
}

/// Fragment fetched for one reissued task.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RecoveredItem {
    #[serde(flatten)]
    pub task: FetchTask,
    /// False when something beneath the task failed again.
    pub complete: bool,
    pub nodes: Vec<EntityNode>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RecoveredDocument {
    pub generated_at: DateTime<Utc>,
    pub total_tasks: usize,
    pub total_complete: usize,
    pub items: Vec<RecoveredItem>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetrySummary {
    pub tasks: usize,
    pub complete: usize,
    pub still_failing: usize,
    pub ledger_written: bool,
}

/// Reissue each recorded task from its cursor. Writes the recovered fragments and a fresh
/// ledger of whatever failed again; the consumed ledger is removed unless it was just rewritten.
pub async fn run_retry(
    client: &dyn ApiClient,
    policy: &RetryPolicy,
    failures: Vec<FailureRecord>,
    options: &RetryOptions,
    sink: &mut dyn JsonSink,
) -> Result<RetrySummary> {
    let total = failures.len();
    let mut ledger = FailureLedger::new();
    let mut items = Vec::with_capacity(total);
    for (i, failure) in failures.into_iter().enumerate() {
        log::info!("[{}/{}] {}", i + 1, total, failure.task.describe());
        let before = ledger.len();
        let result = Pipeline::new(client, policy, &mut ledger)
            .resume(&failure.task)
            .await;
        match result {
            Ok(nodes) => items.push(RecoveredItem {
                complete: ledger.len() == before,
                task: failure.task,
                nodes,
            }),
            Err(e @ PipelineError::KeyRejected(_)) => return Err(e.into()),
            Err(e) => {
                log::warn!("cannot reissue ledger entry: {}", e);
                ledger.record(FailureRecord {
                    error: e.to_string(),
                    permanent: true,
                    failed_at: Utc::now(),
                    ..failure
                });
            }
        }
    }

    let complete = items.iter().filter(|i| i.complete).count();
    let doc = RecoveredDocument {
        generated_at: Utc::now(),
        total_tasks: total,
        total_complete: complete,
        items,
    };
    let value = serde_json::to_value(&doc).context("serializing recovered items")?;
    sink.write(&options.output, &value)
        .with_context(|| format!("writing {}", options.output.display()))?;
    log::info!(
        "recovered {}/{} task(s) into {}",
        complete,
        total,
        options.output.display()
    );

    let ledger_written = ledger.flush(sink, &options.failed_output)?;
    if ledger_written {
        log::warn!(
            "{} fetch(es) still failing; details in {}",
            ledger.len(),
            options.failed_output.display()
        );
    }
    if !(ledger_written && options.input == options.failed_output) {
        sink.remove(&options.input)?;
    }
    Ok(RetrySummary {
        tasks: total,
        complete,
        still_failing: ledger.len(),
        ledger_written,
    })
}
