//! Job invocation.
//!
//! Runs a job to completion from the caller's point of view: start, wait for
//! a terminal status, then read the whole result collection. All steps share
//! one deadline and stop early when the caller goes away. A run that was
//! started and then interrupted is aborted. Failed runs are reported, never
//! retried.

use std::{future::Future, sync::Arc, time::Duration};

use rmcp::model::Content;
use serde_json::Value;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::{
    backend::{JobBackend, JobRun, JobStatus, RunOptions},
    config::HostedConfig,
};
use crate::error::{McpError, McpResult};

/// Appended to a result item that exceeded the per-item budget.
pub const TRUNCATION_MARKER: &str = " ... Output was truncated because it will not fit into context. \
     Use the get-job-output tool with the dataset ID to read the remaining items.";

pub const DEFAULT_OUTPUT_MAX_CHARS: usize = 5000;

/// Bound on the best-effort abort sent after a timeout.
const ABORT_GRACE: Duration = Duration::from_secs(10);

/// Why a step stopped before its future finished.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Interrupt {
    Deadline,
    Cancelled,
}

async fn bounded<T>(
    deadline: Instant,
    cancel: &CancellationToken,
    step: impl Future<Output = McpResult<T>>,
) -> Result<McpResult<T>, Interrupt> {
    tokio::select! {
        biased;
        _ = cancel.cancelled() => Err(Interrupt::Cancelled),
        result = tokio::time::timeout_at(deadline, step) => result.map_err(|_| Interrupt::Deadline),
    }
}

/// Result of a finished run.
#[derive(Debug, Clone)]
pub struct JobOutput {
    pub label: String,
    pub run: JobRun,
    pub items: Vec<Value>,
}

impl JobOutput {
    /// Summary line followed by one text item per record, each held to
    /// `max_chars`.
    pub fn into_content(self, max_chars: usize) -> Vec<Content> {
        let mut content = Vec::with_capacity(self.items.len() + 1);
        content.push(Content::text(format!(
            "Job '{}' finished. Run ID: {}, dataset ID: {}, items: {}.",
            self.label,
            self.run.id,
            self.run.default_dataset_id,
            self.items.len()
        )));
        content.extend(
            self.items
                .iter()
                .map(|item| Content::text(truncate_item(&render_item(item), max_chars))),
        );
        content
    }
}

fn render_item(item: &Value) -> String {
    match item {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// Cut `text` to `max_chars` characters and append [`TRUNCATION_MARKER`].
/// Text within budget is returned unchanged.
pub fn truncate_item(text: &str, max_chars: usize) -> String {
    match text.char_indices().nth(max_chars) {
        None => text.to_string(),
        Some((cut, _)) => format!("{}{}", &text[..cut], TRUNCATION_MARKER),
    }
}

pub struct JobInvoker {
    backend: Arc<dyn JobBackend>,
    hosted: HostedConfig,
    timeout: Duration,
}

impl JobInvoker {
    pub fn new(backend: Arc<dyn JobBackend>, hosted: HostedConfig, timeout: Duration) -> Self {
        Self {
            backend,
            hosted,
            timeout,
        }
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    pub async fn invoke(
        &self,
        job_id: &str,
        arguments: &Value,
        options: &RunOptions,
        credential: Option<&str>,
        cancel: &CancellationToken,
    ) -> McpResult<JobOutput> {
        let credential = credential.ok_or_else(|| {
            McpError::Unauthenticated(format!("a credential is required to run {}", job_id))
        })?;
        let deadline = Instant::now() + self.timeout;

        let run = match bounded(
            deadline,
            cancel,
            self.backend.start_job(job_id, arguments, options, credential),
        )
        .await
        {
            Ok(result) => result?,
            Err(interrupt) => return Err(self.interrupted(job_id, interrupt)),
        };

        let run = match bounded(
            deadline,
            cancel,
            self.backend.wait_for_job(&run.id, credential),
        )
        .await
        {
            Ok(result) => result?,
            Err(interrupt) => {
                warn!("Run {} of {} interrupted ({:?}), aborting", run.id, job_id, interrupt);
                self.abort(&run.id, credential).await;
                return Err(self.interrupted(job_id, interrupt));
            }
        };

        if run.status != JobStatus::Succeeded {
            return Err(McpError::InvocationFailed {
                job: job_id.to_string(),
                message: run
                    .status_message
                    .clone()
                    .unwrap_or_else(|| format!("run {} ended with status {:?}", run.id, run.status)),
            });
        }

        let page = match bounded(
            deadline,
            cancel,
            self.backend
                .get_job_result(&run.default_dataset_id, 0, None, credential),
        )
        .await
        {
            Ok(result) => result?,
            Err(interrupt) => return Err(self.interrupted(job_id, interrupt)),
        };
        info!(
            "Run {} of {} produced {} items",
            run.id,
            job_id,
            page.items.len()
        );

        self.republish(&page.items, credential, deadline, cancel).await;

        Ok(JobOutput {
            label: job_id.to_string(),
            run,
            items: page.items,
        })
    }

    fn interrupted(&self, job_id: &str, interrupt: Interrupt) -> McpError {
        match interrupt {
            Interrupt::Deadline => McpError::InvocationTimeout {
                target: job_id.to_string(),
                seconds: self.timeout.as_secs(),
            },
            Interrupt::Cancelled => McpError::Cancelled(job_id.to_string()),
        }
    }

    async fn abort(&self, run_id: &str, credential: &str) {
        match tokio::time::timeout(ABORT_GRACE, self.backend.abort_job(run_id, credential)).await {
            Ok(Ok(())) => debug!("Aborted run {}", run_id),
            Ok(Err(e)) => warn!("Failed to abort run {}: {}", run_id, e),
            Err(_) => warn!("Abort of run {} did not complete in {:?}", run_id, ABORT_GRACE),
        }
    }

    /// Copy results into the hosting context's output collection.
    async fn republish(
        &self,
        items: &[Value],
        credential: &str,
        deadline: Instant,
        cancel: &CancellationToken,
    ) {
        if !self.hosted.enabled || items.is_empty() {
            return;
        }
        let Some(dataset_id) = self.hosted.output_dataset_id.as_deref() else {
            warn!("Hosted mode without an output dataset; results not republished");
            return;
        };
        match bounded(
            deadline,
            cancel,
            self.backend.push_results(dataset_id, items, credential),
        )
        .await
        {
            Ok(Ok(())) => {}
            Ok(Err(e)) => {
                warn!("Failed to republish {} items to {}: {}", items.len(), dataset_id, e)
            }
            Err(interrupt) => warn!(
                "Republishing {} items to {} interrupted ({:?})",
                items.len(),
                dataset_id,
                interrupt
            ),
        }
    }
}
