//! Job backend interface.
//!
//! The gateway never runs jobs itself. Everything it needs from the job
//! platform goes through [`JobBackend`]: definitions (the schema source),
//! starting and awaiting runs, reading result collections, store search,
//! and republishing results into a hosting context.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::McpResult;

/// What the gateway knows about a job before running it.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobDefinition {
    pub id: String,
    /// `owner/name`
    pub full_name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub input_schema: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub readme: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default_memory_mbytes: Option<u32>,
    /// Path under which the job serves a nested registry, when it does.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub registry_path: Option<String>,
    /// Base URL of the job's long-running web endpoint.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub standby_url: Option<String>,
}

impl JobDefinition {
    /// Whether the job declares itself as another gateway instance.
    pub fn is_nested_registry(&self) -> bool {
        self.registry_path.is_some()
    }

    /// Address of the nested registry this job serves, if any.
    pub fn registry_address(&self) -> Option<String> {
        let path = self.registry_path.as_deref()?;
        let base = self.standby_url.as_deref()?;
        Some(format!(
            "{}/{}",
            base.trim_end_matches('/'),
            path.trim_start_matches('/')
        ))
    }
}

/// Per-run options.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RunOptions {
    pub memory_mbytes: Option<u32>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING-KEBAB-CASE")]
pub enum JobStatus {
    Ready,
    Running,
    Succeeded,
    Failed,
    TimingOut,
    TimedOut,
    Aborting,
    Aborted,
}

impl JobStatus {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            Self::Succeeded | Self::Failed | Self::TimedOut | Self::Aborted
        )
    }
}

/// A started or finished run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobRun {
    pub id: String,
    #[serde(default)]
    pub act_id: String,
    pub status: JobStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status_message: Option<String>,
    pub default_dataset_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub finished_at: Option<DateTime<Utc>>,
}

/// One page of a result collection.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ResultPage {
    pub items: Vec<Value>,
    pub offset: usize,
    /// Total items in the collection, when the backend reports it.
    pub total: Option<usize>,
}

/// Store search parameters.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoreQuery {
    pub search: String,
    pub limit: u32,
    pub offset: u32,
    pub category: Option<String>,
}

#[async_trait]
pub trait JobBackend: Send + Sync {
    /// Fetch a job's definition. Fails `NotFound` or `Unauthorized`.
    async fn get_job_definition(
        &self,
        identifier: &str,
        credential: &str,
    ) -> McpResult<JobDefinition>;

    /// Start a run and return its handle immediately.
    async fn start_job(
        &self,
        identifier: &str,
        arguments: &Value,
        options: &RunOptions,
        credential: &str,
    ) -> McpResult<JobRun>;

    /// Block until the run reaches a terminal status.
    async fn wait_for_job(&self, run_id: &str, credential: &str) -> McpResult<JobRun>;

    async fn abort_job(&self, run_id: &str, credential: &str) -> McpResult<()>;

    /// Read items from a result collection. `limit = None` reads to the end.
    async fn get_job_result(
        &self,
        dataset_id: &str,
        offset: usize,
        limit: Option<usize>,
        credential: &str,
    ) -> McpResult<ResultPage>;

    /// Search the public job store. Anonymous search is allowed.
    async fn search_jobs(&self, query: &StoreQuery, credential: Option<&str>)
        -> McpResult<Vec<Value>>;

    /// Append items to a result collection owned by the hosting context.
    async fn push_results(
        &self,
        dataset_id: &str,
        items: &[Value],
        credential: &str,
    ) -> McpResult<()>;

    /// Nested-registry address for an identifier, or `None` for a plain job.
    async fn get_registry_address(
        &self,
        identifier: &str,
        credential: &str,
    ) -> McpResult<Option<String>> {
        let definition = self.get_job_definition(identifier, credential).await?;
        Ok(definition.registry_address())
    }
}
