//! In-memory job backend for unit tests.

use std::{
    collections::HashMap,
    sync::atomic::{AtomicUsize, Ordering},
};

use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::{json, Value};

use super::backend::{JobBackend, JobDefinition, JobRun, JobStatus, ResultPage, RunOptions, StoreQuery};
use crate::error::{McpError, McpResult};

/// Runs `sum` jobs by adding `first_number` and `second_number`; every
/// other job echoes its arguments.
#[derive(Default)]
pub(crate) struct MockBackend {
    definitions: HashMap<String, JobDefinition>,
    /// Credentials rejected with `Unauthorized`.
    rejected: Vec<String>,
    /// `(identifier, credential)` pairs rejected with `Unauthorized`.
    rejected_for: Vec<(String, String)>,
    pub definition_fetches: AtomicUsize,
    pub runs: Mutex<Vec<(String, Value, RunOptions)>>,
    pub store: Vec<Value>,
}

impl MockBackend {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_job(mut self, definition: JobDefinition) -> Self {
        self.definitions
            .insert(definition.full_name.clone(), definition);
        self
    }

    pub fn rejecting(mut self, credential: &str) -> Self {
        self.rejected.push(credential.to_string());
        self
    }

    pub fn rejecting_for(mut self, identifier: &str, credential: &str) -> Self {
        self.rejected_for
            .push((identifier.to_string(), credential.to_string()));
        self
    }

    pub fn fetches(&self) -> usize {
        self.definition_fetches.load(Ordering::SeqCst)
    }

    fn check(&self, credential: &str) -> McpResult<()> {
        if self.rejected.iter().any(|c| c == credential) {
            return Err(McpError::Unauthorized("token is not valid".into()));
        }
        Ok(())
    }
}

pub(crate) fn echo_job(full_name: &str) -> JobDefinition {
    JobDefinition {
        id: format!("{}-id", full_name),
        full_name: full_name.into(),
        description: Some("Echoes its input".into()),
        input_schema: Some(json!({
            "type": "object",
            "properties": {"query": {"type": "string"}}
        })),
        ..Default::default()
    }
}

pub(crate) fn sum_job(memory: Option<u32>) -> JobDefinition {
    JobDefinition {
        id: "sum1".into(),
        full_name: "acct/sum-two-numbers".into(),
        description: Some("Adds two numbers".into()),
        input_schema: Some(json!({
            "title": "Sum",
            "type": "object",
            "properties": {
                "first_number": {"title": "First", "type": "integer", "description": "First addend"},
                "second_number": {"title": "Second", "type": "integer", "description": "Second addend"}
            },
            "required": ["first_number", "second_number"]
        })),
        default_memory_mbytes: memory,
        ..Default::default()
    }
}

#[async_trait]
impl JobBackend for MockBackend {
    async fn get_job_definition(
        &self,
        identifier: &str,
        credential: &str,
    ) -> McpResult<JobDefinition> {
        self.definition_fetches.fetch_add(1, Ordering::SeqCst);
        self.check(credential)?;
        if self
            .rejected_for
            .iter()
            .any(|(i, c)| i == identifier && c == credential)
        {
            return Err(McpError::Unauthorized(format!("no access to {}", identifier)));
        }
        self.definitions
            .get(identifier)
            .cloned()
            .ok_or_else(|| McpError::NotFound(identifier.to_string()))
    }

    async fn start_job(
        &self,
        identifier: &str,
        arguments: &Value,
        options: &RunOptions,
        credential: &str,
    ) -> McpResult<JobRun> {
        self.check(credential)?;
        self.runs
            .lock()
            .push((identifier.to_string(), arguments.clone(), options.clone()));
        Ok(JobRun {
            id: format!("run{}", self.runs.lock().len()),
            act_id: identifier.to_string(),
            status: JobStatus::Running,
            status_message: None,
            default_dataset_id: format!("ds{}", self.runs.lock().len()),
            started_at: None,
            finished_at: None,
        })
    }

    async fn wait_for_job(&self, run_id: &str, _: &str) -> McpResult<JobRun> {
        let index = self.runs.lock().len();
        Ok(JobRun {
            id: run_id.to_string(),
            act_id: String::new(),
            status: JobStatus::Succeeded,
            status_message: None,
            default_dataset_id: format!("ds{}", index),
            started_at: None,
            finished_at: None,
        })
    }

    async fn abort_job(&self, _: &str, _: &str) -> McpResult<()> {
        Ok(())
    }

    async fn get_job_result(
        &self,
        _: &str,
        offset: usize,
        _: Option<usize>,
        _: &str,
    ) -> McpResult<ResultPage> {
        let runs = self.runs.lock();
        let Some((identifier, arguments, _)) = runs.last() else {
            return Ok(ResultPage::default());
        };
        let mut item = arguments.clone();
        if identifier.ends_with("sum-two-numbers") {
            let a = arguments["first_number"].as_i64().unwrap_or(0);
            let b = arguments["second_number"].as_i64().unwrap_or(0);
            item["sum"] = json!(a + b);
        }
        Ok(ResultPage {
            items: vec![item],
            offset,
            total: Some(1),
        })
    }

    async fn search_jobs(&self, _: &StoreQuery, _: Option<&str>) -> McpResult<Vec<Value>> {
        Ok(self.store.clone())
    }

    async fn push_results(&self, _: &str, _: &[Value], _: &str) -> McpResult<()> {
        Ok(())
    }
}
