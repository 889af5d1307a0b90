//! Common test utilities for gateway integration tests

#![allow(dead_code)]

use std::{
    collections::HashMap,
    sync::{
        atomic::{AtomicUsize, Ordering},
        Arc,
    },
    time::Duration,
};

use async_trait::async_trait;
use jobgate_mcp::{
    core::{JobDefinition, JobRun, JobStatus, ResultPage, RunOptions, StoreQuery},
    GatewayService, JobBackend, McpError, McpResult,
};
use parking_lot::Mutex;
use rmcp::{
    service::{NotificationContext, RunningService},
    ClientHandler, RoleClient, ServiceExt,
};
use serde_json::{json, Value};
use tokio::sync::Notify;

/// In-memory platform. Every job echoes its arguments as a single record;
/// `sum-two-numbers` jobs also add a `sum` field.
#[derive(Default)]
pub struct FakePlatform {
    definitions: HashMap<String, JobDefinition>,
    rejected: Vec<String>,
    definition_fetches: AtomicUsize,
    pub runs: Mutex<Vec<(String, Value, RunOptions, String)>>,
}

impl FakePlatform {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_job(mut self, definition: JobDefinition) -> Self {
        self.definitions
            .insert(definition.full_name.clone(), definition);
        self
    }

    /// Reject `credential` with an authorization error.
    pub fn rejecting(mut self, credential: &str) -> Self {
        self.rejected.push(credential.to_string());
        self
    }

    pub fn definition_fetches(&self) -> usize {
        self.definition_fetches.load(Ordering::SeqCst)
    }

    fn check(&self, credential: &str) -> McpResult<()> {
        if self.rejected.iter().any(|c| c == credential) {
            return Err(McpError::Unauthorized("token is not valid".into()));
        }
        Ok(())
    }
}

pub fn sum_job() -> JobDefinition {
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
        default_memory_mbytes: Some(512),
        ..Default::default()
    }
}

pub fn echo_job(full_name: &str) -> JobDefinition {
    JobDefinition {
        id: format!("{}-id", full_name),
        full_name: full_name.into(),
        description: Some("Echoes its input".into()),
        input_schema: Some(json!({
            "type": "object",
            "properties": {
                "query": {"type": "string", "description": "Anything"}
            }
        })),
        ..Default::default()
    }
}

pub fn nested_gateway_job(full_name: &str, standby_url: &str) -> JobDefinition {
    JobDefinition {
        id: format!("{}-id", full_name),
        full_name: full_name.into(),
        description: Some("Another gateway".into()),
        registry_path: Some("/mcp".into()),
        standby_url: Some(standby_url.into()),
        ..Default::default()
    }
}

#[async_trait]
impl JobBackend for FakePlatform {
    async fn get_job_definition(
        &self,
        identifier: &str,
        credential: &str,
    ) -> McpResult<JobDefinition> {
        self.definition_fetches.fetch_add(1, Ordering::SeqCst);
        self.check(credential)?;
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
        let mut runs = self.runs.lock();
        runs.push((
            identifier.to_string(),
            arguments.clone(),
            options.clone(),
            credential.to_string(),
        ));
        Ok(JobRun {
            id: format!("run{}", runs.len()),
            act_id: identifier.to_string(),
            status: JobStatus::Running,
            status_message: None,
            default_dataset_id: format!("ds{}", runs.len()),
            started_at: None,
            finished_at: None,
        })
    }

    async fn wait_for_job(&self, run_id: &str, _: &str) -> McpResult<JobRun> {
        let index = run_id.trim_start_matches("run");
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
        dataset_id: &str,
        offset: usize,
        _: Option<usize>,
        _: &str,
    ) -> McpResult<ResultPage> {
        let index: usize = dataset_id
            .trim_start_matches("ds")
            .parse()
            .map_err(|_| McpError::NotFound(dataset_id.to_string()))?;
        let runs = self.runs.lock();
        let Some((identifier, arguments, _, _)) = runs.get(index - 1) else {
            return Err(McpError::NotFound(dataset_id.to_string()));
        };
        let mut item = arguments.clone();
        if identifier.ends_with("sum-two-numbers") {
            let a = arguments["first_number"].as_i64().unwrap_or(0);
            let b = arguments["second_number"].as_i64().unwrap_or(0);
            item["sum"] = json!(a + b);
        }
        let items = if offset == 0 { vec![item] } else { vec![] };
        Ok(ResultPage {
            items,
            offset,
            total: Some(1),
        })
    }

    async fn search_jobs(&self, query: &StoreQuery, _: Option<&str>) -> McpResult<Vec<Value>> {
        Ok(self
            .definitions
            .values()
            .filter(|d| d.full_name.contains(&query.search))
            .map(|d| {
                json!({
                    "name": d.full_name,
                    "description": d.description,
                    "stats": {"totalRuns": 1}
                })
            })
            .collect())
    }

    async fn push_results(&self, _: &str, _: &[Value], _: &str) -> McpResult<()> {
        Ok(())
    }
}

/// Client that counts `notifications/tools/list_changed`.
#[derive(Clone, Default)]
pub struct RecordingClient {
    list_changes: Arc<AtomicUsize>,
    changed: Arc<Notify>,
}

impl RecordingClient {
    pub fn list_changes(&self) -> usize {
        self.list_changes.load(Ordering::SeqCst)
    }

    /// Wait until at least `count` change notifications have arrived.
    pub async fn wait_for_changes(&self, count: usize) -> bool {
        let wait = async {
            while self.list_changes() < count {
                self.changed.notified().await;
            }
        };
        tokio::time::timeout(Duration::from_secs(5), wait)
            .await
            .is_ok()
    }
}

impl ClientHandler for RecordingClient {
    async fn on_tool_list_changed(&self, _context: NotificationContext<RoleClient>) {
        self.list_changes.fetch_add(1, Ordering::SeqCst);
        self.changed.notify_one();
    }
}

/// Serve `service` over an in-memory pipe and connect `client` to it.
#[expect(
    clippy::expect_used,
    reason = "test helper: panic on failure is intentional"
)]
pub async fn connect<C: ClientHandler>(
    service: GatewayService,
    client: C,
) -> RunningService<RoleClient, C> {
    let (server_io, client_io) = tokio::io::duplex(64 * 1024);
    tokio::spawn(async move {
        if let Ok(server) = service.serve(server_io).await {
            let _ = server.waiting().await;
        }
    });
    client.serve(client_io).await.expect("client handshake")
}
