//! Gateway orchestrator.
//!
//! [`Gateway`] is the process-wide half of the system. It owns the job
//! backend, the derived-tool cache, the nested-registry proxy and the job
//! invoker, and it:
//! - resolves identifiers into tool definitions (cache, nested proxy, or
//!   schema fetch and transformation)
//! - dispatches tool calls for a session's registry
//!
//! ## Call lifecycle
//!
//! ```text
//! Received ──validate──▶ Validated ──route──▶ Routed ──complete──▶ CallToolResult
//!     │                      │                   │
//!     └──────────────────────┴───────────────────┴──▶ McpError
//! ```
//!
//! Lookup and validation failures reach the caller as they are. Anything
//! else raised on the way is wrapped into [`McpError::ToolCallFailed`].

use std::{sync::Arc, time::Instant};

use futures::future::join_all;
use rmcp::model::CallToolResult;
use serde_json::Value;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::{
    backend::{JobBackend, JobDefinition, RunOptions},
    config::{GatewayConfig, SessionConfig, JOB_INSTRUCTIONS},
    helpers::{helper_tools, run_helper, HelperContext},
    http_backend::HttpJobBackend,
    invocation::JobInvoker,
    metrics::GatewayMetrics,
    nested::{NestedRegistryProxy, RegistryConnector, StreamableHttpConnector},
};
use crate::{
    error::{McpError, McpResult},
    inventory::{
        job_tool_name, DerivedToolCache, HelperTool, JobToolSpec, ProxiedToolSpec,
        ToolDefinition, ToolKind, ToolRegistry,
    },
    transform::{JsonObject, SchemaTransformer},
};

/// Reserved argument through which a caller may ask for less (never more)
/// memory than the tool's ceiling. Hidden-prefixed names never reach a
/// job's exposed schema.
pub const RUN_MEMORY_ARGUMENT: &str = "_memoryMbytes";

/// Outcome of resolving a batch of identifiers.
#[derive(Debug, Default)]
pub struct Resolution {
    pub tools: Vec<Arc<ToolDefinition>>,
    /// Identifiers that yielded no tools.
    pub failed: Vec<String>,
    /// How many of the failures were credential rejections.
    pub auth_failures: usize,
}

impl Resolution {
    pub fn has_auth_failure(&self) -> bool {
        self.auth_failures > 0
    }
}

pub struct Gateway {
    config: GatewayConfig,
    backend: Arc<dyn JobBackend>,
    cache: Arc<DerivedToolCache>,
    nested: NestedRegistryProxy,
    invoker: JobInvoker,
    metrics: Arc<GatewayMetrics>,
}

impl Gateway {
    pub fn new(
        config: GatewayConfig,
        backend: Arc<dyn JobBackend>,
        connector: Arc<dyn RegistryConnector>,
    ) -> Self {
        let cache = Arc::new(DerivedToolCache::with_config(
            config.cache.max_entries,
            config.cache.ttl(),
        ));
        let nested = NestedRegistryProxy::new(
            Arc::clone(&backend),
            connector,
            config.limits.registry_timeout(),
        );
        let invoker = JobInvoker::new(
            Arc::clone(&backend),
            config.hosted.clone(),
            config.limits.call_timeout(),
        );

        Self {
            config,
            backend,
            cache,
            nested,
            invoker,
            metrics: Arc::new(GatewayMetrics::new()),
        }
    }

    /// Gateway talking to the configured platform over HTTP.
    pub fn from_config(config: GatewayConfig) -> McpResult<Self> {
        let backend = Arc::new(HttpJobBackend::new(
            &config.api_base_url,
            config.proxy.as_ref(),
        )?);
        let connector = Arc::new(StreamableHttpConnector::new(config.proxy.clone()));
        Ok(Self::new(config, backend, connector))
    }

    /// Share a cache between gateways.
    #[must_use]
    pub fn with_cache(mut self, cache: Arc<DerivedToolCache>) -> Self {
        self.cache = cache;
        self
    }

    pub fn config(&self) -> &GatewayConfig {
        &self.config
    }

    pub fn backend(&self) -> &Arc<dyn JobBackend> {
        &self.backend
    }

    pub fn cache(&self) -> &Arc<DerivedToolCache> {
        &self.cache
    }

    pub fn metrics(&self) -> &Arc<GatewayMetrics> {
        &self.metrics
    }

    /// Helper tools enabled for a session.
    pub fn static_tools(&self, session: &SessionConfig) -> Vec<Arc<ToolDefinition>> {
        helper_tools(session)
    }

    /// Resolve every identifier concurrently. A failing identifier is logged
    /// and contributes no tools; it never fails the batch.
    pub async fn resolve_identifiers(&self, identifiers: &[String], credential: &str) -> Resolution {
        let results = join_all(identifiers.iter().map(|identifier| async move {
            (identifier, self.resolve_identifier(identifier, credential).await)
        }))
        .await;

        let mut resolution = Resolution::default();
        for (identifier, result) in results {
            match result {
                Ok(tools) => resolution.tools.extend(tools),
                Err(e) => {
                    self.metrics.record_resolution_failure();
                    if e.is_auth_failure() {
                        resolution.auth_failures += 1;
                    }
                    warn!("Failed to load tools for '{}': {}", identifier, e);
                    resolution.failed.push(identifier.clone());
                }
            }
        }
        info!(
            "Resolved {} tools from {} identifiers ({} failed)",
            resolution.tools.len(),
            identifiers.len(),
            resolution.failed.len()
        );
        resolution
    }

    /// Resolve one identifier into the tools it contributes.
    pub async fn resolve_identifier(
        &self,
        identifier: &str,
        credential: &str,
    ) -> McpResult<Vec<Arc<ToolDefinition>>> {
        if let Some(tool) = self.cache.get(identifier) {
            self.metrics.record_cache_hit();
            debug!("Tool cache hit for '{}'", identifier);
            return Ok(vec![tool]);
        }
        self.metrics.record_cache_miss();

        match self.nested.resolve(identifier, credential).await {
            Ok(Some(tools)) => return Ok(tools.into_iter().map(Arc::new).collect()),
            Ok(None) => {}
            Err(e) => {
                if !e.is_auth_failure() && !matches!(e, McpError::NotFound(_)) {
                    self.metrics.record_nested_connection_error();
                }
                return Err(e);
            }
        }

        let definition = self.backend.get_job_definition(identifier, credential).await?;
        let tool = Arc::new(self.job_tool(identifier, &definition)?);
        self.cache.put(identifier, Arc::clone(&tool));
        Ok(vec![tool])
    }

    fn job_tool(&self, identifier: &str, definition: &JobDefinition) -> McpResult<ToolDefinition> {
        let label = if definition.full_name.is_empty() {
            identifier
        } else {
            definition.full_name.as_str()
        };
        let name = job_tool_name(label);
        let schema = SchemaTransformer::transform(&name, definition.input_schema.as_ref())?;

        let system_max = self.config.limits.memory_ceiling();
        let memory = definition
            .default_memory_mbytes
            .unwrap_or(system_max)
            .min(system_max);

        Ok(ToolDefinition::new(
            name,
            label,
            format!(
                "{} Instructions: {}",
                definition.description.as_deref().unwrap_or_default(),
                JOB_INSTRUCTIONS
            ),
            Arc::new(schema),
            ToolKind::Job(JobToolSpec {
                job_id: identifier.to_string(),
                memory_mbytes: memory,
            }),
        ))
    }

    /// Serve one `tools/call` against a session registry.
    pub async fn dispatch(
        &self,
        registry: &ToolRegistry,
        session: &SessionConfig,
        credential: Option<&str>,
        name: &str,
        arguments: Option<JsonObject>,
    ) -> McpResult<CallToolResult> {
        self.dispatch_cancellable(
            registry,
            session,
            credential,
            name,
            arguments,
            &CancellationToken::new(),
        )
        .await
    }

    /// Like [`Gateway::dispatch`], but gives up once `cancel` fires. A job
    /// run already started on the caller's behalf is aborted.
    pub async fn dispatch_cancellable(
        &self,
        registry: &ToolRegistry,
        session: &SessionConfig,
        credential: Option<&str>,
        name: &str,
        arguments: Option<JsonObject>,
        cancel: &CancellationToken,
    ) -> McpResult<CallToolResult> {
        self.metrics.record_call_start();
        let mut outcome = scopeguard::guard(
            (Arc::clone(&self.metrics), Instant::now(), false, None::<String>),
            |(metrics, start, ok, tool)| {
                metrics.record_call_end(tool.as_deref(), ok, start.elapsed().as_millis() as u64);
            },
        );

        let result = async {
            let received = Received::lookup(registry, name, arguments)?;
            outcome.3 = Some(received.tool.name.clone());
            let routed = received
                .validate()?
                .route(session, self.config.limits.memory_ceiling());
            self.complete(routed, registry, credential, cancel).await
        }
        .await
        .map_err(into_call_failure);

        outcome.2 = result.is_ok();
        result
    }

    async fn complete(
        &self,
        routed: Routed,
        registry: &ToolRegistry,
        credential: Option<&str>,
        cancel: &CancellationToken,
    ) -> McpResult<CallToolResult> {
        let Routed { tool, route, arguments } = routed;
        match route {
            Route::Helper(helper) => {
                let ctx = HelperContext {
                    gateway: self,
                    registry,
                    credential,
                };
                run_helper(helper, ctx, arguments).await
            }
            Route::Job { spec, memory_mbytes } => {
                debug!("Calling job {} with {} MB", spec.job_id, memory_mbytes);
                let mut output = self
                    .invoker
                    .invoke(
                        &spec.job_id,
                        &Value::Object(arguments),
                        &RunOptions {
                            memory_mbytes: Some(memory_mbytes),
                        },
                        credential,
                        cancel,
                    )
                    .await?;
                output.label = tool.display_label.clone();
                Ok(CallToolResult::success(
                    output.into_content(self.config.limits.output_max_chars_per_item),
                ))
            }
            // Dropping the forwarded call closes its remote session.
            Route::Proxied(spec) => tokio::select! {
                biased;
                _ = cancel.cancelled() => Err(McpError::Cancelled(tool.name.clone())),
                result = self.nested.call(&spec, Some(arguments), credential) => result,
            },
        }
    }
}

fn into_call_failure(err: McpError) -> McpError {
    if err.is_caller_facing() {
        err
    } else {
        McpError::ToolCallFailed(err.to_string())
    }
}

/// A call whose name matched a registered tool.
struct Received {
    tool: Arc<ToolDefinition>,
    arguments: Option<JsonObject>,
}

/// Tool found and arguments accepted by its validator.
struct Validated {
    tool: Arc<ToolDefinition>,
    arguments: JsonObject,
    requested_memory: Option<u32>,
}

enum Route {
    Helper(HelperTool),
    Job {
        spec: JobToolSpec,
        memory_mbytes: u32,
    },
    Proxied(ProxiedToolSpec),
}

struct Routed {
    tool: Arc<ToolDefinition>,
    route: Route,
    arguments: JsonObject,
}

impl Received {
    fn lookup(
        registry: &ToolRegistry,
        name: &str,
        arguments: Option<JsonObject>,
    ) -> McpResult<Self> {
        let tool = registry
            .find(name)
            .ok_or_else(|| McpError::UnknownTool(name.to_string()))?;
        Ok(Self { tool, arguments })
    }

    fn validate(self) -> McpResult<Validated> {
        let tool = self.tool;
        let mut arguments = self
            .arguments
            .ok_or_else(|| McpError::MissingArguments(tool.name.clone()))?;

        let requested_memory = if tool.is_job() {
            arguments
                .remove(RUN_MEMORY_ARGUMENT)
                .and_then(|v| parse_memory(&v))
        } else {
            None
        };

        tool.schema.coerce(&mut arguments);
        let value = Value::Object(arguments);
        if let Err(errors) = tool.schema.validate(&value) {
            return Err(McpError::InvalidArguments {
                tool: tool.name.clone(),
                arguments: value.to_string(),
                errors,
            });
        }
        let Value::Object(arguments) = value else {
            return Err(McpError::MissingArguments(tool.name.clone()));
        };

        Ok(Validated {
            tool,
            arguments,
            requested_memory,
        })
    }
}

fn parse_memory(value: &Value) -> Option<u32> {
    let mbytes = match value {
        Value::Number(n) => n.as_u64()?,
        Value::String(s) => s.trim().parse().ok()?,
        _ => return None,
    };
    Some(u32::try_from(mbytes).unwrap_or(u32::MAX))
}

impl Validated {
    /// The job memory is the smallest of the tool ceiling, the session
    /// bound, and whatever the caller asked for.
    fn route(self, session: &SessionConfig, system_max: u32) -> Routed {
        let route = match &self.tool.kind {
            ToolKind::Static(helper) => Route::Helper(*helper),
            ToolKind::Job(spec) => {
                let ceiling = spec.memory_mbytes.min(session.memory_ceiling(system_max));
                Route::Job {
                    spec: spec.clone(),
                    memory_mbytes: self
                        .requested_memory
                        .map_or(ceiling, |requested| requested.min(ceiling)),
                }
            }
            ToolKind::Proxied(spec) => Route::Proxied(spec.clone()),
        };
        Routed {
            tool: self.tool,
            route,
            arguments: self.arguments,
        }
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use async_trait::async_trait;
    use rmcp::model::{CallToolRequestParam, Tool};
    use serde_json::json;

    use super::*;
    use crate::core::{
        config::FeatureGroup,
        testing::{sum_job, MockBackend},
    };

    struct NoNested;

    #[async_trait]
    impl RegistryConnector for NoNested {
        async fn list_tools(&self, address: &str, _: Option<&str>) -> McpResult<Vec<Tool>> {
            Err(McpError::ConnectionFailed(address.to_string()))
        }

        async fn call_tool(
            &self,
            address: &str,
            _: CallToolRequestParam,
            _: Option<&str>,
        ) -> McpResult<CallToolResult> {
            Err(McpError::ConnectionFailed(address.to_string()))
        }
    }

    fn gateway(backend: MockBackend) -> (Gateway, Arc<MockBackend>) {
        let backend = Arc::new(backend);
        let gateway = Gateway::new(GatewayConfig::default(), backend.clone(), Arc::new(NoNested));
        (gateway, backend)
    }

    fn args(value: Value) -> Option<JsonObject> {
        value.as_object().cloned()
    }

    async fn loaded(gateway: &Gateway, session: &SessionConfig) -> ToolRegistry {
        let registry = ToolRegistry::new();
        registry.bulk_upsert(gateway.static_tools(session));
        let resolution = gateway
            .resolve_identifiers(&session.identifiers, "tok")
            .await;
        registry.bulk_upsert(resolution.tools);
        registry
    }

    #[tokio::test]
    async fn test_resolve_job_tool() {
        let (gateway, _) = gateway(MockBackend::new().with_job(sum_job(Some(8192))));
        let tools = gateway
            .resolve_identifier("acct/sum-two-numbers", "tok")
            .await
            .unwrap();

        assert_eq!(tools.len(), 1);
        let tool = &tools[0];
        assert_eq!(tool.name, "acct-sum-two-numbers");
        assert_eq!(tool.display_label, "acct/sum-two-numbers");
        assert!(tool.description.starts_with("Adds two numbers Instructions: "));
        match &tool.kind {
            // Declared 8192 MB is clamped to the system maximum.
            ToolKind::Job(spec) => assert_eq!(spec.memory_mbytes, 4096),
            other => panic!("unexpected kind: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_second_resolution_hits_cache() {
        let (gateway, backend) = gateway(MockBackend::new().with_job(sum_job(None)));

        let first = gateway
            .resolve_identifier("acct/sum-two-numbers", "tok")
            .await
            .unwrap();
        let fetches = backend.fetches();
        let second = gateway
            .resolve_identifier("acct/sum-two-numbers", "tok")
            .await
            .unwrap();

        assert_eq!(backend.fetches(), fetches);
        assert!(Arc::ptr_eq(&first[0], &second[0]));
        let snap = gateway.metrics().snapshot();
        assert_eq!(snap.cache_hits, 1);
        assert_eq!(snap.cache_misses, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_expired_entry_refetches() {
        let (gateway, backend) = gateway(MockBackend::new().with_job(sum_job(None)));

        gateway
            .resolve_identifier("acct/sum-two-numbers", "tok")
            .await
            .unwrap();
        let fetches = backend.fetches();

        tokio::time::advance(gateway.config().cache.ttl() + Duration::from_secs(1)).await;
        gateway
            .resolve_identifier("acct/sum-two-numbers", "tok")
            .await
            .unwrap();
        assert!(backend.fetches() > fetches);
    }

    #[tokio::test]
    async fn test_batch_isolates_failures() {
        let (gateway, _) = gateway(MockBackend::new().with_job(sum_job(None)));
        let resolution = gateway
            .resolve_identifiers(
                &["acct/missing".to_string(), "acct/sum-two-numbers".to_string()],
                "tok",
            )
            .await;

        assert_eq!(resolution.tools.len(), 1);
        assert_eq!(resolution.failed, vec!["acct/missing".to_string()]);
        assert!(!resolution.has_auth_failure());
    }

    #[tokio::test]
    async fn test_auth_failures_counted() {
        let (gateway, _) = gateway(MockBackend::new().with_job(sum_job(None)).rejecting("bad"));
        let resolution = gateway
            .resolve_identifiers(&["acct/sum-two-numbers".to_string()], "bad")
            .await;
        assert!(resolution.tools.is_empty());
        assert!(resolution.has_auth_failure());
    }

    #[tokio::test]
    async fn test_dispatch_job_call() {
        let (gateway, backend) = gateway(MockBackend::new().with_job(sum_job(Some(2048))));
        let session = SessionConfig::new().with_identifiers(["acct/sum-two-numbers"]);
        let registry = loaded(&gateway, &session).await;

        let result = gateway
            .dispatch(
                &registry,
                &session,
                Some("tok"),
                "acct-sum-two-numbers",
                args(json!({"first_number": 1, "second_number": 2})),
            )
            .await
            .unwrap();

        let last = result.content.last().unwrap().as_text().unwrap();
        assert_eq!(last.text, r#"{"first_number":1,"second_number":2,"sum":3}"#);
        assert_eq!(backend.runs.lock()[0].2.memory_mbytes, Some(2048));
        assert_eq!(gateway.metrics().snapshot().successful_calls, 1);
    }

    #[tokio::test]
    async fn test_dispatch_by_label_and_coercion() {
        let (gateway, backend) = gateway(MockBackend::new().with_job(sum_job(None)));
        let session = SessionConfig::new().with_identifiers(["acct/sum-two-numbers"]);
        let registry = loaded(&gateway, &session).await;

        gateway
            .dispatch(
                &registry,
                &session,
                Some("tok"),
                "acct/sum-two-numbers",
                args(json!({"first_number": "4", "second_number": 5})),
            )
            .await
            .unwrap();
        assert_eq!(backend.runs.lock()[0].1["first_number"], json!(4));
    }

    #[tokio::test]
    async fn test_dispatch_errors() {
        let (gateway, backend) = gateway(MockBackend::new().with_job(sum_job(None)));
        let session = SessionConfig::new().with_identifiers(["acct/sum-two-numbers"]);
        let registry = loaded(&gateway, &session).await;

        let err = gateway
            .dispatch(&registry, &session, Some("tok"), "nope", args(json!({})))
            .await
            .unwrap_err();
        assert!(matches!(err, McpError::UnknownTool(ref n) if n == "nope"));

        let err = gateway
            .dispatch(&registry, &session, Some("tok"), "acct-sum-two-numbers", None)
            .await
            .unwrap_err();
        assert!(matches!(err, McpError::MissingArguments(_)));

        let err = gateway
            .dispatch(
                &registry,
                &session,
                Some("tok"),
                "acct-sum-two-numbers",
                args(json!({"first_number": 1})),
            )
            .await
            .unwrap_err();
        match err {
            McpError::InvalidArguments { tool, errors, .. } => {
                assert_eq!(tool, "acct-sum-two-numbers");
                assert!(!errors.is_empty());
            }
            other => panic!("unexpected error: {other:?}"),
        }

        // Validation failures never reach the backend.
        assert!(backend.runs.lock().is_empty());
        assert_eq!(gateway.metrics().snapshot().failed_calls, 3);
    }

    #[tokio::test]
    async fn test_explicit_null_for_nullable_property() {
        let job = JobDefinition {
            id: "page1".into(),
            full_name: "acct/pager".into(),
            input_schema: Some(json!({
                "type": "object",
                "properties": {"cursor": {"type": ["string", "null"]}}
            })),
            ..Default::default()
        };
        let (gateway, backend) = gateway(MockBackend::new().with_job(job));
        let session = SessionConfig::new().with_identifiers(["acct/pager"]);
        let registry = loaded(&gateway, &session).await;

        gateway
            .dispatch(&registry, &session, Some("tok"), "acct-pager", args(json!({"cursor": null})))
            .await
            .unwrap();
        assert_eq!(backend.runs.lock()[0].1["cursor"], Value::Null);
    }

    #[tokio::test]
    async fn test_memory_clamping() {
        let (gateway, backend) = gateway(MockBackend::new().with_job(sum_job(Some(4096))));
        let session = SessionConfig::new()
            .with_identifiers(["acct/sum-two-numbers"])
            .with_max_job_memory(Some(2048));
        let registry = loaded(&gateway, &session).await;
        let call = |memory: Value| {
            let mut arguments = args(json!({"first_number": 1, "second_number": 2})).unwrap();
            arguments.insert(RUN_MEMORY_ARGUMENT.to_string(), memory);
            gateway.dispatch(
                &registry,
                &session,
                Some("tok"),
                "acct-sum-two-numbers",
                Some(arguments),
            )
        };

        call(json!(8192)).await.unwrap();
        call(json!(512)).await.unwrap();
        call(json!("1024")).await.unwrap();

        let runs = backend.runs.lock();
        let memory: Vec<_> = runs.iter().map(|r| r.2.memory_mbytes).collect();
        assert_eq!(memory, vec![Some(2048), Some(512), Some(1024)]);
        // The reserved argument is not forwarded to the job.
        assert!(runs[0].1.get(RUN_MEMORY_ARGUMENT).is_none());
    }

    #[tokio::test]
    async fn test_backend_failures_are_wrapped() {
        let (gateway, _) = gateway(MockBackend::new().with_job(sum_job(None)));
        let session = SessionConfig::new().with_feature_groups([FeatureGroup::Discovery]);
        let registry = loaded(&gateway, &session).await;

        let err = gateway
            .dispatch(
                &registry,
                &session,
                Some("tok"),
                "get-tool-details",
                args(json!({"jobName": "acct/missing"})),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, McpError::ToolCallFailed(ref m) if m.contains("acct/missing")));
    }

    #[tokio::test]
    async fn test_missing_credential_is_reported() {
        let (gateway, _) = gateway(MockBackend::new().with_job(sum_job(None)));
        let session = SessionConfig::new().with_identifiers(["acct/sum-two-numbers"]);
        let registry = loaded(&gateway, &session).await;

        let err = gateway
            .dispatch(
                &registry,
                &session,
                None,
                "acct-sum-two-numbers",
                args(json!({"first_number": 1, "second_number": 2})),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, McpError::Unauthenticated(_)));
    }

    #[tokio::test]
    async fn test_add_and_remove_tool() {
        let (gateway, _) = gateway(MockBackend::new().with_job(sum_job(None)));
        let session = SessionConfig::new().with_tool_mutation(true);
        let registry = loaded(&gateway, &session).await;
        assert!(!registry.contains("acct-sum-two-numbers"));
        let revision = registry.revision();

        let result = gateway
            .dispatch(
                &registry,
                &session,
                Some("tok"),
                "add-tool",
                args(json!({"jobName": "acct/sum-two-numbers"})),
            )
            .await
            .unwrap();
        assert_eq!(
            result.content[0].as_text().unwrap().text,
            "Job added: acct/sum-two-numbers (tool name: acct-sum-two-numbers)"
        );
        assert!(registry.contains("acct-sum-two-numbers"));
        assert!(registry.revision() > revision);

        let revision = registry.revision();
        let result = gateway
            .dispatch(
                &registry,
                &session,
                Some("tok"),
                "remove-tool",
                args(json!({"toolName": "acct/sum-two-numbers"})),
            )
            .await
            .unwrap();
        assert_eq!(
            result.content[0].as_text().unwrap().text,
            "Tool acct-sum-two-numbers was removed"
        );
        assert!(!registry.contains("acct-sum-two-numbers"));
        assert!(registry.revision() > revision);

        // Removing again is a no-op that still counts as a change.
        let revision = registry.revision();
        gateway
            .dispatch(
                &registry,
                &session,
                Some("tok"),
                "remove-tool",
                args(json!({"toolName": "acct-sum-two-numbers"})),
            )
            .await
            .unwrap();
        assert!(registry.revision() > revision);
    }

    #[tokio::test]
    async fn test_failed_add_still_counts_as_change() {
        let (gateway, _) = gateway(MockBackend::new().with_job(sum_job(None)));
        let session = SessionConfig::new().with_tool_mutation(true);
        let registry = loaded(&gateway, &session).await;
        let before = registry.names();

        let revision = registry.revision();
        let err = gateway
            .dispatch(
                &registry,
                &session,
                Some("tok"),
                "add-tool",
                args(json!({"jobName": "acct/missing"})),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, McpError::ToolCallFailed(ref m) if m.contains("acct/missing")));
        assert!(registry.revision() > revision);

        let revision = registry.revision();
        gateway
            .dispatch(
                &registry,
                &session,
                None,
                "add-tool",
                args(json!({"jobName": "acct/sum-two-numbers"})),
            )
            .await
            .unwrap_err();
        assert!(registry.revision() > revision);
        assert_eq!(registry.names(), before);
    }

    #[tokio::test]
    async fn test_latency_keyed_by_resolved_name() {
        let (gateway, _) = gateway(MockBackend::new().with_job(sum_job(None)));
        let session = SessionConfig::new().with_identifiers(["acct/sum-two-numbers"]);
        let registry = loaded(&gateway, &session).await;

        for i in 0..50 {
            gateway
                .dispatch(&registry, &session, Some("tok"), &format!("bogus-{i}"), args(json!({})))
                .await
                .unwrap_err();
        }
        // Called by label, recorded under the tool name.
        gateway
            .dispatch(
                &registry,
                &session,
                Some("tok"),
                "acct/sum-two-numbers",
                args(json!({"first_number": 1})),
            )
            .await
            .unwrap_err();

        let metrics = gateway.metrics();
        assert_eq!(metrics.snapshot().unknown_tool_calls, 50);
        assert_eq!(metrics.snapshot().failed_calls, 51);
        let keys: Vec<_> = metrics
            .all_tool_latencies()
            .into_iter()
            .map(|(name, _)| name)
            .collect();
        assert_eq!(keys, vec!["acct-sum-two-numbers".to_string()]);
    }

    #[tokio::test]
    async fn test_cancelled_dispatch_starts_no_run() {
        let (gateway, backend) = gateway(MockBackend::new().with_job(sum_job(None)));
        let session = SessionConfig::new().with_identifiers(["acct/sum-two-numbers"]);
        let registry = loaded(&gateway, &session).await;

        let cancel = CancellationToken::new();
        cancel.cancel();
        let err = gateway
            .dispatch_cancellable(
                &registry,
                &session,
                Some("tok"),
                "acct-sum-two-numbers",
                args(json!({"first_number": 1, "second_number": 2})),
                &cancel,
            )
            .await
            .unwrap_err();
        assert!(matches!(err, McpError::Cancelled(ref n) if n == "acct/sum-two-numbers"));
        assert!(backend.runs.lock().is_empty());
        assert_eq!(gateway.metrics().snapshot().active_executions, 0);
    }

    #[tokio::test]
    async fn test_search_helper() {
        let mut backend = MockBackend::new();
        backend.store = vec![json!({"name": "maps", "username": "acct", "pictureUrl": "x"})];
        let (gateway, _) = gateway(backend);
        let session = SessionConfig::new().with_feature_groups([FeatureGroup::Discovery]);
        let registry = loaded(&gateway, &session).await;

        let result = gateway
            .dispatch(&registry, &session, None, "search", args(json!({"search": ""})))
            .await
            .unwrap();
        assert!(result.content[0]
            .as_text()
            .unwrap()
            .text
            .starts_with("Search string must not be empty"));

        let result = gateway
            .dispatch(&registry, &session, None, "search", args(json!({"search": "maps"})))
            .await
            .unwrap();
        assert_eq!(
            result.content[0].as_text().unwrap().text,
            r#"{"name":"maps","username":"acct"}"#
        );
    }
}
