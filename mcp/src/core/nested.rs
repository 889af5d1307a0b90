//! Nested registry proxy.
//!
//! A job can declare that it serves another instance of this gateway. Its
//! tools are then re-exported here under a prefix derived from the nested
//! registry's address, and calls are forwarded with the original name.
//! No connection is kept: listing and every call connect, do their work,
//! and disconnect.

use std::{borrow::Cow, sync::Arc, time::Duration};

use async_trait::async_trait;
use rmcp::{
    model::{CallToolRequestParam, CallToolResult, Tool},
    service::RunningService,
    transport::{
        streamable_http_client::StreamableHttpClientTransportConfig, StreamableHttpClientTransport,
    },
    RoleClient, ServiceExt,
};
use sha2::{Digest, Sha256};
use tracing::{debug, info, warn};

use super::{
    backend::JobBackend,
    config::HttpProxyConfig,
    handler::GatewayClientHandler,
    proxy::build_http_client,
};
use crate::{
    error::{McpError, McpResult},
    inventory::{ProxiedToolSpec, ToolDefinition, ToolKind, MAX_TOOL_NAME_LENGTH},
    transform::{CompiledSchema, JsonObject},
};

/// Hex characters of the address digest used as the tool-name prefix.
pub const NAMESPACE_LENGTH: usize = 8;

/// Deterministic prefix for tools re-exported from `address`.
pub fn namespace(address: &str) -> String {
    let digest = hex::encode(Sha256::digest(address.as_bytes()));
    digest[..NAMESPACE_LENGTH].to_string()
}

/// `<namespace>-<remote name>`, capped at [`MAX_TOOL_NAME_LENGTH`].
pub fn proxied_tool_name(address: &str, remote_name: &str) -> String {
    format!("{}-{}", namespace(address), remote_name)
        .chars()
        .take(MAX_TOOL_NAME_LENGTH)
        .collect()
}

/// Opens short-lived client connections to nested registries.
#[async_trait]
pub trait RegistryConnector: Send + Sync {
    async fn list_tools(&self, address: &str, credential: Option<&str>) -> McpResult<Vec<Tool>>;

    async fn call_tool(
        &self,
        address: &str,
        request: CallToolRequestParam,
        credential: Option<&str>,
    ) -> McpResult<CallToolResult>;
}

type NestedClient = RunningService<RoleClient, GatewayClientHandler>;

/// [`RegistryConnector`] over the streamable HTTP transport.
#[derive(Default)]
pub struct StreamableHttpConnector {
    proxy: Option<HttpProxyConfig>,
}

impl StreamableHttpConnector {
    pub fn new(proxy: Option<HttpProxyConfig>) -> Self {
        Self { proxy }
    }

    async fn connect(&self, address: &str, credential: Option<&str>) -> McpResult<NestedClient> {
        let http_client = build_http_client(self.proxy.as_ref(), credential)?;
        let cfg = StreamableHttpClientTransportConfig::with_uri(address.to_string());
        let transport = StreamableHttpClientTransport::with_client(http_client, cfg);

        GatewayClientHandler::new(address)
            .serve(transport).await.map_err(|e| {
            McpError::ConnectionFailed(format!("initialize client for {}: {}", address, e))
        })
    }
}

async fn disconnect(client: NestedClient, address: &str) {
    if let Err(e) = client.cancel().await {
        debug!("Error disconnecting from {}: {}", address, e);
    }
}

#[async_trait]
impl RegistryConnector for StreamableHttpConnector {
    async fn list_tools(&self, address: &str, credential: Option<&str>) -> McpResult<Vec<Tool>> {
        let client = self.connect(address, credential).await?;
        let result = client.peer().list_all_tools().await;
        disconnect(client, address).await;
        result.map_err(|e| McpError::Transport(format!("list tools from {}: {}", address, e)))
    }

    async fn call_tool(
        &self,
        address: &str,
        request: CallToolRequestParam,
        credential: Option<&str>,
    ) -> McpResult<CallToolResult> {
        let client = self.connect(address, credential).await?;
        let result = client.call_tool(request).await;
        disconnect(client, address).await;
        result.map_err(|e| McpError::Transport(format!("call tool on {}: {}", address, e)))
    }
}

pub struct NestedRegistryProxy {
    backend: Arc<dyn JobBackend>,
    connector: Arc<dyn RegistryConnector>,
    timeout: Duration,
}

impl NestedRegistryProxy {
    pub fn new(
        backend: Arc<dyn JobBackend>,
        connector: Arc<dyn RegistryConnector>,
        timeout: Duration,
    ) -> Self {
        Self {
            backend,
            connector,
            timeout,
        }
    }

    /// Tools of the nested registry behind `identifier`, or `None` when the
    /// identifier is a plain job.
    pub async fn resolve(
        &self,
        identifier: &str,
        credential: &str,
    ) -> McpResult<Option<Vec<ToolDefinition>>> {
        match self
            .backend
            .get_registry_address(identifier, credential)
            .await?
        {
            Some(address) => self
                .enumerate(identifier, &address, Some(credential))
                .await
                .map(Some),
            None => Ok(None),
        }
    }

    /// List the nested registry at `address` and wrap each remote tool.
    /// Remote tools whose schema does not compile are skipped.
    pub async fn enumerate(
        &self,
        origin: &str,
        address: &str,
        credential: Option<&str>,
    ) -> McpResult<Vec<ToolDefinition>> {
        let remote = self
            .with_deadline(address, self.connector.list_tools(address, credential))
            .await?;
        info!("Discovered {} tools from nested registry '{}'", remote.len(), origin);

        let prefix = namespace(address);
        let tools = remote
            .into_iter()
            .filter_map(|tool| {
                let remote_name = tool.name.to_string();
                let name = proxied_tool_name(address, &remote_name);
                let schema = match CompiledSchema::compile(&name, (*tool.input_schema).clone()) {
                    Ok(schema) => schema,
                    Err(e) => {
                        warn!("Skipping nested tool '{}' from '{}': {}", remote_name, origin, e);
                        return None;
                    }
                };
                Some(ToolDefinition::new(
                    name,
                    format!("{}/{}", origin, remote_name),
                    tool.description.map(Cow::into_owned).unwrap_or_default(),
                    Arc::new(schema),
                    ToolKind::Proxied(ProxiedToolSpec {
                        server_url: address.to_string(),
                        namespace: prefix.clone(),
                        remote_name,
                        origin: origin.to_string(),
                    }),
                ))
            })
            .collect();
        Ok(tools)
    }

    /// Forward a call under the remote tool name and return the remote
    /// result as is.
    pub async fn call(
        &self,
        spec: &ProxiedToolSpec,
        arguments: Option<JsonObject>,
        credential: Option<&str>,
    ) -> McpResult<CallToolResult> {
        let request = CallToolRequestParam {
            name: Cow::Owned(spec.remote_name.clone()),
            arguments,
        };
        debug!("Forwarding '{}' to {}", spec.remote_name, spec.server_url);
        self.with_deadline(
            &spec.server_url,
            self.connector.call_tool(&spec.server_url, request, credential),
        )
        .await
    }

    /// Dropping the inner future on timeout drops its transport, which
    /// closes the remote session.
    async fn with_deadline<T>(
        &self,
        address: &str,
        fut: impl std::future::Future<Output = McpResult<T>>,
    ) -> McpResult<T> {
        tokio::time::timeout(self.timeout, fut)
            .await
            .map_err(|_| McpError::InvocationTimeout {
                target: address.to_string(),
                seconds: self.timeout.as_secs(),
            })?
    }
}
