//! MCP server surface of a gateway session.
//!
//! [`GatewayService`] answers `tools/list` and `tools/call` from its
//! session and pushes `notifications/tools/list_changed` whenever a call
//! mutated the session registry. The notification goes out before the call
//! result, so a client that re-lists after seeing it observes the change.
//! A call stops when its request is cancelled or the connection closes.

use rmcp::{
    model::{
        CallToolRequestParam, CallToolResult, Implementation, ListToolsResult,
        PaginatedRequestParam, ServerCapabilities, ServerInfo,
    },
    service::RequestContext,
    ErrorData, RoleServer, ServerHandler,
};
use tracing::{debug, warn};

use super::session::GatewaySession;

const INSTRUCTIONS: &str = "Tools are backed by hosted jobs. Job tools run a job and return its \
     result records; long records are truncated and can be read in full with get-job-output. \
     The tool list can change during the session.";

#[derive(Clone)]
pub struct GatewayService {
    session: GatewaySession,
}

impl GatewayService {
    pub fn new(session: GatewaySession) -> Self {
        Self { session }
    }

    pub fn session(&self) -> &GatewaySession {
        &self.session
    }
}

impl ServerHandler for GatewayService {
    fn get_info(&self) -> ServerInfo {
        ServerInfo {
            capabilities: ServerCapabilities::builder()
                .enable_tools()
                .enable_tool_list_changed()
                .build(),
            server_info: Implementation {
                name: "jobgate".to_string(),
                version: env!("CARGO_PKG_VERSION").to_string(),
                ..Default::default()
            },
            instructions: Some(INSTRUCTIONS.to_string()),
            ..Default::default()
        }
    }

    async fn list_tools(
        &self,
        _request: Option<PaginatedRequestParam>,
        _context: RequestContext<RoleServer>,
    ) -> Result<ListToolsResult, ErrorData> {
        let tools = self
            .session
            .list_tools()
            .await
            .iter()
            .map(|tool| tool.to_protocol())
            .collect();
        Ok(ListToolsResult {
            tools,
            next_cursor: None,
        })
    }

    async fn call_tool(
        &self,
        request: CallToolRequestParam,
        context: RequestContext<RoleServer>,
    ) -> Result<CallToolResult, ErrorData> {
        let registry = self.session.registry();
        let revision = registry.revision();

        let result = self
            .session
            .call_tool_cancellable(&request.name, request.arguments, &context.ct)
            .await;

        if registry.revision() != revision {
            debug!("Tool list changed by '{}'", request.name);
            if let Err(e) = context.peer.notify_tool_list_changed().await {
                warn!("Failed to send tool list change notification: {}", e);
            }
        }

        result.map_err(|e| {
            debug!("Tool call '{}' failed: {}", request.name, e);
            ErrorData::from(e)
        })
    }
}
