//! Client-side handler for nested registry connections.
//!
//! Implements RMCP's `ClientHandler` so the gateway can talk to another
//! gateway instance: it identifies itself, relays remote log messages into
//! our tracing output, and logs remote tool-list changes. Connections are
//! per operation, so a change only shows up in the next listing.

use std::sync::Arc;

use rmcp::{
    model::{
        CancelledNotificationParam, ClientInfo, LoggingLevel, LoggingMessageNotificationParam,
        ProgressNotificationParam,
    },
    service::NotificationContext,
    ClientHandler, RoleClient,
};
use tracing::{debug, error, info, warn};

#[derive(Clone)]
pub struct GatewayClientHandler {
    address: Arc<str>,
    client_info: ClientInfo,
}

impl GatewayClientHandler {
    pub fn new(address: impl AsRef<str>) -> Self {
        let mut client_info = ClientInfo::default();
        client_info.client_info.name = "jobgate".to_string();
        client_info.client_info.version = env!("CARGO_PKG_VERSION").to_string();

        Self {
            address: Arc::from(address.as_ref()),
            client_info,
        }
    }

    pub fn address(&self) -> &str {
        &self.address
    }
}

impl ClientHandler for GatewayClientHandler {
    async fn on_cancelled(
        &self,
        params: CancelledNotificationParam,
        _context: NotificationContext<RoleClient>,
    ) {
        info!(
            address = %self.address,
            request_id = %params.request_id,
            reason = ?params.reason,
            "Nested registry cancelled request"
        );
    }

    async fn on_progress(
        &self,
        params: ProgressNotificationParam,
        _context: NotificationContext<RoleClient>,
    ) {
        debug!(
            address = %self.address,
            progress = %params.progress,
            total = ?params.total,
            "Nested registry progress"
        );
    }

    async fn on_tool_list_changed(&self, _context: NotificationContext<RoleClient>) {
        info!(address = %self.address, "Nested registry tool list changed");
    }

    fn get_info(&self) -> ClientInfo {
        self.client_info.clone()
    }

    async fn on_logging_message(
        &self,
        params: LoggingMessageNotificationParam,
        _context: NotificationContext<RoleClient>,
    ) {
        let logger = params.logger.as_deref().unwrap_or("mcp");

        match params.level {
            LoggingLevel::Emergency
            | LoggingLevel::Alert
            | LoggingLevel::Critical
            | LoggingLevel::Error => {
                error!(address = %self.address, logger = %logger, "nested: {}", params.data);
            }
            LoggingLevel::Warning => {
                warn!(address = %self.address, logger = %logger, "nested: {}", params.data);
            }
            LoggingLevel::Notice | LoggingLevel::Info => {
                info!(address = %self.address, logger = %logger, "nested: {}", params.data);
            }
            LoggingLevel::Debug => {
                debug!(address = %self.address, logger = %logger, "nested: {}", params.data);
            }
        }
    }
}
