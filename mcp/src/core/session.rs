//! Per-connection gateway session.
//!
//! A session owns its [`ToolRegistry`] and starts in two phases:
//! [`GatewaySession::start`] returns at once, while a background task
//! resolves the configured identifiers and publishes the outcome exactly
//! once. `list_tools` and `call_tool` wait for that outcome, so a client
//! that asks for the catalog early simply blocks until it is ready.
//!
//! If the primary credential is rejected for any identifier and a fallback
//! credential is configured, the whole identifier set is resolved once more
//! with the fallback. Both attempts load by name, so tools found by both
//! appear once.

use std::sync::Arc;

use parking_lot::RwLock;
use rmcp::model::CallToolResult;
use tokio::sync::watch;
use tokio_util::sync::{CancellationToken, DropGuard};
use tracing::{debug, info, warn};

use super::{config::SessionConfig, orchestrator::Gateway};
use crate::{
    error::{McpError, McpResult},
    inventory::{ToolDefinition, ToolRegistry},
    transform::JsonObject,
};

/// What the background load produced.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LoadOutcome {
    pub tools_loaded: usize,
    pub used_fallback: bool,
    /// Identifiers that contributed no tools in the final attempt.
    pub failed: Vec<String>,
}

struct SessionInner {
    gateway: Arc<Gateway>,
    config: SessionConfig,
    registry: Arc<ToolRegistry>,
    loaded: watch::Receiver<Option<LoadOutcome>>,
    /// Credential that calls use; the fallback once it replaced the primary.
    credential: Arc<RwLock<Option<String>>>,
    _cancel_on_drop: DropGuard,
}

/// Cheap to clone; the load task is cancelled when the last clone drops.
#[derive(Clone)]
pub struct GatewaySession {
    inner: Arc<SessionInner>,
}

impl GatewaySession {
    /// Phase one: create the session and spawn the load task.
    pub fn start(gateway: Arc<Gateway>, config: SessionConfig) -> Self {
        let registry = Arc::new(ToolRegistry::new());
        let credential = Arc::new(RwLock::new(
            config
                .credential
                .clone()
                .or_else(|| config.fallback_credential.clone()),
        ));
        let (tx, rx) = watch::channel(None);
        let cancel = CancellationToken::new();

        let loader = Loader {
            gateway: Arc::clone(&gateway),
            config: config.clone(),
            registry: Arc::clone(&registry),
            credential: Arc::clone(&credential),
        };
        let token = cancel.clone();
        tokio::spawn(async move {
            tokio::select! {
                _ = token.cancelled() => debug!("Session closed before its tools were loaded"),
                outcome = loader.load() => {
                    let _ = tx.send(Some(outcome));
                }
            }
        });

        Self {
            inner: Arc::new(SessionInner {
                gateway,
                config,
                registry,
                loaded: rx,
                credential,
                _cancel_on_drop: cancel.drop_guard(),
            }),
        }
    }

    /// Wait for the load task. A session whose task was cancelled reports
    /// an empty outcome.
    #[allow(clippy::let_and_return)]
    pub async fn ready(&self) -> LoadOutcome {
        let mut loaded = self.inner.loaded.clone();
        // The borrow guard must drop before `loaded` does.
        let outcome = match loaded.wait_for(Option::is_some).await {
            Ok(outcome) => outcome.clone().unwrap_or_default(),
            Err(_) => LoadOutcome::default(),
        };
        outcome
    }

    pub fn is_loaded(&self) -> bool {
        self.inner.loaded.borrow().is_some()
    }

    pub fn registry(&self) -> &Arc<ToolRegistry> {
        &self.inner.registry
    }

    pub fn config(&self) -> &SessionConfig {
        &self.inner.config
    }

    pub fn gateway(&self) -> &Arc<Gateway> {
        &self.inner.gateway
    }

    pub async fn list_tools(&self) -> Vec<Arc<ToolDefinition>> {
        self.ready().await;
        self.inner.registry.list()
    }

    pub async fn call_tool(
        &self,
        name: &str,
        arguments: Option<JsonObject>,
    ) -> McpResult<CallToolResult> {
        self.call_tool_cancellable(name, arguments, &CancellationToken::new())
            .await
    }

    /// Serve a call that stops, and aborts any job run it started, once
    /// `cancel` fires.
    pub async fn call_tool_cancellable(
        &self,
        name: &str,
        arguments: Option<JsonObject>,
        cancel: &CancellationToken,
    ) -> McpResult<CallToolResult> {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(McpError::Cancelled(name.to_string())),
            _ = self.ready() => {}
        }
        let credential = self.inner.credential.read().clone();
        self.inner
            .gateway
            .dispatch_cancellable(
                &self.inner.registry,
                &self.inner.config,
                credential.as_deref(),
                name,
                arguments,
                cancel,
            )
            .await
    }
}

/// Phase two, run on a spawned task.
struct Loader {
    gateway: Arc<Gateway>,
    config: SessionConfig,
    registry: Arc<ToolRegistry>,
    credential: Arc<RwLock<Option<String>>>,
}

impl Loader {
    async fn load(self) -> LoadOutcome {
        let config = &self.config;
        self.registry
            .bulk_upsert(self.gateway.static_tools(config));

        if config.identifiers.is_empty() {
            return LoadOutcome {
                tools_loaded: self.registry.len(),
                ..Default::default()
            };
        }

        let (primary, fallback) = match (
            config.credential.as_deref(),
            config.fallback_credential.as_deref(),
        ) {
            (Some(primary), fallback) => (primary, fallback.filter(|f| *f != primary)),
            (None, Some(fallback)) => (fallback, None),
            (None, None) => {
                warn!(
                    "No credential configured; {} identifiers not loaded",
                    config.identifiers.len()
                );
                return LoadOutcome {
                    tools_loaded: self.registry.len(),
                    failed: config.identifiers.clone(),
                    ..Default::default()
                };
            }
        };

        let first = self
            .gateway
            .resolve_identifiers(&config.identifiers, primary)
            .await;
        let retry = first.has_auth_failure();
        self.registry.bulk_upsert(first.tools);

        let mut outcome = LoadOutcome {
            failed: first.failed,
            ..Default::default()
        };

        if let (true, Some(fallback)) = (retry, fallback) {
            info!("Primary credential rejected, retrying with the fallback credential");
            let second = self
                .gateway
                .resolve_identifiers(&config.identifiers, fallback)
                .await;
            self.registry.bulk_upsert(second.tools);
            *self.credential.write() = Some(fallback.to_string());
            outcome.failed = second.failed;
            outcome.used_fallback = true;
        }

        outcome.tools_loaded = self.registry.len();
        info!("Session ready with {} tools", outcome.tools_loaded);
        outcome
    }
}
