//! Transports that front the gateway.
//!
//! stdio serves exactly one session for the life of the process. Streamable
//! HTTP creates one session per MCP session; its identifiers, flags and
//! credential may be given per connection through the URL query and the
//! `Authorization: Bearer` header of the initializing request.

use std::{net::SocketAddr, sync::Arc};

use anyhow::{anyhow, Context, Result};
use axum::{
    extract::Request,
    http::{header, HeaderMap},
    middleware::{self, Next},
    response::Response,
    Router,
};
use jobgate_mcp::{Gateway, GatewayService, GatewaySession, SessionConfig};
use rmcp::{
    service::serve_server,
    transport::{
        stdio,
        streamable_http_server::{
            session::local::LocalSessionManager, StreamableHttpServerConfig,
            StreamableHttpService,
        },
    },
};
use tower_http::trace::TraceLayer;
use tracing::info;

tokio::task_local! {
    static CONNECTION: ConnectionParams;
}

/// Per-connection overrides captured from the HTTP request.
#[derive(Debug, Clone, Default)]
struct ConnectionParams {
    query: Option<String>,
    bearer: Option<String>,
}

impl ConnectionParams {
    fn from_request(req: &Request) -> Self {
        Self {
            query: req.uri().query().map(str::to_string),
            bearer: bearer_token(req.headers()),
        }
    }

    fn session_config(&self, base: &SessionConfig) -> SessionConfig {
        let config = match self.query.as_deref() {
            Some(query) => SessionConfig::from_query(query, base.clone()),
            None => base.clone(),
        };
        match &self.bearer {
            Some(token) => config.with_credential(Some(token.clone())),
            None => config,
        }
    }
}

fn bearer_token(headers: &HeaderMap) -> Option<String> {
    headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .map(str::trim)
        .filter(|t| !t.is_empty())
        .map(str::to_string)
}

async fn capture_connection(req: Request, next: Next) -> Response {
    let params = ConnectionParams::from_request(&req);
    CONNECTION.scope(params, next.run(req)).await
}

/// Serve a single session over stdin/stdout until the client disconnects.
pub async fn serve_stdio(gateway: Arc<Gateway>, session: SessionConfig) -> Result<()> {
    info!(
        identifiers = session.identifiers.len(),
        "Starting MCP server on stdio"
    );
    let service = GatewayService::new(GatewaySession::start(gateway, session));
    let running = serve_server(service, stdio())
        .await
        .map_err(|e| anyhow!("failed to start server: {e}"))?;
    running
        .waiting()
        .await
        .map_err(|e| anyhow!("server task ended: {e}"))?;
    Ok(())
}

/// Router serving the streamable HTTP endpoint at every path.
pub fn router(gateway: Arc<Gateway>, defaults: SessionConfig) -> Router {
    let factory = move || {
        let params = CONNECTION.try_with(Clone::clone).unwrap_or_default();
        let config = params.session_config(&defaults);
        Ok(GatewayService::new(GatewaySession::start(
            Arc::clone(&gateway),
            config,
        )))
    };

    let http_service = StreamableHttpService::new(
        factory,
        Arc::new(LocalSessionManager::default()),
        StreamableHttpServerConfig::default(),
    );

    Router::new()
        .fallback_service(http_service)
        .layer(middleware::from_fn(capture_connection))
        .layer(TraceLayer::new_for_http())
}

pub async fn serve_http(
    gateway: Arc<Gateway>,
    defaults: SessionConfig,
    addr: SocketAddr,
) -> Result<()> {
    let app = router(gateway, defaults);
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind to {addr}"))?;

    info!(bind = %addr, "MCP HTTP server listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("HTTP server error")?;
    Ok(())
}

async fn shutdown_signal() {
    if tokio::signal::ctrl_c().await.is_ok() {
        info!("Shutdown signal received");
    }
}
