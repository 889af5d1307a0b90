//! Outbound HTTP client construction.
//!
//! Builds the `reqwest` clients used for job-backend calls and nested
//! registry connections: bearer auth, user agent, and proxy settings.

use std::time::Duration;

use super::config::HttpProxyConfig;
use crate::error::{McpError, McpResult};

pub const USER_AGENT: &str = concat!("jobgate/", env!("CARGO_PKG_VERSION"));

/// Apply proxy configuration to a ClientBuilder
///
/// Applies proxy settings without building the client, so auth headers can
/// be added afterward.
pub(crate) fn apply_proxy_to_builder(
    mut builder: reqwest::ClientBuilder,
    proxy_cfg: &HttpProxyConfig,
) -> McpResult<reqwest::ClientBuilder> {
    if let Some(ref http_proxy) = proxy_cfg.http {
        let proxy = reqwest::Proxy::http(http_proxy)
            .map_err(|e| McpError::Config(format!("Invalid HTTP proxy: {}", e)))?;
        builder = builder.proxy(configure_proxy(proxy, proxy_cfg));
    }

    if let Some(ref https_proxy) = proxy_cfg.https {
        let proxy = reqwest::Proxy::https(https_proxy)
            .map_err(|e| McpError::Config(format!("Invalid HTTPS proxy: {}", e)))?;
        builder = builder.proxy(configure_proxy(proxy, proxy_cfg));
    }

    Ok(builder)
}

fn configure_proxy(mut proxy: reqwest::Proxy, proxy_cfg: &HttpProxyConfig) -> reqwest::Proxy {
    if let Some(ref no_proxy) = proxy_cfg.no_proxy {
        proxy = proxy.no_proxy(reqwest::NoProxy::from_string(no_proxy));
    }
    if let (Some(ref username), Some(ref password)) = (&proxy_cfg.username, &proxy_cfg.password) {
        proxy = proxy.basic_auth(username, password);
    }
    proxy
}

/// Default headers carrying the bearer credential.
pub(crate) fn build_request_headers(token: Option<&str>) -> McpResult<reqwest::header::HeaderMap> {
    let mut headers = reqwest::header::HeaderMap::new();

    if let Some(tok) = token {
        let mut value: reqwest::header::HeaderValue = format!("Bearer {}", tok)
            .parse()
            .map_err(|e| McpError::Transport(format!("auth token: {}", e)))?;
        value.set_sensitive(true);
        headers.insert(reqwest::header::AUTHORIZATION, value);
    }

    Ok(headers)
}

/// Build an HTTP client with the credential installed as a default header.
pub fn build_http_client(
    proxy_config: Option<&HttpProxyConfig>,
    token: Option<&str>,
) -> McpResult<reqwest::Client> {
    let mut builder = reqwest::Client::builder()
        .connect_timeout(Duration::from_secs(10))
        .user_agent(USER_AGENT);

    if let Some(proxy_cfg) = proxy_config {
        builder = apply_proxy_to_builder(builder, proxy_cfg)?;
    }

    let req_headers = build_request_headers(token)?;
    if !req_headers.is_empty() {
        builder = builder.default_headers(req_headers);
    }

    builder
        .build()
        .map_err(|e| McpError::Transport(format!("build HTTP client: {}", e)))
}
