//! `jobgate`: MCP gateway exposing hosted jobs as tools.
//!
//! - `jobgate` or `jobgate --transport stdio`: one session over stdin/stdout
//! - `jobgate --transport http --bind 0.0.0.0:3001`: streamable HTTP, one session per client

use std::{net::SocketAddr, sync::Arc};

use anyhow::{Context, Result};
use clap::{Parser, ValueEnum};
use jobgate::{
    logging::{init_logging, LoggingConfig},
    server,
};
use jobgate_mcp::{config::split_list, Gateway, GatewayConfig, SessionConfig};
use tracing::{info, level_filters::LevelFilter};

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum Transport {
    Stdio,
    Http,
}

#[derive(Debug, Parser)]
#[command(name = "jobgate", version)]
#[command(about = "MCP gateway exposing hosted jobs and nested gateways as tools")]
struct Args {
    #[arg(long, value_enum, default_value_t = Transport::Stdio)]
    transport: Transport,

    /// Listen address for the HTTP transport
    #[arg(long, default_value = "127.0.0.1:3001")]
    bind: SocketAddr,

    /// YAML configuration file
    #[arg(long, short)]
    config: Option<String>,

    /// Comma-separated job identifiers to load at session start
    #[arg(long, value_delimiter = ',')]
    identifiers: Vec<String>,

    /// Expose add-tool and remove-tool
    #[arg(long)]
    allow_tool_mutation: bool,

    /// Comma-separated helper groups: discovery, storage
    #[arg(long, value_delimiter = ',')]
    feature_groups: Vec<String>,

    /// Session memory bound for job runs (MB)
    #[arg(long)]
    max_job_memory: Option<u32>,

    #[arg(long, env = "JOBGATE_TOKEN", hide_env_values = true)]
    token: Option<String>,

    /// Used when the primary token is rejected during the initial load
    #[arg(long, env = "JOBGATE_FALLBACK_TOKEN", hide_env_values = true)]
    fallback_token: Option<String>,

    /// Default log level when RUST_LOG is unset
    #[arg(long, default_value = "info")]
    log_level: LevelFilter,

    #[arg(long)]
    log_json: bool,
}

impl Args {
    /// CLI values win over the config file's session defaults.
    fn session_config(&self, config: &GatewayConfig) -> SessionConfig {
        let mut defaults = config.session.clone();
        if !self.identifiers.is_empty() {
            defaults.identifiers = self
                .identifiers
                .iter()
                .flat_map(|s| split_list(s))
                .collect();
        }
        if self.allow_tool_mutation {
            defaults.allow_tool_mutation = true;
        }
        if !self.feature_groups.is_empty() {
            defaults.feature_groups = self.feature_groups.clone();
        }
        if self.max_job_memory.is_some() {
            defaults.max_job_memory = self.max_job_memory;
        }
        SessionConfig::from_defaults(&defaults)
            .with_credential(self.token.clone())
            .with_fallback_credential(self.fallback_token.clone())
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    init_logging(&LoggingConfig {
        level: args.log_level,
        json: args.log_json,
    })?;

    let config = match &args.config {
        Some(path) => GatewayConfig::from_file(path)
            .await
            .with_context(|| format!("failed to load config from {path}"))?,
        None => GatewayConfig::default(),
    }
    .with_env_overrides();

    let session = args.session_config(&config);
    let gateway = Arc::new(Gateway::from_config(config)?);
    info!(
        version = env!("CARGO_PKG_VERSION"),
        transport = ?args.transport,
        "Starting jobgate"
    );

    match args.transport {
        Transport::Stdio => server::serve_stdio(gateway, session).await,
        Transport::Http => server::serve_http(gateway, session, args.bind).await,
    }
}

#[cfg(test)]
mod tests {
    use jobgate_mcp::config::DEFAULT_IDENTIFIERS;

    use super::*;

    #[test]
    fn test_cli_overrides_file_defaults() {
        let args = Args::parse_from([
            "jobgate",
            "--identifiers",
            "acct/a,acct/b",
            "--feature-groups",
            "discovery",
            "--max-job-memory",
            "1024",
            "--token",
            "tok",
        ]);
        let mut config = GatewayConfig::default();
        config.session.identifiers = vec!["acct/file".into()];
        config.session.allow_tool_mutation = true;

        let session = args.session_config(&config);
        assert_eq!(session.identifiers, vec!["acct/a", "acct/b"]);
        assert!(session.allow_tool_mutation);
        assert_eq!(session.max_job_memory, Some(1024));
        assert_eq!(session.credential.as_deref(), Some("tok"));
        assert_eq!(session.feature_groups.len(), 1);
    }

    #[test]
    fn test_default_identifiers_survive_merge() {
        let args = Args::parse_from(["jobgate", "--allow-tool-mutation"]);
        let session = args.session_config(&GatewayConfig::default());
        assert_eq!(session.identifiers, DEFAULT_IDENTIFIERS);
        assert!(session.allow_tool_mutation);
    }

    #[test]
    fn test_defaults() {
        let args = Args::parse_from(["jobgate"]);
        assert_eq!(args.transport, Transport::Stdio);
        assert_eq!(args.log_level, LevelFilter::INFO);
        assert!(args.identifiers.is_empty());
    }
}
