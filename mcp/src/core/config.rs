//! Gateway configuration types and utilities.
//!
//! [`GatewayConfig`] is process-wide (backend address, cache, limits, proxy,
//! hosted context). [`SessionConfig`] is built per client session and says
//! which tools that session exposes.

use std::{collections::BTreeSet, fmt, str::FromStr, time::Duration};

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::error::{McpError, McpResult};

pub const DEFAULT_API_BASE_URL: &str = "https://api.apify.com";

/// Jobs a session loads when none are configured.
pub const DEFAULT_IDENTIFIERS: &[&str] = &[
    "apify/instagram-scraper",
    "apify/rag-web-browser",
    "lukaskrivka/google-maps-with-contact-details",
];

/// System-wide memory ceiling for a single job run.
pub const MAX_JOB_MEMORY_MBYTES: u32 = 4096;

/// Usage guidance appended to every job tool description.
pub const JOB_INSTRUCTIONS: &str = "Never call/execute tool/job unless confirmed by the user. \
     Always limit the number of results in the call arguments.";

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct GatewayConfig {
    /// Base URL of the job platform API
    #[serde(default = "default_api_base_url")]
    pub api_base_url: String,

    /// Derived-tool cache settings
    #[serde(default)]
    pub cache: CacheConfig,

    /// Output, memory and deadline limits
    #[serde(default)]
    pub limits: LimitsConfig,

    /// Outbound HTTP proxy for backend and nested-registry traffic
    #[serde(default)]
    pub proxy: Option<HttpProxyConfig>,

    /// Hosted execution context (results are republished when enabled)
    #[serde(default)]
    pub hosted: HostedConfig,

    /// Defaults for sessions that do not carry their own options
    #[serde(default)]
    pub session: SessionDefaults,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct CacheConfig {
    #[serde(default = "default_cache_entries")]
    pub max_entries: usize,

    /// Entry lifetime (seconds)
    #[serde(default = "default_cache_ttl")]
    pub ttl_secs: u64,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct LimitsConfig {
    #[serde(default = "default_max_memory")]
    pub max_memory_mbytes: u32,

    /// Per-item character budget for job output
    #[serde(default = "default_output_chars")]
    pub output_max_chars_per_item: usize,

    /// Maximum readme length returned by `get-tool-details`
    #[serde(default = "default_readme_chars")]
    pub readme_max_chars: usize,

    /// Overall deadline for a job call (seconds)
    #[serde(default = "default_call_timeout")]
    pub call_timeout_secs: u64,

    /// Overall deadline for a nested-registry round trip (seconds)
    #[serde(default = "default_registry_timeout")]
    pub registry_timeout_secs: u64,
}

/// Hosted execution context.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct HostedConfig {
    #[serde(default)]
    pub enabled: bool,

    /// Result collection the hosting context reads from
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output_dataset_id: Option<String>,
}

/// Session options applied when a transport does not supply any.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct SessionDefaults {
    /// An empty list means [`DEFAULT_IDENTIFIERS`].
    #[serde(default = "default_identifiers")]
    pub identifiers: Vec<String>,

    #[serde(default)]
    pub allow_tool_mutation: bool,

    #[serde(default)]
    pub feature_groups: Vec<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_job_memory: Option<u32>,
}

impl Default for SessionDefaults {
    fn default() -> Self {
        Self {
            identifiers: default_identifiers(),
            allow_tool_mutation: false,
            feature_groups: Vec::new(),
            max_job_memory: None,
        }
    }
}

/// Outbound proxy configuration (affects backend and nested-registry traffic)
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct HttpProxyConfig {
    /// HTTP proxy URL (e.g., "http://proxy.internal:8080")
    pub http: Option<String>,

    /// HTTPS proxy URL
    pub https: Option<String>,

    /// Comma-separated hosts to exclude from proxying
    /// Example: "localhost,127.0.0.1,*.internal,10.*"
    pub no_proxy: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub password: Option<String>,
}

// Default value functions
fn default_identifiers() -> Vec<String> {
    DEFAULT_IDENTIFIERS.iter().map(|s| s.to_string()).collect()
}

fn default_api_base_url() -> String {
    DEFAULT_API_BASE_URL.to_string()
}

fn default_cache_entries() -> usize {
    500
}

fn default_cache_ttl() -> u64 {
    1800 // 30 minutes
}

fn default_max_memory() -> u32 {
    MAX_JOB_MEMORY_MBYTES
}

fn default_output_chars() -> usize {
    5000
}

fn default_readme_chars() -> usize {
    5000
}

fn default_call_timeout() -> u64 {
    300 // 5 minutes
}

fn default_registry_timeout() -> u64 {
    60
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            max_entries: default_cache_entries(),
            ttl_secs: default_cache_ttl(),
        }
    }
}

impl Default for LimitsConfig {
    fn default() -> Self {
        Self {
            max_memory_mbytes: default_max_memory(),
            output_max_chars_per_item: default_output_chars(),
            readme_max_chars: default_readme_chars(),
            call_timeout_secs: default_call_timeout(),
            registry_timeout_secs: default_registry_timeout(),
        }
    }
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            api_base_url: default_api_base_url(),
            cache: CacheConfig::default(),
            limits: LimitsConfig::default(),
            proxy: None,
            hosted: HostedConfig::default(),
            session: SessionDefaults::default(),
        }
    }
}

impl CacheConfig {
    pub fn ttl(&self) -> Duration {
        Duration::from_secs(self.ttl_secs)
    }
}

impl LimitsConfig {
    pub fn call_timeout(&self) -> Duration {
        Duration::from_secs(self.call_timeout_secs)
    }

    pub fn registry_timeout(&self) -> Duration {
        Duration::from_secs(self.registry_timeout_secs)
    }

    /// Memory ceiling never exceeds the system maximum.
    pub fn memory_ceiling(&self) -> u32 {
        self.max_memory_mbytes.min(MAX_JOB_MEMORY_MBYTES)
    }
}

impl HttpProxyConfig {
    /// Load proxy config from standard environment variables
    pub fn from_env() -> Option<Self> {
        let http = std::env::var("MCP_HTTP_PROXY")
            .ok()
            .or_else(|| std::env::var("HTTP_PROXY").ok());

        let https = std::env::var("MCP_HTTPS_PROXY")
            .ok()
            .or_else(|| std::env::var("HTTPS_PROXY").ok());

        let no_proxy = std::env::var("MCP_NO_PROXY")
            .ok()
            .or_else(|| std::env::var("NO_PROXY").ok());

        if http.is_some() || https.is_some() {
            Some(Self {
                http,
                https,
                no_proxy,
                username: None,
                password: None,
            })
        } else {
            None
        }
    }
}

impl HostedConfig {
    /// Hosted context from `JOBGATE_IS_HOSTED` and `JOBGATE_DEFAULT_DATASET_ID`.
    pub fn from_env() -> Self {
        let enabled = std::env::var("JOBGATE_IS_HOSTED")
            .map(|v| matches!(v.as_str(), "1" | "true" | "TRUE" | "True"))
            .unwrap_or(false);
        Self {
            enabled,
            output_dataset_id: std::env::var("JOBGATE_DEFAULT_DATASET_ID").ok(),
        }
    }
}

impl GatewayConfig {
    /// Load configuration from a YAML file
    pub async fn from_file(path: &str) -> McpResult<Self> {
        let content = tokio::fs::read_to_string(path).await?;
        serde_yaml::from_str(&content)
            .map_err(|e| McpError::Config(format!("parse {}: {}", path, e)))
    }

    /// Fill unset proxy and hosted settings from the environment
    pub fn with_env_overrides(mut self) -> Self {
        if self.proxy.is_none() {
            self.proxy = HttpProxyConfig::from_env();
        }
        if !self.hosted.enabled {
            self.hosted = HostedConfig::from_env();
        }
        self
    }
}

/// Named bundles of static helper tools.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FeatureGroup {
    /// `search` and `get-tool-details`
    Discovery,
    /// `get-job-output`
    Storage,
}

impl FromStr for FeatureGroup {
    type Err = McpError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "discovery" | "docs" => Ok(Self::Discovery),
            "storage" | "dataset" => Ok(Self::Storage),
            other => Err(McpError::Config(format!("unknown feature group: {}", other))),
        }
    }
}

/// Per-session options.
///
/// Credentials live here only for the lifetime of the session that received
/// them. `Debug` redacts them.
#[derive(Clone, Default)]
pub struct SessionConfig {
    pub identifiers: Vec<String>,
    pub allow_tool_mutation: bool,
    pub feature_groups: BTreeSet<FeatureGroup>,
    pub max_job_memory: Option<u32>,
    pub credential: Option<String>,
    pub fallback_credential: Option<String>,
}

impl fmt::Debug for SessionConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionConfig")
            .field("identifiers", &self.identifiers)
            .field("allow_tool_mutation", &self.allow_tool_mutation)
            .field("feature_groups", &self.feature_groups)
            .field("max_job_memory", &self.max_job_memory)
            .field("credential", &self.credential.as_ref().map(|_| "****"))
            .field(
                "fallback_credential",
                &self.fallback_credential.as_ref().map(|_| "****"),
            )
            .finish()
    }
}

impl SessionConfig {
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_identifiers<I, S>(mut self, identifiers: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.identifiers = identifiers.into_iter().map(Into::into).collect();
        self
    }

    #[must_use]
    pub fn with_tool_mutation(mut self, allow: bool) -> Self {
        self.allow_tool_mutation = allow;
        self
    }

    #[must_use]
    pub fn with_feature_groups<I>(mut self, groups: I) -> Self
    where
        I: IntoIterator<Item = FeatureGroup>,
    {
        self.feature_groups = groups.into_iter().collect();
        self
    }

    #[must_use]
    pub fn with_max_job_memory(mut self, mbytes: Option<u32>) -> Self {
        self.max_job_memory = mbytes;
        self
    }

    #[must_use]
    pub fn with_credential(mut self, credential: Option<String>) -> Self {
        self.credential = credential.filter(|c| !c.is_empty());
        self
    }

    #[must_use]
    pub fn with_fallback_credential(mut self, credential: Option<String>) -> Self {
        self.fallback_credential = credential.filter(|c| !c.is_empty());
        self
    }

    /// Build from configured defaults. Unknown group names are skipped and
    /// an empty identifier list loads [`DEFAULT_IDENTIFIERS`].
    pub fn from_defaults(defaults: &SessionDefaults) -> Self {
        let identifiers = if defaults.identifiers.is_empty() {
            default_identifiers()
        } else {
            defaults.identifiers.clone()
        };
        Self::new()
            .with_identifiers(identifiers)
            .with_tool_mutation(defaults.allow_tool_mutation)
            .with_feature_groups(parse_groups(defaults.feature_groups.iter().map(String::as_str)))
            .with_max_job_memory(defaults.max_job_memory)
    }

    /// Parse the URL query form used by HTTP clients, e.g.
    /// `actors=a/b,c/d&enableAddingActors=true&tools=discovery&maxMemoryMbytes=2048`.
    ///
    /// Recognized keys override `base`; an empty identifier list keeps the
    /// base identifiers. Credentials are never read from the query string.
    pub fn from_query(query: &str, base: SessionConfig) -> Self {
        let mut config = base;
        for (key, value) in url::form_urlencoded::parse(query.as_bytes()) {
            match key.as_ref() {
                "actors" | "identifiers" => {
                    let identifiers = split_list(&value);
                    if !identifiers.is_empty() {
                        config.identifiers = identifiers;
                    }
                }
                "enableAddingActors" | "allowToolMutation" => {
                    config.allow_tool_mutation = parse_bool(&value)
                }
                "tools" | "featureGroups" => {
                    config.feature_groups = parse_groups(split_list(&value).iter().map(String::as_str))
                }
                "maxMemoryMbytes" | "maxJobMemory" => match value.trim().parse() {
                    Ok(mbytes) => config.max_job_memory = Some(mbytes),
                    Err(_) => warn!("Ignoring invalid {}: {}", key, value),
                },
                _ => {}
            }
        }
        config
    }

    /// Memory bound for this session after clamping to the system maximum.
    pub fn memory_ceiling(&self, system_max: u32) -> u32 {
        match self.max_job_memory {
            Some(mbytes) => mbytes.min(system_max),
            None => system_max,
        }
    }
}

fn parse_groups<'a>(names: impl Iterator<Item = &'a str>) -> BTreeSet<FeatureGroup> {
    names
        .filter_map(|name| match name.parse() {
            Ok(group) => Some(group),
            Err(e) => {
                warn!("Ignoring feature group: {}", e);
                None
            }
        })
        .collect()
}

/// Split a comma-separated list, trimming blanks.
pub fn split_list(value: &str) -> Vec<String> {
    value
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}

fn parse_bool(value: &str) -> bool {
    matches!(value.trim(), "1" | "true" | "TRUE" | "True" | "yes")
}
