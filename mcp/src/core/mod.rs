//! Gateway core: job backend, resolution, dispatch and sessions.

pub mod backend;
pub mod config;
pub mod handler;
pub mod helpers;
pub mod http_backend;
pub mod invocation;
pub mod metrics;
pub mod nested;
pub mod orchestrator;
pub mod proxy;
pub mod service;
pub mod session;

#[cfg(test)]
pub(crate) mod testing;

pub use backend::{JobBackend, JobDefinition, JobRun, JobStatus, ResultPage, RunOptions, StoreQuery};
pub use config::{
    split_list, CacheConfig, FeatureGroup, GatewayConfig, HostedConfig, HttpProxyConfig,
    LimitsConfig, SessionConfig, SessionDefaults, DEFAULT_API_BASE_URL, DEFAULT_IDENTIFIERS,
    JOB_INSTRUCTIONS,
    MAX_JOB_MEMORY_MBYTES,
};
pub use handler::GatewayClientHandler;
pub use helpers::{feature_group, helper_definition, helper_tools};
pub use http_backend::HttpJobBackend;
pub use invocation::{truncate_item, JobInvoker, JobOutput, TRUNCATION_MARKER};
pub use metrics::{GatewayMetrics, LatencySnapshot, MetricsSnapshot};
pub use nested::{
    namespace, proxied_tool_name, NestedRegistryProxy, RegistryConnector,
    StreamableHttpConnector, NAMESPACE_LENGTH,
};
pub use orchestrator::{Gateway, Resolution, RUN_MEMORY_ARGUMENT};
pub use proxy::{build_http_client, USER_AGENT};
pub use service::GatewayService;
pub use session::{GatewaySession, LoadOutcome};
