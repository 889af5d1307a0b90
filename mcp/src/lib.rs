//! Dynamic MCP tool registry backed by hosted jobs.
//!
//! ## Modules
//!
//! - [`transform`]: job input schema → tool schema + validator
//! - [`inventory`]: per-session tool registry and the shared derived-tool cache
//! - [`core`]: job backend, nested registries, dispatch, sessions, server handler
//!
//! A [`Gateway`] is shared by every session of a process. Each client
//! connection gets a [`GatewaySession`] wrapped in a [`GatewayService`].

pub mod error;
pub mod transform;

pub mod core;
pub mod inventory;

pub use core::{
    config, FeatureGroup, Gateway, GatewayConfig, GatewayMetrics, GatewayService, GatewaySession,
    HttpJobBackend, JobBackend, LoadOutcome, RegistryConnector, SessionConfig,
    StreamableHttpConnector,
};

pub use error::{McpError, McpResult};
pub use inventory::{DerivedToolCache, HelperTool, ToolDefinition, ToolKind, ToolRegistry};
pub use transform::{CompiledSchema, SchemaTransformer};
