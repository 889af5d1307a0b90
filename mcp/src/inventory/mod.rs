//! Tool registry and derived-tool cache.
//!
//! - [`ToolRegistry`]: per-session name → definition map
//! - [`DerivedToolCache`]: process-wide LRU of job tools with TTL

pub mod cache;
pub mod index;
pub mod types;

pub use cache::{CacheEntry, DerivedToolCache, DEFAULT_CACHE_CAPACITY, DEFAULT_CACHE_TTL};
pub use index::ToolRegistry;
pub use types::{
    job_tool_name, HelperTool, JobToolSpec, ProxiedToolSpec, ToolDefinition, ToolKind,
    MAX_TOOL_NAME_LENGTH,
};
