//! Job input-schema transformation.
//!
//! Turns a raw job input schema into a constrained tool schema plus the
//! validator compiled from it.
//!
//! # Example
//!
//! ```ignore
//! use jobgate_mcp::transform::SchemaTransformer;
//!
//! let raw = serde_json::json!({
//!     "type": "object",
//!     "properties": {"url": {"type": "string"}},
//!     "required": ["url"]
//! });
//! let compiled = SchemaTransformer::transform("acct-crawler", Some(&raw))?;
//! compiled.validate(&serde_json::json!({"url": "https://example.com"}))?;
//! ```

mod transformer;
mod types;
mod validator;

pub use transformer::{
    SchemaTransformer, MAX_DESCRIPTION_LENGTH, MAX_ENUM_EXAMPLES, MAX_ENUM_TITLES_LENGTH,
    REQUIRED_MARKER,
};
pub use types::{InputSchema, JsonObject, PrimitiveType, PropertyKind, PropertySchema};
pub use validator::CompiledSchema;
