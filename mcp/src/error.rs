//! Gateway error types.
//!
//! Covers tool lookup and validation failures surfaced to callers, job and
//! nested-registry invocation failures, and the collaborator errors raised
//! while resolving tools.

use thiserror::Error;

pub type McpResult<T> = Result<T, McpError>;

#[derive(Debug, Error)]
pub enum McpError {
    #[error("Missing credential: {0}")]
    Unauthenticated(String),

    #[error("Unknown tool: {0}")]
    UnknownTool(String),

    #[error("Missing arguments for tool: {0}")]
    MissingArguments(String),

    #[error("Invalid arguments for tool {tool}: args: {arguments} error: {errors:?}")]
    InvalidArguments {
        tool: String,
        arguments: String,
        errors: Vec<String>,
    },

    #[error("Job {job} failed: {message}")]
    InvocationFailed { job: String, message: String },

    #[error("Call to {target} timed out after {seconds}s")]
    InvocationTimeout { target: String, seconds: u64 },

    #[error("Call to {0} was cancelled")]
    Cancelled(String),

    #[error("Failed to compile input schema for {tool}: {reason}")]
    SchemaCompilationFailed { tool: String, reason: String },

    #[error("Error calling tool: {0}")]
    ToolCallFailed(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error(transparent)]
    Sdk(#[from] Box<rmcp::RmcpError>),

    #[error(transparent)]
    Json(#[from] serde_json::Error),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Http(#[from] reqwest::Error),
}

impl McpError {
    /// Whether the failure came from a rejected or missing credential.
    pub fn is_auth_failure(&self) -> bool {
        match self {
            Self::Unauthenticated(_) | Self::Unauthorized(_) => true,
            Self::Http(e) => matches!(
                e.status(),
                Some(reqwest::StatusCode::UNAUTHORIZED | reqwest::StatusCode::FORBIDDEN)
            ),
            _ => false,
        }
    }

    /// Errors the dispatcher passes through untouched instead of wrapping
    /// them into [`McpError::ToolCallFailed`].
    pub(crate) fn is_caller_facing(&self) -> bool {
        matches!(
            self,
            Self::Unauthenticated(_)
                | Self::UnknownTool(_)
                | Self::MissingArguments(_)
                | Self::InvalidArguments { .. }
                | Self::InvocationFailed { .. }
                | Self::InvocationTimeout { .. }
                | Self::Cancelled(_)
                | Self::ToolCallFailed(_)
        )
    }
}

impl From<McpError> for rmcp::ErrorData {
    fn from(err: McpError) -> Self {
        let message = err.to_string();
        match err {
            McpError::UnknownTool(_)
            | McpError::MissingArguments(_)
            | McpError::InvalidArguments { .. } => rmcp::ErrorData::invalid_params(message, None),
            _ => rmcp::ErrorData::internal_error(message, None),
        }
    }
}
