//! Core types for the tool registry.

use std::{borrow::Cow, fmt, sync::Arc};

use rmcp::model::Tool;

use crate::transform::CompiledSchema;

/// Maximum length of an exposed tool name.
pub const MAX_TOOL_NAME_LENGTH: usize = 64;

/// Static helper tools the gateway provides itself.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HelperTool {
    AddTool,
    RemoveTool,
    Search,
    GetToolDetails,
    GetJobOutput,
}

impl HelperTool {
    pub const ALL: [HelperTool; 5] = [
        HelperTool::AddTool,
        HelperTool::RemoveTool,
        HelperTool::Search,
        HelperTool::GetToolDetails,
        HelperTool::GetJobOutput,
    ];

    pub fn name(self) -> &'static str {
        match self {
            Self::AddTool => "add-tool",
            Self::RemoveTool => "remove-tool",
            Self::Search => "search",
            Self::GetToolDetails => "get-tool-details",
            Self::GetJobOutput => "get-job-output",
        }
    }

    /// Whether calling this tool mutates the registry.
    pub fn is_mutation(self) -> bool {
        matches!(self, Self::AddTool | Self::RemoveTool)
    }
}

impl fmt::Display for HelperTool {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Invocation data for a job-backed tool.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobToolSpec {
    /// Identifier passed to the job backend (`owner/name` or an ID).
    pub job_id: String,
    /// Memory ceiling in megabytes, already clamped to the system maximum.
    pub memory_mbytes: u32,
}

/// Forwarding data for a tool re-exported from a nested registry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProxiedToolSpec {
    /// Address of the nested registry. Every call connects to it anew.
    pub server_url: String,
    /// Digest prefix derived from `server_url`.
    pub namespace: String,
    /// Tool name as the nested registry knows it.
    pub remote_name: String,
    /// Identifier the nested registry was resolved from.
    pub origin: String,
}

/// Execution path of a tool.
#[derive(Debug, Clone)]
pub enum ToolKind {
    Static(HelperTool),
    Job(JobToolSpec),
    Proxied(ProxiedToolSpec),
}

/// An immutable tool definition.
///
/// Registry mutation replaces whole definitions; they are never edited in
/// place. Schema and validator travel together in [`CompiledSchema`].
#[derive(Debug, Clone)]
pub struct ToolDefinition {
    pub name: String,
    pub display_label: String,
    pub description: String,
    pub schema: Arc<CompiledSchema>,
    pub kind: ToolKind,
}

impl ToolDefinition {
    pub fn new(
        name: impl Into<String>,
        display_label: impl Into<String>,
        description: impl Into<String>,
        schema: Arc<CompiledSchema>,
        kind: ToolKind,
    ) -> Self {
        Self {
            name: name.into(),
            display_label: display_label.into(),
            description: description.into(),
            schema,
            kind,
        }
    }

    pub fn is_job(&self) -> bool {
        matches!(self.kind, ToolKind::Job(_))
    }

    pub fn helper(&self) -> Option<HelperTool> {
        match self.kind {
            ToolKind::Static(helper) => Some(helper),
            _ => None,
        }
    }

    /// Protocol-facing summary used by `tools/list`.
    pub fn to_protocol(&self) -> Tool {
        Tool {
            name: Cow::Owned(self.name.clone()),
            title: Some(self.display_label.clone()),
            description: Some(Cow::Owned(self.description.clone())),
            input_schema: Arc::clone(self.schema.document()),
            output_schema: None,
            annotations: None,
            icons: None,
        }
    }
}

/// Tool name for a job identifier: `/` becomes `-`, capped at
/// [`MAX_TOOL_NAME_LENGTH`] characters.
pub fn job_tool_name(identifier: &str) -> String {
    identifier
        .replace('/', "-")
        .chars()
        .take(MAX_TOOL_NAME_LENGTH)
        .collect()
}
