//! Static helper tools.
//!
//! Registry mutation (`add-tool`, `remove-tool`), store discovery
//! (`search`, `get-tool-details`) and result paging (`get-job-output`).

use std::sync::Arc;

use rmcp::model::{CallToolResult, Content};
use serde::Deserialize;
use serde_json::{json, Map, Value};
use tracing::{error, info};

use super::{
    backend::StoreQuery,
    config::{FeatureGroup, SessionConfig},
    invocation::truncate_item,
    orchestrator::Gateway,
};
use crate::{
    error::{McpError, McpResult},
    inventory::{job_tool_name, HelperTool, ToolDefinition, ToolKind, ToolRegistry},
    transform::{CompiledSchema, JsonObject, SchemaTransformer},
};

pub const SEARCH_DEFAULT_LIMIT: u32 = 10;
pub const SEARCH_MAX_LIMIT: u32 = 100;
pub const OUTPUT_PAGE_DEFAULT_LIMIT: usize = 100;
pub const DETAILS_DEFAULT_README_CHARS: usize = 5000;

pub const EMPTY_SEARCH_MESSAGE: &str =
    "Search string must not be empty. Please provide keywords to search for jobs.";

/// Store entry fields passed back to the caller.
const STORE_FIELDS: [&str; 9] = [
    "id",
    "name",
    "username",
    "fullName",
    "title",
    "description",
    "stats",
    "pricing",
    "url",
];

/// Feature group a helper belongs to. Mutation tools have none; they are
/// gated by `allow_tool_mutation`.
pub fn feature_group(helper: HelperTool) -> Option<FeatureGroup> {
    match helper {
        HelperTool::AddTool | HelperTool::RemoveTool => None,
        HelperTool::Search | HelperTool::GetToolDetails => Some(FeatureGroup::Discovery),
        HelperTool::GetJobOutput => Some(FeatureGroup::Storage),
    }
}

fn description(helper: HelperTool) -> &'static str {
    match helper {
        HelperTool::AddTool => {
            "Add a job to the available tools by its name (owner/name). \
             The new tool is announced through a tool-list change."
        }
        HelperTool::RemoveTool => "Remove a tool from the available tools by its name or label.",
        HelperTool::Search => {
            "Search the job store with full-text keywords. Matches title, name, description, \
             owner and readme. Returns name, description, usage statistics, pricing and URL of \
             each match. Use specific keywords and keep the limit small."
        }
        HelperTool::GetToolDetails => {
            "Get a job's description, readme and input schema. \
             Use it to learn the arguments a job accepts before adding or calling it."
        }
        HelperTool::GetJobOutput => {
            "Read items from a job's result collection by dataset ID. \
             Use it to fetch output that was truncated in a job call."
        }
    }
}

fn input_schema(helper: HelperTool) -> Value {
    match helper {
        HelperTool::AddTool => json!({
            "type": "object",
            "properties": {
                "jobName": {
                    "type": "string",
                    "description": "Job to add, as owner/name or job ID"
                }
            },
            "required": ["jobName"]
        }),
        HelperTool::RemoveTool => json!({
            "type": "object",
            "properties": {
                "toolName": {
                    "type": "string",
                    "description": "Tool name or label to remove"
                }
            },
            "required": ["toolName"]
        }),
        HelperTool::Search => json!({
            "type": "object",
            "properties": {
                "search": {
                    "type": "string",
                    "default": "",
                    "description": "Space-separated keywords"
                },
                "limit": {
                    "type": "integer",
                    "minimum": 1,
                    "maximum": SEARCH_MAX_LIMIT,
                    "default": SEARCH_DEFAULT_LIMIT,
                    "description": "Maximum number of results"
                },
                "offset": {
                    "type": "integer",
                    "minimum": 0,
                    "default": 0,
                    "description": "Number of results to skip"
                },
                "category": {
                    "type": "string",
                    "default": "",
                    "description": "Restrict results to a store category"
                }
            }
        }),
        HelperTool::GetToolDetails => json!({
            "type": "object",
            "properties": {
                "jobName": {
                    "type": "string",
                    "description": "Job name as owner/name or job ID"
                },
                "limit": {
                    "type": "integer",
                    "minimum": 1,
                    "default": DETAILS_DEFAULT_README_CHARS,
                    "description": "Maximum readme length in characters"
                }
            },
            "required": ["jobName"]
        }),
        HelperTool::GetJobOutput => json!({
            "type": "object",
            "properties": {
                "datasetId": {
                    "type": "string",
                    "description": "Dataset ID reported by a job call"
                },
                "offset": {
                    "type": "integer",
                    "minimum": 0,
                    "default": 0,
                    "description": "Number of items to skip"
                },
                "limit": {
                    "type": "integer",
                    "minimum": 1,
                    "default": OUTPUT_PAGE_DEFAULT_LIMIT,
                    "description": "Maximum number of items to return"
                }
            },
            "required": ["datasetId"]
        }),
    }
}

pub fn helper_definition(helper: HelperTool) -> McpResult<ToolDefinition> {
    let document = match input_schema(helper) {
        Value::Object(map) => map,
        _ => Map::new(),
    };
    let schema = CompiledSchema::compile(helper.name(), document)?;
    Ok(ToolDefinition::new(
        helper.name(),
        helper.name(),
        description(helper),
        Arc::new(schema),
        ToolKind::Static(helper),
    ))
}

/// Helper tools enabled for a session.
pub fn helper_tools(session: &SessionConfig) -> Vec<Arc<ToolDefinition>> {
    HelperTool::ALL
        .into_iter()
        .filter(|helper| match feature_group(*helper) {
            None => session.allow_tool_mutation,
            Some(group) => session.feature_groups.contains(&group),
        })
        .filter_map(|helper| match helper_definition(helper) {
            Ok(tool) => Some(Arc::new(tool)),
            Err(e) => {
                error!("Failed to build helper tool {}: {}", helper, e);
                None
            }
        })
        .collect()
}

/// Everything a helper may touch while running.
pub(crate) struct HelperContext<'a> {
    pub gateway: &'a Gateway,
    pub registry: &'a ToolRegistry,
    pub credential: Option<&'a str>,
}

impl HelperContext<'_> {
    fn require_credential(&self, action: &str) -> McpResult<&str> {
        self.credential
            .ok_or_else(|| McpError::Unauthenticated(format!("a credential is required to {}", action)))
    }
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct AddToolArgs {
    job_name: String,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct RemoveToolArgs {
    tool_name: String,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct SearchArgs {
    #[serde(default)]
    search: String,
    #[serde(default = "default_search_limit")]
    limit: u32,
    #[serde(default)]
    offset: u32,
    #[serde(default)]
    category: Option<String>,
}

fn default_search_limit() -> u32 {
    SEARCH_DEFAULT_LIMIT
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct DetailsArgs {
    job_name: String,
    #[serde(default = "default_readme_chars")]
    limit: usize,
}

fn default_readme_chars() -> usize {
    DETAILS_DEFAULT_README_CHARS
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct OutputArgs {
    dataset_id: String,
    #[serde(default)]
    offset: usize,
    #[serde(default = "default_page_limit")]
    limit: usize,
}

fn default_page_limit() -> usize {
    OUTPUT_PAGE_DEFAULT_LIMIT
}

fn parse<T: serde::de::DeserializeOwned>(arguments: JsonObject) -> McpResult<T> {
    Ok(serde_json::from_value(Value::Object(arguments))?)
}

pub(crate) async fn run_helper(
    helper: HelperTool,
    ctx: HelperContext<'_>,
    arguments: JsonObject,
) -> McpResult<CallToolResult> {
    match helper {
        HelperTool::AddTool => add_tool(ctx, parse(arguments)?).await,
        HelperTool::RemoveTool => Ok(remove_tool(ctx, parse(arguments)?)),
        HelperTool::Search => search(ctx, parse(arguments)?).await,
        HelperTool::GetToolDetails => tool_details(ctx, parse(arguments)?).await,
        HelperTool::GetJobOutput => job_output(ctx, parse(arguments)?).await,
    }
}

async fn add_tool(ctx: HelperContext<'_>, args: AddToolArgs) -> McpResult<CallToolResult> {
    let resolved = match ctx.require_credential("add a tool") {
        Ok(credential) => {
            ctx.gateway
                .resolve_identifier(&args.job_name, credential)
                .await
        }
        Err(e) => Err(e),
    };

    // Every add-tool call counts as a change, including one that added nothing.
    let tools = match resolved {
        Ok(tools) if !tools.is_empty() => tools,
        Ok(_) => {
            ctx.registry.touch();
            return Ok(CallToolResult::success(vec![Content::text(format!(
                "No tools were added for {}",
                args.job_name
            ))]));
        }
        Err(e) => {
            ctx.registry.touch();
            return Err(e);
        }
    };

    let content = tools
        .iter()
        .map(|tool| {
            Content::text(format!(
                "Job added: {} (tool name: {})",
                tool.display_label, tool.name
            ))
        })
        .collect();
    ctx.registry.upsert(tools);
    Ok(CallToolResult::success(content))
}

fn remove_tool(ctx: HelperContext<'_>, args: RemoveToolArgs) -> CallToolResult {
    let name = ctx
        .registry
        .find(&args.tool_name)
        .map(|tool| tool.name.clone())
        .unwrap_or_else(|| job_tool_name(&args.tool_name));
    ctx.registry.remove(&name);
    info!("remove-tool: {}", name);
    CallToolResult::success(vec![Content::text(format!("Tool {} was removed", name))])
}

fn prune_store_entry(entry: &Value) -> Value {
    let Some(fields) = entry.as_object() else {
        return entry.clone();
    };
    let pruned: Map<String, Value> = STORE_FIELDS
        .iter()
        .filter_map(|key| fields.get(*key).map(|v| (key.to_string(), v.clone())))
        .collect();
    Value::Object(pruned)
}

async fn search(ctx: HelperContext<'_>, args: SearchArgs) -> McpResult<CallToolResult> {
    let search = args.search.trim();
    if search.is_empty() {
        return Ok(CallToolResult::success(vec![Content::text(
            EMPTY_SEARCH_MESSAGE,
        )]));
    }

    let query = StoreQuery {
        search: search.to_string(),
        limit: args.limit.clamp(1, SEARCH_MAX_LIMIT),
        offset: args.offset,
        category: args.category.filter(|c| !c.is_empty()),
    };
    let entries = ctx
        .gateway
        .backend()
        .search_jobs(&query, ctx.credential)
        .await?;

    if entries.is_empty() {
        return Ok(CallToolResult::success(vec![Content::text(format!(
            "No jobs found for '{}'",
            search
        ))]));
    }

    Ok(CallToolResult::success(
        entries
            .iter()
            .map(|entry| Content::text(prune_store_entry(entry).to_string()))
            .collect(),
    ))
}

async fn tool_details(ctx: HelperContext<'_>, args: DetailsArgs) -> McpResult<CallToolResult> {
    let credential = ctx.require_credential("read job details")?;
    let definition = ctx
        .gateway
        .backend()
        .get_job_definition(&args.job_name, credential)
        .await?;

    let limit = args
        .limit
        .min(ctx.gateway.config().limits.readme_max_chars);
    let readme: Option<String> = definition
        .readme
        .as_deref()
        .map(|r| r.chars().take(limit).collect());
    let schema = SchemaTransformer::preview(definition.input_schema.as_ref()).to_object();

    let details = json!({
        "fullName": definition.full_name,
        "toolName": job_tool_name(&definition.full_name),
        "description": definition.description.unwrap_or_default(),
        "readme": readme,
        "inputSchema": schema,
    });
    Ok(CallToolResult::success(vec![Content::text(
        details.to_string(),
    )]))
}

async fn job_output(ctx: HelperContext<'_>, args: OutputArgs) -> McpResult<CallToolResult> {
    let credential = ctx.require_credential("read job output")?;
    let page = ctx
        .gateway
        .backend()
        .get_job_result(&args.dataset_id, args.offset, Some(args.limit), credential)
        .await?;

    let budget = ctx.gateway.config().limits.output_max_chars_per_item;
    let total = page
        .total
        .map(|t| t.to_string())
        .unwrap_or_else(|| "unknown".to_string());
    let mut content = Vec::with_capacity(page.items.len() + 1);
    content.push(Content::text(format!(
        "Dataset {}: {} items from offset {} (total: {}).",
        args.dataset_id,
        page.items.len(),
        page.offset,
        total
    )));
    content.extend(
        page.items
            .iter()
            .map(|item| Content::text(truncate_item(&item.to_string(), budget))),
    );
    Ok(CallToolResult::success(content))
}
