//! Static metadata for the eight bridge meta-tools.
//!
//! The meta-tool surface is fixed: names, descriptions, and input schemas
//! are baked in and served without touching any downstream server.

use once_cell::sync::Lazy;
use schemars::{JsonSchema, schema_for};
use serde::Deserialize;
use serde_json::Value;

use crate::bridge::dispatcher::{
    CALL_MCP_TOOL, CHECK_SERVER_HEALTH, GET_BRIDGE_STATS, GET_RESULT, GET_TOOL_SCHEMA,
    LIST_MCP_TOOLS, LIST_RESULTS, LIST_SERVERS,
};

/// Metadata for a single meta-tool.
#[derive(Debug, Clone)]
pub struct MetaToolMetadata {
    pub name: &'static str,
    pub description: &'static str,
    pub schema: Value,
}

/// Helper to build a JSON schema from an Args type.
fn build_schema<T: JsonSchema>() -> Value {
    serde_json::to_value(schema_for!(T)).unwrap_or(Value::Null)
}

/// Arguments for `list_servers`
#[derive(Debug, Deserialize, JsonSchema)]
pub struct ListServersArgs {}

/// Arguments for `list_mcp_tools`
#[derive(Debug, Deserialize, JsonSchema)]
pub struct ListMcpToolsArgs {
    /// Name of the configured server to list tools for
    pub server: String,

    /// Include tool descriptions instead of bare names
    #[serde(default)]
    pub verbose: bool,

    /// Bypass the cache and fetch a fresh tool list
    #[serde(default)]
    pub refresh: bool,
}

/// Arguments for `get_tool_schema`
#[derive(Debug, Deserialize, JsonSchema)]
pub struct GetToolSchemaArgs {
    /// Name of the configured server
    pub server: String,

    /// Tool whose input schema to fetch
    pub tool: String,
}

/// Arguments for `call_mcp_tool`
#[derive(Debug, Deserialize, JsonSchema)]
pub struct CallMcpToolArgs {
    /// Name of the configured server
    pub server: String,

    /// Tool to invoke on that server
    pub tool: String,

    /// Arguments passed through to the downstream tool unchanged
    #[serde(default)]
    pub arguments: serde_json::Map<String, Value>,

    /// Force compaction even for small results
    #[serde(default)]
    pub compact: bool,
}

/// Arguments for `get_result`
#[derive(Debug, Deserialize, JsonSchema)]
pub struct GetResultArgs {
    /// Id returned in a compacted response
    pub result_id: String,
}

/// Arguments for `list_results`
#[derive(Debug, Deserialize, JsonSchema)]
pub struct ListResultsArgs {}

/// Arguments for `check_server_health`
#[derive(Debug, Deserialize, JsonSchema)]
pub struct CheckServerHealthArgs {
    /// Check a single server instead of all enabled ones
    #[serde(default)]
    pub server: Option<String>,
}

/// Arguments for `get_bridge_stats`
#[derive(Debug, Deserialize, JsonSchema)]
pub struct GetBridgeStatsArgs {}

static META_TOOLS: Lazy<Vec<MetaToolMetadata>> = Lazy::new(|| {
    vec![
        MetaToolMetadata {
            name: LIST_SERVERS,
            description: "List the downstream MCP servers this bridge can talk to. Start here: \
                          every other meta-tool takes one of these server names.",
            schema: build_schema::<ListServersArgs>(),
        },
        MetaToolMetadata {
            name: LIST_MCP_TOOLS,
            description: "List the tools a downstream server exposes. Results are cached for a \
                          few minutes; pass refresh=true to force a fresh fetch.",
            schema: build_schema::<ListMcpToolsArgs>(),
        },
        MetaToolMetadata {
            name: GET_TOOL_SCHEMA,
            description: "Fetch the full input schema of one downstream tool, for building \
                          call_mcp_tool arguments.",
            schema: build_schema::<GetToolSchemaArgs>(),
        },
        MetaToolMetadata {
            name: CALL_MCP_TOOL,
            description: "Invoke a tool on a downstream server. Large results are replaced by a \
                          preview plus a result_id; fetch the full payload with get_result.",
            schema: build_schema::<CallMcpToolArgs>(),
        },
        MetaToolMetadata {
            name: GET_RESULT,
            description: "Fetch the full payload of a previously compacted result by its \
                          result_id. Results expire after a few minutes.",
            schema: build_schema::<GetResultArgs>(),
        },
        MetaToolMetadata {
            name: LIST_RESULTS,
            description: "List the compacted results still held in memory, with their ages and \
                          time to expiry.",
            schema: build_schema::<ListResultsArgs>(),
        },
        MetaToolMetadata {
            name: CHECK_SERVER_HEALTH,
            description: "Probe one or all enabled servers by fetching their tool lists, \
                          reporting per-server status and response time.",
            schema: build_schema::<CheckServerHealthArgs>(),
        },
        MetaToolMetadata {
            name: GET_BRIDGE_STATS,
            description: "Bridge diagnostics: configured and connected servers, cache and \
                          result-store sizes, memory usage, and uptime.",
            schema: build_schema::<GetBridgeStatsArgs>(),
        },
    ]
});

/// All meta-tools, in the order they are advertised upstream.
pub fn meta_tools() -> &'static [MetaToolMetadata] {
    &META_TOOLS
}

pub fn is_meta_tool(name: &str) -> bool {
    META_TOOLS.iter().any(|t| t.name == name)
}
