//! Per-server tool list cache with a fetch-age TTL.

use std::time::{Duration, Instant};

use dashmap::DashMap;
use serde::Serialize;
use serde_json::Value;

use crate::bridge::connection::Downstream;
use crate::bridge::error::BridgeError;

/// How many tool names a ToolNotFound message enumerates.
const NOT_FOUND_SAMPLE: usize = 10;

/// A downstream tool descriptor, flattened out of the MCP model type.
#[derive(Debug, Clone, Serialize)]
pub struct ToolInfo {
    pub name: String,
    pub description: Option<String>,
    pub input_schema: Value,
}

impl From<rmcp::model::Tool> for ToolInfo {
    fn from(tool: rmcp::model::Tool) -> Self {
        Self {
            name: tool.name.to_string(),
            description: tool.description.map(|d| d.to_string()),
            input_schema: serde_json::to_value(tool.input_schema.as_ref())
                .unwrap_or(Value::Object(Default::default())),
        }
    }
}

struct SchemaCacheEntry {
    tools: Vec<ToolInfo>,
    cached_at: Instant,
}

/// Name-keyed cache of `tools/list` responses. Entries are replaced
/// atomically on refresh; staleness is decided at read time.
pub struct ToolSchemaCache {
    entries: DashMap<String, SchemaCacheEntry>,
    ttl: Duration,
}

impl ToolSchemaCache {
    pub fn new(ttl: Duration) -> Self {
        Self {
            entries: DashMap::new(),
            ttl,
        }
    }

    /// Cached tools for `server`, if the entry is still fresh.
    pub(crate) fn fresh_at(&self, server: &str, now: Instant) -> Option<Vec<ToolInfo>> {
        let entry = self.entries.get(server)?;
        if now.saturating_duration_since(entry.cached_at) < self.ttl {
            Some(entry.tools.clone())
        } else {
            None
        }
    }

    pub(crate) fn insert_at(&self, server: &str, tools: Vec<ToolInfo>, now: Instant) {
        self.entries.insert(
            server.to_string(),
            SchemaCacheEntry {
                tools,
                cached_at: now,
            },
        );
    }

    pub fn invalidate(&self, server: &str) {
        self.entries.remove(server);
    }

    /// Number of cached servers.
    pub fn entry_count(&self) -> usize {
        self.entries.len()
    }

    /// Total tools across every cache entry.
    pub fn tool_count(&self) -> usize {
        self.entries.iter().map(|e| e.tools.len()).sum()
    }

    /// Tool list for `server`, from the cache when fresh, otherwise fetched
    /// over a (possibly new) downstream connection.
    pub async fn server_tools(
        &self,
        connections: &dyn Downstream,
        server: &str,
        refresh: bool,
    ) -> Result<Vec<ToolInfo>, BridgeError> {
        if !refresh
            && let Some(tools) = self.fresh_at(server, Instant::now())
        {
            log::debug!("tool cache hit for '{server}' ({} tools)", tools.len());
            return Ok(tools);
        }

        let tools: Vec<ToolInfo> = connections
            .list_tools(server)
            .await?
            .into_iter()
            .map(ToolInfo::from)
            .collect();
        log::debug!("cached {} tool(s) for '{server}'", tools.len());
        self.insert_at(server, tools.clone(), Instant::now());
        Ok(tools)
    }

    /// Schema lookup by tool name, via the cached list.
    pub async fn tool_schema(
        &self,
        connections: &dyn Downstream,
        server: &str,
        tool: &str,
    ) -> Result<ToolInfo, BridgeError> {
        let tools = self.server_tools(connections, server, false).await?;
        tools
            .iter()
            .find(|t| t.name == tool)
            .cloned()
            .ok_or_else(|| BridgeError::ToolNotFound {
                server: server.to_string(),
                tool: tool.to_string(),
                available: enumerate_names(&tools),
            })
    }
}

fn enumerate_names(tools: &[ToolInfo]) -> String {
    let mut names: Vec<&str> = tools
        .iter()
        .take(NOT_FOUND_SAMPLE)
        .map(|t| t.name.as_str())
        .collect();
    if tools.len() > NOT_FOUND_SAMPLE {
        names.push("...");
    }
    if names.is_empty() {
        "(none)".to_string()
    } else {
        names.join(", ")
    }
}
