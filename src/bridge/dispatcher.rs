//! The meta-tool dispatcher: translates the eight bridge meta-tools into
//! downstream MCP calls, orchestrating the connection manager, schema
//! cache, result store, and retry policy.

use std::sync::Arc;
use std::time::Instant;

use rmcp::model::CallToolResult;
use serde_json::{Map, Value, json};
use tokio_util::sync::CancellationToken;

use crate::bridge::BridgeSettings;
use crate::bridge::connection::{ConnectionManager, Downstream};
use crate::bridge::error::BridgeError;
use crate::bridge::results::ResultStore;
use crate::bridge::retry::{self, RetryPolicy};
use crate::bridge::schema_cache::ToolSchemaCache;
use crate::config::ConfigRegistry;

pub const LIST_SERVERS: &str = "list_servers";
pub const LIST_MCP_TOOLS: &str = "list_mcp_tools";
pub const GET_TOOL_SCHEMA: &str = "get_tool_schema";
pub const CALL_MCP_TOOL: &str = "call_mcp_tool";
pub const GET_RESULT: &str = "get_result";
pub const LIST_RESULTS: &str = "list_results";
pub const CHECK_SERVER_HEALTH: &str = "check_server_health";
pub const GET_BRIDGE_STATS: &str = "get_bridge_stats";

/// Longest tool description echoed by verbose list_mcp_tools.
const MAX_LISTED_DESCRIPTION: usize = 100;

/// What a meta-tool invocation produced: either a payload to return, or an
/// error envelope to return flagged as an error.
#[derive(Debug)]
pub enum DispatchOutcome {
    Success(Value),
    Failure(Value),
}

pub struct Dispatcher {
    registry: Arc<ConfigRegistry>,
    connections: Arc<dyn Downstream>,
    schema_cache: ToolSchemaCache,
    results: Arc<ResultStore>,
    retry: RetryPolicy,
    shutdown: CancellationToken,
    started_at: Instant,
}

impl Dispatcher {
    pub fn new(
        registry: Arc<ConfigRegistry>,
        settings: BridgeSettings,
        shutdown: CancellationToken,
    ) -> Self {
        let connections = Arc::new(ConnectionManager::new(
            registry.clone(),
            settings.connection_timeout,
            shutdown.clone(),
        ));
        Self::with_connections(registry, settings, shutdown, connections)
    }

    /// Seam for substituting the downstream implementation in tests.
    pub(crate) fn with_connections(
        registry: Arc<ConfigRegistry>,
        settings: BridgeSettings,
        shutdown: CancellationToken,
        connections: Arc<dyn Downstream>,
    ) -> Self {
        Self {
            registry,
            connections,
            schema_cache: ToolSchemaCache::new(settings.tool_cache_ttl),
            results: Arc::new(ResultStore::new(settings.result_ttl, settings.compaction)),
            retry: settings.retry,
            shutdown,
            started_at: Instant::now(),
        }
    }

    /// The result store, shared with the background expiry sweep.
    pub fn results(&self) -> Arc<ResultStore> {
        self.results.clone()
    }

    /// Close every downstream connection. Called once on clean shutdown.
    pub async fn close(&self) {
        self.connections.shutdown_all().await;
    }

    /// Route one meta-tool invocation.
    pub async fn dispatch(&self, meta_tool: &str, args: &Map<String, Value>) -> DispatchOutcome {
        let started = Instant::now();
        let result = match meta_tool {
            LIST_SERVERS => self.list_servers().await,
            LIST_MCP_TOOLS => self.list_mcp_tools(args).await,
            GET_TOOL_SCHEMA => self.get_tool_schema(args).await,
            CALL_MCP_TOOL => return self.call_mcp_tool(args, started).await,
            GET_RESULT => self.get_result(args),
            LIST_RESULTS => self.list_results(),
            CHECK_SERVER_HEALTH => self.check_server_health(args).await,
            GET_BRIDGE_STATS => self.bridge_stats().await,
            other => Err(BridgeError::ToolNotFound {
                server: "bridge".to_string(),
                tool: other.to_string(),
                available: format!(
                    "{LIST_SERVERS}, {LIST_MCP_TOOLS}, {GET_TOOL_SCHEMA}, {CALL_MCP_TOOL}, \
                     {GET_RESULT}, {LIST_RESULTS}, {CHECK_SERVER_HEALTH}, {GET_BRIDGE_STATS}"
                ),
            }),
        };

        match result {
            Ok(value) => DispatchOutcome::Success(value),
            Err(error) => DispatchOutcome::Failure(self.error_envelope(
                &error,
                str_arg(args, "server"),
                str_arg(args, "tool"),
                None,
                None,
            )),
        }
    }

    async fn list_servers(&self) -> Result<Value, BridgeError> {
        let mut entries: Vec<(&String, &crate::config::ServerDescriptor)> =
            self.registry.iter_enabled().collect();
        entries.sort_by_key(|(name, _)| name.as_str());

        let mut servers = Vec::with_capacity(entries.len());
        for (name, descriptor) in entries {
            let status = if self.connections.is_connected(name).await {
                "connected"
            } else {
                "available"
            };
            servers.push(json!({
                "name": name,
                "description": descriptor
                    .description
                    .clone()
                    .unwrap_or_else(|| format!("MCP server '{name}'")),
                "status": status,
            }));
        }
        Ok(json!({ "servers": servers, "count": servers.len() }))
    }

    async fn list_mcp_tools(&self, args: &Map<String, Value>) -> Result<Value, BridgeError> {
        let server = require_str(args, "server")?;
        let verbose = flag(args, "verbose");
        let refresh = flag(args, "refresh");

        if refresh {
            self.schema_cache.invalidate(&server);
        }
        let tools = self
            .schema_cache
            .server_tools(self.connections.as_ref(), &server, refresh)
            .await?;

        let listed: Vec<Value> = if verbose {
            tools
                .iter()
                .map(|t| {
                    json!({
                        "name": t.name,
                        "description": t
                            .description
                            .as_deref()
                            .map(truncate_description)
                            .unwrap_or_default(),
                    })
                })
                .collect()
        } else {
            tools.iter().map(|t| json!(t.name)).collect()
        };

        Ok(json!({
            "server": server,
            "count": tools.len(),
            "tools": listed,
            "hint": "Use get_tool_schema(server, tool) to see a tool's parameters.",
        }))
    }

    async fn get_tool_schema(&self, args: &Map<String, Value>) -> Result<Value, BridgeError> {
        let server = require_str(args, "server")?;
        let tool = require_str(args, "tool")?;
        let info = self
            .schema_cache
            .tool_schema(self.connections.as_ref(), &server, &tool)
            .await?;
        Ok(json!({
            "server": server,
            "name": info.name,
            "description": info.description,
            "input_schema": info.input_schema,
        }))
    }

    async fn call_mcp_tool(&self, args: &Map<String, Value>, started: Instant) -> DispatchOutcome {
        let (server, tool) = match (require_str(args, "server"), require_str(args, "tool")) {
            (Ok(server), Ok(tool)) => (server, tool),
            (Err(e), _) | (_, Err(e)) => {
                return DispatchOutcome::Failure(self.error_envelope(
                    &e,
                    str_arg(args, "server"),
                    str_arg(args, "tool"),
                    None,
                    None,
                ));
            }
        };
        let arguments = args
            .get("arguments")
            .and_then(Value::as_object)
            .cloned()
            .unwrap_or_default();
        let force_compact = flag(args, "compact");

        let outcome = retry::run_with_retry(
            &self.retry,
            &self.shutdown,
            |_attempt| {
                let server = server.clone();
                let tool = tool.clone();
                let arguments = arguments.clone();
                async move {
                    match self.connections.call_tool(&server, &tool, arguments).await {
                        Ok(response) => Ok(response),
                        Err(e) => {
                            // Any call error faults the connection; connection
                            // errors additionally drop the cached handle so the
                            // next attempt rebuilds the child from scratch
                            self.connections.mark_faulted(&server).await;
                            if e.is_connection_error() {
                                self.connections.invalidate(&server).await;
                            }
                            Err(e)
                        }
                    }
                }
            },
            |error| {
                log::warn!("call to '{server}/{tool}' failed, will retry: {error}");
            },
        )
        .await;

        let elapsed_ms = started.elapsed().as_millis() as u64;
        let response = match outcome {
            Ok(response) => response,
            Err(failure) => {
                log::error!(
                    "call to '{server}/{tool}' failed after {} attempt(s): {}",
                    failure.attempts,
                    failure.error
                );
                return DispatchOutcome::Failure(self.error_envelope(
                    &failure.error,
                    Some(server),
                    Some(tool),
                    Some(elapsed_ms),
                    Some(failure.attempts),
                ));
            }
        };

        if response.is_error.unwrap_or(false) {
            let message = first_text(&response)
                .unwrap_or_else(|| "tool reported an error".to_string());
            let error = BridgeError::DownstreamTool {
                server: server.clone(),
                tool: tool.clone(),
                message,
            };
            return DispatchOutcome::Failure(self.error_envelope(
                &error,
                Some(server),
                Some(tool),
                Some(elapsed_ms),
                None,
            ));
        }

        let payload = extract_payload(&response);
        let mut envelope = self.results.store(payload, &server, &tool, force_compact);
        let compacted = envelope
            .get("compacted")
            .and_then(Value::as_bool)
            .unwrap_or(false);
        if compacted && let Some(obj) = envelope.as_object_mut() {
            obj.insert("elapsed_ms".to_string(), json!(elapsed_ms));
        }
        DispatchOutcome::Success(envelope)
    }

    fn get_result(&self, args: &Map<String, Value>) -> Result<Value, BridgeError> {
        let result_id = require_str(args, "result_id")?;
        self.results.get(&result_id)
    }

    fn list_results(&self) -> Result<Value, BridgeError> {
        let results = self.results.list();
        Ok(json!({ "count": results.len(), "results": results }))
    }

    async fn check_server_health(&self, args: &Map<String, Value>) -> Result<Value, BridgeError> {
        let targets: Vec<String> = match str_arg(args, "server") {
            Some(server) => vec![server],
            None => self.registry.enabled_names(),
        };

        let mut servers = Vec::with_capacity(targets.len());
        let mut healthy = 0usize;
        for name in &targets {
            let probe_start = Instant::now();
            // Per-server failures are captured in the report, never surfaced
            match self
                .schema_cache
                .server_tools(self.connections.as_ref(), name, false)
                .await
            {
                Ok(tools) => {
                    healthy += 1;
                    servers.push(json!({
                        "server": name,
                        "status": "healthy",
                        "response_time_ms": probe_start.elapsed().as_millis() as u64,
                        "tool_count": tools.len(),
                    }));
                }
                Err(e) => {
                    servers.push(json!({
                        "server": name,
                        "status": "error",
                        "response_time_ms": probe_start.elapsed().as_millis() as u64,
                        "error": e.to_string(),
                    }));
                }
            }
        }

        Ok(json!({
            "servers": servers,
            "summary": {
                "total": targets.len(),
                "healthy": healthy,
                "unhealthy": targets.len() - healthy,
            },
        }))
    }

    async fn bridge_stats(&self) -> Result<Value, BridgeError> {
        let compaction = self.results.compaction();
        Ok(json!({
            "version": env!("CARGO_PKG_VERSION"),
            "configured_servers": self.registry.len(),
            "connected_servers": self.connections.connected_count().await,
            // Flattened count: total tools summed over every cache entry
            "cached_tools": self.schema_cache.tool_count(),
            "cache_entries": self.schema_cache.entry_count(),
            "memory": process_memory(),
            "uptime_seconds": self.started_at.elapsed().as_secs(),
            "compaction": {
                "size_threshold_bytes": compaction.size_threshold,
                "row_threshold": compaction.row_threshold,
                "max_preview_rows": compaction.max_preview_rows,
                "max_preview_chars": compaction.max_preview_chars,
                "result_ttl_seconds": self.results.ttl().as_secs(),
            },
        }))
    }

    fn error_envelope(
        &self,
        error: &BridgeError,
        server: Option<String>,
        tool: Option<String>,
        elapsed_ms: Option<u64>,
        attempts: Option<u32>,
    ) -> Value {
        let mut envelope = Map::new();
        envelope.insert("error".to_string(), json!(error.to_string()));
        if let Some(server) = server {
            envelope.insert("server".to_string(), json!(server));
        }
        if let Some(tool) = tool {
            envelope.insert("tool".to_string(), json!(tool));
        }
        if let Some(elapsed_ms) = elapsed_ms {
            envelope.insert("elapsed_ms".to_string(), json!(elapsed_ms));
        }
        if let Some(attempts) = attempts {
            envelope.insert("attempts".to_string(), json!(attempts));
        }
        envelope.insert(
            "hint".to_string(),
            json!(error.hint(&self.registry.enabled_names())),
        );
        Value::Object(envelope)
    }
}

/// Canonical payload of a downstream response: text content is JSON-decoded
/// when possible and kept as a raw string otherwise; responses without text
/// content are used verbatim.
fn extract_payload(response: &CallToolResult) -> Value {
    if let Some(text) = first_text(response) {
        serde_json::from_str(&text).unwrap_or(Value::String(text))
    } else {
        serde_json::to_value(response).unwrap_or(Value::Null)
    }
}

fn first_text(response: &CallToolResult) -> Option<String> {
    response
        .content
        .first()
        .and_then(|c| c.as_text())
        .map(|t| t.text.clone())
}

fn require_str(args: &Map<String, Value>, key: &'static str) -> Result<String, BridgeError> {
    args.get(key)
        .and_then(Value::as_str)
        .map(str::to_owned)
        .ok_or(BridgeError::ArgumentMissing(key))
}

fn str_arg(args: &Map<String, Value>, key: &str) -> Option<String> {
    args.get(key).and_then(Value::as_str).map(str::to_owned)
}

fn flag(args: &Map<String, Value>, key: &str) -> bool {
    args.get(key).and_then(Value::as_bool).unwrap_or(false)
}

fn truncate_description(description: &str) -> String {
    if description.chars().count() <= MAX_LISTED_DESCRIPTION {
        return description.to_string();
    }
    let mut truncated: String = description
        .chars()
        .take(MAX_LISTED_DESCRIPTION - 3)
        .collect();
    truncated.push_str("...");
    truncated
}

fn process_memory() -> Value {
    let Ok(pid) = sysinfo::get_current_pid() else {
        return json!({ "resident_mib": 0.0, "virtual_mib": 0.0 });
    };
    let mut system = sysinfo::System::new();
    system.refresh_processes(sysinfo::ProcessesToUpdate::Some(&[pid]), true);
    match system.process(pid) {
        Some(process) => json!({
            "resident_mib": mib(process.memory()),
            "virtual_mib": mib(process.virtual_memory()),
        }),
        None => json!({ "resident_mib": 0.0, "virtual_mib": 0.0 }),
    }
}

fn mib(bytes: u64) -> f64 {
    (bytes as f64 / (1024.0 * 1024.0) * 10.0).round() / 10.0
}
