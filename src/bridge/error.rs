//! Error types for the bridge engine.

use thiserror::Error;

/// Errors surfaced by the bridge components.
///
/// Only `SpawnFailed`, `ConnectTimeout`, and `DownstreamTransport` are
/// retryable; everything else propagates on first occurrence.
#[derive(Debug, Error)]
pub enum BridgeError {
    /// Configuration could not be loaded or parsed
    #[error("Config error: {0}")]
    Config(String),

    /// No descriptor exists for the requested server name
    #[error("Unknown server: {0}")]
    UnknownServer(String),

    /// The descriptor exists but is disabled
    #[error("Server '{0}' is disabled")]
    ServerDisabled(String),

    /// The descriptor requests a transport other than stdio
    #[error("Server '{server}' uses unsupported transport '{transport}' (only \"stdio\" is supported)")]
    UnsupportedTransport { server: String, transport: String },

    /// The child process could not be spawned
    #[error("Failed to spawn '{command}' for server '{server}': {message}")]
    SpawnFailed {
        server: String,
        command: String,
        message: String,
    },

    /// The connect race lost against the timeout timer
    #[error("Connection to server '{server}' timed out after {timeout_secs}s")]
    ConnectTimeout { server: String, timeout_secs: u64 },

    /// Transport-level fault while talking to a downstream server
    #[error("Transport error from server '{server}': {message}")]
    DownstreamTransport { server: String, message: String },

    /// The named tool is not in the server's tool list
    #[error("Tool '{tool}' not found on server '{server}'. Available tools: {available}")]
    ToolNotFound {
        server: String,
        tool: String,
        available: String,
    },

    /// The downstream tool executed and reported an error
    #[error("Tool '{tool}' on server '{server}' failed: {message}")]
    DownstreamTool {
        server: String,
        tool: String,
        message: String,
    },

    /// No stored result under the given id
    #[error("Result '{0}' not found")]
    ResultMissing(String),

    /// The stored result outlived its TTL
    #[error("Result '{0}' has expired")]
    ResultExpired(String),

    /// A required meta-tool argument was omitted
    #[error("Missing required argument '{0}'")]
    ArgumentMissing(&'static str),
}

impl BridgeError {
    /// Whether the retry loop may try this error again.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::SpawnFailed { .. } | Self::ConnectTimeout { .. } | Self::DownstreamTransport { .. }
        )
    }

    /// Connection errors additionally drop the cached connection before the
    /// next retry attempt so the child is rebuilt from scratch.
    pub fn is_connection_error(&self) -> bool {
        match self {
            Self::SpawnFailed { .. } | Self::ConnectTimeout { .. } => true,
            Self::DownstreamTransport { message, .. } => {
                let lower = message.to_lowercase();
                lower.contains("connect") || lower.contains("spawn") || lower.contains("enoent")
            }
            _ => false,
        }
    }

    /// Human-oriented recovery hint for the error envelope.
    ///
    /// `enabled_servers` is the list of server names the bridge is willing to
    /// talk to, used wherever the fix is "pick a real server".
    pub fn hint(&self, enabled_servers: &[String]) -> String {
        let server_list = || {
            if enabled_servers.is_empty() {
                "none configured".to_string()
            } else {
                enabled_servers.join(", ")
            }
        };
        match self {
            Self::UnknownServer(_) | Self::ServerDisabled(_) => {
                format!("Available servers: {}. Use list_servers for details.", server_list())
            }
            Self::ArgumentMissing(_) => {
                format!("Enabled servers: {}.", server_list())
            }
            Self::ConnectTimeout { .. } => {
                "The server may still be starting up; retry the call.".to_string()
            }
            Self::SpawnFailed { .. } => {
                "Server command not found. Check the 'command' path in the bridge config.".to_string()
            }
            Self::ResultMissing(_) | Self::ResultExpired(_) => {
                "Use list_results to see which results are still stored.".to_string()
            }
            Self::ToolNotFound { server, .. } => {
                format!("Use list_mcp_tools(server=\"{server}\") to see the available tools.")
            }
            _ => "Use list_servers and list_mcp_tools to discover servers and tools.".to_string(),
        }
    }
}

/// Message-level classification of transport faults.
///
/// Applied to rendered errors coming out of the MCP SDK, where no structured
/// kind survives. Matches the usual suspects: refused/reset connections,
/// missing executables, timeouts, DNS failures, and dropped sockets.
pub fn is_transport_fault(message: &str) -> bool {
    let lower = message.to_lowercase();
    const MARKERS: &[&str] = &[
        "connection refused",
        "econnrefused",
        "enoent",
        "no such file",
        "connection reset",
        "econnreset",
        "timed out",
        "timeout",
        "spawn",
        "socket hang up",
        "dns",
        "getaddrinfo",
        "broken pipe",
        "connection closed",
        "transport",
    ];
    MARKERS.iter().any(|m| lower.contains(m))
}
