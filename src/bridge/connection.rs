//! Downstream connection manager: lazy child-process spawn, caching, and
//! eviction on failure.
//!
//! The manager is the sole mutator of the slot map. Each server gets one
//! slot guarded by its own async mutex, so concurrent requests for the same
//! server serialize behind a single connect attempt while different servers
//! connect in parallel.

use std::process::Stdio;
use std::sync::Arc;
use std::time::{Duration, Instant};

use dashmap::DashMap;
use rmcp::RoleClient;
use rmcp::ServiceExt;
use rmcp::model::{
    CallToolRequestParam, CallToolResult, ClientCapabilities, ClientInfo, Implementation,
};
use rmcp::service::{Peer, RunningService};
use rmcp::transport::TokioChildProcess;
use tokio::process::Command;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;

use crate::bridge::error::{self, BridgeError};
use crate::config::{ConfigRegistry, ServerDescriptor, STDIO_TRANSPORT};

/// The downstream call surface the dispatcher and schema cache depend on.
///
/// The connection manager is the production implementation; tests
/// substitute scripted doubles behind the same trait.
#[async_trait::async_trait]
pub trait Downstream: Send + Sync {
    /// Tool list for `server`, connecting lazily.
    async fn list_tools(&self, server: &str) -> Result<Vec<rmcp::model::Tool>, BridgeError>;

    /// Invoke `tool` on `server`, connecting lazily.
    async fn call_tool(
        &self,
        server: &str,
        tool: &str,
        arguments: serde_json::Map<String, serde_json::Value>,
    ) -> Result<CallToolResult, BridgeError>;

    /// Mark the connection faulted; the handle is rebuilt on the next request.
    async fn mark_faulted(&self, server: &str);

    /// Drop the cached connection for `server`, closing the child.
    async fn invalidate(&self, server: &str);

    async fn is_connected(&self, server: &str) -> bool;

    async fn connected_count(&self) -> usize;

    /// Close every live handle. Errors are logged and ignored.
    async fn shutdown_all(&self);
}

/// Cheap-to-clone handle for talking to one downstream server.
///
/// Holds only the peer; the owning service stays inside the manager's slot,
/// which is the one place allowed to close it.
#[derive(Clone, Debug)]
pub struct DownstreamClient {
    server: String,
    peer: Peer<RoleClient>,
}

impl DownstreamClient {
    pub async fn list_tools(&self) -> Result<Vec<rmcp::model::Tool>, BridgeError> {
        self.peer
            .list_all_tools()
            .await
            .map_err(|e| classify_call_error(&self.server, "tools/list", &e.to_string()))
    }

    pub async fn call_tool(
        &self,
        tool: &str,
        arguments: serde_json::Map<String, serde_json::Value>,
    ) -> Result<CallToolResult, BridgeError> {
        self.peer
            .call_tool(CallToolRequestParam {
                name: tool.to_string().into(),
                arguments: Some(arguments),
            })
            .await
            .map_err(|e| classify_call_error(&self.server, tool, &e.to_string()))
    }
}

/// Transport faults are retryable; anything else is a deterministic
/// downstream failure and propagates as-is.
fn classify_call_error(server: &str, tool: &str, message: &str) -> BridgeError {
    if error::is_transport_fault(message) {
        BridgeError::DownstreamTransport {
            server: server.to_string(),
            message: message.to_string(),
        }
    } else {
        BridgeError::DownstreamTool {
            server: server.to_string(),
            tool: tool.to_string(),
            message: message.to_string(),
        }
    }
}

#[derive(Default)]
struct ConnectionSlot {
    service: Option<RunningService<RoleClient, ClientInfo>>,
    connected: bool,
    /// Diagnostic timestamp, kept for the lifetime of the slot
    #[allow(dead_code)]
    last_connected_at: Option<Instant>,
}

/// Owns every downstream child process and its client service.
pub struct ConnectionManager {
    registry: Arc<ConfigRegistry>,
    slots: DashMap<String, Arc<Mutex<ConnectionSlot>>>,
    connect_timeout: Duration,
    shutdown: CancellationToken,
}

impl ConnectionManager {
    pub fn new(
        registry: Arc<ConfigRegistry>,
        connect_timeout: Duration,
        shutdown: CancellationToken,
    ) -> Self {
        Self {
            registry,
            slots: DashMap::new(),
            connect_timeout,
            shutdown,
        }
    }

    /// A live client handle for `server`, connecting lazily.
    ///
    /// Descriptor validation happens before any slot exists, so an unknown
    /// or disabled name never spawns a process.
    pub async fn get(&self, server: &str) -> Result<DownstreamClient, BridgeError> {
        let descriptor = self
            .registry
            .get(server)
            .ok_or_else(|| BridgeError::UnknownServer(server.to_string()))?;
        if !descriptor.enabled {
            return Err(BridgeError::ServerDisabled(server.to_string()));
        }
        if descriptor.transport != STDIO_TRANSPORT {
            return Err(BridgeError::UnsupportedTransport {
                server: server.to_string(),
                transport: descriptor.transport.clone(),
            });
        }
        let descriptor = descriptor.clone();

        let slot = self
            .slots
            .entry(server.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(ConnectionSlot::default())))
            .clone();
        let mut slot = slot.lock().await;

        if slot.connected
            && let Some(service) = slot.service.as_ref()
        {
            return Ok(DownstreamClient {
                server: server.to_string(),
                peer: service.peer().clone(),
            });
        }

        // Stale handle from a faulted connection; close it before rebuilding
        if let Some(old) = slot.service.take() {
            let _ = old.cancel().await;
        }

        match self.connect(server, &descriptor).await {
            Ok(service) => {
                let client = DownstreamClient {
                    server: server.to_string(),
                    peer: service.peer().clone(),
                };
                slot.service = Some(service);
                slot.connected = true;
                slot.last_connected_at = Some(Instant::now());
                log::info!("connected to server '{server}' ({})", descriptor.command);
                Ok(client)
            }
            Err(e) => {
                slot.connected = false;
                Err(e)
            }
        }
    }

    async fn connect(
        &self,
        server: &str,
        descriptor: &ServerDescriptor,
    ) -> Result<RunningService<RoleClient, ClientInfo>, BridgeError> {
        let mut cmd = Command::new(&descriptor.command);
        cmd.args(&descriptor.args)
            .envs(&descriptor.env)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit());
        if let Some(cwd) = &descriptor.cwd {
            cmd.current_dir(cwd);
        }

        let transport = TokioChildProcess::new(cmd).map_err(|e| BridgeError::SpawnFailed {
            server: server.to_string(),
            command: descriptor.command.clone(),
            message: e.to_string(),
        })?;

        let client_info = ClientInfo {
            protocol_version: Default::default(),
            capabilities: ClientCapabilities::default(),
            client_info: Implementation {
                name: "mcpbridge".to_string(),
                title: None,
                version: env!("CARGO_PKG_VERSION").to_string(),
                website_url: None,
                icons: None,
            },
        };

        log::debug!(
            "connecting to '{server}' (timeout: {:?})",
            self.connect_timeout
        );
        tokio::select! {
            res = client_info.serve(transport) => {
                res.map_err(|e| BridgeError::DownstreamTransport {
                    server: server.to_string(),
                    message: e.to_string(),
                })
            }
            () = tokio::time::sleep(self.connect_timeout) => {
                Err(BridgeError::ConnectTimeout {
                    server: server.to_string(),
                    timeout_secs: self.connect_timeout.as_secs(),
                })
            }
            () = self.shutdown.cancelled() => {
                Err(BridgeError::DownstreamTransport {
                    server: server.to_string(),
                    message: "connect cancelled during shutdown".to_string(),
                })
            }
        }
    }

    /// Number of slots ever created; test hook for the no-spawn invariants.
    #[cfg(test)]
    pub(crate) fn slot_count(&self) -> usize {
        self.slots.len()
    }
}

#[async_trait::async_trait]
impl Downstream for ConnectionManager {
    async fn list_tools(&self, server: &str) -> Result<Vec<rmcp::model::Tool>, BridgeError> {
        self.get(server).await?.list_tools().await
    }

    async fn call_tool(
        &self,
        server: &str,
        tool: &str,
        arguments: serde_json::Map<String, serde_json::Value>,
    ) -> Result<CallToolResult, BridgeError> {
        self.get(server).await?.call_tool(tool, arguments).await
    }

    async fn mark_faulted(&self, server: &str) {
        if let Some(slot) = self.slots.get(server).map(|s| s.clone()) {
            slot.lock().await.connected = false;
        }
    }

    async fn invalidate(&self, server: &str) {
        let Some(slot) = self.slots.get(server).map(|s| s.clone()) else {
            return;
        };
        let mut slot = slot.lock().await;
        slot.connected = false;
        if let Some(service) = slot.service.take() {
            log::debug!("dropping connection to '{server}'");
            if let Err(e) = service.cancel().await {
                log::warn!("error closing connection to '{server}': {e}");
            }
        }
    }

    async fn is_connected(&self, server: &str) -> bool {
        match self.slots.get(server).map(|s| s.clone()) {
            Some(slot) => slot.lock().await.connected,
            None => false,
        }
    }

    async fn connected_count(&self) -> usize {
        let slots: Vec<_> = self.slots.iter().map(|e| e.value().clone()).collect();
        let mut count = 0;
        for slot in slots {
            if slot.lock().await.connected {
                count += 1;
            }
        }
        count
    }

    async fn shutdown_all(&self) {
        let names: Vec<String> = self.slots.iter().map(|e| e.key().clone()).collect();
        for name in names {
            self.invalidate(&name).await;
        }
        log::info!("all downstream connections closed");
    }
}
