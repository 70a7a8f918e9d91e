//! The upstream-facing MCP server: serves the eight meta-tools over stdio
//! and forwards their semantics to the dispatcher.

use std::sync::Arc;

use anyhow::Result;
use rmcp::{
    ErrorData as McpError, RoleServer, ServerHandler, ServiceExt,
    model::{
        CallToolRequestParam, CallToolResult, Content, Implementation, InitializeResult,
        ListPromptsResult, ListResourcesResult, ListToolsResult, PaginatedRequestParam,
        ProtocolVersion, ServerCapabilities, ServerInfo, Tool,
    },
    service::RequestContext,
    transport::stdio,
};
use tokio_util::sync::CancellationToken;

use super::metadata;
use crate::bridge::dispatcher::{DispatchOutcome, Dispatcher};

/// MCP server exposing the bridge meta-tools over stdio.
pub struct BridgeServer {
    dispatcher: Arc<Dispatcher>,
}

impl BridgeServer {
    pub fn new(dispatcher: Arc<Dispatcher>) -> Self {
        Self { dispatcher }
    }

    /// Serve the stdio transport until the upstream client disconnects or
    /// the shutdown token fires.
    pub async fn serve_stdio(self, shutdown: CancellationToken) -> Result<()> {
        log::info!("starting stdio server ({} meta-tools)", metadata::meta_tools().len());

        let service = self.serve(stdio()).await.inspect_err(|e| {
            log::error!("serving error: {e:?}");
        })?;

        tokio::select! {
            res = service.waiting() => {
                res?;
                log::info!("upstream client disconnected");
            }
            () = shutdown.cancelled() => {
                log::info!("shutdown signal received, stopping stdio server");
            }
        }
        Ok(())
    }
}

impl ServerHandler for BridgeServer {
    fn get_info(&self) -> ServerInfo {
        ServerInfo {
            protocol_version: ProtocolVersion::V_2024_11_05,
            capabilities: ServerCapabilities::builder().enable_tools().build(),
            server_info: Implementation::from_build_env(),
            instructions: Some(
                "MCP bridge - one server fronting many. Use list_servers to discover \
                 downstream servers, list_mcp_tools/get_tool_schema to inspect their tools, \
                 and call_mcp_tool to invoke them. Large results come back as a preview with \
                 a result_id; fetch the full payload with get_result."
                    .to_string(),
            ),
        }
    }

    async fn call_tool(
        &self,
        request: CallToolRequestParam,
        _context: RequestContext<RoleServer>,
    ) -> Result<CallToolResult, McpError> {
        let tool_name = request.name.clone();
        if !metadata::is_meta_tool(&tool_name) {
            return Err(McpError::invalid_params(
                format!("Unknown tool: {tool_name}"),
                None,
            ));
        }

        let args = request.arguments.unwrap_or_default();
        log::debug!("dispatching meta-tool '{tool_name}'");

        match self.dispatcher.dispatch(&tool_name, &args).await {
            DispatchOutcome::Success(value) => {
                Ok(CallToolResult::success(vec![Content::text(render(&value))]))
            }
            DispatchOutcome::Failure(envelope) => {
                Ok(CallToolResult::error(vec![Content::text(render(&envelope))]))
            }
        }
    }

    async fn list_tools(
        &self,
        _request: Option<PaginatedRequestParam>,
        _context: RequestContext<RoleServer>,
    ) -> Result<ListToolsResult, McpError> {
        let tools = metadata::meta_tools()
            .iter()
            .map(|meta| {
                let schema_obj = match meta.schema.clone() {
                    serde_json::Value::Object(obj) => Arc::new(obj),
                    _ => Arc::new(serde_json::Map::new()),
                };
                Tool {
                    name: meta.name.into(),
                    title: None,
                    description: Some(meta.description.into()),
                    input_schema: schema_obj,
                    output_schema: None,
                    annotations: None,
                    icons: None,
                    meta: None,
                }
            })
            .collect();

        Ok(ListToolsResult::with_all_items(tools))
    }

    async fn list_prompts(
        &self,
        _request: Option<PaginatedRequestParam>,
        _context: RequestContext<RoleServer>,
    ) -> Result<ListPromptsResult, McpError> {
        // The bridge only proxies tools
        Ok(ListPromptsResult {
            prompts: vec![],
            next_cursor: None,
        })
    }

    async fn list_resources(
        &self,
        _request: Option<PaginatedRequestParam>,
        _context: RequestContext<RoleServer>,
    ) -> Result<ListResourcesResult, McpError> {
        Ok(ListResourcesResult {
            resources: vec![],
            next_cursor: None,
        })
    }

    async fn initialize(
        &self,
        request: rmcp::model::InitializeRequestParam,
        _context: RequestContext<RoleServer>,
    ) -> Result<InitializeResult, McpError> {
        log::info!(
            "upstream client connected: {} {}",
            request.client_info.name,
            request.client_info.version
        );
        Ok(self.get_info())
    }
}

fn render(value: &serde_json::Value) -> String {
    serde_json::to_string_pretty(value).unwrap_or_else(|_| value.to_string())
}
