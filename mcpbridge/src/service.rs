//! `ServerHandler` implementation exposing the bridge's single `run_python`
//! tool and a read-only capability-digest resource to the outer host.

use std::sync::Arc;

use rmcp::handler::server::ServerHandler;
use rmcp::model::{
    AnnotateAble, CallToolRequestParam, CallToolResult, Content, Implementation, ListResourcesResult,
    ListToolsResult, PaginatedRequestParam, ProtocolVersion, RawResource, ReadResourceRequestParam,
    ReadResourceResult, ResourceContents, ServerCapabilities, ServerInfo, Tool, ToolsCapability,
};
use rmcp::service::{RequestContext, RoleServer};
use rmcp::ErrorData as McpError;
use schemars::JsonSchema;
use serde::Deserialize;
use tracing::warn;

use mcpbridge_core::bridge::Bridge;

use crate::response::ExecuteResponse;

const CAPABILITY_RESOURCE_URI: &str = "mcpbridge://capabilities";

#[derive(Debug, Deserialize, JsonSchema)]
pub struct RunPythonArgs {
    /// Python source to execute as the sandbox's top-level program.
    pub code: String,
    /// Names of pre-authorised downstream MCP servers the code may call.
    #[serde(default)]
    pub servers: Vec<String>,
    /// Wall-clock budget in seconds; clamped to the bridge's configured range.
    #[serde(default)]
    pub timeout: Option<u64>,
}

#[derive(Clone)]
pub struct BridgeService {
    bridge: Arc<Bridge>,
}

impl BridgeService {
    pub fn new(bridge: Arc<Bridge>) -> Self {
        Self { bridge }
    }

    fn run_python_schema() -> serde_json::Map<String, serde_json::Value> {
        let schema = schemars::schema_for!(RunPythonArgs);
        serde_json::to_value(schema)
            .ok()
            .and_then(|v| v.as_object().cloned())
            .unwrap_or_default()
    }

    fn capability_digest(&self) -> String {
        "mcpbridge exposes one tool, run_python(code, servers?, timeout?), which runs \
         Python inside a network-denied, read-only-root container and proxies calls to \
         pre-authorised downstream MCP servers."
            .to_string()
    }
}

impl ServerHandler for BridgeService {
    fn get_info(&self) -> ServerInfo {
        ServerInfo {
            protocol_version: ProtocolVersion::V_2024_11_05,
            capabilities: ServerCapabilities {
                tools: Some(ToolsCapability {
                    list_changed: Some(false),
                }),
                resources: Some(Default::default()),
                ..Default::default()
            },
            server_info: Implementation {
                name: env!("CARGO_PKG_NAME").to_string(),
                title: Some("MCP code-execution bridge".to_string()),
                version: env!("CARGO_PKG_VERSION").to_string(),
                icons: None,
                website_url: None,
            },
            instructions: Some(
                "Call run_python with untrusted code; it runs sandboxed and has no network \
                 or host filesystem access beyond an ephemeral IPC directory."
                    .to_string(),
            ),
        }
    }

    fn list_tools(
        &self,
        _request: Option<PaginatedRequestParam>,
        _context: RequestContext<RoleServer>,
    ) -> impl std::future::Future<Output = Result<ListToolsResult, McpError>> + Send + '_ {
        async move {
            let schema = Self::run_python_schema();
            let tool = Tool {
                name: "run_python".into(),
                title: Some("run_python".to_string()),
                icons: None,
                description: Some(
                    "Execute Python code in a locked-down sandbox, optionally proxying calls \
                     to named downstream MCP servers."
                        .to_string(),
                ),
                input_schema: Arc::new(schema),
                output_schema: None,
                annotations: None,
                meta: None,
            };
            Ok(ListToolsResult {
                meta: None,
                tools: vec![tool],
                next_cursor: None,
            })
        }
    }

    fn call_tool(
        &self,
        params: CallToolRequestParam,
        _context: RequestContext<RoleServer>,
    ) -> impl std::future::Future<Output = Result<CallToolResult, McpError>> + Send + '_ {
        async move {
            if params.name.as_ref() != "run_python" {
                return Err(McpError::invalid_params(
                    format!("unknown tool: {}", params.name),
                    None,
                ));
            }

            let args: RunPythonArgs = match params.arguments {
                Some(map) => match serde_json::from_value(serde_json::Value::Object(map)) {
                    Ok(a) => a,
                    Err(e) => {
                        let response = ExecuteResponse::from_error(
                            mcpbridge_core::error::BridgeError::validation(format!(
                                "invalid arguments: {e}"
                            )),
                        );
                        return Ok(render_response(response));
                    }
                },
                None => {
                    let response = ExecuteResponse::from_error(
                        mcpbridge_core::error::BridgeError::validation("Missing 'code' argument"),
                    );
                    return Ok(render_response(response));
                }
            };

            let result = self
                .bridge
                .execute(&args.code, &args.servers, args.timeout)
                .await;

            let response = match result {
                Ok(sandbox_result) => ExecuteResponse::success(sandbox_result),
                Err(e) => {
                    warn!(error = %e, "run_python execution failed");
                    ExecuteResponse::from_error(e)
                }
            };
            Ok(render_response(response))
        }
    }

    fn list_resources(
        &self,
        _request: Option<PaginatedRequestParam>,
        _context: RequestContext<RoleServer>,
    ) -> impl std::future::Future<Output = Result<ListResourcesResult, McpError>> + Send + '_ {
        async move {
            let resource = RawResource::new(CAPABILITY_RESOURCE_URI, "mcpbridge capabilities")
                .no_annotation();
            Ok(ListResourcesResult {
                meta: None,
                resources: vec![resource],
                next_cursor: None,
            })
        }
    }

    fn read_resource(
        &self,
        request: ReadResourceRequestParam,
        _context: RequestContext<RoleServer>,
    ) -> impl std::future::Future<Output = Result<ReadResourceResult, McpError>> + Send + '_ {
        async move {
            if request.uri != CAPABILITY_RESOURCE_URI {
                return Err(McpError::resource_not_found(
                    format!("unknown resource: {}", request.uri),
                    None,
                ));
            }
            Ok(ReadResourceResult {
                contents: vec![ResourceContents::text(
                    self.capability_digest(),
                    CAPABILITY_RESOURCE_URI,
                )],
            })
        }
    }
}

fn render_response(response: ExecuteResponse) -> CallToolResult {
    let is_error = response.is_error;
    let text = serde_json::to_string(&response).unwrap_or_else(|_| response.summary.clone());
    CallToolResult {
        content: vec![Content::text(text)],
        is_error: Some(is_error),
        meta: None,
        structured_content: None,
    }
}
