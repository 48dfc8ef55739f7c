//! Data model shared across the bridge: server specs, descriptors, and the
//! structs an [`crate::invocation::Invocation`] ships into the sandbox.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// An immutable record describing how to launch a downstream MCP server.
///
/// `name` is unique within the bridge; it is the key the pool, the catalog,
/// and the sandbox's `servers` argument all address this server by.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ServerSpec {
    pub name: String,
    pub command: String,
    #[serde(default)]
    pub args: Vec<String>,
    #[serde(default)]
    pub env: HashMap<String, String>,
    #[serde(default)]
    pub cwd: Option<String>,
}

/// `{raw_name, alias, description, input_schema?}` — one tool a downstream
/// server exposes. `alias` is assigned once by the catalog and is stable for
/// the lifetime of the bridge.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolDescriptor {
    pub raw_name: String,
    pub alias: String,
    pub description: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub input_schema: Option<serde_json::Value>,
}

/// Deep-copyable, sandbox-facing view of one server's catalogued tools.
/// This is what [`crate::invocation::Invocation`] embeds into the rendered
/// entrypoint as `server_metadata`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerMetadata {
    pub server_name: String,
    pub server_alias: String,
    pub tools: Vec<ToolDescriptor>,
}

/// The result of one sandboxed run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SandboxResult {
    pub ok: bool,
    pub exit_code: i32,
    pub stdout: String,
    pub stderr: String,
}

/// Detail level requested from the catalog: `summary` omits `input_schema`,
/// `full` includes it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DocDetail {
    Summary,
    Full,
}

impl Default for DocDetail {
    fn default() -> Self {
        DocDetail::Summary
    }
}
