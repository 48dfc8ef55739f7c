//! Per-request scope: the set of authorised servers, the IPC directory the
//! sandbox mounts, and the RPC dispatcher the [`crate::sandbox_runner`]
//! consults while the container is running.

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use tracing::debug;
use uuid::Uuid;

use crate::catalog::ToolCatalog;
use crate::client_pool::MCPClientPool;
use crate::error::{BridgeError, SandboxIoError};
use crate::sandbox_runner::RpcOutcome;
use crate::spec::{DocDetail, ServerMetadata};

pub struct Invocation {
    pub allowed_servers: HashSet<String>,
    pub server_metadata: Vec<ServerMetadata>,
    pub discovered_servers: Vec<String>,
    pub ipc_dir: PathBuf,
    pool: Arc<MCPClientPool>,
    catalog: Arc<ToolCatalog>,
}

impl Invocation {
    /// `requested_servers` must already be loaded in the pool and
    /// catalogued by the caller (the Bridge does this in `execute` step 3);
    /// this constructor only snapshots what is already there.
    pub async fn enter(
        pool: Arc<MCPClientPool>,
        catalog: Arc<ToolCatalog>,
        requested_servers: &[String],
        discovered_servers: Vec<String>,
        state_root: &Path,
    ) -> Result<Self, BridgeError> {
        let mut seen = HashSet::new();
        let mut ordered = Vec::new();
        for name in requested_servers {
            if seen.insert(name.clone()) {
                ordered.push(name.clone());
            }
        }

        let mut server_metadata = Vec::new();
        let mut allowed_servers = HashSet::new();
        for name in &ordered {
            let metadata = catalog
                .snapshot(name)
                .ok_or_else(|| BridgeError::not_found(format!("server '{name}'")))?;
            allowed_servers.insert(metadata.server_name.clone());
            server_metadata.push(metadata);
        }

        let ipc_dir = state_root.join(format!("invocation-{}", Uuid::new_v4()));
        tokio::fs::create_dir_all(&ipc_dir).await.map_err(|source| {
            SandboxIoError::IpcDirCreate {
                path: ipc_dir.clone(),
                source,
            }
        })?;
        set_world_traversable(&ipc_dir);

        Ok(Self {
            allowed_servers,
            server_metadata,
            discovered_servers,
            ipc_dir,
            pool,
            catalog,
        })
    }

    /// Dispatch one RPC request from the sandbox. Never returns an `Err`:
    /// every failure mode is collapsed into a non-success [`RpcOutcome`] so
    /// the sandboxed process never hangs waiting for a reply.
    pub async fn handle_rpc(&self, payload: serde_json::Value) -> RpcOutcome {
        let rpc_type = payload.get("type").and_then(|v| v.as_str()).unwrap_or("");
        match rpc_type {
            "list_servers" => {
                let mut names: Vec<&String> = self.allowed_servers.iter().collect();
                names.sort();
                RpcOutcome::ok(serde_json::json!(names))
            }
            "list_tools" => self.dispatch_list_tools(&payload).await,
            "call_tool" => self.dispatch_call_tool(&payload).await,
            "query_tool_docs" => self.dispatch_query_tool_docs(&payload),
            "search_tool_docs" => self.dispatch_search_tool_docs(&payload),
            other => RpcOutcome::err(format!("Unknown RPC type: {other}")),
        }
    }

    fn require_allowed<'a>(&self, payload: &'a serde_json::Value) -> Result<&'a str, String> {
        let server = payload
            .get("server")
            .and_then(|v| v.as_str())
            .ok_or_else(|| "missing 'server' field".to_string())?;
        if !self.allowed_servers.contains(server) {
            return Err(format!("server '{server}' is not authorised for this invocation"));
        }
        Ok(server)
    }

    async fn dispatch_list_tools(&self, payload: &serde_json::Value) -> RpcOutcome {
        let server = match self.require_allowed(payload) {
            Ok(s) => s,
            Err(e) => return RpcOutcome::err(e),
        };
        let Some(session) = self.pool.get(server) else {
            return RpcOutcome::err(format!("server '{server}' has no open session"));
        };
        match session.list_tools().await {
            Ok(tools) => match serde_json::to_value(tools) {
                Ok(v) => RpcOutcome::ok(serde_json::json!({ "tools": v })),
                Err(e) => RpcOutcome::err(e.to_string()),
            },
            Err(e) => RpcOutcome::err(e.to_string()),
        }
    }

    async fn dispatch_call_tool(&self, payload: &serde_json::Value) -> RpcOutcome {
        let server = match self.require_allowed(payload) {
            Ok(s) => s,
            Err(e) => return RpcOutcome::err(e),
        };
        let Some(tool) = payload.get("tool").and_then(|v| v.as_str()) else {
            return RpcOutcome::err("missing 'tool' field");
        };
        let arguments = payload
            .get("arguments")
            .cloned()
            .unwrap_or(serde_json::Value::Object(Default::default()));

        let Some(session) = self.pool.get(server) else {
            return RpcOutcome::err(format!("server '{server}' has no open session"));
        };
        match session.call_tool(tool, arguments).await {
            Ok(result) => RpcOutcome::ok(serde_json::json!({ "result": result })),
            Err(e) => RpcOutcome::err(e.to_string()),
        }
    }

    fn dispatch_query_tool_docs(&self, payload: &serde_json::Value) -> RpcOutcome {
        let server = match self.require_allowed(payload) {
            Ok(s) => s,
            Err(e) => return RpcOutcome::err(e),
        };
        let tool = payload.get("tool").and_then(|v| v.as_str());
        let detail = parse_detail(payload);
        match self.catalog.docs(server, tool, detail) {
            Ok(docs) => RpcOutcome::ok(serde_json::json!({ "tools": docs })),
            Err(e) => RpcOutcome::err(e.to_string()),
        }
    }

    fn dispatch_search_tool_docs(&self, payload: &serde_json::Value) -> RpcOutcome {
        let query = match payload.get("query").and_then(|v| v.as_str()) {
            Some(q) if !q.is_empty() => q,
            _ => return RpcOutcome::err("'query' must be a non-empty string"),
        };
        let limit = payload
            .get("limit")
            .and_then(|v| v.as_u64())
            .unwrap_or(10) as usize;
        let detail = parse_detail(payload);
        let allowed: Vec<String> = self.allowed_servers.iter().cloned().collect();
        let results = self.catalog.search(query, &allowed, limit, detail);
        RpcOutcome::ok(serde_json::json!({ "tools": results }))
    }

    /// Delete the IPC directory and everything inside it. Called on every
    /// exit path, including after a sandbox error or timeout.
    pub async fn exit(&self) {
        if let Err(e) = tokio::fs::remove_dir_all(&self.ipc_dir).await {
            debug!(path = %self.ipc_dir.display(), error = %e, "ipc directory cleanup failed");
        }
    }
}

fn parse_detail(payload: &serde_json::Value) -> DocDetail {
    match payload.get("detail").and_then(|v| v.as_str()) {
        Some("full") => DocDetail::Full,
        _ => DocDetail::Summary,
    }
}

#[cfg(unix)]
fn set_world_traversable(path: &Path) {
    use std::os::unix::fs::PermissionsExt;
    if let Ok(metadata) = std::fs::metadata(path) {
        let mut perms = metadata.permissions();
        perms.set_mode(0o755);
        let _ = std::fs::set_permissions(path, perms);
    }
}

#[cfg(not(unix))]
fn set_world_traversable(_path: &Path) {}

#[cfg(test)]
mod tests {
    use super::*;

    fn invocation_fixture(tmp: &Path) -> Invocation {
        Invocation {
            allowed_servers: ["stub".to_string()].into_iter().collect(),
            server_metadata: vec![],
            discovered_servers: vec!["stub".to_string()],
            ipc_dir: tmp.to_path_buf(),
            pool: Arc::new(MCPClientPool::new()),
            catalog: Arc::new(ToolCatalog::new()),
        }
    }

    #[tokio::test]
    async fn list_servers_returns_sorted_allowed_set() {
        let tmp = tempfile::tempdir().unwrap();
        let invocation = invocation_fixture(tmp.path());
        let outcome = invocation
            .handle_rpc(serde_json::json!({"type": "list_servers"}))
            .await;
        assert!(outcome.success);
        assert_eq!(outcome.payload.unwrap(), serde_json::json!(["stub"]));
    }

    #[tokio::test]
    async fn rpc_naming_disallowed_server_is_rejected() {
        let tmp = tempfile::tempdir().unwrap();
        let invocation = invocation_fixture(tmp.path());
        let outcome = invocation
            .handle_rpc(serde_json::json!({
                "type": "call_tool",
                "server": "not_allowed",
                "tool": "echo",
                "arguments": {}
            }))
            .await;
        assert!(!outcome.success);
        assert!(outcome.error.unwrap().contains("not authorised"));
    }

    #[tokio::test]
    async fn unknown_rpc_type_is_rejected() {
        let tmp = tempfile::tempdir().unwrap();
        let invocation = invocation_fixture(tmp.path());
        let outcome = invocation
            .handle_rpc(serde_json::json!({"type": "bogus"}))
            .await;
        assert!(!outcome.success);
        assert!(outcome.error.unwrap().starts_with("Unknown RPC type"));
    }

    #[tokio::test]
    async fn search_requires_nonempty_query() {
        let tmp = tempfile::tempdir().unwrap();
        let invocation = invocation_fixture(tmp.path());
        let outcome = invocation
            .handle_rpc(serde_json::json!({"type": "search_tool_docs", "query": ""}))
            .await;
        assert!(!outcome.success);
    }
}
