//! Owns long-lived downstream MCP client sessions, keyed by server name.
//!
//! A session is opened once (first `open(spec)` for a given name) and kept
//! until the bridge shuts down; concurrent `open` calls for the same name
//! race only over the map entry, never over the underlying child process.

use std::borrow::Cow;
use std::sync::Arc;

use dashmap::DashMap;
use rmcp::model::CallToolRequestParam;
use rmcp::service::{RoleClient, RunningService};
use rmcp::transport::{ConfigureCommandExt, TokioChildProcess};
use rmcp::ServiceExt;
use tokio::process::Command;
use tokio::sync::Mutex;
use tracing::{debug, info};

use crate::error::BridgeError;
use crate::spec::ServerSpec;

/// A single open downstream session. `call_tool`/`list_tools` are
/// serialised per session via the inner mutex: the underlying stdio
/// transport has no concurrent-request multiplexing of its own.
pub struct ClientSession {
    name: String,
    inner: Mutex<Option<RunningService<RoleClient, ()>>>,
}

impl ClientSession {
    async fn spawn(spec: &ServerSpec) -> Result<Self, BridgeError> {
        let spec = spec.clone();
        let transport = TokioChildProcess::new(Command::new(&spec.command).configure(|cmd| {
            for arg in &spec.args {
                cmd.arg(arg);
            }
            for (key, value) in &spec.env {
                cmd.env(key, value);
            }
            if let Some(cwd) = &spec.cwd {
                cmd.current_dir(cwd);
            }
        }))
        .map_err(|e| BridgeError::RuntimeUnavailable {
            message: format!("failed to spawn downstream server '{}': {e}", spec.name),
            stdout: String::new(),
            stderr: String::new(),
        })?;

        let service = ().serve(transport).await.map_err(|e| BridgeError::RuntimeUnavailable {
            message: format!("handshake with downstream server '{}' failed: {e}", spec.name),
            stdout: String::new(),
            stderr: String::new(),
        })?;

        info!(server = %spec.name, "downstream mcp session ready");
        Ok(Self {
            name: spec.name,
            inner: Mutex::new(Some(service)),
        })
    }

    pub async fn list_tools(&self) -> Result<Vec<rmcp::model::Tool>, BridgeError> {
        let guard = self.inner.lock().await;
        let service = guard.as_ref().ok_or_else(|| {
            BridgeError::SandboxError {
                message: format!("session '{}' already closed", self.name),
                exit_code: -1,
                stdout: String::new(),
                stderr: String::new(),
            }
        })?;
        let result = service
            .list_all_tools()
            .await
            .map_err(|e| BridgeError::SandboxError {
                message: format!("list_tools on '{}' failed: {e}", self.name),
                exit_code: -1,
                stdout: String::new(),
                stderr: String::new(),
            })?;
        Ok(result)
    }

    pub async fn call_tool(
        &self,
        tool: &str,
        arguments: serde_json::Value,
    ) -> Result<serde_json::Value, BridgeError> {
        let guard = self.inner.lock().await;
        let service = guard.as_ref().ok_or_else(|| BridgeError::SandboxError {
            message: format!("session '{}' already closed", self.name),
            exit_code: -1,
            stdout: String::new(),
            stderr: String::new(),
        })?;

        let args_obj = arguments.as_object().cloned();
        let params = CallToolRequestParam {
            name: Cow::Owned(tool.to_string()),
            arguments: args_obj,
        };

        let result = service
            .call_tool(params)
            .await
            .map_err(|e| BridgeError::SandboxError {
                message: format!("call_tool '{tool}' on '{}' failed: {e}", self.name),
                exit_code: -1,
                stdout: String::new(),
                stderr: String::new(),
            })?;

        serde_json::to_value(&result).map_err(|e| BridgeError::SandboxError {
            message: format!("could not encode result of '{tool}': {e}"),
            exit_code: -1,
            stdout: String::new(),
            stderr: String::new(),
        })
    }

    async fn close(&self) {
        if let Some(service) = self.inner.lock().await.take() {
            if let Err(e) = service.cancel().await {
                debug!(server = %self.name, error = %e, "downstream session shutdown error (swallowed)");
            }
        }
    }
}

pub struct MCPClientPool {
    sessions: DashMap<String, Arc<ClientSession>>,
}

impl MCPClientPool {
    pub fn new() -> Self {
        Self {
            sessions: DashMap::new(),
        }
    }

    /// Idempotent: a second `open` for the same name returns the existing
    /// session without spawning another child process.
    pub async fn open(&self, spec: &ServerSpec) -> Result<Arc<ClientSession>, BridgeError> {
        if let Some(existing) = self.sessions.get(&spec.name) {
            return Ok(existing.clone());
        }

        let spawned = Arc::new(ClientSession::spawn(spec).await?);
        // Another concurrent opener may have beaten us to the entry; in
        // that case prefer the one already installed so there is always at
        // most one ClientSession per name, and close the child we just lost
        // the race on instead of leaking it.
        let installed = self
            .sessions
            .entry(spec.name.clone())
            .or_insert_with(|| spawned.clone())
            .clone();
        if !Arc::ptr_eq(&installed, &spawned) {
            spawned.close().await;
        }
        Ok(installed)
    }

    pub fn get(&self, name: &str) -> Option<Arc<ClientSession>> {
        self.sessions.get(name).map(|entry| entry.clone())
    }

    pub async fn close_all(&self) {
        let sessions: Vec<Arc<ClientSession>> =
            self.sessions.iter().map(|entry| entry.clone()).collect();
        for session in sessions {
            session.close().await;
        }
        self.sessions.clear();
    }
}

impl Default for MCPClientPool {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn open_nonexistent_command_surfaces_runtime_unavailable() {
        let pool = MCPClientPool::new();
        let spec = ServerSpec {
            name: "ghost".into(),
            command: "definitely-not-a-real-binary-xyz".into(),
            args: vec![],
            env: Default::default(),
            cwd: None,
        };
        let result = pool.open(&spec).await;
        assert!(result.is_err());
    }

    #[test]
    fn get_on_empty_pool_is_none() {
        let pool = MCPClientPool::new();
        assert!(pool.get("anything").is_none());
    }
}
