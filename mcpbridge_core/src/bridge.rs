//! The orchestrator: accepts `execute(code, servers, timeout)`, drives
//! discovery → load → invoke → cleanup, and owns the pool/catalog/runtime
//! for the lifetime of the process.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, info};

use crate::catalog::{RawToolList, ToolCatalog};
use crate::client_pool::MCPClientPool;
use crate::config::BridgeConfig;
use crate::entrypoint;
use crate::error::{BridgeError, SandboxIoError};
use crate::invocation::Invocation;
use crate::runtime::RuntimeDriver;
use crate::sandbox_runner::{HardeningConfig, RpcOutcome, SandboxRunner};
use crate::spec::{SandboxResult, ServerSpec};

/// `{name → ServerSpec}` the outer config-discovery collaborator hands in.
/// The core treats this as opaque input; it does not know how it was
/// assembled.
pub type ServerTable = HashMap<String, ServerSpec>;

pub struct Bridge {
    config: BridgeConfig,
    runtime: RuntimeDriver,
    pool: Arc<MCPClientPool>,
    catalog: Arc<ToolCatalog>,
    servers: ServerTable,
}

impl Bridge {
    pub fn new(config: BridgeConfig, servers: ServerTable) -> Self {
        let runtime = RuntimeDriver::new(config.runtime_idle_timeout);
        Self {
            config,
            runtime,
            pool: Arc::new(MCPClientPool::new()),
            catalog: Arc::new(ToolCatalog::new()),
            servers,
        }
    }

    fn discovered_server_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.servers.keys().cloned().collect();
        names.sort();
        names
    }

    async fn load_server(&self, name: &str) -> Result<(), BridgeError> {
        let spec = self
            .servers
            .get(name)
            .ok_or_else(|| BridgeError::not_found(format!("server '{name}'")))?;
        let session = self.pool.open(spec).await?;

        if !self.catalog.is_cached(name) {
            let tools = session.list_tools().await?;
            let raw_tools = tools
                .into_iter()
                .map(|t| {
                    let description = t.description.clone().unwrap_or_default().to_string();
                    let schema = serde_json::to_value(&t.input_schema).ok();
                    (t.name.to_string(), description, schema)
                })
                .collect();
            self.catalog.ensure(RawToolList {
                server_name: name.to_string(),
                tools: raw_tools,
            });
        }
        Ok(())
    }

    /// `execute(code, servers?, timeout)`.
    pub async fn execute(
        &self,
        code: &str,
        servers: &[String],
        timeout: Option<u64>,
    ) -> Result<SandboxResult, BridgeError> {
        if code.trim().is_empty() {
            return Err(BridgeError::validation("Missing 'code' argument"));
        }

        let timeout_secs = self.config.clamp_timeout(timeout);

        let runtime_binary = self
            .runtime
            .ensure_ready(self.config.preferred_runtime.as_deref())
            .await?;

        let mut seen = std::collections::HashSet::new();
        let mut ordered_servers = Vec::new();
        for name in servers {
            if seen.insert(name.clone()) {
                ordered_servers.push(name.clone());
            }
        }

        for name in &ordered_servers {
            self.load_server(name).await?;
        }

        let invocation = Invocation::enter(
            self.pool.clone(),
            self.catalog.clone(),
            &ordered_servers,
            self.discovered_server_names(),
            &self.config.state_dir,
        )
        .await?;

        self.runtime.ensure_shared(&invocation.ipc_dir).await;

        let rendered = entrypoint::render(
            code,
            &invocation.server_metadata,
            &invocation.discovered_servers,
        );
        let entrypoint_path = invocation.ipc_dir.join("entrypoint.py");
        if let Err(source) = tokio::fs::write(&entrypoint_path, rendered).await {
            invocation.exit().await;
            return Err(SandboxIoError::EntrypointWrite {
                path: entrypoint_path.clone(),
                source,
            }
            .into());
        }

        let hardening = HardeningConfig {
            image: self.config.image.clone(),
            memory_limit: self.config.memory_limit.clone(),
            pid_limit: self.config.pid_limit,
            cpu_quota: self.config.cpu_quota.clone(),
            container_user: self.config.container_user.clone(),
        };

        let invocation = Arc::new(invocation);
        let rpc_invocation = invocation.clone();
        let rpc_handler: Box<
            dyn Fn(
                    serde_json::Value,
                ) -> std::pin::Pin<
                    Box<dyn std::future::Future<Output = RpcOutcome> + Send>,
                > + Send
                + Sync,
        > = Box::new(move |payload| {
            let invocation = rpc_invocation.clone();
            Box::pin(async move { invocation.handle_rpc(payload).await })
        });

        let result = SandboxRunner::execute(
            &runtime_binary,
            &entrypoint_path,
            &invocation.ipc_dir,
            &hardening,
            HashMap::new(),
            Duration::from_secs(timeout_secs),
            rpc_handler,
        )
        .await;

        invocation.exit().await;

        match result {
            Ok(sandbox_result) if sandbox_result.ok => Ok(sandbox_result),
            Ok(sandbox_result) => Err(BridgeError::SandboxError {
                message: "sandboxed process exited non-zero".to_string(),
                exit_code: sandbox_result.exit_code,
                stdout: sandbox_result.stdout,
                stderr: sandbox_result.stderr,
            }),
            Err(e) => Err(e),
        }
    }

    pub async fn shutdown(&self) {
        info!("bridge shutting down, closing downstream sessions");
        self.pool.close_all().await;
    }

    /// Called periodically from the binary's main loop. Drops the cached
    /// runtime binary back to `NotDetected` once it's gone unused for
    /// longer than the configured idle timeout, forcing the next `execute`
    /// to re-probe `PATH` rather than trust a runtime that may have gone
    /// away underneath the bridge.
    pub async fn sweep_idle_runtime(&self) {
        let elapsed = self.runtime.idle_for().await;
        if self.runtime.is_idle(elapsed) {
            debug!(idle_secs = elapsed.as_secs(), "runtime idle, forcing re-detection");
            self.runtime.reset();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_code_is_rejected_before_any_runtime_work() {
        let bridge = Bridge::new(BridgeConfig::default(), ServerTable::new());
        let result =
            tokio_test_block_on(bridge.execute("   ", &[], None));
        assert!(matches!(result, Err(BridgeError::ValidationError(_))));
    }

    // Minimal blocking helper so this one synchronous-looking test doesn't
    // need the `#[tokio::test]` macro pulled in just for a pre-runtime check.
    fn tokio_test_block_on<F: std::future::Future>(fut: F) -> F::Output {
        tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .unwrap()
            .block_on(fut)
    }
}
