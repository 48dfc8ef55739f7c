//! Launches the hardened container, multiplexes its stdio, and enforces the
//! per-invocation timeout.

use std::collections::HashMap;
use std::future::Future;
use std::path::Path;
use std::pin::Pin;
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;

use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::process::Command;
use tokio::sync::Mutex as AsyncMutex;
use tokio::time::timeout as tokio_timeout;
use tracing::{debug, warn};

use crate::error::BridgeError;
use crate::spec::SandboxResult;

/// Closure the invocation hands the runner: given an RPC payload, produce a
/// `(success, payload_or_none, error_or_none)` triple. Boxed+pinned because
/// it must be callable from inside the stdout-reader loop without requiring
/// the caller to name the underlying future type.
pub type RpcHandler = Box<
    dyn Fn(serde_json::Value) -> Pin<Box<dyn Future<Output = RpcOutcome> + Send>> + Send + Sync,
>;

pub struct RpcOutcome {
    pub success: bool,
    pub payload: Option<serde_json::Value>,
    pub error: Option<String>,
}

impl RpcOutcome {
    pub fn ok(payload: serde_json::Value) -> Self {
        Self {
            success: true,
            payload: Some(payload),
            error: None,
        }
    }

    pub fn err(message: impl Into<String>) -> Self {
        Self {
            success: false,
            payload: None,
            error: Some(message.into()),
        }
    }
}

/// Fixed hardening profile applied to every container invocation. Nothing
/// here is configurable per-request; only the values in [`HardeningConfig`]
/// (memory, pids, cpu, user) vary.
#[derive(Debug, Clone)]
pub struct HardeningConfig {
    pub image: String,
    pub memory_limit: String,
    pub pid_limit: u32,
    pub cpu_quota: Option<String>,
    pub container_user: String,
}

/// Benign stderr prefixes emitted by image-pull progress, stripped from a
/// successful run's stderr buffer so the caller sees only real diagnostics.
const BENIGN_STDERR_PREFIXES: &[&str] = &[
    "Trying to pull ",
    "Getting image source signatures",
    "Copying blob ",
    "Copying config ",
    "Writing manifest",
    "Storing signatures",
];

fn strip_benign_stderr(stderr: &str) -> String {
    stderr
        .lines()
        .filter(|line| {
            !BENIGN_STDERR_PREFIXES
                .iter()
                .any(|prefix| line.starts_with(prefix))
        })
        .collect::<Vec<_>>()
        .join("\n")
}

fn compose_args(
    runtime_binary: &str,
    entrypoint_path: &Path,
    ipc_dir: &Path,
    hardening: &HardeningConfig,
    extra_env: &HashMap<String, String>,
) -> Vec<String> {
    let is_podman = runtime_binary.contains("podman");
    let mut args: Vec<String> = vec![
        "run".into(),
        "--rm".into(),
        "--interactive".into(),
        "--network".into(),
        "none".into(),
        "--read-only".into(),
        "--tmpfs".into(),
        "/tmp:noexec,nosuid,nodev,size=64m".into(),
        "--tmpfs".into(),
        "/workspace:noexec,nosuid,nodev,size=128m".into(),
        "--workdir".into(),
        "/workspace".into(),
        "--env".into(),
        "HOME=/workspace".into(),
        "--env".into(),
        "PYTHONUNBUFFERED=1".into(),
        "--env".into(),
        "PYTHONDONTWRITEBYTECODE=1".into(),
        "--security-opt".into(),
        "no-new-privileges".into(),
        "--cap-drop".into(),
        "ALL".into(),
        "--user".into(),
        hardening.container_user.clone(),
        "--memory".into(),
        hardening.memory_limit.clone(),
        "--pids-limit".into(),
        hardening.pid_limit.to_string(),
    ];

    if let Some(cpus) = &hardening.cpu_quota {
        args.push("--cpus".into());
        args.push(cpus.clone());
    }

    // podman's rootless VM mounts need an explicit :Z relabel; docker does not.
    let mount_suffix = if is_podman { ":Z" } else { "" };
    args.push("--volume".into());
    args.push(format!(
        "{}:/workspace/ipc{}",
        ipc_dir.to_string_lossy(),
        mount_suffix
    ));

    for (key, value) in extra_env {
        args.push("--env".into());
        args.push(format!("{key}={value}"));
    }

    args.push(hardening.image.clone());
    args.push("python3".into());
    args.push(format!(
        "/workspace/ipc/{}",
        entrypoint_path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "entrypoint.py".into())
    ));
    args
}

pub struct SandboxRunner;

impl SandboxRunner {
    /// Run one container invocation to completion.
    ///
    /// Preconditions: `runtime_binary` is a validated, present binary;
    /// `entrypoint_path` exists inside `ipc_dir` and `ipc_dir` is already
    /// registered as shared with the runtime's VM, if any.
    pub async fn execute(
        runtime_binary: &str,
        entrypoint_path: &Path,
        ipc_dir: &Path,
        hardening: &HardeningConfig,
        extra_env: HashMap<String, String>,
        timeout: Duration,
        rpc_handler: RpcHandler,
    ) -> Result<SandboxResult, BridgeError> {
        let args = compose_args(runtime_binary, entrypoint_path, ipc_dir, hardening, &extra_env);
        debug!(runtime_binary, ?args, "launching sandbox container");

        let mut command = Command::new(runtime_binary);
        command
            .args(&args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let mut child = command.spawn().map_err(|e| BridgeError::RuntimeUnavailable {
            message: e.to_string(),
            stdout: String::new(),
            stderr: String::new(),
        })?;

        let mut stdin = child.stdin.take().expect("piped stdin");
        let stdout = child.stdout.take().expect("piped stdout");
        let stderr = child.stderr.take().expect("piped stderr");

        // Shared with the timeout branch below: if the multiplexing future
        // is dropped mid-run, whatever these hold is still readable since
        // they outlive the dropped future.
        let stdout_buf = Arc::new(AsyncMutex::new(String::new()));
        let stderr_buf = Arc::new(AsyncMutex::new(String::new()));
        let stdout_buf_run = stdout_buf.clone();
        let stderr_buf_run = stderr_buf.clone();

        let run = async move {
            let mut stdout_lines = BufReader::new(stdout).lines();
            let mut stderr_reader = BufReader::new(stderr);

            let stderr_task_buf = stderr_buf_run.clone();
            let stderr_task = tokio::spawn(async move {
                let mut line = String::new();
                loop {
                    line.clear();
                    match stderr_reader.read_line(&mut line).await {
                        Ok(0) | Err(_) => break,
                        Ok(_) => stderr_task_buf.lock().await.push_str(&line),
                    }
                }
            });

            while let Ok(Some(line)) = stdout_lines.next_line().await {
                if line.is_empty() {
                    continue;
                }
                match crate::protocol::parse_child_line(&line) {
                    Ok(crate::protocol::ChildMessage::Stdout { data }) => {
                        stdout_buf_run.lock().await.push_str(&data)
                    }
                    Ok(crate::protocol::ChildMessage::Stderr { data }) => {
                        stderr_buf_run.lock().await.push_str(&data)
                    }
                    Ok(crate::protocol::ChildMessage::RpcRequest { id, payload }) => {
                        let outcome = rpc_handler(payload).await;
                        let response = if outcome.success {
                            crate::protocol::BridgeMessage::ok(
                                id,
                                outcome.payload.unwrap_or(serde_json::Value::Null),
                            )
                        } else {
                            crate::protocol::BridgeMessage::err(
                                id,
                                outcome.error.unwrap_or_else(|| "unknown error".into()),
                            )
                        };
                        let line = match response.to_line() {
                            Ok(l) => l,
                            Err(e) => {
                                warn!(error = %e, "failed to serialize rpc response");
                                break;
                            }
                        };
                        if stdin.write_all(line.as_bytes()).await.is_err() {
                            warn!("sandbox stdin closed; breaking dispatch loop");
                            break;
                        }
                        if stdin.flush().await.is_err() {
                            break;
                        }
                    }
                    Err(_) => {
                        let mut buf = stderr_buf_run.lock().await;
                        buf.push_str(&line);
                        buf.push('\n');
                    }
                }
            }

            drop(stdin);
            let _ = stderr_task.await;

            child.wait().await
        };

        match tokio_timeout(timeout, run).await {
            Ok(status) => {
                let exit_code = status.map(|s| s.code().unwrap_or(-1)).unwrap_or(-1);
                let stdout_final = stdout_buf.lock().await.clone();
                let stderr_raw = stderr_buf.lock().await.clone();
                let stderr_final = if exit_code == 0 {
                    strip_benign_stderr(&stderr_raw)
                } else {
                    stderr_raw
                };
                Ok(SandboxResult {
                    ok: exit_code == 0,
                    exit_code,
                    stdout: stdout_final,
                    stderr: stderr_final,
                })
            }
            Err(_) => {
                warn!(timeout_secs = timeout.as_secs(), "sandbox execution timed out");
                // `run` (and the child handle it owned) is dropped here;
                // `kill_on_drop(true)` reaps the container. The buffers
                // survive because they're held outside `run` via `Arc`.
                let stdout_final = stdout_buf.lock().await.clone();
                let stderr_final = stderr_buf.lock().await.clone();
                Err(BridgeError::Timeout {
                    timeout_seconds: timeout.as_secs(),
                    stdout: stdout_final,
                    stderr: stderr_final,
                })
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strip_benign_stderr_removes_only_known_prefixes() {
        let raw = "Trying to pull quay.io/foo\nreal error here\nCopying blob sha256:abc\n";
        let stripped = strip_benign_stderr(raw);
        assert_eq!(stripped, "real error here");
    }

    #[test]
    fn compose_args_includes_hardening_flags() {
        let hardening = HardeningConfig {
            image: "mcp-bridge-sandbox:latest".into(),
            memory_limit: "512m".into(),
            pid_limit: 64,
            cpu_quota: None,
            container_user: "65534:65534".into(),
        };
        let args = compose_args(
            "podman",
            Path::new("/tmp/ipc/entrypoint.py"),
            Path::new("/tmp/ipc"),
            &hardening,
            &HashMap::new(),
        );
        assert!(args.contains(&"--read-only".to_string()));
        assert!(args.contains(&"none".to_string()));
        assert!(args.iter().any(|a| a.contains("noexec")));
        assert!(args.contains(&"ALL".to_string()));
    }

    #[test]
    fn compose_args_podman_relabels_volume() {
        let hardening = HardeningConfig {
            image: "img".into(),
            memory_limit: "512m".into(),
            pid_limit: 64,
            cpu_quota: None,
            container_user: "65534:65534".into(),
        };
        let args = compose_args(
            "podman",
            Path::new("/tmp/ipc/e.py"),
            Path::new("/tmp/ipc"),
            &hardening,
            &HashMap::new(),
        );
        assert!(args.iter().any(|a| a.ends_with(":Z")));
    }
}
