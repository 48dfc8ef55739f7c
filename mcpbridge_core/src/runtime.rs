//! Container runtime detection and readiness tracking.
//!
//! `RuntimeDriver` resolves a container binary (`podman` or `docker`) once,
//! then tracks readiness through an observable, watch-channel-backed state
//! machine so callers never poll: they call [`RuntimeDriver::ensure_ready`]
//! and either get back immediately (already `Ready`) or await the next
//! transition.

use std::collections::HashSet;
use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::process::Command;
use tokio::sync::{watch, Mutex};
use tracing::{debug, info, warn};

use crate::error::BridgeError;

const CANDIDATES: &[&str] = &["podman", "docker"];

/// Phrases in podman's stderr/stdout that mean "the machine VM isn't up",
/// as opposed to a genuinely broken install. Matches the original's
/// `_ensure_runtime_ready` phrase list.
const MACHINE_NEEDED_PHRASES: &[&str] = &[
    "cannot connect to podman",
    "podman machine",
    "run the podman machine",
    "socket: connect",
];

fn is_podman(binary: &str) -> bool {
    Path::new(binary)
        .file_name()
        .map(|n| n.to_string_lossy().contains("podman"))
        .unwrap_or(false)
}

async fn run_runtime_command(binary: &str, args: &[&str]) -> (i32, String, String) {
    match Command::new(binary).args(args).output().await {
        Ok(output) => (
            output.status.code().unwrap_or(-1),
            String::from_utf8_lossy(&output.stdout).into_owned(),
            String::from_utf8_lossy(&output.stderr).into_owned(),
        ),
        Err(e) => (-1, String::new(), e.to_string()),
    }
}

/// Lifecycle states for the detected container runtime.
#[derive(Debug, Clone, PartialEq)]
pub enum RuntimeState {
    /// No detection attempt has run yet.
    NotDetected,
    /// A binary has been located and is assumed ready for use.
    Ready { binary: String },
    /// Detection ran and found nothing usable on `PATH`.
    Unavailable { reason: String },
}

impl RuntimeState {
    pub fn is_ready(&self) -> bool {
        matches!(self, RuntimeState::Ready { .. })
    }
}

/// Observable runtime-state holder. Cloning shares the same channel.
#[derive(Clone)]
pub struct RuntimeDriver {
    sender: Arc<watch::Sender<RuntimeState>>,
    _receiver: watch::Receiver<RuntimeState>,
    last_used: Arc<Mutex<Instant>>,
    idle_timeout: Duration,
    /// Serialises the podman machine info/start/init dance so concurrent
    /// `ensure_ready` callers don't race each other into duplicate
    /// `machine start` attempts.
    machine_check_lock: Arc<Mutex<()>>,
    /// Host paths already registered as shared with the podman machine VM;
    /// avoids re-running `machine set --volume` for a path more than once.
    shared_paths: Arc<Mutex<HashSet<String>>>,
}

impl RuntimeDriver {
    pub fn new(idle_timeout: Duration) -> Self {
        let (sender, receiver) = watch::channel(RuntimeState::NotDetected);
        Self {
            sender: Arc::new(sender),
            _receiver: receiver,
            last_used: Arc::new(Mutex::new(Instant::now())),
            idle_timeout,
            machine_check_lock: Arc::new(Mutex::new(())),
            shared_paths: Arc::new(Mutex::new(HashSet::new())),
        }
    }

    pub fn current(&self) -> RuntimeState {
        self.sender.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<RuntimeState> {
        self.sender.subscribe()
    }

    /// Detect a runtime binary if not already done, returning its path.
    ///
    /// Idempotent: once `Ready`, subsequent calls are a cheap clone of the
    /// cached binary name. `preferred` is tried before the built-in
    /// candidate order.
    pub async fn ensure_ready(&self, preferred: Option<&str>) -> Result<String, BridgeError> {
        let binary = match self.current() {
            RuntimeState::Ready { binary } => binary,
            _ => self.detect(preferred).await?,
        };

        self.ensure_podman_machine_ready(&binary).await?;
        *self.last_used.lock().await = Instant::now();
        Ok(binary)
    }

    async fn detect(&self, preferred: Option<&str>) -> Result<String, BridgeError> {
        let mut search = Vec::new();
        if let Some(p) = preferred {
            search.push(p.to_string());
        }
        search.extend(CANDIDATES.iter().map(|s| s.to_string()));

        for candidate in &search {
            if let Ok(path) = which::which(candidate) {
                let binary = path.to_string_lossy().into_owned();
                info!(runtime = %binary, "container runtime detected");
                self.sender.send_if_modified(|state| {
                    *state = RuntimeState::Ready {
                        binary: binary.clone(),
                    };
                    true
                });
                return Ok(binary);
            }
            debug!(candidate, "runtime candidate not on PATH");
        }

        let candidates = search.join(", ");
        warn!(candidates = %candidates, "no container runtime detected");
        self.sender.send_if_modified(|state| {
            *state = RuntimeState::Unavailable {
                reason: format!("no candidate found among: {candidates}"),
            };
            true
        });
        Err(BridgeError::NoRuntime { candidates })
    }

    /// For podman, confirms the machine VM actually answers `info` before
    /// handing the binary back, starting (and if necessary initialising) the
    /// machine on the caller's behalf. A no-op for docker and any other
    /// runtime, which have no VM layer to bring up. Mirrors the original's
    /// `_ensure_runtime_ready` three-attempt info/start/init loop.
    async fn ensure_podman_machine_ready(&self, binary: &str) -> Result<(), BridgeError> {
        if !is_podman(binary) {
            return Ok(());
        }

        let _guard = self.machine_check_lock.lock().await;

        for _ in 0..3 {
            let (code, stdout, stderr) =
                run_runtime_command(binary, &["info", "--format", "{{json .}}"]).await;
            if code == 0 {
                return Ok(());
            }

            let combined = format!("{stdout}\n{stderr}").to_lowercase();
            let needs_machine = MACHINE_NEEDED_PHRASES
                .iter()
                .any(|phrase| combined.contains(phrase));
            if !needs_machine {
                return Err(BridgeError::RuntimeUnavailable {
                    message: "container runtime is unavailable".to_string(),
                    stdout,
                    stderr,
                });
            }

            let (start_code, start_stdout, start_stderr) =
                run_runtime_command(binary, &["machine", "start"]).await;
            if start_code == 0 {
                continue;
            }

            let start_combined = format!("{start_stdout}\n{start_stderr}").to_lowercase();
            if start_combined.contains("does not exist") || start_combined.contains("no such machine")
            {
                let (init_code, init_stdout, init_stderr) =
                    run_runtime_command(binary, &["machine", "init"]).await;
                if init_code != 0 {
                    return Err(BridgeError::RuntimeUnavailable {
                        message: "failed to initialize podman machine".to_string(),
                        stdout: init_stdout,
                        stderr: init_stderr,
                    });
                }
                // Machine now exists; loop retries the info/start sequence.
                continue;
            }

            return Err(BridgeError::RuntimeUnavailable {
                message: "failed to start podman machine".to_string(),
                stdout: start_stdout,
                stderr: start_stderr,
            });
        }

        Err(BridgeError::RuntimeUnavailable {
            message: "unable to prepare podman runtime".to_string(),
            stdout: String::new(),
            stderr: "repeated podman machine start attempts failed".to_string(),
        })
    }

    /// Registers `path` as shared with the runtime so a container can mount
    /// it as a volume. For podman this runs `machine set --rootful --volume
    /// <path>:<path>` once per path and remembers the result; for docker
    /// (no VM boundary) it's a cheap no-op bookkeeping entry. Best-effort,
    /// matching the original's `ensure_shared_directory`: a failure here is
    /// logged, not propagated, since the subsequent container run will
    /// surface a clearer error if the mount genuinely doesn't work.
    pub async fn ensure_shared(&self, path: &Path) {
        let binary = match self.current() {
            RuntimeState::Ready { binary } => binary,
            _ => return,
        };
        let path_str = path.to_string_lossy().into_owned();

        let mut shared = self.shared_paths.lock().await;
        if shared.contains(&path_str) {
            return;
        }

        if !is_podman(&binary) {
            shared.insert(path_str);
            return;
        }

        let share_spec = format!("{path_str}:{path_str}");
        let (code, stdout, stderr) =
            run_runtime_command(&binary, &["machine", "set", "--rootful", "--volume", &share_spec])
                .await;
        if code == 0 {
            shared.insert(path_str);
            return;
        }

        let lower = stderr.to_lowercase();
        if lower.contains("already exists") || lower.contains("would overwrite") {
            shared.insert(path_str);
            return;
        }

        debug!(
            path = %path.display(),
            stdout,
            stderr,
            "failed to ensure podman shared volume"
        );
    }

    /// Seconds since the runtime was last used to launch a sandbox. Used by
    /// the bridge's idle-shutdown sweep to decide whether to drop back to
    /// `NotDetected` and force re-detection on next use (picks up a runtime
    /// that came online after the bridge started).
    pub async fn idle_for(&self) -> Duration {
        self.last_used.lock().await.elapsed()
    }

    pub fn is_idle(&self, elapsed: Duration) -> bool {
        elapsed >= self.idle_timeout
    }

    /// Drop back to `NotDetected`, forcing the next `ensure_ready` call to
    /// re-probe `PATH` rather than trusting a stale cached binary.
    pub fn reset(&self) {
        self.sender.send_if_modified(|state| {
            *state = RuntimeState::NotDetected;
            true
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn ensure_ready_finds_a_real_shell_binary() {
        let driver = RuntimeDriver::new(Duration::from_secs(60));
        // `sh` is guaranteed present in any test environment and exercises
        // the same which::which + watch-channel path as a real runtime.
        let result = driver.ensure_ready(Some("sh")).await;
        assert!(result.is_ok());
        assert!(driver.current().is_ready());
    }

    #[tokio::test]
    async fn ensure_ready_is_idempotent() {
        let driver = RuntimeDriver::new(Duration::from_secs(60));
        let first = driver.ensure_ready(Some("sh")).await.unwrap();
        let second = driver.ensure_ready(Some("sh")).await.unwrap();
        assert_eq!(first, second);
    }

    #[tokio::test]
    async fn reset_forces_redetection() {
        let driver = RuntimeDriver::new(Duration::from_secs(60));
        driver.ensure_ready(Some("sh")).await.unwrap();
        driver.reset();
        assert_eq!(driver.current(), RuntimeState::NotDetected);
    }

    #[tokio::test]
    async fn no_candidate_on_path_yields_no_runtime_error() {
        let driver = RuntimeDriver::new(Duration::from_secs(60));
        let result = driver
            .ensure_ready(Some("definitely-not-a-real-binary-xyz"))
            .await;
        assert!(matches!(result, Err(BridgeError::NoRuntime { .. })));
    }

    #[test]
    fn is_podman_detects_by_file_name() {
        assert!(is_podman("/usr/bin/podman"));
        assert!(is_podman("podman"));
        assert!(!is_podman("/usr/bin/docker"));
    }

    #[tokio::test]
    async fn non_podman_runtime_skips_the_machine_dance() {
        // "sh" resolves but isn't podman, so ensure_ready must not try to
        // run `sh info`/`sh machine start` as if it understood those verbs.
        let driver = RuntimeDriver::new(Duration::from_secs(60));
        let result = driver.ensure_ready(Some("sh")).await;
        assert!(result.is_ok());
    }

    #[tokio::test]
    async fn ensure_shared_is_idempotent_bookkeeping_for_non_podman_runtime() {
        let driver = RuntimeDriver::new(Duration::from_secs(60));
        driver.ensure_ready(Some("sh")).await.unwrap();
        let dir = tempfile::tempdir().unwrap();
        driver.ensure_shared(dir.path()).await;
        driver.ensure_shared(dir.path()).await;
    }

    #[tokio::test]
    async fn sweep_idle_runtime_resets_once_past_idle_timeout() {
        let driver = RuntimeDriver::new(Duration::from_millis(1));
        driver.ensure_ready(Some("sh")).await.unwrap();
        tokio::time::sleep(Duration::from_millis(20)).await;
        let elapsed = driver.idle_for().await;
        assert!(driver.is_idle(elapsed));
        driver.reset();
        assert_eq!(driver.current(), RuntimeState::NotDetected);
    }
}
