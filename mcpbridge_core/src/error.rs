//! Error taxonomy for the bridge core.
//!
//! Each variant is a *kind*, not a wire format: the outer tool surface maps
//! these onto a `status` field, while the sandbox-facing RPC handler collapses
//! [`BridgeError::NotFound`] and friends into `{success:false, error:...}` so the
//! sandboxed process never hangs waiting for a reply.

use std::path::PathBuf;

#[derive(Debug, thiserror::Error)]
pub enum BridgeError {
    #[error("no container runtime detected (looked for: {candidates})")]
    NoRuntime { candidates: String },

    #[error("container runtime unavailable: {message}")]
    RuntimeUnavailable {
        message: String,
        stdout: String,
        stderr: String,
    },

    #[error("execution timed out after {timeout_seconds}s")]
    Timeout {
        timeout_seconds: u64,
        stdout: String,
        stderr: String,
    },

    #[error("sandboxed execution failed: {message}")]
    SandboxError {
        message: String,
        exit_code: i32,
        stdout: String,
        stderr: String,
    },

    #[error("not found: {0}")]
    NotFound(String),

    #[error("invalid argument: {0}")]
    ValidationError(String),
}

impl BridgeError {
    pub fn not_found(what: impl Into<String>) -> Self {
        BridgeError::NotFound(what.into())
    }

    pub fn validation(msg: impl Into<String>) -> Self {
        BridgeError::ValidationError(msg.into())
    }
}

#[derive(Debug, thiserror::Error)]
pub enum SandboxIoError {
    #[error("failed to create IPC directory {path}: {source}")]
    IpcDirCreate {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to write entrypoint to {path}: {source}")]
    EntrypointWrite {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

impl From<SandboxIoError> for BridgeError {
    fn from(err: SandboxIoError) -> Self {
        BridgeError::SandboxError {
            message: err.to_string(),
            exit_code: -1,
            stdout: String::new(),
            stderr: String::new(),
        }
    }
}

pub type Result<T> = std::result::Result<T, BridgeError>;
