//! Shapes a [`mcpbridge_core::error::BridgeError`] or a successful
//! [`mcpbridge_core::spec::SandboxResult`] into the outer, host-facing
//! response: `status`, `summary`, and optional stream/exit-code fields.

use mcpbridge_core::error::BridgeError;
use mcpbridge_core::spec::SandboxResult;
use serde::Serialize;

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecuteResponse {
    pub status: &'static str,
    pub summary: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stdout: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stderr: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub exit_code: Option<i32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub timeout_seconds: Option<u64>,
    pub is_error: bool,
}

/// Lines noise-filtered out of stdout/stderr entirely: blank lines and
/// tokens that are pure Python-repr noise, not real output.
const NOISE_STREAM_TOKENS: &[&str] = &["()"];

/// Splits a stream into non-empty, non-noise lines, trimming the result to
/// `None` if nothing survives filtering.
fn filtered_lines(s: &str) -> Option<Vec<String>> {
    let lines: Vec<String> = s
        .lines()
        .filter(|line| {
            let trimmed = line.trim();
            !trimmed.is_empty() && !NOISE_STREAM_TOKENS.contains(&trimmed)
        })
        .map(|line| line.to_string())
        .collect();
    if lines.is_empty() {
        None
    } else {
        Some(lines)
    }
}

impl ExecuteResponse {
    pub fn success(result: SandboxResult) -> Self {
        let summary = if result.stdout.is_empty() && result.stderr.is_empty() {
            "Success (no output)".to_string()
        } else {
            "Success".to_string()
        };
        Self {
            status: "success",
            summary,
            stdout: filtered_lines(&result.stdout),
            stderr: filtered_lines(&result.stderr),
            exit_code: Some(result.exit_code),
            error: None,
            timeout_seconds: None,
            is_error: false,
        }
    }

    pub fn from_error(error: BridgeError) -> Self {
        match error {
            BridgeError::ValidationError(message) => Self {
                status: "validation_error",
                summary: message.clone(),
                stdout: None,
                stderr: None,
                exit_code: None,
                error: Some(message),
                timeout_seconds: None,
                is_error: true,
            },
            BridgeError::Timeout {
                timeout_seconds,
                stdout,
                stderr,
            } => Self {
                status: "timeout",
                summary: format!("Timed out after {timeout_seconds}s"),
                stdout: filtered_lines(&stdout),
                stderr: filtered_lines(&stderr),
                exit_code: None,
                error: Some(format!("execution timed out after {timeout_seconds}s")),
                timeout_seconds: Some(timeout_seconds),
                is_error: true,
            },
            BridgeError::SandboxError {
                message,
                exit_code,
                stdout,
                stderr,
            } => Self {
                status: "error",
                summary: format!("Execution failed (exit code {exit_code})"),
                stdout: filtered_lines(&stdout),
                stderr: filtered_lines(&stderr),
                exit_code: Some(exit_code),
                error: Some(message),
                timeout_seconds: None,
                is_error: true,
            },
            BridgeError::NoRuntime { candidates } => {
                let message = format!("no container runtime detected (looked for: {candidates})");
                Self {
                    status: "error",
                    summary: message.clone(),
                    stdout: None,
                    stderr: None,
                    exit_code: None,
                    error: Some(message),
                    timeout_seconds: None,
                    is_error: true,
                }
            }
            BridgeError::RuntimeUnavailable {
                message,
                stdout,
                stderr,
            } => Self {
                status: "error",
                summary: format!("container runtime unavailable: {message}"),
                stdout: filtered_lines(&stdout),
                stderr: filtered_lines(&stderr),
                exit_code: None,
                error: Some(message),
                timeout_seconds: None,
                is_error: true,
            },
            BridgeError::NotFound(what) => Self {
                status: "error",
                summary: format!("not found: {what}"),
                stdout: None,
                stderr: None,
                exit_code: None,
                error: Some(what),
                timeout_seconds: None,
                is_error: true,
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_successful_run_has_no_output_summary() {
        let response = ExecuteResponse::success(SandboxResult {
            ok: true,
            exit_code: 0,
            stdout: String::new(),
            stderr: String::new(),
        });
        assert_eq!(response.summary, "Success (no output)");
        assert!(response.stdout.is_none());
        assert!(response.stderr.is_none());
    }

    #[test]
    fn serialized_response_omits_empty_fields() {
        let response = ExecuteResponse::success(SandboxResult {
            ok: true,
            exit_code: 0,
            stdout: String::new(),
            stderr: String::new(),
        });
        let json = serde_json::to_string(&response).unwrap();
        assert!(!json.contains("\"stdout\""));
        assert!(!json.contains("\"stderr\""));
    }

    #[test]
    fn validation_error_maps_to_validation_status() {
        let response =
            ExecuteResponse::from_error(BridgeError::validation("Missing 'code' argument"));
        assert_eq!(response.status, "validation_error");
        assert_eq!(response.summary, "Missing 'code' argument");
        assert!(response.is_error);
    }

    #[test]
    fn timeout_error_carries_timeout_seconds() {
        let response = ExecuteResponse::from_error(BridgeError::Timeout {
            timeout_seconds: 2,
            stdout: "partial".into(),
            stderr: String::new(),
        });
        assert_eq!(response.status, "timeout");
        assert_eq!(response.timeout_seconds, Some(2));
        assert_eq!(response.stdout, Some(vec!["partial".to_string()]));
    }

    #[test]
    fn multiline_stdout_splits_into_lines() {
        let response = ExecuteResponse::success(SandboxResult {
            ok: true,
            exit_code: 0,
            stdout: "alpha\nbeta\n".to_string(),
            stderr: String::new(),
        });
        assert_eq!(
            response.stdout,
            Some(vec!["alpha".to_string(), "beta".to_string()])
        );
    }

    #[test]
    fn blank_and_noise_lines_are_filtered_out() {
        let response = ExecuteResponse::success(SandboxResult {
            ok: true,
            exit_code: 0,
            stdout: "real output\n\n()\n   \n".to_string(),
            stderr: String::new(),
        });
        assert_eq!(response.stdout, Some(vec!["real output".to_string()]));
    }
}
