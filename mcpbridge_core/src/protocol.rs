//! The NDJSON wire protocol spoken between [`crate::sandbox_runner::SandboxRunner`]
//! and the entrypoint running inside the container.
//!
//! Every line on stdout is exactly one compact JSON object, tagged by `type`.
//! The child never writes raw bytes to stdout itself — the rendered entrypoint
//! owns the stream and multiplexes the user program's actual stdout/stderr
//! through `stdout`/`stderr` frames so RPC traffic can share the same pipe
//! without interleaving garbage.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// One line emitted by the sandboxed entrypoint.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ChildMessage {
    Stdout { data: String },
    Stderr { data: String },
    RpcRequest { id: u64, payload: Value },
}

/// One line the bridge writes back to the sandbox's stdin.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum BridgeMessage {
    RpcResponse {
        id: u64,
        success: bool,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        payload: Option<Value>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        error: Option<String>,
    },
}

impl BridgeMessage {
    pub fn ok(id: u64, payload: Value) -> Self {
        BridgeMessage::RpcResponse {
            id,
            success: true,
            payload: Some(payload),
            error: None,
        }
    }

    pub fn err(id: u64, error: impl Into<String>) -> Self {
        BridgeMessage::RpcResponse {
            id,
            success: false,
            payload: None,
            error: Some(error.into()),
        }
    }

    /// Render as one NDJSON line, newline included.
    pub fn to_line(&self) -> serde_json::Result<String> {
        let mut s = serde_json::to_string(self)?;
        s.push('\n');
        Ok(s)
    }
}

/// Parse a single NDJSON line into a [`ChildMessage`]. Blank lines (the
/// entrypoint may emit one on flush) are rejected by the caller, not here.
pub fn parse_child_line(line: &str) -> serde_json::Result<ChildMessage> {
    serde_json::from_str(line)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stdout_frame_round_trips() {
        let line = r#"{"type":"stdout","data":"hello\n"}"#;
        let msg = parse_child_line(line).unwrap();
        match msg {
            ChildMessage::Stdout { data } => assert_eq!(data, "hello\n"),
            _ => panic!("wrong variant"),
        }
    }

    #[test]
    fn rpc_request_round_trips() {
        let line = r#"{"type":"rpc_request","id":7,"payload":{"tool":"read_file"}}"#;
        let msg = parse_child_line(line).unwrap();
        match msg {
            ChildMessage::RpcRequest { id, payload } => {
                assert_eq!(id, 7);
                assert_eq!(payload["tool"], "read_file");
            }
            _ => panic!("wrong variant"),
        }
    }

    #[test]
    fn success_response_omits_error_field() {
        let msg = BridgeMessage::ok(3, serde_json::json!({"result": 1}));
        let line = msg.to_line().unwrap();
        assert!(!line.contains("\"error\""));
        assert!(line.ends_with('\n'));
    }

    #[test]
    fn failure_response_omits_payload_field() {
        let msg = BridgeMessage::err(3, "no such tool");
        let line = msg.to_line().unwrap();
        assert!(!line.contains("\"payload\""));
        assert!(line.contains("no such tool"));
    }

    #[test]
    fn malformed_line_is_rejected() {
        assert!(parse_child_line("not json").is_err());
        assert!(parse_child_line(r#"{"type":"unknown_tag"}"#).is_err());
    }
}
