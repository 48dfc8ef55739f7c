//! Renders the Python program that runs inside the sandbox container.
//!
//! [`render`] is a pure function: given the user's code and the metadata the
//! invocation wants shipped in, it produces a self-contained source string.
//! Nothing here touches the filesystem or spawns anything — that is
//! [`crate::sandbox_runner::SandboxRunner`]'s job once the string is written
//! out to the IPC directory.

use serde::Serialize;
use serde_json::Value;

use crate::spec::ServerMetadata;

/// Embed an arbitrary Rust string as a Python string literal.
///
/// `serde_json::to_string` on a JSON string produces a double-quoted,
/// backslash-escaped literal. Python's string-escape grammar is a superset
/// of JSON's for every byte that matters here (quotes, backslashes,
/// newlines, and the rest of the control-character range are escaped
/// identically as `\uXXXX`), so the JSON encoding of a string is always a
/// valid, safe Python string literal. This is the one mechanism standing
/// between "arbitrary user code" and "code that escapes its literal" — no
/// byte sequence in the input can terminate the literal early or inject
/// additional statements.
fn py_str_literal(s: &str) -> String {
    serde_json::to_string(s).expect("string serialization cannot fail")
}

/// Embed a serializable value as a Python literal by round-tripping it
/// through JSON text, then `json.loads` on the Python side. This avoids
/// hand-rendering Python list/dict syntax entirely.
fn py_json_literal<T: Serialize>(value: &T) -> String {
    let json = serde_json::to_string(value).expect("metadata must serialize");
    format!("json.loads({})", py_str_literal(&json))
}

const ENTRYPOINT_TEMPLATE: &str = include_str!("entrypoint_template.py");

/// Render the full entrypoint source for one invocation.
///
/// `user_code` is the code the sandboxed process will execute as the
/// top-level program. `server_metadata` is the deep-copied catalog snapshot
/// for this invocation's authorised servers; `discovered_servers` is the
/// sorted superset of every server name the bridge knows about.
pub fn render(
    user_code: &str,
    server_metadata: &[ServerMetadata],
    discovered_servers: &[String],
) -> String {
    let user_code_literal = py_str_literal(user_code);
    let metadata_literal = py_json_literal(&server_metadata);
    let discovered_literal = py_json_literal(&discovered_servers);

    ENTRYPOINT_TEMPLATE
        .replace("__USER_CODE__", &user_code_literal)
        .replace("__SERVER_METADATA__", &metadata_literal)
        .replace("__DISCOVERED_SERVERS__", &discovered_literal)
}

/// Decode a JSON value embedded by [`py_json_literal`] back out, for tests
/// that want to assert on what the template would have seen without
/// actually running Python.
#[cfg(test)]
fn extract_json_loads_arg(rendered: &str, marker: &str) -> Value {
    let needle = format!("{marker} = json.loads(");
    let start = rendered.find(&needle).expect("marker present") + needle.len();
    let rest = &rendered[start..];
    let end = rest.find(")\n").expect("closing paren");
    let literal = &rest[..end];
    let py_str: String = serde_json::from_str(literal).expect("valid json string literal");
    serde_json::from_str(&py_str).expect("valid embedded json")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_metadata() -> Vec<ServerMetadata> {
        vec![ServerMetadata {
            server_name: "stub".into(),
            server_alias: "mcp_stub".into(),
            tools: vec![],
        }]
    }

    #[test]
    fn adversarial_bytes_in_user_code_stay_inert() {
        let tricky = "\"\"\"\\ \n \0 '; os.system(\"evil\") #";
        let rendered = render(tricky, &sample_metadata(), &["stub".into()]);
        // The literal must appear as one JSON-escaped token; it must not
        // have split the surrounding template into two statements.
        assert!(rendered.contains(&py_str_literal(tricky)));
        assert_eq!(
            rendered.matches("USER_CODE_SOURCE =").count(),
            1,
            "template structure must be unaffected by embedded bytes"
        );
    }

    #[test]
    fn metadata_round_trips_through_embedded_json() {
        let metadata = sample_metadata();
        let rendered = render("pass", &metadata, &["stub".into()]);
        let decoded = extract_json_loads_arg(&rendered, "SERVER_METADATA");
        assert_eq!(decoded[0]["server_name"], "stub");
    }

    #[test]
    fn discovered_servers_round_trip() {
        let rendered = render("pass", &[], &["alpha".into(), "beta".into()]);
        let decoded = extract_json_loads_arg(&rendered, "DISCOVERED_SERVERS");
        assert_eq!(decoded, serde_json::json!(["alpha", "beta"]));
    }

    #[test]
    fn renders_are_pure_given_same_inputs() {
        let metadata = sample_metadata();
        let a = render("print(1)", &metadata, &["stub".into()]);
        let b = render("print(1)", &metadata, &["stub".into()]);
        assert_eq!(a, b);
    }
}
