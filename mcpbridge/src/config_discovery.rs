//! Loads the `{name → ServerSpec}` mapping the core treats as opaque input.
//!
//! Out of the core's scope by design (see the crate docs); this is the one
//! of the "straightforward glue" collaborators the core expects to be
//! handed a finished table.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use mcpbridge_core::bridge::ServerTable;
use mcpbridge_core::spec::ServerSpec;
use serde::Deserialize;

#[derive(Debug, Deserialize)]
struct ServerFileEntry {
    command: String,
    #[serde(default)]
    args: Vec<String>,
    #[serde(default)]
    env: HashMap<String, String>,
    #[serde(default)]
    cwd: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ServersFile {
    #[serde(default)]
    servers: HashMap<String, ServerFileEntry>,
}

/// Default discovery path relative to the current working directory.
pub fn default_config_path() -> PathBuf {
    PathBuf::from(".mcp-bridge/servers.json")
}

/// Load a server table from a JSON file shaped as:
/// `{"servers": {"name": {"command": "...", "args": [...], "env": {...}, "cwd": "..."}}}`.
///
/// Missing file is treated as an empty table, not an error, so the bridge
/// can still run `execute` calls that request no downstream servers.
pub fn load(path: &Path) -> Result<ServerTable> {
    if !path.exists() {
        return Ok(ServerTable::new());
    }

    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read server config at {}", path.display()))?;
    let parsed: ServersFile = serde_json::from_str(&raw)
        .with_context(|| format!("failed to parse server config at {}", path.display()))?;

    let table = parsed
        .servers
        .into_iter()
        .map(|(name, entry)| {
            (
                name.clone(),
                ServerSpec {
                    name,
                    command: entry.command,
                    args: entry.args,
                    env: entry.env,
                    cwd: entry.cwd,
                },
            )
        })
        .collect();

    Ok(table)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_file_yields_empty_table() {
        let table = load(Path::new("/nonexistent/path/servers.json")).unwrap();
        assert!(table.is_empty());
    }

    #[test]
    fn parses_servers_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("servers.json");
        std::fs::write(
            &path,
            r#"{"servers": {"stub": {"command": "python3", "args": ["-m", "stub_server"]}}}"#,
        )
        .unwrap();

        let table = load(&path).unwrap();
        assert_eq!(table.len(), 1);
        let spec = &table["stub"];
        assert_eq!(spec.command, "python3");
        assert_eq!(spec.args, vec!["-m", "stub_server"]);
    }
}
