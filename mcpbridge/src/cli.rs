//! Command-line entry point, following the teacher's `clap` derive style.

use std::path::PathBuf;

use clap::Parser;

#[derive(Debug, Parser)]
#[command(name = "mcpbridge", about = "Sandboxed Python execution bridge for MCP hosts")]
pub struct Cli {
    /// Path to the `{name → server-spec}` JSON config file.
    #[arg(long, env = "MCP_BRIDGE_SERVERS_FILE")]
    pub servers_file: Option<PathBuf>,

    /// Log level passed to the tracing env-filter default.
    #[arg(long, env = "MCP_BRIDGE_LOG_LEVEL", default_value = "info")]
    pub log_level: String,

    /// Log to a daily-rolling file in the platform cache dir instead of stderr.
    #[arg(long, env = "MCP_BRIDGE_LOG_TO_FILE")]
    pub log_to_file: bool,
}
