//! Sandboxed multiplexing engine for the MCP code-execution bridge.
//!
//! This crate is the hard part: container lifecycle, the entrypoint
//! renderer, stdio multiplexing, the downstream client pool, the tool
//! catalog, and the per-request invocation scope. Config-file discovery,
//! the outer tool-server framing, and text rendering of results live in the
//! `mcpbridge` binary crate and consume this crate's [`bridge::Bridge`].

pub mod bridge;
pub mod catalog;
pub mod client_pool;
pub mod config;
pub mod entrypoint;
pub mod error;
pub mod invocation;
pub mod logging;
pub mod protocol;
pub mod runtime;
pub mod sandbox_runner;
pub mod spec;

pub use bridge::{Bridge, ServerTable};
pub use config::BridgeConfig;
pub use error::BridgeError;
pub use spec::{SandboxResult, ServerSpec};
