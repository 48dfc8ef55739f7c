//! Logging initialization, adapted to daily-rolling file logs with a
//! stderr fallback when the cache directory cannot be determined.

use std::io::stderr;
use std::path::Path;
use std::sync::Once;

use anyhow::Result;
use directories::ProjectDirs;
use tracing_subscriber::{fmt::layer, prelude::*, EnvFilter};

static INIT: Once = Once::new();

fn test_write_permission(dir: &Path) -> bool {
    std::fs::create_dir_all(dir).is_ok() && {
        let probe = dir.join(".write_test");
        let ok = std::fs::write(&probe, b"ok").is_ok();
        let _ = std::fs::remove_file(&probe);
        ok
    }
}

/// Initialize the global tracing subscriber. Safe to call more than once;
/// only the first call takes effect.
pub fn init_logging(log_level: &str, log_to_file: bool) -> Result<()> {
    INIT.call_once(|| {
        let env_filter = EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| EnvFilter::new(format!("{log_level},mcpbridge=debug")));

        if log_to_file {
            if let Some(proj_dirs) = ProjectDirs::from("dev", "MCPBridge", "mcpbridge") {
                let log_dir = proj_dirs.cache_dir();
                if test_write_permission(log_dir) {
                    let file_appender = tracing_appender::rolling::daily(log_dir, "mcpbridge.log");
                    let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);

                    tracing_subscriber::registry()
                        .with(env_filter)
                        .with(layer().with_writer(non_blocking).with_ansi(false))
                        .init();
                    // Leaked so the non-blocking writer keeps flushing for the
                    // life of the process.
                    Box::leak(Box::new(guard));
                    return;
                }
            }
        }

        tracing_subscriber::registry()
            .with(env_filter)
            .with(layer().with_writer(stderr).with_ansi(true))
            .init();
    });

    Ok(())
}

/// Verbose stderr logging for test binaries.
pub fn init_test_logging() {
    let _ = init_logging("trace", false);
}
