use std::path::PathBuf;

use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

pub const LOG_DIR_ENV: &str = "ASSIGNWATCH_LOG_DIR";
const DEFAULT_DIRECTIVE: &str = "assignwatch=info";

/// Console logging filtered by `RUST_LOG`, plus a daily-rolling JSON file
/// when `ASSIGNWATCH_LOG_DIR` is set. Keep the returned guard alive until
/// exit so buffered file output is flushed.
pub fn init_logging() -> Option<WorkerGuard> {
    // Targets match by prefix, so this covers every assignwatch_* crate.
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_DIRECTIVE));

    let log_dir = std::env::var(LOG_DIR_ENV)
        .ok()
        .filter(|v| !v.trim().is_empty())
        .map(PathBuf::from);
    let (file_layer, guard) = match log_dir {
        Some(dir) => {
            let appender = tracing_appender::rolling::daily(dir, "assignwatch.log");
            let (writer, guard) = tracing_appender::non_blocking(appender);
            (Some(fmt::layer().json().with_writer(writer)), Some(guard))
        }
        None => (None, None),
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_writer(std::io::stderr))
        .with(file_layer)
        .init();

    guard
}
