//! Log setup: a file under `~/.hfw/logs`, stderr only when debugging.
//!
//! stdout belongs to the interactive prompt, so nothing logs there.

use std::env;
use std::path::PathBuf;

use fs_err as fs;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::prelude::*;
use tracing_subscriber::{fmt, EnvFilter};

const DEBUG_ENV: &str = "HFW_DEBUG_LOG";
const LOG_FILE_PREFIX: &str = "hfw-tabs.log";

/// Keep the guard alive for the life of the process; dropping it flushes.
pub fn init() -> Option<WorkerGuard> {
    let debug_enabled = env::var(DEBUG_ENV)
        .map(|value| matches!(value.as_str(), "1" | "true" | "TRUE" | "yes" | "YES"))
        .unwrap_or(false);
    let filter = if debug_enabled {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    };

    let (file_layer, guard) = match log_dir() {
        Some(dir) => {
            let appender = tracing_appender::rolling::daily(dir, LOG_FILE_PREFIX);
            let (writer, guard) = tracing_appender::non_blocking(appender);
            (
                Some(fmt::layer().with_ansi(false).with_writer(writer)),
                Some(guard),
            )
        }
        None => (None, None),
    };
    let stderr_layer = (debug_enabled || file_layer.is_none())
        .then(|| fmt::layer().with_writer(std::io::stderr));

    let _ = tracing_subscriber::registry()
        .with(filter)
        .with(file_layer)
        .with(stderr_layer)
        .try_init();

    guard
}

fn log_dir() -> Option<PathBuf> {
    let dir = hfw_session::get_hfw_dir()?.join("logs");
    fs::create_dir_all(&dir).ok()?;
    Some(dir)
}
