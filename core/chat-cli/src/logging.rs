//! File logging for the terminal client.
//!
//! Log lines go to `~/.redis-chat/logs/redis-chat.log.<date>` so they never
//! interleave with the interactive prompt.

use std::env;
use std::path::PathBuf;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::EnvFilter;

const DEBUG_ENV: &str = "REDIS_CHAT_DEBUG_LOG";
const LOG_FILE_PREFIX: &str = "redis-chat.log";

/// Installs the global subscriber. Keep the guard alive until exit so
/// buffered lines are flushed; `None` means logging is disabled.
pub fn init() -> Option<WorkerGuard> {
    let dir = log_dir()?;
    if let Err(err) = fs_err::create_dir_all(&dir) {
        eprintln!("redis-chat: logging disabled: {}", err);
        return None;
    }

    let appender = tracing_appender::rolling::daily(&dir, LOG_FILE_PREFIX);
    let (writer, guard) = tracing_appender::non_blocking(appender);

    tracing_subscriber::fmt()
        .with_env_filter(build_filter(env::var(DEBUG_ENV).ok().as_deref()))
        .with_writer(writer)
        .with_ansi(false)
        .with_target(false)
        .try_init()
        .ok()?;

    Some(guard)
}

fn log_dir() -> Option<PathBuf> {
    chat_core::config::data_dir().map(|dir| dir.join("logs"))
}

fn debug_enabled(value: Option<&str>) -> bool {
    matches!(value, Some("1" | "true" | "TRUE" | "yes" | "YES"))
}

fn build_filter(debug_value: Option<&str>) -> EnvFilter {
    if debug_enabled(debug_value) {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    }
}
