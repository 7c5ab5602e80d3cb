//! File logging for the hook CLI.
//!
//! Stdout carries command output, so logs go to a daily rolling file under
//! `~/.applock/logs/`. The returned guard must live until exit so the
//! non-blocking writer flushes.

use std::env;
use std::path::PathBuf;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::EnvFilter;

const LOG_FILE_PREFIX: &str = "hook.log";
const DEBUG_ENV: &str = "APPLOCK_DEBUG_LOG";

pub fn init() -> Option<WorkerGuard> {
    let log_dir = match log_dir() {
        Some(dir) => dir,
        None => {
            eprintln!("applock-hook: home directory not found; logging disabled");
            return None;
        }
    };
    if let Err(err) = fs_err::create_dir_all(&log_dir) {
        eprintln!("applock-hook: logging disabled: {}", err);
        return None;
    }

    let appender = tracing_appender::rolling::daily(&log_dir, LOG_FILE_PREFIX);
    let (writer, guard) = tracing_appender::non_blocking(appender);

    let result = tracing_subscriber::fmt()
        .with_env_filter(filter())
        .with_writer(writer)
        .with_ansi(false)
        .try_init();
    if result.is_err() {
        return None;
    }
    Some(guard)
}

fn log_dir() -> Option<PathBuf> {
    dirs::home_dir().map(|home| home.join(".applock").join("logs"))
}

fn filter() -> EnvFilter {
    let debug_enabled = env::var(DEBUG_ENV)
        .map(|value| matches!(value.as_str(), "1" | "true" | "TRUE" | "yes" | "YES"))
        .unwrap_or(false);
    if debug_enabled {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    }
}
