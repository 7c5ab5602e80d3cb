//! Error types for applock-daemon operations.

use std::path::PathBuf;

/// Errors raised by the daemon's configuration and collaborator layers.
///
/// None of these ever reach the lock session reducer: configuration errors
/// fall back to the previous (or safe default) policy, and collaborator
/// errors are logged and swallowed by the action executor.
#[derive(Debug, thiserror::Error)]
pub enum LockError {
    #[error("Home directory not found")]
    HomeNotFound,

    #[error("Failed to read config {path}: {source}")]
    ConfigRead {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse config {path}: {source}")]
    ConfigParse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },

    #[error("Failed to prepare capture directory {path}: {source}")]
    CaptureDir {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("No command configured for {0}")]
    CommandMissing(&'static str),

    #[error("Failed to spawn {program}: {source}")]
    CommandSpawn {
        program: String,
        #[source]
        source: std::io::Error,
    },
}

pub type Result<T> = std::result::Result<T, LockError>;
