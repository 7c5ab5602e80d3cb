//! Covert evidence capture after repeated authentication failures.

use applock_daemon_protocol::AppId;
use chrono::{DateTime, Utc};
use std::path::{Path, PathBuf};

use crate::config::CaptureSection;
use crate::error::{LockError, Result};
use crate::process::spawn_detached;

const CAPTURE_DIR_NAME: &str = "intruder_images";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CaptureContext {
    pub app: AppId,
    pub failed_attempts: u32,
    pub at: DateTime<Utc>,
}

/// Best-effort capture. Implementations must return quickly; the executor
/// logs and drops any error and never calls again for the same crossing.
pub trait IntruderCaptureTrigger: Send + Sync {
    fn capture(&self, context: &CaptureContext) -> Result<()>;
}

/// Spawns the configured capture command with the app id and the output
/// file path (`<output_dir>/intruder_<epoch_ms>.jpg`) appended.
#[derive(Debug, Clone)]
pub struct CommandIntruderCapture {
    command: Vec<String>,
    output_dir: PathBuf,
}

impl CommandIntruderCapture {
    pub fn from_section(section: &CaptureSection, applock_home: &Path) -> Self {
        Self {
            command: section.command.clone(),
            output_dir: section
                .output_dir
                .clone()
                .unwrap_or_else(|| applock_home.join(CAPTURE_DIR_NAME)),
        }
    }

    pub fn output_path(&self, at: DateTime<Utc>) -> PathBuf {
        self.output_dir
            .join(format!("intruder_{}.jpg", at.timestamp_millis()))
    }
}

impl IntruderCaptureTrigger for CommandIntruderCapture {
    fn capture(&self, context: &CaptureContext) -> Result<()> {
        if self.command.is_empty() {
            return Err(LockError::CommandMissing("capture"));
        }
        fs_err::create_dir_all(&self.output_dir).map_err(|source| LockError::CaptureDir {
            path: self.output_dir.clone(),
            source,
        })?;

        let output_path = self.output_path(context.at);
        spawn_detached(
            "capture",
            &self.command,
            &[
                context.app.to_string(),
                output_path.to_string_lossy().to_string(),
            ],
            &[
                ("APPLOCK_APP", context.app.to_string()),
                (
                    "APPLOCK_FAILED_ATTEMPTS",
                    context.failed_attempts.to_string(),
                ),
            ],
        )
    }
}
