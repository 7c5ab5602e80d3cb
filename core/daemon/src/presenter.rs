use applock_daemon_protocol::AppId;

use crate::config::PresenterSection;
use crate::error::Result;
use crate::process::spawn_detached;

/// Shows the lock challenge for an app. Outcomes come back later through the
/// `auth_result` / `verify_secret` IPC methods, not through this trait.
pub trait ChallengePresenter: Send + Sync {
    fn present(&self, app: &AppId) -> Result<()>;

    /// Called after a successful authentication. Presenters that close
    /// themselves on success can rely on the default.
    fn dismiss(&self, _app: &AppId) -> Result<()> {
        Ok(())
    }
}

/// Spawns the configured command with the target app id appended.
#[derive(Debug, Clone, Default)]
pub struct CommandChallengePresenter {
    command: Vec<String>,
    dismiss_command: Vec<String>,
}

impl CommandChallengePresenter {
    pub fn from_section(section: &PresenterSection) -> Self {
        Self {
            command: section.command.clone(),
            dismiss_command: section.dismiss_command.clone(),
        }
    }
}

impl ChallengePresenter for CommandChallengePresenter {
    fn present(&self, app: &AppId) -> Result<()> {
        spawn_detached(
            "presenter",
            &self.command,
            &[app.to_string()],
            &[("APPLOCK_APP", app.to_string())],
        )
    }

    fn dismiss(&self, app: &AppId) -> Result<()> {
        if self.dismiss_command.is_empty() {
            return Ok(());
        }
        spawn_detached(
            "presenter dismiss",
            &self.dismiss_command,
            &[app.to_string()],
            &[("APPLOCK_APP", app.to_string())],
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::LockError;

    #[test]
    fn present_without_command_is_an_error() {
        let presenter = CommandChallengePresenter::default();
        let app = AppId::parse("com.example.bank").unwrap();
        assert!(matches!(
            presenter.present(&app),
            Err(LockError::CommandMissing("presenter"))
        ));
        assert!(presenter.dismiss(&app).is_ok());
    }
}
