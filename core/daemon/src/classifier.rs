use applock_daemon_protocol::AppId;
use std::collections::HashSet;

use crate::config::ClassifierSection;

/// Decides which foreground identifiers are the home screen, system UI or
/// otherwise never subject to locking (the lock presenter's own package).
pub trait AppClassifier: Send + Sync {
    fn is_launcher_or_system(&self, app: &AppId) -> bool;
}

#[derive(Debug, Clone, Default)]
pub struct StaticAppClassifier {
    exempt: HashSet<String>,
}

impl StaticAppClassifier {
    pub fn from_section(section: &ClassifierSection) -> Self {
        let exempt = section
            .launchers
            .iter()
            .chain(section.system.iter())
            .chain(section.ignored.iter())
            .map(|value| value.trim().to_string())
            .filter(|value| !value.is_empty())
            .collect();
        Self { exempt }
    }
}

impl AppClassifier for StaticAppClassifier {
    fn is_launcher_or_system(&self, app: &AppId) -> bool {
        self.exempt.contains(app.as_str())
    }
}
