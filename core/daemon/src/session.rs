//! Lock session state owned by the daemon's single writer.

use applock_daemon_protocol::AppId;
use chrono::{DateTime, SecondsFormat, Utc};
use serde::Serialize;
use std::collections::{BTreeMap, HashMap};

/// Mutable session state. Only the reducer touches it, and only while the
/// owning mutex is held. Lost on restart by design of the service: the next
/// entry into a locked app simply challenges again.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SessionState {
    pub last_foreground_app: Option<AppId>,
    /// The single app authenticated for the ongoing visit.
    pub unlocked_app: Option<AppId>,
    /// Cooldown ledger. Entries are inserted or overwritten, never removed.
    pub last_challenge_at: HashMap<AppId, DateTime<Utc>>,
    /// Consecutive failures, always below the intruder threshold between
    /// transitions.
    pub failed_attempts: HashMap<AppId, u32>,
}

impl SessionState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn failed_attempts_for(&self, app: &AppId) -> u32 {
        self.failed_attempts.get(app).copied().unwrap_or(0)
    }

    /// Returns the first violated invariant, if any.
    #[cfg(test)]
    pub fn check_invariants(&self, threshold: u32) -> Result<(), String> {
        for (app, count) in &self.failed_attempts {
            if *count >= threshold {
                return Err(format!(
                    "failed_attempts for {} is {} (threshold {})",
                    app, count, threshold
                ));
            }
        }
        // Authentication stamps the ledger, so an unlocked app always has an entry.
        if let Some(unlocked) = &self.unlocked_app {
            if !self.last_challenge_at.contains_key(unlocked) {
                return Err(format!("{} is unlocked with no ledger entry", unlocked));
            }
        }
        Ok(())
    }

    pub fn snapshot(&self) -> SessionSnapshot {
        SessionSnapshot {
            last_foreground_app: self.last_foreground_app.clone(),
            unlocked_app: self.unlocked_app.clone(),
            last_challenge_at: self
                .last_challenge_at
                .iter()
                .map(|(app, at)| {
                    (
                        app.to_string(),
                        at.to_rfc3339_opts(SecondsFormat::Millis, true),
                    )
                })
                .collect(),
            failed_attempts: self
                .failed_attempts
                .iter()
                .filter(|(_, count)| **count > 0)
                .map(|(app, count)| (app.to_string(), *count))
                .collect(),
        }
    }
}

/// Serializable view of [`SessionState`] for `get_session`.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct SessionSnapshot {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_foreground_app: Option<AppId>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub unlocked_app: Option<AppId>,
    pub last_challenge_at: BTreeMap<String, String>,
    pub failed_attempts: BTreeMap<String, u32>,
}
