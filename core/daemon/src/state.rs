//! Shared lock session machine.
//!
//! Wraps the pure reducer with the two synchronization boundaries the daemon
//! needs: one mutex around the session (every mutation runs under it) and a
//! swappable policy snapshot that reloads without touching the session.

use applock_daemon_protocol::{AppId, AuthOutcome};
use chrono::{DateTime, Duration, Utc};
use std::sync::{Arc, Mutex, RwLock};

use crate::classifier::AppClassifier;
use crate::config::{LockConfig, LockType};
use crate::reducer::{reduce_auth_result, reduce_sample, Action, SampleContext};
use crate::session::{SessionSnapshot, SessionState};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum VerifyError {
    BiometricLock,
}

pub struct LockSessionMachine {
    policy: RwLock<Arc<LockConfig>>,
    session: Mutex<SessionState>,
    classifier: Box<dyn AppClassifier>,
    cooldown: Duration,
}

impl LockSessionMachine {
    pub fn new(policy: LockConfig, classifier: Box<dyn AppClassifier>, cooldown: Duration) -> Self {
        Self {
            policy: RwLock::new(Arc::new(policy)),
            session: Mutex::new(SessionState::new()),
            classifier,
            cooldown,
        }
    }

    pub fn cooldown(&self) -> Duration {
        self.cooldown
    }

    pub fn on_sample(&self, current: Option<&AppId>, now: DateTime<Utc>) -> Action {
        let policy = self.policy_snapshot();
        let ctx = SampleContext {
            config: &policy,
            classifier: self.classifier.as_ref(),
            cooldown: self.cooldown,
        };

        let mut session = match self.session.lock() {
            Ok(session) => session,
            Err(err) => {
                tracing::warn!(error = %err, "Session lock poisoned; dropping sample");
                return Action::NoAction;
            }
        };
        reduce_sample(&mut session, &ctx, current, now)
    }

    pub fn on_auth_result(&self, app: &AppId, outcome: AuthOutcome, now: DateTime<Utc>) -> Action {
        let policy = self.policy_snapshot();
        let mut session = match self.session.lock() {
            Ok(session) => session,
            Err(err) => {
                tracing::warn!(error = %err, "Session lock poisoned; dropping auth result");
                return Action::NoAction;
            }
        };
        let action = reduce_auth_result(&mut session, &policy, app, outcome, now);
        // Only the touched counter: a reload may have lowered the threshold
        // below counters of other apps, which their next failure corrects.
        debug_assert!(session.failed_attempts_for(app) < policy.intruder_threshold.max(1));
        action
    }

    /// Swaps the policy snapshot. Readers holding the previous `Arc` finish
    /// with it; the session is left untouched.
    pub fn reload_policy(&self, policy: LockConfig) {
        let locked_apps = policy.locked_apps.len();
        let intruder_enabled = policy.intruder_enabled;
        match self.policy.write() {
            Ok(mut guard) => *guard = Arc::new(policy),
            Err(poisoned) => *poisoned.into_inner() = Arc::new(policy),
        }
        tracing::info!(locked_apps, intruder_enabled, "Lock policy reloaded");
    }

    pub fn policy_snapshot(&self) -> Arc<LockConfig> {
        match self.policy.read() {
            Ok(guard) => Arc::clone(&guard),
            Err(poisoned) => Arc::clone(&poisoned.into_inner()),
        }
    }

    pub fn session_snapshot(&self) -> SessionSnapshot {
        self.session
            .lock()
            .map(|session| session.snapshot())
            .unwrap_or_else(|poisoned| poisoned.into_inner().snapshot())
    }

    /// Compares an entered secret against the configured one. The outcome is
    /// returned to the caller, which feeds it back through the event queue
    /// so it is ordered with the samples.
    pub fn verify_secret(&self, candidate: &str) -> Result<AuthOutcome, VerifyError> {
        let policy = self.policy_snapshot();
        if policy.lock_type == LockType::Biometric {
            return Err(VerifyError::BiometricLock);
        }
        if policy.secret.matches(candidate) {
            Ok(AuthOutcome::Authenticated)
        } else {
            Ok(AuthOutcome::Failed)
        }
    }
}
