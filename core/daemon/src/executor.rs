//! Executes reducer actions against the collaborators.
//!
//! Runs on the worker thread after the session lock is released. Every
//! collaborator error stops here: it is logged, counted, and never fed back
//! into the session.

use chrono::{DateTime, Utc};
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::intruder::{CaptureContext, IntruderCaptureTrigger};
use crate::presenter::ChallengePresenter;
use crate::reducer::Action;
use crate::scheduler::SchedulerStats;

pub struct ActionExecutor {
    presenter: Arc<dyn ChallengePresenter>,
    capture: Arc<dyn IntruderCaptureTrigger>,
}

impl ActionExecutor {
    pub fn new(
        presenter: Arc<dyn ChallengePresenter>,
        capture: Arc<dyn IntruderCaptureTrigger>,
    ) -> Self {
        Self { presenter, capture }
    }

    pub fn execute(
        &self,
        action: &Action,
        intruder_threshold: u32,
        now: DateTime<Utc>,
        stats: &SchedulerStats,
    ) {
        match action {
            Action::NoAction => {}
            Action::PresentChallenge(app) => {
                info!(app = %app, "Presenting lock challenge");
                stats.record_challenge();
                if let Err(err) = self.presenter.present(app) {
                    stats.record_collaborator_failure();
                    warn!(app = %app, error = %err, "Challenge presenter failed");
                }
            }
            Action::DismissChallenge(app) => {
                info!(app = %app, "Lock challenge passed");
                if let Err(err) = self.presenter.dismiss(app) {
                    stats.record_collaborator_failure();
                    warn!(app = %app, error = %err, "Challenge dismiss failed");
                }
            }
            Action::KeepChallenge(app) => {
                debug!(app = %app, "Authentication failed; challenge stays up");
            }
            Action::CaptureIntruderAndKeepChallenge(app) => {
                warn!(
                    app = %app,
                    failed_attempts = intruder_threshold,
                    "Intruder threshold reached; capturing"
                );
                stats.record_capture();
                let context = CaptureContext {
                    app: app.clone(),
                    failed_attempts: intruder_threshold,
                    at: now,
                };
                if let Err(err) = self.capture.capture(&context) {
                    stats.record_collaborator_failure();
                    warn!(app = %app, error = %err, "Intruder capture failed");
                }
            }
        }
    }
}


#[cfg(test)]
mod tests {
    use super::testing::{RecordingCapture, RecordingPresenter};
    use super::*;
    use applock_daemon_protocol::AppId;

    fn app() -> AppId {
        AppId::parse("com.example.bank").unwrap()
    }

    #[test]
    fn capture_failure_is_swallowed_and_counted() {
        let presenter = Arc::new(RecordingPresenter::default());
        let capture = Arc::new(RecordingCapture {
            fail: true,
            ..RecordingCapture::default()
        });
        let executor = ActionExecutor::new(presenter, capture.clone());
        let stats = SchedulerStats::default();

        executor.execute(
            &Action::CaptureIntruderAndKeepChallenge(app()),
            3,
            Utc::now(),
            &stats,
        );

        let captures = capture.captures.lock().unwrap();
        assert_eq!(captures.len(), 1);
        assert_eq!(captures[0].failed_attempts, 3);
        let snapshot = stats.snapshot();
        assert_eq!(snapshot.intruder_captures, 1);
        assert_eq!(snapshot.collaborator_failures, 1);
    }

    #[test]
    fn present_and_dismiss_reach_presenter() {
        let presenter = Arc::new(RecordingPresenter::default());
        let capture = Arc::new(RecordingCapture::default());
        let executor = ActionExecutor::new(presenter.clone(), capture.clone());
        let stats = SchedulerStats::default();

        executor.execute(&Action::PresentChallenge(app()), 3, Utc::now(), &stats);
        executor.execute(&Action::KeepChallenge(app()), 3, Utc::now(), &stats);
        executor.execute(&Action::DismissChallenge(app()), 3, Utc::now(), &stats);

        assert_eq!(presenter.presented.lock().unwrap().as_slice(), &[app()]);
        assert_eq!(presenter.dismissed.lock().unwrap().as_slice(), &[app()]);
        assert!(capture.captures.lock().unwrap().is_empty());
        assert_eq!(stats.snapshot().challenges_presented, 1);
    }
}
