//! Lock session reducer.
//!
//! Pure transition functions over [`SessionState`]: one for foreground
//! samples, one for authentication outcomes. They never block, never do I/O
//! and never retry; the caller serializes access and executes the returned
//! [`Action`] after releasing the session lock.

use applock_daemon_protocol::{AppId, AuthOutcome};
use chrono::{DateTime, Duration, Utc};

use crate::classifier::AppClassifier;
use crate::config::LockConfig;
use crate::session::SessionState;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Action {
    NoAction,
    PresentChallenge(AppId),
    DismissChallenge(AppId),
    KeepChallenge(AppId),
    CaptureIntruderAndKeepChallenge(AppId),
}

impl Action {
    pub fn as_str(&self) -> &'static str {
        match self {
            Action::NoAction => "no_action",
            Action::PresentChallenge(_) => "present_challenge",
            Action::DismissChallenge(_) => "dismiss_challenge",
            Action::KeepChallenge(_) => "keep_challenge",
            Action::CaptureIntruderAndKeepChallenge(_) => "capture_intruder_and_keep_challenge",
        }
    }
}

pub struct SampleContext<'a> {
    pub config: &'a LockConfig,
    pub classifier: &'a dyn AppClassifier,
    pub cooldown: Duration,
}

pub fn reduce_sample(
    session: &mut SessionState,
    ctx: &SampleContext<'_>,
    current: Option<&AppId>,
    now: DateTime<Utc>,
) -> Action {
    // Unknown samples are full no-ops: they neither advance the previous
    // foreground app nor end the session.
    let Some(current) = current else {
        return Action::NoAction;
    };

    // Leaving is only detected on the tick that moves away from the unlocked
    // app, so this runs before the launcher check: locked app -> launcher
    // must still end the session.
    if let Some(unlocked) = session.unlocked_app.as_ref() {
        if unlocked != current && session.last_foreground_app.as_ref() == Some(unlocked) {
            tracing::debug!(app = %unlocked, next = %current, "Lock session ended");
            session.unlocked_app = None;
        }
    }

    if ctx.classifier.is_launcher_or_system(current) || !ctx.config.is_locked(current) {
        session.last_foreground_app = Some(current.clone());
        return Action::NoAction;
    }

    if session.last_foreground_app.as_ref() == Some(current) {
        return Action::NoAction;
    }

    // A negative elapsed time means the clock went backwards; the cooldown
    // counts as expired rather than extending indefinitely.
    if let Some(last_challenge) = session.last_challenge_at.get(current) {
        let elapsed = now.signed_duration_since(*last_challenge);
        if elapsed >= Duration::zero() && elapsed < ctx.cooldown {
            session.last_foreground_app = Some(current.clone());
            return Action::NoAction;
        }
    }

    if session.unlocked_app.as_ref() == Some(current) {
        session.last_foreground_app = Some(current.clone());
        return Action::NoAction;
    }

    session.unlocked_app = None;
    session.last_challenge_at.insert(current.clone(), now);
    session.last_foreground_app = Some(current.clone());
    Action::PresentChallenge(current.clone())
}

pub fn reduce_auth_result(
    session: &mut SessionState,
    config: &LockConfig,
    app: &AppId,
    outcome: AuthOutcome,
    now: DateTime<Utc>,
) -> Action {
    match outcome {
        AuthOutcome::Authenticated => {
            session.failed_attempts.insert(app.clone(), 0);
            session.unlocked_app = Some(app.clone());
            // Stamped so a stale sample queued behind this event cannot
            // re-trigger immediately.
            session.last_challenge_at.insert(app.clone(), now);
            Action::DismissChallenge(app.clone())
        }
        AuthOutcome::Failed => {
            let threshold = config.intruder_threshold.max(1);
            let count = session.failed_attempts_for(app).saturating_add(1);
            if count >= threshold {
                session.failed_attempts.insert(app.clone(), 0);
                if config.intruder_enabled {
                    return Action::CaptureIntruderAndKeepChallenge(app.clone());
                }
                return Action::KeepChallenge(app.clone());
            }
            session.failed_attempts.insert(app.clone(), count);
            Action::KeepChallenge(app.clone())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::classifier::StaticAppClassifier;
    use crate::config::ClassifierSection;
    use chrono::TimeZone;
    use std::collections::HashMap;

    const LAUNCHER: &str = "com.android.launcher3";

    fn app(value: &str) -> AppId {
        AppId::parse(value).expect("app id")
    }

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 1, 31, 0, 0, 0).unwrap()
    }

    fn at(ms: i64) -> DateTime<Utc> {
        t0() + Duration::milliseconds(ms)
    }

    struct Harness {
        session: SessionState,
        config: LockConfig,
        classifier: StaticAppClassifier,
        cooldown: Duration,
    }

    impl Harness {
        fn new(locked: &[&str]) -> Self {
            Self {
                session: SessionState::new(),
                config: LockConfig::with_locked_apps(locked),
                classifier: StaticAppClassifier::from_section(&ClassifierSection::default()),
                cooldown: Duration::milliseconds(2000),
            }
        }

        fn with_intruder(mut self, threshold: u32) -> Self {
            self.config.intruder_enabled = true;
            self.config.intruder_threshold = threshold;
            self
        }

        fn sample(&mut self, current: Option<&str>, ms: i64) -> Action {
            let current = current.map(app);
            let ctx = SampleContext {
                config: &self.config,
                classifier: &self.classifier,
                cooldown: self.cooldown,
            };
            let action = reduce_sample(&mut self.session, &ctx, current.as_ref(), at(ms));
            self.assert_invariants();
            action
        }

        fn auth(&mut self, target: &str, outcome: AuthOutcome, ms: i64) -> Action {
            let action =
                reduce_auth_result(&mut self.session, &self.config, &app(target), outcome, at(ms));
            self.assert_invariants();
            action
        }

        fn assert_invariants(&self) {
            self.session
                .check_invariants(self.config.intruder_threshold)
                .expect("session invariants");
        }
    }

    #[test]
    fn repeated_samples_of_locked_app_challenge_once() {
        let mut h = Harness::new(&["a"]);
        assert_eq!(h.sample(Some("a"), 0), Action::PresentChallenge(app("a")));
        assert_eq!(h.sample(Some("a"), 50), Action::NoAction);
        assert_eq!(h.sample(Some("a"), 100), Action::NoAction);
        assert_eq!(h.session.last_challenge_at.get(&app("a")), Some(&at(0)));
    }

    #[test]
    fn failures_at_threshold_capture_once_and_reset() {
        let mut h = Harness::new(&["a"]).with_intruder(3);
        assert_eq!(h.sample(Some("a"), 0), Action::PresentChallenge(app("a")));
        assert_eq!(
            h.auth("a", AuthOutcome::Failed, 100),
            Action::KeepChallenge(app("a"))
        );
        assert_eq!(
            h.auth("a", AuthOutcome::Failed, 200),
            Action::KeepChallenge(app("a"))
        );
        assert_eq!(
            h.auth("a", AuthOutcome::Failed, 300),
            Action::CaptureIntruderAndKeepChallenge(app("a"))
        );
        assert_eq!(h.session.failed_attempts_for(&app("a")), 0);
        assert!(h.session.unlocked_app.is_none());
    }

    #[test]
    fn leaving_through_launcher_expires_session() {
        let mut h = Harness::new(&["a"]);
        assert_eq!(h.sample(Some("a"), 0), Action::PresentChallenge(app("a")));
        assert_eq!(
            h.auth("a", AuthOutcome::Authenticated, 1000),
            Action::DismissChallenge(app("a"))
        );
        assert_eq!(h.sample(Some("a"), 1200), Action::NoAction);
        assert_eq!(h.sample(Some(LAUNCHER), 1400), Action::NoAction);
        assert!(h.session.unlocked_app.is_none());
        assert_eq!(h.sample(Some("a"), 6000), Action::PresentChallenge(app("a")));
    }

    #[test]
    fn staying_in_unlocked_app_does_not_rechallenge() {
        let mut h = Harness::new(&["a"]);
        h.sample(Some("a"), 0);
        h.auth("a", AuthOutcome::Authenticated, 500);
        assert_eq!(h.sample(Some("a"), 510), Action::NoAction);
        assert_eq!(h.sample(Some("a"), 60_000), Action::NoAction);
        assert_eq!(h.session.unlocked_app, Some(app("a")));
    }

    #[test]
    fn returning_after_lock_screen_overlay_keeps_session() {
        // The presenter's own window shows up as a foreground app while the
        // challenge is displayed.
        let mut h = Harness::new(&["a"]);
        h.classifier = StaticAppClassifier::from_section(&ClassifierSection {
            ignored: vec!["com.example.applock".to_string()],
            ..ClassifierSection::default()
        });
        assert_eq!(h.sample(Some("a"), 0), Action::PresentChallenge(app("a")));
        assert_eq!(h.sample(Some("com.example.applock"), 200), Action::NoAction);
        h.auth("a", AuthOutcome::Authenticated, 5000);
        assert_eq!(h.sample(Some("a"), 5200), Action::NoAction);
        assert_eq!(h.sample(Some("a"), 9000), Action::NoAction);
        assert_eq!(h.session.unlocked_app, Some(app("a")));
    }

    #[test]
    fn switching_to_other_locked_app_expires_session() {
        let mut h = Harness::new(&["a", "b"]);
        h.sample(Some("a"), 0);
        h.auth("a", AuthOutcome::Authenticated, 100);
        h.sample(Some("a"), 200);
        assert_eq!(h.sample(Some("b"), 300), Action::PresentChallenge(app("b")));
        assert!(h.session.unlocked_app.is_none());
        assert_eq!(h.sample(Some("a"), 3000), Action::PresentChallenge(app("a")));
    }

    #[test]
    fn unknown_sample_is_a_full_no_op() {
        let mut h = Harness::new(&["a"]);
        h.sample(Some("a"), 0);
        h.auth("a", AuthOutcome::Authenticated, 100);
        h.sample(Some("a"), 200);
        let before = h.session.clone();
        assert_eq!(h.sample(None, 300), Action::NoAction);
        assert_eq!(h.session, before);
        assert_eq!(h.sample(Some("a"), 400), Action::NoAction);
        assert_eq!(h.session.unlocked_app, Some(app("a")));
    }

    #[test]
    fn unknown_sample_between_apps_does_not_hide_departure() {
        let mut h = Harness::new(&["a"]);
        h.sample(Some("a"), 0);
        h.auth("a", AuthOutcome::Authenticated, 100);
        h.sample(Some("a"), 200);
        h.sample(None, 300);
        h.sample(Some("com.example.notes"), 400);
        assert!(h.session.unlocked_app.is_none());
    }

    #[test]
    fn reentry_within_cooldown_is_a_grace_period() {
        let mut h = Harness::new(&["a"]);
        h.sample(Some("a"), 0);
        h.auth("a", AuthOutcome::Authenticated, 100);
        h.sample(Some("a"), 200);
        h.sample(Some(LAUNCHER), 400);
        assert_eq!(h.sample(Some("a"), 1500), Action::NoAction);
        assert_eq!(h.session.last_foreground_app, Some(app("a")));
    }

    #[test]
    fn unlocked_apps_and_system_ui_never_challenge() {
        let mut h = Harness::new(&["a"]);
        assert_eq!(h.sample(Some("com.example.notes"), 0), Action::NoAction);
        assert_eq!(h.sample(Some("com.android.systemui"), 100), Action::NoAction);
        assert_eq!(
            h.session.last_foreground_app,
            Some(app("com.android.systemui"))
        );
        assert!(h.session.last_challenge_at.is_empty());
    }

    #[test]
    fn locked_launcher_is_still_ignored() {
        let mut h = Harness::new(&[LAUNCHER]);
        assert_eq!(h.sample(Some(LAUNCHER), 0), Action::NoAction);
    }

    #[test]
    fn authentication_resets_failures() {
        let mut h = Harness::new(&["a"]).with_intruder(3);
        h.sample(Some("a"), 0);
        h.auth("a", AuthOutcome::Failed, 100);
        h.auth("a", AuthOutcome::Failed, 200);
        assert_eq!(h.session.failed_attempts_for(&app("a")), 2);
        h.auth("a", AuthOutcome::Authenticated, 300);
        assert_eq!(h.session.failed_attempts_for(&app("a")), 0);
        assert_eq!(
            h.auth("a", AuthOutcome::Failed, 400),
            Action::KeepChallenge(app("a"))
        );
    }

    #[test]
    fn disabled_capture_wraps_counter_without_capture() {
        let mut h = Harness::new(&["a"]);
        h.config.intruder_threshold = 2;
        h.auth("a", AuthOutcome::Failed, 0);
        assert_eq!(
            h.auth("a", AuthOutcome::Failed, 100),
            Action::KeepChallenge(app("a"))
        );
        assert_eq!(h.session.failed_attempts_for(&app("a")), 0);
    }

    #[test]
    fn failures_are_counted_per_app() {
        let mut h = Harness::new(&["a", "b"]).with_intruder(2);
        h.auth("a", AuthOutcome::Failed, 0);
        h.auth("b", AuthOutcome::Failed, 100);
        assert_eq!(h.session.failed_attempts_for(&app("a")), 1);
        assert_eq!(h.session.failed_attempts_for(&app("b")), 1);
        assert_eq!(
            h.auth("b", AuthOutcome::Failed, 200),
            Action::CaptureIntruderAndKeepChallenge(app("b"))
        );
        assert_eq!(h.session.failed_attempts_for(&app("a")), 1);
    }

    #[test]
    fn stale_sample_after_authentication_does_not_retrigger() {
        let mut h = Harness::new(&["a"]);
        h.sample(Some("a"), 0);
        h.sample(Some(LAUNCHER), 100);
        h.auth("a", AuthOutcome::Authenticated, 2500);
        assert_eq!(h.sample(Some("a"), 2600), Action::NoAction);
    }

    #[test]
    fn clock_set_back_does_not_extend_cooldown() {
        let mut h = Harness::new(&["a"]);
        assert_eq!(h.sample(Some("a"), 0), Action::PresentChallenge(app("a")));
        h.sample(Some(LAUNCHER), 100);
        assert_eq!(
            h.sample(Some("a"), -3_600_000),
            Action::PresentChallenge(app("a"))
        );
        assert_eq!(h.session.last_challenge_at.get(&app("a")), Some(&at(-3_600_000)));

        h.sample(Some(LAUNCHER), -3_599_000);
        assert_eq!(h.sample(Some("a"), -3_598_500), Action::NoAction);
    }

    #[derive(Clone, Copy)]
    enum Step {
        Sample(Option<&'static str>),
        Auth(&'static str, AuthOutcome),
    }

    const STEPS: &[Step] = &[
        Step::Sample(Some("a")),
        Step::Sample(Some("b")),
        Step::Sample(Some("com.example.notes")),
        Step::Sample(Some(LAUNCHER)),
        Step::Sample(None),
        Step::Auth("a", AuthOutcome::Authenticated),
        Step::Auth("a", AuthOutcome::Failed),
        Step::Auth("b", AuthOutcome::Failed),
    ];

    /// Independent bookkeeping of what the reducer is allowed to emit.
    #[derive(Clone, Default)]
    struct Model {
        last_present: HashMap<AppId, DateTime<Utc>>,
        failures: HashMap<AppId, u32>,
        // Set by an authentication, cleared by any sample of another app.
        held_session: Option<AppId>,
    }

    fn check_step(h: &mut Harness, model: &mut Model, step: Step, now_ms: i64) {
        let now = at(now_ms);
        match step {
            Step::Sample(current) => {
                let action = h.sample(current, now_ms);
                if let (Some(held), Some(current)) = (model.held_session.clone(), current) {
                    if held.as_str() != current {
                        model.held_session = None;
                    }
                }
                if let Action::PresentChallenge(target) = &action {
                    assert!(h.config.is_locked(target), "challenged unlocked app");
                    assert_eq!(Some(target.as_str()), current);
                    if let Some(previous) = model.last_present.get(target) {
                        assert!(now.signed_duration_since(*previous) >= h.cooldown);
                    }
                    assert_ne!(model.held_session.as_ref(), Some(target));
                    model.last_present.insert(target.clone(), now);
                } else {
                    assert_eq!(action, Action::NoAction);
                }
            }
            Step::Auth(target, outcome) => {
                let target = app(target);
                let action = h.auth(target.as_str(), outcome, now_ms);
                match outcome {
                    AuthOutcome::Authenticated => {
                        assert_eq!(action, Action::DismissChallenge(target.clone()));
                        model.failures.insert(target.clone(), 0);
                        model.held_session = Some(target);
                    }
                    AuthOutcome::Failed => {
                        let count = model.failures.entry(target.clone()).or_insert(0);
                        *count += 1;
                        if *count == h.config.intruder_threshold {
                            *count = 0;
                            let expected = if h.config.intruder_enabled {
                                Action::CaptureIntruderAndKeepChallenge(target.clone())
                            } else {
                                Action::KeepChallenge(target.clone())
                            };
                            assert_eq!(action, expected);
                        } else {
                            assert_eq!(action, Action::KeepChallenge(target.clone()));
                        }
                        assert_eq!(h.session.failed_attempts_for(&target), *count);
                    }
                }
            }
        }
    }

    fn explore(h: &Harness, model: &Model, now_ms: i64, depth: usize, deltas: &[i64]) {
        if depth == 0 {
            return;
        }
        for step in STEPS {
            for delta in deltas {
                let mut h = Harness {
                    session: h.session.clone(),
                    config: h.config.clone(),
                    classifier: h.classifier.clone(),
                    cooldown: h.cooldown,
                };
                let mut model = model.clone();
                let next_ms = now_ms + delta;
                check_step(&mut h, &mut model, *step, next_ms);
                explore(&h, &model, next_ms, depth - 1, deltas);
            }
        }
    }

    #[test]
    fn short_event_sequences_respect_policy_invariants() {
        let base = Harness::new(&["a", "b"]).with_intruder(2);
        explore(&base, &Model::default(), 0, 4, &[50, 2500]);
        explore(&base, &Model::default(), 0, 6, &[700]);

        let mut capture_disabled = Harness::new(&["a", "b"]);
        capture_disabled.config.intruder_threshold = 2;
        explore(&capture_disabled, &Model::default(), 0, 4, &[50, 2500]);
    }
}
