//! Foreground application sampling.

use applock_daemon_protocol::AppId;
use chrono::{DateTime, Duration, TimeZone, Utc};
use std::time::Duration as StdDuration;

use crate::config::ObserverSection;
use crate::process::run_for_stdout;

const MAX_SIGNAL_AGE_CAP_SECS: u64 = 24 * 60 * 60;
const MIN_COMMAND_TIMEOUT: StdDuration = StdDuration::from_millis(100);

/// Reports which application currently owns the screen.
///
/// Never fails: transient unavailability is reported as `None` and the
/// scheduler simply tries again on the next tick.
pub trait ForegroundObserver: Send + Sync {
    fn sample(&self, now: DateTime<Utc>) -> Option<AppId>;
}

/// Runs an external command per tick. The first stdout line is either
/// `<app_id>` or `<app_id>\t<last_used_epoch_ms>`; a last-used time older
/// than `max_signal_age` means there is no recent signal.
///
/// A run that outlasts one tick interval (at least 100 ms) is killed and
/// counts as unknown, so a hung command cannot hold up the ticker.
#[derive(Debug, Clone)]
pub struct CommandForegroundObserver {
    command: Vec<String>,
    max_signal_age: Duration,
    timeout: StdDuration,
}

impl CommandForegroundObserver {
    pub fn from_section(section: &ObserverSection, tick_interval: StdDuration) -> Self {
        Self {
            command: section.command.clone(),
            max_signal_age: Duration::seconds(
                section.max_signal_age_secs.min(MAX_SIGNAL_AGE_CAP_SECS) as i64,
            ),
            timeout: tick_interval.max(MIN_COMMAND_TIMEOUT),
        }
    }

    pub fn is_configured(&self) -> bool {
        !self.command.is_empty()
    }
}

impl ForegroundObserver for CommandForegroundObserver {
    fn sample(&self, now: DateTime<Utc>) -> Option<AppId> {
        if self.command.is_empty() {
            return None;
        }
        let output = run_for_stdout(&self.command, self.timeout)?;
        parse_observer_output(&output, now, self.max_signal_age)
    }
}

pub fn parse_observer_output(
    output: &str,
    now: DateTime<Utc>,
    max_signal_age: Duration,
) -> Option<AppId> {
    let line = output.lines().map(str::trim).find(|line| !line.is_empty())?;
    let mut parts = line.split('\t');
    let app = parts.next()?.trim();

    if let Some(raw_last_used) = parts.next().map(str::trim).filter(|value| !value.is_empty()) {
        let last_used_ms = raw_last_used.parse::<i64>().ok()?;
        let last_used = Utc.timestamp_millis_opt(last_used_ms).single()?;
        if now.signed_duration_since(last_used) > max_signal_age {
            return None;
        }
    }

    AppId::parse(app).ok()
}
