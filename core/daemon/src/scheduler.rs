//! Event intake and the single worker that drives the lock session.
//!
//! A ticker thread samples the foreground observer at a fixed rate and IPC
//! threads submit authentication results; both feed one unbounded FIFO
//! channel. One worker drains it in order, so every session transition is
//! applied in intake order and no event is dropped or coalesced.

use applock_daemon_protocol::{AppId, AuthOutcome};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::{Arc, Mutex, PoisonError};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

use crate::executor::ActionExecutor;
use crate::observer::ForegroundObserver;
use crate::reducer::Action;
use crate::state::LockSessionMachine;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LockEvent {
    Sample {
        app: Option<AppId>,
        at: DateTime<Utc>,
    },
    AuthResult {
        app: AppId,
        outcome: AuthOutcome,
        at: DateTime<Utc>,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IntakeClosed;

/// Wall-clock time at startup advanced by a monotonic timer. Event stamps
/// never go backwards while the daemon runs, even if the system clock does.
#[derive(Debug, Clone, Copy)]
pub struct EventClock {
    wall_origin: DateTime<Utc>,
    origin: Instant,
}

impl EventClock {
    pub fn start() -> Self {
        Self {
            wall_origin: Utc::now(),
            origin: Instant::now(),
        }
    }

    pub fn now(&self) -> DateTime<Utc> {
        chrono::Duration::from_std(self.origin.elapsed())
            .ok()
            .and_then(|elapsed| self.wall_origin.checked_add_signed(elapsed))
            .unwrap_or(DateTime::<Utc>::MAX_UTC)
    }
}

#[derive(Debug, Default)]
pub struct SchedulerStats {
    ticks_enqueued: AtomicU64,
    events_processed: AtomicU64,
    unknown_samples: AtomicU64,
    challenges_presented: AtomicU64,
    intruder_captures: AtomicU64,
    collaborator_failures: AtomicU64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct SchedulerStatsSnapshot {
    pub ticks_enqueued: u64,
    pub events_processed: u64,
    pub unknown_samples: u64,
    pub challenges_presented: u64,
    pub intruder_captures: u64,
    pub collaborator_failures: u64,
}

impl SchedulerStats {
    pub fn record_challenge(&self) {
        self.challenges_presented.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_capture(&self) {
        self.intruder_captures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_collaborator_failure(&self) {
        self.collaborator_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> SchedulerStatsSnapshot {
        SchedulerStatsSnapshot {
            ticks_enqueued: self.ticks_enqueued.load(Ordering::Relaxed),
            events_processed: self.events_processed.load(Ordering::Relaxed),
            unknown_samples: self.unknown_samples.load(Ordering::Relaxed),
            challenges_presented: self.challenges_presented.load(Ordering::Relaxed),
            intruder_captures: self.intruder_captures.load(Ordering::Relaxed),
            collaborator_failures: self.collaborator_failures.load(Ordering::Relaxed),
        }
    }
}

/// Cloneable submission side of the event queue, shared by the ticker and
/// IPC threads.
///
/// Stamping and enqueueing happen under one lock, so queue order matches
/// stamp order. Closing takes the only sender under the same lock: once
/// `close` returns, nothing else can be enqueued, and everything accepted
/// before it is still drained by the worker.
#[derive(Clone)]
pub struct EventIntake {
    sender: Arc<Mutex<Option<Sender<LockEvent>>>>,
    clock: EventClock,
}

impl EventIntake {
    fn new(sender: Sender<LockEvent>, clock: EventClock) -> Self {
        Self {
            sender: Arc::new(Mutex::new(Some(sender))),
            clock,
        }
    }

    pub fn now(&self) -> DateTime<Utc> {
        self.clock.now()
    }

    pub fn submit_auth_result(
        &self,
        app: AppId,
        outcome: AuthOutcome,
    ) -> Result<(), IntakeClosed> {
        self.submit(|at| LockEvent::AuthResult { app, outcome, at })
    }

    fn submit_sample(&self, app: Option<AppId>) -> Result<(), IntakeClosed> {
        self.submit(|at| LockEvent::Sample { app, at })
    }

    fn submit(&self, event: impl FnOnce(DateTime<Utc>) -> LockEvent) -> Result<(), IntakeClosed> {
        let guard = self.sender.lock().map_err(|_| IntakeClosed)?;
        let sender = guard.as_ref().ok_or(IntakeClosed)?;
        sender.send(event(self.clock.now())).map_err(|_| IntakeClosed)
    }

    fn is_open(&self) -> bool {
        self.sender
            .lock()
            .map(|guard| guard.is_some())
            .unwrap_or(false)
    }

    /// Drops the sender. Returns `false` if the intake was already closed.
    fn close(&self) -> bool {
        let mut guard = self.sender.lock().unwrap_or_else(PoisonError::into_inner);
        guard.take().is_some()
    }
}

pub struct SchedulerHandle {
    intake: EventIntake,
    stats: Arc<SchedulerStats>,
    ticker: Option<JoinHandle<()>>,
    worker: Option<JoinHandle<()>>,
}

impl SchedulerHandle {
    pub fn intake(&self) -> EventIntake {
        self.intake.clone()
    }

    #[cfg(test)]
    pub fn stats(&self) -> SchedulerStatsSnapshot {
        self.stats.snapshot()
    }

    pub fn shared_stats(&self) -> Arc<SchedulerStats> {
        Arc::clone(&self.stats)
    }

    /// Refuses new submissions, lets the worker drain what is already queued,
    /// and joins both threads.
    pub fn stop(&mut self) {
        if !self.intake.close() {
            return;
        }
        if let Some(ticker) = self.ticker.take() {
            if ticker.join().is_err() {
                warn!("Ticker thread panicked");
            }
        }
        if let Some(worker) = self.worker.take() {
            if worker.join().is_err() {
                warn!("Lock worker thread panicked");
            }
        }
        info!("Scheduler stopped");
    }
}

impl Drop for SchedulerHandle {
    fn drop(&mut self) {
        self.stop();
    }
}

pub fn spawn_scheduler(
    machine: Arc<LockSessionMachine>,
    observer: Arc<dyn ForegroundObserver>,
    executor: ActionExecutor,
    tick_interval: Duration,
) -> SchedulerHandle {
    let (sender, receiver) = mpsc::channel();
    let intake = EventIntake::new(sender, EventClock::start());
    let stats = Arc::new(SchedulerStats::default());

    let ticker = {
        let intake = intake.clone();
        let stats = Arc::clone(&stats);
        thread::spawn(move || run_ticker(observer, intake, stats, tick_interval))
    };

    let worker = {
        let stats = Arc::clone(&stats);
        thread::spawn(move || run_worker(machine, executor, receiver, stats))
    };

    info!(
        tick_interval_ms = tick_interval.as_millis() as u64,
        "Scheduler started"
    );

    SchedulerHandle {
        intake,
        stats,
        ticker: Some(ticker),
        worker: Some(worker),
    }
}

fn run_ticker(
    observer: Arc<dyn ForegroundObserver>,
    intake: EventIntake,
    stats: Arc<SchedulerStats>,
    tick_interval: Duration,
) {
    let mut next_tick = Instant::now();
    while intake.is_open() {
        let app = observer.sample(intake.now());
        if intake.submit_sample(app).is_err() {
            break;
        }
        stats.ticks_enqueued.fetch_add(1, Ordering::Relaxed);

        // Fixed rate: an overrun tick is followed immediately, never skipped.
        next_tick += tick_interval;
        let now = Instant::now();
        if next_tick > now {
            thread::sleep(next_tick - now);
        }
    }
}

/// Runs until every sender is gone and the queue is empty.
fn run_worker(
    machine: Arc<LockSessionMachine>,
    executor: ActionExecutor,
    receiver: Receiver<LockEvent>,
    stats: Arc<SchedulerStats>,
) {
    for event in receiver {
        let (action, at) = match event {
            LockEvent::Sample { app, at } => {
                if app.is_none() {
                    stats.unknown_samples.fetch_add(1, Ordering::Relaxed);
                }
                (machine.on_sample(app.as_ref(), at), at)
            }
            LockEvent::AuthResult { app, outcome, at } => {
                debug!(app = %app, outcome = outcome.as_str(), "Applying auth result");
                (machine.on_auth_result(&app, outcome, at), at)
            }
        };
        stats.events_processed.fetch_add(1, Ordering::Relaxed);

        if action != Action::NoAction {
            debug!(action = action.as_str(), "Lock session action");
        }
        let threshold = machine.policy_snapshot().intruder_threshold;
        executor.execute(&action, threshold, at, &stats);
    }
}
