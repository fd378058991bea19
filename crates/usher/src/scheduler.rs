//! Fixed-rate tick loop.
//!
//! Ticks run on the blocking pool because every surface call is
//! synchronous. A tick that finds the previous one still holding the session
//! is skipped rather than queued.

use crate::error::SessionError;
use crate::session::{Session, TickReport};
use std::sync::{Arc, Mutex, TryLockError};
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Called before every tick. Returning false ends the run.
pub type TickHook = Arc<dyn Fn() -> bool + Send + Sync>;

/// How a run ended.
#[derive(Debug)]
pub enum RunOutcome {
    Cancelled,
    /// The pre-tick hook asked to stop.
    Finished,
    Fatal(SessionError),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum TickStatus {
    Ran,
    Busy,
}

pub struct Scheduler {
    session: Arc<Mutex<Session>>,
    interval: Duration,
    before_tick: Option<TickHook>,
}

impl Scheduler {
    pub fn new(session: Arc<Mutex<Session>>, interval: Duration) -> Self {
        Self {
            session,
            interval,
            before_tick: None,
        }
    }

    pub fn with_hook(mut self, hook: TickHook) -> Self {
        self.before_tick = Some(hook);
        self
    }

    /// Tick until cancelled, the hook says stop, or a fatal error.
    pub async fn run(self, shutdown: CancellationToken) -> RunOutcome {
        let mut interval = tokio::time::interval(self.interval);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        info!(interval_ms = self.interval.as_millis() as u64, "scheduler started");

        loop {
            tokio::select! {
                biased;
                _ = shutdown.cancelled() => {
                    info!("scheduler cancelled");
                    return RunOutcome::Cancelled;
                }
                _ = interval.tick() => {}
            }

            if let Some(hook) = &self.before_tick {
                if !hook() {
                    info!("tick source exhausted");
                    return RunOutcome::Finished;
                }
            }

            let session = self.session.clone();
            let joined = tokio::task::spawn_blocking(move || run_one(&session)).await;

            match joined {
                Ok(Ok((TickStatus::Ran, report))) => {
                    debug!(?report, "tick complete");
                }
                Ok(Ok((TickStatus::Busy, _))) => {
                    warn!("previous tick still running; skipping");
                }
                Ok(Err(e)) => {
                    error!(error = %e, "fatal error; stopping");
                    return RunOutcome::Fatal(e);
                }
                Err(e) => {
                    error!(error = %e, "tick task panicked");
                    return RunOutcome::Fatal(SessionError::Surface(
                        crate::error::SurfaceError::Other(format!("tick panicked: {e}")),
                    ));
                }
            }
        }
    }
}

fn run_one(session: &Mutex<Session>) -> Result<(TickStatus, TickReport), SessionError> {
    let mut guard = match session.try_lock() {
        Ok(guard) => guard,
        Err(TryLockError::WouldBlock) => return Ok((TickStatus::Busy, TickReport::default())),
        Err(TryLockError::Poisoned(poisoned)) => poisoned.into_inner(),
    };
    guard.tick().map(|report| (TickStatus::Ran, report))
}
