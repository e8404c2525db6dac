//! Completion supervisor: guarantees the onboarding flow ends exactly once.
//!
//! Two paths race inside a single `tokio::select!`:
//! - **progress**: poll the overall percentage every `poll_interval` and
//!   finish once it reaches `completion_threshold`
//! - **timeout**: finish unconditionally after `hard_timeout`
//!
//! The select drops whichever branch loses, so neither timer can fire after
//! the other has won. The state transition to `Completed` is a
//! compare-and-set on a watch channel, which also settles races with
//! `cancel()`.

use serde::Serialize;
use std::sync::Arc;
use std::sync::atomic::{AtomicU8, Ordering};
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::aggregator::ProgressSnapshot;

pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(1);
/// Below 100 so a phase that never sends its final event cannot stall the flow.
pub const DEFAULT_COMPLETION_THRESHOLD: u8 = 90;
pub const DEFAULT_HARD_TIMEOUT: Duration = Duration::from_secs(5 * 60);

#[derive(Debug, Clone)]
pub struct SupervisorSettings {
    pub poll_interval: Duration,
    pub completion_threshold: u8,
    pub hard_timeout: Duration,
}

impl Default for SupervisorSettings {
    fn default() -> Self {
        Self {
            poll_interval: DEFAULT_POLL_INTERVAL,
            completion_threshold: DEFAULT_COMPLETION_THRESHOLD,
            hard_timeout: DEFAULT_HARD_TIMEOUT,
        }
    }
}

/// Which path ended the flow.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "reason", rename_all = "snake_case")]
pub enum CompletionReason {
    ThresholdReached { overall: u8 },
    TimedOut,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SupervisorState {
    Idle,
    Watching,
    Completed(CompletionReason),
    Cancelled,
}

impl SupervisorState {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            SupervisorState::Completed(_) | SupervisorState::Cancelled
        )
    }
}

/// Anything the supervisor can poll for an overall percentage.
pub trait ProgressSource: Send + Sync + 'static {
    fn overall(&self) -> u8;

    /// Called on every poll tick, before `overall`.
    fn on_tick(&self) {}
}

impl ProgressSource for watch::Receiver<ProgressSnapshot> {
    fn overall(&self) -> u8 {
        self.borrow().overall
    }
}

impl ProgressSource for Arc<AtomicU8> {
    fn overall(&self) -> u8 {
        self.load(Ordering::SeqCst)
    }
}

/// Handle to a running supervisor. Dropping it cancels the supervisor unless
/// it already completed.
pub struct CompletionSupervisor {
    state: watch::Sender<SupervisorState>,
    cancel: CancellationToken,
    task: Option<JoinHandle<()>>,
}

impl CompletionSupervisor {
    /// Create a supervisor in the `Idle` state.
    pub fn new() -> Self {
        let (state, _) = watch::channel(SupervisorState::Idle);
        Self {
            state,
            cancel: CancellationToken::new(),
            task: None,
        }
    }

    /// Move to `Watching` and start both completion paths.
    ///
    /// `action` runs exactly once, from the supervisor task, with whichever
    /// reason won. Returns `false` (and drops `action`) if the supervisor
    /// was already started or cancelled.
    pub fn start<S, F>(&mut self, settings: SupervisorSettings, source: S, action: F) -> bool
    where
        S: ProgressSource,
        F: FnOnce(CompletionReason) + Send + 'static,
    {
        let started = self.state.send_if_modified(|state| {
            if *state != SupervisorState::Idle {
                return false;
            }
            *state = SupervisorState::Watching;
            true
        });
        if !started {
            return false;
        }

        info!(
            threshold = settings.completion_threshold,
            timeout_secs = settings.hard_timeout.as_secs(),
            "completion supervisor watching"
        );
        let state = self.state.clone();
        let cancel = self.cancel.clone();
        self.task = Some(tokio::spawn(supervise(settings, source, state, cancel, action)));
        true
    }

    /// Convenience for `new` followed by `start`.
    pub fn spawn<S, F>(settings: SupervisorSettings, source: S, action: F) -> Self
    where
        S: ProgressSource,
        F: FnOnce(CompletionReason) + Send + 'static,
    {
        let mut supervisor = Self::new();
        supervisor.start(settings, source, action);
        supervisor
    }

    pub fn state(&self) -> SupervisorState {
        *self.state.borrow()
    }

    /// Stop both timers. No-op once the flow has completed, and safe to call
    /// repeatedly.
    pub fn cancel(&self) {
        let cancelled = self.state.send_if_modified(|state| {
            if state.is_terminal() {
                return false;
            }
            *state = SupervisorState::Cancelled;
            true
        });
        if cancelled {
            debug!("completion supervisor cancelled");
        }
        self.cancel.cancel();
    }

    /// Wait for a terminal state. Returns the completion reason, or `None` if
    /// the supervisor was cancelled (or never started and then dropped).
    pub async fn wait(&self) -> Option<CompletionReason> {
        let mut rx = self.state.subscribe();
        let terminal = rx.wait_for(|s| s.is_terminal()).await.ok()?;
        match *terminal {
            SupervisorState::Completed(reason) => Some(reason),
            _ => None,
        }
    }
}

impl Default for CompletionSupervisor {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for CompletionSupervisor {
    fn drop(&mut self) {
        self.cancel();
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}

async fn supervise<S, F>(
    settings: SupervisorSettings,
    source: S,
    state: watch::Sender<SupervisorState>,
    cancel: CancellationToken,
    action: F,
) where
    S: ProgressSource,
    F: FnOnce(CompletionReason) + Send + 'static,
{
    let reason = tokio::select! {
        biased;
        _ = cancel.cancelled() => return,
        _ = tokio::time::sleep(settings.hard_timeout) => CompletionReason::TimedOut,
        overall = poll_until_threshold(&settings, &source) => {
            CompletionReason::ThresholdReached { overall }
        }
    };

    let won = state.send_if_modified(|s| {
        if *s != SupervisorState::Watching {
            return false;
        }
        *s = SupervisorState::Completed(reason);
        true
    });
    if won {
        info!(?reason, "onboarding flow complete");
        action(reason);
    }
}

/// Resolves with the observed percentage once it reaches the threshold.
async fn poll_until_threshold<S: ProgressSource>(settings: &SupervisorSettings, source: &S) -> u8 {
    let start = Instant::now() + settings.poll_interval;
    let mut ticker = tokio::time::interval_at(start, settings.poll_interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    loop {
        ticker.tick().await;
        source.on_tick();
        let overall = source.overall();
        if overall >= settings.completion_threshold {
            return overall;
        }
    }
}
