//! One onboarding tracking session: channel, aggregator and supervisor wired
//! together for a single job.
//!
//! ```text
//! Transport ──frames──> ProgressChannel ──events──> worker (owns ProgressAggregator)
//!                             │                          │
//!                        state watch                snapshot watch ──> presentation
//!                             └──────────────┬───────────┘
//!                                    CompletionSupervisor
//! ```
//!
//! The aggregator lives inside the worker task and nothing else touches it.
//! Consumers read [`ProgressSnapshot`]s from a watch channel that is refreshed
//! after every event, every channel state change and every supervisor tick.

use std::sync::Arc;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info};

use crate::aggregator::{ProgressAggregator, ProgressSnapshot};
use crate::channel::{ChannelSettings, ChannelState, ProgressChannel, Transport};
use crate::supervisor::{
    CompletionReason, CompletionSupervisor, ProgressSource, SupervisorSettings, SupervisorState,
};
use onboard_common::{JobId, ProgressEvent};

#[derive(Debug, Clone, Default)]
pub struct TrackerSettings {
    pub channel: ChannelSettings,
    pub supervisor: SupervisorSettings,
}

/// A live tracking session. Dropping it tears down the channel and clears
/// both supervisor timers.
pub struct ProgressTracker {
    job_id: JobId,
    channel: ProgressChannel,
    supervisor: CompletionSupervisor,
    snapshots: watch::Receiver<ProgressSnapshot>,
    worker: Option<JoinHandle<()>>,
}

impl ProgressTracker {
    /// Start tracking `job_id`.
    ///
    /// Only call this once the job-initiation request has succeeded; a job
    /// that failed to start must never reach the supervisor. `on_complete`
    /// runs exactly once, when the flow finishes by either path.
    pub fn start<T, F>(
        transport: Arc<T>,
        job_id: JobId,
        settings: TrackerSettings,
        on_complete: F,
    ) -> Self
    where
        T: Transport + ?Sized,
        F: FnOnce(CompletionReason) + Send + 'static,
    {
        info!(job_id = %job_id, "tracking onboarding progress");
        let (channel, events) = ProgressChannel::connect(transport, job_id.clone(), settings.channel);
        let (snapshot_tx, snapshots) = watch::channel(ProgressSnapshot::default());

        let worker = tokio::spawn(aggregate(events, channel.watch_state(), snapshot_tx.clone()));

        let source = SnapshotSource {
            snapshots: snapshot_tx,
            channel_state: channel.watch_state(),
        };
        let supervisor = CompletionSupervisor::spawn(settings.supervisor, source, on_complete);

        Self {
            job_id,
            channel,
            supervisor,
            snapshots,
            worker: Some(worker),
        }
    }

    pub fn job_id(&self) -> &JobId {
        &self.job_id
    }

    pub fn snapshot(&self) -> ProgressSnapshot {
        self.snapshots.borrow().clone()
    }

    /// Receiver for presentation layers that redraw on every change.
    pub fn subscribe(&self) -> watch::Receiver<ProgressSnapshot> {
        self.snapshots.clone()
    }

    pub fn is_connected(&self) -> bool {
        self.channel.is_connected()
    }

    pub fn channel_state(&self) -> ChannelState {
        self.channel.state()
    }

    pub fn reconnect_attempts(&self) -> u32 {
        self.channel.reconnect_attempts()
    }

    pub fn supervisor_state(&self) -> SupervisorState {
        self.supervisor.state()
    }

    /// Resolves when the supervisor reaches a terminal state. `None` means the
    /// session was cancelled before completion.
    pub async fn wait_for_completion(&self) -> Option<CompletionReason> {
        self.supervisor.wait().await
    }

    /// Tear down channel and supervisor. Idempotent, and a no-op for the
    /// supervisor once completion has fired.
    pub fn cancel(&self) {
        self.supervisor.cancel();
        self.channel.cancel();
    }

    /// Cancel and wait until the channel actor and the worker have exited.
    pub async fn shutdown(mut self) {
        self.cancel();
        if let Some(worker) = self.worker.take() {
            let _ = worker.await;
        }
        debug!(job_id = %self.job_id, "tracker shut down");
    }
}

impl Drop for ProgressTracker {
    fn drop(&mut self) {
        self.cancel();
    }
}

/// Worker loop: the single owner of the aggregator.
async fn aggregate(
    mut events: mpsc::UnboundedReceiver<ProgressEvent>,
    mut channel_state: watch::Receiver<ChannelState>,
    snapshots: watch::Sender<ProgressSnapshot>,
) {
    let mut aggregator = ProgressAggregator::new();
    let mut state_live = true;

    loop {
        tokio::select! {
            event = events.recv() => match event {
                Some(event) => aggregator.apply(event),
                None => break,
            },
            changed = channel_state.changed(), if state_live => {
                if changed.is_err() {
                    state_live = false;
                }
            }
        }
        let connected = *channel_state.borrow() == ChannelState::Open;
        snapshots.send_replace(aggregator.snapshot(connected));
    }

    let connected = *channel_state.borrow() == ChannelState::Open;
    snapshots.send_replace(aggregator.snapshot(connected));
}

/// Supervisor view of the session: reads the published overall value and
/// refreshes the connection flag on every tick.
struct SnapshotSource {
    snapshots: watch::Sender<ProgressSnapshot>,
    channel_state: watch::Receiver<ChannelState>,
}

impl ProgressSource for SnapshotSource {
    fn overall(&self) -> u8 {
        self.snapshots.borrow().overall
    }

    fn on_tick(&self) {
        let connected = *self.channel_state.borrow() == ChannelState::Open;
        self.snapshots.send_modify(|s| s.is_connected = connected);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::channel::MessageStream;
    use crate::channel::tests::{Script, ScriptedTransport, frame};
    use crate::errors::ChannelError;
    use async_trait::async_trait;
    use onboard_common::Phase;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::time::Duration;

    fn job() -> JobId {
        JobId::new("acme-onboarding").unwrap()
    }

    fn counter() -> (Arc<AtomicU32>, impl FnOnce(CompletionReason) + Send + 'static) {
        let calls = Arc::new(AtomicU32::new(0));
        let c = Arc::clone(&calls);
        (calls, move |_| {
            c.fetch_add(1, Ordering::SeqCst);
        })
    }

    struct DeadTransport;

    #[async_trait]
    impl Transport for DeadTransport {
        async fn connect(&self, job_id: &JobId) -> Result<MessageStream, ChannelError> {
            Err(ChannelError::Connect {
                url: format!("mem://{}", job_id),
                message: "unreachable".to_string(),
            })
        }
    }

    #[tokio::test(start_paused = true)]
    async fn progress_survives_a_reconnect() {
        let transport = ScriptedTransport::new(vec![
            Script::Frames(vec![
                r#"{"type":"connected"}"#.to_string(),
                frame("upload", 100),
                frame("ingestion", 50),
            ]),
            Script::Hold(vec![
                r#"{"type":"connected"}"#.to_string(),
                frame("deployment", 100),
            ]),
        ]);
        let (calls, action) = counter();
        let tracker = ProgressTracker::start(
            Arc::clone(&transport),
            job(),
            TrackerSettings::default(),
            action,
        );

        tokio::time::sleep(Duration::from_millis(1500)).await;
        let mid = tracker.snapshot();
        assert_eq!(mid.overall, 50);
        assert!(!mid.is_connected);

        tokio::time::sleep(Duration::from_secs(2)).await;
        let snap = tracker.snapshot();
        assert_eq!(snap.overall, 83);
        assert!(snap.is_connected);
        assert_eq!(snap.per_phase.get(Phase::Ingestion).percent, 50);
        assert_eq!(tracker.reconnect_attempts(), 1);
        assert_eq!(calls.load(Ordering::SeqCst), 0);
        assert_eq!(tracker.supervisor_state(), SupervisorState::Watching);
    }

    #[tokio::test(start_paused = true)]
    async fn completes_once_when_threshold_reached() {
        let transport = ScriptedTransport::new(vec![Script::Hold(vec![
            frame("upload", 100),
            frame("ingestion", 100),
            frame("deployment", 70),
        ])]);
        let (calls, action) = counter();
        let tracker =
            ProgressTracker::start(transport, job(), TrackerSettings::default(), action);

        let reason = tracker.wait_for_completion().await;
        assert_eq!(reason, Some(CompletionReason::ThresholdReached { overall: 90 }));

        tokio::time::sleep(Duration::from_secs(600)).await;
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn total_channel_failure_still_terminates() {
        let (calls, action) = counter();
        let tracker = ProgressTracker::start(
            Arc::new(DeadTransport),
            job(),
            TrackerSettings::default(),
            action,
        );

        let reason = tracker.wait_for_completion().await;
        assert_eq!(reason, Some(CompletionReason::TimedOut));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(!tracker.is_connected());
        assert_eq!(tracker.snapshot().overall, 0);
        assert!(tracker.reconnect_attempts() >= 99);
    }

    #[tokio::test(start_paused = true)]
    async fn cancel_clears_everything_and_is_idempotent() {
        let transport = ScriptedTransport::new(vec![Script::Hold(vec![frame("upload", 20)])]);
        let (calls, action) = counter();
        let tracker = ProgressTracker::start(
            Arc::clone(&transport),
            job(),
            TrackerSettings::default(),
            action,
        );

        tokio::time::sleep(Duration::from_secs(2)).await;
        tracker.cancel();
        tracker.cancel();
        assert_eq!(tracker.wait_for_completion().await, None);

        tokio::time::sleep(Duration::from_secs(600)).await;
        assert_eq!(calls.load(Ordering::SeqCst), 0);
        assert_eq!(tracker.channel_state(), ChannelState::ClosedFinal);
        assert_eq!(tracker.supervisor_state(), SupervisorState::Cancelled);
        assert_eq!(transport.connects(), 1);
        tracker.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn cancel_after_completion_keeps_completed_state() {
        let transport = ScriptedTransport::new(vec![Script::Hold(vec![
            frame("upload", 100),
            frame("ingestion", 100),
            frame("deployment", 100),
        ])]);
        let (calls, action) = counter();
        let tracker =
            ProgressTracker::start(transport, job(), TrackerSettings::default(), action);

        tracker.wait_for_completion().await;
        tracker.cancel();
        assert_eq!(
            tracker.supervisor_state(),
            SupervisorState::Completed(CompletionReason::ThresholdReached { overall: 100 })
        );
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn subscribers_see_every_update() {
        let transport = ScriptedTransport::new(vec![Script::Hold(vec![frame("upload", 30)])]);
        let (_calls, action) = counter();
        let tracker =
            ProgressTracker::start(transport, job(), TrackerSettings::default(), action);
        let mut rx = tracker.subscribe();

        let snap = rx.wait_for(|s| s.overall == 10).await.unwrap().clone();
        assert!(snap.per_phase.upload.reported);
        assert_eq!(snap.status, "Upload: 30%");
    }
}
