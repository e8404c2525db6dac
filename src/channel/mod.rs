//! Self-healing progress channel.
//!
//! One actor task per subscription owns the connection and its cancellation
//! token. It cycles through an explicit state machine:
//!
//! ```text
//!   Connecting ──handshake──> Open ──close/error──> ClosedRetrying
//!       ^                                                │
//!       └──────────────── fixed reconnect delay ─────────┘
//!
//!   any state ──cancel()──> ClosedFinal
//! ```
//!
//! Phase events are forwarded over an unbounded mpsc channel. Control
//! messages are logged and swallowed, malformed payloads are dropped, and
//! transport failures only ever move the actor into `ClosedRetrying`.
//!
//! A handshake that does not finish within `connect_timeout` counts as a
//! failed attempt. An open connection that delivers no frame at all
//! (keep-alives included) for `idle_timeout` is treated as dropped.

pub mod transport;

pub use transport::{MessageStream, Transport, WebSocketTransport};

use futures_util::StreamExt;
use serde::Serialize;
use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::errors::ChannelError;
use onboard_common::{ChannelMessage, JobId, ProgressEvent};

/// Delay between a disconnect and the next connection attempt.
pub const DEFAULT_RECONNECT_DELAY: Duration = Duration::from_secs(3);

/// Floor applied to configured reconnect delays.
pub const MIN_RECONNECT_DELAY: Duration = Duration::from_millis(100);

pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// Two keep-alive periods of the publisher (it pings every 30 s).
pub const DEFAULT_IDLE_TIMEOUT: Duration = Duration::from_secs(60);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ChannelState {
    Connecting,
    Open,
    ClosedRetrying,
    ClosedFinal,
}

impl ChannelState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, ChannelState::ClosedFinal)
    }
}

#[derive(Debug, Clone)]
pub struct ChannelSettings {
    pub reconnect_delay: Duration,
    pub connect_timeout: Duration,
    pub idle_timeout: Duration,
}

impl Default for ChannelSettings {
    fn default() -> Self {
        Self {
            reconnect_delay: DEFAULT_RECONNECT_DELAY,
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            idle_timeout: DEFAULT_IDLE_TIMEOUT,
        }
    }
}

/// Handle to a running channel actor.
///
/// Dropping the handle cancels the actor; whoever opens a channel owns its
/// teardown.
pub struct ProgressChannel {
    job_id: JobId,
    subscriber_id: Uuid,
    state: watch::Receiver<ChannelState>,
    reconnects: Arc<AtomicU32>,
    cancel: CancellationToken,
    task: Option<JoinHandle<()>>,
}

impl ProgressChannel {
    /// Start a channel for `job_id` and return it with the receiving end of
    /// its event stream. Must be called from within a Tokio runtime.
    ///
    /// Never fails: connection problems surface only as state changes.
    pub fn connect<T>(
        transport: Arc<T>,
        job_id: JobId,
        settings: ChannelSettings,
    ) -> (Self, mpsc::UnboundedReceiver<ProgressEvent>)
    where
        T: Transport + ?Sized,
    {
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let (state_tx, state_rx) = watch::channel(ChannelState::Connecting);
        let reconnects = Arc::new(AtomicU32::new(0));
        let cancel = CancellationToken::new();
        let subscriber_id = Uuid::new_v4();

        let actor = ChannelActor {
            transport,
            job_id: job_id.clone(),
            subscriber_id,
            settings,
            state: state_tx,
            reconnects: Arc::clone(&reconnects),
            cancel: cancel.clone(),
            events: events_tx,
        };
        let task = tokio::spawn(actor.run());

        let channel = Self {
            job_id,
            subscriber_id,
            state: state_rx,
            reconnects,
            cancel,
            task: Some(task),
        };
        (channel, events_rx)
    }

    pub fn job_id(&self) -> &JobId {
        &self.job_id
    }

    pub fn subscriber_id(&self) -> Uuid {
        self.subscriber_id
    }

    pub fn state(&self) -> ChannelState {
        *self.state.borrow()
    }

    pub fn is_connected(&self) -> bool {
        self.state() == ChannelState::Open
    }

    /// Receiver that observes every state transition.
    pub fn watch_state(&self) -> watch::Receiver<ChannelState> {
        self.state.clone()
    }

    /// Number of reconnect attempts made after the initial connect.
    pub fn reconnect_attempts(&self) -> u32 {
        self.reconnects.load(Ordering::SeqCst)
    }

    /// Request teardown. Safe to call any number of times; no reconnect is
    /// scheduled after the first call.
    pub fn cancel(&self) {
        if !self.cancel.is_cancelled() {
            debug!(job_id = %self.job_id, subscriber = %self.subscriber_id, "cancelling progress channel");
        }
        self.cancel.cancel();
    }

    /// Cancel and wait for the actor to finish.
    pub async fn shutdown(mut self) {
        self.cancel();
        if let Some(task) = self.task.take() {
            let _ = task.await;
        }
    }
}

impl Drop for ProgressChannel {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

/// Decode one text frame, returning the phase event to forward (if any).
///
/// Never fails: control messages and malformed payloads yield `None`.
pub fn handle_message(text: &str) -> Option<ProgressEvent> {
    match ChannelMessage::decode(text) {
        Ok(ChannelMessage::Progress(event)) => Some(event),
        Ok(ChannelMessage::Control(kind)) => {
            debug!(?kind, "control message");
            None
        }
        Err(e) => {
            warn!(error = %e, "dropping malformed progress message");
            None
        }
    }
}

enum PumpExit {
    Disconnected,
    Cancelled,
}

struct ChannelActor<T: Transport + ?Sized> {
    transport: Arc<T>,
    job_id: JobId,
    subscriber_id: Uuid,
    settings: ChannelSettings,
    state: watch::Sender<ChannelState>,
    reconnects: Arc<AtomicU32>,
    cancel: CancellationToken,
    events: mpsc::UnboundedSender<ProgressEvent>,
}

impl<T: Transport + ?Sized> ChannelActor<T> {
    async fn run(self) {
        loop {
            self.set_state(ChannelState::Connecting);

            let connected = tokio::select! {
                biased;
                _ = self.cancel.cancelled() => break,
                _ = self.events.closed() => break,
                result = tokio::time::timeout(
                    self.settings.connect_timeout,
                    self.transport.connect(&self.job_id),
                ) => result.unwrap_or_else(|_| {
                    Err(ChannelError::ConnectTimeout(self.settings.connect_timeout))
                }),
            };

            match connected {
                Ok(stream) => {
                    self.set_state(ChannelState::Open);
                    if let PumpExit::Cancelled = self.pump(stream).await {
                        break;
                    }
                }
                Err(e) => {
                    warn!(
                        job_id = %self.job_id,
                        subscriber = %self.subscriber_id,
                        error = %e,
                        "progress channel connect failed"
                    );
                }
            }

            self.set_state(ChannelState::ClosedRetrying);
            tokio::select! {
                biased;
                _ = self.cancel.cancelled() => break,
                _ = self.events.closed() => break,
                _ = tokio::time::sleep(self.settings.reconnect_delay) => {}
            }
            let attempt = self.reconnects.fetch_add(1, Ordering::SeqCst) + 1;
            debug!(job_id = %self.job_id, attempt, "reconnecting progress channel");
        }

        self.set_state(ChannelState::ClosedFinal);
    }

    async fn pump(&self, mut stream: MessageStream) -> PumpExit {
        let idle = tokio::time::sleep(self.settings.idle_timeout);
        tokio::pin!(idle);

        loop {
            tokio::select! {
                biased;
                _ = self.cancel.cancelled() => return PumpExit::Cancelled,
                _ = self.events.closed() => return PumpExit::Cancelled,
                _ = &mut idle => {
                    warn!(
                        job_id = %self.job_id,
                        idle_secs = self.settings.idle_timeout.as_secs(),
                        "progress channel silent; treating as dropped"
                    );
                    return PumpExit::Disconnected;
                }
                frame = stream.next() => match frame {
                    Some(Ok(text)) => {
                        idle.as_mut().reset(Instant::now() + self.settings.idle_timeout);
                        if let Some(event) = handle_message(&text) {
                            debug!(phase = %event.phase, percent = ?event.percent, "progress event");
                            if self.events.send(event).is_err() {
                                return PumpExit::Cancelled;
                            }
                        }
                    }
                    Some(Err(e)) => {
                        warn!(job_id = %self.job_id, error = %e, "progress channel dropped");
                        return PumpExit::Disconnected;
                    }
                    None => {
                        info!(job_id = %self.job_id, "progress channel closed by publisher");
                        return PumpExit::Disconnected;
                    }
                }
            }
        }
    }

    fn set_state(&self, next: ChannelState) {
        let changed = self.state.send_if_modified(|current| {
            if *current == next {
                return false;
            }
            *current = next;
            true
        });
        if changed {
            info!(job_id = %self.job_id, subscriber = %self.subscriber_id, state = ?next, "progress channel state");
        }
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use async_trait::async_trait;
    use futures_util::stream;
    use onboard_common::Phase;
    use std::collections::VecDeque;
    use std::sync::Mutex;

    /// What the next `connect` call yields.
    pub(crate) enum Script {
        /// Deliver these frames, then close.
        Frames(Vec<String>),
        /// Deliver these frames, then stay open.
        Hold(Vec<String>),
        /// Deliver each frame after its delay, then stay open.
        Paced(Vec<(Duration, String)>),
        /// Never finish the handshake.
        Stall,
        Fail,
    }

    /// In-memory transport that replays one script per connection attempt.
    /// Once the scripts run out every connection stays open and silent.
    #[derive(Default)]
    pub(crate) struct ScriptedTransport {
        pub connects: AtomicU32,
        scripts: Mutex<VecDeque<Script>>,
    }

    impl ScriptedTransport {
        pub fn new(scripts: Vec<Script>) -> Arc<Self> {
            Arc::new(Self {
                connects: AtomicU32::new(0),
                scripts: Mutex::new(scripts.into()),
            })
        }

        pub fn connects(&self) -> u32 {
            self.connects.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl Transport for ScriptedTransport {
        async fn connect(&self, job_id: &JobId) -> Result<MessageStream, ChannelError> {
            self.connects.fetch_add(1, Ordering::SeqCst);
            let next = self.scripts.lock().unwrap().pop_front();
            match next.unwrap_or(Script::Hold(vec![])) {
                Script::Frames(frames) => Ok(stream::iter(frames.into_iter().map(Ok)).boxed()),
                Script::Hold(frames) => Ok(stream::iter(frames.into_iter().map(Ok))
                    .chain(stream::pending())
                    .boxed()),
                Script::Paced(frames) => Ok(stream::iter(frames)
                    .then(|(delay, text)| async move {
                        tokio::time::sleep(delay).await;
                        Ok::<_, ChannelError>(text)
                    })
                    .chain(stream::pending())
                    .boxed()),
                Script::Stall => std::future::pending().await,
                Script::Fail => Err(ChannelError::Connect {
                    url: format!("mem://{}", job_id),
                    message: "refused".to_string(),
                }),
            }
        }
    }

    pub(crate) fn frame(phase: &str, progress: u32) -> String {
        format!(r#"{{"type":"{}","progress":{}}}"#, phase, progress)
    }

    fn job() -> JobId {
        JobId::new("job-1").unwrap()
    }

    fn settings() -> ChannelSettings {
        ChannelSettings::default()
    }

    #[tokio::test(start_paused = true)]
    async fn forwards_phase_events_and_swallows_the_rest() {
        let transport = ScriptedTransport::new(vec![Script::Hold(vec![
            r#"{"type":"connected"}"#.to_string(),
            frame("upload", 40),
            "{not json".to_string(),
            r#"{"type":"ping"}"#.to_string(),
            r#"{"type":"mystery","progress":5}"#.to_string(),
            frame("ingestion", 10),
        ])]);
        let (channel, mut rx) = ProgressChannel::connect(transport, job(), settings());

        let first = rx.recv().await.unwrap();
        assert_eq!(first.phase, Phase::Upload);
        assert_eq!(first.percent, Some(40));
        let second = rx.recv().await.unwrap();
        assert_eq!(second.phase, Phase::Ingestion);
        assert!(rx.try_recv().is_err());
        assert!(channel.is_connected());
    }

    #[test]
    fn handle_message_never_panics_on_garbage() {
        for text in ["", "null", "[]", "{}", r#"{"type":5}"#, "\u{0}\u{1}"] {
            assert!(handle_message(text).is_none());
        }
    }

    #[tokio::test(start_paused = true)]
    async fn close_schedules_exactly_one_reconnect_after_delay() {
        let transport = ScriptedTransport::new(vec![Script::Frames(vec![])]);
        let (channel, _rx) =
            ProgressChannel::connect(Arc::clone(&transport), job(), settings());

        tokio::time::sleep(Duration::from_millis(2900)).await;
        assert_eq!(transport.connects(), 1);
        assert_eq!(channel.state(), ChannelState::ClosedRetrying);

        tokio::time::sleep(Duration::from_millis(200)).await;
        assert_eq!(transport.connects(), 2);
        assert_eq!(channel.reconnect_attempts(), 1);
        assert_eq!(channel.state(), ChannelState::Open);

        tokio::time::sleep(Duration::from_secs(30)).await;
        assert_eq!(transport.connects(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn cancel_during_delay_prevents_reconnect() {
        let transport = ScriptedTransport::new(vec![Script::Frames(vec![])]);
        let (channel, _rx) =
            ProgressChannel::connect(Arc::clone(&transport), job(), settings());

        tokio::time::sleep(Duration::from_secs(1)).await;
        assert_eq!(channel.state(), ChannelState::ClosedRetrying);
        channel.cancel();
        channel.cancel();

        tokio::time::sleep(Duration::from_secs(10)).await;
        assert_eq!(transport.connects(), 1);
        assert_eq!(channel.state(), ChannelState::ClosedFinal);
    }

    #[tokio::test(start_paused = true)]
    async fn failed_connects_retry_at_a_fixed_interval() {
        let transport =
            ScriptedTransport::new(vec![Script::Fail, Script::Fail, Script::Fail]);
        let (channel, _rx) =
            ProgressChannel::connect(Arc::clone(&transport), job(), settings());

        tokio::time::sleep(Duration::from_millis(9500)).await;
        assert_eq!(transport.connects(), 4);
        assert_eq!(channel.reconnect_attempts(), 3);
        assert!(channel.is_connected());
    }

    #[tokio::test(start_paused = true)]
    async fn dropping_handle_tears_down_actor() {
        let transport = ScriptedTransport::new(vec![]);
        let (channel, _rx) =
            ProgressChannel::connect(Arc::clone(&transport), job(), settings());
        let mut state = channel.watch_state();

        tokio::time::sleep(Duration::from_millis(10)).await;
        drop(channel);

        let final_state = *state
            .wait_for(|s| s.is_terminal())
            .await
            .unwrap();
        assert_eq!(final_state, ChannelState::ClosedFinal);
    }

    #[tokio::test(start_paused = true)]
    async fn dropping_receiver_stops_actor() {
        let transport = ScriptedTransport::new(vec![Script::Frames(vec![])]);
        let (channel, rx) = ProgressChannel::connect(Arc::clone(&transport), job(), settings());
        drop(rx);

        tokio::time::sleep(Duration::from_secs(10)).await;
        assert_eq!(channel.state(), ChannelState::ClosedFinal);
        assert!(transport.connects() <= 1);
    }

    #[tokio::test(start_paused = true)]
    async fn subscribers_to_the_same_job_are_independent() {
        let transport = ScriptedTransport::new(vec![]);
        let (a, _rx_a) = ProgressChannel::connect(Arc::clone(&transport), job(), settings());
        let (b, _rx_b) = ProgressChannel::connect(Arc::clone(&transport), job(), settings());
        assert_ne!(a.subscriber_id(), b.subscriber_id());

        tokio::time::sleep(Duration::from_millis(10)).await;
        a.shutdown().await;

        tokio::time::sleep(Duration::from_secs(5)).await;
        assert!(b.is_connected());
        assert_eq!(transport.connects(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn stalled_handshake_times_out_and_retries() {
        let transport = ScriptedTransport::new(vec![Script::Stall]);
        let (channel, _rx) =
            ProgressChannel::connect(Arc::clone(&transport), job(), settings());

        tokio::time::sleep(DEFAULT_CONNECT_TIMEOUT - Duration::from_millis(100)).await;
        assert_eq!(channel.state(), ChannelState::Connecting);

        tokio::time::sleep(Duration::from_millis(200)).await;
        assert_eq!(channel.state(), ChannelState::ClosedRetrying);

        tokio::time::sleep(DEFAULT_RECONNECT_DELAY).await;
        assert_eq!(transport.connects(), 2);
        assert_eq!(channel.reconnect_attempts(), 1);
        assert!(channel.is_connected());
    }

    #[tokio::test(start_paused = true)]
    async fn silent_connection_is_dropped_after_idle_timeout() {
        let transport = ScriptedTransport::new(vec![Script::Hold(vec![frame("upload", 10)])]);
        let (channel, mut rx) =
            ProgressChannel::connect(Arc::clone(&transport), job(), settings());
        assert_eq!(rx.recv().await.unwrap().percent, Some(10));

        tokio::time::sleep(DEFAULT_IDLE_TIMEOUT - Duration::from_secs(1)).await;
        assert!(channel.is_connected());

        tokio::time::sleep(Duration::from_secs(2)).await;
        assert_eq!(channel.state(), ChannelState::ClosedRetrying);

        tokio::time::sleep(DEFAULT_RECONNECT_DELAY).await;
        assert_eq!(transport.connects(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn keepalive_frames_hold_the_connection_open() {
        let ping = r#"{"type":"ping"}"#.to_string();
        let transport = ScriptedTransport::new(vec![Script::Paced(vec![
            (Duration::from_secs(30), ping.clone()),
            (Duration::from_secs(30), ping.clone()),
            (Duration::from_secs(30), ping),
        ])]);
        let (channel, _rx) =
            ProgressChannel::connect(Arc::clone(&transport), job(), settings());

        tokio::time::sleep(Duration::from_secs(100)).await;
        assert!(channel.is_connected());
        assert_eq!(transport.connects(), 1);
    }
}
