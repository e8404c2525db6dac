use axum::{
    extract::{
        Path, State,
        ws::{Message, WebSocket, WebSocketUpgrade},
    },
    http::StatusCode,
    response::{IntoResponse, Response},
};
use futures_util::{SinkExt, StreamExt};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast::{self, error::RecvError};
use tokio::time::Instant;
use tracing::{debug, warn};

use super::RelayState;
use onboard_common::{ChannelMessage, ControlKind, JobId};

/// Keep-alive period: a JSON `ping` message followed by a protocol Ping.
pub const PING_INTERVAL: Duration = Duration::from_secs(30);

/// A subscriber that has not answered a Ping for this long is dropped.
pub const PONG_TIMEOUT: Duration = Duration::from_secs(60);

/// Upgrade handler for `GET /ws/{job_id}`.
///
/// The broadcast subscription is taken before the upgrade response goes out,
/// so nothing published after the client's handshake completes is missed.
pub async fn ws_handler(
    ws: WebSocketUpgrade,
    Path(job_id): Path<String>,
    State(state): State<Arc<RelayState>>,
) -> Response {
    let job_id = match JobId::new(job_id) {
        Ok(id) => id,
        Err(e) => return (StatusCode::BAD_REQUEST, e.to_string()).into_response(),
    };
    let events = state.jobs.subscribe(&job_id);
    ws.on_upgrade(move |socket| async move {
        serve_subscriber(socket, &job_id, events).await;
        state.jobs.release(&job_id);
    })
    .into_response()
}

/// Tracks whether the peer still answers Pings.
#[derive(Debug)]
struct Liveness {
    pending_since: Option<Instant>,
}

impl Liveness {
    fn new() -> Self {
        Self {
            pending_since: None,
        }
    }

    fn ping_sent(&mut self, now: Instant) {
        if self.pending_since.is_none() {
            self.pending_since = Some(now);
        }
    }

    fn pong_received(&mut self) {
        self.pending_since = None;
    }

    fn is_dead(&self, now: Instant) -> bool {
        self.pending_since
            .is_some_and(|since| now.duration_since(since) > PONG_TIMEOUT)
    }
}

/// Forward one job's broadcasts to a single subscriber until either side
/// goes away. Consumes the receiver so the caller can release the job.
async fn serve_subscriber(
    socket: WebSocket,
    job_id: &JobId,
    mut events: broadcast::Receiver<String>,
) {
    debug!(job_id = %job_id, "subscriber connected");
    let (mut outbound, mut inbound) = socket.split();

    let encode = |kind| ChannelMessage::Control(kind).encode().ok();
    let keepalive = encode(ControlKind::KeepAlive);
    if let Some(hello) = encode(ControlKind::Connected)
        && outbound.send(Message::Text(hello.into())).await.is_err()
    {
        return;
    }

    let mut ticks = tokio::time::interval_at(Instant::now() + PING_INTERVAL, PING_INTERVAL);
    let mut liveness = Liveness::new();

    loop {
        let outgoing = tokio::select! {
            _ = ticks.tick() => {
                let now = Instant::now();
                if liveness.is_dead(now) {
                    debug!(job_id = %job_id, "subscriber missed pong deadline");
                    break;
                }
                liveness.ping_sent(now);
                let mut frames = Vec::with_capacity(2);
                if let Some(text) = &keepalive {
                    frames.push(Message::Text(text.clone().into()));
                }
                frames.push(Message::Ping(Default::default()));
                frames
            }
            received = events.recv() => match received {
                Ok(text) => vec![Message::Text(text.into())],
                Err(RecvError::Lagged(skipped)) => {
                    // Later events for the same phase supersede skipped ones.
                    warn!(job_id = %job_id, skipped, "subscriber lagged");
                    continue;
                }
                Err(RecvError::Closed) => break,
            },
            incoming = inbound.next() => match incoming {
                Some(Ok(Message::Pong(_))) => {
                    liveness.pong_received();
                    continue;
                }
                Some(Ok(Message::Close(_))) | Some(Err(_)) | None => break,
                Some(Ok(_)) => continue,
            },
        };

        let mut delivered = true;
        for frame in outgoing {
            if outbound.send(frame).await.is_err() {
                delivered = false;
                break;
            }
        }
        if !delivered {
            break;
        }
    }

    let _ = outbound.send(Message::Close(None)).await;
    debug!(job_id = %job_id, "subscriber disconnected");
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pong_deadline_outlives_one_ping_period() {
        assert!(PONG_TIMEOUT > PING_INTERVAL);
    }

    #[tokio::test(start_paused = true)]
    async fn liveness_expires_only_without_pong() {
        let mut liveness = Liveness::new();
        let start = Instant::now();
        assert!(!liveness.is_dead(start + Duration::from_secs(600)));

        liveness.ping_sent(start);
        // A second ping must not push the deadline back.
        liveness.ping_sent(start + PING_INTERVAL);
        assert!(!liveness.is_dead(start + PONG_TIMEOUT));
        assert!(liveness.is_dead(start + PONG_TIMEOUT + Duration::from_secs(1)));

        liveness.pong_received();
        assert!(!liveness.is_dead(start + Duration::from_secs(600)));
    }

    #[test]
    fn control_frames_decode_as_control() {
        for kind in [ControlKind::Connected, ControlKind::KeepAlive] {
            let text = ChannelMessage::Control(kind).encode().unwrap();
            assert!(ChannelMessage::decode(&text).unwrap().is_control());
        }
    }
}
