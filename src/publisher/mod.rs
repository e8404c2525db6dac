//! Local relay publisher.
//!
//! Stands in for the backend progress publisher during development and in
//! integration tests. Anything that can make an HTTP request can push
//! progress for a job; every WebSocket subscriber of that job receives it.
//!
//! | Route                             | Purpose                                   |
//! |-----------------------------------|-------------------------------------------|
//! | `GET  /ws/{job_id}`               | Subscribe to a job's progress channel     |
//! | `POST /api/jobs/{job_id}/events`  | Publish one wire-shaped progress message  |
//! | `POST /onboarding/jobs`           | Allocate a job id (initiation stand-in)   |
//! | `GET  /health`                    | Liveness probe                            |

pub mod ws;

use anyhow::{Context, Result};
use axum::{
    Json, Router,
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
};
use serde_json::json;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::sync::broadcast;
use tower_http::cors::CorsLayer;
use tracing::{debug, info};
use uuid::Uuid;

use crate::initiate::START_JOB_PATH;
use onboard_common::{ChannelMessage, JobId, WireMessage};

/// Buffered messages per job before slow subscribers start lagging.
const JOB_CHANNEL_CAPACITY: usize = 256;

/// One broadcast channel per job. Jobs never share a channel.
///
/// An entry exists only while the job has subscribers: publishing never
/// creates one, and the last subscriber to leave removes it.
#[derive(Debug, Default)]
pub struct JobRegistry {
    jobs: Mutex<HashMap<JobId, broadcast::Sender<String>>>,
}

impl JobRegistry {
    fn lock(&self) -> MutexGuard<'_, HashMap<JobId, broadcast::Sender<String>>> {
        self.jobs.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn subscribe(&self, job_id: &JobId) -> broadcast::Receiver<String> {
        self.lock()
            .entry(job_id.clone())
            .or_insert_with(|| broadcast::channel(JOB_CHANNEL_CAPACITY).0)
            .subscribe()
    }

    /// Drop the job's channel once nobody listens. Call after the
    /// subscriber's receiver has been dropped.
    pub fn release(&self, job_id: &JobId) {
        let mut jobs = self.lock();
        if jobs.get(job_id).is_some_and(|tx| tx.receiver_count() == 0) {
            jobs.remove(job_id);
            debug!(job_id = %job_id, "released job channel");
        }
    }

    /// Encode and fan out a message. Returns how many subscribers got it.
    pub fn publish(&self, job_id: &JobId, message: &ChannelMessage) -> Result<usize> {
        let text = message
            .encode()
            .context("Failed to encode progress message")?;
        let mut jobs = self.lock();
        let Some(tx) = jobs.get(job_id) else {
            return Ok(0);
        };
        match tx.send(text) {
            Ok(delivered) => Ok(delivered),
            Err(_) => {
                // Every receiver is gone without a release; reclaim the entry.
                jobs.remove(job_id);
                Ok(0)
            }
        }
    }

    pub fn subscriber_count(&self, job_id: &JobId) -> usize {
        self.lock().get(job_id).map(|tx| tx.receiver_count()).unwrap_or(0)
    }

    /// Number of jobs that currently hold a channel.
    pub fn job_count(&self) -> usize {
        self.lock().len()
    }
}

#[derive(Debug, Default)]
pub struct RelayState {
    pub jobs: JobRegistry,
}

/// Configuration for the relay server.
pub struct RelayConfig {
    pub port: u16,
    pub dev_mode: bool,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            port: 8765,
            dev_mode: false,
        }
    }
}

pub fn build_router(state: Arc<RelayState>) -> Router {
    Router::new()
        .route("/ws/{job_id}", get(ws::ws_handler))
        .route("/api/jobs/{job_id}/events", post(publish_event))
        .route(START_JOB_PATH, post(create_job))
        .route("/health", get(|| async { "ok" }))
        .with_state(state)
}

fn bad_request(message: impl Into<String>) -> Response {
    (StatusCode::BAD_REQUEST, Json(json!({ "error": message.into() }))).into_response()
}

async fn publish_event(
    State(state): State<Arc<RelayState>>,
    Path(job_id): Path<String>,
    Json(wire): Json<WireMessage>,
) -> Response {
    let job_id = match JobId::new(job_id) {
        Ok(id) => id,
        Err(e) => return bad_request(e.to_string()),
    };
    let message = match ChannelMessage::from_wire(wire) {
        Ok(m) => m,
        Err(e) => return bad_request(e.to_string()),
    };
    match state.jobs.publish(&job_id, &message) {
        Ok(delivered) => {
            debug!(job_id = %job_id, delivered, "published progress message");
            (StatusCode::ACCEPTED, Json(json!({ "delivered": delivered }))).into_response()
        }
        Err(e) => (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(json!({ "error": e.to_string() })),
        )
            .into_response(),
    }
}

async fn create_job() -> Response {
    let job_id = Uuid::new_v4().to_string();
    info!(job_id = %job_id, "allocated onboarding job");
    (StatusCode::CREATED, Json(json!({ "job_id": job_id }))).into_response()
}

/// Run the relay until Ctrl+C.
pub async fn start_server(config: RelayConfig) -> Result<()> {
    let mut app = build_router(Arc::new(RelayState::default()));
    if config.dev_mode {
        app = app.layer(CorsLayer::permissive());
    }

    let host = if config.dev_mode { "0.0.0.0" } else { "127.0.0.1" };
    let addr = format!("{}:{}", host, config.port);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("Failed to bind to {}", addr))?;

    let local_addr = listener.local_addr()?;
    println!("Onboarding relay running at http://{}", local_addr);
    println!("  subscribe: ws://{}/ws/{{job_id}}", local_addr);
    println!("  publish:   POST http://{}/api/jobs/{{job_id}}/events", local_addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("Server error")?;

    println!("Relay shut down gracefully.");
    Ok(())
}

async fn shutdown_signal() {
    if tokio::signal::ctrl_c().await.is_err() {
        // Without a signal handler, run until the process is killed.
        std::future::pending::<()>().await;
    }
    println!("\nShutting down...");
}
