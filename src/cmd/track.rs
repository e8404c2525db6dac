//! Live progress tracking (`onboard track`).

use anyhow::{Context, Result, bail};
use std::path::Path;
use std::sync::Arc;
use tracing::debug;

use onboard::config::OnboardConfig;
use onboard::initiate::JobClient;
use onboard::tracker::ProgressTracker;
use onboard::ui::{TrackerUI, UiMode};
use onboard::{JobId, WebSocketTransport};

pub async fn cmd_track(
    config: &OnboardConfig,
    job_id: Option<&str>,
    start: Option<&Path>,
    ui_mode: UiMode,
) -> Result<()> {
    let job_id = match (job_id, start) {
        (Some(id), _) => JobId::new(id).with_context(|| format!("Invalid job id '{}'", id))?,
        (None, Some(payload_path)) => start_job(config, payload_path).await?,
        (None, None) => bail!("Provide --job-id <ID> or --start <payload.json>"),
    };

    let transport = Arc::new(WebSocketTransport::new(config.ws_url()));
    let tracker = ProgressTracker::start(
        transport,
        job_id.clone(),
        config.tracker_settings(),
        |reason| debug!(?reason, "completion action fired"),
    );

    let ui = TrackerUI::new(ui_mode, &job_id);
    let mut updates = tracker.subscribe();
    let mut updates_live = true;
    ui.render(&tracker.snapshot());

    let outcome = loop {
        tokio::select! {
            outcome = tracker.wait_for_completion() => break outcome,
            changed = updates.changed(), if updates_live => {
                if changed.is_err() {
                    updates_live = false;
                    continue;
                }
                ui.render(&updates.borrow_and_update());
            }
            _ = tokio::signal::ctrl_c() => {
                tracker.cancel();
                break None;
            }
        }
    };

    ui.render(&tracker.snapshot());
    ui.finish(outcome);
    tracker.shutdown().await;
    Ok(())
}

/// Call the initiation API. Failures are returned as-is so the user sees
/// them immediately; tracking is never started for a job that did not start.
async fn start_job(config: &OnboardConfig, payload_path: &Path) -> Result<JobId> {
    let content = std::fs::read_to_string(payload_path)
        .with_context(|| format!("Failed to read payload file: {}", payload_path.display()))?;
    let payload: serde_json::Value = serde_json::from_str(&content)
        .with_context(|| format!("Payload is not valid JSON: {}", payload_path.display()))?;

    let client = JobClient::new(config.api_url(), config.api_token())
        .context("Failed to create onboarding API client")?;
    let job_id = client
        .start_job(&payload)
        .await
        .context("Failed to start onboarding job")?;
    println!("Started onboarding job {}", job_id);
    Ok(job_id)
}
