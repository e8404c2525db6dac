//! Terminal rendering of onboarding progress.
//!
//! Supports three output modes:
//! - `full`: stacked progress bars (overall plus one per phase)
//! - `minimal`: one status line whenever the overall value or connection changes
//! - `json`: one `ProgressSnapshot` JSON object per update

use console::style;
use indicatif::{MultiProgress, ProgressBar, ProgressDrawTarget, ProgressStyle};
use std::sync::Mutex;

use crate::aggregator::{PhaseSnapshot, ProgressSnapshot};
use crate::supervisor::CompletionReason;
use crate::ui::icons::{CHECK, CLOCK, CROSS, DEPLOY, INGEST, LINK, RETRY, UPLOAD};
use onboard_common::{JobId, Phase};

/// Output mode for the tracker UI.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum UiMode {
    /// Rich terminal UI with progress bars
    #[default]
    Full,
    /// Single-line status updates
    Minimal,
    /// JSON-formatted snapshots
    Json,
}

impl std::str::FromStr for UiMode {
    type Err = std::convert::Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match s.to_lowercase().as_str() {
            "json" => Self::Json,
            "minimal" => Self::Minimal,
            _ => Self::Full,
        })
    }
}

impl UiMode {
    /// Parse UI mode from string (convenience method).
    pub fn parse(s: &str) -> Self {
        s.parse().unwrap_or_default()
    }
}

/// Renders [`ProgressSnapshot`]s for one tracked job.
///
/// The UI never mutates tracking state; it only draws what the tracker
/// publishes.
pub struct TrackerUI {
    mode: UiMode,
    multi: MultiProgress,
    overall_bar: ProgressBar,
    phase_bars: Vec<(Phase, ProgressBar)>,
    status_bar: ProgressBar,
    last_line: Mutex<Option<(u8, bool)>>,
}

impl TrackerUI {
    pub fn new(mode: UiMode, job_id: &JobId) -> Self {
        let multi = if mode == UiMode::Full {
            MultiProgress::new()
        } else {
            MultiProgress::with_draw_target(ProgressDrawTarget::hidden())
        };

        let overall_style = ProgressStyle::default_bar()
            .template("{prefix:.bold} [{bar:40.cyan/blue}] {pos:>3}% {msg}")
            .expect("progress bar template is a valid static string")
            .progress_chars("█▓▒░");
        let phase_style = ProgressStyle::default_bar()
            .template("{prefix:.dim} [{bar:40.green/white}] {pos:>3}% {msg:.dim}")
            .expect("progress bar template is a valid static string")
            .progress_chars("█▓▒░");
        let status_style = ProgressStyle::default_bar()
            .template("{prefix:.bold.dim} {msg}")
            .expect("progress bar template is a valid static string");

        let overall_bar = multi.add(ProgressBar::new(100));
        overall_bar.set_style(overall_style);
        overall_bar.set_prefix("   Overall");
        overall_bar.set_message(style(job_id.to_string()).dim().to_string());

        let phase_bars = Phase::ALL
            .iter()
            .map(|phase| {
                let bar = multi.add(ProgressBar::new(100));
                bar.set_style(phase_style.clone());
                bar.set_prefix(format!("{}{:>10}", phase_icon(*phase), phase.label()));
                (*phase, bar)
            })
            .collect();

        let status_bar = multi.add(ProgressBar::new(0));
        status_bar.set_style(status_style);
        status_bar.set_prefix("    Status");

        Self {
            mode,
            multi,
            overall_bar,
            phase_bars,
            status_bar,
            last_line: Mutex::new(None),
        }
    }

    pub fn render(&self, snapshot: &ProgressSnapshot) {
        match self.mode {
            UiMode::Full => self.render_bars(snapshot),
            UiMode::Minimal => self.render_line(snapshot),
            UiMode::Json => match serde_json::to_string(snapshot) {
                Ok(json) => println!("{}", json),
                Err(e) => eprintln!("Failed to serialize snapshot: {}", e),
            },
        }
    }

    fn render_bars(&self, snapshot: &ProgressSnapshot) {
        self.overall_bar.set_position(u64::from(snapshot.overall));
        for (phase, bar) in &self.phase_bars {
            let phase_snapshot = snapshot.per_phase.get(*phase);
            bar.set_position(u64::from(phase_snapshot.percent));
            bar.set_message(phase_detail(phase_snapshot));
        }
        self.status_bar.set_message(format!(
            "{}{}",
            connection_marker(snapshot.is_connected),
            snapshot.status
        ));
    }

    fn render_line(&self, snapshot: &ProgressSnapshot) {
        let key = (snapshot.overall, snapshot.is_connected);
        let mut last = self.last_line.lock().unwrap_or_else(|e| e.into_inner());
        if *last == Some(key) {
            return;
        }
        *last = Some(key);
        println!(
            "[{:>3}%] {}{}",
            snapshot.overall,
            connection_marker(snapshot.is_connected),
            snapshot.status
        );
    }

    /// Print the terminal outcome. `None` means tracking was cancelled.
    pub fn finish(&self, outcome: Option<CompletionReason>) {
        if self.mode == UiMode::Json {
            let line = serde_json::json!({ "complete": outcome.is_some(), "outcome": outcome });
            println!("{}", line);
            return;
        }

        let message = match outcome {
            Some(CompletionReason::ThresholdReached { overall }) => format!(
                "{}Onboarding complete ({}%)",
                CHECK,
                style(overall).green().bold()
            ),
            Some(CompletionReason::TimedOut) => format!(
                "{}Still finishing in the background; continuing to your dashboard",
                CLOCK
            ),
            None => format!("{}Tracking cancelled", CROSS),
        };

        if self.mode == UiMode::Full {
            self.overall_bar.finish();
            for (_, bar) in &self.phase_bars {
                bar.finish();
            }
            self.status_bar.finish_with_message(message.clone());
            let _ = self.multi.clear();
        }
        println!("{}", message);
    }
}

fn phase_icon(phase: Phase) -> console::Emoji<'static, 'static> {
    match phase {
        Phase::Upload => UPLOAD,
        Phase::Ingestion => INGEST,
        Phase::Deployment => DEPLOY,
    }
}

fn connection_marker(connected: bool) -> String {
    if connected {
        LINK.to_string()
    } else {
        format!("{}{} ", RETRY, style("reconnecting").yellow())
    }
}

/// Short per-phase annotation: file counts when present, else the message.
fn phase_detail(phase: &PhaseSnapshot) -> String {
    if let Some(detail) = &phase.detail
        && let (Some(done), Some(total)) = (detail.files_processed, detail.files_total)
    {
        return format!("{}/{} files", done, total);
    }
    phase.message.clone().unwrap_or_default()
}
