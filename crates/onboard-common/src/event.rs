//! Progress events and the JSON shape they travel in.
//!
//! One JSON object per channel message:
//!
//! ```json
//! { "type": "upload" | "ingestion" | "deployment" | "connected" | "ping",
//!   "progress": 42, "message": "...", "phase": "...", "explanation": "...",
//!   "files_processed": 3, "files_total": 10 }
//! ```
//!
//! Only `type` is required. The three phase types carry progress data;
//! `connected` and `ping` are control messages that only prove liveness.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// One of the three stages of an onboarding job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Phase {
    Upload,
    Ingestion,
    Deployment,
}

impl Phase {
    /// Every phase in pipeline order. Aggregation always divides by this length.
    pub const ALL: [Phase; 3] = [Phase::Upload, Phase::Ingestion, Phase::Deployment];

    pub fn as_str(&self) -> &'static str {
        match self {
            Phase::Upload => "upload",
            Phase::Ingestion => "ingestion",
            Phase::Deployment => "deployment",
        }
    }

    /// Position in [`Phase::ALL`].
    pub fn index(&self) -> usize {
        match self {
            Phase::Upload => 0,
            Phase::Ingestion => 1,
            Phase::Deployment => 2,
        }
    }

    /// Title-cased label for display.
    pub fn label(&self) -> &'static str {
        match self {
            Phase::Upload => "Upload",
            Phase::Ingestion => "Ingestion",
            Phase::Deployment => "Deployment",
        }
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Phase {
    type Err = DecodeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "upload" => Ok(Phase::Upload),
            "ingestion" => Ok(Phase::Ingestion),
            "deployment" => Ok(Phase::Deployment),
            other => Err(DecodeError::UnknownType(other.to_string())),
        }
    }
}

/// Liveness-only messages. Never forwarded to the aggregator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControlKind {
    Connected,
    KeepAlive,
}

/// Optional structured payload attached to a progress event. Display only.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventDetail {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sub_phase: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub explanation: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub files_processed: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub files_total: Option<u64>,
}

impl EventDetail {
    fn is_empty(&self) -> bool {
        self == &EventDetail::default()
    }
}

/// A single phase progress report.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProgressEvent {
    pub phase: Phase,
    /// Already clamped into `0..=100`. `None` when the publisher sent no number.
    pub percent: Option<u8>,
    pub message: Option<String>,
    pub detail: Option<EventDetail>,
    pub received_at: DateTime<Utc>,
}

impl ProgressEvent {
    pub fn new(phase: Phase) -> Self {
        Self {
            phase,
            percent: None,
            message: None,
            detail: None,
            received_at: Utc::now(),
        }
    }

    /// Values above 100 are clamped.
    pub fn with_percent(mut self, percent: u8) -> Self {
        self.percent = Some(percent.min(100));
        self
    }

    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message = Some(message.into());
        self
    }

    pub fn with_detail(mut self, detail: EventDetail) -> Self {
        self.detail = Some(detail);
        self
    }
}

/// Raw JSON shape of a channel message.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct WireMessage {
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub progress: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub phase: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub explanation: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub files_processed: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub files_total: Option<u64>,
}

#[derive(Debug, Error)]
pub enum DecodeError {
    #[error("invalid message JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("unknown message type '{0}'")]
    UnknownType(String),
}

/// A decoded channel message.
#[derive(Debug, Clone, PartialEq)]
pub enum ChannelMessage {
    Progress(ProgressEvent),
    Control(ControlKind),
}

impl ChannelMessage {
    /// Parse one text frame.
    pub fn decode(text: &str) -> Result<Self, DecodeError> {
        let wire: WireMessage = serde_json::from_str(text)?;
        Self::from_wire(wire)
    }

    pub fn from_wire(wire: WireMessage) -> Result<Self, DecodeError> {
        match wire.kind.as_str() {
            "connected" => return Ok(ChannelMessage::Control(ControlKind::Connected)),
            "ping" | "keepalive" => return Ok(ChannelMessage::Control(ControlKind::KeepAlive)),
            _ => {}
        }

        let phase: Phase = wire.kind.parse()?;
        let detail = EventDetail {
            sub_phase: wire.phase,
            explanation: wire.explanation,
            files_processed: wire.files_processed,
            files_total: wire.files_total,
        };

        Ok(ChannelMessage::Progress(ProgressEvent {
            phase,
            percent: wire.progress.and_then(clamp_percent),
            message: wire.message,
            detail: (!detail.is_empty()).then_some(detail),
            received_at: Utc::now(),
        }))
    }

    pub fn to_wire(&self) -> WireMessage {
        match self {
            ChannelMessage::Control(ControlKind::Connected) => WireMessage {
                kind: "connected".to_string(),
                ..Default::default()
            },
            ChannelMessage::Control(ControlKind::KeepAlive) => WireMessage {
                kind: "ping".to_string(),
                ..Default::default()
            },
            ChannelMessage::Progress(event) => {
                let detail = event.detail.clone().unwrap_or_default();
                WireMessage {
                    kind: event.phase.as_str().to_string(),
                    progress: event.percent.map(f64::from),
                    message: event.message.clone(),
                    phase: detail.sub_phase,
                    explanation: detail.explanation,
                    files_processed: detail.files_processed,
                    files_total: detail.files_total,
                }
            }
        }
    }

    pub fn encode(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(&self.to_wire())
    }

    pub fn is_control(&self) -> bool {
        matches!(self, ChannelMessage::Control(_))
    }
}

/// Clamp an untrusted progress number into `0..=100`, flooring fractions.
fn clamp_percent(value: f64) -> Option<u8> {
    if !value.is_finite() {
        return None;
    }
    Some(value.clamp(0.0, 100.0).floor() as u8)
}
