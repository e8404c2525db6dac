//! Per-phase progress aggregation.
//!
//! The aggregator keeps the latest event for each phase and derives a single
//! overall percentage from them. It never fails and never waits: every method
//! works on data already in memory.
//!
//! The overall value always divides by the number of phases, even when a
//! phase has never reported. A job whose publisher never sends deployment
//! events therefore tops out at 66%; the completion supervisor's timeout is
//! what carries such a job to the end.

use onboard_common::{ChannelMessage, EventDetail, Phase, ProgressEvent};
use serde::Serialize;

/// Latest known state of one phase.
#[derive(Debug, Clone, PartialEq)]
pub struct PhaseState {
    pub phase: Phase,
    pub last_event: Option<ProgressEvent>,
}

impl PhaseState {
    fn new(phase: Phase) -> Self {
        Self {
            phase,
            last_event: None,
        }
    }

    /// Contribution of this phase: 0 until a numeric percent arrives.
    pub fn percent(&self) -> u8 {
        self.last_event
            .as_ref()
            .and_then(|e| e.percent)
            .map(|p| p.min(100))
            .unwrap_or(0)
    }

    pub fn has_reported(&self) -> bool {
        self.last_event.is_some()
    }
}

/// Holds one [`PhaseState`] per phase and computes the overall progress.
#[derive(Debug, Clone, PartialEq)]
pub struct ProgressAggregator {
    phases: [PhaseState; 3],
}

impl Default for ProgressAggregator {
    fn default() -> Self {
        Self::new()
    }
}

impl ProgressAggregator {
    pub fn new() -> Self {
        Self {
            phases: Phase::ALL.map(PhaseState::new),
        }
    }

    /// Replace the phase's last event. No ordering check: last write wins.
    pub fn apply(&mut self, event: ProgressEvent) {
        let slot = &mut self.phases[event.phase.index()];
        slot.last_event = Some(event);
    }

    /// Apply a decoded channel message. Returns `false` for control messages,
    /// which leave every phase untouched.
    pub fn apply_message(&mut self, message: ChannelMessage) -> bool {
        match message {
            ChannelMessage::Progress(event) => {
                self.apply(event);
                true
            }
            ChannelMessage::Control(_) => false,
        }
    }

    pub fn phase(&self, phase: Phase) -> &PhaseState {
        &self.phases[phase.index()]
    }

    pub fn phases(&self) -> &[PhaseState] {
        &self.phases
    }

    /// `floor(sum of phase percents / 3)`; always within `0..=100`.
    pub fn overall(&self) -> u8 {
        let sum: u32 = self.phases.iter().map(|p| u32::from(p.percent())).sum();
        (sum / Phase::ALL.len() as u32) as u8
    }

    /// Human-readable status line for the current state.
    ///
    /// Uses the most advanced phase that has reported anything, preferring the
    /// publisher's own message over a generated one.
    pub fn status_message(&self) -> String {
        if self.overall() >= 100 {
            return "Onboarding complete".to_string();
        }
        let latest = self
            .phases
            .iter()
            .rev()
            .find_map(|p| p.last_event.as_ref().map(|e| (p, e)));
        match latest {
            Some((state, event)) => event
                .message
                .clone()
                .unwrap_or_else(|| format!("{}: {}%", state.phase.label(), state.percent())),
            None => "Waiting for progress updates".to_string(),
        }
    }

    pub fn snapshot(&self, is_connected: bool) -> ProgressSnapshot {
        let phase = |p: Phase| PhaseSnapshot::from(self.phase(p));
        ProgressSnapshot {
            overall: self.overall(),
            per_phase: PhaseSnapshots {
                upload: phase(Phase::Upload),
                ingestion: phase(Phase::Ingestion),
                deployment: phase(Phase::Deployment),
            },
            is_connected,
            status: self.status_message(),
        }
    }
}

/// Per-phase view exposed to the presentation layer.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PhaseSnapshot {
    pub percent: u8,
    pub reported: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub detail: Option<EventDetail>,
}

impl From<&PhaseState> for PhaseSnapshot {
    fn from(state: &PhaseState) -> Self {
        let event = state.last_event.as_ref();
        Self {
            percent: state.percent(),
            reported: state.has_reported(),
            message: event.and_then(|e| e.message.clone()),
            detail: event.and_then(|e| e.detail.clone()),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PhaseSnapshots {
    pub upload: PhaseSnapshot,
    pub ingestion: PhaseSnapshot,
    pub deployment: PhaseSnapshot,
}

impl PhaseSnapshots {
    pub fn get(&self, phase: Phase) -> &PhaseSnapshot {
        match phase {
            Phase::Upload => &self.upload,
            Phase::Ingestion => &self.ingestion,
            Phase::Deployment => &self.deployment,
        }
    }
}

/// Everything the presentation layer renders, refreshed on every event and
/// every supervisor poll tick.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProgressSnapshot {
    pub overall: u8,
    pub per_phase: PhaseSnapshots,
    pub is_connected: bool,
    pub status: String,
}

impl Default for ProgressSnapshot {
    fn default() -> Self {
        ProgressAggregator::new().snapshot(false)
    }
}
