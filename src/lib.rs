//! Onboarding progress tracker.
//!
//! Follows a long-running, three-phase onboarding job (upload, ingestion,
//! deployment) over a self-healing WebSocket channel and reduces it to one
//! overall progress value, with a supervisor that guarantees the flow ends.
//!
//! Dependency order, leaves first: [`channel`] → [`aggregator`] →
//! [`supervisor`] → [`tracker`] → [`ui`].

pub mod aggregator;
pub mod channel;
pub mod config;
pub mod errors;
pub mod initiate;
pub mod publisher;
pub mod supervisor;
pub mod telemetry;
pub mod tracker;
pub mod ui;

pub use aggregator::{ProgressAggregator, ProgressSnapshot};
pub use channel::{ChannelState, ProgressChannel, Transport, WebSocketTransport};
pub use onboard_common::{ChannelMessage, JobId, Phase, ProgressEvent};
pub use supervisor::{CompletionReason, CompletionSupervisor};
pub use tracker::{ProgressTracker, TrackerSettings};
