//! Shared domain types for the onboarding progress tracker.
//!
//! Both sides of the progress channel speak these types: the tracker
//! decodes [`ChannelMessage`]s off the wire and the relay publisher
//! validates and re-encodes them before fanning them out.

pub mod event;
pub mod job;

pub use event::{
    ChannelMessage, ControlKind, DecodeError, EventDetail, Phase, ProgressEvent, WireMessage,
};
pub use job::{JobId, JobIdError};
