//! Typed error hierarchy for the onboarding tracker.
//!
//! - `ChannelError`: transport failures inside the progress channel. These
//!   never reach the presentation layer; the channel retries instead.
//! - `InitiationError`: the REST call that starts a job. Surfaced to the
//!   user immediately; tracking is never started after one of these.

use std::time::Duration;
use thiserror::Error;

use onboard_common::JobIdError;

/// Errors from the progress channel transport.
#[derive(Debug, Error)]
pub enum ChannelError {
    #[error("Invalid channel URL '{url}': {message}")]
    InvalidUrl { url: String, message: String },

    #[error("Failed to connect to {url}: {message}")]
    Connect { url: String, message: String },

    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Handshake did not complete within {0:?}")]
    ConnectTimeout(Duration),
}

/// Errors from the job-initiation call.
#[derive(Debug, Error)]
pub enum InitiationError {
    #[error("Failed to reach onboarding API: {0}")]
    Request(#[source] reqwest::Error),

    #[error("Onboarding API returned {status}: {body}")]
    Status { status: u16, body: String },

    #[error("Onboarding API response did not include a job id")]
    MissingJobId,

    #[error("Onboarding API returned an invalid job id: {0}")]
    InvalidJobId(#[from] JobIdError),

    #[error("Invalid API URL '{url}': {message}")]
    InvalidUrl { url: String, message: String },
}
