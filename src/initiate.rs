//! Client for the REST call that starts an onboarding job.
//!
//! The call returns as soon as the backend has accepted the job; the id it
//! returns is the subscription key for the progress channel. Any failure
//! here is reported to the user directly and tracking never starts.

use serde::Deserialize;
use serde_json::Value;
use std::time::Duration;
use tracing::{debug, info};

use crate::errors::InitiationError;
use onboard_common::JobId;

/// Path of the job-initiation endpoint, relative to the API base URL.
pub const START_JOB_PATH: &str = "/onboarding/jobs";

/// Upper bound on the whole initiation round trip.
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Response body of the initiation endpoint. Older deployments key the job
/// by customer id instead of job id.
#[derive(Debug, Deserialize)]
pub struct StartJobResponse {
    #[serde(default)]
    pub job_id: Option<String>,
    #[serde(default)]
    pub customer_id: Option<String>,
}

impl StartJobResponse {
    pub fn into_job_id(self) -> Result<JobId, InitiationError> {
        let raw = self
            .job_id
            .or(self.customer_id)
            .filter(|id| !id.is_empty())
            .ok_or(InitiationError::MissingJobId)?;
        Ok(JobId::new(raw)?)
    }
}

#[derive(Debug, Clone)]
pub struct JobClient {
    http: reqwest::Client,
    base_url: String,
    token: Option<String>,
}

impl JobClient {
    pub fn new(base_url: impl Into<String>, token: Option<String>) -> Result<Self, InitiationError> {
        Self::with_timeout(base_url, token, DEFAULT_REQUEST_TIMEOUT)
    }

    pub fn with_timeout(
        base_url: impl Into<String>,
        token: Option<String>,
        timeout: Duration,
    ) -> Result<Self, InitiationError> {
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(InitiationError::Request)?;
        Ok(Self {
            http,
            base_url: base_url.into(),
            token,
        })
    }

    pub fn endpoint(&self) -> Result<String, InitiationError> {
        let base = self.base_url.trim_end_matches('/');
        if !(base.starts_with("http://") || base.starts_with("https://")) {
            return Err(InitiationError::InvalidUrl {
                url: self.base_url.clone(),
                message: "scheme must be http:// or https://".to_string(),
            });
        }
        Ok(format!("{}{}", base, START_JOB_PATH))
    }

    /// Start a job with an opaque JSON payload and return its id.
    pub async fn start_job(&self, payload: &Value) -> Result<JobId, InitiationError> {
        let url = self.endpoint()?;
        debug!(url = %url, "starting onboarding job");

        let mut request = self.http.post(&url).json(payload);
        if let Some(token) = &self.token {
            request = request.bearer_auth(token);
        }

        let response = request.send().await.map_err(InitiationError::Request)?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(InitiationError::Status {
                status: status.as_u16(),
                body,
            });
        }

        let body: StartJobResponse = response.json().await.map_err(InitiationError::Request)?;
        let job_id = body.into_job_id()?;
        info!(job_id = %job_id, "onboarding job started");
        Ok(job_id)
    }
}
