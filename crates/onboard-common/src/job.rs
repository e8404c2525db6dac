use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Longest job id accepted from the initiation API or the command line.
pub const MAX_JOB_ID_LEN: usize = 128;

/// Key identifying one onboarding flow.
///
/// Restricted to URL-safe characters so it can be substituted into channel
/// and API URLs verbatim.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct JobId(String);

#[derive(Debug, Error, PartialEq, Eq)]
pub enum JobIdError {
    #[error("job id must not be empty")]
    Empty,

    #[error("job id exceeds {MAX_JOB_ID_LEN} characters")]
    TooLong,

    #[error("job id contains invalid character {0:?}")]
    InvalidChar(char),
}

impl JobId {
    pub fn new(id: impl Into<String>) -> Result<Self, JobIdError> {
        let id = id.into();
        if id.is_empty() {
            return Err(JobIdError::Empty);
        }
        if id.len() > MAX_JOB_ID_LEN {
            return Err(JobIdError::TooLong);
        }
        if let Some(bad) = id
            .chars()
            .find(|c| !(c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.')))
        {
            return Err(JobIdError::InvalidChar(bad));
        }
        Ok(Self(id))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for JobId {
    type Err = JobIdError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::new(s)
    }
}

impl TryFrom<String> for JobId {
    type Error = JobIdError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<JobId> for String {
    fn from(id: JobId) -> Self {
        id.0
    }
}
