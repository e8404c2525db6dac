//! Transport seam for the progress channel.
//!
//! The channel actor only needs "open a stream of text frames for this job".
//! Production uses [`WebSocketTransport`]; tests plug in an in-memory
//! implementation.

use async_trait::async_trait;
use futures_util::StreamExt;
use futures_util::stream::BoxStream;
use tokio_tungstenite::tungstenite::Message;

use crate::errors::ChannelError;
use onboard_common::JobId;

/// Text frames from one live connection. The stream ending means the
/// connection closed.
pub type MessageStream = BoxStream<'static, Result<String, ChannelError>>;

/// Placeholder substituted with the job id in channel URL templates.
pub const JOB_ID_PLACEHOLDER: &str = "{job_id}";

#[async_trait]
pub trait Transport: Send + Sync + 'static {
    /// Open a connection scoped to `job_id`.
    async fn connect(&self, job_id: &JobId) -> Result<MessageStream, ChannelError>;
}

/// WebSocket transport addressed by a URL template such as
/// `wss://api.example.com/ws/progress/{job_id}`.
#[derive(Debug, Clone)]
pub struct WebSocketTransport {
    url_template: String,
}

impl WebSocketTransport {
    pub fn new(url_template: impl Into<String>) -> Self {
        Self {
            url_template: url_template.into(),
        }
    }

    /// Resolve the template for one job. Templates without a placeholder get
    /// the job id appended as the final path segment.
    pub fn url_for(&self, job_id: &JobId) -> Result<String, ChannelError> {
        let url = if self.url_template.contains(JOB_ID_PLACEHOLDER) {
            self.url_template
                .replace(JOB_ID_PLACEHOLDER, job_id.as_str())
        } else {
            format!("{}/{}", self.url_template.trim_end_matches('/'), job_id)
        };
        if !(url.starts_with("ws://") || url.starts_with("wss://")) {
            return Err(ChannelError::InvalidUrl {
                url,
                message: "scheme must be ws:// or wss://".to_string(),
            });
        }
        Ok(url)
    }
}

#[async_trait]
impl Transport for WebSocketTransport {
    async fn connect(&self, job_id: &JobId) -> Result<MessageStream, ChannelError> {
        let url = self.url_for(job_id)?;
        let (socket, _response) = tokio_tungstenite::connect_async(url.as_str())
            .await
            .map_err(|e| ChannelError::Connect {
                url: url.clone(),
                message: e.to_string(),
            })?;

        // Pings are answered by tungstenite itself while the stream is polled.
        let frames = socket
            .take_while(|frame| {
                let open = !matches!(frame, Ok(Message::Close(_)));
                async move { open }
            })
            .filter_map(|frame| async move {
                match frame {
                    Ok(Message::Text(text)) => Some(Ok(text.as_str().to_owned())),
                    Ok(Message::Binary(bytes)) => {
                        Some(Ok(String::from_utf8_lossy(&bytes).into_owned()))
                    }
                    Ok(_) => None,
                    Err(e) => Some(Err(ChannelError::Transport(e.to_string()))),
                }
            });

        Ok(frames.boxed())
    }
}
