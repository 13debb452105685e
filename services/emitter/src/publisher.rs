//! Message bus publishers.
//!
//! The pipeline publishes through the [`Publisher`] trait. [`HttpPublisher`]
//! posts to the bus gateway; [`LogPublisher`] only logs, for dry runs.

use std::time::Duration;

use async_trait::async_trait;
use routesync_table::Subject;
use thiserror::Error;
use tracing::{debug, info};

/// Publish failures, split by whether a retry can help.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum PublishError {
    #[error("transient publish failure on {subject}: {message}")]
    Transient { subject: Subject, message: String },

    #[error("permanent publish failure on {subject}: {message}")]
    Permanent { subject: Subject, message: String },
}

impl PublishError {
    pub fn transient(subject: Subject, message: impl Into<String>) -> Self {
        Self::Transient {
            subject,
            message: message.into(),
        }
    }

    pub fn permanent(subject: Subject, message: impl Into<String>) -> Self {
        Self::Permanent {
            subject,
            message: message.into(),
        }
    }

    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Transient { .. })
    }
}

/// Sink for encoded registry messages.
#[async_trait]
pub trait Publisher: Send + Sync {
    async fn publish(&self, subject: Subject, body: &[u8]) -> Result<(), PublishError>;
}

/// Publishes through the bus gateway's HTTP API:
/// `POST {bus_url}/v1/publish/{subject}` with the message as JSON body.
#[derive(Debug, Clone)]
pub struct HttpPublisher {
    client: reqwest::Client,
    base_url: String,
}

impl HttpPublisher {
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self, reqwest::Error> {
        let client = reqwest::Client::builder()
            .user_agent(concat!("route-emitter/", env!("CARGO_PKG_VERSION")))
            .timeout(timeout)
            .build()?;

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }

    fn url(&self, subject: Subject) -> String {
        format!("{}/v1/publish/{}", self.base_url, subject.as_str())
    }
}

#[async_trait]
impl Publisher for HttpPublisher {
    async fn publish(&self, subject: Subject, body: &[u8]) -> Result<(), PublishError> {
        let resp = self
            .client
            .post(self.url(subject))
            .header(reqwest::header::CONTENT_TYPE, "application/json")
            .body(body.to_vec())
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() || e.is_connect() {
                    PublishError::transient(subject, e.to_string())
                } else {
                    PublishError::permanent(subject, e.to_string())
                }
            })?;

        let status = resp.status();
        if status.is_success() {
            debug!(subject = %subject, bytes = body.len(), "published");
            return Ok(());
        }

        let text = resp.text().await.unwrap_or_default();
        let message = format!("status={status}: {text}");
        if status.is_server_error() || status == reqwest::StatusCode::TOO_MANY_REQUESTS {
            Err(PublishError::transient(subject, message))
        } else {
            Err(PublishError::permanent(subject, message))
        }
    }
}

/// Logs every message instead of publishing it.
#[derive(Debug, Clone, Copy, Default)]
pub struct LogPublisher;

#[async_trait]
impl Publisher for LogPublisher {
    async fn publish(&self, subject: Subject, body: &[u8]) -> Result<(), PublishError> {
        info!(
            subject = %subject,
            body = %String::from_utf8_lossy(body),
            "dry-run publish"
        );
        Ok(())
    }
}
