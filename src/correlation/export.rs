//! Export sinks.
//!
//! A batch is a JSON array of [`SecurityEvent`]s. Timestamps serialize as
//! RFC 3339 with nanoseconds, so a batch decodes back to identical events.

use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;

use crate::config::ExportConfig;
use crate::security::types::SecurityEvent;

#[derive(Debug, Error)]
pub enum ExportError {
    #[error("failed to build export client: {0}")]
    Client(#[source] reqwest::Error),

    #[error("export request failed: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("sink rejected batch with status {0}")]
    Rejected(u16),

    #[error("failed to encode batch: {0}")]
    Encode(#[from] serde_json::Error),
}

/// Destination for batches of events.
#[async_trait]
pub trait ExportSink: Send + Sync {
    fn name(&self) -> &'static str;

    async fn send(&self, batch: &[SecurityEvent]) -> Result<(), ExportError>;
}

pub fn encode_batch(batch: &[SecurityEvent]) -> Result<Vec<u8>, serde_json::Error> {
    serde_json::to_vec(batch)
}

pub fn decode_batch(bytes: &[u8]) -> Result<Vec<SecurityEvent>, serde_json::Error> {
    serde_json::from_slice(bytes)
}

/// POSTs batches to an HTTP endpoint with a bearer credential.
pub struct HttpSink {
    client: reqwest::Client,
    endpoint: String,
    credential: String,
}

impl HttpSink {
    pub fn new(config: &ExportConfig) -> Result<Self, ExportError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs.max(1)))
            .build()
            .map_err(ExportError::Client)?;

        Ok(Self {
            client,
            endpoint: config.endpoint.clone(),
            credential: config.credential.clone(),
        })
    }
}

#[async_trait]
impl ExportSink for HttpSink {
    fn name(&self) -> &'static str {
        "http"
    }

    async fn send(&self, batch: &[SecurityEvent]) -> Result<(), ExportError> {
        let body = encode_batch(batch)?;
        let response = self
            .client
            .post(&self.endpoint)
            .bearer_auth(&self.credential)
            .header(reqwest::header::CONTENT_TYPE, "application/json")
            .body(body)
            .send()
            .await?;

        let status = response.status();
        if status.is_success() {
            Ok(())
        } else {
            Err(ExportError::Rejected(status.as_u16()))
        }
    }
}

/// Writes batches to the log. Used when export is disabled.
#[derive(Debug, Default)]
pub struct LogSink;

#[async_trait]
impl ExportSink for LogSink {
    fn name(&self) -> &'static str {
        "log"
    }

    async fn send(&self, batch: &[SecurityEvent]) -> Result<(), ExportError> {
        for event in batch {
            tracing::info!(
                event_id = %event.id,
                category = event.category.as_str(),
                severity = ?event.severity,
                actor = %event.actor,
                source = %event.source,
                path = %event.path,
                "Security event"
            );
        }
        Ok(())
    }
}
