//! Event Log writer client
//!
//! Appends migration events to a run stream over the ndjson HTTP
//! transport. `append` is synchronous per event: the caller blocks on the
//! acknowledgment, so a `complete` event is durable before the process
//! exits. `append_batch` exists for high-frequency progress/success
//! events to reduce write amplification.

use crate::error::{MigrateError, Result};
use crate::stream::event::{encode_batch, MigrationEvent};

pub struct EventLogWriter {
    client: reqwest::Client,
    base_url: String,
}

impl EventLogWriter {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: base_url.into(),
        }
    }

    fn stream_url(&self, run_id: &str) -> String {
        format!("{}/migrations/{}", self.base_url, run_id)
    }

    /// Create the stream for a run. Fails loudly when the transport is
    /// unreachable; the caller decides whether the run can proceed.
    pub async fn create_stream(&self, run_id: &str, ttl_secs: u64) -> Result<()> {
        let response = self
            .client
            .post(self.stream_url(run_id))
            .header("Stream-TTL", ttl_secs.to_string())
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(MigrateError::Stream(format!(
                "Failed to create stream {}: HTTP {}",
                run_id,
                response.status()
            )));
        }
        Ok(())
    }

    /// Append one event and wait for the acknowledgment
    pub async fn append(&self, run_id: &str, event: &MigrationEvent) -> Result<()> {
        let response = self
            .client
            .post(self.stream_url(run_id))
            .header("Content-Type", "application/json")
            .body(event.encode()?)
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(MigrateError::Stream(format!(
                "Failed to append to {}: HTTP {}",
                run_id,
                response.status()
            )));
        }
        Ok(())
    }

    /// Append a batch as a single ndjson body
    pub async fn append_batch(&self, run_id: &str, events: &[MigrationEvent]) -> Result<()> {
        if events.is_empty() {
            return Ok(());
        }
        let response = self
            .client
            .post(self.stream_url(run_id))
            .header("Content-Type", "application/x-ndjson")
            .body(encode_batch(events)?)
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(MigrateError::Stream(format!(
                "Failed to append batch to {}: HTTP {}",
                run_id,
                response.status()
            )));
        }
        Ok(())
    }
}
