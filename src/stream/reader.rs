//! Event Log reader client
//!
//! Two read paths: a one-shot catch-up (`read_events`) for consumers that
//! only need current state, and a live tail (`tail`) that delivers events
//! as they are appended. The tail survives connection loss: it reconnects
//! with a fixed backoff and resumes from the last committed offset, so
//! per-offset delivery is exact - no duplicates, no gaps. A stream that
//! does not exist (never created, or expired past its TTL) is a distinct,
//! terminal condition and is never retried forever.

use crate::error::{MigrateError, Result};
use crate::stream::event::MigrationEvent;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// Fixed backoff between tail reconnect attempts
const RECONNECT_BACKOFF: Duration = Duration::from_secs(1);

/// Channel depth between the tail task and its consumer
const TAIL_CHANNEL_CAPACITY: usize = 256;

/// Connection state of a live tail
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TailState {
    Connecting,
    Connected,
    Reconnecting,
}

pub struct EventLogReader {
    client: reqwest::Client,
    base_url: String,
}

impl EventLogReader {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: base_url.into(),
        }
    }

    fn stream_url(&self, run_id: &str) -> String {
        format!("{}/migrations/{}", self.base_url, run_id)
    }

    /// Cheap existence probe. `Ok(false)` means not found (not started
    /// yet, or expired); a transport error is returned as-is so callers
    /// can tell the two apart.
    pub async fn stream_exists(&self, run_id: &str) -> Result<bool> {
        let response = self
            .client
            .head(self.stream_url(run_id))
            .send()
            .await?;
        Ok(response.status().as_u16() == 200)
    }

    /// Bounded poll for a run that may not have started yet. Distinct
    /// outcomes: found, not found after `max_attempts`, or transport
    /// failure.
    pub async fn wait_for_stream(
        &self,
        run_id: &str,
        max_attempts: u32,
        interval: Duration,
    ) -> Result<()> {
        for attempt in 1..=max_attempts {
            if self.stream_exists(run_id).await? {
                return Ok(());
            }
            debug!(
                "Stream {} not found (attempt {}/{})",
                run_id, attempt, max_attempts
            );
            if attempt < max_attempts {
                tokio::time::sleep(interval).await;
            }
        }
        Err(MigrateError::StreamNotFound(run_id.to_string()))
    }

    /// One-shot catch-up read of all events at or after `from_offset`
    /// (`-1` means from the start). Offsets are returned alongside the
    /// events so callers can resume later.
    pub async fn read_events(
        &self,
        run_id: &str,
        from_offset: i64,
    ) -> Result<Vec<(u64, MigrationEvent)>> {
        let response = self
            .client
            .get(self.stream_url(run_id))
            .query(&[("offset", from_offset.to_string())])
            .header("Accept", "application/x-ndjson")
            .send()
            .await?;

        if response.status().as_u16() == 404 {
            return Err(MigrateError::StreamNotFound(run_id.to_string()));
        }
        if !response.status().is_success() {
            return Err(MigrateError::Stream(format!(
                "Catch-up read of {} failed: HTTP {}",
                run_id,
                response.status()
            )));
        }

        let start = if from_offset < 0 { 0 } else { from_offset as u64 };
        let body = response.text().await?;
        let mut events = Vec::new();
        for (i, line) in body.lines().filter(|l| !l.trim().is_empty()).enumerate() {
            events.push((start + i as u64, MigrationEvent::decode(line)?));
        }
        Ok(events)
    }

    /// Start a live tail from `from_offset`. The returned handle yields
    /// `(offset, event)` pairs; dropping or cancelling it closes the
    /// underlying connection promptly.
    pub fn tail(&self, run_id: &str, from_offset: u64) -> EventTail {
        let (tx, rx) = mpsc::channel(TAIL_CHANNEL_CAPACITY);
        let (state_tx, state_rx) = watch::channel(TailState::Connecting);
        let cancel = CancellationToken::new();

        let task = TailTask {
            client: self.client.clone(),
            url: self.stream_url(run_id),
            run_id: run_id.to_string(),
            tx,
            state: state_tx,
            cancel: cancel.clone(),
        };
        let handle = tokio::spawn(task.run(from_offset));

        EventTail {
            rx,
            state: state_rx,
            cancel,
            handle,
        }
    }
}

/// Handle to a running live tail
pub struct EventTail {
    rx: mpsc::Receiver<(u64, MigrationEvent)>,
    state: watch::Receiver<TailState>,
    cancel: CancellationToken,
    handle: tokio::task::JoinHandle<Result<()>>,
}

impl EventTail {
    /// Next event, or `None` once the tail has terminated
    pub async fn next(&mut self) -> Option<(u64, MigrationEvent)> {
        self.rx.recv().await
    }

    /// Current connection state
    pub fn state(&self) -> TailState {
        *self.state.borrow()
    }

    /// Stop tailing and close the connection
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    /// Await the tail task's terminal result (e.g. `StreamNotFound` when
    /// the stream expired mid-tail)
    pub async fn join(self) -> Result<()> {
        match self.handle.await {
            Ok(result) => result,
            Err(e) => Err(MigrateError::Stream(format!("Tail task panicked: {}", e))),
        }
    }
}

struct TailTask {
    client: reqwest::Client,
    url: String,
    run_id: String,
    tx: mpsc::Sender<(u64, MigrationEvent)>,
    state: watch::Sender<TailState>,
    cancel: CancellationToken,
}

impl TailTask {
    async fn run(self, from_offset: u64) -> Result<()> {
        // Exactly-once per offset: `next` only advances after an event is
        // handed to the consumer, and every reconnect resumes from it.
        let mut next = from_offset;

        loop {
            if self.cancel.is_cancelled() {
                return Ok(());
            }

            let response = tokio::select! {
                _ = self.cancel.cancelled() => return Ok(()),
                r = self
                    .client
                    .get(&self.url)
                    .query(&[("offset", next.to_string()), ("live", "sse".to_string())])
                    .header("Accept", "text/event-stream")
                    .send() => r,
            };

            let mut response = match response {
                Ok(r) if r.status().as_u16() == 404 => {
                    // Terminal: never created or expired; not a retry case
                    return Err(MigrateError::StreamNotFound(self.run_id.clone()));
                }
                Ok(r) if r.status().is_success() => r,
                Ok(r) => {
                    warn!(
                        "Tail of {} got HTTP {}, reconnecting",
                        self.run_id,
                        r.status()
                    );
                    self.backoff().await;
                    continue;
                }
                Err(e) => {
                    warn!("Tail of {} lost connection: {}, reconnecting", self.run_id, e);
                    let _ = self.state.send(TailState::Reconnecting);
                    self.backoff().await;
                    continue;
                }
            };

            let _ = self.state.send(TailState::Connected);
            let mut buffer = String::new();

            loop {
                let chunk = tokio::select! {
                    _ = self.cancel.cancelled() => return Ok(()),
                    c = response.chunk() => c,
                };
                match chunk {
                    Ok(Some(bytes)) => {
                        buffer.push_str(&String::from_utf8_lossy(&bytes));
                        if !self.drain_frames(&mut buffer, &mut next).await {
                            // Consumer dropped the receiver
                            return Ok(());
                        }
                    }
                    Ok(None) => {
                        debug!("Tail of {} ended, reconnecting from {}", self.run_id, next);
                        let _ = self.state.send(TailState::Reconnecting);
                        self.backoff().await;
                        break;
                    }
                    Err(e) => {
                        warn!("Tail of {} read failed: {}, reconnecting", self.run_id, e);
                        let _ = self.state.send(TailState::Reconnecting);
                        self.backoff().await;
                        break;
                    }
                }
            }
        }
    }

    /// Parse complete SSE frames out of the buffer and deliver events.
    /// Returns false when the consumer has gone away.
    async fn drain_frames(&self, buffer: &mut String, next: &mut u64) -> bool {
        while let Some(pos) = buffer.find("\n\n") {
            let frame = buffer[..pos].to_string();
            buffer.drain(..pos + 2);

            let mut id: Option<u64> = None;
            let mut data: Option<&str> = None;
            for line in frame.lines() {
                if let Some(rest) = line.strip_prefix("id:") {
                    id = rest.trim().parse().ok();
                } else if let Some(rest) = line.strip_prefix("data:") {
                    data = Some(rest.trim());
                }
            }

            let (offset, payload) = match (id, data) {
                (Some(id), Some(data)) => (id, data),
                _ => continue,
            };
            // Server may replay what we already delivered
            if offset < *next {
                continue;
            }
            let event = match MigrationEvent::decode(payload) {
                Ok(event) => event,
                Err(e) => {
                    warn!("Skipping undecodable event at offset {}: {}", offset, e);
                    *next = offset + 1;
                    continue;
                }
            };
            if self.tx.send((offset, event)).await.is_err() {
                return false;
            }
            *next = offset + 1;
        }
        true
    }

    async fn backoff(&self) {
        tokio::select! {
            _ = self.cancel.cancelled() => {}
            _ = tokio::time::sleep(RECONNECT_BACKOFF) => {}
        }
    }
}
