//! Event correlation and export.
//!
//! # Responsibilities
//! - Accept events from the request path without ever blocking it
//! - Run every event through the correlation rules
//! - Batch events and escalations to the export sink
//! - Keep a bounded backlog when the sink is down
//!
//! # Data Flow
//! ```text
//! Pipeline ─record()─▶ bounded queue ─▶ correlator task
//!                                          ├─ engine.rs (escalations)
//!                                          └─ batch ─▶ export.rs sink
//!                                                        └─ failure: retry buffer
//! ```
//!
//! # Design Decisions
//! - A full queue drops the event and counts it; the request never waits
//! - A flush happens on batch size or on the interval tick, whichever is first
//! - Shutdown drains the queue and makes one final flush

pub mod engine;
pub mod export;

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;

use crate::config::{CorrelationRuleConfig, ExportConfig};
use crate::observability::metrics;
use crate::resilience::calculate_backoff;
use crate::security::types::SecurityEvent;

pub use engine::{CorrelationEngine, CorrelationRule, CORRELATOR_SOURCE};
pub use export::{decode_batch, encode_batch, ExportError, ExportSink, HttpSink, LogSink};

const BACKOFF_BASE: Duration = Duration::from_millis(200);
const BACKOFF_MAX: Duration = Duration::from_secs(5);

/// Cheap, cloneable handle used by the request path.
#[derive(Debug, Clone)]
pub struct CorrelatorHandle {
    tx: mpsc::Sender<SecurityEvent>,
}

impl CorrelatorHandle {
    /// Queue an event. Never waits; drops the event if the queue is full.
    pub fn record(&self, event: SecurityEvent) {
        match self.tx.try_send(event) {
            Ok(()) => {}
            Err(mpsc::error::TrySendError::Full(event)) => {
                tracing::warn!(
                    event_id = %event.id,
                    category = event.category.as_str(),
                    "Event queue full, dropping event"
                );
                metrics::record_events_dropped("queue_full", 1);
            }
            Err(mpsc::error::TrySendError::Closed(event)) => {
                tracing::debug!(event_id = %event.id, "Correlator stopped, dropping event");
                metrics::record_events_dropped("closed", 1);
            }
        }
    }

    /// A handle whose events go to the returned receiver instead of a task.
    pub fn detached(capacity: usize) -> (Self, mpsc::Receiver<SecurityEvent>) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        (Self { tx }, rx)
    }

    /// Free slots in the queue.
    pub fn capacity(&self) -> usize {
        self.tx.capacity()
    }
}

/// Start the correlator task with its own queue.
pub fn spawn(
    export: &ExportConfig,
    rules: &[CorrelationRuleConfig],
    sink: Arc<dyn ExportSink>,
    shutdown: broadcast::Receiver<()>,
) -> (CorrelatorHandle, JoinHandle<()>) {
    let (handle, rx) = CorrelatorHandle::detached(export.queue_capacity);
    let task = start(rx, export, rules, sink, shutdown);
    (handle, task)
}

/// Start the correlator task on the receiving side of a detached handle.
pub fn start(
    rx: mpsc::Receiver<SecurityEvent>,
    export: &ExportConfig,
    rules: &[CorrelationRuleConfig],
    sink: Arc<dyn ExportSink>,
    shutdown: broadcast::Receiver<()>,
) -> JoinHandle<()> {
    let correlator = Correlator {
        engine: CorrelationEngine::from_config(rules),
        sink,
        pending: Vec::new(),
        retry: VecDeque::new(),
        batch_size: export.batch_size.max(1),
        retry_capacity: export.retry_buffer,
        max_attempts: export.max_attempts.max(1),
        flush_interval: Duration::from_secs(export.flush_interval_secs.max(1)),
    };

    tracing::info!(
        sink = correlator.sink.name(),
        rules = rules.len(),
        batch_size = correlator.batch_size,
        flush_interval_secs = correlator.flush_interval.as_secs(),
        "Correlator started"
    );

    tokio::spawn(correlator.run(rx, shutdown))
}

struct Correlator {
    engine: CorrelationEngine,
    sink: Arc<dyn ExportSink>,
    pending: Vec<SecurityEvent>,
    /// Events from failed flushes, oldest first.
    retry: VecDeque<SecurityEvent>,
    batch_size: usize,
    retry_capacity: usize,
    max_attempts: u32,
    flush_interval: Duration,
}

impl Correlator {
    async fn run(
        mut self,
        mut rx: mpsc::Receiver<SecurityEvent>,
        mut shutdown: broadcast::Receiver<()>,
    ) {
        let mut ticker = tokio::time::interval(self.flush_interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        // The first tick completes immediately.
        ticker.tick().await;

        loop {
            tokio::select! {
                received = rx.recv() => match received {
                    Some(event) => {
                        self.accept(event);
                        if self.pending.len() >= self.batch_size {
                            self.flush(self.max_attempts).await;
                        }
                    }
                    None => break,
                },
                _ = ticker.tick() => {
                    self.flush(self.max_attempts).await;
                    self.engine.prune(Utc::now());
                }
                _ = shutdown.recv() => break,
            }
        }

        rx.close();
        while let Ok(event) = rx.try_recv() {
            self.accept(event);
        }
        self.flush(1).await;

        let lost = self.retry.len();
        if lost > 0 {
            tracing::warn!(events = lost, "Correlator stopped with unexported events");
            metrics::record_events_dropped("shutdown", lost);
        }
        tracing::info!("Correlator stopped");
    }

    fn accept(&mut self, event: SecurityEvent) {
        let escalations = self.engine.ingest(&event);
        self.pending.push(event);
        self.pending.extend(escalations);
    }

    async fn flush(&mut self, attempts: u32) {
        if self.pending.is_empty() && self.retry.is_empty() {
            return;
        }

        let mut batch: Vec<SecurityEvent> = self.retry.drain(..).collect();
        batch.append(&mut self.pending);

        for attempt in 1..=attempts {
            match self.sink.send(&batch).await {
                Ok(()) => {
                    metrics::record_export_batch("success");
                    tracing::debug!(events = batch.len(), sink = self.sink.name(), "Batch exported");
                    return;
                }
                Err(e) => {
                    metrics::record_export_batch("failure");
                    tracing::warn!(
                        error = %e,
                        attempt,
                        events = batch.len(),
                        sink = self.sink.name(),
                        "Batch export failed"
                    );
                    if attempt < attempts {
                        tokio::time::sleep(calculate_backoff(attempt, BACKOFF_BASE, BACKOFF_MAX))
                            .await;
                    }
                }
            }
        }

        // Keep the newest events; the oldest are the first to go.
        let overflow = batch.len().saturating_sub(self.retry_capacity);
        if overflow > 0 {
            batch.drain(..overflow);
            metrics::record_events_dropped("export_failed", overflow);
            tracing::warn!(dropped = overflow, "Retry buffer full, oldest events dropped");
        }
        self.retry.extend(batch);
    }
}
