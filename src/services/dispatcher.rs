//! Sink fan-out for committed records and posture notifications
//!
//! Every sink gets its own future; all of them run concurrently and a
//! failure in one is logged and counted without affecting the others.
//! There is no ordering between sinks and no retry. A sink that does not
//! finish within the delivery timeout counts as failed so a stalled
//! transport cannot hold up the flusher or frame ingress.

use crate::domain::types::MonitorEvent;
use crate::infra::metrics::Metrics;
use async_trait::async_trait;
use futures_util::future::join_all;
use std::sync::Arc;
use std::time::{Duration, Instant};
use thiserror::Error;
use tracing::{debug, warn};

#[derive(Debug, Error)]
pub enum SinkError {
    #[error("transport error: {0}")]
    Transport(String),
    #[error("unexpected status {0}")]
    Status(u16),
    #[error("serialization failed: {0}")]
    Serialize(#[from] serde_json::Error),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("delivery timed out after {0:?}")]
    Timeout(Duration),
}

impl From<reqwest::Error> for SinkError {
    fn from(e: reqwest::Error) -> Self {
        match e.status() {
            Some(status) => SinkError::Status(status.as_u16()),
            None => SinkError::Transport(e.to_string()),
        }
    }
}

/// External consumer of records and notifications
#[async_trait]
pub trait Sink: Send + Sync {
    fn name(&self) -> &'static str;

    /// Whether this sink wants the event at all
    fn accepts(&self, _event: &MonitorEvent) -> bool {
        true
    }

    async fn deliver(&self, event: &MonitorEvent) -> Result<(), SinkError>;
}

/// Outcome of one dispatch across all sinks
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct DispatchReport {
    pub delivered: usize,
    pub failed: usize,
    pub skipped: usize,
}

impl DispatchReport {
    /// Some sink was attempted and none succeeded
    pub fn all_failed(&self) -> bool {
        self.delivered == 0 && self.failed > 0
    }
}

/// Upper bound on a single sink delivery
pub const DEFAULT_DELIVER_TIMEOUT: Duration = Duration::from_secs(10);

pub struct SinkDispatcher {
    sinks: Vec<Arc<dyn Sink>>,
    metrics: Arc<Metrics>,
    deliver_timeout: Duration,
}

impl SinkDispatcher {
    pub fn new(metrics: Arc<Metrics>) -> Self {
        Self { sinks: Vec::new(), metrics, deliver_timeout: DEFAULT_DELIVER_TIMEOUT }
    }

    pub fn with_deliver_timeout(mut self, timeout: Duration) -> Self {
        self.deliver_timeout = timeout;
        self
    }

    pub fn with_sink(mut self, sink: Arc<dyn Sink>) -> Self {
        self.sinks.push(sink);
        self
    }

    pub fn add_sink(&mut self, sink: Arc<dyn Sink>) {
        self.sinks.push(sink);
    }

    pub fn sink_names(&self) -> Vec<&'static str> {
        self.sinks.iter().map(|s| s.name()).collect()
    }

    pub async fn dispatch(&self, event: &MonitorEvent) -> DispatchReport {
        let start = Instant::now();
        let mut report = DispatchReport::default();

        let targets: Vec<&Arc<dyn Sink>> =
            self.sinks.iter().filter(|s| s.accepts(event)).collect();
        report.skipped = self.sinks.len() - targets.len();

        let limit = self.deliver_timeout;
        let results = join_all(targets.iter().map(|sink| async move {
            tokio::time::timeout(limit, sink.deliver(event))
                .await
                .unwrap_or(Err(SinkError::Timeout(limit)))
        }))
        .await;

        for (sink, result) in targets.iter().zip(results) {
            match result {
                Ok(()) => {
                    report.delivered += 1;
                    self.metrics.record_sink_result(true);
                }
                Err(e) => {
                    report.failed += 1;
                    self.metrics.record_sink_result(false);
                    warn!(
                        sink = %sink.name(),
                        event = %event.kind_str(),
                        error = %e,
                        "sink_delivery_failed"
                    );
                }
            }
        }

        debug!(
            event = %event.kind_str(),
            delivered = %report.delivered,
            failed = %report.failed,
            skipped = %report.skipped,
            latency_us = %start.elapsed().as_micros(),
            "dispatch_complete"
        );
        report
    }
}
