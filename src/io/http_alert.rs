//! HTTP alert relay sink
//!
//! POSTs each posture notification as JSON to an external endpoint
//! (e.g. a phone push relay). Records are not forwarded.

use crate::domain::types::MonitorEvent;
use crate::infra::config::HttpAlertConfig;
use crate::services::dispatcher::{Sink, SinkError};
use async_trait::async_trait;
use std::time::Duration;
use tracing::debug;

pub struct HttpAlertSink {
    client: reqwest::Client,
    url: String,
}

impl HttpAlertSink {
    pub fn new(config: &HttpAlertConfig) -> anyhow::Result<Self> {
        if config.url.is_empty() {
            anyhow::bail!("sinks.http_alert.url is required when the alert sink is enabled");
        }
        let client = reqwest::Client::builder()
            .timeout(Duration::from_millis(config.timeout_ms))
            .http1_only()
            .build()?;
        Ok(Self { client, url: config.url.clone() })
    }
}

#[async_trait]
impl Sink for HttpAlertSink {
    fn name(&self) -> &'static str {
        "http_alert"
    }

    fn accepts(&self, event: &MonitorEvent) -> bool {
        matches!(event, MonitorEvent::Notification(_))
    }

    async fn deliver(&self, event: &MonitorEvent) -> Result<(), SinkError> {
        let MonitorEvent::Notification(n) = event else {
            return Ok(());
        };

        let body = serde_json::to_string(n)?;
        let response = self
            .client
            .post(&self.url)
            .header("Content-Type", "application/json")
            .body(body)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            return Err(SinkError::Status(status.as_u16()));
        }
        debug!(url = %self.url, label = %n.label, "http_alert_sent");
        Ok(())
    }
}
