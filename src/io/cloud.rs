//! Firebase Realtime Database sink (REST)
//!
//! - Records: `POST {database_url}/{records_path}.json` (push, one child per record)
//! - Posture: `PATCH {database_url}/{posture_path}.json` updating
//!   `unsafe_sleeping` and `alert_message` on the monitoring document
//!
//! The optional token is sent as the `auth` query parameter. Any non-2xx
//! response counts as a failed delivery.

use crate::domain::types::{MonitorEvent, NotificationEvent};
use crate::infra::config::CloudSinkConfig;
use crate::services::dispatcher::{Sink, SinkError};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::Method;
use serde::Serialize;
use std::time::{Duration, Instant};
use tracing::debug;

#[derive(Debug, Serialize)]
struct PostureUpdate<'a> {
    unsafe_sleeping: bool,
    alert_message: &'a str,
    label: &'a str,
    timestamp: DateTime<Utc>,
}

impl<'a> From<&'a NotificationEvent> for PostureUpdate<'a> {
    fn from(event: &'a NotificationEvent) -> Self {
        Self {
            unsafe_sleeping: event.label.is_unsafe(),
            alert_message: &event.message,
            label: event.label.as_str(),
            timestamp: event.timestamp,
        }
    }
}

pub struct FirebaseSink {
    client: reqwest::Client,
    records_url: String,
    posture_url: String,
    auth_token: Option<String>,
}

impl FirebaseSink {
    pub fn new(config: &CloudSinkConfig) -> anyhow::Result<Self> {
        let base = config.database_url.trim_end_matches('/');
        if base.is_empty() {
            anyhow::bail!("sinks.cloud.database_url is required when the cloud sink is enabled");
        }

        let client = reqwest::Client::builder()
            .timeout(Duration::from_millis(config.timeout_ms))
            .build()?;

        Ok(Self {
            client,
            records_url: node_url(base, &config.records_path),
            posture_url: node_url(base, &config.posture_path),
            auth_token: config.auth_token.clone().filter(|t| !t.is_empty()),
        })
    }

    /// Method, URL and JSON body for an event
    fn request_for(&self, event: &MonitorEvent) -> Result<(Method, &str, String), SinkError> {
        match event {
            MonitorEvent::Record(record) => {
                Ok((Method::POST, self.records_url.as_str(), serde_json::to_string(record)?))
            }
            MonitorEvent::Notification(n) => Ok((
                Method::PATCH,
                self.posture_url.as_str(),
                serde_json::to_string(&PostureUpdate::from(n))?,
            )),
        }
    }
}

/// `{base}/{path}.json` with surrounding slashes normalized
fn node_url(base: &str, path: &str) -> String {
    format!("{}/{}.json", base, path.trim_matches('/'))
}

#[async_trait]
impl Sink for FirebaseSink {
    fn name(&self) -> &'static str {
        "cloud"
    }

    async fn deliver(&self, event: &MonitorEvent) -> Result<(), SinkError> {
        let start = Instant::now();
        let (method, url, body) = self.request_for(event)?;

        let mut request = self
            .client
            .request(method, url)
            .header("Content-Type", "application/json")
            .body(body);
        if let Some(ref token) = self.auth_token {
            request = request.query(&[("auth", token)]);
        }

        let response = request.send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(SinkError::Status(status.as_u16()));
        }

        debug!(
            url = %url,
            event = %event.kind_str(),
            latency_ms = %start.elapsed().as_millis(),
            "cloud_sink_written"
        );
        Ok(())
    }
}
