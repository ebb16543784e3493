//! Local display overlay state
//!
//! Holds the most recent frame and the alert message shown on top of it.
//! The HTTP API and the websocket relay read from here; the overlay sink
//! writes the message whenever a notification is dispatched.

use crate::domain::frame::Frame;
use crate::domain::types::{MonitorEvent, PostureLabel};
use crate::services::dispatcher::{Sink, SinkError};
use async_trait::async_trait;
use parking_lot::RwLock;
use std::sync::Arc;

#[derive(Debug)]
pub struct LiveView {
    frame: RwLock<Option<Frame>>,
    message: RwLock<String>,
}

impl LiveView {
    pub fn new() -> Self {
        Self {
            frame: RwLock::new(None),
            message: RwLock::new(PostureLabel::Unknown.message().to_string()),
        }
    }

    pub fn set_frame(&self, frame: Frame) {
        *self.frame.write() = Some(frame);
    }

    pub fn latest_frame(&self) -> Option<Frame> {
        self.frame.read().clone()
    }

    pub fn set_message(&self, message: &str) {
        let mut current = self.message.write();
        if *current != message {
            current.clear();
            current.push_str(message);
        }
    }

    pub fn message(&self) -> String {
        self.message.read().clone()
    }
}

impl Default for LiveView {
    fn default() -> Self {
        Self::new()
    }
}

/// Sink that keeps the overlay message in sync with notifications
pub struct OverlaySink {
    view: Arc<LiveView>,
}

impl OverlaySink {
    pub fn new(view: Arc<LiveView>) -> Self {
        Self { view }
    }
}

#[async_trait]
impl Sink for OverlaySink {
    fn name(&self) -> &'static str {
        "overlay"
    }

    fn accepts(&self, event: &MonitorEvent) -> bool {
        matches!(event, MonitorEvent::Notification(_))
    }

    async fn deliver(&self, event: &MonitorEvent) -> Result<(), SinkError> {
        if let MonitorEvent::Notification(n) = event {
            self.view.set_message(&n.message);
        }
        Ok(())
    }
}
