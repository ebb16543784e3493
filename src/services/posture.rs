//! Posture pipeline: frame -> landmarks -> label -> debounced notification
//!
//! Shared by the camera stream and the HTTP ingress. Each frame is
//! classified independently; only label transitions reach the sinks.

use crate::domain::frame::Frame;
use crate::domain::types::{MonitorEvent, NotificationEvent, PostureLabel};
use crate::infra::metrics::Metrics;
use crate::io::landmark_source::LandmarkSource;
use crate::io::overlay::LiveView;
use crate::services::classifier::{classify, PostureThresholds};
use crate::services::debouncer::AlertDebouncer;
use crate::services::dispatcher::{DispatchReport, SinkDispatcher};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Result of running one frame through the pipeline
#[derive(Debug, Clone)]
pub struct FrameOutcome {
    pub label: PostureLabel,
    pub notification: Option<NotificationEvent>,
}

impl FrameOutcome {
    /// Alert text for this frame's label
    pub fn message(&self) -> &'static str {
        self.label.message()
    }
}

pub struct PostureMonitor {
    source: Arc<dyn LandmarkSource>,
    thresholds: PostureThresholds,
    debouncer: AlertDebouncer,
    view: Arc<LiveView>,
    dispatcher: Arc<SinkDispatcher>,
    metrics: Arc<Metrics>,
}

impl PostureMonitor {
    pub fn new(
        source: Arc<dyn LandmarkSource>,
        thresholds: PostureThresholds,
        view: Arc<LiveView>,
        dispatcher: Arc<SinkDispatcher>,
        metrics: Arc<Metrics>,
    ) -> Self {
        Self {
            source,
            thresholds,
            debouncer: AlertDebouncer::new(),
            view,
            dispatcher,
            metrics,
        }
    }

    pub async fn process(&self, frame: Frame) -> FrameOutcome {
        let received_at = frame.received_at;
        self.view.set_frame(frame.clone());

        let landmarks = self.source.extract(&frame).await;
        let label = classify(landmarks.as_ref(), &self.thresholds);
        self.metrics.record_frame(label, received_at.elapsed().as_millis() as u64);
        debug!(
            label = %label,
            width = %frame.width,
            height = %frame.height,
            "frame_classified"
        );

        let notification = self.debouncer.observe(label);
        if let Some(ref event) = notification {
            self.metrics.record_notification();
            let report = self.dispatcher.dispatch(&MonitorEvent::Notification(event.clone())).await;
            if report.all_failed() {
                warn!(event_id = %event.id, label = %label, "notification_undelivered");
            }
        }

        FrameOutcome { label, notification }
    }

    /// Push an operator message through the sinks, tagged with the active label.
    /// Bypasses the debouncer.
    pub async fn notify(&self, message: &str) -> DispatchReport {
        let event = NotificationEvent::manual(self.active_label(), message);
        self.metrics.record_notification();
        let report = self.dispatcher.dispatch(&MonitorEvent::Notification(event.clone())).await;
        info!(
            event_id = %event.id,
            delivered = %report.delivered,
            failed = %report.failed,
            "manual_notification_sent"
        );
        report
    }

    pub fn active_label(&self) -> PostureLabel {
        self.debouncer.active()
    }

    pub fn view(&self) -> &Arc<LiveView> {
        &self.view
    }

    pub fn metrics(&self) -> &Arc<Metrics> {
        &self.metrics
    }
}
