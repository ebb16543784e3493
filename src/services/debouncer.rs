//! Edge-triggered posture alerts
//!
//! Turns the per-frame label stream into one notification per transition.
//! Compare, transition and emit happen under a single lock so concurrent
//! frame sources (camera stream and HTTP ingress) cannot double-fire.

use crate::domain::types::{NotificationEvent, PostureLabel};
use parking_lot::Mutex;
use tracing::{debug, info};

/// Holds the label of the current episode; a notification fires only when it changes
#[derive(Debug)]
pub struct AlertDebouncer {
    active: Mutex<PostureLabel>,
}

impl AlertDebouncer {
    pub fn new() -> Self {
        Self { active: Mutex::new(PostureLabel::Unknown) }
    }

    /// Feed one classified label; returns an event only on a transition
    pub fn observe(&self, label: PostureLabel) -> Option<NotificationEvent> {
        let mut active = self.active.lock();

        if *active == label {
            debug!(label = %label, "posture_unchanged");
            return None;
        }

        let previous = std::mem::replace(&mut *active, label);
        drop(active);

        let event = NotificationEvent::new(label);
        info!(
            from = %previous,
            to = %label,
            event_id = %event.id,
            "posture_transition"
        );
        Some(event)
    }

    pub fn active(&self) -> PostureLabel {
        *self.active.lock()
    }
}

impl Default for AlertDebouncer {
    fn default() -> Self {
        Self::new()
    }
}
