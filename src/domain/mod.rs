//! Domain models - core monitoring types
//!
//! - `landmarks` - pose landmark topology and per-frame landmark sets
//! - `frame` - validated encoded camera frames
//! - `types` - posture labels, notification events, sensor readings and records

pub mod frame;
pub mod landmarks;
pub mod types;

pub use frame::{Frame, FrameError, FrameFormat};
pub use landmarks::{BodyPoint, Landmark, LandmarkSet};
pub use types::{
    AggregatedRecord, MonitorEvent, NotificationEvent, PostureLabel, SensorKind, SensorReading,
};
