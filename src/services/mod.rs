//! Services - monitoring logic and state
//!
//! - `classifier` - landmark geometry to posture label
//! - `debouncer` - one notification per unsafe-posture episode
//! - `posture` - per-frame pipeline (classify, debounce, dispatch)
//! - `producer` - sensor driver trait and polling loop
//! - `aggregator` - latest-value sensor aggregation and periodic flush
//! - `dispatcher` - fan-out of events to every configured sink

pub mod aggregator;
pub mod classifier;
pub mod debouncer;
pub mod dispatcher;
pub mod posture;
pub mod producer;

pub use aggregator::SensorAggregator;
pub use classifier::{classify, PostureThresholds};
pub use debouncer::AlertDebouncer;
pub use dispatcher::{DispatchReport, Sink, SinkDispatcher, SinkError};
pub use posture::{FrameOutcome, PostureMonitor};
pub use producer::{run_producer, Readings, SensorDriver, SensorError};
