//! IO modules - external system interfaces
//!
//! Inputs:
//! - `camera` - MJPEG network camera client
//! - `mjpeg` - frame boundary detection over a multipart byte stream
//! - `landmark_source` - pose estimation service client
//! - `sensors` - simulated and serial sensor drivers
//! - `api` - HTTP API (frame upload, health, Prometheus metrics)
//!
//! Sinks:
//! - `overlay` - live view state shown to relay viewers
//! - `egress` - JSONL file log
//! - `cloud` - Firebase realtime database
//! - `mqtt_egress` - MQTT publisher
//! - `http_alert` - JSON webhook for notifications
//! - `relay` - websocket relay for live viewers

pub mod api;
pub mod camera;
pub mod cloud;
pub mod egress;
pub mod http_alert;
pub mod landmark_source;
pub mod mjpeg;
pub mod mqtt_egress;
pub mod overlay;
pub mod prometheus;
pub mod relay;
pub mod sensors;

pub use api::{serve_api, ApiState};
pub use camera::CameraStream;
pub use cloud::FirebaseSink;
pub use egress::JsonlSink;
pub use http_alert::HttpAlertSink;
pub use landmark_source::{FixedLandmarks, HttpPoseClient, LandmarkSource};
pub use mjpeg::MjpegDecoder;
pub use mqtt_egress::{run_event_loop, MqttSink};
pub use overlay::{LiveView, OverlaySink};
pub use relay::{serve_relay, RelayHub, WebsocketSink};
pub use sensors::{build_driver, SerialSensorBridge, SimulatedSensor};
