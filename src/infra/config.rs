//! Configuration loading from TOML files
//!
//! The file path comes from `--config` / `CONFIG_FILE` (see `main.rs`),
//! default `config/dev.toml`.
//!
//! Every table is optional; missing keys fall back to the defaults below,
//! which match the nursery Pi deployment (5s flush, 1s/5s sensor polls).

use crate::domain::types::SensorKind;
use anyhow::Context;
use serde::Deserialize;
use std::fs;
use std::path::Path;
use tracing::warn;

#[derive(Debug, Clone, Deserialize)]
pub struct SiteConfig {
    /// Unique monitor identifier (e.g., "nursery")
    #[serde(default = "default_site_id")]
    pub id: String,
}

impl Default for SiteConfig {
    fn default() -> Self {
        Self { id: default_site_id() }
    }
}

fn default_site_id() -> String {
    "babysphere".to_string()
}

/// Posture classifier thresholds (normalized image units)
#[derive(Debug, Clone, Deserialize)]
pub struct ClassifierConfig {
    #[serde(default = "default_shoulder_threshold")]
    pub shoulder_threshold: f32,
    #[serde(default = "default_eye_threshold")]
    pub eye_threshold: f32,
    #[serde(default = "default_face_threshold")]
    pub face_threshold: f32,
    /// Landmarks below this visibility are treated as missing
    #[serde(default = "default_min_visibility")]
    pub min_visibility: f32,
    /// Split compressed shoulders into tummy (face down) and side
    #[serde(default = "default_true")]
    pub face_down_refinement: bool,
}

impl Default for ClassifierConfig {
    fn default() -> Self {
        Self {
            shoulder_threshold: default_shoulder_threshold(),
            eye_threshold: default_eye_threshold(),
            face_threshold: default_face_threshold(),
            min_visibility: default_min_visibility(),
            face_down_refinement: true,
        }
    }
}

fn default_shoulder_threshold() -> f32 {
    0.3
}

fn default_eye_threshold() -> f32 {
    0.07
}

fn default_face_threshold() -> f32 {
    0.05
}

fn default_min_visibility() -> f32 {
    0.5
}

fn default_true() -> bool {
    true
}

#[derive(Debug, Clone, Deserialize)]
pub struct AggregatorConfig {
    #[serde(default = "default_flush_interval_ms")]
    pub flush_interval_ms: u64,
    /// Kinds that must all be present before a record is emitted
    #[serde(default = "default_required_kinds")]
    pub required_kinds: Vec<SensorKind>,
    /// Consecutive incomplete flushes before a stall warning (0 disables)
    #[serde(default = "default_stall_warn_ticks")]
    pub stall_warn_ticks: u32,
}

impl Default for AggregatorConfig {
    fn default() -> Self {
        Self {
            flush_interval_ms: default_flush_interval_ms(),
            required_kinds: default_required_kinds(),
            stall_warn_ticks: default_stall_warn_ticks(),
        }
    }
}

fn default_flush_interval_ms() -> u64 {
    5000
}

fn default_required_kinds() -> Vec<SensorKind> {
    SensorKind::ALL.to_vec()
}

fn default_stall_warn_ticks() -> u32 {
    12
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SensorDriverKind {
    /// Simulated DHT22 (temperature + humidity)
    Dht22Sim,
    /// Simulated MLX90614 (baby + ambient temperature)
    Mlx90614Sim,
    /// Simulated MAX30102 (heart rate + SpO2)
    Max30102Sim,
    /// Serial line bridge emitting `kind=value` pairs
    Serial,
}

impl SensorDriverKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            SensorDriverKind::Dht22Sim => "dht22_sim",
            SensorDriverKind::Mlx90614Sim => "mlx90614_sim",
            SensorDriverKind::Max30102Sim => "max30102_sim",
            SensorDriverKind::Serial => "serial",
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct SensorConfig {
    pub driver: SensorDriverKind,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default = "default_sensor_poll_interval_ms")]
    pub poll_interval_ms: u64,
    /// Serial device path (serial driver only)
    #[serde(default)]
    pub device: Option<String>,
    #[serde(default = "default_serial_baud")]
    pub baud: u32,
}

impl SensorConfig {
    pub fn new(driver: SensorDriverKind, poll_interval_ms: u64) -> Self {
        Self { driver, name: None, poll_interval_ms, device: None, baud: default_serial_baud() }
    }

    /// Display name used in logs
    pub fn label(&self) -> String {
        self.name.clone().unwrap_or_else(|| self.driver.as_str().to_string())
    }
}

fn default_sensor_poll_interval_ms() -> u64 {
    5000
}

fn default_serial_baud() -> u32 {
    115200
}

fn default_sensors() -> Vec<SensorConfig> {
    vec![
        SensorConfig::new(SensorDriverKind::Dht22Sim, 5000),
        SensorConfig::new(SensorDriverKind::Mlx90614Sim, 5000),
        SensorConfig::new(SensorDriverKind::Max30102Sim, 1000),
    ]
}

#[derive(Debug, Clone, Deserialize)]
pub struct CameraConfig {
    /// MJPEG stream URL (e.g. "http://192.168.99.120:5000/video_feed"); unset disables
    #[serde(default)]
    pub stream_url: Option<String>,
    #[serde(default = "default_reconnect_delay_ms")]
    pub reconnect_delay_ms: u64,
    /// Frames larger than this are discarded by the stream decoder
    #[serde(default = "default_max_frame_bytes")]
    pub max_frame_bytes: usize,
}

impl Default for CameraConfig {
    fn default() -> Self {
        Self {
            stream_url: None,
            reconnect_delay_ms: default_reconnect_delay_ms(),
            max_frame_bytes: default_max_frame_bytes(),
        }
    }
}

fn default_reconnect_delay_ms() -> u64 {
    2000
}

fn default_max_frame_bytes() -> usize {
    4 * 1024 * 1024
}

#[derive(Debug, Clone, Deserialize)]
pub struct PoseServiceConfig {
    /// Landmark extractor endpoint
    #[serde(default = "default_pose_service_url")]
    pub url: String,
    #[serde(default = "default_pose_timeout_ms")]
    pub timeout_ms: u64,
}

impl Default for PoseServiceConfig {
    fn default() -> Self {
        Self { url: default_pose_service_url(), timeout_ms: default_pose_timeout_ms() }
    }
}

fn default_pose_service_url() -> String {
    "http://127.0.0.1:9000/landmarks".to_string()
}

fn default_pose_timeout_ms() -> u64 {
    3000
}

#[derive(Debug, Clone, Deserialize)]
pub struct ApiConfig {
    /// HTTP API port (0 to disable)
    #[serde(default = "default_api_port")]
    pub port: u16,
    #[serde(default = "default_max_body_bytes")]
    pub max_body_bytes: usize,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self { port: default_api_port(), max_body_bytes: default_max_body_bytes() }
    }
}

fn default_api_port() -> u16 {
    8000
}

fn default_max_body_bytes() -> usize {
    8 * 1024 * 1024
}

#[derive(Debug, Clone, Deserialize)]
pub struct RelayConfig {
    /// Websocket relay port (0 to disable)
    #[serde(default = "default_relay_port")]
    pub port: u16,
    #[serde(default = "default_relay_interval_ms")]
    pub interval_ms: u64,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self { port: default_relay_port(), interval_ms: default_relay_interval_ms() }
    }
}

fn default_relay_port() -> u16 {
    8765
}

fn default_relay_interval_ms() -> u64 {
    1000
}

#[derive(Debug, Clone, Deserialize)]
pub struct FileSinkConfig {
    #[serde(default)]
    pub enabled: bool,
    /// JSONL output path
    #[serde(default = "default_file_sink_path")]
    pub path: String,
}

impl Default for FileSinkConfig {
    fn default() -> Self {
        Self { enabled: false, path: default_file_sink_path() }
    }
}

fn default_file_sink_path() -> String {
    "monitor.jsonl".to_string()
}

#[derive(Debug, Clone, Deserialize)]
pub struct CloudSinkConfig {
    #[serde(default)]
    pub enabled: bool,
    /// Realtime database root, e.g. "https://<project>.firebasedatabase.app"
    #[serde(default)]
    pub database_url: String,
    /// Database secret or ID token, passed as `auth` query parameter
    #[serde(default)]
    pub auth_token: Option<String>,
    #[serde(default = "default_records_path")]
    pub records_path: String,
    #[serde(default = "default_posture_path")]
    pub posture_path: String,
    #[serde(default = "default_sink_timeout_ms")]
    pub timeout_ms: u64,
}

impl Default for CloudSinkConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            database_url: String::new(),
            auth_token: None,
            records_path: default_records_path(),
            posture_path: default_posture_path(),
            timeout_ms: default_sink_timeout_ms(),
        }
    }
}

fn default_records_path() -> String {
    "sensor_data".to_string()
}

fn default_posture_path() -> String {
    "baby_monitoring".to_string()
}

fn default_sink_timeout_ms() -> u64 {
    5000
}

#[derive(Debug, Clone, Deserialize)]
pub struct MqttSinkConfig {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default = "default_mqtt_host")]
    pub host: String,
    #[serde(default = "default_mqtt_port")]
    pub port: u16,
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default)]
    pub password: Option<String>,
    /// Topic for aggregated sensor records (QoS 1)
    #[serde(default = "default_records_topic")]
    pub records_topic: String,
    /// Topic for posture notifications (QoS 0)
    #[serde(default = "default_events_topic")]
    pub events_topic: String,
}

impl Default for MqttSinkConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            host: default_mqtt_host(),
            port: default_mqtt_port(),
            username: None,
            password: None,
            records_topic: default_records_topic(),
            events_topic: default_events_topic(),
        }
    }
}

fn default_mqtt_host() -> String {
    "localhost".to_string()
}

fn default_mqtt_port() -> u16 {
    1883
}

fn default_records_topic() -> String {
    "babysphere/records".to_string()
}

fn default_events_topic() -> String {
    "babysphere/events".to_string()
}

#[derive(Debug, Clone, Deserialize)]
pub struct HttpAlertConfig {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default)]
    pub url: String,
    #[serde(default = "default_sink_timeout_ms")]
    pub timeout_ms: u64,
}

impl Default for HttpAlertConfig {
    fn default() -> Self {
        Self { enabled: false, url: String::new(), timeout_ms: default_sink_timeout_ms() }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct WebsocketSinkConfig {
    /// Push notifications and records to relay clients
    #[serde(default = "default_true")]
    pub enabled: bool,
}

impl Default for WebsocketSinkConfig {
    fn default() -> Self {
        Self { enabled: true }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct SinksConfig {
    /// Per-sink delivery bound; a slower sink counts as failed
    #[serde(default = "default_deliver_timeout_ms")]
    pub deliver_timeout_ms: u64,
    #[serde(default)]
    pub file: FileSinkConfig,
    #[serde(default)]
    pub cloud: CloudSinkConfig,
    #[serde(default)]
    pub mqtt: MqttSinkConfig,
    #[serde(default)]
    pub http_alert: HttpAlertConfig,
    #[serde(default)]
    pub websocket: WebsocketSinkConfig,
}

impl Default for SinksConfig {
    fn default() -> Self {
        Self {
            deliver_timeout_ms: default_deliver_timeout_ms(),
            file: FileSinkConfig::default(),
            cloud: CloudSinkConfig::default(),
            mqtt: MqttSinkConfig::default(),
            http_alert: HttpAlertConfig::default(),
            websocket: WebsocketSinkConfig::default(),
        }
    }
}

fn default_deliver_timeout_ms() -> u64 {
    10_000
}

#[derive(Debug, Clone, Deserialize)]
pub struct MetricsConfig {
    #[serde(default = "default_metrics_interval_secs")]
    pub interval_secs: u64,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self { interval_secs: default_metrics_interval_secs() }
    }
}

fn default_metrics_interval_secs() -> u64 {
    60
}

#[derive(Debug, Clone, Deserialize)]
pub struct TomlConfig {
    #[serde(default)]
    pub site: SiteConfig,
    #[serde(default)]
    pub classifier: ClassifierConfig,
    #[serde(default)]
    pub aggregator: AggregatorConfig,
    #[serde(default = "default_sensors")]
    pub sensors: Vec<SensorConfig>,
    #[serde(default)]
    pub camera: CameraConfig,
    #[serde(default)]
    pub pose_service: PoseServiceConfig,
    #[serde(default)]
    pub api: ApiConfig,
    #[serde(default)]
    pub relay: RelayConfig,
    #[serde(default)]
    pub sinks: SinksConfig,
    #[serde(default)]
    pub metrics: MetricsConfig,
}

/// Main configuration struct used throughout the application
#[derive(Debug, Clone)]
pub struct Config {
    site_id: String,
    classifier: ClassifierConfig,
    aggregator: AggregatorConfig,
    sensors: Vec<SensorConfig>,
    camera: CameraConfig,
    pose_service: PoseServiceConfig,
    api: ApiConfig,
    relay: RelayConfig,
    sinks: SinksConfig,
    metrics_interval_secs: u64,
    config_file: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            site_id: default_site_id(),
            classifier: ClassifierConfig::default(),
            aggregator: AggregatorConfig::default(),
            sensors: default_sensors(),
            camera: CameraConfig::default(),
            pose_service: PoseServiceConfig::default(),
            api: ApiConfig::default(),
            relay: RelayConfig::default(),
            sinks: SinksConfig::default(),
            metrics_interval_secs: default_metrics_interval_secs(),
            config_file: "default".to_string(),
        }
    }
}

impl Config {
    /// Parse configuration from TOML text
    pub fn from_toml_str(content: &str) -> anyhow::Result<Self> {
        let toml_config: TomlConfig = toml::from_str(content)?;
        let config = Self::from_toml(toml_config, "inline");
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from a TOML file
    pub fn from_file<P: AsRef<Path>>(path: P) -> anyhow::Result<Self> {
        let path = path.as_ref();
        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file {}", path.display()))?;

        let toml_config: TomlConfig = toml::from_str(&content)
            .with_context(|| format!("Failed to parse config file {}", path.display()))?;

        let config = Self::from_toml(toml_config, &path.display().to_string());
        config
            .validate()
            .with_context(|| format!("Invalid config file {}", path.display()))?;
        Ok(config)
    }

    /// Reject values the runtime cannot honour; tokio intervals panic on zero
    fn validate(&self) -> anyhow::Result<()> {
        if self.aggregator.flush_interval_ms == 0 {
            anyhow::bail!("aggregator.flush_interval_ms must be greater than 0");
        }
        if let Some(sensor) = self.sensors.iter().find(|s| s.poll_interval_ms == 0) {
            anyhow::bail!("sensor {} poll_interval_ms must be greater than 0", sensor.label());
        }
        if self.relay.interval_ms == 0 {
            anyhow::bail!("relay.interval_ms must be greater than 0");
        }
        if self.sinks.deliver_timeout_ms == 0 {
            anyhow::bail!("sinks.deliver_timeout_ms must be greater than 0");
        }
        if self.metrics_interval_secs == 0 {
            anyhow::bail!("metrics.interval_secs must be greater than 0");
        }
        Ok(())
    }

    fn from_toml(toml_config: TomlConfig, source: &str) -> Self {
        Self {
            site_id: toml_config.site.id,
            classifier: toml_config.classifier,
            aggregator: toml_config.aggregator,
            sensors: toml_config.sensors,
            camera: toml_config.camera,
            pose_service: toml_config.pose_service,
            api: toml_config.api,
            relay: toml_config.relay,
            sinks: toml_config.sinks,
            metrics_interval_secs: toml_config.metrics.interval_secs,
            config_file: source.to_string(),
        }
    }

    /// Load from an explicit path, falling back to defaults on error
    pub fn load_from_path(path: &str) -> Self {
        match Self::from_file(path) {
            Ok(config) => config,
            Err(e) => {
                warn!(error = %format!("{e:#}"), "config_load_failed_using_defaults");
                Self::default()
            }
        }
    }

    pub fn site_id(&self) -> &str {
        &self.site_id
    }

    pub fn classifier(&self) -> &ClassifierConfig {
        &self.classifier
    }

    pub fn aggregator(&self) -> &AggregatorConfig {
        &self.aggregator
    }

    pub fn flush_interval_ms(&self) -> u64 {
        self.aggregator.flush_interval_ms
    }

    pub fn required_kinds(&self) -> &[SensorKind] {
        &self.aggregator.required_kinds
    }

    pub fn sensors(&self) -> &[SensorConfig] {
        &self.sensors
    }

    pub fn camera(&self) -> &CameraConfig {
        &self.camera
    }

    pub fn pose_service(&self) -> &PoseServiceConfig {
        &self.pose_service
    }

    pub fn api(&self) -> &ApiConfig {
        &self.api
    }

    pub fn relay(&self) -> &RelayConfig {
        &self.relay
    }

    pub fn sinks(&self) -> &SinksConfig {
        &self.sinks
    }

    pub fn metrics_interval_secs(&self) -> u64 {
        self.metrics_interval_secs
    }

    pub fn config_file(&self) -> &str {
        &self.config_file
    }

    /// Builder method to override required sensor kinds
    pub fn with_required_kinds(mut self, kinds: Vec<SensorKind>) -> Self {
        self.aggregator.required_kinds = kinds;
        self
    }

    /// Builder method to override classifier thresholds
    pub fn with_classifier(mut self, classifier: ClassifierConfig) -> Self {
        self.classifier = classifier;
        self
    }
}
