//! Shared types for the monitoring pipeline

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use uuid::Uuid;

/// Sleep posture classification outcome
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PostureLabel {
    Safe,
    Tummy,
    Side,
    Unknown,
}

impl PostureLabel {
    pub fn as_str(&self) -> &'static str {
        match self {
            PostureLabel::Safe => "safe",
            PostureLabel::Tummy => "tummy",
            PostureLabel::Side => "side",
            PostureLabel::Unknown => "unknown",
        }
    }

    /// Human-readable alert text for this posture
    pub fn message(&self) -> &'static str {
        match self {
            PostureLabel::Safe => "Baby is in a safe sleeping position.",
            PostureLabel::Tummy => "Alert: Baby is sleeping on tummy!",
            PostureLabel::Side => "Alert: Baby is sleeping on side!",
            PostureLabel::Unknown => "No baby detected in frame.",
        }
    }

    pub fn is_unsafe(&self) -> bool {
        matches!(self, PostureLabel::Tummy | PostureLabel::Side)
    }
}

impl std::fmt::Display for PostureLabel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Emitted once per posture transition
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct NotificationEvent {
    pub id: Uuid,
    pub label: PostureLabel,
    pub message: String,
    pub timestamp: DateTime<Utc>,
}

impl NotificationEvent {
    pub fn new(label: PostureLabel) -> Self {
        Self {
            id: Uuid::now_v7(),
            label,
            message: label.message().to_string(),
            timestamp: Utc::now(),
        }
    }

    /// Operator-triggered notification with free text
    pub fn manual(label: PostureLabel, message: impl Into<String>) -> Self {
        Self { message: message.into(), ..Self::new(label) }
    }
}

/// Physical quantity reported by a sensor producer
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SensorKind {
    Temperature,
    Humidity,
    BabyTemperature,
    AmbientTemperature,
    HeartRate,
    Spo2,
}

impl SensorKind {
    pub const ALL: [SensorKind; 6] = [
        SensorKind::Temperature,
        SensorKind::Humidity,
        SensorKind::BabyTemperature,
        SensorKind::AmbientTemperature,
        SensorKind::HeartRate,
        SensorKind::Spo2,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            SensorKind::Temperature => "temperature",
            SensorKind::Humidity => "humidity",
            SensorKind::BabyTemperature => "baby_temperature",
            SensorKind::AmbientTemperature => "ambient_temperature",
            SensorKind::HeartRate => "heart_rate",
            SensorKind::Spo2 => "spo2",
        }
    }
}

impl std::fmt::Display for SensorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for SensorKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        SensorKind::ALL
            .iter()
            .find(|k| k.as_str() == s)
            .copied()
            .ok_or_else(|| format!("unknown sensor kind: {s}"))
    }
}

/// One value from one sensor producer
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SensorReading {
    pub kind: SensorKind,
    pub value: f64,
    pub timestamp: DateTime<Utc>,
}

impl SensorReading {
    pub fn now(kind: SensorKind, value: f64) -> Self {
        Self { kind, value, timestamp: Utc::now() }
    }
}

/// Complete snapshot across all required sensor kinds
///
/// Serializes flat: `{"temperature": .., "humidity": .., "timestamp": ..}`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AggregatedRecord {
    #[serde(flatten)]
    pub values: BTreeMap<SensorKind, f64>,
    pub timestamp: DateTime<Utc>,
}

impl AggregatedRecord {
    pub fn get(&self, kind: SensorKind) -> Option<f64> {
        self.values.get(&kind).copied()
    }
}

/// Unit of work handed to the sink dispatcher
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum MonitorEvent {
    Notification(NotificationEvent),
    Record(AggregatedRecord),
}

impl MonitorEvent {
    pub fn kind_str(&self) -> &'static str {
        match self {
            MonitorEvent::Notification(_) => "notification",
            MonitorEvent::Record(_) => "record",
        }
    }

    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sensor_kind_from_str() {
        assert_eq!("spo2".parse::<SensorKind>().unwrap(), SensorKind::Spo2);
        assert_eq!("baby_temperature".parse::<SensorKind>().unwrap(), SensorKind::BabyTemperature);
        assert!("pressure".parse::<SensorKind>().is_err());
    }

    #[test]
    fn test_record_serializes_flat() {
        let mut values = BTreeMap::new();
        values.insert(SensorKind::Temperature, 30.0);
        values.insert(SensorKind::HeartRate, 88.0);
        let record = AggregatedRecord { values, timestamp: Utc::now() };

        let json: serde_json::Value = serde_json::to_value(&record).unwrap();
        assert_eq!(json["temperature"], 30.0);
        assert_eq!(json["heart_rate"], 88.0);
        assert!(json["timestamp"].is_string());
    }

    #[test]
    fn test_monitor_event_is_tagged() {
        let event = MonitorEvent::Notification(NotificationEvent::new(PostureLabel::Tummy));
        let json: serde_json::Value = serde_json::from_str(&event.to_json().unwrap()).unwrap();
        assert_eq!(json["type"], "notification");
        assert_eq!(json["label"], "tummy");
        assert_eq!(json["message"], "Alert: Baby is sleeping on tummy!");
    }

    #[test]
    fn test_unsafe_labels() {
        assert!(PostureLabel::Tummy.is_unsafe());
        assert!(PostureLabel::Side.is_unsafe());
        assert!(!PostureLabel::Safe.is_unsafe());
        assert!(!PostureLabel::Unknown.is_unsafe());
    }
}
