//! Landmark extraction backends
//!
//! The pose model runs out of process. `HttpPoseClient` posts the encoded
//! frame to it and parses `{"landmarks": [{"x", "y", "visibility"}, ...] | null}`.
//! Extraction never fails from the caller's point of view: transport and
//! parse errors are logged and reported as "no subject".

use crate::domain::frame::Frame;
use crate::domain::landmarks::{Landmark, LandmarkSet};
use crate::infra::config::PoseServiceConfig;
use async_trait::async_trait;
use serde::Deserialize;
use std::time::{Duration, Instant};
use tracing::{debug, warn};

#[async_trait]
pub trait LandmarkSource: Send + Sync {
    /// Zero or one landmark set for the frame
    async fn extract(&self, frame: &Frame) -> Option<LandmarkSet>;
}

#[derive(Debug, Deserialize)]
struct PoseResponse {
    #[serde(default)]
    landmarks: Option<Vec<Landmark>>,
}

/// Parse a pose service response body
fn parse_pose_response(body: &[u8]) -> Result<Option<LandmarkSet>, serde_json::Error> {
    let response: PoseResponse = serde_json::from_slice(body)?;
    Ok(response
        .landmarks
        .filter(|points| !points.is_empty())
        .map(LandmarkSet::from_ordered))
}

pub struct HttpPoseClient {
    url: String,
    client: reqwest::Client,
}

impl HttpPoseClient {
    pub fn new(config: &PoseServiceConfig) -> anyhow::Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_millis(config.timeout_ms))
            .http1_only()
            .build()?;
        Ok(Self { url: config.url.clone(), client })
    }

    async fn request(&self, frame: &Frame) -> Result<Option<LandmarkSet>, String> {
        let response = self
            .client
            .post(&self.url)
            .header("Content-Type", frame.format.mime())
            .body(frame.data.clone())
            .send()
            .await
            .map_err(|e| e.to_string())?;

        let status = response.status();
        if !status.is_success() {
            return Err(format!("status {}", status.as_u16()));
        }

        let body = response.bytes().await.map_err(|e| e.to_string())?;
        parse_pose_response(&body).map_err(|e| e.to_string())
    }
}

#[async_trait]
impl LandmarkSource for HttpPoseClient {
    async fn extract(&self, frame: &Frame) -> Option<LandmarkSet> {
        let start = Instant::now();
        match self.request(frame).await {
            Ok(landmarks) => {
                debug!(
                    detected = %landmarks.is_some(),
                    latency_ms = %start.elapsed().as_millis(),
                    "pose_extracted"
                );
                landmarks
            }
            Err(e) => {
                warn!(url = %self.url, error = %e, "pose_service_failed");
                None
            }
        }
    }
}

/// Returns the same landmarks for every frame
#[derive(Debug, Clone, Default)]
pub struct FixedLandmarks {
    landmarks: Option<LandmarkSet>,
}

impl FixedLandmarks {
    pub fn new(landmarks: Option<LandmarkSet>) -> Self {
        Self { landmarks }
    }

    pub fn none() -> Self {
        Self { landmarks: None }
    }
}

#[async_trait]
impl LandmarkSource for FixedLandmarks {
    async fn extract(&self, _frame: &Frame) -> Option<LandmarkSet> {
        self.landmarks.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::landmarks::BodyPoint;

    #[test]
    fn test_parse_full_response() {
        let points: Vec<String> = (0..33)
            .map(|i| format!(r#"{{"x":{},"y":0.5,"visibility":0.9}}"#, i as f32 / 100.0))
            .collect();
        let body = format!(r#"{{"landmarks":[{}]}}"#, points.join(","));

        let set = parse_pose_response(body.as_bytes()).unwrap().unwrap();
        assert_eq!(set.len(), 33);
        let rs = set.get(BodyPoint::RightShoulder).unwrap();
        assert!((rs.x - 0.12).abs() < 1e-6);
        assert_eq!(rs.visibility, 0.9);
    }

    #[test]
    fn test_parse_null_and_empty() {
        assert!(parse_pose_response(br#"{"landmarks":null}"#).unwrap().is_none());
        assert!(parse_pose_response(br#"{"landmarks":[]}"#).unwrap().is_none());
        assert!(parse_pose_response(br#"{}"#).unwrap().is_none());
    }

    #[test]
    fn test_parse_missing_visibility_defaults() {
        let set = parse_pose_response(br#"{"landmarks":[{"x":0.4,"y":0.2}]}"#).unwrap().unwrap();
        assert_eq!(set.get(BodyPoint::Nose).unwrap().visibility, 1.0);
        assert_eq!(set.len(), 1);
    }

    #[test]
    fn test_parse_garbage_is_error() {
        assert!(parse_pose_response(b"<html>").is_err());
    }

    #[tokio::test]
    async fn test_unreachable_service_yields_none() {
        use crate::domain::frame::test_support::encoded_image;

        let config = PoseServiceConfig { url: "http://127.0.0.1:1/landmarks".to_string(), timeout_ms: 500 };
        let client = HttpPoseClient::new(&config).unwrap();
        let frame = Frame::decode_checked(encoded_image(image::ImageFormat::Png)).unwrap();
        assert!(client.extract(&frame).await.is_none());
    }
}
