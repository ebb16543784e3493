//! Network camera client
//!
//! Pulls the MJPEG `video_feed` served by the camera node, cuts it into
//! frames and runs every decodable frame through the posture pipeline.
//! The connection is re-established after `reconnect_delay_ms` whenever the
//! stream errors or ends.

use crate::domain::frame::Frame;
use crate::infra::config::CameraConfig;
use crate::io::mjpeg::MjpegDecoder;
use crate::services::posture::PostureMonitor;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{debug, info, warn};

pub struct CameraStream {
    url: String,
    reconnect_delay: Duration,
    client: reqwest::Client,
    decoder: MjpegDecoder,
    monitor: Arc<PostureMonitor>,
}

impl CameraStream {
    pub fn new(
        url: &str,
        config: &CameraConfig,
        monitor: Arc<PostureMonitor>,
    ) -> anyhow::Result<Self> {
        let client = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(5))
            .http1_only()
            .build()?;
        Ok(Self {
            url: url.to_string(),
            reconnect_delay: Duration::from_millis(config.reconnect_delay_ms),
            client,
            decoder: MjpegDecoder::new(config.max_frame_bytes),
            monitor,
        })
    }

    /// Read the stream until it ends or errors
    async fn stream_once(&mut self) -> Result<u64, reqwest::Error> {
        let mut response = self.client.get(&self.url).send().await?.error_for_status()?;
        info!(url = %self.url, "camera_stream_connected");

        let mut frames = 0u64;
        while let Some(chunk) = response.chunk().await? {
            for data in self.decoder.push(&chunk) {
                match Frame::decode_checked(data) {
                    Ok(frame) => {
                        frames += 1;
                        self.monitor.process(frame).await;
                    }
                    Err(e) => {
                        self.monitor.metrics().record_frame_rejected();
                        debug!(error = %e, "camera_frame_rejected");
                    }
                }
            }
        }
        Ok(frames)
    }

    /// Stream with reconnects until shutdown
    pub async fn run(mut self, mut shutdown: watch::Receiver<bool>) {
        info!(
            url = %self.url,
            reconnect_delay_ms = %self.reconnect_delay.as_millis(),
            "camera_stream_started"
        );

        loop {
            tokio::select! {
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        info!("camera_stream_shutdown");
                        return;
                    }
                }
                result = self.stream_once() => {
                    match result {
                        Ok(frames) => info!(frames = %frames, "camera_stream_ended"),
                        Err(e) => warn!(url = %self.url, error = %e, "camera_stream_failed"),
                    }
                }
            }

            // A partial frame from the old connection must not join the next one
            self.decoder.reset();

            tokio::select! {
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        info!("camera_stream_shutdown");
                        return;
                    }
                }
                _ = tokio::time::sleep(self.reconnect_delay) => {}
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::frame::test_support::encoded_image;
    use crate::infra::metrics::Metrics;
    use crate::io::landmark_source::FixedLandmarks;
    use crate::io::overlay::LiveView;
    use crate::services::classifier::PostureThresholds;
    use crate::services::dispatcher::SinkDispatcher;
    use image::ImageFormat;
    use tokio::io::AsyncWriteExt;
    use tokio::net::TcpListener;

    /// Serve one multipart stream with `count` frames per connection, then close
    async fn mjpeg_server(count: usize) -> String {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let jpeg = encoded_image(ImageFormat::Jpeg);

        tokio::spawn(async move {
            while let Ok((mut socket, _)) = listener.accept().await {
                let jpeg = jpeg.clone();
                tokio::spawn(async move {
                    let mut buf = [0u8; 1024];
                    let _ = tokio::io::AsyncReadExt::read(&mut socket, &mut buf).await;
                    let mut out = b"HTTP/1.1 200 OK\r\n\
Content-Type: multipart/x-mixed-replace; boundary=frame\r\n\
Connection: close\r\n\r\n"
                        .to_vec();
                    for _ in 0..count {
                        out.extend_from_slice(b"--frame\r\nContent-Type: image/jpeg\r\n\r\n");
                        out.extend_from_slice(&jpeg);
                        out.extend_from_slice(b"\r\n");
                    }
                    let _ = socket.write_all(&out).await;
                    let _ = socket.shutdown().await;
                });
            }
        });

        format!("http://{addr}/video_feed")
    }

    #[tokio::test]
    async fn test_stream_frames_reach_pipeline() {
        let url = mjpeg_server(3).await;
        let metrics = Arc::new(Metrics::new());
        let monitor = Arc::new(PostureMonitor::new(
            Arc::new(FixedLandmarks::none()),
            PostureThresholds::default(),
            Arc::new(LiveView::new()),
            Arc::new(SinkDispatcher::new(metrics.clone())),
            metrics.clone(),
        ));

        let config = CameraConfig { reconnect_delay_ms: 50, ..CameraConfig::default() };
        let camera = CameraStream::new(&url, &config, monitor.clone()).unwrap();
        let (tx, rx) = watch::channel(false);
        let handle = tokio::spawn(camera.run(rx));

        for _ in 0..100 {
            if metrics.frames_total() >= 3 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }

        tx.send(true).unwrap();
        handle.await.unwrap();
        assert!(metrics.frames_total() >= 3);
        assert!(monitor.view().latest_frame().is_some());
    }

    #[tokio::test]
    async fn test_unreachable_camera_keeps_retrying_until_shutdown() {
        let metrics = Arc::new(Metrics::new());
        let monitor = Arc::new(PostureMonitor::new(
            Arc::new(FixedLandmarks::none()),
            PostureThresholds::default(),
            Arc::new(LiveView::new()),
            Arc::new(SinkDispatcher::new(metrics.clone())),
            metrics,
        ));
        let config = CameraConfig { reconnect_delay_ms: 10, ..CameraConfig::default() };
        let camera = CameraStream::new("http://127.0.0.1:1/video_feed", &config, monitor).unwrap();

        let (tx, rx) = watch::channel(false);
        let handle = tokio::spawn(camera.run(rx));
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert!(!handle.is_finished());

        tx.send(true).unwrap();
        handle.await.unwrap();
    }
}
