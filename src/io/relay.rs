//! Websocket relay for live viewers
//!
//! Protocol (server -> client, JSON text frames):
//! - every `interval_ms`, once a frame exists: `{"image": <base64 JPEG>, "result": <alert message>}`
//! - pushed by the websocket sink: `{"type": "notification" | "record", ...}`
//!
//! Client messages are ignored apart from close.

use crate::domain::types::MonitorEvent;
use crate::infra::metrics::Metrics;
use crate::io::overlay::LiveView;
use crate::services::dispatcher::{Sink, SinkError};
use async_trait::async_trait;
use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::State;
use axum::response::IntoResponse;
use axum::routing::get;
use axum::Router;
use base64::{engine::general_purpose::STANDARD, Engine};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::sync::{broadcast, watch};
use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, info, warn};

/// Pushed messages buffered per client before it counts as lagging
const PUSH_BUFFER: usize = 64;

pub struct RelayHub {
    tx: broadcast::Sender<String>,
    view: Arc<LiveView>,
    metrics: Arc<Metrics>,
    interval: Duration,
    shutdown: watch::Receiver<bool>,
}

impl RelayHub {
    pub fn new(
        view: Arc<LiveView>,
        metrics: Arc<Metrics>,
        interval: Duration,
        shutdown: watch::Receiver<bool>,
    ) -> Self {
        let (tx, _) = broadcast::channel(PUSH_BUFFER);
        Self { tx, view, metrics, interval, shutdown }
    }

    /// Sink pushing dispatched events to every connected client
    pub fn sink(&self) -> WebsocketSink {
        WebsocketSink { tx: self.tx.clone() }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<String> {
        self.tx.subscribe()
    }

    /// Periodic `{"image", "result"}` payload, or None before the first frame
    pub fn snapshot_payload(&self) -> Option<String> {
        let frame = self.view.latest_frame()?;
        let jpeg = match frame.to_jpeg() {
            Ok(jpeg) => jpeg,
            Err(e) => {
                warn!(error = %e, "relay_frame_encode_failed");
                return None;
            }
        };
        let payload = serde_json::json!({
            "image": STANDARD.encode(&jpeg),
            "result": self.view.message(),
        });
        Some(payload.to_string())
    }
}

pub struct WebsocketSink {
    tx: broadcast::Sender<String>,
}

#[async_trait]
impl Sink for WebsocketSink {
    fn name(&self) -> &'static str {
        "websocket"
    }

    async fn deliver(&self, event: &MonitorEvent) -> Result<(), SinkError> {
        let json = event.to_json()?;
        // No connected clients is not a delivery failure
        match self.tx.send(json) {
            Ok(clients) => debug!(clients = %clients, event = %event.kind_str(), "relay_pushed"),
            Err(_) => debug!(event = %event.kind_str(), "relay_no_clients"),
        }
        Ok(())
    }
}

async fn ws_handler(ws: WebSocketUpgrade, State(hub): State<Arc<RelayHub>>) -> impl IntoResponse {
    ws.on_upgrade(|socket| handle_client(socket, hub))
}

async fn handle_client(mut socket: WebSocket, hub: Arc<RelayHub>) {
    let mut rx = hub.subscribe();
    let mut shutdown = hub.shutdown.clone();
    let mut ticker = interval(hub.interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

    hub.metrics.relay_client_connected();
    info!("relay_client_connected");

    loop {
        tokio::select! {
            changed = shutdown.changed() => {
                if changed.is_err() || *shutdown.borrow() {
                    let _ = socket.send(Message::Close(None)).await;
                    break;
                }
            }
            _ = ticker.tick() => {
                if let Some(payload) = hub.snapshot_payload() {
                    if socket.send(Message::Text(payload.into())).await.is_err() {
                        break;
                    }
                }
            }
            msg = rx.recv() => {
                match msg {
                    Ok(json) => {
                        if socket.send(Message::Text(json.into())).await.is_err() {
                            break;
                        }
                    }
                    Err(broadcast::error::RecvError::Lagged(n)) => {
                        warn!(dropped = %n, "relay_client_lagged");
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
            msg = socket.recv() => {
                match msg {
                    Some(Ok(Message::Close(_))) | Some(Err(_)) | None => break,
                    _ => {} // ignore client messages
                }
            }
        }
    }

    hub.metrics.relay_client_disconnected();
    info!("relay_client_disconnected");
}

/// Serve the relay on an already bound listener
pub async fn serve_relay<F>(
    listener: TcpListener,
    hub: Arc<RelayHub>,
    shutdown: F,
) -> Result<(), Box<dyn std::error::Error + Send + Sync>>
where
    F: std::future::Future<Output = ()> + Send + 'static,
{
    let app = Router::new()
        .route("/", get(ws_handler))
        .route("/ws", get(ws_handler))
        .route("/health", get(|| async { "ok" }))
        .with_state(hub);

    info!(addr = %listener.local_addr()?, "relay_server_started");
    axum::serve(listener, app).with_graceful_shutdown(shutdown).await?;
    info!("relay_server_shutdown");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::frame::test_support::encoded_image;
    use crate::domain::frame::Frame;
    use crate::domain::types::{NotificationEvent, PostureLabel};
    use futures_util::StreamExt;
    use image::ImageFormat;
    use tokio_tungstenite::tungstenite::{Error as WsError, Message as WsMessage};

    /// The returned sender keeps client handlers running until it sends `true`
    fn hub(interval: Duration) -> (RelayHub, Arc<LiveView>, watch::Sender<bool>) {
        let view = Arc::new(LiveView::new());
        let (tx, rx) = watch::channel(false);
        let hub = RelayHub::new(view.clone(), Arc::new(Metrics::new()), interval, rx);
        (hub, view, tx)
    }

    async fn next_text<S>(ws: &mut S) -> String
    where
        S: futures_util::stream::Stream<Item = Result<WsMessage, WsError>> + Unpin,
    {
        loop {
            match tokio::time::timeout(Duration::from_secs(5), ws.next()).await.unwrap() {
                Some(Ok(WsMessage::Text(text))) => return text.to_string(),
                Some(Ok(_)) => continue,
                other => panic!("unexpected websocket message {other:?}"),
            }
        }
    }

    #[test]
    fn test_no_payload_before_first_frame() {
        let (hub, _view, _stop) = hub(Duration::from_secs(1));
        assert!(hub.snapshot_payload().is_none());
    }

    #[test]
    fn test_snapshot_payload() {
        let (hub, view, _stop) = hub(Duration::from_secs(1));
        let frame = Frame::decode_checked(encoded_image(ImageFormat::Jpeg)).unwrap();
        view.set_frame(frame.clone());
        view.set_message("Alert: Baby is sleeping on side!");

        let payload: serde_json::Value =
            serde_json::from_str(&hub.snapshot_payload().unwrap()).unwrap();
        assert_eq!(payload["result"], "Alert: Baby is sleeping on side!");
        let image = STANDARD.decode(payload["image"].as_str().unwrap()).unwrap();
        assert_eq!(image, frame.data.to_vec());
    }

    #[tokio::test]
    async fn test_sink_pushes_to_subscribers() {
        let (hub, _view, _stop) = hub(Duration::from_secs(1));
        let mut rx = hub.subscribe();
        let sink = hub.sink();

        let event = MonitorEvent::Notification(NotificationEvent::new(PostureLabel::Tummy));
        sink.deliver(&event).await.unwrap();

        let pushed: serde_json::Value = serde_json::from_str(&rx.recv().await.unwrap()).unwrap();
        assert_eq!(pushed["type"], "notification");
        assert_eq!(pushed["label"], "tummy");
    }

    #[tokio::test]
    async fn test_sink_without_clients_is_ok() {
        let (hub, _view, _stop) = hub(Duration::from_secs(1));
        let event = MonitorEvent::Notification(NotificationEvent::new(PostureLabel::Safe));
        assert!(hub.sink().deliver(&event).await.is_ok());
    }

    #[tokio::test]
    async fn test_server_health_and_shutdown() {
        let (hub, _view, _stop) = hub(Duration::from_secs(1));
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let (stop_tx, stop_rx) = tokio::sync::oneshot::channel::<()>();

        let server = tokio::spawn(serve_relay(listener, Arc::new(hub), async move {
            let _ = stop_rx.await;
        }));

        let body = reqwest::get(format!("http://{addr}/health")).await.unwrap().text().await.unwrap();
        assert_eq!(body, "ok");

        stop_tx.send(()).unwrap();
        server.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn test_websocket_client_receives_snapshot_and_push() {
        let (hub, view, stop) = hub(Duration::from_millis(50));
        let sink = hub.sink();
        view.set_frame(Frame::decode_checked(encoded_image(ImageFormat::Jpeg)).unwrap());
        view.set_message("Normal: Baby is in a safe position.");

        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let mut server_stop = stop.subscribe();
        let server = tokio::spawn(serve_relay(listener, Arc::new(hub), async move {
            while server_stop.changed().await.is_ok() {
                if *server_stop.borrow() {
                    break;
                }
            }
        }));

        let (mut ws, _) = tokio_tungstenite::connect_async(format!("ws://{addr}/ws")).await.unwrap();

        let snapshot: serde_json::Value = serde_json::from_str(&next_text(&mut ws).await).unwrap();
        assert_eq!(snapshot["result"], "Normal: Baby is in a safe position.");
        let image = STANDARD.decode(snapshot["image"].as_str().unwrap()).unwrap();
        assert_eq!(&image[..2], &[0xFF, 0xD8]);

        // The handler subscribed before its first snapshot, so this push reaches it
        let event = MonitorEvent::Notification(NotificationEvent::new(PostureLabel::Side));
        sink.deliver(&event).await.unwrap();

        let pushed = loop {
            let message: serde_json::Value =
                serde_json::from_str(&next_text(&mut ws).await).unwrap();
            if message.get("type").is_some() {
                break message;
            }
        };
        assert_eq!(pushed["type"], "notification");
        assert_eq!(pushed["label"], "side");

        stop.send(true).unwrap();
        drop(ws);
        server.await.unwrap().unwrap();
    }
}
