//! HTTP API
//!
//! Routes:
//! - `POST /process-frame/` - classify one image (raw JPEG/PNG body or a
//!   multipart upload); replies `{"alert": "<message>"}`
//! - `POST /send_notification` - push `{"message": "..."}` to every sink
//! - `GET /health`
//! - `GET /metrics` - Prometheus text format
//!
//! Uses hyper directly, one task per connection.

use crate::domain::frame::{Frame, FrameError};
use crate::infra::metrics::Metrics;
use crate::io::prometheus::format_prometheus_metrics;
use crate::services::posture::PostureMonitor;
use bytes::Bytes;
use http_body_util::{BodyExt, Full, LengthLimitError, Limited};
use hyper::header::CONTENT_TYPE;
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper::{Method, Request, Response, StatusCode};
use hyper_util::rt::TokioIo;
use serde::Deserialize;
use std::convert::Infallible;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

/// Shared state for request handlers
pub struct ApiState {
    pub monitor: Arc<PostureMonitor>,
    pub metrics: Arc<Metrics>,
    pub site_id: String,
    pub max_body_bytes: usize,
}

fn json_response(status: StatusCode, body: String) -> Response<Full<Bytes>> {
    Response::builder()
        .status(status)
        .header(CONTENT_TYPE, "application/json")
        .header("Access-Control-Allow-Origin", "*")
        .body(Full::new(Bytes::from(body)))
        .expect("static response should not fail")
}

fn error_response(status: StatusCode, code: &str) -> Response<Full<Bytes>> {
    json_response(status, serde_json::json!({ "error": code }).to_string())
}

/// Largest accepted `/send_notification` body
const MAX_NOTIFICATION_BYTES: usize = 16 * 1024;

#[derive(Debug, Deserialize)]
struct NotificationRequest {
    message: Option<String>,
}

fn is_multipart(content_type: &str) -> bool {
    content_type
        .split(';')
        .next()
        .is_some_and(|mime| mime.trim().eq_ignore_ascii_case("multipart/form-data"))
}

/// Pull the uploaded file out of a `multipart/form-data` body.
///
/// Takes the first field that declares a filename or an image content type,
/// falling back to the first field.
async fn extract_multipart_file(content_type: &str, body: Bytes) -> Option<Bytes> {
    let boundary = match multer::parse_boundary(content_type) {
        Ok(boundary) => boundary,
        Err(e) => {
            debug!(error = %e, "multipart_rejected");
            return None;
        }
    };
    let stream = futures_util::stream::once(async move { Ok::<_, Infallible>(body) });
    let mut multipart = multer::Multipart::new(stream, boundary);

    let mut first = None;
    loop {
        let field = match multipart.next_field().await {
            Ok(Some(field)) => field,
            Ok(None) => break,
            Err(e) => {
                debug!(error = %e, "multipart_field_invalid");
                break;
            }
        };
        let is_file = field.file_name().is_some()
            || field.content_type().is_some_and(|ct| ct.type_() == "image");
        match field.bytes().await {
            Ok(data) if is_file => return Some(data),
            Ok(data) => {
                first.get_or_insert(data);
            }
            Err(e) => {
                debug!(error = %e, "multipart_field_read_failed");
                break;
            }
        }
    }
    first
}

/// Collect a request body up to `limit` bytes
async fn read_body(
    req: Request<hyper::body::Incoming>,
    limit: usize,
) -> Result<Bytes, Response<Full<Bytes>>> {
    match Limited::new(req.into_body(), limit).collect().await {
        Ok(collected) => Ok(collected.to_bytes()),
        Err(e) if e.is::<LengthLimitError>() => {
            warn!(limit = %limit, "request_body_too_large");
            Err(error_response(StatusCode::PAYLOAD_TOO_LARGE, "payload_too_large"))
        }
        Err(e) => {
            warn!(error = %e, "request_body_read_failed");
            Err(error_response(StatusCode::BAD_REQUEST, "invalid_body"))
        }
    }
}

async fn process_frame(
    req: Request<hyper::body::Incoming>,
    state: &ApiState,
) -> Response<Full<Bytes>> {
    let content_type = req
        .headers()
        .get(CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default()
        .to_string();

    let body = match read_body(req, state.max_body_bytes).await {
        Ok(body) => body,
        Err(response) => return response,
    };

    let image = if is_multipart(&content_type) {
        extract_multipart_file(&content_type, body).await.unwrap_or_default()
    } else {
        body
    };

    let frame = match Frame::decode_checked(image) {
        Ok(frame) => frame,
        Err(e) => {
            state.metrics.record_frame_rejected();
            match e {
                FrameError::Empty => debug!("process_frame_empty"),
                _ => warn!(error = %e, "process_frame_invalid_image"),
            }
            return error_response(StatusCode::BAD_REQUEST, "invalid_image");
        }
    };

    let outcome = state.monitor.process(frame).await;
    json_response(StatusCode::OK, serde_json::json!({ "alert": outcome.message() }).to_string())
}

/// Manual notification trigger: `{"message": "..."}`
async fn send_notification(
    req: Request<hyper::body::Incoming>,
    state: &ApiState,
) -> Response<Full<Bytes>> {
    let body = match read_body(req, MAX_NOTIFICATION_BYTES).await {
        Ok(body) => body,
        Err(response) => return response,
    };

    let message = serde_json::from_slice::<NotificationRequest>(&body)
        .ok()
        .and_then(|r| r.message)
        .filter(|m| !m.trim().is_empty());
    let Some(message) = message else {
        return json_response(
            StatusCode::BAD_REQUEST,
            serde_json::json!({ "status": "error", "message": "Missing 'message' in request." })
                .to_string(),
        );
    };

    let report = state.monitor.notify(&message).await;
    json_response(
        StatusCode::OK,
        serde_json::json!({
            "status": "success",
            "message": "Notification sent.",
            "delivered": report.delivered,
        })
        .to_string(),
    )
}

/// Handle HTTP requests
async fn handle_request(
    req: Request<hyper::body::Incoming>,
    state: Arc<ApiState>,
) -> Result<Response<Full<Bytes>>, Infallible> {
    let path = req.uri().path().trim_end_matches('/').to_string();
    match (req.method(), path.as_str()) {
        (&Method::POST, "/process-frame") => Ok(process_frame(req, &state).await),
        (&Method::POST, "/send_notification") => Ok(send_notification(req, &state).await),
        (&Method::GET, "/metrics") => {
            let body = format_prometheus_metrics(&state.metrics, &state.site_id);
            Ok(Response::builder()
                .status(StatusCode::OK)
                .header(CONTENT_TYPE, "text/plain; version=0.0.4; charset=utf-8")
                .body(Full::new(Bytes::from(body)))
                .expect("static response should not fail"))
        }
        (&Method::GET, "/health") => Ok(Response::builder()
            .status(StatusCode::OK)
            .body(Full::new(Bytes::from("ok")))
            .expect("static response should not fail")),
        // CORS preflight for browser uploads
        (&Method::OPTIONS, "/process-frame" | "/send_notification") => Ok(Response::builder()
            .status(StatusCode::OK)
            .header("Access-Control-Allow-Origin", "*")
            .header("Access-Control-Allow-Methods", "POST, OPTIONS")
            .header("Access-Control-Allow-Headers", "Content-Type")
            .body(Full::new(Bytes::from("")))
            .expect("static response should not fail")),
        _ => Ok(Response::builder()
            .status(StatusCode::NOT_FOUND)
            .body(Full::new(Bytes::from("Not Found")))
            .expect("static response should not fail")),
    }
}

/// Accept loop on an already bound listener
pub async fn serve_api(
    listener: TcpListener,
    state: Arc<ApiState>,
    mut shutdown: watch::Receiver<bool>,
) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    info!(addr = %listener.local_addr()?, site = %state.site_id, "api_server_started");

    loop {
        tokio::select! {
            result = listener.accept() => {
                match result {
                    Ok((stream, _addr)) => {
                        let io = TokioIo::new(stream);
                        let state = state.clone();

                        tokio::spawn(async move {
                            let service = service_fn(move |req| {
                                let state = state.clone();
                                async move { handle_request(req, state).await }
                            });

                            if let Err(e) = http1::Builder::new()
                                .serve_connection(io, service)
                                .await
                            {
                                error!(error = %e, "api_http_error");
                            }
                        });
                    }
                    Err(e) => {
                        error!(error = %e, "api_accept_error");
                    }
                }
            }
            _ = shutdown.changed() => {
                if *shutdown.borrow() {
                    info!("api_server_shutdown");
                    return Ok(());
                }
            }
        }
    }
}
