use crate::alertmanager::{AlertBatch, MalformedPayload, ValidationError};
use crate::buildinfo;
use crate::chat;
use crate::delivery::{self, ChatSender, DeliveryError};
use crate::metrics::{Telemetry, record_process_info};
use axum::body::to_bytes;
use axum::extract::{ConnectInfo, Request, State};
use axum::http::header::CONTENT_TYPE;
use axum::http::{HeaderMap, Method, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{any, get};
use axum::{Json, Router};
use chrono::{SecondsFormat, Utc};
use metrics_exporter_prometheus::PrometheusHandle;
use serde::Serialize;
use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Instant, SystemTime, UNIX_EPOCH};
use thiserror::Error;
use tokio::net::TcpListener;
use tokio::sync::oneshot;
use tower_http::trace::TraceLayer;
use tracing::{debug, error, info, warn};

/// Upper bound on an Alertmanager webhook body. Alertmanager caps a batch
/// with `max_alerts` long before this, so hitting it means a misbehaving
/// client; the overflow is reported as a body read failure (500), and
/// Alertmanager will keep retrying such a batch until it expires.
const MAX_BODY_BYTES: usize = 8 * 1024 * 1024;

pub struct ServerConfig {
    pub sender: Arc<dyn ChatSender>,
    pub telemetry: Arc<dyn Telemetry>,
    pub prometheus_handle: PrometheusHandle,
}

#[derive(Clone)]
struct AppState {
    sender: Arc<dyn ChatSender>,
    telemetry: Arc<dyn Telemetry>,
    prometheus_handle: PrometheusHandle,
    start_time: Instant,
}

#[derive(Debug, Error)]
enum WebhookError {
    #[error("method {0} not allowed")]
    MethodNotAllowed(Method),
    #[error("missing or unsupported Content-Type {0:?}")]
    UnsupportedContentType(Option<String>),
    #[error("error reading request body: {0}")]
    BodyRead(axum::Error),
    #[error("empty request body")]
    EmptyBody,
    #[error(transparent)]
    Malformed(#[from] MalformedPayload),
    #[error("invalid alert payload: {0}")]
    Invalid(#[from] ValidationError),
    #[error("error sending to Google Chat: {0}")]
    Delivery(#[from] DeliveryError),
}

impl WebhookError {
    fn status_code(&self) -> StatusCode {
        match self {
            WebhookError::MethodNotAllowed(_) => StatusCode::METHOD_NOT_ALLOWED,
            WebhookError::UnsupportedContentType(_)
            | WebhookError::EmptyBody
            | WebhookError::Malformed(_)
            | WebhookError::Invalid(_) => StatusCode::BAD_REQUEST,
            WebhookError::BodyRead(_) | WebhookError::Delivery(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }
}

impl IntoResponse for WebhookError {
    fn into_response(self) -> Response {
        let message = match &self {
            WebhookError::MethodNotAllowed(_) => "Method not allowed".to_string(),
            WebhookError::UnsupportedContentType(_) => {
                "Content-Type must be application/json".to_string()
            }
            WebhookError::BodyRead(_) => "Error reading request body".to_string(),
            WebhookError::EmptyBody => "Empty request body".to_string(),
            WebhookError::Malformed(_) => "Error parsing AlertManager payload".to_string(),
            WebhookError::Invalid(e) => format!("Invalid AlertManager payload: {}", e),
            WebhookError::Delivery(_) => "Error sending to Google Chat".to_string(),
        };
        (self.status_code(), message).into_response()
    }
}

impl From<ServerConfig> for AppState {
    fn from(config: ServerConfig) -> Self {
        AppState {
            sender: config.sender,
            telemetry: config.telemetry,
            prometheus_handle: config.prometheus_handle,
            start_time: Instant::now(),
        }
    }
}

fn router(config: ServerConfig) -> Router {
    let app_state = AppState::from(config);

    Router::new()
        .route("/webhook", any(webhook_handler))
        .route("/health", get(health_handler))
        .route("/metrics", get(metrics_handler))
        .layer(TraceLayer::new_for_http())
        .with_state(app_state)
}

pub async fn start_server(
    listener: TcpListener,
    shutdown_signal: oneshot::Receiver<()>,
    config: ServerConfig,
) -> std::io::Result<()> {
    record_process_info();
    let app = router(config);

    let addr = listener.local_addr()?;
    info!("listening on {}", addr);

    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(async {
        shutdown_signal.await.ok();
    })
    .await
}

static REQUEST_SEQ: AtomicU64 = AtomicU64::new(0);

/// `req-<unix nanos>-<sequence>`; the sequence keeps ids unique when the
/// clock does not advance between requests.
fn next_request_id() -> String {
    let nanos = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_nanos();
    let seq = REQUEST_SEQ.fetch_add(1, Ordering::Relaxed);
    format!("req-{}-{}", nanos, seq)
}

/// Accepts `application/json`, ignoring case and parameters such as charset.
fn is_json(headers: &HeaderMap) -> bool {
    headers
        .get(CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.split(';').next())
        .is_some_and(|media_type| media_type.trim().eq_ignore_ascii_case("application/json"))
}

async fn webhook_handler(
    State(state): State<AppState>,
    remote: Option<ConnectInfo<SocketAddr>>,
    request: Request,
) -> Response {
    let start = Instant::now();
    let request_id = next_request_id();
    match remote {
        Some(ConnectInfo(addr)) => {
            info!("[{}] Received webhook request from {}", request_id, addr)
        }
        None => info!("[{}] Received webhook request", request_id),
    }

    let response = match process_webhook(&state, &request_id, request).await {
        Ok(()) => {
            info!("[{}] Alert processed successfully", request_id);
            (StatusCode::OK, "Alert processed successfully").into_response()
        }
        Err(e) => {
            if e.status_code().is_server_error() {
                error!("[{}] {}", request_id, e);
            } else {
                warn!("[{}] {}", request_id, e);
            }
            e.into_response()
        }
    };

    state
        .telemetry
        .request_processed(response.status().as_u16(), start.elapsed());
    response
}

async fn process_webhook(
    state: &AppState,
    request_id: &str,
    request: Request,
) -> Result<(), WebhookError> {
    if request.method() != Method::POST {
        return Err(WebhookError::MethodNotAllowed(request.method().clone()));
    }
    if !is_json(request.headers()) {
        let content_type = request
            .headers()
            .get(CONTENT_TYPE)
            .map(|v| String::from_utf8_lossy(v.as_bytes()).into_owned());
        return Err(WebhookError::UnsupportedContentType(content_type));
    }

    let body = to_bytes(request.into_body(), MAX_BODY_BYTES)
        .await
        .map_err(WebhookError::BodyRead)?;
    if body.is_empty() {
        return Err(WebhookError::EmptyBody);
    }
    debug!(
        "[{}] Received webhook body: {}",
        request_id,
        String::from_utf8_lossy(&body)
    );

    let batch = AlertBatch::from_slice(&body)?;
    state.telemetry.batch_received(&batch.status);
    info!(
        "[{}] Received {} alerts with status: {}, alertname: {}, receiver: {}",
        request_id,
        batch.alerts.len(),
        batch.status,
        batch.alert_name().unwrap_or("-"),
        batch.receiver
    );

    batch.validate()?;
    let document = chat::transform(&batch);

    info!("[{}] Sending alert to Google Chat", request_id);
    if let Err(e) = state.sender.send(&document, request_id).await {
        state.telemetry.provider_error(delivery::PROVIDER);
        return Err(e.into());
    }
    state.telemetry.batch_sent(&batch.status);
    Ok(())
}

#[derive(Debug, Serialize)]
struct HealthResponse {
    status: &'static str,
    timestamp: String,
    version: String,
    uptime: String,
}

async fn health_handler(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        timestamp: Utc::now().to_rfc3339_opts(SecondsFormat::Secs, true),
        version: buildinfo::version_full(),
        uptime: format_uptime(state.start_time.elapsed()),
    })
}

async fn metrics_handler(State(state): State<AppState>) -> String {
    state.prometheus_handle.render()
}

fn format_uptime(duration: std::time::Duration) -> String {
    let total_secs = duration.as_secs();
    let days = total_secs / 86400;
    let hours = (total_secs % 86400) / 3600;
    let minutes = (total_secs % 3600) / 60;
    let seconds = total_secs % 60;

    if days > 0 {
        format!("{}d {}h {}m {}s", days, hours, minutes, seconds)
    } else if hours > 0 {
        format!("{}h {}m {}s", hours, minutes, seconds)
    } else if minutes > 0 {
        format!("{}m {}s", minutes, seconds)
    } else {
        format!("{}s", seconds)
    }
}
