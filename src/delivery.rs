use crate::chat::ChatDocument;
use crate::metrics::Telemetry;
use async_trait::async_trait;
use reqwest::header::CONTENT_TYPE;
use reqwest::{Client, Url};
use std::sync::Arc;
use std::time::{Duration, Instant};
use thiserror::Error;
use tracing::{debug, error, info};

pub const PROVIDER: &str = "google_chat";

pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(10);
pub const DEFAULT_POOL_IDLE_TIMEOUT: Duration = Duration::from_secs(90);
const MAX_IDLE_PER_HOST: usize = 100;

#[derive(Debug, Error)]
pub enum DeliveryError {
    #[error("error sending request: {0}")]
    Transport(#[source] reqwest::Error),
    #[error("error encoding chat message: {0}")]
    Encode(#[from] serde_json::Error),
    #[error("received non-success status code {status}: {body}")]
    RemoteRejected { status: u16, body: String },
}

impl DeliveryError {
    /// Short label used for the delivery-duration metric.
    fn outcome(&self) -> String {
        match self {
            DeliveryError::Transport(_) => "transport_error".to_string(),
            DeliveryError::Encode(_) => "encode_error".to_string(),
            DeliveryError::RemoteRejected { status, .. } => status.to_string(),
        }
    }
}

/// A destination for rendered chat messages.
#[async_trait]
pub trait ChatSender: Send + Sync {
    /// Makes a single delivery attempt. `request_id` ties log lines to the
    /// inbound webhook request.
    async fn send(&self, document: &ChatDocument, request_id: &str) -> Result<(), DeliveryError>;
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ClientOptions {
    pub timeout: Duration,
    pub pool_idle_timeout: Duration,
}

impl Default for ClientOptions {
    fn default() -> Self {
        Self {
            timeout: DEFAULT_TIMEOUT,
            pool_idle_timeout: DEFAULT_POOL_IDLE_TIMEOUT,
        }
    }
}

/// Posts messages to a Google Chat incoming webhook. Cloning shares the
/// underlying connection pool.
#[derive(Clone)]
pub struct GoogleChatClient {
    client: Client,
    webhook_url: Url,
    telemetry: Arc<dyn Telemetry>,
}

impl GoogleChatClient {
    pub fn new(
        webhook_url: Url,
        options: ClientOptions,
        telemetry: Arc<dyn Telemetry>,
    ) -> Result<Self, reqwest::Error> {
        let client = Client::builder()
            .timeout(options.timeout)
            .pool_idle_timeout(options.pool_idle_timeout)
            .pool_max_idle_per_host(MAX_IDLE_PER_HOST)
            .build()?;
        Ok(Self {
            client,
            webhook_url,
            telemetry,
        })
    }

    async fn post(&self, document: &ChatDocument, request_id: &str) -> Result<u16, DeliveryError> {
        let payload = serde_json::to_vec(document)?;
        debug!(
            "[{}] Google Chat payload: {}",
            request_id,
            String::from_utf8_lossy(&payload)
        );

        let response = self
            .client
            .post(self.webhook_url.clone())
            .header(CONTENT_TYPE, "application/json")
            .body(payload)
            .send()
            .await
            .map_err(DeliveryError::Transport)?;

        let status = response.status();
        if status.as_u16() >= 300 {
            let body = response.text().await.unwrap_or_default();
            return Err(DeliveryError::RemoteRejected {
                status: status.as_u16(),
                body,
            });
        }
        Ok(status.as_u16())
    }
}

#[async_trait]
impl ChatSender for GoogleChatClient {
    async fn send(&self, document: &ChatDocument, request_id: &str) -> Result<(), DeliveryError> {
        let start = Instant::now();
        let result = self.post(document, request_id).await;
        let elapsed = start.elapsed();

        match result {
            Ok(status) => {
                self.telemetry
                    .provider_request(PROVIDER, &status.to_string(), elapsed);
                info!(
                    "[{}] Successfully sent message to Google Chat (status: {}, elapsed: {:?})",
                    request_id, status, elapsed
                );
                Ok(())
            }
            Err(e) => {
                self.telemetry.provider_request(PROVIDER, &e.outcome(), elapsed);
                error!(
                    "[{}] Google Chat delivery failed after {:?}: {}",
                    request_id, elapsed, e
                );
                Err(e)
            }
        }
    }
}


#[cfg(test)]
mod tests {
    use super::*;
    use crate::alertmanager::{Alert, AlertBatch};
    use crate::chat::transform;
    use crate::metrics::recording::RecordingTelemetry;
    use axum::Router;
    use axum::http::{HeaderMap, StatusCode};
    use axum::routing::post;
    use std::sync::Mutex;
    use tokio::net::TcpListener;

    #[derive(Default)]
    struct Captured {
        content_type: Option<String>,
        body: Option<serde_json::Value>,
    }

    fn document() -> ChatDocument {
        transform(&AlertBatch {
            status: "firing".to_string(),
            alerts: vec![Alert {
                status: "firing".to_string(),
                labels: [("alertname".to_string(), "HighCPU".to_string())].into(),
                ..Default::default()
            }],
            ..Default::default()
        })
    }

    /// Starts a fake chat endpoint that answers every POST with `status` and
    /// `reply`, after `delay`.
    async fn fake_chat_endpoint(
        status: StatusCode,
        reply: &'static str,
        delay: Duration,
    ) -> (Url, Arc<Mutex<Captured>>) {
        let captured = Arc::new(Mutex::new(Captured::default()));
        let captured_clone = captured.clone();
        let app = Router::new().route(
            "/v1/spaces/test/messages",
            post(move |headers: HeaderMap, body: String| {
                let captured = captured_clone.clone();
                async move {
                    {
                        let mut captured = captured.lock().unwrap();
                        captured.content_type = headers
                            .get("content-type")
                            .and_then(|v| v.to_str().ok())
                            .map(str::to_string);
                        captured.body = serde_json::from_str(&body).ok();
                    }
                    tokio::time::sleep(delay).await;
                    (status, reply)
                }
            }),
        );

        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        let url = Url::parse(&format!("http://127.0.0.1:{}/v1/spaces/test/messages", port)).unwrap();
        (url, captured)
    }

    fn client(url: Url, options: ClientOptions) -> (GoogleChatClient, Arc<RecordingTelemetry>) {
        let telemetry = Arc::new(RecordingTelemetry::default());
        let client = GoogleChatClient::new(url, options, telemetry.clone()).unwrap();
        (client, telemetry)
    }

    #[tokio::test]
    async fn test_send_success() {
        let (url, captured) = fake_chat_endpoint(StatusCode::OK, "{}", Duration::ZERO).await;
        let (client, telemetry) = client(url, ClientOptions::default());

        client.send(&document(), "req-1").await.unwrap();

        let captured = captured.lock().unwrap();
        assert_eq!(captured.content_type.as_deref(), Some("application/json"));
        let body = captured.body.as_ref().unwrap();
        assert_eq!(body["text"], "FIRING Alert: HighCPU (1 alerts)");
        assert_eq!(body["cards"][0]["sections"][0]["header"], "Summary");
        assert_eq!(telemetry.provider_requests(), vec!["200".to_string()]);
    }

    #[tokio::test]
    async fn test_send_redirect_is_rejected() {
        let (url, _) = fake_chat_endpoint(StatusCode::MULTIPLE_CHOICES, "pick one", Duration::ZERO).await;
        let (client, _) = client(url, ClientOptions::default());

        match client.send(&document(), "req-2").await {
            Err(DeliveryError::RemoteRejected { status, body }) => {
                assert_eq!(status, 300);
                assert_eq!(body, "pick one");
            }
            other => panic!("Expected RemoteRejected, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_send_remote_error() {
        let (url, _) = fake_chat_endpoint(
            StatusCode::BAD_REQUEST,
            r#"{"error": {"message": "Invalid JSON payload"}}"#,
            Duration::ZERO,
        )
        .await;
        let (client, telemetry) = client(url, ClientOptions::default());

        let err = client.send(&document(), "req-3").await.unwrap_err();
        assert!(matches!(err, DeliveryError::RemoteRejected { status: 400, .. }));
        assert!(err.to_string().contains("Invalid JSON payload"));
        assert_eq!(telemetry.provider_requests(), vec!["400".to_string()]);
    }

    #[tokio::test]
    async fn test_send_timeout() {
        let (url, _) = fake_chat_endpoint(StatusCode::OK, "{}", Duration::from_secs(5)).await;
        let options = ClientOptions {
            timeout: Duration::from_millis(200),
            ..ClientOptions::default()
        };
        let (client, telemetry) = client(url, options);

        match client.send(&document(), "req-4").await {
            Err(DeliveryError::Transport(e)) => assert!(e.is_timeout()),
            other => panic!("Expected Transport timeout, got {:?}", other),
        }
        assert_eq!(telemetry.provider_requests(), vec!["transport_error".to_string()]);
    }

    #[tokio::test]
    async fn test_send_connection_refused() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);

        let url = Url::parse(&format!("http://127.0.0.1:{}/", port)).unwrap();
        let (client, _) = client(url, ClientOptions::default());

        let err = client.send(&document(), "req-5").await.unwrap_err();
        assert!(matches!(err, DeliveryError::Transport(_)));
    }

    #[tokio::test]
    async fn test_concurrent_sends_from_clones() {
        let (url, _) = fake_chat_endpoint(StatusCode::OK, "{}", Duration::ZERO).await;
        let (client, telemetry) = client(url, ClientOptions::default());
        let other = client.clone();

        let doc_a = document();
        let doc_b = document();
        let (a, b) = tokio::join!(
            client.send(&doc_a, "req-6"),
            other.send(&doc_b, "req-7")
        );
        assert!(a.is_ok() && b.is_ok());
        assert_eq!(telemetry.provider_requests().len(), 2);
    }
}
