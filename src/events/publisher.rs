//! Outbound event delivery
//!
//! Publishers carry alert/anomaly/trend notifications out of the engine.
//! The log publisher writes structured records for operators tailing the
//! service; the webhook publisher POSTs the event as JSON to a configured
//! endpoint. Delivery failures are the caller's to log — collection never
//! fails because a notification could not be sent.

use crate::events::OutboundEvent;
use async_trait::async_trait;
use reqwest::Client;
use std::time::Duration;
use thiserror::Error;
use tracing::info;

#[derive(Debug, Error)]
pub enum PublishError {
    #[error("webhook request failed: {0}")]
    Request(#[from] reqwest::Error),
    #[error("webhook returned status {status}")]
    Status { status: u16 },
}

pub type PublishResult<T> = Result<T, PublishError>;

/// Outbound sink for alert/anomaly/trend notifications
#[async_trait]
pub trait EventPublisher: Send + Sync {
    async fn publish(&self, event: &OutboundEvent) -> PublishResult<()>;

    /// Short identifier used in scheduler logs
    fn name(&self) -> &'static str;
}

/// Publisher that emits events as structured log records
#[derive(Debug, Default)]
pub struct LogPublisher;

impl LogPublisher {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl EventPublisher for LogPublisher {
    async fn publish(&self, event: &OutboundEvent) -> PublishResult<()> {
        info!(
            kind = %event.kind,
            metric = %event.metric_code,
            value = event.value,
            severity = ?event.severity,
            message = %event.message,
            "outbound event"
        );
        Ok(())
    }

    fn name(&self) -> &'static str {
        "log"
    }
}

/// Publisher that POSTs events as JSON to a configured endpoint
pub struct WebhookPublisher {
    client: Client,
    endpoint: String,
}

impl WebhookPublisher {
    pub fn new(endpoint: impl Into<String>, timeout: Duration) -> Self {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .expect("Failed to create HTTP client");
        Self {
            client,
            endpoint: endpoint.into(),
        }
    }
}

#[async_trait]
impl EventPublisher for WebhookPublisher {
    async fn publish(&self, event: &OutboundEvent) -> PublishResult<()> {
        let response = self
            .client
            .post(&self.endpoint)
            .json(event)
            .send()
            .await?;

        if response.status().is_success() {
            Ok(())
        } else {
            Err(PublishError::Status {
                status: response.status().as_u16(),
            })
        }
    }

    fn name(&self) -> &'static str {
        "webhook"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::OutboundKind;
    use axum::http::StatusCode;
    use axum::routing::post;
    use axum::{Json, Router};
    use chrono::Utc;
    use std::sync::Arc;
    use tokio::sync::Mutex;

    fn sample_event() -> OutboundEvent {
        OutboundEvent {
            id: "test-event".to_string(),
            kind: OutboundKind::Alert,
            metric_id: 1,
            metric_code: "requests_received".to_string(),
            metric_name: "Requests received".to_string(),
            value: 150.0,
            severity: None,
            message: "above limit".to_string(),
            details: serde_json::json!({"threshold": 100.0}),
            emitted_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn test_log_publisher_always_succeeds() {
        let publisher = LogPublisher::new();
        assert!(publisher.publish(&sample_event()).await.is_ok());
        assert_eq!(publisher.name(), "log");
    }

    #[tokio::test]
    async fn test_webhook_posts_event_body() {
        let received: Arc<Mutex<Option<serde_json::Value>>> = Arc::new(Mutex::new(None));
        let sink = received.clone();
        let app = Router::new().route(
            "/hook",
            post(move |Json(body): Json<serde_json::Value>| {
                let sink = sink.clone();
                async move {
                    *sink.lock().await = Some(body);
                    StatusCode::NO_CONTENT
                }
            }),
        );

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        let publisher = WebhookPublisher::new(
            format!("http://{}/hook", addr),
            Duration::from_secs(2),
        );
        publisher.publish(&sample_event()).await.unwrap();

        let body = received.lock().await.clone().unwrap();
        assert_eq!(body["metric_code"], "requests_received");
        assert_eq!(body["kind"], "alert");
        assert_eq!(body["details"]["threshold"], 100.0);
    }

    #[tokio::test]
    async fn test_webhook_surfaces_error_status() {
        let app = Router::new().route(
            "/hook",
            post(|| async { StatusCode::INTERNAL_SERVER_ERROR }),
        );
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        let publisher = WebhookPublisher::new(
            format!("http://{}/hook", addr),
            Duration::from_secs(2),
        );
        let err = publisher.publish(&sample_event()).await.unwrap_err();
        assert!(matches!(err, PublishError::Status { status: 500 }));
    }
}
