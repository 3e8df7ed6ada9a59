//! Client for the external AI processor.

use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;
use tracing::debug;

use chatpsi_shared::protocol::{ProcessorPayload, ProcessorReply};

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ProcessorError {
    #[error("processor is not configured")]
    NotConfigured,

    #[error("processor returned HTTP {status}")]
    Status { status: u16, body: String },

    #[error("processor unreachable: {0}")]
    Transport(String),
}

impl ProcessorError {
    /// Status code for the audit log, 0 when no response was received.
    pub fn status_code(&self) -> u16 {
        match self {
            ProcessorError::Status { status, .. } => *status,
            _ => 0,
        }
    }
}

/// Successful (2xx) processor answer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcessorOutcome {
    pub status: u16,
    /// Inline reply text; `None` means it will arrive through the callback.
    pub reply: Option<String>,
}

#[async_trait]
pub trait AiProcessor: Send + Sync {
    async fn forward(&self, payload: &ProcessorPayload) -> Result<ProcessorOutcome, ProcessorError>;
}

pub struct HttpProcessor {
    client: reqwest::Client,
    url: Option<String>,
    secret: Option<String>,
}

impl HttpProcessor {
    pub fn new(
        url: Option<String>,
        secret: Option<String>,
        timeout: Duration,
    ) -> Result<Self, ProcessorError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| ProcessorError::Transport(e.to_string()))?;
        Ok(Self { client, url, secret })
    }
}

#[async_trait]
impl AiProcessor for HttpProcessor {
    async fn forward(&self, payload: &ProcessorPayload) -> Result<ProcessorOutcome, ProcessorError> {
        let url = self.url.as_deref().ok_or(ProcessorError::NotConfigured)?;

        let mut request = self.client.post(url).json(payload);
        if let Some(secret) = &self.secret {
            request = request.bearer_auth(secret);
        }

        let response = request
            .send()
            .await
            .map_err(|e| ProcessorError::Transport(e.to_string()))?;
        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| ProcessorError::Transport(e.to_string()))?;

        if !status.is_success() {
            return Err(ProcessorError::Status {
                status: status.as_u16(),
                body,
            });
        }

        let reply = parse_reply(&body);
        debug!(status = status.as_u16(), inline = reply.is_some(), "Processor answered");
        Ok(ProcessorOutcome {
            status: status.as_u16(),
            reply,
        })
    }
}

/// An inline reply is a JSON object with a non-empty `response` string.
/// Anything else is an acknowledgement.
fn parse_reply(body: &str) -> Option<String> {
    if body.trim().is_empty() {
        return None;
    }
    serde_json::from_str::<ProcessorReply>(body)
        .ok()
        .and_then(|r| r.response)
        .filter(|r| !r.trim().is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::{HeaderMap, StatusCode};
    use axum::routing::post;
    use axum::{Json, Router};
    use chatpsi_shared::{MessageBody, UserId};
    use std::sync::{Arc, Mutex};
    use uuid::Uuid;

    #[test]
    fn test_parse_reply() {
        assert_eq!(parse_reply(r#"{"response":"hi"}"#).as_deref(), Some("hi"));
        assert_eq!(parse_reply(""), None);
        assert_eq!(parse_reply(r#"{"status":"queued"}"#), None);
        assert_eq!(parse_reply(r#"{"response":"  "}"#), None);
        assert_eq!(parse_reply("Accepted"), None);
    }

    type Seen = Arc<Mutex<Vec<(Option<String>, serde_json::Value)>>>;

    async fn spawn_processor(status: StatusCode, body: &'static str) -> (String, Seen) {
        let seen: Seen = Arc::default();
        let recorded = seen.clone();
        let app = Router::new().route(
            "/hook",
            post(move |headers: HeaderMap, Json(json): Json<serde_json::Value>| {
                let recorded = recorded.clone();
                async move {
                    let auth = headers
                        .get("authorization")
                        .and_then(|v| v.to_str().ok())
                        .map(String::from);
                    recorded.lock().unwrap().push((auth, json));
                    (status, body)
                }
            }),
        );
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        (format!("http://{addr}/hook"), seen)
    }

    fn payload() -> ProcessorPayload {
        ProcessorPayload::for_message(UserId(Uuid::new_v4()), &MessageBody::text("hello"))
    }

    #[tokio::test]
    async fn test_inline_reply() {
        let (url, seen) = spawn_processor(StatusCode::OK, r#"{"response":"hi"}"#).await;
        let processor =
            HttpProcessor::new(Some(url), Some("psk".into()), Duration::from_secs(5)).unwrap();

        let outcome = processor.forward(&payload()).await.unwrap();
        assert_eq!(outcome.reply.as_deref(), Some("hi"));

        let seen = seen.lock().unwrap();
        assert_eq!(seen[0].0.as_deref(), Some("Bearer psk"));
        assert_eq!(seen[0].1["texto"], "hello");
        assert_eq!(seen[0].1["tipodemensagem"], "text");
    }

    #[tokio::test]
    async fn test_accepted_is_async_ack() {
        let (url, _seen) = spawn_processor(StatusCode::ACCEPTED, "").await;
        let processor = HttpProcessor::new(Some(url), None, Duration::from_secs(5)).unwrap();

        let outcome = processor.forward(&payload()).await.unwrap();
        assert_eq!(outcome.status, 202);
        assert_eq!(outcome.reply, None);
    }

    #[tokio::test]
    async fn test_error_status() {
        let (url, _seen) = spawn_processor(StatusCode::INTERNAL_SERVER_ERROR, "boom").await;
        let processor = HttpProcessor::new(Some(url), None, Duration::from_secs(5)).unwrap();

        let err = processor.forward(&payload()).await.unwrap_err();
        assert_eq!(
            err,
            ProcessorError::Status {
                status: 500,
                body: "boom".into()
            }
        );
        assert_eq!(err.status_code(), 500);
    }

    #[tokio::test]
    async fn test_unreachable_and_unconfigured() {
        let unconfigured = HttpProcessor::new(None, None, Duration::from_secs(1)).unwrap();
        assert_eq!(
            unconfigured.forward(&payload()).await.unwrap_err(),
            ProcessorError::NotConfigured
        );

        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);
        let dead = HttpProcessor::new(
            Some(format!("http://{addr}/hook")),
            None,
            Duration::from_secs(1),
        )
        .unwrap();
        let err = dead.forward(&payload()).await.unwrap_err();
        assert!(matches!(err, ProcessorError::Transport(_)));
        assert_eq!(err.status_code(), 0);
    }
}
