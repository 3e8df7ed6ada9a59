//! HTTP client for the gateway API.

use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use reqwest::header::CONTENT_TYPE;
use reqwest::{RequestBuilder, Response};
use serde::de::DeserializeOwned;
use tracing::{debug, warn};

use chatpsi_shared::protocol::{
    DispatchRequest, DispatchResponse, ErrorBody, ProfileResponse, UploadResponse,
};
use chatpsi_shared::Message;

use crate::config::ClientConfig;
use crate::error::ClientError;
use crate::seams::{DispatchGateway, EntitlementProvider, MessageHistory, ObjectStorage};

// Dispatch waits on the AI processor, which can take a while.
const REQUEST_TIMEOUT: Duration = Duration::from_secs(120);

#[derive(Clone)]
pub struct HttpBackend {
    client: reqwest::Client,
    base_url: String,
    access_token: Option<String>,
}

impl HttpBackend {
    pub fn new(config: &ClientConfig) -> Result<Self, ClientError> {
        let client = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()?;
        Ok(Self {
            client,
            base_url: config.base_url.clone(),
            access_token: config.access_token.clone(),
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    fn authorized(&self, request: RequestBuilder) -> RequestBuilder {
        match &self.access_token {
            Some(token) => request.bearer_auth(token),
            None => request,
        }
    }
}

/// Decode a success body, or turn the gateway's error body into a
/// [`ClientError`].
async fn read_json<T: DeserializeOwned>(response: Response) -> Result<T, ClientError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response.json::<T>().await?);
    }

    let text = response.text().await.unwrap_or_default();
    match serde_json::from_str::<ErrorBody>(&text) {
        Ok(body) => Err(ClientError::from_code(body.code, body.error)),
        Err(_) => {
            warn!(status = status.as_u16(), "Gateway returned an unstructured error");
            Err(ClientError::Transport(format!("HTTP {status}")))
        }
    }
}

#[async_trait]
impl EntitlementProvider for HttpBackend {
    async fn profile(&self) -> Result<ProfileResponse, ClientError> {
        let response = self
            .authorized(self.client.get(self.url("/me")))
            .send()
            .await?;
        read_json(response).await
    }
}

#[async_trait]
impl DispatchGateway for HttpBackend {
    async fn dispatch(&self, request: DispatchRequest) -> Result<DispatchResponse, ClientError> {
        debug!(kind = request.kind.as_str(), "Dispatching message");
        let response = self
            .authorized(self.client.post(self.url("/dispatch")))
            .json(&request)
            .send()
            .await?;
        read_json(response).await
    }
}

#[async_trait]
impl MessageHistory for HttpBackend {
    async fn fetch_thread(&self) -> Result<Vec<Message>, ClientError> {
        let response = self
            .authorized(self.client.get(self.url("/messages")))
            .send()
            .await?;
        read_json(response).await
    }
}

#[async_trait]
impl ObjectStorage for HttpBackend {
    async fn put(&self, path: &str, data: Bytes, content_type: &str) -> Result<String, ClientError> {
        let response = self
            .authorized(self.client.put(self.url(&format!("/storage/{path}"))))
            .header(CONTENT_TYPE, content_type)
            .body(data)
            .send()
            .await?;
        let uploaded: UploadResponse = read_json(response).await?;
        Ok(uploaded.url)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::{HeaderMap, StatusCode};
    use axum::routing::{get, post, put};
    use axum::{Json, Router};
    use chatpsi_shared::protocol::ErrorCode;
    use chatpsi_shared::{MessageBody, Sender, UserId};
    use uuid::Uuid;

    const USER: Uuid = Uuid::from_u128(42);

    async fn spawn_gateway() -> String {
        let app = Router::new()
            .route(
                "/me",
                get(|headers: HeaderMap| async move {
                    if headers.get("authorization").map(|v| v.as_bytes()) != Some(&b"Bearer tok"[..]) {
                        return Err(StatusCode::UNAUTHORIZED);
                    }
                    Ok(Json(ProfileResponse {
                        user_id: UserId(USER),
                        nickname: Some("Ana".into()),
                        subscription_active: true,
                    }))
                }),
            )
            .route(
                "/messages",
                get(|| async {
                    Json(vec![Message::new(
                        UserId(USER),
                        Sender::Assistant,
                        MessageBody::text("welcome"),
                    )])
                }),
            )
            .route(
                "/dispatch",
                post(|| async {
                    (
                        StatusCode::FORBIDDEN,
                        Json(ErrorBody {
                            error: "An active subscription is required".into(),
                            code: ErrorCode::EntitlementRequired,
                        }),
                    )
                }),
            )
            .route(
                "/storage/{*key}",
                put(
                    |axum::extract::Path(key): axum::extract::Path<String>,
                     headers: HeaderMap,
                     body: axum::body::Bytes| async move {
                        let mime = headers
                            .get("content-type")
                            .and_then(|v| v.to_str().ok())
                            .unwrap_or("")
                            .to_string();
                        Json(UploadResponse {
                            url: format!("http://files/{key}?type={mime}&len={}", body.len()),
                        })
                    },
                ),
            );

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        format!("http://{addr}")
    }

    async fn backend(token: Option<&str>) -> HttpBackend {
        let base = spawn_gateway().await;
        HttpBackend::new(&ClientConfig::new(base, token.map(String::from))).unwrap()
    }

    #[tokio::test]
    async fn test_profile_sends_bearer() {
        let profile = backend(Some("tok")).await.profile().await.unwrap();
        assert!(profile.subscription_active);
        assert_eq!(profile.user_id, UserId(USER));

        let err = backend(None).await.profile().await.unwrap_err();
        assert!(matches!(err, ClientError::Transport(_)));
    }

    #[tokio::test]
    async fn test_fetch_thread() {
        let messages = backend(Some("tok")).await.fetch_thread().await.unwrap();
        assert_eq!(messages.len(), 1);
        assert_eq!(messages[0].content(), "welcome");
    }

    #[tokio::test]
    async fn test_dispatch_error_body_is_mapped() {
        let err = backend(Some("tok"))
            .await
            .dispatch(DispatchRequest::from_body(&MessageBody::text("hi"), None))
            .await
            .unwrap_err();
        assert_eq!(err, ClientError::EntitlementRequired);
    }

    #[tokio::test]
    async fn test_put_object() {
        let url = backend(Some("tok"))
            .await
            .put("u/1.png", Bytes::from_static(b"png!"), "image/png")
            .await
            .unwrap();
        assert_eq!(url, "http://files/u/1.png?type=image/png&len=4");
    }

    #[tokio::test]
    async fn test_unreachable_gateway() {
        let backend =
            HttpBackend::new(&ClientConfig::new("http://127.0.0.1:1", Some("tok".into()))).unwrap();
        assert!(matches!(
            backend.profile().await,
            Err(ClientError::Transport(_))
        ));
    }
}
