use std::sync::Mutex;

use async_trait::async_trait;
use axum::body::Body;
use axum::http::{Request, StatusCode};
use chrono::{Duration, Utc};
use ed25519_dalek::SigningKey;
use futures::StreamExt;
use rand::rngs::OsRng;
use serde_json::{json, Value};
use tempfile::TempDir;
use tower::ServiceExt;

use chatpsi_shared::credential::AccessToken;
use chatpsi_shared::protocol::{
    CallbackPayload, DispatchRequest, DispatchResponse, ErrorCode, ProcessorPayload, RealtimeFrame,
};
use chatpsi_shared::{ClientRef, MessageKind, Sender, UserId};
use chatpsi_store::Database;

use super::*;
use crate::dispatch::{dispatch, receive_reply};
use crate::processor::{ProcessorError, ProcessorOutcome};
use crate::realtime::RealtimeHub;

struct StubProcessor {
    outcome: Mutex<Result<ProcessorOutcome, ProcessorError>>,
    calls: Mutex<Vec<ProcessorPayload>>,
}

impl StubProcessor {
    fn replying(text: &str) -> Self {
        Self::with(Ok(ProcessorOutcome {
            status: 200,
            reply: Some(text.to_string()),
        }))
    }

    fn acknowledging() -> Self {
        Self::with(Ok(ProcessorOutcome {
            status: 202,
            reply: None,
        }))
    }

    fn failing() -> Self {
        Self::with(Err(ProcessorError::Transport("operation timed out".into())))
    }

    fn with(outcome: Result<ProcessorOutcome, ProcessorError>) -> Self {
        Self {
            outcome: Mutex::new(outcome),
            calls: Mutex::new(Vec::new()),
        }
    }

    fn calls(&self) -> Vec<ProcessorPayload> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl AiProcessor for StubProcessor {
    async fn forward(&self, payload: &ProcessorPayload) -> Result<ProcessorOutcome, ProcessorError> {
        self.calls.lock().unwrap().push(payload.clone());
        self.outcome.lock().unwrap().clone()
    }
}

struct Harness {
    _dir: TempDir,
    state: AppState,
    app: Router,
    provider: SigningKey,
    processor: Arc<StubProcessor>,
}

impl Harness {
    async fn new(processor: StubProcessor) -> Self {
        Self::with_rate(processor, 100).await
    }

    async fn with_rate(processor: StubProcessor, per_minute: u32) -> Self {
        let dir = TempDir::new().unwrap();
        let provider = SigningKey::generate(&mut OsRng);

        let config = ServerConfig {
            identity_pubkey: provider.verifying_key().to_bytes(),
            admin_token: Some("admin-token".into()),
            webhook_secret: Some("callback-secret".into()),
            public_base_url: "http://gateway.test".into(),
            max_upload_size: 1024 * 1024,
            dispatch_rate_per_minute: per_minute,
            ..ServerConfig::default()
        };

        let db = Database::open_at(&dir.path().join("chat.db")).unwrap();
        let objects = ObjectStore::new(
            dir.path().join("storage"),
            config.public_base_url.clone(),
            config.max_upload_size,
        )
        .await
        .unwrap();

        let processor = Arc::new(processor);
        let state = AppState {
            log: MessageLog::new(db, RealtimeHub::new(16)),
            objects: Arc::new(objects),
            processor: processor.clone(),
            limiter: RateLimiter::per_minute(per_minute),
            config: Arc::new(config),
        };

        Self {
            _dir: dir,
            app: build_router(state.clone()),
            state,
            provider,
            processor,
        }
    }

    fn token(&self, user: UserId) -> String {
        AccessToken::issue(user, Utc::now() + Duration::hours(1), &self.provider).encode()
    }

    fn user(&self, subscription_active: bool) -> UserId {
        let user = UserId(Uuid::new_v4());
        let mut profile = Profile::new(user);
        profile.nickname = Some("Ana".into());
        profile.openai_thread_id = Some("thread_abc".into());
        profile.subscription_active = subscription_active;
        self.state.log.upsert_profile(&profile).unwrap();
        user
    }

    fn thread(&self, user: UserId) -> Vec<Message> {
        self.state.log.thread(user.thread()).unwrap()
    }

    async fn call(&self, request: Request<Body>) -> (StatusCode, Value) {
        let response = self.app.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let body = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
        (status, body)
    }

    async fn post_dispatch(&self, user: UserId, body: Value) -> (StatusCode, Value) {
        let request = Request::builder()
            .method("POST")
            .uri("/dispatch")
            .header("authorization", format!("Bearer {}", self.token(user)))
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap();
        self.call(request).await
    }
}

fn error_code(body: &Value) -> ErrorCode {
    serde_json::from_value(body["code"].clone()).unwrap()
}

fn text_request(text: &str) -> Value {
    json!({ "kind": "text", "text": text })
}

// ---------------------------------------------------------------------------
// Dispatch
// ---------------------------------------------------------------------------

#[tokio::test]
async fn test_dispatch_without_entitlement_has_no_side_effects() {
    let h = Harness::new(StubProcessor::replying("hi")).await;
    let inactive = h.user(false);

    let (status, body) = h.post_dispatch(inactive, text_request("hello")).await;
    assert_eq!(status, StatusCode::FORBIDDEN);
    assert_eq!(error_code(&body), ErrorCode::EntitlementRequired);
    assert!(h.thread(inactive).is_empty());

    // no profile at all
    let stranger = UserId(Uuid::new_v4());
    let (status, _) = h.post_dispatch(stranger, text_request("hello")).await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    assert!(h.processor.calls().is_empty());
}

#[tokio::test]
async fn test_dispatch_with_inline_reply() {
    let h = Harness::new(StubProcessor::replying("hi")).await;
    let user = h.user(true);
    let client_ref = ClientRef::new();

    let (status, body) = h
        .post_dispatch(
            user,
            json!({ "kind": "text", "text": "hello", "client_ref": client_ref }),
        )
        .await;
    assert_eq!(status, StatusCode::OK);

    let response: DispatchResponse = serde_json::from_value(body).unwrap();
    assert_eq!(response.client_ref, Some(client_ref));
    assert_eq!(response.user_message.client_ref, Some(client_ref));
    let reply = response.reply.expect("inline reply");
    assert_eq!(reply.sender, Sender::Assistant);
    assert_eq!(reply.content(), "hi");

    let thread = h.thread(user);
    let contents: Vec<_> = thread.iter().map(|m| (m.sender, m.content())).collect();
    assert_eq!(
        contents,
        vec![(Sender::User, "hello"), (Sender::Assistant, "hi")]
    );
    assert_eq!(thread[0].client_ref, Some(client_ref));

    let calls = h.processor.calls();
    assert_eq!(calls.len(), 1);
    assert_eq!(calls[0].user_id, user);
    assert_eq!(calls[0].text.as_deref(), Some("hello"));
    assert_eq!(calls[0].populated_fields(), 1);
    assert_eq!(calls[0].nickname.as_deref(), Some("Ana"));
    assert_eq!(calls[0].openai_thread_id.as_deref(), Some("thread_abc"));
}

#[tokio::test]
async fn test_dispatch_upstream_failure_keeps_user_message() {
    let h = Harness::new(StubProcessor::failing()).await;
    let user = h.user(true);

    let (status, body) = h.post_dispatch(user, text_request("hello")).await;
    assert_eq!(status, StatusCode::BAD_GATEWAY);
    assert_eq!(error_code(&body), ErrorCode::UpstreamDispatchFailed);

    let thread = h.thread(user);
    assert_eq!(thread.len(), 1);
    assert_eq!(thread[0].sender, Sender::User);
    assert_eq!(thread[0].content(), "hello");
}

#[tokio::test]
async fn test_dispatch_attachment_forwards_media_reference() {
    let h = Harness::new(StubProcessor::acknowledging()).await;
    let user = h.user(true);

    let (status, body) = h
        .post_dispatch(
            user,
            json!({
                "kind": "audio",
                "media_url": "http://gateway.test/storage/x/1.wav",
                "label": "audio_recording_1.wav"
            }),
        )
        .await;
    assert_eq!(status, StatusCode::OK);
    assert!(body["reply"].is_null());

    let thread = h.thread(user);
    assert_eq!(thread.len(), 1);
    assert_eq!(thread[0].kind(), MessageKind::Audio);
    assert_eq!(thread[0].content(), "audio_recording_1.wav");

    let calls = h.processor.calls();
    assert_eq!(calls[0].audio.as_deref(), Some("http://gateway.test/storage/x/1.wav"));
    assert!(calls[0].text.is_none());
}

#[tokio::test]
async fn test_dispatch_rejects_invalid_body_before_persisting() {
    let h = Harness::new(StubProcessor::replying("hi")).await;
    let user = h.user(true);

    let (status, body) = h.post_dispatch(user, text_request("   ")).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(error_code(&body), ErrorCode::BadRequest);

    let (status, _) = h.post_dispatch(user, json!({ "kind": "image" })).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    assert!(h.thread(user).is_empty());
    assert!(h.processor.calls().is_empty());
}

#[tokio::test]
async fn test_dispatch_requires_valid_token() {
    let h = Harness::new(StubProcessor::replying("hi")).await;

    let request = Request::builder()
        .method("POST")
        .uri("/dispatch")
        .header("content-type", "application/json")
        .body(Body::from(text_request("hello").to_string()))
        .unwrap();
    let (status, body) = h.call(request).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(error_code(&body), ErrorCode::Unauthorized);

    let forged = AccessToken::issue(
        h.user(true),
        Utc::now() + Duration::hours(1),
        &SigningKey::generate(&mut OsRng),
    );
    let request = Request::builder()
        .method("POST")
        .uri("/dispatch")
        .header("authorization", format!("Bearer {}", forged.encode()))
        .header("content-type", "application/json")
        .body(Body::from(text_request("hello").to_string()))
        .unwrap();
    let (status, _) = h.call(request).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn test_dispatch_is_throttled_per_actor() {
    let h = Harness::with_rate(StubProcessor::acknowledging(), 1).await;
    let user = h.user(true);

    let (first, _) = h.post_dispatch(user, text_request("one")).await;
    let (second, body) = h.post_dispatch(user, text_request("two")).await;
    assert_eq!(first, StatusCode::OK);
    assert_eq!(second, StatusCode::TOO_MANY_REQUESTS);
    assert_eq!(error_code(&body), ErrorCode::RateLimited);
    assert_eq!(h.thread(user).len(), 1);

    let other = h.user(true);
    let (status, _) = h.post_dispatch(other, text_request("three")).await;
    assert_eq!(status, StatusCode::OK);
}

#[tokio::test]
async fn test_inserts_are_pushed_to_thread_subscribers() {
    let h = Harness::new(StubProcessor::replying("hi")).await;
    let user = h.user(true);
    let mut rx = h.state.log.hub().subscribe(user.thread());

    dispatch(
        &h.state,
        crate::auth::Actor { user_id: user },
        DispatchRequest {
            kind: MessageKind::Text,
            text: Some("hello".into()),
            media_url: None,
            label: None,
            client_ref: None,
        },
    )
    .await
    .unwrap();

    assert_eq!(rx.recv().await.unwrap().sender, Sender::User);
    assert_eq!(rx.recv().await.unwrap().sender, Sender::Assistant);
}

// ---------------------------------------------------------------------------
// Asynchronous reply callback
// ---------------------------------------------------------------------------

#[tokio::test]
async fn test_async_reply_through_callback() {
    let h = Harness::new(StubProcessor::acknowledging()).await;
    let user = h.user(true);

    let (status, body) = h.post_dispatch(user, text_request("hello")).await;
    assert_eq!(status, StatusCode::OK);
    assert!(body["reply"].is_null());
    assert_eq!(h.thread(user).len(), 1);

    let request = Request::builder()
        .method("POST")
        .uri("/webhook/response")
        .header("authorization", "Bearer callback-secret")
        .header("content-type", "application/json")
        .body(Body::from(
            json!({ "UserId": user, "resposta": "olá" }).to_string(),
        ))
        .unwrap();
    let (status, body) = h.call(request).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["sender"], "assistant");

    let thread = h.thread(user);
    assert_eq!(thread.len(), 2);
    assert_eq!(thread[1].content(), "olá");
}

#[tokio::test]
async fn test_callback_rejects_bad_secret_and_unknown_profile() {
    let h = Harness::new(StubProcessor::acknowledging()).await;
    let user = h.user(true);

    let request = Request::builder()
        .method("POST")
        .uri("/webhook/response")
        .header("authorization", "Bearer wrong")
        .header("content-type", "application/json")
        .body(Body::from(json!({ "UserId": user, "response": "x" }).to_string()))
        .unwrap();
    let (status, _) = h.call(request).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert!(h.thread(user).is_empty());

    let stranger = UserId(Uuid::new_v4());
    let err = receive_reply(
        &h.state,
        CallbackPayload {
            user_id: stranger,
            response: "x".into(),
            openai_thread_id: None,
        },
    )
    .unwrap_err();
    assert!(matches!(err, ServerError::NotFound(_)));
}

// ---------------------------------------------------------------------------
// History, profile, storage, admin
// ---------------------------------------------------------------------------

#[tokio::test]
async fn test_me_and_messages() {
    let h = Harness::new(StubProcessor::replying("hi")).await;
    let user = h.user(true);
    h.post_dispatch(user, text_request("hello")).await;

    let request = Request::builder()
        .uri("/me")
        .header("authorization", format!("Bearer {}", h.token(user)))
        .body(Body::empty())
        .unwrap();
    let (status, body) = h.call(request).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["subscription_active"], true);
    assert_eq!(body["nickname"], "Ana");

    let request = Request::builder()
        .uri("/messages")
        .header("authorization", format!("Bearer {}", h.token(user)))
        .body(Body::empty())
        .unwrap();
    let (status, body) = h.call(request).await;
    assert_eq!(status, StatusCode::OK);
    let messages: Vec<Message> = serde_json::from_value(body).unwrap();
    assert_eq!(messages.len(), 2);
    assert!(messages[0].created_at <= messages[1].created_at);
}

#[tokio::test]
async fn test_storage_round_trip() {
    let h = Harness::new(StubProcessor::acknowledging()).await;
    let user = h.user(true);
    let key = format!("{user}/1700000000000.png");

    let request = Request::builder()
        .method("PUT")
        .uri(format!("/storage/{key}"))
        .header("authorization", format!("Bearer {}", h.token(user)))
        .body(Body::from(vec![0x89, b'P', b'N', b'G']))
        .unwrap();
    let (status, body) = h.call(request).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["url"], format!("http://gateway.test/storage/{key}"));

    let response = h
        .app
        .clone()
        .oneshot(
            Request::builder()
                .uri(format!("/storage/{key}"))
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(response.headers()["content-type"], "image/png");
}

#[tokio::test]
async fn test_storage_is_namespaced_by_actor() {
    let h = Harness::new(StubProcessor::acknowledging()).await;
    let user = h.user(true);
    let other = UserId(Uuid::new_v4());

    let request = Request::builder()
        .method("PUT")
        .uri(format!("/storage/{other}/1.png"))
        .header("authorization", format!("Bearer {}", h.token(user)))
        .body(Body::from("data"))
        .unwrap();
    let (status, body) = h.call(request).await;
    assert_eq!(status, StatusCode::FORBIDDEN);
    assert_eq!(error_code(&body), ErrorCode::Forbidden);
}

#[tokio::test]
async fn test_admin_entitlement_and_soft_delete() {
    let h = Harness::new(StubProcessor::replying("hi")).await;
    let user = UserId(Uuid::new_v4());

    let grant = |token: &str| {
        Request::builder()
            .method("POST")
            .uri("/admin/entitlement")
            .header("authorization", format!("Bearer {token}"))
            .header("content-type", "application/json")
            .body(Body::from(
                json!({ "user_id": user, "subscription_active": true }).to_string(),
            ))
            .unwrap()
    };

    let (status, _) = h.call(grant("nope")).await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    let (status, body) = h.call(grant("admin-token")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["subscription_active"], true);

    let (status, body) = h.post_dispatch(user, text_request("hello")).await;
    assert_eq!(status, StatusCode::OK);
    let user_message_id = body["user_message"]["id"].as_str().unwrap().to_string();

    let request = Request::builder()
        .method("DELETE")
        .uri(format!("/admin/messages/{user_message_id}"))
        .header("authorization", "Bearer admin-token")
        .body(Body::empty())
        .unwrap();
    let (status, _) = h.call(request).await;
    assert_eq!(status, StatusCode::OK);

    let thread = h.thread(user);
    assert_eq!(thread.len(), 1);
    assert_eq!(thread[0].sender, Sender::Assistant);
}

// ---------------------------------------------------------------------------
// Realtime websocket
// ---------------------------------------------------------------------------

#[tokio::test]
async fn test_realtime_websocket_delivers_inserts() {
    let h = Harness::new(StubProcessor::replying("hi")).await;
    let user = h.user(true);

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let app = h.app.clone();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });

    let url = format!("ws://{addr}/realtime?access_token={}", h.token(user));
    let (mut socket, _) = tokio_tungstenite::connect_async(url).await.unwrap();

    let next_frame = |msg: tokio_tungstenite::tungstenite::Message| -> RealtimeFrame {
        serde_json::from_str(msg.to_text().unwrap()).unwrap()
    };

    let first = next_frame(socket.next().await.unwrap().unwrap());
    assert_eq!(
        first,
        RealtimeFrame::Subscribed {
            thread_id: user.thread()
        }
    );

    let (status, _) = h.post_dispatch(user, text_request("hello")).await;
    assert_eq!(status, StatusCode::OK);

    let mut senders = Vec::new();
    for _ in 0..2 {
        match next_frame(socket.next().await.unwrap().unwrap()) {
            RealtimeFrame::Insert { message } => senders.push(message.sender),
            other => panic!("unexpected frame {other:?}"),
        }
    }
    assert_eq!(senders, vec![Sender::User, Sender::Assistant]);
}

#[tokio::test]
async fn test_realtime_rejects_bad_token() {
    let h = Harness::new(StubProcessor::replying("hi")).await;

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let app = h.app.clone();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });

    let url = format!("ws://{addr}/realtime?access_token=bogus");
    assert!(tokio_tungstenite::connect_async(url).await.is_err());
}
