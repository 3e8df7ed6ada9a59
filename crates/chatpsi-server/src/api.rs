use std::sync::Arc;

use axum::{
    body::Bytes,
    extract::{DefaultBodyLimit, Path, State},
    http::{header, HeaderMap, Method},
    response::IntoResponse,
    routing::{delete, get, post},
    Json, Router,
};
use serde::Serialize;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::info;
use uuid::Uuid;

use chatpsi_shared::protocol::{EntitlementUpdate, ProfileResponse, UploadResponse};
use chatpsi_shared::{Message, MessageId};
use chatpsi_store::Profile;

use crate::auth::{verify_admin_token, Actor};
use crate::config::ServerConfig;
use crate::dispatch::{dispatch_handler, receive_reply_handler};
use crate::error::ServerError;
use crate::message_log::MessageLog;
use crate::object_store::ObjectStore;
use crate::processor::AiProcessor;
use crate::rate_limit::RateLimiter;
use crate::realtime::realtime_handler;

#[derive(Clone)]
pub struct AppState {
    pub log: MessageLog,
    pub objects: Arc<ObjectStore>,
    pub processor: Arc<dyn AiProcessor>,
    pub limiter: RateLimiter,
    pub config: Arc<ServerConfig>,
}

pub fn build_router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([
            Method::GET,
            Method::POST,
            Method::PUT,
            Method::DELETE,
            Method::OPTIONS,
        ])
        .allow_headers(Any);

    // Room for multipart-free uploads right at the limit.
    let body_limit = state.config.max_upload_size + 64 * 1024;

    Router::new()
        .route("/health", get(health_check))
        .route("/me", get(me))
        .route("/messages", get(list_messages))
        .route("/dispatch", post(dispatch_handler))
        .route("/webhook/response", post(receive_reply_handler))
        .route("/realtime", get(realtime_handler))
        .route("/storage/{*key}", get(storage_get).put(storage_put))
        .route("/admin/entitlement", post(admin_entitlement))
        .route("/admin/messages/{id}", delete(admin_delete_message))
        .layer(DefaultBodyLimit::max(body_limit))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    version: &'static str,
}

async fn health_check() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
    })
}

async fn me(State(state): State<AppState>, actor: Actor) -> Result<Json<ProfileResponse>, ServerError> {
    let profile = state.log.profile(actor.user_id)?;
    Ok(Json(ProfileResponse {
        user_id: actor.user_id,
        nickname: profile.as_ref().and_then(|p| p.nickname.clone()),
        subscription_active: profile.map(|p| p.subscription_active).unwrap_or(false),
    }))
}

async fn list_messages(
    State(state): State<AppState>,
    actor: Actor,
) -> Result<Json<Vec<Message>>, ServerError> {
    let messages = state.log.thread(actor.user_id.thread())?;
    Ok(Json(messages))
}

async fn storage_put(
    State(state): State<AppState>,
    actor: Actor,
    Path(key): Path<String>,
    body: Bytes,
) -> Result<Json<UploadResponse>, ServerError> {
    // Each actor writes only under its own prefix.
    let prefix = format!("{}/", actor.user_id);
    if !key.starts_with(&prefix) {
        return Err(ServerError::Forbidden(format!(
            "object key must start with {prefix}"
        )));
    }

    let url = state.objects.put(&key, &body).await?;
    info!(user = %actor.user_id, key = %key, size = body.len(), "Attachment stored");
    Ok(Json(UploadResponse { url }))
}

async fn storage_get(
    State(state): State<AppState>,
    Path(key): Path<String>,
) -> Result<impl IntoResponse, ServerError> {
    let data = state.objects.get(&key).await?;
    let mime = mime_guess::from_path(&key).first_or_octet_stream();
    Ok(([(header::CONTENT_TYPE, mime.to_string())], data))
}

async fn admin_entitlement(
    headers: HeaderMap,
    State(state): State<AppState>,
    Json(req): Json<EntitlementUpdate>,
) -> Result<Json<ProfileResponse>, ServerError> {
    verify_admin_token(&headers, &state.config)?;

    let mut profile = state
        .log
        .profile(req.user_id)?
        .unwrap_or_else(|| Profile::new(req.user_id));
    profile.subscription_active = req.subscription_active;
    if req.nickname.is_some() {
        profile.nickname = req.nickname;
    }
    profile.updated_at = chatpsi_shared::message::now_micros();
    state.log.upsert_profile(&profile)?;

    info!(
        user = %req.user_id,
        active = req.subscription_active,
        "Admin updated entitlement"
    );
    Ok(Json(ProfileResponse {
        user_id: profile.user_id,
        nickname: profile.nickname,
        subscription_active: profile.subscription_active,
    }))
}

async fn admin_delete_message(
    headers: HeaderMap,
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<serde_json::Value>, ServerError> {
    verify_admin_token(&headers, &state.config)?;

    if !state.log.soft_delete(MessageId(id))? {
        return Err(ServerError::NotFound(format!("message {id}")));
    }

    info!(msg_id = %id, "Admin soft-deleted message");
    Ok(Json(serde_json::json!({ "deleted": true })))
}

pub async fn serve(state: AppState, addr: std::net::SocketAddr) -> anyhow::Result<()> {
    let app = build_router(state);

    info!(addr = %addr, "Starting HTTP API server");

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}

#[cfg(test)]
mod tests;
