//! Dispatch Gateway: persist the user's message, forward it to the AI
//! processor and return the reply when it comes back inline.  Also hosts the
//! callback endpoint through which asynchronous replies arrive.

use axum::extract::State;
use axum::http::HeaderMap;
use axum::Json;
use tracing::{info, warn};

use chatpsi_shared::protocol::{CallbackPayload, DispatchRequest, DispatchResponse, ProcessorPayload};
use chatpsi_shared::{Message, MessageBody, Sender, UserId};
use chatpsi_store::{NewWebhookEvent, WebhookDirection};

use crate::api::AppState;
use crate::auth::{verify_webhook_secret, Actor};
use crate::error::ServerError;

/// `POST /dispatch`
pub async fn dispatch_handler(
    State(state): State<AppState>,
    actor: Actor,
    Json(request): Json<DispatchRequest>,
) -> Result<Json<DispatchResponse>, ServerError> {
    dispatch(&state, actor, request).await.map(Json)
}

pub async fn dispatch(
    state: &AppState,
    actor: Actor,
    request: DispatchRequest,
) -> Result<DispatchResponse, ServerError> {
    let user = actor.user_id;

    // Nothing below may run for an actor without entitlement.
    let profile = state
        .log
        .profile(user)
        .map_err(|e| ServerError::Internal(e.to_string()))?
        .filter(|p| p.subscription_active)
        .ok_or(ServerError::EntitlementRequired)?;

    if !state.limiter.check(user).await {
        warn!(user = %user, "Dispatch rate limit exceeded");
        return Err(ServerError::RateLimited);
    }

    let body = request.to_body().map_err(ServerError::BadRequest)?;

    let user_message = Message::new(user, Sender::User, body).with_client_ref(request.client_ref);
    state
        .log
        .append(&user_message)
        .map_err(|e| ServerError::PersistenceFailed(e.to_string()))?;

    info!(
        user = %user,
        msg_id = %user_message.id,
        kind = user_message.kind().as_str(),
        "User message persisted, forwarding to processor"
    );

    let payload = ProcessorPayload::for_message(user, &user_message.body)
        .with_profile(profile.nickname, profile.openai_thread_id);
    let payload_json = serde_json::to_value(&payload).unwrap_or_default();

    let outcome = match state.processor.forward(&payload).await {
        Ok(outcome) => {
            state.log.audit(NewWebhookEvent {
                direction: WebhookDirection::Outbound,
                user_id: Some(user),
                payload: payload_json,
                status_code: outcome.status,
                error: None,
            });
            outcome
        }
        Err(e) => {
            warn!(user = %user, msg_id = %user_message.id, error = %e, "Processor dispatch failed");
            state.log.audit(NewWebhookEvent {
                direction: WebhookDirection::Outbound,
                user_id: Some(user),
                payload: payload_json,
                status_code: e.status_code(),
                error: Some(e.to_string()),
            });
            // The user row stays; the caller decides whether to resend.
            return Err(ServerError::UpstreamDispatchFailed(e.to_string()));
        }
    };

    let reply = match outcome.reply {
        Some(text) => Some(persist_reply(state, user, text)),
        None => {
            info!(user = %user, "Processor acknowledged, reply will arrive via callback");
            None
        }
    };

    Ok(DispatchResponse {
        user_message,
        reply,
        client_ref: request.client_ref,
    })
}

/// Store an inline reply.  A failed insert is logged and the reply is still
/// returned to the caller.
fn persist_reply(state: &AppState, user: UserId, text: String) -> Message {
    let reply = Message::new(user, Sender::Assistant, MessageBody::text(text));
    if let Err(e) = state.log.append(&reply) {
        warn!(user = %user, error = %e, "Failed to persist assistant reply");
    }
    reply
}

/// `POST /webhook/response`
pub async fn receive_reply_handler(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(payload): Json<CallbackPayload>,
) -> Result<Json<Message>, ServerError> {
    verify_webhook_secret(&headers, &state.config)?;
    receive_reply(&state, payload).map(Json)
}

pub fn receive_reply(state: &AppState, payload: CallbackPayload) -> Result<Message, ServerError> {
    let user = payload.user_id;

    state.log.audit(NewWebhookEvent {
        direction: WebhookDirection::Inbound,
        user_id: Some(user),
        payload: serde_json::to_value(&payload).unwrap_or_default(),
        status_code: 200,
        error: None,
    });

    if state.log.profile(user)?.is_none() {
        return Err(ServerError::NotFound(format!("profile {user}")));
    }

    let text = payload.response.trim();
    if text.is_empty() {
        return Err(ServerError::BadRequest("empty response".into()));
    }

    let reply = Message::new(user, Sender::Assistant, MessageBody::text(text));
    state
        .log
        .append(&reply)
        .map_err(|e| ServerError::PersistenceFailed(e.to_string()))?;

    info!(user = %user, msg_id = %reply.id, "Asynchronous reply stored");
    Ok(reply)
}
