//! JSON wire contracts between the client, the gateway and the external AI
//! processor.

use serde::{Deserialize, Serialize};

use crate::constants::DEFAULT_ATTACHMENT_LABEL;
use crate::message::{Message, MessageBody};
use crate::types::{ClientRef, MessageKind, ThreadId, UserId};

// ---------------------------------------------------------------------------
// Client <-> gateway
// ---------------------------------------------------------------------------

/// Body of `POST /dispatch`.  The actor comes from the bearer token, never
/// from here.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct DispatchRequest {
    pub kind: MessageKind,
    /// Message text, or the caption of an attachment.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub media_url: Option<String>,
    /// Original filename of the attachment.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub client_ref: Option<ClientRef>,
}

impl DispatchRequest {
    pub fn from_body(body: &MessageBody, client_ref: Option<ClientRef>) -> Self {
        match body {
            MessageBody::Text { text } => Self {
                kind: MessageKind::Text,
                text: Some(text.clone()),
                media_url: None,
                label: None,
                client_ref,
            },
            MessageBody::Audio(m)
            | MessageBody::Image(m)
            | MessageBody::Video(m)
            | MessageBody::Document(m) => Self {
                kind: body.kind(),
                text: None,
                media_url: Some(m.url.clone()),
                label: Some(m.label.clone()),
                client_ref,
            },
        }
    }

    /// Validate the request and turn it into the body that gets persisted.
    pub fn to_body(&self) -> Result<MessageBody, String> {
        let text = self
            .text
            .as_deref()
            .map(str::trim)
            .filter(|t| !t.is_empty());

        match self.kind.attachment() {
            None => {
                let text = text.ok_or_else(|| "text message without text".to_string())?;
                Ok(MessageBody::text(text))
            }
            Some(kind) => {
                let url = self
                    .media_url
                    .as_deref()
                    .map(str::trim)
                    .filter(|u| !u.is_empty())
                    .ok_or_else(|| format!("{} message without media_url", self.kind.as_str()))?;
                let label = text
                    .or_else(|| self.label.as_deref().filter(|l| !l.trim().is_empty()))
                    .unwrap_or(DEFAULT_ATTACHMENT_LABEL);
                Ok(MessageBody::attachment(kind, label, url))
            }
        }
    }
}

/// Response of `POST /dispatch`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct DispatchResponse {
    /// The persisted user row (carries the server id).
    pub user_message: Message,
    /// Assistant row when the processor answered inline.
    #[serde(default)]
    pub reply: Option<Message>,
    #[serde(default)]
    pub client_ref: Option<ClientRef>,
}

/// Response of `GET /me`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ProfileResponse {
    pub user_id: UserId,
    pub nickname: Option<String>,
    pub subscription_active: bool,
}

/// Response of `PUT /storage/{path}`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct UploadResponse {
    pub url: String,
}

/// Body of `POST /admin/entitlement`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct EntitlementUpdate {
    pub user_id: UserId,
    pub subscription_active: bool,
    #[serde(default)]
    pub nickname: Option<String>,
}

/// Frames pushed on the realtime websocket.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum RealtimeFrame {
    Subscribed { thread_id: ThreadId },
    Insert { message: Message },
    Error { reason: String },
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCode {
    EntitlementRequired,
    UpstreamDispatchFailed,
    PersistenceFailed,
    FileTooLarge,
    UnsupportedFormat,
    Unauthorized,
    Forbidden,
    NotFound,
    BadRequest,
    RateLimited,
    Internal,
}

/// JSON error body returned by every failing gateway endpoint.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ErrorBody {
    pub error: String,
    pub code: ErrorCode,
}

// ---------------------------------------------------------------------------
// Gateway <-> external AI processor
// ---------------------------------------------------------------------------

/// Payload POSTed to the AI processor.  Field names follow the processor's
/// existing contract; exactly one of the five payload fields is populated.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ProcessorPayload {
    #[serde(rename = "UserId")]
    pub user_id: UserId,
    #[serde(rename = "tipodemensagem")]
    pub kind: MessageKind,
    #[serde(rename = "texto")]
    pub text: Option<String>,
    pub audio: Option<String>,
    #[serde(rename = "imagem")]
    pub image: Option<String>,
    pub video: Option<String>,
    #[serde(rename = "documento")]
    pub document: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub nickname: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub openai_thread_id: Option<String>,
}

impl ProcessorPayload {
    pub fn for_message(user_id: UserId, body: &MessageBody) -> Self {
        let mut payload = Self {
            user_id,
            kind: body.kind(),
            text: None,
            audio: None,
            image: None,
            video: None,
            document: None,
            nickname: None,
            openai_thread_id: None,
        };
        match body {
            MessageBody::Text { text } => payload.text = Some(text.clone()),
            MessageBody::Audio(m) => payload.audio = Some(m.url.clone()),
            MessageBody::Image(m) => payload.image = Some(m.url.clone()),
            MessageBody::Video(m) => payload.video = Some(m.url.clone()),
            MessageBody::Document(m) => payload.document = Some(m.url.clone()),
        }
        payload
    }

    pub fn with_profile(mut self, nickname: Option<String>, openai_thread_id: Option<String>) -> Self {
        self.nickname = nickname;
        self.openai_thread_id = openai_thread_id;
        self
    }

    /// Number of non-null payload fields (always 1 for well-formed payloads).
    pub fn populated_fields(&self) -> usize {
        [
            &self.text,
            &self.audio,
            &self.image,
            &self.video,
            &self.document,
        ]
        .iter()
        .filter(|f| f.is_some())
        .count()
    }
}

/// Synchronous processor answer.  A missing `response` means the reply will
/// be delivered later through the callback endpoint.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct ProcessorReply {
    #[serde(default)]
    pub response: Option<String>,
}

/// Body of the asynchronous reply callback (`POST /webhook/response`).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct CallbackPayload {
    #[serde(rename = "UserId")]
    pub user_id: UserId,
    #[serde(alias = "resposta")]
    pub response: String,
    #[serde(default)]
    pub openai_thread_id: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::AttachmentKind;
    use uuid::Uuid;

    #[test]
    fn processor_payload_populates_exactly_one_field() {
        let user = UserId(Uuid::new_v4());
        let bodies = [
            MessageBody::text("hello"),
            MessageBody::attachment(AttachmentKind::Audio, "a.webm", "u1"),
            MessageBody::attachment(AttachmentKind::Image, "i.png", "u2"),
            MessageBody::attachment(AttachmentKind::Video, "v.mp4", "u3"),
            MessageBody::attachment(AttachmentKind::Document, "d.pdf", "u4"),
        ];
        for body in &bodies {
            let payload = ProcessorPayload::for_message(user, body);
            assert_eq!(payload.populated_fields(), 1, "{:?}", body.kind());
            assert_eq!(payload.kind, body.kind());
        }
    }

    #[test]
    fn processor_payload_uses_processor_field_names() {
        let user = UserId(Uuid::new_v4());
        let payload = ProcessorPayload::for_message(
            user,
            &MessageBody::attachment(AttachmentKind::Image, "x.jpg", "https://img"),
        );
        let json = serde_json::to_value(&payload).unwrap();
        assert_eq!(json["UserId"], user.to_string());
        assert_eq!(json["tipodemensagem"], "image");
        assert_eq!(json["imagem"], "https://img");
        assert!(json["texto"].is_null());
        assert!(json.get("nickname").is_none());
    }

    #[test]
    fn dispatch_request_validation() {
        let empty = DispatchRequest {
            kind: MessageKind::Text,
            text: Some("   ".into()),
            media_url: None,
            label: None,
            client_ref: None,
        };
        assert!(empty.to_body().is_err());

        let no_media = DispatchRequest {
            kind: MessageKind::Document,
            text: None,
            media_url: None,
            label: Some("cv.pdf".into()),
            client_ref: None,
        };
        assert!(no_media.to_body().is_err());

        let unlabeled = DispatchRequest {
            kind: MessageKind::Document,
            text: None,
            media_url: Some("https://doc".into()),
            label: None,
            client_ref: None,
        };
        assert_eq!(unlabeled.to_body().unwrap().content(), DEFAULT_ATTACHMENT_LABEL);
    }

    #[test]
    fn dispatch_request_round_trips_body() {
        let body = MessageBody::attachment(AttachmentKind::Audio, "note.wav", "https://a");
        let request = DispatchRequest::from_body(&body, Some(ClientRef::new()));
        assert_eq!(request.to_body().unwrap(), body);
    }

    #[test]
    fn callback_accepts_legacy_field_name() {
        let user = Uuid::new_v4();
        let json = format!(r#"{{"UserId":"{user}","resposta":"olá"}}"#);
        let payload: CallbackPayload = serde_json::from_str(&json).unwrap();
        assert_eq!(payload.response, "olá");
    }

    #[test]
    fn unknown_kind_is_rejected() {
        let err = serde_json::from_str::<DispatchRequest>(r#"{"kind":"sticker","text":"x"}"#);
        assert!(err.is_err());
    }
}
