//! The canonical chat message.
//!
//! Every component (gateway, store, realtime push, client timeline) handles
//! the same [`Message`] struct.  The payload is a tagged union so that code
//! matching on it is exhaustive instead of probing optional fields.

use chrono::{DateTime, SubsecRound, Utc};
use serde::{Deserialize, Serialize};

use crate::types::{AttachmentKind, ClientRef, MessageId, MessageKind, Sender, ThreadId, UserId};

/// Reference to an uploaded object plus the label shown in its bubble.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Media {
    /// Caption or original filename.
    pub label: String,
    /// Publicly resolvable URL of the stored object.
    pub url: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum MessageBody {
    Text { text: String },
    Audio(Media),
    Image(Media),
    Video(Media),
    Document(Media),
}

impl MessageBody {
    pub fn text(text: impl Into<String>) -> Self {
        MessageBody::Text { text: text.into() }
    }

    pub fn attachment(kind: AttachmentKind, label: impl Into<String>, url: impl Into<String>) -> Self {
        let media = Media {
            label: label.into(),
            url: url.into(),
        };
        match kind {
            AttachmentKind::Audio => MessageBody::Audio(media),
            AttachmentKind::Image => MessageBody::Image(media),
            AttachmentKind::Video => MessageBody::Video(media),
            AttachmentKind::Document => MessageBody::Document(media),
        }
    }

    /// Rebuild a body from the flat `(type, content, media_url)` columns.
    pub fn from_parts(
        kind: MessageKind,
        content: String,
        media_url: Option<String>,
    ) -> Result<Self, String> {
        match kind.attachment() {
            None => Ok(MessageBody::Text { text: content }),
            Some(attachment) => {
                let url = media_url
                    .filter(|u| !u.is_empty())
                    .ok_or_else(|| format!("{} message without media_url", kind.as_str()))?;
                Ok(Self::attachment(attachment, content, url))
            }
        }
    }

    pub fn kind(&self) -> MessageKind {
        match self {
            MessageBody::Text { .. } => MessageKind::Text,
            MessageBody::Audio(_) => MessageKind::Audio,
            MessageBody::Image(_) => MessageKind::Image,
            MessageBody::Video(_) => MessageKind::Video,
            MessageBody::Document(_) => MessageKind::Document,
        }
    }

    /// Text payload, or the display label for attachments.
    pub fn content(&self) -> &str {
        match self {
            MessageBody::Text { text } => text,
            MessageBody::Audio(m)
            | MessageBody::Image(m)
            | MessageBody::Video(m)
            | MessageBody::Document(m) => &m.label,
        }
    }

    pub fn media_url(&self) -> Option<&str> {
        match self {
            MessageBody::Text { .. } => None,
            MessageBody::Audio(m)
            | MessageBody::Image(m)
            | MessageBody::Video(m)
            | MessageBody::Document(m) => Some(&m.url),
        }
    }
}

/// A single chat message in a user's thread.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Message {
    pub id: MessageId,
    pub thread_id: ThreadId,
    /// Owner of the thread (also the author of `Sender::User` rows).
    pub user_id: UserId,
    pub sender: Sender,
    pub body: MessageBody,
    /// Server timestamp, microsecond precision.  Defines thread ordering.
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub is_deleted: bool,
    /// Echo of the client's temporary id for user-authored rows.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub client_ref: Option<ClientRef>,
}

impl Message {
    /// Build a new row for `owner`'s thread, stamped now.
    pub fn new(owner: UserId, sender: Sender, body: MessageBody) -> Self {
        Self {
            id: MessageId::new(),
            thread_id: owner.thread(),
            user_id: owner,
            sender,
            body,
            created_at: now_micros(),
            is_deleted: false,
            client_ref: None,
        }
    }

    pub fn with_client_ref(mut self, client_ref: Option<ClientRef>) -> Self {
        self.client_ref = client_ref;
        self
    }

    pub fn kind(&self) -> MessageKind {
        self.body.kind()
    }

    pub fn content(&self) -> &str {
        self.body.content()
    }
}

/// Current time truncated to what the store persists.
pub fn now_micros() -> DateTime<Utc> {
    Utc::now().trunc_subsecs(6)
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    #[test]
    fn body_serializes_with_kind_tag() {
        let body = MessageBody::attachment(AttachmentKind::Image, "photo.heic", "https://x/y");
        let json = serde_json::to_value(&body).unwrap();
        assert_eq!(json["kind"], "image");
        assert_eq!(json["label"], "photo.heic");
        assert_eq!(json["url"], "https://x/y");

        let text = serde_json::to_value(MessageBody::text("hello")).unwrap();
        assert_eq!(text["kind"], "text");
        assert_eq!(text["text"], "hello");
    }

    #[test]
    fn from_parts_requires_media_for_attachments() {
        assert!(MessageBody::from_parts(MessageKind::Audio, "a.ogg".into(), None).is_err());
        assert!(
            MessageBody::from_parts(MessageKind::Audio, "a.ogg".into(), Some(String::new()))
                .is_err()
        );

        let body =
            MessageBody::from_parts(MessageKind::Video, "clip".into(), Some("u".into())).unwrap();
        assert_eq!(body.kind(), MessageKind::Video);
        assert_eq!(body.media_url(), Some("u"));
        assert_eq!(body.content(), "clip");
    }

    #[test]
    fn new_message_lives_in_owner_thread() {
        let owner = UserId(Uuid::new_v4());
        let msg = Message::new(owner, Sender::User, MessageBody::text("hi"));
        assert_eq!(msg.thread_id, owner.thread());
        assert!(!msg.is_deleted);
        assert_eq!(msg.created_at.timestamp_subsec_nanos() % 1_000, 0);
    }
}
