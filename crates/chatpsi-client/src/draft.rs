use chatpsi_shared::constants::DEFAULT_ATTACHMENT_LABEL;
use chatpsi_shared::MessageBody;

use crate::uploader::UploadedFile;

/// What the user is about to send.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Draft {
    body: MessageBody,
}

impl Draft {
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            body: MessageBody::text(text.into().trim()),
        }
    }

    /// Attachment message.  The bubble label is the caption, else the
    /// original filename, else a generic placeholder.
    pub fn from_upload(file: &UploadedFile, caption: Option<&str>) -> Self {
        let label = caption
            .map(str::trim)
            .filter(|c| !c.is_empty())
            .or_else(|| Some(file.name.trim()).filter(|n| !n.is_empty()))
            .unwrap_or(DEFAULT_ATTACHMENT_LABEL);
        Self {
            body: MessageBody::attachment(file.kind, label, file.url.clone()),
        }
    }

    pub fn is_empty(&self) -> bool {
        match &self.body {
            MessageBody::Text { text } => text.is_empty(),
            other => other.media_url().map_or(true, str::is_empty),
        }
    }

    pub fn body(&self) -> &MessageBody {
        &self.body
    }

    pub fn into_body(self) -> MessageBody {
        self.body
    }
}
