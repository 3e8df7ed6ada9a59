//! Attachment uploader: size check, classification, allow-lists, then one
//! object write under the actor's namespace.

use std::path::Path;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;

use bytes::Bytes;
use chrono::Utc;
use tracing::{debug, info};

use chatpsi_media::Recording;
use chatpsi_shared::constants::MAX_UPLOAD_SIZE;
use chatpsi_shared::{AttachmentKind, UserId};

use crate::error::UploadError;
use crate::seams::ObjectStorage;

// Extensions whose MIME type some platforms misreport.
const IMAGE_EXTENSIONS_FIRST: &[&str] = &["heic", "heif"];
const AUDIO_EXTENSIONS_FIRST: &[&str] = &["ogg", "mp3", "m4a", "wav", "opus"];

const AUDIO_MIME_ALLOWED: &[&str] = &[
    "audio/mpeg",
    "audio/mp3",
    "audio/ogg",
    "application/ogg",
    "audio/wav",
    "audio/x-wav",
    "audio/mp4",
    "audio/x-m4a",
    "audio/webm",
    "audio/webm;codecs=opus",
];
const AUDIO_EXTENSIONS_ALLOWED: &[&str] = &["mp3", "ogg", "wav", "m4a", "webm"];

const IMAGE_MIME_ALLOWED: &[&str] = &[
    "image/jpeg",
    "image/png",
    "image/gif",
    "image/webp",
    "image/heic",
    "image/heif",
];
const IMAGE_EXTENSIONS_ALLOWED: &[&str] = &["jpg", "jpeg", "png", "gif", "webp", "heic", "heif"];

/// A file picked or recorded by the user.
#[derive(Debug, Clone)]
pub struct FileUpload {
    pub name: String,
    /// As reported by the platform; may be empty or generic.
    pub mime: String,
    pub data: Bytes,
}

impl FileUpload {
    pub fn new(name: impl Into<String>, mime: impl Into<String>, data: impl Into<Bytes>) -> Self {
        Self {
            name: name.into(),
            mime: mime.into(),
            data: data.into(),
        }
    }

    /// Read a file from disk, guessing its MIME type from the extension.
    pub async fn from_path(path: impl AsRef<Path>) -> Result<Self, UploadError> {
        let path = path.as_ref();
        let name = path
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or("unknown")
            .to_string();
        let data = tokio::fs::read(path).await?;
        let mime = mime_guess::from_path(path).first_or_octet_stream().to_string();
        Ok(Self::new(name, mime, data))
    }

    pub fn size(&self) -> usize {
        self.data.len()
    }

    /// Lowercased extension of the original filename.
    pub fn extension(&self) -> Option<String> {
        Path::new(&self.name)
            .extension()
            .and_then(|e| e.to_str())
            .map(str::to_ascii_lowercase)
            .filter(|e| !e.is_empty())
    }

    fn normalized_mime(&self) -> String {
        self.mime.trim().to_ascii_lowercase().replace("; ", ";")
    }
}

impl From<Recording> for FileUpload {
    fn from(recording: Recording) -> Self {
        Self::new(recording.file_name, recording.mime_type, recording.data)
    }
}

/// Result of a successful upload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadedFile {
    pub url: String,
    pub kind: AttachmentKind,
    /// Original filename.
    pub name: String,
}

/// Extension rules for ambiguous formats win over the reported MIME type.
pub fn classify(extension: Option<&str>, mime: &str) -> AttachmentKind {
    if let Some(ext) = extension {
        if IMAGE_EXTENSIONS_FIRST.contains(&ext) {
            return AttachmentKind::Image;
        }
        if AUDIO_EXTENSIONS_FIRST.contains(&ext) {
            return AttachmentKind::Audio;
        }
    }

    if mime.starts_with("audio/") || mime == "application/ogg" {
        AttachmentKind::Audio
    } else if mime.starts_with("image/") {
        AttachmentKind::Image
    } else if mime.starts_with("video/") {
        AttachmentKind::Video
    } else {
        AttachmentKind::Document
    }
}

fn is_allowed(kind: AttachmentKind, extension: Option<&str>, mime: &str) -> bool {
    let (mimes, extensions) = match kind {
        AttachmentKind::Audio => (AUDIO_MIME_ALLOWED, AUDIO_EXTENSIONS_ALLOWED),
        AttachmentKind::Image => (IMAGE_MIME_ALLOWED, IMAGE_EXTENSIONS_ALLOWED),
        AttachmentKind::Video | AttachmentKind::Document => return true,
    };
    mimes.contains(&mime) || extension.is_some_and(|ext| extensions.contains(&ext))
}

pub struct AttachmentUploader {
    storage: Arc<dyn ObjectStorage>,
    actor: UserId,
    max_size: usize,
    last_stamp: AtomicI64,
}

impl AttachmentUploader {
    pub fn new(storage: Arc<dyn ObjectStorage>, actor: UserId) -> Self {
        Self {
            storage,
            actor,
            max_size: MAX_UPLOAD_SIZE,
            last_stamp: AtomicI64::new(0),
        }
    }

    pub fn with_max_size(mut self, max_size: usize) -> Self {
        self.max_size = max_size;
        self
    }

    pub async fn upload(&self, file: FileUpload) -> Result<UploadedFile, UploadError> {
        if file.size() > self.max_size {
            return Err(UploadError::FileTooLarge {
                size: file.size(),
                max: self.max_size,
            });
        }

        let extension = file.extension();
        let mime = file.normalized_mime();
        let kind = classify(extension.as_deref(), &mime);
        if !is_allowed(kind, extension.as_deref(), &mime) {
            return Err(UploadError::UnsupportedFormat {
                kind: kind.as_str(),
                name: file.name,
                mime: file.mime,
            });
        }

        let path = format!(
            "{}/{}.{}",
            self.actor,
            self.next_stamp(),
            extension.as_deref().unwrap_or("bin")
        );
        let content_type = if mime.is_empty() {
            mime_guess::from_path(&file.name)
                .first_or_octet_stream()
                .to_string()
        } else {
            mime
        };
        debug!(path = %path, kind = kind.as_str(), size = file.size(), "Uploading attachment");

        let url = self.storage.put(&path, file.data, &content_type).await?;
        info!(path = %path, kind = kind.as_str(), "Attachment uploaded");

        Ok(UploadedFile {
            url,
            kind,
            name: file.name,
        })
    }

    /// Millisecond timestamp, strictly increasing per uploader.
    fn next_stamp(&self) -> i64 {
        let now = Utc::now().timestamp_millis();
        let mut last = self.last_stamp.load(Ordering::Relaxed);
        loop {
            let next = now.max(last + 1);
            match self.last_stamp.compare_exchange_weak(
                last,
                next,
                Ordering::Relaxed,
                Ordering::Relaxed,
            ) {
                Ok(_) => return next,
                Err(actual) => last = actual,
            }
        }
    }
}
