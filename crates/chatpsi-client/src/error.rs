use chatpsi_shared::protocol::ErrorCode;
use thiserror::Error;

/// Failure talking to the gateway or the realtime channel.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ClientError {
    #[error("An active subscription is required")]
    EntitlementRequired,

    #[error("Message saved but the assistant could not be reached: {0}")]
    UpstreamDispatchFailed(String),

    #[error("Message could not be saved: {0}")]
    PersistenceFailed(String),

    #[error("Not authenticated: {0}")]
    Unauthorized(String),

    #[error("Too many messages, slow down")]
    RateLimited,

    #[error("Request rejected ({code:?}): {message}")]
    Rejected { code: ErrorCode, message: String },

    #[error("Network error: {0}")]
    Transport(String),

    #[error("Timed out: {0}")]
    Timeout(String),

    #[error("Unexpected response: {0}")]
    Decode(String),
}

impl ClientError {
    /// Map a gateway error body onto the client taxonomy.
    pub fn from_code(code: ErrorCode, message: String) -> Self {
        match code {
            ErrorCode::EntitlementRequired => ClientError::EntitlementRequired,
            ErrorCode::UpstreamDispatchFailed => ClientError::UpstreamDispatchFailed(message),
            ErrorCode::PersistenceFailed => ClientError::PersistenceFailed(message),
            ErrorCode::Unauthorized => ClientError::Unauthorized(message),
            ErrorCode::RateLimited => ClientError::RateLimited,
            code => ClientError::Rejected { code, message },
        }
    }
}

impl From<reqwest::Error> for ClientError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            ClientError::Timeout(e.to_string())
        } else if e.is_decode() {
            ClientError::Decode(e.to_string())
        } else {
            ClientError::Transport(e.to_string())
        }
    }
}

impl From<tokio_tungstenite::tungstenite::Error> for ClientError {
    fn from(e: tokio_tungstenite::tungstenite::Error) -> Self {
        use tokio_tungstenite::tungstenite::Error as WsError;
        match e {
            WsError::Http(response) if response.status() == 401 => {
                ClientError::Unauthorized("realtime handshake rejected".into())
            }
            other => ClientError::Transport(other.to_string()),
        }
    }
}

/// Why a send was refused before anything left the device.
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum SendError {
    #[error("An active subscription is required")]
    EntitlementRequired,

    #[error("Still waiting for the previous reply")]
    AwaitingReply,

    #[error("Nothing to send")]
    Empty,

    #[error("Chat session is closed")]
    Closed,
}

#[derive(Debug, Error)]
pub enum UploadError {
    #[error("File too large: {size} bytes (max {max})")]
    FileTooLarge { size: usize, max: usize },

    #[error("Unsupported {kind} format: {name} ({mime})")]
    UnsupportedFormat {
        kind: &'static str,
        name: String,
        mime: String,
    },

    #[error("Upload failed: {0}")]
    Storage(#[from] ClientError),

    #[error("Could not read file: {0}")]
    Io(#[from] std::io::Error),
}
