//! Client configuration.

use std::fmt;
use std::time::Duration;

use chatpsi_shared::constants::{
    DEFAULT_HTTP_PORT, MAX_UPLOAD_SIZE, RECONNECT_BACKOFF_SECS, RESPONSE_TIMEOUT_SECS,
    SUBSCRIBE_TIMEOUT_SECS, TYPING_TIMEOUT_SECS,
};

/// Timing and UX knobs of a chat session.
#[derive(Debug, Clone, PartialEq)]
pub struct SessionConfig {
    /// How long to wait for the assistant before re-fetching the thread.
    pub response_timeout: Duration,
    /// Ceiling after which the typing indicator clears itself.
    pub typing_timeout: Duration,
    /// Delay between realtime reconnect attempts.
    pub reconnect_backoff: Duration,
    /// The subscribe handshake must complete within this window.
    pub subscribe_timeout: Duration,
    /// Consecutive realtime failures before `ConnectionLost` is surfaced.
    pub connection_lost_after: u32,
    /// Distance from the bottom (px) still considered "at the latest message".
    pub scroll_threshold: f64,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            response_timeout: Duration::from_secs(RESPONSE_TIMEOUT_SECS),
            typing_timeout: Duration::from_secs(TYPING_TIMEOUT_SECS),
            reconnect_backoff: Duration::from_secs(RECONNECT_BACKOFF_SECS),
            subscribe_timeout: Duration::from_secs(SUBSCRIBE_TIMEOUT_SECS),
            connection_lost_after: 3,
            scroll_threshold: 100.0,
        }
    }
}

/// Where the gateway lives and how to authenticate against it.
#[derive(Clone)]
pub struct ClientConfig {
    /// Gateway base URL.
    /// Env: `CHATPSI_BASE_URL`
    /// Default: `http://localhost:8080`
    pub base_url: String,

    /// Realtime websocket endpoint, derived from `base_url`.
    pub realtime_url: String,

    /// Bearer access token issued by the identity provider.
    /// Env: `CHATPSI_ACCESS_TOKEN`
    pub access_token: Option<String>,

    /// Maximum attachment size accepted by the uploader.
    pub max_upload_size: usize,

    pub session: SessionConfig,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self::new(format!("http://localhost:{DEFAULT_HTTP_PORT}"), None)
    }
}

impl ClientConfig {
    pub fn new(base_url: impl Into<String>, access_token: Option<String>) -> Self {
        let base_url = base_url.into().trim_end_matches('/').to_string();
        Self {
            realtime_url: realtime_url_for(&base_url),
            base_url,
            access_token,
            max_upload_size: MAX_UPLOAD_SIZE,
            session: SessionConfig::default(),
        }
    }

    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(var: impl Fn(&str) -> Option<String>) -> Self {
        let mut config = Self::default();

        if let Some(url) = non_empty(var("CHATPSI_BASE_URL")) {
            if url.starts_with("http://") || url.starts_with("https://") {
                config = Self::new(url, None);
            } else {
                tracing::warn!(value = %url, "Invalid CHATPSI_BASE_URL, using default");
            }
        }

        config.access_token = non_empty(var("CHATPSI_ACCESS_TOKEN"));
        config
    }
}

impl fmt::Debug for ClientConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ClientConfig")
            .field("base_url", &self.base_url)
            .field("realtime_url", &self.realtime_url)
            .field(
                "access_token",
                &if self.access_token.is_some() { "<set>" } else { "<unset>" },
            )
            .field("max_upload_size", &self.max_upload_size)
            .field("session", &self.session)
            .finish()
    }
}

fn realtime_url_for(base_url: &str) -> String {
    let ws = if let Some(rest) = base_url.strip_prefix("https://") {
        format!("wss://{rest}")
    } else if let Some(rest) = base_url.strip_prefix("http://") {
        format!("ws://{rest}")
    } else {
        base_url.to_string()
    };
    format!("{ws}/realtime")
}

fn non_empty(value: Option<String>) -> Option<String> {
    value.map(|v| v.trim().to_string()).filter(|v| !v.is_empty())
}
