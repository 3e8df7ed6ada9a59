/// Application name
pub const APP_NAME: &str = "ChatPsi";

/// Maximum attachment size in bytes (25 MiB)
pub const MAX_UPLOAD_SIZE: usize = 25 * 1024 * 1024;

/// How long the client waits for an assistant reply before re-fetching
pub const RESPONSE_TIMEOUT_SECS: u64 = 120;

/// Ceiling for the "assistant is typing" indicator
pub const TYPING_TIMEOUT_SECS: u64 = 120;

/// Fixed delay between realtime reconnect attempts
pub const RECONNECT_BACKOFF_SECS: u64 = 5;

/// Realtime subscribe handshake must complete within this window
pub const SUBSCRIBE_TIMEOUT_SECS: u64 = 10;

/// Default HTTP API port (gateway)
pub const DEFAULT_HTTP_PORT: u16 = 8080;

/// Label stored for attachment messages sent without caption or filename
pub const DEFAULT_ATTACHMENT_LABEL: &str = "File sent";

/// Buffered realtime inserts per thread before a subscriber is considered lagging
pub const REALTIME_BUFFER: usize = 64;
