//! Gateway configuration loaded from environment variables.
//!
//! All settings have defaults so the gateway can start with zero
//! configuration for local development.

use std::fmt;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use chatpsi_shared::constants::{DEFAULT_HTTP_PORT, MAX_UPLOAD_SIZE};

/// Gateway configuration.
#[derive(Clone)]
pub struct ServerConfig {
    /// Socket address for the HTTP (axum) API server.
    /// Env: `HTTP_ADDR`
    /// Default: `0.0.0.0:8080`
    pub http_addr: SocketAddr,

    /// SQLite database file.
    /// Env: `DATABASE_PATH`
    /// Default: platform data directory.
    pub database_path: Option<PathBuf>,

    /// Directory holding uploaded attachments.
    /// Env: `STORAGE_PATH`
    /// Default: `./storage`
    pub storage_path: PathBuf,

    /// Externally reachable base URL, used to build attachment URLs.
    /// Env: `PUBLIC_BASE_URL`
    /// Default: `http://localhost:8080`
    pub public_base_url: String,

    /// External AI processor endpoint.  Dispatch fails upstream when unset.
    /// Env: `PROCESSOR_URL`
    pub processor_url: Option<String>,

    /// Bearer token sent to the processor.
    /// Env: `PROCESSOR_SECRET`
    pub processor_secret: Option<String>,

    /// Env: `PROCESSOR_TIMEOUT_SECS`
    /// Default: `90`
    pub processor_timeout: Duration,

    /// Shared secret the processor presents on `/webhook/response`.
    /// Env: `WEBHOOK_SECRET`
    /// Default: empty (callback endpoint disabled).
    pub webhook_secret: Option<String>,

    /// Ed25519 public key of the identity provider (hex-encoded, 64 chars).
    /// Env: `IDENTITY_PUBKEY`
    /// Default: all-zeros (development only, rejects every token).
    pub identity_pubkey: [u8; 32],

    /// Admin API bearer token. Required to access /admin/* endpoints.
    /// Env: `ADMIN_TOKEN`
    /// Default: empty (admin API disabled).
    pub admin_token: Option<String>,

    /// Maximum attachment size in bytes.
    /// Env: `MAX_UPLOAD_SIZE`
    pub max_upload_size: usize,

    /// Dispatches allowed per actor per minute (burst of the same size).
    /// Env: `DISPATCH_RATE_PER_MINUTE`
    /// Default: `20`
    pub dispatch_rate_per_minute: u32,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            http_addr: ([0, 0, 0, 0], DEFAULT_HTTP_PORT).into(),
            database_path: None,
            storage_path: PathBuf::from("./storage"),
            public_base_url: format!("http://localhost:{DEFAULT_HTTP_PORT}"),
            processor_url: None,
            processor_secret: None,
            processor_timeout: Duration::from_secs(90),
            webhook_secret: None,
            identity_pubkey: [0u8; 32],
            admin_token: None,
            max_upload_size: MAX_UPLOAD_SIZE,
            dispatch_rate_per_minute: 20,
        }
    }
}

impl ServerConfig {
    /// Load configuration from environment variables, falling back to defaults.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(var: impl Fn(&str) -> Option<String>) -> Self {
        let mut config = Self::default();

        if let Some(addr) = var("HTTP_ADDR") {
            if let Ok(parsed) = addr.parse::<SocketAddr>() {
                config.http_addr = parsed;
            } else {
                tracing::warn!(value = %addr, "Invalid HTTP_ADDR, using default");
            }
        }

        if let Some(path) = non_empty(var("DATABASE_PATH")) {
            config.database_path = Some(PathBuf::from(path));
        }

        if let Some(path) = non_empty(var("STORAGE_PATH")) {
            config.storage_path = PathBuf::from(path);
        }

        if let Some(url) = non_empty(var("PUBLIC_BASE_URL")) {
            config.public_base_url = url.trim_end_matches('/').to_string();
        }

        config.processor_url = non_empty(var("PROCESSOR_URL"));
        config.processor_secret = non_empty(var("PROCESSOR_SECRET"));
        config.webhook_secret = non_empty(var("WEBHOOK_SECRET"));
        config.admin_token = non_empty(var("ADMIN_TOKEN"));

        if let Some(val) = var("PROCESSOR_TIMEOUT_SECS") {
            match val.parse::<u64>() {
                Ok(secs) if secs > 0 => config.processor_timeout = Duration::from_secs(secs),
                _ => tracing::warn!(value = %val, "Invalid PROCESSOR_TIMEOUT_SECS, using default"),
            }
        }

        if let Some(hex_key) = var("IDENTITY_PUBKEY") {
            match parse_hex_pubkey(&hex_key) {
                Ok(key) => config.identity_pubkey = key,
                Err(e) => {
                    tracing::warn!(error = %e, "Invalid IDENTITY_PUBKEY, using default (dev-only)");
                }
            }
        }

        if let Some(val) = var("MAX_UPLOAD_SIZE") {
            match val.parse::<usize>() {
                Ok(n) if n > 0 => config.max_upload_size = n,
                _ => tracing::warn!(value = %val, "Invalid MAX_UPLOAD_SIZE, using default"),
            }
        }

        if let Some(val) = var("DISPATCH_RATE_PER_MINUTE") {
            match val.parse::<u32>() {
                Ok(n) if n > 0 => config.dispatch_rate_per_minute = n,
                _ => tracing::warn!(value = %val, "Invalid DISPATCH_RATE_PER_MINUTE, using default"),
            }
        }

        // RUST_LOG is handled directly by tracing-subscriber's EnvFilter.

        config
    }
}

// Secrets stay out of the logs.
impl fmt::Debug for ServerConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ServerConfig")
            .field("http_addr", &self.http_addr)
            .field("database_path", &self.database_path)
            .field("storage_path", &self.storage_path)
            .field("public_base_url", &self.public_base_url)
            .field("processor_url", &self.processor_url)
            .field("processor_secret", &redacted(&self.processor_secret))
            .field("processor_timeout", &self.processor_timeout)
            .field("webhook_secret", &redacted(&self.webhook_secret))
            .field("identity_pubkey", &hex::encode(self.identity_pubkey))
            .field("admin_token", &redacted(&self.admin_token))
            .field("max_upload_size", &self.max_upload_size)
            .field("dispatch_rate_per_minute", &self.dispatch_rate_per_minute)
            .finish()
    }
}

fn redacted(secret: &Option<String>) -> &'static str {
    if secret.is_some() {
        "<set>"
    } else {
        "<unset>"
    }
}

fn non_empty(value: Option<String>) -> Option<String> {
    value.map(|v| v.trim().to_string()).filter(|v| !v.is_empty())
}

/// Parse a 64-character hex string into a 32-byte array.
fn parse_hex_pubkey(value: &str) -> Result<[u8; 32], String> {
    let value = value.trim();
    if value.len() != 64 {
        return Err(format!("expected 64 hex chars, got {}", value.len()));
    }
    let bytes = hex::decode(value).map_err(|e| e.to_string())?;
    let mut key = [0u8; 32];
    key.copy_from_slice(&bytes);
    Ok(key)
}
