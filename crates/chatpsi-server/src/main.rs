//! # chatpsi-server
//!
//! Dispatch gateway for ChatPsi.
//!
//! This binary provides:
//! - **Dispatch** of user messages: persisted, forwarded to the external AI
//!   processor, inline replies persisted and returned
//! - **Reply callback** through which the processor delivers asynchronous
//!   replies
//! - **Message history** per thread and a **realtime websocket** that pushes
//!   every insert to the thread's subscribers
//! - **Attachment storage** (files on disk, served publicly)
//! - **Admin endpoints** for entitlement and soft-delete

mod api;
mod auth;
mod config;
mod dispatch;
mod error;
mod message_log;
mod object_store;
mod processor;
mod rate_limit;
mod realtime;

use std::sync::Arc;

use tracing::info;
use tracing_subscriber::EnvFilter;

use chatpsi_shared::constants::REALTIME_BUFFER;
use chatpsi_store::Database;

use crate::api::AppState;
use crate::config::ServerConfig;
use crate::message_log::MessageLog;
use crate::object_store::ObjectStore;
use crate::processor::HttpProcessor;
use crate::rate_limit::RateLimiter;
use crate::realtime::RealtimeHub;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // -----------------------------------------------------------------------
    // 1. Initialize tracing (respects RUST_LOG env var)
    // -----------------------------------------------------------------------
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("info,chatpsi_server=debug")),
        )
        .init();

    info!("Starting ChatPsi gateway v{}", env!("CARGO_PKG_VERSION"));

    // -----------------------------------------------------------------------
    // 2. Load configuration
    // -----------------------------------------------------------------------
    let config = ServerConfig::from_env();
    info!(?config, "Loaded configuration");
    if config.processor_url.is_none() {
        tracing::warn!("PROCESSOR_URL not set, every dispatch will fail upstream");
    }

    // -----------------------------------------------------------------------
    // 3. Initialize subsystems
    // -----------------------------------------------------------------------
    let db = match &config.database_path {
        Some(path) => Database::open_at(path)?,
        None => Database::new()?,
    };
    let log = MessageLog::new(db, RealtimeHub::new(REALTIME_BUFFER));

    let objects = Arc::new(
        ObjectStore::new(
            config.storage_path.clone(),
            config.public_base_url.clone(),
            config.max_upload_size,
        )
        .await?,
    );

    let processor = Arc::new(HttpProcessor::new(
        config.processor_url.clone(),
        config.processor_secret.clone(),
        config.processor_timeout,
    )?);

    let limiter = RateLimiter::per_minute(config.dispatch_rate_per_minute);

    let app_state = AppState {
        log,
        objects,
        processor,
        limiter: limiter.clone(),
        config: Arc::new(config.clone()),
    };

    // -----------------------------------------------------------------------
    // 4. Spawn background tasks
    // -----------------------------------------------------------------------

    // Periodic rate limiter cleanup (every 5 minutes, evict buckets idle >10 min)
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(std::time::Duration::from_secs(300));
        loop {
            interval.tick().await;
            limiter.purge_stale(600.0).await;
        }
    });

    // -----------------------------------------------------------------------
    // 5. Run the HTTP API server (blocks until shutdown)
    // -----------------------------------------------------------------------
    tokio::select! {
        result = api::serve(app_state, config.http_addr) => {
            if let Err(e) = result {
                tracing::error!(error = %e, "HTTP server failed");
                return Err(e);
            }
        }
        _ = tokio::signal::ctrl_c() => {
            info!("Received Ctrl+C, shutting down");
        }
    }

    Ok(())
}
