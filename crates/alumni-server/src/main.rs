//! # alumni-server
//!
//! Real-time chat server for the alumni portal.
//!
//! This binary provides:
//! - **WebSocket transport** for live chat, presence, typing and feed events
//! - **REST API** (axum) for rooms, message history, receipts and presence
//! - **Media storage** for chat attachments, served back under `/media`
//! - **Per-IP rate limiting** on HTTP and a per-user limit on socket sends

mod api;
mod auth;
mod config;
mod error;
mod media;
mod rate_limit;
mod ws;

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::sync::Mutex;
use tracing::info;
use tracing_subscriber::EnvFilter;

use alumni_realtime::ChatService;
use alumni_store::Database;

use crate::api::AppState;
use crate::auth::TokenVerifier;
use crate::config::ServerConfig;
use crate::media::MediaStore;
use crate::rate_limit::RateLimiter;

const LIMITER_SWEEP_EVERY: Duration = Duration::from_secs(300);
const LIMITER_MAX_IDLE: Duration = Duration::from_secs(600);
const TOKEN_CACHE_SWEEP_EVERY: Duration = Duration::from_secs(600);

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| {
            EnvFilter::new("info,alumni_server=debug,alumni_realtime=debug")
        }))
        .init();

    info!("Starting alumni chat server v{}", env!("CARGO_PKG_VERSION"));

    let config = ServerConfig::from_env();
    info!(
        instance = %config.instance_name,
        http_addr = %config.http_addr,
        database = %config.database_path.display(),
        media = %config.media_storage_path.display(),
        feed_ingest_enabled = config.feed_ingest_token.is_some(),
        "Loaded configuration"
    );

    let http_addr = config.http_addr;
    let state = build_state(config).await?;
    spawn_maintenance(&state);

    tokio::select! {
        result = api::serve(state, http_addr) => {
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

async fn build_state(config: ServerConfig) -> anyhow::Result<AppState> {
    let db = Database::open_at(&config.database_path)?;
    // Nobody is connected to a process that just started.
    let stale = db.reset_presence(Utc::now())?;
    if stale > 0 {
        info!(users = stale, "Cleared presence left over from the previous run");
    }

    let media = MediaStore::new(config.media_storage_path.clone(), config.max_media_size).await?;

    Ok(AppState {
        chat: ChatService::new(Arc::new(Mutex::new(db))),
        media: Arc::new(media),
        verifier: Arc::new(TokenVerifier::new(config.auth_server_pubkey)),
        rate_limiter: RateLimiter::new(config.rate_limit_per_sec, config.rate_limit_burst),
        message_limiter: RateLimiter::new(config.message_rate_per_sec, config.message_rate_burst),
        config: Arc::new(config),
    })
}

/// Periodic eviction of idle limiter buckets and expired cached tokens.
fn spawn_maintenance(state: &AppState) {
    let http = state.rate_limiter.clone();
    let sends = state.message_limiter.clone();
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(LIMITER_SWEEP_EVERY);
        loop {
            interval.tick().await;
            http.purge_stale(LIMITER_MAX_IDLE).await;
            sends.purge_stale(LIMITER_MAX_IDLE).await;
        }
    });

    let verifier = state.verifier.clone();
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(TOKEN_CACHE_SWEEP_EVERY);
        loop {
            interval.tick().await;
            verifier.purge_expired().await;
        }
    });
}
