//! # bistro-boss
//!
//! Backend for the Bistro Boss restaurant: menu, reviews, carts and users over
//! HTTP/JSON, with bearer-token auth and an admin role gate.
//!
//! ## Architecture
//!
//! - **Token**: HS256 JWTs carrying the caller's email, valid for one hour
//! - **Store**: Four typed document collections, in memory with optional JSON-file persistence
//! - **HTTP**: Axum router with request IDs, CORS, panic recovery and graceful shutdown

#![forbid(unsafe_code)]
#![deny(clippy::unwrap_used, clippy::expect_used)]

mod config;
mod http;
mod model;
mod store;
mod token;

use std::net::SocketAddr;

use anyhow::Context;
use axum::serve;
use clap::Parser;
use tokio::net::TcpListener;
use tracing::info;
use tracing_subscriber::EnvFilter;

use crate::config::{AppConfig, Cli, EnvConfig};
use crate::http::{router, AppState};
use crate::store::Database;
use crate::token::TokenService;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // A missing .env file is fine; real environment variables still apply.
    let dotenv = dotenvy::dotenv().ok();

    init_logging().context("failed to initialize logging")?;

    let cli = Cli::parse();
    let env = EnvConfig::from_env().context("failed to read environment")?;
    let config = AppConfig::from_sources(cli, env).context("failed to load configuration")?;
    info!(
        bind = %config.bind,
        data_dir = ?config.data_dir.as_ref().map(|path| path.display().to_string()),
        dotenv = ?dotenv.as_ref().map(|path| path.display().to_string()),
        "configuration loaded"
    );

    let db = match &config.data_dir {
        Some(dir) => Database::open(dir)
            .await
            .with_context(|| format!("failed to open data directory {}", dir.display()))?,
        None => {
            tracing::warn!("no data directory configured; documents are kept in memory only");
            Database::in_memory()
        }
    };

    let tokens = TokenService::new(config.access_token_secret.as_bytes());

    let app = router(AppState::new(db, tokens));
    let listener = TcpListener::bind(config.bind)
        .await
        .with_context(|| format!("failed to bind {}", config.bind))?;

    let shutdown = tokio::signal::ctrl_c();
    info!(bind = %config.bind, "Bistro boss is running");

    serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(async {
        let _ = shutdown.await;
        info!("shutting down gracefully");
    })
    .await
    .context("server exited with error")
}

/// Initialize tracing subscriber with `RUST_LOG` env filter (default: `info`).
fn init_logging() -> anyhow::Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .compact()
        .init();

    Ok(())
}
