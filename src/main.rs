//! Request governance layer.
//!
//! # Architecture Overview
//!
//! ```text
//!                       ┌───────────────────────────────────────────────┐
//!                       │              GOVERNANCE LAYER                 │
//!  Client Request       │  ┌────────┐   ┌────────┐   ┌─────────────┐    │
//!  ─────────────────────┼─▶│  http  │──▶│  csrf  │──▶│ rate_limit  │    │
//!                       │  │ server │   │ check  │   │   check     │    │
//!                       │  └────────┘   └────────┘   └──────┬──────┘    │
//!                       │                                   │ GET on    │
//!                       │                                   ▼ cache route
//!                       │                            ┌─────────────┐    │
//!                       │                            │  response   │    │
//!                       │                            │   cache     │    │
//!                       │                            └──────┬──────┘    │
//!  Client Response      │                                   ▼ miss      │
//!  ◀────────────────────┼──── X-RateLimit-*, Cache-Control, ┌─────────┐ │
//!                       │     fresh CSRF token              │ handler │ │
//!                       │                                   └─────────┘ │
//!                       │  config · observability · lifecycle · admin   │
//!                       └───────────────────────────────────────────────┘
//! ```

use axum::{
    extract::Path,
    routing::{get, post},
    Json, Router,
};
use clap::Parser;
use serde_json::{json, Value};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::sync::mpsc;

use request_governance::config::{load_config, loader::load_from_env, watcher::ConfigWatcher};
use request_governance::lifecycle::signals::spawn_signal_handler;
use request_governance::observability::{logging, metrics};
use request_governance::timing::SystemClock;
use request_governance::{Governor, HttpServer, Shutdown};

#[derive(Parser)]
#[command(name = "request-governance")]
#[command(about = "Rate limiting, response caching and CSRF protection for HTTP APIs", long_about = None)]
struct Args {
    /// TOML configuration file, watched for changes. Defaults plus environment when omitted.
    #[arg(short, long)]
    config: Option<PathBuf>,
}

/// Sample application the governance layer fronts.
fn application_router() -> Router {
    Router::new()
        .route("/health", get(|| async { Json(json!({ "status": "ok" })) }))
        .route(
            "/api/dashboard/kpis/{org}",
            get(|Path(org): Path<String>| async move {
                // Stand-in for an expensive aggregation query.
                tokio::time::sleep(Duration::from_millis(250)).await;
                Json(json!({ "org": org, "revenue": 125_000.0, "margin": 0.31 }))
            }),
        )
        .route("/api/echo", post(|Json(body): Json<Value>| async move { Json(body) }))
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    // Logging comes up first so environment override warnings are not lost.
    let log_level = logging::init_logging(logging::BOOTSTRAP_LEVEL);
    tracing::info!(version = env!("CARGO_PKG_VERSION"), "request-governance starting");

    let config = match &args.config {
        Some(path) => load_config(path)?,
        None => load_from_env()?,
    };
    log_level.set_level(&config.observability.log_level);

    tracing::info!(
        bind_address = %config.listener.bind_address,
        rate_limit_enabled = config.rate_limit.enabled,
        cache_routes = config.cache.routes.len(),
        csrf_enabled = config.csrf.enabled,
        "Configuration loaded"
    );

    if config.observability.metrics_enabled {
        match config.observability.metrics_address.parse() {
            Ok(addr) => metrics::init_metrics(addr),
            Err(_) => tracing::error!(
                metrics_address = %config.observability.metrics_address,
                "Failed to parse metrics address"
            ),
        }
    }

    // The watcher must stay alive for updates to flow.
    let (_watcher, config_updates) = match &args.config {
        Some(path) => {
            let (watcher, updates) = ConfigWatcher::new(path);
            (Some(watcher.run()?), updates)
        }
        None => {
            let (_, updates) = mpsc::unbounded_channel();
            (None, updates)
        }
    };

    let listener = TcpListener::bind(&config.listener.bind_address).await?;
    tracing::info!(address = %listener.local_addr()?, "Listening for connections");

    let shutdown = Shutdown::new();
    let server_shutdown = shutdown.subscribe();
    spawn_signal_handler(shutdown.clone());

    let governor = Arc::new(Governor::new(config, SystemClock::shared()));
    let server = HttpServer::new(governor, application_router());
    server.run(listener, config_updates, server_shutdown).await?;

    tracing::info!("Shutdown complete");
    Ok(())
}
