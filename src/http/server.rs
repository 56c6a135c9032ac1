//! HTTP server setup and configuration.
//!
//! # Responsibilities
//! - Wrap the application router in the governance middleware
//! - Wire up cross-cutting layers (request ID, tracing, timeout)
//! - Serve the admin API on its own listener when enabled
//! - Apply configuration updates from the watcher
//! - Stop the governance sweepers on shutdown

use axum::{middleware, Router};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::sync::{broadcast, mpsc};
use tower_http::{
    request_id::{PropagateRequestIdLayer, SetRequestIdLayer},
    timeout::TimeoutLayer,
    trace::TraceLayer,
};

use crate::admin::setup_admin_router;
use crate::config::GovernanceConfig;
use crate::governance::{governance_middleware, Governor};
use crate::http::request::UuidRequestId;
use crate::observability::tracing::request_span;

/// HTTP server placing the governance layer in front of an application.
pub struct HttpServer {
    router: Router,
    governor: Arc<Governor>,
}

impl HttpServer {
    /// Wrap `app` with the governance middleware and the standard layers.
    pub fn new(governor: Arc<Governor>, app: Router) -> Self {
        let config = governor.config();
        let router = Self::build_router(&config, governor.clone(), app);
        Self { router, governor }
    }

    /// Layers run outermost-last: request ID, trace span, timeout, governance.
    #[allow(deprecated)]
    fn build_router(config: &GovernanceConfig, governor: Arc<Governor>, app: Router) -> Router {
        app.layer(middleware::from_fn_with_state(governor, governance_middleware))
            .layer(TimeoutLayer::new(Duration::from_secs(config.timeouts.request_secs)))
            .layer(PropagateRequestIdLayer::x_request_id())
            .layer(TraceLayer::new_for_http().make_span_with(request_span))
            .layer(SetRequestIdLayer::x_request_id(UuidRequestId))
    }

    /// The fully layered router, for in-process use.
    pub fn router(&self) -> Router {
        self.router.clone()
    }

    pub fn governor(&self) -> &Arc<Governor> {
        &self.governor
    }

    /// Serve until `shutdown` fires, then drain and stop the sweepers.
    pub async fn run(
        self,
        listener: TcpListener,
        mut config_updates: mpsc::UnboundedReceiver<GovernanceConfig>,
        mut shutdown: broadcast::Receiver<()>,
    ) -> Result<(), std::io::Error> {
        let addr = listener.local_addr()?;
        let config = self.governor.config();

        let admin = if config.admin.enabled {
            let admin_listener = TcpListener::bind(&config.admin.bind_address).await?;
            tracing::info!(address = %admin_listener.local_addr()?, "Admin API listening");

            let admin_router = setup_admin_router(self.governor.clone());
            let mut admin_shutdown = shutdown.resubscribe();
            Some(tokio::spawn(async move {
                axum::serve(admin_listener, admin_router)
                    .with_graceful_shutdown(async move {
                        let _ = admin_shutdown.recv().await;
                    })
                    .await
            }))
        } else {
            None
        };

        self.governor.start();

        let governor = self.governor.clone();
        let mut reload_shutdown = shutdown.resubscribe();
        let reloader = tokio::spawn(async move {
            loop {
                tokio::select! {
                    update = config_updates.recv() => match update {
                        Some(new_config) => governor.reload(new_config),
                        None => break,
                    },
                    _ = reload_shutdown.recv() => break,
                }
            }
        });

        tracing::info!(
            address = %addr,
            request_timeout_secs = config.timeouts.request_secs,
            "HTTP server starting"
        );

        let app = self.router.into_make_service_with_connect_info::<SocketAddr>();
        let served = axum::serve(listener, app)
            .with_graceful_shutdown(async move {
                let _ = shutdown.recv().await;
            })
            .await;

        reloader.abort();
        if let Some(admin) = admin {
            if served.is_err() {
                admin.abort();
            } else {
                match admin.await {
                    Ok(Err(e)) => tracing::error!(error = %e, "Admin API failed"),
                    Err(e) if !e.is_cancelled() => tracing::error!(error = %e, "Admin API task failed"),
                    _ => {}
                }
            }
        }

        self.governor.close().await;
        tracing::info!("HTTP server stopped");
        served
    }
}
