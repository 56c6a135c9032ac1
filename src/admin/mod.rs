//! Admin API, served on its own listener behind a bearer key.

pub mod auth;
pub mod handlers;

use axum::{
    middleware,
    routing::{delete, get, post},
    Router,
};
use std::sync::Arc;

use self::auth::admin_auth_middleware;
use self::handlers::*;
use crate::governance::Governor;

pub fn setup_admin_router(governor: Arc<Governor>) -> Router {
    Router::new()
        .route("/admin/status", get(get_status))
        .route("/admin/stats", get(get_stats))
        .route("/admin/cache/invalidate", post(invalidate_cache))
        .route("/admin/rate-limit/{*key}", delete(reset_rate_limit))
        .layer(middleware::from_fn_with_state(governor.clone(), admin_auth_middleware))
        .with_state(governor)
}
