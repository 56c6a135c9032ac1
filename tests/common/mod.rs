//! Shared utilities for integration tests.

#![allow(dead_code)]

use axum::{
    body::Body,
    extract::Path,
    http::{Request, StatusCode},
    response::{IntoResponse, Response},
    routing::{self, post},
    Json, Router,
};
use serde_json::{json, Value};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use request_governance::config::{CacheRouteConfig, GovernanceConfig, RouteLimitConfig};
use request_governance::timing::SharedClock;
use request_governance::{Governor, HttpServer};

pub const CLIENT_IP: &str = "203.0.113.10";
pub const ADMIN_KEY: &str = "test-admin-key";

/// Defaults plus one limited route, one cached route and a slow cached route.
pub fn test_config() -> GovernanceConfig {
    let mut config = GovernanceConfig::default();
    config.admin.api_key = ADMIN_KEY.to_string();
    config.csrf.secure_cookie = false;

    config.rate_limit.routes.push(RouteLimitConfig {
        name: "reports".to_string(),
        path_prefix: "/api/reports".to_string(),
        window_ms: 60_000,
        max_requests: 5,
        message: None,
    });

    config.cache.routes.push(CacheRouteConfig {
        name: "kpis".to_string(),
        path_prefix: "/api/kpis".to_string(),
        namespace: "kpi".to_string(),
        ttl_secs: 60,
        stale_while_revalidate: true,
        stale_window_secs: Some(300),
        fetch_timeout_ms: None,
        vary_headers: Vec::new(),
    });
    config.cache.routes.push(CacheRouteConfig {
        name: "slow".to_string(),
        path_prefix: "/api/slow".to_string(),
        namespace: "api".to_string(),
        ttl_secs: 60,
        stale_while_revalidate: false,
        stale_window_secs: None,
        fetch_timeout_ms: Some(50),
        vary_headers: Vec::new(),
    });
    config
}

/// Application router counting how often the KPI handler really runs.
pub fn test_app(kpi_calls: Arc<AtomicUsize>) -> Router {
    Router::new()
        .route("/health", routing::get(|| async { "ok" }))
        .route("/api/me", routing::get(|| async { Json(json!({ "user": "amal" })) }))
        .route("/api/reports/{id}", routing::get(|Path(id): Path<String>| async move { Json(json!({ "report": id })) }))
        .route(
            "/api/kpis/{org}",
            routing::get(move |Path(org): Path<String>| {
                let kpi_calls = kpi_calls.clone();
                async move {
                    kpi_calls.fetch_add(1, Ordering::SeqCst);
                    tokio::time::sleep(Duration::from_millis(100)).await;
                    if org == "missing" {
                        return (StatusCode::NOT_FOUND, "unknown org").into_response();
                    }
                    if org == "huge" {
                        return "x".repeat(4 * 1024 * 1024).into_response();
                    }
                    Json(json!({ "org": org, "revenue": 42.0 })).into_response()
                }
            }),
        )
        .route(
            "/api/slow",
            routing::get(|| async {
                tokio::time::sleep(Duration::from_millis(300)).await;
                "finally"
            }),
        )
        .route("/api/echo", post(|Json(body): Json<Value>| async move { Json(body) }))
}

pub fn test_server(config: GovernanceConfig, clock: SharedClock, kpi_calls: Arc<AtomicUsize>) -> HttpServer {
    let governor = Arc::new(Governor::new(config, clock));
    HttpServer::new(governor, test_app(kpi_calls))
}

pub fn get(uri: &str) -> Request<Body> {
    Request::get(uri)
        .header("x-forwarded-for", CLIENT_IP)
        .body(Body::empty())
        .unwrap()
}

pub fn post_json(uri: &str, body: &Value, token: Option<&str>, cookie: Option<&str>) -> Request<Body> {
    let mut builder = Request::post(uri)
        .header("x-forwarded-for", CLIENT_IP)
        .header("content-type", "application/json");
    if let Some(token) = token {
        builder = builder.header("x-csrf-token", token);
    }
    if let Some(cookie) = cookie {
        builder = builder.header("cookie", format!("csrf-token={cookie}"));
    }
    builder.body(Body::from(body.to_string())).unwrap()
}

pub async fn body_json(response: Response) -> Value {
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    serde_json::from_slice(&bytes).unwrap()
}

pub fn header<'a>(response: &'a Response, name: &str) -> Option<&'a str> {
    response.headers().get(name).and_then(|v| v.to_str().ok())
}
