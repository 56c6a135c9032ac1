//! Admin API behind bearer authentication.

use axum::body::Body;
use axum::http::{Request, StatusCode};
use serde_json::{json, Value};
use std::sync::Arc;
use tower::ServiceExt;

use request_governance::admin::setup_admin_router;
use request_governance::cache::FetchOptions;
use request_governance::config::RateLimitPolicy;
use request_governance::timing::ManualClock;
use request_governance::Governor;

mod common;
use common::{body_json, test_config, ADMIN_KEY};

fn governor() -> Arc<Governor> {
    Arc::new(Governor::new(test_config(), ManualClock::new(0).shared()))
}

fn admin_request(method: &str, uri: &str, body: Option<Value>) -> Request<Body> {
    let builder = Request::builder()
        .method(method)
        .uri(uri)
        .header("authorization", format!("Bearer {ADMIN_KEY}"))
        .header("content-type", "application/json");
    match body {
        Some(body) => builder.body(Body::from(body.to_string())).unwrap(),
        None => builder.body(Body::empty()).unwrap(),
    }
}

#[tokio::test]
async fn test_requires_bearer_key() {
    let router = setup_admin_router(governor());

    let anonymous = Request::get("/admin/status").body(Body::empty()).unwrap();
    assert_eq!(router.clone().oneshot(anonymous).await.unwrap().status(), StatusCode::UNAUTHORIZED);

    let wrong = Request::get("/admin/status")
        .header("authorization", "Bearer nope")
        .body(Body::empty())
        .unwrap();
    assert_eq!(router.clone().oneshot(wrong).await.unwrap().status(), StatusCode::UNAUTHORIZED);

    let response = router.oneshot(admin_request("GET", "/admin/status", None)).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(body_json(response).await["status"], "operational");
}

#[tokio::test]
async fn test_stats_report_store_sizes() {
    let governor = governor();
    let policy = RateLimitPolicy {
        window_ms: 60_000,
        max_requests: 10,
    };
    governor.rate_limiter().check("203.0.113.10:/api/a", policy);
    governor.rate_limiter().check("203.0.113.10:/api/b", policy);
    governor.csrf().issue();

    let response = setup_admin_router(governor)
        .oneshot(admin_request("GET", "/admin/stats", None))
        .await
        .unwrap();
    let stats = body_json(response).await;
    assert_eq!(stats["rate_limit"]["tracked_keys"], 2);
    assert_eq!(stats["csrf"]["live_tokens"], 1);
    assert_eq!(stats["cache"]["entries"], 0);
}

#[tokio::test]
async fn test_cache_invalidation() {
    let governor = governor();
    let options = FetchOptions::new(std::time::Duration::from_secs(60));
    for key in ["kpi:/api/kpis/1", "kpi:/api/kpis/2", "api:/api/slow"] {
        let cached = request_governance::governance::CachedResponse {
            status: StatusCode::OK,
            headers: Default::default(),
            body: "{}".into(),
        };
        governor.cache().insert(key, cached, &options);
    }
    let router = setup_admin_router(governor.clone());

    let by_prefix = router
        .clone()
        .oneshot(admin_request("POST", "/admin/cache/invalidate", Some(json!({ "prefix": "kpi:" }))))
        .await
        .unwrap();
    assert_eq!(body_json(by_prefix).await["removed"], 2);

    let by_key = router
        .clone()
        .oneshot(admin_request("POST", "/admin/cache/invalidate", Some(json!({ "key": "api:/api/slow" }))))
        .await
        .unwrap();
    assert_eq!(body_json(by_key).await["removed"], 1);
    assert!(governor.cache().is_empty());

    let ambiguous = router
        .oneshot(admin_request("POST", "/admin/cache/invalidate", Some(json!({}))))
        .await
        .unwrap();
    assert_eq!(ambiguous.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_rate_limit_reset() {
    let governor = governor();
    let policy = RateLimitPolicy {
        window_ms: 60_000,
        max_requests: 1,
    };
    let key = "203.0.113.10:/api/reports/7";
    governor.rate_limiter().check(key, policy);
    assert!(!governor.rate_limiter().check(key, policy).allowed);

    let response = setup_admin_router(governor.clone())
        .oneshot(admin_request("DELETE", "/admin/rate-limit/203.0.113.10:/api/reports/7", None))
        .await
        .unwrap();
    assert_eq!(body_json(response).await["cleared"], true);
    assert!(governor.rate_limiter().check(key, policy).allowed);
}
