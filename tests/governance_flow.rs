//! End-to-end behaviour of the governance middleware on an in-process router.

use axum::http::StatusCode;
use serde_json::json;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tower::ServiceExt;

use request_governance::timing::ManualClock;

mod common;
use common::{body_json, get, header, post_json, test_config, test_server};

#[tokio::test]
async fn test_route_quota_denies_sixth_request() {
    let clock = ManualClock::new(1_000_000);
    let server = test_server(test_config(), clock.shared(), Arc::default());
    let router = server.router();

    for expected_remaining in ["4", "3", "2", "1", "0"] {
        let response = router.clone().oneshot(get("/api/reports/7")).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(header(&response, "x-ratelimit-limit"), Some("5"));
        assert_eq!(header(&response, "x-ratelimit-remaining"), Some(expected_remaining));
    }

    let denied = router.clone().oneshot(get("/api/reports/8")).await.unwrap();
    assert_eq!(denied.status(), StatusCode::TOO_MANY_REQUESTS);
    assert_eq!(header(&denied, "retry-after"), Some("60"));
    assert_eq!(header(&denied, "x-ratelimit-remaining"), Some("0"));
    assert_eq!(header(&denied, "x-ratelimit-reset"), Some("1060000"));
    let body = body_json(denied).await;
    assert_eq!(body["error"], "Too Many Requests");
    assert_eq!(body["retryAfter"], 60);

    // Another client has its own window.
    let other = axum::http::Request::get("/api/reports/7")
        .header("x-forwarded-for", "198.51.100.1")
        .body(axum::body::Body::empty())
        .unwrap();
    assert_eq!(router.clone().oneshot(other).await.unwrap().status(), StatusCode::OK);

    // A new window opens once the old one ends.
    clock.advance_ms(60_000);
    let response = router.oneshot(get("/api/reports/7")).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(header(&response, "x-ratelimit-remaining"), Some("4"));
}

#[tokio::test]
async fn test_csrf_double_submit() {
    let server = test_server(test_config(), ManualClock::new(0).shared(), Arc::default());
    let router = server.router();

    let issued = router.clone().oneshot(get("/api/me")).await.unwrap();
    let token = header(&issued, "x-csrf-token").unwrap().to_string();
    let cookie = header(&issued, "set-cookie").unwrap();
    assert!(cookie.starts_with(&format!("csrf-token={token};")));

    let payload = json!({ "amount": 120 });

    let missing = router
        .clone()
        .oneshot(post_json("/api/echo", &payload, None, None))
        .await
        .unwrap();
    assert_eq!(missing.status(), StatusCode::FORBIDDEN);
    assert_eq!(body_json(missing).await["error"], "CSRF token missing");

    let mismatched = router
        .clone()
        .oneshot(post_json("/api/echo", &payload, Some(&token), Some("something-else")))
        .await
        .unwrap();
    assert_eq!(mismatched.status(), StatusCode::FORBIDDEN);
    assert_eq!(body_json(mismatched).await["error"], "CSRF token mismatch");

    let forged = router
        .clone()
        .oneshot(post_json("/api/echo", &payload, Some("forged"), Some("forged")))
        .await
        .unwrap();
    assert_eq!(body_json(forged).await["error"], "CSRF token invalid or expired");

    let accepted = router
        .oneshot(post_json("/api/echo", &payload, Some(&token), Some(&token)))
        .await
        .unwrap();
    assert_eq!(accepted.status(), StatusCode::OK);
    assert!(header(&accepted, "x-csrf-token").is_some());
    assert_eq!(body_json(accepted).await, payload);
}

#[tokio::test]
async fn test_csrf_token_expires() {
    let clock = ManualClock::new(0);
    let server = test_server(test_config(), clock.shared(), Arc::default());
    let router = server.router();

    let issued = router.clone().oneshot(get("/api/me")).await.unwrap();
    let token = header(&issued, "x-csrf-token").unwrap().to_string();

    clock.advance_ms(60 * 60 * 1000 + 1);
    let response = router
        .oneshot(post_json("/api/echo", &json!({}), Some(&token), Some(&token)))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::FORBIDDEN);
    assert_eq!(body_json(response).await["error"], "CSRF token invalid or expired");
}

#[tokio::test]
async fn test_health_is_exempt() {
    let server = test_server(test_config(), ManualClock::new(0).shared(), Arc::default());

    let response = server.router().oneshot(get("/health")).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert!(header(&response, "x-csrf-token").is_none());
    assert!(header(&response, "x-request-id").is_some());
}

#[tokio::test]
async fn test_cached_route_single_flight() {
    let calls = Arc::new(AtomicUsize::new(0));
    let server = test_server(test_config(), ManualClock::new(0).shared(), calls.clone());
    let router = server.router();

    let mut tasks = Vec::new();
    for _ in 0..20 {
        let router = router.clone();
        tasks.push(tokio::spawn(async move { router.oneshot(get("/api/kpis/acme")).await.unwrap() }));
    }
    for task in tasks {
        let response = task.await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(
            header(&response, "cache-control"),
            Some("max-age=60, stale-while-revalidate=300")
        );
        assert_eq!(body_json(response).await["org"], "acme");
    }
    assert_eq!(calls.load(Ordering::SeqCst), 1);

    let again = router.oneshot(get("/api/kpis/acme")).await.unwrap();
    assert_eq!(header(&again, "x-cache"), Some("HIT"));
    assert_eq!(calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_stale_entry_served_while_refreshing() {
    let clock = ManualClock::new(0);
    let calls = Arc::new(AtomicUsize::new(0));
    let server = test_server(test_config(), clock.shared(), calls.clone());
    let router = server.router();

    router.clone().oneshot(get("/api/kpis/acme")).await.unwrap();
    clock.advance_ms(61_000);

    let stale = router.clone().oneshot(get("/api/kpis/acme")).await.unwrap();
    assert_eq!(header(&stale, "x-cache"), Some("STALE"));

    tokio::time::sleep(std::time::Duration::from_millis(300)).await;
    assert_eq!(calls.load(Ordering::SeqCst), 2);
    let fresh = router.oneshot(get("/api/kpis/acme")).await.unwrap();
    assert_eq!(header(&fresh, "x-cache"), Some("HIT"));
}

#[tokio::test]
async fn test_non_success_responses_pass_through_uncached() {
    let calls = Arc::new(AtomicUsize::new(0));
    let server = test_server(test_config(), ManualClock::new(0).shared(), calls.clone());
    let router = server.router();

    for _ in 0..2 {
        let response = router.clone().oneshot(get("/api/kpis/missing")).await.unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }
    assert_eq!(calls.load(Ordering::SeqCst), 2);
    assert!(server.governor().cache().is_empty());
}

#[tokio::test]
async fn test_fetch_timeout_returns_504_and_still_populates() {
    let server = test_server(test_config(), ManualClock::new(0).shared(), Arc::default());
    let router = server.router();

    let response = router.clone().oneshot(get("/api/slow")).await.unwrap();
    assert_eq!(response.status(), StatusCode::GATEWAY_TIMEOUT);

    tokio::time::sleep(std::time::Duration::from_millis(400)).await;
    let response = router.oneshot(get("/api/slow")).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(header(&response, "x-cache"), Some("HIT"));
}

#[tokio::test]
async fn test_oversized_body_returns_502() {
    let server = test_server(test_config(), ManualClock::new(0).shared(), Arc::default());

    let response = server.router().oneshot(get("/api/kpis/huge")).await.unwrap();
    assert_eq!(response.status(), StatusCode::BAD_GATEWAY);
}

#[tokio::test]
async fn test_disabled_components_pass_through() {
    let mut config = test_config();
    config.rate_limit.enabled = false;
    config.csrf.enabled = false;
    config.cache.enabled = false;
    let calls = Arc::new(AtomicUsize::new(0));
    let server = test_server(config, ManualClock::new(0).shared(), calls.clone());
    let router = server.router();

    let response = router
        .clone()
        .oneshot(post_json("/api/echo", &json!({ "a": 1 }), None, None))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert!(header(&response, "x-ratelimit-limit").is_none());

    router.clone().oneshot(get("/api/kpis/acme")).await.unwrap();
    router.oneshot(get("/api/kpis/acme")).await.unwrap();
    assert_eq!(calls.load(Ordering::SeqCst), 2);
}
