use axum::{
    extract::{Request, State},
    http::{header::AUTHORIZATION, StatusCode},
    middleware::Next,
    response::Response,
};
use std::sync::Arc;
use subtle::ConstantTimeEq;

use crate::governance::Governor;

/// Constant-time comparison against the configured key. An empty key never matches.
pub fn key_matches(presented: &str, expected: &str) -> bool {
    !expected.is_empty() && bool::from(presented.as_bytes().ct_eq(expected.as_bytes()))
}

/// Require `Authorization: Bearer <admin.api_key>`. The key is read per request so reloads apply.
pub async fn admin_auth_middleware(
    State(governor): State<Arc<Governor>>,
    request: Request,
    next: Next,
) -> Result<Response, StatusCode> {
    let config = governor.config();

    let presented = request
        .headers()
        .get(AUTHORIZATION)
        .and_then(|h| h.to_str().ok())
        .and_then(|h| h.strip_prefix("Bearer "));

    match presented {
        Some(key) if key_matches(key, &config.admin.api_key) => Ok(next.run(request).await),
        _ => {
            tracing::warn!(path = %request.uri().path(), "Rejected unauthenticated admin request");
            Err(StatusCode::UNAUTHORIZED)
        }
    }
}
