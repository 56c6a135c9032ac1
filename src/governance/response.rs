//! HTTP rendering of governance outcomes.

use axum::body::{Body, Bytes};
use axum::http::{header, HeaderMap, HeaderName, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;
use thiserror::Error;

use crate::config::CsrfConfig;
use crate::error::{CacheError, GovernanceError};
use crate::security::{IssuedToken, RateLimitDecision};

pub const X_RATELIMIT_LIMIT: HeaderName = HeaderName::from_static("x-ratelimit-limit");
pub const X_RATELIMIT_REMAINING: HeaderName = HeaderName::from_static("x-ratelimit-remaining");
pub const X_RATELIMIT_RESET: HeaderName = HeaderName::from_static("x-ratelimit-reset");
pub const X_CACHE: HeaderName = HeaderName::from_static("x-cache");

/// A fully buffered handler response, as stored in the cache.
#[derive(Debug, Clone)]
pub struct CachedResponse {
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub body: Bytes,
}

/// Why a handler response could not be stored.
///
/// Shared with every waiter of the computation that produced it.
#[derive(Debug, Error)]
pub enum HandlerFailure {
    #[error("handler responded with {}", .0.status)]
    Uncacheable(CachedResponse),

    #[error("response body exceeds {limit} bytes")]
    BodyTooLarge { limit: usize },

    #[error("handler already served the request directly")]
    Detached,
}

impl CachedResponse {
    /// Buffer `response`. Only 2xx responses come back as `Ok`.
    pub async fn buffer(response: Response, max_body_bytes: usize) -> Result<Self, HandlerFailure> {
        let (mut parts, body) = response.into_parts();
        let body = axum::body::to_bytes(body, max_body_bytes)
            .await
            .map_err(|_| HandlerFailure::BodyTooLarge { limit: max_body_bytes })?;

        // Per-client cookies must not be replayed to other clients.
        parts.headers.remove(header::SET_COOKIE);
        parts.headers.remove(header::CONTENT_LENGTH);

        let buffered = Self {
            status: parts.status,
            headers: parts.headers,
            body,
        };
        if buffered.status.is_success() {
            Ok(buffered)
        } else {
            Err(HandlerFailure::Uncacheable(buffered))
        }
    }
}

impl IntoResponse for CachedResponse {
    fn into_response(self) -> Response {
        let mut response = Response::new(Body::from(self.body));
        *response.status_mut() = self.status;
        *response.headers_mut() = self.headers;
        response
    }
}

impl IntoResponse for GovernanceError {
    fn into_response(self) -> Response {
        match self {
            GovernanceError::QuotaExceeded {
                decision,
                retry_after_secs,
                message,
            } => {
                let body = json!({
                    "error": "Too Many Requests",
                    "message": message,
                    "retryAfter": retry_after_secs,
                });
                let mut response = (StatusCode::TOO_MANY_REQUESTS, Json(body)).into_response();
                let headers = response.headers_mut();
                headers.insert(header::RETRY_AFTER, HeaderValue::from(retry_after_secs));
                apply_rate_limit_headers(headers, &decision);
                response
            }
            GovernanceError::Csrf(reason) => {
                (StatusCode::FORBIDDEN, Json(json!({ "error": reason.to_string() }))).into_response()
            }
            GovernanceError::Cache(CacheError::Timeout(_)) => {
                (StatusCode::GATEWAY_TIMEOUT, Json(json!({ "error": "Gateway Timeout" }))).into_response()
            }
            GovernanceError::Cache(CacheError::Upstream(_)) => {
                (StatusCode::BAD_GATEWAY, Json(json!({ "error": "Bad Gateway" }))).into_response()
            }
            GovernanceError::Cache(CacheError::TaskFailed(_)) | GovernanceError::StoreInternal { .. } => (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(json!({ "error": "Internal Server Error" })),
            )
                .into_response(),
        }
    }
}

/// `X-RateLimit-Limit`, `-Remaining` and `-Reset` (epoch ms).
pub fn apply_rate_limit_headers(headers: &mut HeaderMap, decision: &RateLimitDecision) {
    headers.insert(X_RATELIMIT_LIMIT, HeaderValue::from(decision.limit));
    headers.insert(X_RATELIMIT_REMAINING, HeaderValue::from(decision.remaining));
    headers.insert(X_RATELIMIT_RESET, HeaderValue::from(decision.reset_at_ms));
}

/// `Set-Cookie` value carrying a freshly issued token.
pub fn csrf_cookie(config: &CsrfConfig, issued: &IssuedToken) -> String {
    let mut cookie = format!(
        "{}={}; Path=/; Max-Age={}; HttpOnly; SameSite=Strict",
        config.cookie_name,
        issued.token,
        issued.expires_in_ms / 1000
    );
    if config.secure_cookie {
        cookie.push_str("; Secure");
    }
    cookie
}

/// Set the token cookie and mirror the token in the configured response header.
pub fn attach_csrf_token(headers: &mut HeaderMap, config: &CsrfConfig, issued: &IssuedToken) {
    let cookie = HeaderValue::from_str(&csrf_cookie(config, issued));
    let token = HeaderValue::from_str(&issued.token);
    let name = HeaderName::from_bytes(config.header_name.as_bytes());

    match (cookie, token, name) {
        (Ok(cookie), Ok(token), Ok(name)) => {
            headers.append(header::SET_COOKIE, cookie);
            headers.insert(name, token);
        }
        _ => tracing::error!(header = %config.header_name, "Could not encode CSRF token headers"),
    }
}
