//! Request spans.
//!
//! Every request gets one `request` span carrying the request ID set by
//! `SetRequestIdLayer`, so governance decisions logged inside it correlate.

use axum::body::Body;
use axum::http::Request;

use crate::http::request::X_REQUEST_ID;

/// Span for `TraceLayer::make_span_with`.
pub fn request_span(request: &Request<Body>) -> ::tracing::Span {
    let request_id = request
        .headers()
        .get(X_REQUEST_ID)
        .and_then(|v| v.to_str().ok())
        .unwrap_or("-");

    ::tracing::info_span!(
        "request",
        method = %request.method(),
        path = %request.uri().path(),
        request_id = %request_id,
    )
}
