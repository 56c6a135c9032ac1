//! What the governance layer needs to know about an inbound request.

use axum::http::{header, HeaderMap, Method, Request};
use std::collections::HashMap;

/// Client id used when no forwarding header is present.
pub const UNKNOWN_CLIENT: &str = "unknown";

/// License tier of the caller, set as a request extension by an upstream layer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RateLimitTier(pub String);

/// Request facts the governance decisions are based on.
#[derive(Debug, Clone)]
pub struct RequestDescriptor {
    pub method: Method,
    pub path: String,
    pub query: Option<String>,
    pub client_id: String,
    pub headers: HeaderMap,
    pub cookies: HashMap<String, String>,
    pub tier: Option<String>,
}

impl RequestDescriptor {
    pub fn from_request<B>(request: &Request<B>) -> Self {
        let headers = request.headers().clone();
        Self {
            method: request.method().clone(),
            path: request.uri().path().to_string(),
            query: request.uri().query().map(str::to_string),
            client_id: client_id(&headers),
            cookies: parse_cookies(&headers),
            tier: request
                .extensions()
                .get::<RateLimitTier>()
                .map(|tier| tier.0.clone()),
            headers,
        }
    }

    /// Header value as text; non-UTF-8 values count as absent.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name).and_then(|v| v.to_str().ok())
    }

    pub fn cookie(&self, name: &str) -> Option<&str> {
        self.cookies.get(name).map(String::as_str)
    }

    /// Path plus query string, as seen by the client.
    pub fn path_and_query(&self) -> String {
        match &self.query {
            Some(query) => format!("{}?{}", self.path, query),
            None => self.path.clone(),
        }
    }
}

/// First `X-Forwarded-For` hop, else `X-Real-IP`, else [`UNKNOWN_CLIENT`].
pub fn client_id(headers: &HeaderMap) -> String {
    let forwarded = headers
        .get("x-forwarded-for")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.split(',').next())
        .map(str::trim)
        .filter(|v| !v.is_empty());

    let real_ip = || {
        headers
            .get("x-real-ip")
            .and_then(|v| v.to_str().ok())
            .map(str::trim)
            .filter(|v| !v.is_empty())
    };

    forwarded
        .or_else(real_ip)
        .unwrap_or(UNKNOWN_CLIENT)
        .to_string()
}

/// Collect `name=value` pairs from every `Cookie` header. First occurrence wins.
pub fn parse_cookies(headers: &HeaderMap) -> HashMap<String, String> {
    let mut cookies = HashMap::new();
    for value in headers.get_all(header::COOKIE) {
        let Ok(value) = value.to_str() else {
            continue;
        };
        for pair in value.split(';') {
            if let Some((name, value)) = pair.split_once('=') {
                let name = name.trim();
                if !name.is_empty() {
                    cookies
                        .entry(name.to_string())
                        .or_insert_with(|| value.trim().to_string());
                }
            }
        }
    }
    cookies
}
