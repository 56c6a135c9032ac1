//! Configuration schema definitions.
//!
//! This module defines the complete configuration structure for the governance layer.
//! All types derive Serde traits for deserialization from config files.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Root configuration.
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
#[serde(default)]
pub struct GovernanceConfig {
    /// Listener configuration (bind address).
    pub listener: ListenerConfig,

    /// Timeout configuration.
    pub timeouts: TimeoutConfig,

    /// Observability settings.
    pub observability: ObservabilityConfig,

    /// Admin API settings.
    pub admin: AdminConfig,

    /// Fixed-window rate limiting.
    pub rate_limit: RateLimitConfig,

    /// Response cache for computed GET responses.
    pub cache: CacheConfig,

    /// Anti-forgery token enforcement.
    pub csrf: CsrfConfig,
}

/// Listener configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ListenerConfig {
    /// Bind address (e.g., "0.0.0.0:8080").
    pub bind_address: String,
}

impl Default for ListenerConfig {
    fn default() -> Self {
        Self {
            bind_address: "0.0.0.0:8080".to_string(),
        }
    }
}

/// Timeout configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct TimeoutConfig {
    /// Request timeout (total time for request/response) in seconds.
    pub request_secs: u64,
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self { request_secs: 30 }
    }
}

/// Observability configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ObservabilityConfig {
    /// Log level (trace, debug, info, warn, error).
    pub log_level: String,

    /// Enable metrics endpoint.
    pub metrics_enabled: bool,

    /// Metrics endpoint bind address.
    pub metrics_address: String,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            metrics_enabled: true,
            metrics_address: "0.0.0.0:9090".to_string(),
        }
    }
}

/// Admin API configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct AdminConfig {
    /// Enable admin API.
    pub enabled: bool,

    /// API key for authentication (Bearer token).
    pub api_key: String,

    /// Admin API bind address.
    pub bind_address: String,
}

impl Default for AdminConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            // WARNING: This is a placeholder! Change this in production.
            api_key: "CHANGE_ME_IN_PRODUCTION".to_string(),
            bind_address: "127.0.0.1:8081".to_string(),
        }
    }
}

/// A fixed-window quota.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
pub struct RateLimitPolicy {
    /// Window length in milliseconds.
    pub window_ms: u64,

    /// Requests allowed per window.
    pub max_requests: u32,
}

/// Rate limiting configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct RateLimitConfig {
    /// Enable rate limiting.
    pub enabled: bool,

    /// Default window length in milliseconds.
    pub window_ms: u64,

    /// Default requests per window.
    pub max_requests: u32,

    /// Message returned in the 429 body.
    pub message: String,

    /// Interval between sweeps of expired windows.
    pub sweep_interval_secs: u64,

    /// Per-route overrides, longest matching prefix wins.
    pub routes: Vec<RouteLimitConfig>,

    /// Per-license-tier quotas, keyed by lowercase tier name.
    pub tiers: HashMap<String, TierLimitConfig>,
}

impl RateLimitConfig {
    pub fn default_policy(&self) -> RateLimitPolicy {
        RateLimitPolicy {
            window_ms: self.window_ms,
            max_requests: self.max_requests,
        }
    }
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        let tier = |max_requests, message: &str| TierLimitConfig {
            window_ms: 60_000,
            max_requests,
            message: Some(message.to_string()),
        };

        Self {
            enabled: true,
            window_ms: 60_000,
            max_requests: 100,
            message: "Too many requests. Please try again later.".to_string(),
            sweep_interval_secs: 60,
            routes: Vec::new(),
            tiers: HashMap::from([
                (
                    "basic".to_string(),
                    tier(10, "Rate limit exceeded for Basic tier. Upgrade for higher limits."),
                ),
                (
                    "professional".to_string(),
                    tier(50, "Rate limit exceeded for Professional tier."),
                ),
                (
                    "enterprise".to_string(),
                    tier(200, "Rate limit exceeded for Enterprise tier."),
                ),
                ("platform".to_string(), tier(1000, "Rate limit exceeded.")),
            ]),
        }
    }
}

/// Quota for one license tier.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct TierLimitConfig {
    /// Window length in milliseconds.
    pub window_ms: u64,

    /// Requests per window.
    pub max_requests: u32,

    /// Overrides the default 429 message.
    #[serde(default)]
    pub message: Option<String>,
}

impl TierLimitConfig {
    pub fn policy(&self) -> RateLimitPolicy {
        RateLimitPolicy {
            window_ms: self.window_ms,
            max_requests: self.max_requests,
        }
    }
}

/// Rate limit for requests under one path prefix.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RouteLimitConfig {
    /// Route identifier, also the route part of the limiter key.
    pub name: String,

    /// Path prefix to match.
    pub path_prefix: String,

    /// Window length in milliseconds.
    pub window_ms: u64,

    /// Requests per window.
    pub max_requests: u32,

    /// Overrides the default 429 message.
    #[serde(default)]
    pub message: Option<String>,
}

impl RouteLimitConfig {
    pub fn policy(&self) -> RateLimitPolicy {
        RateLimitPolicy {
            window_ms: self.window_ms,
            max_requests: self.max_requests,
        }
    }
}

/// Response cache configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct CacheConfig {
    /// Enable the response cache.
    pub enabled: bool,

    /// Upper bound on stored entries (None = unbounded).
    pub max_entries: Option<usize>,

    /// Largest response body that will be buffered for caching.
    pub max_body_bytes: usize,

    /// Cache-backed routes.
    pub routes: Vec<CacheRouteConfig>,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            max_entries: Some(10_000),
            max_body_bytes: 1024 * 1024, // 1MB
            routes: Vec::new(),
        }
    }
}

/// Caching policy for GET requests under one path prefix.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct CacheRouteConfig {
    /// Route identifier for logging/metrics.
    pub name: String,

    /// Path prefix to match.
    pub path_prefix: String,

    /// Key namespace (e.g. "kpi", "api").
    #[serde(default = "default_namespace")]
    pub namespace: String,

    /// Freshness window in seconds.
    pub ttl_secs: u64,

    /// Serve stale values while a refresh runs.
    #[serde(default)]
    pub stale_while_revalidate: bool,

    /// How long past the TTL a stale value may be served (None = unbounded).
    #[serde(default)]
    pub stale_window_secs: Option<u64>,

    /// How long a caller waits on a miss before giving up.
    #[serde(default)]
    pub fetch_timeout_ms: Option<u64>,

    /// Request headers whose values become part of the cache key.
    #[serde(default)]
    pub vary_headers: Vec<String>,
}

fn default_namespace() -> String {
    "api".to_string()
}

/// CSRF protection configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct CsrfConfig {
    /// Enforce CSRF validation on unsafe methods.
    pub enabled: bool,

    /// Token lifetime in milliseconds.
    pub token_expiry_ms: u64,

    /// Interval between sweeps of expired tokens.
    pub sweep_interval_secs: u64,

    /// Cookie carrying the token.
    pub cookie_name: String,

    /// Header carrying the token (request and response).
    pub header_name: String,

    /// Add the `Secure` attribute to the cookie.
    pub secure_cookie: bool,

    /// Consume a token on its first successful validation.
    pub rotate_on_use: bool,

    /// Path prefixes that are neither validated nor issued tokens.
    pub exempt_paths: Vec<String>,
}

impl Default for CsrfConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            token_expiry_ms: 60 * 60 * 1000, // 1 hour
            sweep_interval_secs: 300,        // 5 minutes
            cookie_name: "csrf-token".to_string(),
            header_name: "x-csrf-token".to_string(),
            secure_cookie: true,
            rotate_on_use: false,
            exempt_paths: vec!["/health".to_string()],
        }
    }
}
