//! Resolving configured policies for a request.

use std::borrow::Cow;
use std::time::Duration;

use crate::cache::{CacheKey, FetchOptions};
use crate::config::{CacheConfig, CacheRouteConfig, CsrfConfig, RateLimitConfig, RateLimitPolicy};
use crate::governance::request::RequestDescriptor;

/// Whether `path` falls under `prefix`, on a segment boundary.
///
/// `/api/kpis` matches `/api/kpis` and `/api/kpis/7` but not `/api/kpisx`.
pub fn path_matches(path: &str, prefix: &str) -> bool {
    match path.strip_prefix(prefix) {
        Some(rest) => rest.is_empty() || rest.starts_with('/') || prefix.ends_with('/'),
        None => false,
    }
}

pub fn is_csrf_exempt(config: &CsrfConfig, path: &str) -> bool {
    config
        .exempt_paths
        .iter()
        .any(|prefix| path_matches(path, prefix))
}

/// The quota that applies to one request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedLimit<'a> {
    /// Route part of the limiter key.
    pub route: Cow<'a, str>,
    /// Bounded name of the policy that matched: route name, tier or `default`.
    pub label: &'a str,
    pub policy: RateLimitPolicy,
    pub message: &'a str,
}

/// Route override, then license tier, then the default quota.
///
/// Tier names match case-insensitively.
pub fn resolve_rate_limit<'a>(config: &'a RateLimitConfig, path: &'a str, tier: Option<&str>) -> ResolvedLimit<'a> {
    let route = config
        .routes
        .iter()
        .filter(|route| path_matches(path, &route.path_prefix))
        .max_by_key(|route| route.path_prefix.len());

    if let Some(route) = route {
        return ResolvedLimit {
            route: Cow::Borrowed(&route.name),
            label: &route.name,
            policy: route.policy(),
            message: route.message.as_deref().unwrap_or(&config.message),
        };
    }

    let tier = tier.and_then(|tier| config.tiers.get_key_value(tier.to_ascii_lowercase().as_str()));
    match tier {
        Some((name, tier)) => ResolvedLimit {
            route: Cow::Borrowed(path),
            label: name,
            policy: tier.policy(),
            message: tier.message.as_deref().unwrap_or(&config.message),
        },
        None => ResolvedLimit {
            route: Cow::Borrowed(path),
            label: "default",
            policy: config.default_policy(),
            message: &config.message,
        },
    }
}

/// Longest matching cache route, if caching is enabled.
pub fn resolve_cache_route<'a>(config: &'a CacheConfig, path: &str) -> Option<&'a CacheRouteConfig> {
    if !config.enabled {
        return None;
    }
    config
        .routes
        .iter()
        .filter(|route| path_matches(path, &route.path_prefix))
        .max_by_key(|route| route.path_prefix.len())
}

pub fn fetch_options(route: &CacheRouteConfig) -> FetchOptions {
    let mut options = FetchOptions::new(Duration::from_secs(route.ttl_secs));
    if route.stale_while_revalidate {
        options = options.with_stale_while_revalidate(route.stale_window_secs.map(Duration::from_secs));
    }
    if let Some(timeout_ms) = route.fetch_timeout_ms {
        options = options.with_timeout(Duration::from_millis(timeout_ms));
    }
    options
}

/// `<namespace>:<path>[?query][:<vary header values>]`
pub fn cache_key(route: &CacheRouteConfig, descriptor: &RequestDescriptor) -> String {
    route
        .vary_headers
        .iter()
        .fold(
            CacheKey::namespace(&route.namespace).part(descriptor.path_and_query()),
            |key, name| key.part(descriptor.header(name).unwrap_or_default()),
        )
        .into_string()
}
