//! The `Governor`: one object owning the three stores and the live policy.

use arc_swap::ArcSwap;
use axum::extract::Request;
use axum::http::{header, HeaderValue};
use axum::response::{IntoResponse, Response};
use futures_util::FutureExt;
use std::future::Future;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use crate::cache::{CacheStatus, ResponseCache};
use crate::config::{CacheRouteConfig, GovernanceConfig};
use crate::error::{CacheError, CsrfError, GovernanceError};
use crate::governance::policy;
use crate::governance::request::RequestDescriptor;
use crate::governance::response::{self, CachedResponse, HandlerFailure, X_CACHE};
use crate::observability::metrics;
use crate::security::{csrf, CsrfStore, RateLimitDecision, RateLimiter};
use crate::timing::SharedClock;

/// Run a store operation, turning a panic into `StoreInternal`.
fn guarded<T>(component: &'static str, op: impl FnOnce() -> T) -> Result<T, GovernanceError> {
    catch_unwind(AssertUnwindSafe(op)).map_err(|_| GovernanceError::StoreInternal { component })
}

/// A handler and its request, claimed once by either the cache fetch or the direct fallback.
struct PendingHandler<H>(Arc<Mutex<Option<(H, Request)>>>);

impl<H> PendingHandler<H> {
    fn new(handler: H, request: Request) -> Self {
        Self(Arc::new(Mutex::new(Some((handler, request)))))
    }

    fn share(&self) -> Self {
        Self(Arc::clone(&self.0))
    }

    fn take(&self) -> Option<(H, Request)> {
        self.0.lock().ok().and_then(|mut pending| pending.take())
    }
}

type Lookup = Result<(CachedResponse, CacheStatus), CacheError>;

/// Await a cache lookup. If the cache panics, serve the request from the handler instead.
async fn lookup_or_bypass<H, Fut, L>(lookup: L, pending: &PendingHandler<H>, key: &str) -> Result<Lookup, Response>
where
    H: FnOnce(Request) -> Fut,
    Fut: Future<Output = Response>,
    L: Future<Output = Lookup>,
{
    match AssertUnwindSafe(lookup).catch_unwind().await {
        Ok(result) => Ok(result),
        Err(_) => {
            tracing::error!(key = %key, "Response cache failed, calling handler directly");
            match pending.take() {
                Some((handler, request)) => Err(handler(request).await),
                None => Err(GovernanceError::StoreInternal { component: "cache" }.into_response()),
            }
        }
    }
}

pub struct Governor {
    config: ArcSwap<GovernanceConfig>,
    limiter: RateLimiter,
    cache: ResponseCache<CachedResponse>,
    csrf: CsrfStore,
    clock: SharedClock,
}

impl Governor {
    pub fn new(config: GovernanceConfig, clock: SharedClock) -> Self {
        if !config.csrf.enabled {
            tracing::warn!("CSRF protection is disabled by configuration");
        }

        Self {
            limiter: RateLimiter::new(clock.clone()),
            cache: ResponseCache::with_max_entries(clock.clone(), config.cache.max_entries),
            csrf: CsrfStore::new(&config.csrf, clock.clone()),
            config: ArcSwap::from_pointee(config),
            clock,
        }
    }

    /// Current policy snapshot.
    pub fn config(&self) -> Arc<GovernanceConfig> {
        self.config.load_full()
    }

    pub fn rate_limiter(&self) -> &RateLimiter {
        &self.limiter
    }

    pub fn cache(&self) -> &ResponseCache<CachedResponse> {
        &self.cache
    }

    pub fn csrf(&self) -> &CsrfStore {
        &self.csrf
    }

    /// Start the background sweeps. Needs a Tokio runtime.
    pub fn start(&self) {
        let config = self.config.load();
        self.limiter
            .start_sweeper(Duration::from_secs(config.rate_limit.sweep_interval_secs));
        self.csrf
            .start_sweeper(Duration::from_secs(config.csrf.sweep_interval_secs));
        tracing::info!(
            rate_limit_sweep_secs = config.rate_limit.sweep_interval_secs,
            csrf_sweep_secs = config.csrf.sweep_interval_secs,
            "Governance sweepers started"
        );
    }

    /// Stop the background sweeps.
    pub async fn close(&self) {
        self.limiter.close().await;
        self.csrf.close().await;
        tracing::info!("Governance sweepers stopped");
    }

    /// Swap in new policies. Store lifetimes (sweep intervals, token expiry) keep their startup values.
    pub fn reload(&self, config: GovernanceConfig) {
        let previous = self.config.load();
        if previous.csrf.enabled && !config.csrf.enabled {
            tracing::warn!("CSRF protection disabled by configuration reload");
        }
        if previous.csrf.token_expiry_ms != config.csrf.token_expiry_ms {
            tracing::warn!(
                current_ms = self.csrf.token_expiry_ms(),
                requested_ms = config.csrf.token_expiry_ms,
                "CSRF token expiry changes take effect on restart"
            );
        }

        tracing::info!(
            rate_limit_routes = config.rate_limit.routes.len(),
            cache_routes = config.cache.routes.len(),
            csrf_enabled = config.csrf.enabled,
            "Governance policies reloaded"
        );
        self.config.store(Arc::new(config));
    }

    /// Double-submit check for an unsafe request. Fails closed on internal error.
    pub fn check_csrf(&self, config: &GovernanceConfig, descriptor: &RequestDescriptor) -> Result<(), GovernanceError> {
        let header_token = descriptor.header(&config.csrf.header_name);
        let cookie_token = descriptor.cookie(&config.csrf.cookie_name);

        let reason = match guarded("csrf", || self.csrf.validate(header_token, cookie_token)) {
            Ok(Ok(())) => return Ok(()),
            Ok(Err(reason)) => reason,
            Err(e) => {
                tracing::error!(error = %e, path = %descriptor.path, "CSRF store failed, rejecting request");
                CsrfError::Invalid
            }
        };

        metrics::record_csrf_rejected(reason.kind());
        tracing::warn!(
            client = %descriptor.client_id,
            method = %descriptor.method,
            path = %descriptor.path,
            reason = reason.kind(),
            "CSRF validation failed"
        );
        Err(reason.into())
    }

    /// Count the request against its quota. Fails open on internal error.
    ///
    /// Returns the decision to report in `X-RateLimit-*` headers, or `None`
    /// when rate limiting is off or the limiter failed.
    pub fn check_rate_limit(
        &self,
        config: &GovernanceConfig,
        descriptor: &RequestDescriptor,
    ) -> Result<Option<RateLimitDecision>, GovernanceError> {
        if !config.rate_limit.enabled {
            return Ok(None);
        }

        let limit = policy::resolve_rate_limit(&config.rate_limit, &descriptor.path, descriptor.tier.as_deref());
        let key = format!("{}:{}", descriptor.client_id, limit.route);

        let decision = match guarded("rate_limit", || self.limiter.check(&key, limit.policy)) {
            Ok(decision) => decision,
            Err(e) => {
                tracing::error!(error = %e, key = %key, "Rate limiter failed, allowing request");
                return Ok(None);
            }
        };

        if decision.allowed {
            return Ok(Some(decision));
        }

        let retry_after_secs = decision.retry_after_secs(self.clock.now_ms());
        metrics::record_rate_limited(limit.label);
        tracing::warn!(
            key = %key,
            policy = limit.label,
            limit = decision.limit,
            retry_after_secs,
            "Rate limit exceeded"
        );
        Err(GovernanceError::QuotaExceeded {
            decision,
            retry_after_secs,
            message: limit.message.to_string(),
        })
    }

    /// Govern one request: CSRF, then rate limiting, then the cache or `handler`.
    pub async fn govern<H, Fut>(&self, request: Request, handler: H) -> Response
    where
        H: FnOnce(Request) -> Fut + Send + 'static,
        Fut: Future<Output = Response> + Send + 'static,
    {
        let config = self.config.load_full();
        let descriptor = RequestDescriptor::from_request(&request);
        let protected = config.csrf.enabled && !policy::is_csrf_exempt(&config.csrf, &descriptor.path);

        if protected && csrf::requires_validation(&descriptor.method) {
            if let Err(rejection) = self.check_csrf(&config, &descriptor) {
                return rejection.into_response();
            }
        }

        let decision = match self.check_rate_limit(&config, &descriptor) {
            Ok(decision) => decision,
            Err(rejection) => return rejection.into_response(),
        };

        let cache_route = (descriptor.method == axum::http::Method::GET)
            .then(|| policy::resolve_cache_route(&config.cache, &descriptor.path))
            .flatten();

        let mut response = match cache_route {
            Some(route) => {
                self.serve_cached(route, config.cache.max_body_bytes, &descriptor, request, handler)
                    .await
            }
            None => handler(request).await,
        };

        if let Some(decision) = decision {
            response::apply_rate_limit_headers(response.headers_mut(), &decision);
        }
        if protected {
            match guarded("csrf", || self.csrf.issue()) {
                Ok(issued) => response::attach_csrf_token(response.headers_mut(), &config.csrf, &issued),
                Err(e) => tracing::error!(error = %e, "Could not issue CSRF token"),
            }
        }
        response
    }

    async fn serve_cached<H, Fut>(
        &self,
        route: &CacheRouteConfig,
        max_body_bytes: usize,
        descriptor: &RequestDescriptor,
        request: Request,
        handler: H,
    ) -> Response
    where
        H: FnOnce(Request) -> Fut + Send + 'static,
        Fut: Future<Output = Response> + Send + 'static,
    {
        let key = policy::cache_key(route, descriptor);
        let options = policy::fetch_options(route);
        let pending = PendingHandler::new(handler, request);
        let claimed = pending.share();
        let fetch = move || async move {
            let (handler, request) = claimed.take().ok_or(HandlerFailure::Detached)?;
            CachedResponse::buffer(handler(request).await, max_body_bytes).await
        };

        let lookup = self.cache.get_or_fetch_with_status(&key, &options, fetch);
        let result = match lookup_or_bypass(lookup, &pending, &key).await {
            Ok(result) => result,
            Err(direct) => return direct,
        };

        match result {
            Ok((cached, status)) => {
                tracing::debug!(key = %key, route = %route.name, status = status.as_str(), "Served cache-backed route");
                let mut response = cached.into_response();
                let headers = response.headers_mut();
                if let Ok(value) = HeaderValue::from_str(&options.cache_control().header_value()) {
                    headers.insert(header::CACHE_CONTROL, value);
                }
                headers.insert(X_CACHE, HeaderValue::from_static(status.as_str()));
                response
            }
            Err(err) => {
                if let Some(HandlerFailure::Uncacheable(passthrough)) = err.downcast_upstream::<HandlerFailure>() {
                    return passthrough.clone().into_response();
                }
                tracing::warn!(key = %key, route = %route.name, error = %err, "Cache-backed route failed");
                GovernanceError::Cache(err).into_response()
            }
        }
    }
}
