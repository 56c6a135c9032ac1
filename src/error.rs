//! Error taxonomy for the governance layer.
//!
//! Denials (quota, CSRF) are recovered locally as structured HTTP responses;
//! see `governance::response` for the mapping.

use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

use crate::security::rate_limit::RateLimitDecision;

/// Boxed error accepted from caller-supplied fetch functions.
pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Why a presented CSRF token was rejected.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum CsrfError {
    #[error("CSRF token missing")]
    Missing,
    #[error("CSRF token mismatch")]
    Mismatch,
    /// Not in the store: never issued, revoked, or already swept.
    #[error("CSRF token invalid or expired")]
    Invalid,
    #[error("CSRF token invalid or expired")]
    Expired,
}

impl CsrfError {
    /// Stable label for logs and metrics.
    pub fn kind(&self) -> &'static str {
        match self {
            CsrfError::Missing => "missing",
            CsrfError::Mismatch => "mismatch",
            CsrfError::Invalid => "invalid",
            CsrfError::Expired => "expired",
        }
    }
}

/// Failure of a cache computation.
///
/// `Clone` so one failed computation can be handed to every waiter.
#[derive(Debug, Clone, Error)]
pub enum CacheError {
    #[error("upstream computation failed: {0}")]
    Upstream(Arc<dyn std::error::Error + Send + Sync>),

    #[error("timed out after {0:?} waiting for upstream computation")]
    Timeout(Duration),

    #[error("upstream computation task failed: {0}")]
    TaskFailed(String),
}

impl CacheError {
    pub fn upstream<E: Into<BoxError>>(err: E) -> Self {
        CacheError::Upstream(Arc::from(err.into()))
    }

    /// The concrete upstream error, if it is a `T`.
    pub fn downcast_upstream<T: std::error::Error + 'static>(&self) -> Option<&T> {
        match self {
            CacheError::Upstream(inner) => inner.downcast_ref::<T>(),
            _ => None,
        }
    }
}

/// Top-level error surfaced by the governance facade.
#[derive(Debug, Error)]
pub enum GovernanceError {
    #[error("rate limit exceeded, retry after {retry_after_secs}s")]
    QuotaExceeded {
        decision: RateLimitDecision,
        retry_after_secs: u64,
        message: String,
    },

    #[error(transparent)]
    Csrf(#[from] CsrfError),

    #[error(transparent)]
    Cache(#[from] CacheError),

    #[error("internal error in {component} store")]
    StoreInternal { component: &'static str },
}
