use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::cache::CacheStats;
use crate::governance::Governor;

#[derive(Serialize)]
pub struct SystemStatus {
    pub version: &'static str,
    pub status: &'static str,
}

#[derive(Serialize)]
pub struct RateLimitStats {
    pub enabled: bool,
    pub tracked_keys: usize,
}

#[derive(Serialize)]
pub struct CsrfStats {
    pub enabled: bool,
    pub live_tokens: usize,
}

#[derive(Serialize)]
pub struct GovernanceStats {
    pub rate_limit: RateLimitStats,
    pub cache: CacheStats,
    pub csrf: CsrfStats,
}

/// Exactly one of `key` or `prefix`.
#[derive(Debug, Deserialize)]
pub struct InvalidateRequest {
    pub key: Option<String>,
    pub prefix: Option<String>,
}

#[derive(Serialize)]
pub struct InvalidateResult {
    pub removed: usize,
}

#[derive(Serialize)]
pub struct ResetResult {
    pub cleared: bool,
}

pub async fn get_status() -> Json<SystemStatus> {
    Json(SystemStatus {
        version: env!("CARGO_PKG_VERSION"),
        status: "operational",
    })
}

pub async fn get_stats(State(governor): State<Arc<Governor>>) -> Json<GovernanceStats> {
    let config = governor.config();
    Json(GovernanceStats {
        rate_limit: RateLimitStats {
            enabled: config.rate_limit.enabled,
            tracked_keys: governor.rate_limiter().len(),
        },
        cache: governor.cache().stats(),
        csrf: CsrfStats {
            enabled: config.csrf.enabled,
            live_tokens: governor.csrf().len(),
        },
    })
}

pub async fn invalidate_cache(
    State(governor): State<Arc<Governor>>,
    Json(request): Json<InvalidateRequest>,
) -> Result<Json<InvalidateResult>, (StatusCode, Json<serde_json::Value>)> {
    let removed = match (request.key, request.prefix) {
        (Some(key), None) => usize::from(governor.cache().invalidate(&key)),
        (None, Some(prefix)) if !prefix.is_empty() => governor.cache().invalidate_prefix(&prefix),
        _ => {
            return Err((
                StatusCode::BAD_REQUEST,
                Json(serde_json::json!({ "error": "provide exactly one of \"key\" or a non-empty \"prefix\"" })),
            ))
        }
    };

    tracing::info!(removed, "Cache invalidated via admin API");
    Ok(Json(InvalidateResult { removed }))
}

pub async fn reset_rate_limit(
    State(governor): State<Arc<Governor>>,
    Path(key): Path<String>,
) -> Json<ResetResult> {
    let cleared = governor.rate_limiter().reset(&key);
    tracing::info!(key = %key, cleared, "Rate limit reset via admin API");
    Json(ResetResult { cleared })
}
