//! Cache entry, fetch options and HTTP cache metadata.

use serde::Serialize;
use std::time::Duration;

use crate::cache::key::TtlPreset;

/// Lifecycle state of a stored entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum EntryState {
    Fresh,
    Stale,
    Revalidating,
}

/// How a `get_or_fetch` call was answered.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheStatus {
    /// Fresh entry, no computation.
    Hit,
    /// Stale entry served while a refresh runs.
    Stale,
    /// Value came from a computation this call started or joined.
    Miss,
}

impl CacheStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            CacheStatus::Hit => "HIT",
            CacheStatus::Stale => "STALE",
            CacheStatus::Miss => "MISS",
        }
    }
}

/// Per-call caching policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FetchOptions {
    /// Freshness window.
    pub ttl: Duration,
    /// Serve stale values while refreshing in the background.
    pub stale_while_revalidate: bool,
    /// How long past `ttl` a stale value may be served. `None` = no hard expiry.
    pub stale_window: Option<Duration>,
    /// Longest a caller waits on a miss. The computation itself is not cancelled.
    pub timeout: Option<Duration>,
}

impl FetchOptions {
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            stale_while_revalidate: false,
            stale_window: None,
            timeout: None,
        }
    }

    pub fn preset(preset: TtlPreset) -> Self {
        Self::new(preset.duration())
    }

    pub fn with_stale_while_revalidate(mut self, stale_window: Option<Duration>) -> Self {
        self.stale_while_revalidate = true;
        self.stale_window = stale_window;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// `Cache-Control` directives matching this policy.
    pub fn cache_control(&self) -> CacheControl {
        CacheControl {
            max_age_secs: self.ttl.as_secs(),
            stale_while_revalidate_secs: self
                .stale_while_revalidate
                .then(|| self.stale_window.unwrap_or(self.ttl).as_secs()),
        }
    }

    pub(crate) fn policy(&self) -> EntryPolicy {
        EntryPolicy {
            ttl_ms: self.ttl.as_millis() as u64,
            stale_while_revalidate: self.stale_while_revalidate,
            stale_window_ms: self.stale_window.map(|w| w.as_millis() as u64),
        }
    }
}

/// `Cache-Control` metadata for HTTP-layer caches.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CacheControl {
    pub max_age_secs: u64,
    pub stale_while_revalidate_secs: Option<u64>,
}

impl CacheControl {
    pub fn header_value(&self) -> String {
        match self.stale_while_revalidate_secs {
            Some(swr) => format!("max-age={}, stale-while-revalidate={}", self.max_age_secs, swr),
            None => format!("max-age={}", self.max_age_secs),
        }
    }
}

/// Freshness policy recorded alongside a value.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct EntryPolicy {
    pub ttl_ms: u64,
    pub stale_while_revalidate: bool,
    pub stale_window_ms: Option<u64>,
}

/// Where an entry's age falls relative to a policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Freshness {
    Fresh,
    /// Past the TTL but still servable under stale-while-revalidate.
    Servable,
    /// Must be recomputed before use.
    Expired,
}

impl EntryPolicy {
    pub fn classify(&self, age_ms: u64) -> Freshness {
        if age_ms <= self.ttl_ms {
            return Freshness::Fresh;
        }
        if !self.stale_while_revalidate {
            return Freshness::Expired;
        }
        match self.stale_window_ms {
            Some(window) if age_ms > self.ttl_ms.saturating_add(window) => Freshness::Expired,
            _ => Freshness::Servable,
        }
    }
}

/// A memoized value with the policy it was stored under.
#[derive(Debug, Clone)]
pub(crate) struct CacheEntry<V> {
    pub value: V,
    pub stored_at_ms: u64,
    pub policy: EntryPolicy,
}

impl<V> CacheEntry<V> {
    pub fn age_ms(&self, now_ms: u64) -> u64 {
        now_ms.saturating_sub(self.stored_at_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classify() {
        let plain = FetchOptions::new(Duration::from_millis(1_000)).policy();
        assert_eq!(plain.classify(1_000), Freshness::Fresh);
        assert_eq!(plain.classify(1_001), Freshness::Expired);

        let swr = FetchOptions::new(Duration::from_millis(1_000))
            .with_stale_while_revalidate(Some(Duration::from_millis(500)))
            .policy();
        assert_eq!(swr.classify(1_500), Freshness::Servable);
        assert_eq!(swr.classify(1_501), Freshness::Expired);

        let unbounded = FetchOptions::new(Duration::from_millis(1_000))
            .with_stale_while_revalidate(None)
            .policy();
        assert_eq!(unbounded.classify(u64::MAX), Freshness::Servable);
    }

    #[test]
    fn test_cache_control_header() {
        let plain = FetchOptions::new(Duration::from_secs(60));
        assert_eq!(plain.cache_control().header_value(), "max-age=60");

        let swr = plain.with_stale_while_revalidate(Some(Duration::from_secs(300)));
        assert_eq!(swr.cache_control().header_value(), "max-age=60, stale-while-revalidate=300");

        let unbounded = plain.with_stale_while_revalidate(None);
        assert_eq!(unbounded.cache_control().header_value(), "max-age=60, stale-while-revalidate=60");
    }
}
