//! Cache key namespaces and TTL presets.

use std::fmt;
use std::time::Duration;

/// Module namespaces used as the first key segment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CachePrefix {
    Session,
    Api,
    Query,
    Kpi,
    User,
    Org,
    Theme,
    Perm,
}

impl CachePrefix {
    pub fn as_str(&self) -> &'static str {
        match self {
            CachePrefix::Session => "sess",
            CachePrefix::Api => "api",
            CachePrefix::Query => "query",
            CachePrefix::Kpi => "kpi",
            CachePrefix::User => "user",
            CachePrefix::Org => "org",
            CachePrefix::Theme => "theme",
            CachePrefix::Perm => "perm",
        }
    }
}

/// Standard freshness windows.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TtlPreset {
    /// Real-time data, e.g. KPIs.
    Short,
    /// Frequently updated data.
    Medium,
    /// Stable data.
    Long,
    /// Rarely changes.
    Static,
}

impl TtlPreset {
    pub fn duration(&self) -> Duration {
        match self {
            TtlPreset::Short => Duration::from_secs(60),
            TtlPreset::Medium => Duration::from_secs(300),
            TtlPreset::Long => Duration::from_secs(900),
            TtlPreset::Static => Duration::from_secs(86_400),
        }
    }
}

/// A `:`-separated key: namespace followed by discriminators.
///
/// ```
/// use request_governance::cache::{CacheKey, CachePrefix};
///
/// let key = CacheKey::new(CachePrefix::Kpi).part(42).part("revenue");
/// assert_eq!(key.as_str(), "kpi:42:revenue");
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheKey {
    buf: String,
}

impl CacheKey {
    pub fn new(prefix: CachePrefix) -> Self {
        Self::namespace(prefix.as_str())
    }

    /// Start a key under an arbitrary namespace.
    pub fn namespace(namespace: &str) -> Self {
        Self {
            buf: namespace.to_string(),
        }
    }

    /// Append a discriminator.
    pub fn part(mut self, part: impl fmt::Display) -> Self {
        use std::fmt::Write;
        // Writing to a String cannot fail.
        let _ = write!(self.buf, ":{part}");
        self
    }

    pub fn as_str(&self) -> &str {
        &self.buf
    }

    pub fn into_string(self) -> String {
        self.buf
    }

    /// The key as a prefix matching everything nested below it.
    pub fn into_prefix(mut self) -> String {
        self.buf.push(':');
        self.buf
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.buf)
    }
}

impl From<CacheKey> for String {
    fn from(key: CacheKey) -> Self {
        key.buf
    }
}
