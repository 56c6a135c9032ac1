//! Double-submit CSRF tokens.
//!
//! # Responsibilities
//! - Issue high-entropy tokens and remember only their SHA-256
//! - Validate a header/cookie pair against the store
//! - Sweep expired tokens in the background
//!
//! # Design Decisions
//! - The store never holds a usable token, only `hash → issued_at`
//! - Header and cookie are compared in constant time before any lookup
//! - Tokens stay valid until expiry unless `rotate_on_use` is set

use axum::http::Method;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use rand::rngs::OsRng;
use rand::RngCore;
use serde::Serialize;
use sha2::{Digest, Sha256};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use subtle::ConstantTimeEq;

use crate::config::CsrfConfig;
use crate::error::CsrfError;
use crate::timing::{PeriodicTask, SharedClock};

/// Raw token size before encoding.
pub const TOKEN_BYTES: usize = 32;

/// A freshly issued token, to be placed in a cookie and a response header.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct IssuedToken {
    pub token: String,
    pub expires_in_ms: u64,
}

/// Whether `method` changes state and therefore needs a token.
pub fn requires_validation(method: &Method) -> bool {
    *method != Method::GET && *method != Method::HEAD && *method != Method::OPTIONS
}

/// Hex SHA-256 of a raw token; the store key.
pub fn hash_token(token: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(token.as_bytes());
    format!("{:x}", hasher.finalize())
}

fn generate_token() -> String {
    let mut bytes = [0u8; TOKEN_BYTES];
    OsRng.fill_bytes(&mut bytes);
    URL_SAFE_NO_PAD.encode(bytes)
}

/// In-memory store of issued token hashes.
pub struct CsrfStore {
    tokens: Arc<DashMap<String, u64>>,
    clock: SharedClock,
    token_expiry_ms: u64,
    rotate_on_use: bool,
    sweeper: Mutex<Option<PeriodicTask>>,
}

impl CsrfStore {
    pub fn new(config: &CsrfConfig, clock: SharedClock) -> Self {
        Self {
            tokens: Arc::new(DashMap::new()),
            clock,
            token_expiry_ms: config.token_expiry_ms,
            rotate_on_use: config.rotate_on_use,
            sweeper: Mutex::new(None),
        }
    }

    pub fn token_expiry_ms(&self) -> u64 {
        self.token_expiry_ms
    }

    /// Generate a token and record its hash.
    pub fn issue(&self) -> IssuedToken {
        let now = self.clock.now_ms();
        loop {
            let token = generate_token();
            // 256-bit collisions do not happen; the loop keeps insert-if-absent honest.
            if let Entry::Vacant(vacant) = self.tokens.entry(hash_token(&token)) {
                vacant.insert(now);
                return IssuedToken {
                    token,
                    expires_in_ms: self.token_expiry_ms,
                };
            }
        }
    }

    /// Check a header token against its cookie twin and the store.
    pub fn validate(&self, header_token: Option<&str>, cookie_token: Option<&str>) -> Result<(), CsrfError> {
        let (header, cookie) = match (header_token, cookie_token) {
            (Some(h), Some(c)) if !h.is_empty() && !c.is_empty() => (h, c),
            _ => return Err(CsrfError::Missing),
        };
        if !bool::from(header.as_bytes().ct_eq(cookie.as_bytes())) {
            return Err(CsrfError::Mismatch);
        }

        let now = self.clock.now_ms();
        match self.tokens.entry(hash_token(header)) {
            Entry::Vacant(_) => Err(CsrfError::Invalid),
            Entry::Occupied(occupied) => {
                let issued_at = *occupied.get();
                if now.saturating_sub(issued_at) > self.token_expiry_ms {
                    occupied.remove();
                    Err(CsrfError::Expired)
                } else {
                    if self.rotate_on_use {
                        occupied.remove();
                    }
                    Ok(())
                }
            }
        }
    }

    /// Boolean form of [`CsrfStore::validate`].
    pub fn is_valid(&self, header_token: Option<&str>, cookie_token: Option<&str>) -> bool {
        self.validate(header_token, cookie_token).is_ok()
    }

    /// Forget a raw token. Returns whether it was known.
    pub fn revoke(&self, token: &str) -> bool {
        self.tokens.remove(&hash_token(token)).is_some()
    }

    /// Remove every expired token.
    pub fn sweep(&self) -> usize {
        sweep_expired(&self.tokens, self.clock.now_ms(), self.token_expiry_ms)
    }

    pub fn len(&self) -> usize {
        self.tokens.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tokens.is_empty()
    }

    /// Start the background sweep. Replaces any sweep already running.
    pub fn start_sweeper(&self, interval: Duration) {
        let tokens = self.tokens.clone();
        let clock = self.clock.clone();
        let expiry_ms = self.token_expiry_ms;

        let task = PeriodicTask::spawn("csrf_sweep", interval, move || {
            let removed = sweep_expired(&tokens, clock.now_ms(), expiry_ms);
            if removed > 0 {
                tracing::debug!(removed, remaining = tokens.len(), "Swept expired CSRF tokens");
            }
            crate::observability::metrics::record_tracked_keys("csrf", tokens.len());
        });

        let previous = self
            .sweeper
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .replace(task);
        drop(previous);
    }

    /// Stop the background sweep. Safe to call more than once.
    pub async fn close(&self) {
        let task = self
            .sweeper
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(task) = task {
            task.stop().await;
        }
    }
}

fn sweep_expired(tokens: &DashMap<String, u64>, now_ms: u64, expiry_ms: u64) -> usize {
    let mut removed = 0;
    tokens.retain(|_, issued_at| {
        let keep = now_ms.saturating_sub(*issued_at) <= expiry_ms;
        if !keep {
            removed += 1;
        }
        keep
    });
    removed
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::timing::ManualClock;

    fn store(clock: &ManualClock, expiry_ms: u64) -> CsrfStore {
        let config = CsrfConfig {
            token_expiry_ms: expiry_ms,
            ..CsrfConfig::default()
        };
        CsrfStore::new(&config, clock.shared())
    }

    #[test]
    fn test_round_trip() {
        let clock = ManualClock::new(0);
        let store = store(&clock, 1_000);

        let issued = store.issue();
        assert_eq!(issued.expires_in_ms, 1_000);
        assert_eq!(issued.token.len(), 43);
        assert!(store.is_valid(Some(&issued.token), Some(&issued.token)));
        // reusable until expiry
        assert!(store.is_valid(Some(&issued.token), Some(&issued.token)));
    }

    #[test]
    fn test_expired_token_rejected_and_evicted() {
        let clock = ManualClock::new(0);
        let store = store(&clock, 1_000);
        let issued = store.issue();

        clock.set(1_000);
        assert!(store.is_valid(Some(&issued.token), Some(&issued.token)));

        clock.set(1_001);
        assert_eq!(
            store.validate(Some(&issued.token), Some(&issued.token)),
            Err(CsrfError::Expired)
        );
        assert!(store.is_empty());
        assert_eq!(
            store.validate(Some(&issued.token), Some(&issued.token)),
            Err(CsrfError::Invalid)
        );
    }

    #[test]
    fn test_missing_and_mismatch() {
        let clock = ManualClock::new(0);
        let store = store(&clock, 1_000);
        let a = store.issue();
        let b = store.issue();

        assert_eq!(store.validate(None, Some(&a.token)), Err(CsrfError::Missing));
        assert_eq!(store.validate(Some(&a.token), None), Err(CsrfError::Missing));
        assert_eq!(store.validate(Some(""), Some("")), Err(CsrfError::Missing));
        assert_eq!(store.validate(Some(&a.token), Some(&b.token)), Err(CsrfError::Mismatch));
    }

    #[test]
    fn test_unknown_token_invalid() {
        let clock = ManualClock::new(0);
        let store = store(&clock, 1_000);
        assert_eq!(store.validate(Some("forged"), Some("forged")), Err(CsrfError::Invalid));
    }

    #[test]
    fn test_store_holds_hashes_only() {
        let clock = ManualClock::new(0);
        let store = store(&clock, 1_000);
        let issued = store.issue();

        assert!(store.tokens.get(&issued.token).is_none());
        assert!(store.tokens.get(&hash_token(&issued.token)).is_some());
    }

    #[test]
    fn test_rotate_on_use_consumes_token() {
        let clock = ManualClock::new(0);
        let config = CsrfConfig {
            rotate_on_use: true,
            ..CsrfConfig::default()
        };
        let store = CsrfStore::new(&config, clock.shared());
        let issued = store.issue();

        assert!(store.is_valid(Some(&issued.token), Some(&issued.token)));
        assert_eq!(
            store.validate(Some(&issued.token), Some(&issued.token)),
            Err(CsrfError::Invalid)
        );
    }

    #[test]
    fn test_revoke_and_sweep() {
        let clock = ManualClock::new(0);
        let store = store(&clock, 1_000);
        let old = store.issue();
        clock.set(600);
        let young = store.issue();

        assert!(store.revoke(&old.token));
        assert!(!store.revoke(&old.token));

        store.issue();
        clock.set(1_601);
        assert_eq!(store.sweep(), 2);
        assert!(store.is_empty());
        assert!(!store.is_valid(Some(&young.token), Some(&young.token)));
    }

    #[test]
    fn test_method_scope() {
        assert!(!requires_validation(&Method::GET));
        assert!(!requires_validation(&Method::HEAD));
        assert!(!requires_validation(&Method::OPTIONS));
        assert!(requires_validation(&Method::POST));
        assert!(requires_validation(&Method::PUT));
        assert!(requires_validation(&Method::PATCH));
        assert!(requires_validation(&Method::DELETE));
    }
}
