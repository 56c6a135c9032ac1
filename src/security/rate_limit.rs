//! Fixed-window rate limiting.
//!
//! One record per key (client + route). The first request of a window opens
//! it with `count = 1`; requests are counted until `limit`, after which they
//! are denied without being counted. A request at or after `reset_at` opens a
//! fresh window. Bursts straddling a boundary may see up to `2 × limit`
//! requests pass, as usual for fixed windows.

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use serde::Serialize;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use crate::config::RateLimitPolicy;
use crate::timing::{PeriodicTask, SharedClock};

/// Counter state for one key.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateLimitRecord {
    /// Requests counted in the current window, capped at the limit.
    pub count: u32,
    /// End of the current window (ms).
    pub window_reset_at_ms: u64,
}

impl RateLimitRecord {
    fn open(now_ms: u64, window_ms: u64) -> Self {
        Self {
            count: 1,
            window_reset_at_ms: now_ms.saturating_add(window_ms),
        }
    }

    fn is_expired(&self, now_ms: u64) -> bool {
        now_ms >= self.window_reset_at_ms
    }
}

/// Outcome of a single `check`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct RateLimitDecision {
    pub allowed: bool,
    pub limit: u32,
    pub remaining: u32,
    pub reset_at_ms: u64,
}

impl RateLimitDecision {
    /// Whole seconds until the window resets, at least 1.
    pub fn retry_after_secs(&self, now_ms: u64) -> u64 {
        self.reset_at_ms.saturating_sub(now_ms).div_ceil(1000).max(1)
    }
}

/// In-memory fixed-window limiter keyed by opaque strings.
pub struct RateLimiter {
    records: Arc<DashMap<String, RateLimitRecord>>,
    clock: SharedClock,
    sweeper: Mutex<Option<PeriodicTask>>,
}

impl RateLimiter {
    pub fn new(clock: SharedClock) -> Self {
        Self {
            records: Arc::new(DashMap::new()),
            clock,
            sweeper: Mutex::new(None),
        }
    }

    /// Count a request against `key` and decide whether it may proceed.
    ///
    /// Atomic per key: the shard lock is held across read-modify-write.
    pub fn check(&self, key: &str, policy: RateLimitPolicy) -> RateLimitDecision {
        let limit = policy.max_requests.max(1);
        let window_ms = policy.window_ms.max(1);
        let now = self.clock.now_ms();

        let record = match self.records.entry(key.to_owned()) {
            Entry::Vacant(vacant) => {
                *vacant.insert(RateLimitRecord::open(now, window_ms))
            }
            Entry::Occupied(mut occupied) => {
                let current = *occupied.get();
                if current.is_expired(now) {
                    occupied.insert(RateLimitRecord::open(now, window_ms));
                } else if current.count < limit {
                    occupied.get_mut().count += 1;
                } else {
                    return RateLimitDecision {
                        allowed: false,
                        limit,
                        remaining: 0,
                        reset_at_ms: current.window_reset_at_ms,
                    };
                }
                *occupied.get()
            }
        };

        RateLimitDecision {
            allowed: true,
            limit,
            remaining: limit.saturating_sub(record.count),
            reset_at_ms: record.window_reset_at_ms,
        }
    }

    /// Forget the record for `key`. Returns whether one existed.
    pub fn reset(&self, key: &str) -> bool {
        self.records.remove(key).is_some()
    }

    /// Current record for `key`, expired or not.
    pub fn record(&self, key: &str) -> Option<RateLimitRecord> {
        self.records.get(key).map(|r| *r.value())
    }

    /// Remove every record whose window has ended.
    pub fn sweep(&self) -> usize {
        sweep_expired(&self.records, self.clock.now_ms())
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Start the background sweep. Replaces any sweep already running.
    pub fn start_sweeper(&self, interval: Duration) {
        let records = self.records.clone();
        let clock = self.clock.clone();

        let task = PeriodicTask::spawn("rate_limit_sweep", interval, move || {
            let removed = sweep_expired(&records, clock.now_ms());
            if removed > 0 {
                tracing::debug!(removed, remaining = records.len(), "Swept expired rate limit windows");
            }
            crate::observability::metrics::record_tracked_keys("rate_limit", records.len());
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

fn sweep_expired(records: &DashMap<String, RateLimitRecord>, now_ms: u64) -> usize {
    let mut removed = 0;
    records.retain(|_, record| {
        let keep = !record.is_expired(now_ms);
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

    fn policy(max_requests: u32, window_ms: u64) -> RateLimitPolicy {
        RateLimitPolicy {
            window_ms,
            max_requests,
        }
    }

    #[test]
    fn test_quota_exactness() {
        let clock = ManualClock::new(10_000);
        let limiter = RateLimiter::new(clock.shared());
        let p = policy(5, 60_000);

        let decisions: Vec<_> = (0..7).map(|_| limiter.check("ip:1.2.3.4:/api", p)).collect();
        let allowed: Vec<_> = decisions.iter().map(|d| d.allowed).collect();
        assert_eq!(allowed, vec![true, true, true, true, true, false, false]);

        let remaining: Vec<_> = decisions.iter().map(|d| d.remaining).collect();
        assert_eq!(remaining, vec![4, 3, 2, 1, 0, 0, 0]);
        assert!(decisions.iter().all(|d| d.reset_at_ms == 70_000));
    }

    #[test]
    fn test_window_reset() {
        let clock = ManualClock::new(0);
        let limiter = RateLimiter::new(clock.shared());
        let p = policy(2, 1_000);

        limiter.check("k", p);
        limiter.check("k", p);
        assert!(!limiter.check("k", p).allowed);

        clock.advance_ms(1_001);
        let decision = limiter.check("k", p);
        assert!(decision.allowed);
        assert_eq!(decision.remaining, 1);
        assert_eq!(decision.reset_at_ms, 2_001);
    }

    #[test]
    fn test_request_at_reset_boundary_opens_new_window() {
        let clock = ManualClock::new(0);
        let limiter = RateLimiter::new(clock.shared());
        let p = policy(1, 500);

        assert!(limiter.check("k", p).allowed);
        assert!(!limiter.check("k", p).allowed);

        clock.set(500);
        let decision = limiter.check("k", p);
        assert!(decision.allowed);
        assert_eq!(decision.reset_at_ms, 1_000);
    }

    #[test]
    fn test_deny_does_not_grow_count() {
        let clock = ManualClock::new(0);
        let limiter = RateLimiter::new(clock.shared());
        let p = policy(3, 60_000);

        for _ in 0..10_000 {
            limiter.check("flood", p);
        }
        assert_eq!(limiter.record("flood").unwrap().count, 3);
    }

    #[test]
    fn test_keys_are_independent() {
        let clock = ManualClock::new(0);
        let limiter = RateLimiter::new(clock.shared());
        let p = policy(1, 60_000);

        assert!(limiter.check("a", p).allowed);
        assert!(limiter.check("b", p).allowed);
        assert!(!limiter.check("a", p).allowed);
    }

    #[test]
    fn test_zero_limit_treated_as_one() {
        let clock = ManualClock::new(0);
        let limiter = RateLimiter::new(clock.shared());

        let first = limiter.check("k", policy(0, 1_000));
        assert!(first.allowed);
        assert_eq!(first.limit, 1);
        assert!(!limiter.check("k", policy(0, 1_000)).allowed);
    }

    #[test]
    fn test_retry_after_rounds_up() {
        let decision = RateLimitDecision {
            allowed: false,
            limit: 1,
            remaining: 0,
            reset_at_ms: 10_001,
        };
        assert_eq!(decision.retry_after_secs(9_000), 2);
        assert_eq!(decision.retry_after_secs(10_001), 1);
        assert_eq!(decision.retry_after_secs(20_000), 1);
    }

    #[test]
    fn test_reset_and_sweep() {
        let clock = ManualClock::new(0);
        let limiter = RateLimiter::new(clock.shared());

        limiter.check("short", policy(1, 100));
        limiter.check("long", policy(1, 10_000));
        assert!(limiter.reset("long"));
        assert!(!limiter.reset("long"));

        limiter.check("long", policy(1, 10_000));
        clock.advance_ms(100);
        assert_eq!(limiter.sweep(), 1);
        assert_eq!(limiter.len(), 1);
        assert!(limiter.record("short").is_none());
    }

    #[test]
    fn test_concurrent_checks_count_exactly() {
        let clock = ManualClock::new(0);
        let limiter = Arc::new(RateLimiter::new(clock.shared()));
        let p = policy(250, 60_000);

        let allowed: usize = std::thread::scope(|s| {
            let handles: Vec<_> = (0..8)
                .map(|_| {
                    let limiter = limiter.clone();
                    s.spawn(move || (0..100).filter(|_| limiter.check("shared", p).allowed).count())
                })
                .collect();
            handles.into_iter().map(|h| h.join().unwrap()).sum()
        });

        assert_eq!(allowed, 250);
        assert_eq!(limiter.record("shared").unwrap().count, 250);
    }

    #[tokio::test(start_paused = true)]
    async fn test_background_sweep_removes_expired() {
        let clock = ManualClock::new(0);
        let limiter = RateLimiter::new(clock.shared());
        limiter.check("k", policy(1, 1_000));

        limiter.start_sweeper(Duration::from_secs(1));
        clock.advance_ms(2_000);
        tokio::time::sleep(Duration::from_millis(1_100)).await;

        assert!(limiter.is_empty());
        limiter.close().await;
        limiter.close().await;
    }
}
