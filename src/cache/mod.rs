//! Response cache subsystem.
//!
//! # Data Flow
//! ```text
//! get_or_fetch(key, options, fetch):
//!     → response_cache.rs (classify stored entry under shard lock)
//!         fresh           → return value
//!         stale + SWR     → return value, refresh in background
//!         expired/missing → join or start the single in-flight computation
//!     → stats.rs (hit / stale / miss accounting)
//! ```
//!
//! # Design Decisions
//! - At most one computation per key at a time, shared by every waiter
//! - Computations run detached from callers; a caller timeout never cancels them
//! - Failed computations are never cached; failed refreshes keep the stale value
//! - Keys are plain strings, namespaced by `key.rs` helpers

pub mod key;
pub mod response_cache;
pub mod stats;
pub mod types;

pub use key::{CacheKey, CachePrefix, TtlPreset};
pub use response_cache::ResponseCache;
pub use stats::CacheStats;
pub use types::{CacheControl, CacheStatus, EntryState, FetchOptions};
