//! Security subsystem.
//!
//! # Data Flow
//! ```text
//! Incoming request:
//!     → csrf.rs (double-submit check for unsafe methods)
//!     → rate_limit.rs (per client + route fixed-window quota)
//!     → Pass to cache / handler
//! ```
//!
//! # Design Decisions
//! - Per-key locking (DashMap shards), no global lock on the request path
//! - CSRF fails closed, rate limiting fails open on internal error
//! - No trust in client input: only hashes of tokens are stored

pub mod csrf;
pub mod rate_limit;

pub use csrf::{CsrfStore, IssuedToken};
pub use rate_limit::{RateLimitDecision, RateLimitRecord, RateLimiter};
