//! Governance facade subsystem.
//!
//! # Data Flow
//! ```text
//! Inbound request (axum middleware.rs)
//!     → request.rs (client id, cookies, tier → RequestDescriptor)
//!     → facade.rs:
//!         unsafe method on protected path → CSRF check   (403 on failure)
//!         client + route quota            → rate limiter (429 on deny)
//!         GET on a cache route            → response cache → handler on miss
//!         otherwise                       → handler
//!     → response.rs (X-RateLimit-*, Cache-Control, X-Cache, fresh CSRF token)
//! ```
//!
//! # Design Decisions
//! - Policies live in an `ArcSwap` so reloads never block requests
//! - A panicking store fails open for rate limiting and closed for CSRF
//! - Only 2xx handler responses are cached; others pass through to every waiter

pub mod facade;
pub mod middleware;
pub mod policy;
pub mod request;
pub mod response;

pub use facade::Governor;
pub use middleware::governance_middleware;
pub use request::{RateLimitTier, RequestDescriptor};
pub use response::CachedResponse;
