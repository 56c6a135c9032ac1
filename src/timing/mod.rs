//! Time sources and scheduled background work.
//!
//! # Data Flow
//! ```text
//! clock.rs   → now_ms() read by every store on every operation
//! sweeper.rs → PeriodicTask owned by a store, ticks its sweep() until stopped
//! ```
//!
//! # Design Decisions
//! - Time is injected, never read from a global, so tests drive it by hand
//! - Millisecond resolution is enough for windows, TTLs and token expiry
//! - A sweeper dies with its owner (stop or drop), no leaked timers

pub mod clock;
pub mod sweeper;

pub use clock::{Clock, ManualClock, SharedClock, SystemClock};
pub use sweeper::PeriodicTask;
