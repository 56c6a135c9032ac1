//! Lifecycle management subsystem.
//!
//! # Data Flow
//! ```text
//! Shutdown (shutdown.rs):
//!     Signal received → stop accepting → drain in-flight requests
//!     → stop governance sweepers → exit
//!
//! Signals (signals.rs):
//!     SIGTERM/SIGINT → trigger graceful shutdown
//! ```
//!
//! # Design Decisions
//! - Ordered shutdown: listeners first, then background sweeps
//! - Subscribers register before their task starts

pub mod shutdown;
pub mod signals;

pub use shutdown::Shutdown;
