//! Configuration management subsystem.
//!
//! # Data Flow
//! ```text
//! config file (TOML) + environment
//!     → loader.rs (parse, deserialize, apply env overrides)
//!     → validation.rs (semantic checks)
//!     → GovernanceConfig (validated, immutable)
//!     → handed to the Governor
//!
//! On file change:
//!     watcher.rs detects change
//!     → loader.rs loads new config
//!     → validation.rs validates
//!     → Governor::reload swaps policies atomically
//! ```
//!
//! # Design Decisions
//! - Config is immutable once loaded; changes require full reload
//! - All fields have defaults to allow minimal configs
//! - Validation separates syntactic (serde) from semantic checks
//! - Store lifetimes (sweep intervals) are fixed at startup; reload swaps policies only

pub mod loader;
pub mod schema;
pub mod validation;
pub mod watcher;

pub use loader::{load_config, ConfigError};
pub use schema::{
    AdminConfig, CacheConfig, CacheRouteConfig, CsrfConfig, GovernanceConfig, ListenerConfig,
    ObservabilityConfig, RateLimitConfig, RateLimitPolicy, RouteLimitConfig, TierLimitConfig,
};
