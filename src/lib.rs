//! Request governance layer: rate limiting, response caching and CSRF
//! protection in front of an axum application.

// Leaf utilities
pub mod error;
pub mod timing;

// Stores
pub mod cache;
pub mod security;

// Composition
pub mod governance;

// Cross-cutting concerns
pub mod config;
pub mod lifecycle;
pub mod observability;

// Surfaces
pub mod admin;
pub mod http;

pub use config::schema::GovernanceConfig;
pub use error::GovernanceError;
pub use governance::Governor;
pub use http::HttpServer;
pub use lifecycle::Shutdown;
