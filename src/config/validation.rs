//! Configuration validation.
//!
//! # Responsibilities
//! - Semantic validation (serde handles syntactic)
//! - Validate value ranges (limits >= 1, windows and TTLs > 0)
//! - Detect duplicate route prefixes
//!
//! # Design Decisions
//! - Returns all validation errors, not just first
//! - Validation is pure function: GovernanceConfig → Result<(), Vec<ValidationError>>
//! - Runs before config is accepted into the system

use std::collections::HashSet;
use std::net::SocketAddr;
use thiserror::Error;

use crate::config::schema::{GovernanceConfig, RateLimitPolicy};

/// A single semantic problem in a configuration.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{field}: {reason}")]
pub struct ValidationError {
    pub field: String,
    pub reason: String,
}

impl ValidationError {
    fn new(field: impl Into<String>, reason: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            reason: reason.into(),
        }
    }
}

pub fn validate_config(config: &GovernanceConfig) -> Result<(), Vec<ValidationError>> {
    let mut errors = Vec::new();

    if config.listener.bind_address.parse::<SocketAddr>().is_err() {
        errors.push(ValidationError::new("listener.bind_address", "not a socket address"));
    }
    if config.timeouts.request_secs == 0 {
        errors.push(ValidationError::new("timeouts.request_secs", "must be greater than 0"));
    }
    if config.admin.enabled && config.admin.api_key.is_empty() {
        errors.push(ValidationError::new("admin.api_key", "must be set when admin is enabled"));
    }

    let rl = &config.rate_limit;
    check_policy(&mut errors, "rate_limit", &rl.default_policy());
    if rl.sweep_interval_secs == 0 {
        errors.push(ValidationError::new("rate_limit.sweep_interval_secs", "must be greater than 0"));
    }
    let mut seen = HashSet::new();
    for (i, route) in rl.routes.iter().enumerate() {
        check_policy(&mut errors, &format!("rate_limit.routes[{i}]"), &route.policy());
        if !route.path_prefix.starts_with('/') {
            errors.push(ValidationError::new(
                format!("rate_limit.routes[{i}].path_prefix"),
                "must start with '/'",
            ));
        }
        if !seen.insert(route.path_prefix.as_str()) {
            errors.push(ValidationError::new(
                format!("rate_limit.routes[{i}].path_prefix"),
                format!("duplicate prefix {}", route.path_prefix),
            ));
        }
    }
    for (name, tier) in &rl.tiers {
        check_policy(&mut errors, &format!("rate_limit.tiers.{name}"), &tier.policy());
        if name.chars().any(|c| c.is_ascii_uppercase()) {
            errors.push(ValidationError::new(format!("rate_limit.tiers.{name}"), "tier names must be lowercase"));
        }
    }

    let mut seen = HashSet::new();
    for (i, route) in config.cache.routes.iter().enumerate() {
        if route.ttl_secs == 0 {
            errors.push(ValidationError::new(
                format!("cache.routes[{i}].ttl_secs"),
                "must be greater than 0",
            ));
        }
        if !route.path_prefix.starts_with('/') {
            errors.push(ValidationError::new(
                format!("cache.routes[{i}].path_prefix"),
                "must start with '/'",
            ));
        }
        if route.namespace.is_empty() {
            errors.push(ValidationError::new(format!("cache.routes[{i}].namespace"), "must not be empty"));
        }
        if !seen.insert(route.path_prefix.as_str()) {
            errors.push(ValidationError::new(
                format!("cache.routes[{i}].path_prefix"),
                format!("duplicate prefix {}", route.path_prefix),
            ));
        }
    }
    if config.cache.max_entries == Some(0) {
        errors.push(ValidationError::new("cache.max_entries", "must be greater than 0 when set"));
    }

    let csrf = &config.csrf;
    if csrf.token_expiry_ms == 0 {
        errors.push(ValidationError::new("csrf.token_expiry_ms", "must be greater than 0"));
    }
    if csrf.sweep_interval_secs == 0 {
        errors.push(ValidationError::new("csrf.sweep_interval_secs", "must be greater than 0"));
    }
    if csrf.cookie_name.is_empty() || csrf.header_name.is_empty() {
        errors.push(ValidationError::new("csrf", "cookie_name and header_name must be set"));
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}

fn check_policy(errors: &mut Vec<ValidationError>, field: &str, policy: &RateLimitPolicy) {
    if policy.max_requests == 0 {
        errors.push(ValidationError::new(format!("{field}.max_requests"), "must be at least 1"));
    }
    if policy.window_ms == 0 {
        errors.push(ValidationError::new(format!("{field}.window_ms"), "must be greater than 0"));
    }
}
