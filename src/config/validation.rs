//! Configuration validation.
//!
//! # Responsibilities
//! - Semantic validation (serde handles syntactic)
//! - Validate value ranges (thresholds > 0, ratios in range)
//! - Check that custom rule patterns compile
//! - Require a sink credential when export is enabled
//! - Refuse the placeholder admin key when the admin API is enabled
//!
//! # Design Decisions
//! - Returns all validation errors, not just first
//! - Validation is pure function: GatewayConfig → Result<(), Vec<ValidationError>>
//! - Runs before config is accepted into the system

use std::collections::HashSet;

use thiserror::Error;

use crate::config::schema::{GatewayConfig, PLACEHOLDER_API_KEY};

/// A single semantic problem in the configuration.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{field}: {message}")]
pub struct ValidationError {
    /// Dotted path of the offending field.
    pub field: String,
    pub message: String,
}

impl ValidationError {
    fn new(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            message: message.into(),
        }
    }
}

/// Validate a parsed configuration.
pub fn validate_config(config: &GatewayConfig) -> Result<(), Vec<ValidationError>> {
    let mut errors = Vec::new();

    if config.listener.bind_address.parse::<std::net::SocketAddr>().is_err() {
        errors.push(ValidationError::new("listener.bind_address", "must be a socket address"));
    }
    if config.listener.max_connections == 0 {
        errors.push(ValidationError::new("listener.max_connections", "must be greater than 0"));
    }
    if config.upstream.address.parse::<std::net::SocketAddr>().is_err() {
        errors.push(ValidationError::new("upstream.address", "must be a socket address"));
    }
    if config.timeouts.request_secs == 0 {
        errors.push(ValidationError::new("timeouts.request_secs", "must be greater than 0"));
    }
    if config.timeouts.sweep_interval_secs == 0 {
        errors.push(ValidationError::new("timeouts.sweep_interval_secs", "must be greater than 0"));
    }
    if config.admin.enabled {
        let key = config.admin.api_key.trim();
        if key.is_empty() {
            errors.push(ValidationError::new("admin.api_key", "required when admin API is enabled"));
        } else if key == PLACEHOLDER_API_KEY {
            errors.push(ValidationError::new("admin.api_key", "placeholder key must be replaced"));
        }
    }

    validate_rules(config, &mut errors);
    validate_traffic(config, &mut errors);
    validate_behavior(config, &mut errors);
    validate_correlation(config, &mut errors);
    validate_export(config, &mut errors);

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}

fn validate_rules(config: &GatewayConfig, errors: &mut Vec<ValidationError>) {
    let rules = &config.rules;
    if rules.block_threshold == 0 {
        errors.push(ValidationError::new("rules.block_threshold", "must be greater than 0"));
    }
    if rules.block_duration_secs == 0 {
        errors.push(ValidationError::new("rules.block_duration_secs", "must be greater than 0"));
    }
    if rules.violation_retention_secs == 0 {
        errors.push(ValidationError::new("rules.violation_retention_secs", "must be greater than 0"));
    }
    if rules.body_probe_timeout_ms == 0 {
        errors.push(ValidationError::new("rules.body_probe_timeout_ms", "must be greater than 0"));
    }

    let mut seen = HashSet::new();
    for (i, rule) in rules.custom.iter().enumerate() {
        let field = format!("rules.custom[{}]", i);
        if rule.id.trim().is_empty() {
            errors.push(ValidationError::new(&field, "id must not be empty"));
        } else if !seen.insert(rule.id.as_str()) {
            errors.push(ValidationError::new(&field, format!("duplicate rule id '{}'", rule.id)));
        }
        if rule.score > 10 {
            errors.push(ValidationError::new(&field, "score must be between 0 and 10"));
        }
        if let Err(e) = regex::Regex::new(&rule.pattern) {
            errors.push(ValidationError::new(&field, format!("invalid pattern: {}", e)));
        }
    }
}

fn validate_traffic(config: &GatewayConfig, errors: &mut Vec<ValidationError>) {
    let traffic = &config.traffic;
    if traffic.requests_per_minute == 0 {
        errors.push(ValidationError::new("traffic.requests_per_minute", "must be greater than 0"));
    }
    if traffic.window_secs == 0 {
        errors.push(ValidationError::new("traffic.window_secs", "must be greater than 0"));
    }
    if traffic.mitigation_secs == 0 {
        errors.push(ValidationError::new("traffic.mitigation_secs", "must be greater than 0"));
    }
    if traffic.repeat_signature_limit == 0 {
        errors.push(ValidationError::new("traffic.repeat_signature_limit", "must be greater than 0"));
    }
    if traffic.max_tracked_actors == 0 {
        errors.push(ValidationError::new("traffic.max_tracked_actors", "must be greater than 0"));
    }
}

fn validate_behavior(config: &GatewayConfig, errors: &mut Vec<ValidationError>) {
    let behavior = &config.behavior;
    let unit = [
        ("behavior.anomaly_threshold", behavior.anomaly_threshold),
        ("behavior.high_diversity_threshold", behavior.high_diversity_threshold),
        ("behavior.multi_agent_penalty", behavior.multi_agent_penalty),
        ("behavior.regular_interval_penalty", behavior.regular_interval_penalty),
    ];
    for (field, value) in unit {
        if !(0.0..=1.0).contains(&value) {
            errors.push(ValidationError::new(field, "must be between 0.0 and 1.0"));
        }
    }
    if behavior.interval_variance_threshold.is_nan() || behavior.interval_variance_threshold < 0.0 {
        errors.push(ValidationError::new("behavior.interval_variance_threshold", "must not be negative"));
    }
    if behavior.interval_history < 2 {
        errors.push(ValidationError::new("behavior.interval_history", "must be at least 2"));
    }
    if behavior.min_requests < 2 {
        errors.push(ValidationError::new("behavior.min_requests", "must be at least 2"));
    }
    if behavior.profile_ttl_secs == 0 {
        errors.push(ValidationError::new("behavior.profile_ttl_secs", "must be greater than 0"));
    }
    if behavior.max_profiles == 0 {
        errors.push(ValidationError::new("behavior.max_profiles", "must be greater than 0"));
    }
}

fn validate_correlation(config: &GatewayConfig, errors: &mut Vec<ValidationError>) {
    let mut seen = HashSet::new();
    for (i, rule) in config.correlation.rules.iter().enumerate() {
        let field = format!("correlation.rules[{}]", i);
        if !seen.insert(rule.id.as_str()) {
            errors.push(ValidationError::new(&field, format!("duplicate rule id '{}'", rule.id)));
        }
        if rule.categories.is_empty() {
            errors.push(ValidationError::new(&field, "categories must not be empty"));
        }
        if rule.threshold == 0 {
            errors.push(ValidationError::new(&field, "threshold must be greater than 0"));
        }
        if rule.window_secs == 0 {
            errors.push(ValidationError::new(&field, "window_secs must be greater than 0"));
        }
    }
}

fn validate_export(config: &GatewayConfig, errors: &mut Vec<ValidationError>) {
    let export = &config.export;
    if export.batch_size == 0 {
        errors.push(ValidationError::new("export.batch_size", "must be greater than 0"));
    }
    if export.flush_interval_secs == 0 {
        errors.push(ValidationError::new("export.flush_interval_secs", "must be greater than 0"));
    }
    if export.queue_capacity == 0 {
        errors.push(ValidationError::new("export.queue_capacity", "must be greater than 0"));
    }
    if export.max_attempts == 0 {
        errors.push(ValidationError::new("export.max_attempts", "must be greater than 0"));
    }
    if export.timeout_secs == 0 {
        errors.push(ValidationError::new("export.timeout_secs", "must be greater than 0"));
    }
    if export.enabled {
        if url::Url::parse(&export.endpoint).is_err() {
            errors.push(ValidationError::new("export.endpoint", "must be a valid URL"));
        }
        if export.credential.trim().is_empty() {
            errors.push(ValidationError::new("export.credential", "required when export is enabled"));
        }
    }
}
