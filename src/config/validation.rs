//! Configuration validation.
//!
//! # Responsibilities
//! - Semantic validation (serde handles syntactic)
//! - Validate value ranges (intervals > 0, ports valid, sizes non-zero)
//! - Check bootstrap node keys are 64 hex characters
//!
//! # Design Decisions
//! - Returns all validation errors, not just first
//! - Validation is pure function: ClientConfig → Result<(), Vec<ValidationError>>
//! - Runs before config is accepted into the system

use thiserror::Error;

use crate::config::schema::ClientConfig;
use crate::engine::PUBLIC_KEY_HEX_LEN;

/// A single semantic problem in the configuration.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("{field} must be greater than zero")]
    Zero { field: &'static str },

    #[error("bootstrap node {index}: address is empty")]
    EmptyNodeAddress { index: usize },

    #[error("bootstrap node {index}: port must be non-zero")]
    ZeroNodePort { index: usize },

    #[error("bootstrap node {index}: public key must be {expected} hex characters")]
    NodeKey { index: usize, expected: usize },

    #[error("name must not be empty")]
    EmptyName,

    #[error("unknown log level '{0}'")]
    LogLevel(String),

    #[error("metrics address '{0}' is not a socket address")]
    MetricsAddress(String),
}

const LOG_LEVELS: [&str; 5] = ["trace", "debug", "info", "warn", "error"];

/// Validate `config`, collecting every problem found.
pub fn validate_config(config: &ClientConfig) -> Result<(), Vec<ValidationError>> {
    let mut errors = Vec::new();

    if config.name.trim().is_empty() {
        errors.push(ValidationError::EmptyName);
    }

    let positive = [
        ("max_file_size", config.max_file_size),
        ("save_interval_secs", config.save_interval_secs),
        ("max_message_len", config.max_message_len as u64),
        ("fifo.poll_interval_ms", config.fifo.poll_interval_ms),
        ("fifo.cleanup_interval_secs", config.fifo.cleanup_interval_secs),
        ("fifo.idle_threshold_secs", config.fifo.idle_threshold_secs),
    ];
    for (field, value) in positive {
        if value == 0 {
            errors.push(ValidationError::Zero { field });
        }
    }

    for (index, node) in config.bootstrap_nodes.iter().enumerate() {
        if node.address.trim().is_empty() {
            errors.push(ValidationError::EmptyNodeAddress { index });
        }
        if node.port == 0 {
            errors.push(ValidationError::ZeroNodePort { index });
        }
        let key_ok = node.public_key.len() == PUBLIC_KEY_HEX_LEN
            && node.public_key.chars().all(|c| c.is_ascii_hexdigit());
        if !key_ok {
            errors.push(ValidationError::NodeKey {
                index,
                expected: PUBLIC_KEY_HEX_LEN,
            });
        }
    }

    let level = config.observability.log_level.to_ascii_lowercase();
    if !LOG_LEVELS.contains(&level.as_str()) {
        errors.push(ValidationError::LogLevel(config.observability.log_level.clone()));
    }

    if config.observability.metrics_enabled
        && config
            .observability
            .metrics_address
            .parse::<std::net::SocketAddr>()
            .is_err()
    {
        errors.push(ValidationError::MetricsAddress(
            config.observability.metrics_address.clone(),
        ));
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}
