//! Configuration schema definitions.
//!
//! This module defines the complete configuration structure for the client.
//! All types derive Serde traits for deserialization from `config.toml`.

use serde::{Deserialize, Serialize};

/// Root configuration for the client.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct ClientConfig {
    /// Force debug-level logging.
    pub debug: bool,

    /// Our display name, applied to the engine at startup.
    pub name: String,

    /// Our status message, applied to the engine at startup.
    pub status_message: String,

    /// Accept incoming file offers without asking.
    pub auto_accept_files: bool,

    /// Largest file (in bytes) we send or accept.
    pub max_file_size: u64,

    /// Nodes contacted at startup to join the network.
    pub bootstrap_nodes: Vec<BootstrapNode>,

    /// Seconds between engine state flushes.
    pub save_interval_secs: u64,

    /// Longest outgoing message, in UTF-8 bytes.
    pub max_message_len: usize,

    /// Pipe polling and cleanup.
    pub fifo: FifoConfig,

    /// Observability settings.
    pub observability: ObservabilityConfig,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            debug: false,
            name: "ratox user".to_string(),
            status_message: "Running ratox".to_string(),
            auto_accept_files: false,
            max_file_size: 100 * 1024 * 1024, // 100MB
            bootstrap_nodes: default_bootstrap_nodes(),
            save_interval_secs: 30,
            max_message_len: 1372,
            fifo: FifoConfig::default(),
            observability: ObservabilityConfig::default(),
        }
    }
}

/// A network bootstrap node.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct BootstrapNode {
    /// Hostname or IP address.
    pub address: String,

    pub port: u16,

    /// Node public key, 64 hex characters.
    pub public_key: String,
}

impl BootstrapNode {
    fn new(address: &str, port: u16, public_key: &str) -> Self {
        Self {
            address: address.to_string(),
            port,
            public_key: public_key.to_string(),
        }
    }
}

/// The public nodes used when the config file names none.
pub fn default_bootstrap_nodes() -> Vec<BootstrapNode> {
    vec![
        BootstrapNode::new(
            "nodes.tox.chat",
            33445,
            "6FC41E2BD381D37E9748FC0E0328CE086AF9598BECC8FEB7DDF2E440475F300E",
        ),
        BootstrapNode::new(
            "130.133.110.14",
            33445,
            "461FA3776EF0FA655F1A05477DF1B3B614F7D6B124F7DB1DD4FE3C08B03B640F",
        ),
        BootstrapNode::new(
            "tox.zodiaclabs.org",
            33445,
            "A09162D68618E742FFBCA1C2C70385E6679604B2D80EA6E84AD0996A1AC8A074",
        ),
        BootstrapNode::new(
            "tox2.abilinski.com",
            33445,
            "7A6098B590BDC73F9723FC59F82B3F9085A64D1B213AAF8E610FD351930D052D",
        ),
    ]
}

/// Pipe polling and idle cleanup.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(default)]
pub struct FifoConfig {
    /// Sleep between input sweeps, in milliseconds.
    pub poll_interval_ms: u64,

    /// Seconds between idle descriptor sweeps.
    pub cleanup_interval_secs: u64,

    /// Per-friend descriptors unused this long are dropped.
    pub idle_threshold_secs: u64,
}

impl Default for FifoConfig {
    fn default() -> Self {
        Self {
            poll_interval_ms: 100,
            cleanup_interval_secs: 300,
            idle_threshold_secs: 1800,
        }
    }
}

/// Observability configuration.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(default)]
pub struct ObservabilityConfig {
    /// Log level when `RUST_LOG` is unset.
    pub log_level: String,

    /// Install the Prometheus exporter.
    pub metrics_enabled: bool,

    /// Metrics listener address.
    pub metrics_address: String,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            metrics_enabled: false,
            metrics_address: "127.0.0.1:9090".to_string(),
        }
    }
}
