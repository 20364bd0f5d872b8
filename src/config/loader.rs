//! Configuration loading from disk.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use thiserror::Error;

use crate::config::schema::ClientConfig;
use crate::config::validation::{validate_config, ValidationError};
use crate::fifo::layout::{DIR_MODE, FILE_MODE};
use crate::fifo::pipe;

/// Error type for configuration loading and saving.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("IO error on {path}: {source}")]
    Io { path: PathBuf, source: io::Error },

    #[error("Parse error: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Serialize error: {0}")]
    Serialize(#[from] toml::ser::Error),

    #[error("Validation failed: {}", join(.0))]
    Validation(Vec<ValidationError>),
}

fn join(errors: &[ValidationError]) -> String {
    errors
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join(", ")
}

/// Load and validate configuration from a TOML file.
pub fn load_config(path: &Path) -> Result<ClientConfig, ConfigError> {
    let content = fs::read_to_string(path).map_err(|source| ConfigError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    let config: ClientConfig = toml::from_str(&content)?;

    validate_config(&config).map_err(ConfigError::Validation)?;

    Ok(config)
}

/// Load `path`, or write the defaults there when it does not exist yet.
pub fn load_or_create(path: &Path) -> Result<ClientConfig, ConfigError> {
    if path.exists() {
        let config = load_config(path)?;
        tracing::info!(path = %path.display(), name = %config.name, "Configuration loaded");
        return Ok(config);
    }

    let config = ClientConfig::default();
    save_config(path, &config)?;
    tracing::info!(path = %path.display(), "No configuration found, wrote defaults");
    Ok(config)
}

/// Write `config` to `path` with owner-only permissions.
///
/// The new content goes to a sibling temp file that is renamed over the
/// target, so readers never see a partial file.
pub fn save_config(path: &Path, config: &ClientConfig) -> Result<(), ConfigError> {
    let io_err = |source: io::Error| ConfigError::Io {
        path: path.to_path_buf(),
        source,
    };

    if let Some(parent) = path.parent() {
        pipe::create_private_dir(parent, DIR_MODE).map_err(io_err)?;
    }

    let content = toml::to_string_pretty(config)?;
    let tmp = path.with_extension("toml.tmp");
    pipe::write_private_file(&tmp, content.as_bytes(), FILE_MODE).map_err(io_err)?;
    fs::rename(&tmp, path).map_err(io_err)?;

    tracing::debug!(path = %path.display(), bytes = content.len(), "Configuration saved");
    Ok(())
}
