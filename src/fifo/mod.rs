//! FIFO gateway subsystem.
//!
//! # Data Flow
//! ```text
//! Input (reader.rs):
//!     user writes line → <dir>/text_in
//!     → InputPoller sweep (non-blocking read, line framing)
//!     → InputLine on the router channel
//!
//! Output (writer.rs):
//!     EventRouter → FifoGateway::write_* → open O_WRONLY|O_NONBLOCK
//!     → line written, or logged failure when no reader is attached
//!
//! Bookkeeping (table.rs):
//!     path → FifoDescriptor (direction, scope, last use, read handle)
//!     → idle sweep drops per-friend descriptors
//! ```
//!
//! # Design Decisions
//! - Directories are 0700, pipes 0600
//! - Recreating a pipe releases the old descriptor before touching the file
//! - No descriptor-table lock is held while a pipe is opened, read or written
//! - Global pipes are never swept

pub mod descriptor;
pub mod gateway;
pub mod layout;
pub mod pipe;
pub mod reader;
pub mod table;
pub mod writer;

pub use descriptor::{Direction, FifoDescriptor, FifoScope};
pub use gateway::{FifoGateway, InputLine, InputSource};
pub use layout::{FifoLayout, FriendFifo, GlobalFifo};
pub use table::FifoTable;

use std::io;
use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

use crate::config::FifoConfig;

/// Errors raised by FIFO operations.
#[derive(Debug, Error)]
pub enum FifoError {
    #[error("failed to create directory {path}: {source}")]
    CreateDir { path: PathBuf, source: io::Error },

    #[error("failed to remove existing {path}: {source}")]
    Remove { path: PathBuf, source: io::Error },

    #[error("failed to create fifo {path}: {source}")]
    Create { path: PathBuf, source: io::Error },

    #[error("failed to open {path}: {source}")]
    Open { path: PathBuf, source: io::Error },

    /// Nobody has the output pipe open for reading.
    #[error("no reader attached to {0}")]
    NoReader(PathBuf),

    /// The reader is not draining the pipe.
    #[error("pipe {0} is full")]
    Full(PathBuf),

    #[error("write to {path} failed: {source}")]
    Write { path: PathBuf, source: io::Error },

    #[error("fifo not registered: {0}")]
    NotRegistered(PathBuf),

    #[error("{0} is not an output fifo")]
    NotOutput(PathBuf),

    #[error("failed to write identity file {path}: {source}")]
    Identity { path: PathBuf, source: io::Error },
}

/// Result type for FIFO operations.
pub type FifoResult<T> = Result<T, FifoError>;

/// Timing knobs for polling and cleanup.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FifoSettings {
    /// Sleep between input sweeps.
    pub poll_interval: Duration,
    /// Period of the idle descriptor sweep.
    pub cleanup_interval: Duration,
    /// Per-friend descriptors unused for longer than this are dropped.
    pub idle_threshold: Duration,
}

impl Default for FifoSettings {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_millis(100),
            cleanup_interval: Duration::from_secs(5 * 60),
            idle_threshold: Duration::from_secs(30 * 60),
        }
    }
}

impl From<&FifoConfig> for FifoSettings {
    fn from(config: &FifoConfig) -> Self {
        Self {
            poll_interval: Duration::from_millis(config.poll_interval_ms),
            cleanup_interval: Duration::from_secs(config.cleanup_interval_secs),
            idle_threshold: Duration::from_secs(config.idle_threshold_secs),
        }
    }
}
