//! Top-level error type.

use thiserror::Error;

use crate::config::ConfigError;
use crate::engine::{EngineError, PublicKey};
use crate::fifo::FifoError;
use crate::lifecycle::persistence::PersistError;
use crate::lifecycle::state::LifecycleState;

/// Errors surfaced by `Client` and the binary.
#[derive(Debug, Error)]
pub enum ClientError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Fifo(#[from] FifoError),

    #[error(transparent)]
    Engine(#[from] EngineError),

    #[error(transparent)]
    Persist(#[from] PersistError),

    #[error("client is {actual}, expected {expected}")]
    InvalidState {
        actual: LifecycleState,
        expected: LifecycleState,
    },

    /// A client starts at most once.
    #[error("client has already been started once")]
    AlreadyStarted,

    #[error("no friend with key {0}")]
    UnknownFriend(PublicKey),

    #[error("cannot determine the home directory, pass -p <dir>")]
    NoHome,
}
