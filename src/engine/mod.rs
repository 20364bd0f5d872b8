//! Messaging engine contract.
//!
//! # Data Flow
//! ```text
//! Engine callbacks (during iterate):
//!     MessagingEngine → EventSink::emit(EngineEvent)
//!     → router channel → EventRouter (registry + FIFO writes)
//!
//! Imperative calls (from the router and lifecycle):
//!     EngineHandle::with(|engine| engine.send_message(..))
//! ```
//!
//! # Design Decisions
//! - The engine is consumed, not reimplemented: cryptography, routing and
//!   NAT traversal live behind `MessagingEngine`
//! - Callbacks only enqueue; no FIFO or file I/O happens on engine time
//! - `EngineHandle` serializes access and is released exactly once

pub mod events;
pub mod memory;
pub mod types;

use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use thiserror::Error;

pub use events::{ChannelSink, EngineEvent, EventSink};
pub use types::{
    ConnectionKind, FileControl, FileId, FriendHandle, FriendInfo, MessageKind, PublicKey,
    UserStatus, ADDRESS_HEX_LEN, PUBLIC_KEY_HEX_LEN, PUBLIC_KEY_SIZE,
};

/// Errors reported by the messaging engine.
#[derive(Debug, Error)]
pub enum EngineError {
    /// The friend handle is not known to the engine.
    #[error("friend {0} not found")]
    FriendNotFound(FriendHandle),

    /// A friend with the same key already exists.
    #[error("friend already added: {0}")]
    AlreadyFriend(PublicKey),

    /// An address or key could not be parsed or failed its checksum.
    #[error("invalid address: {0}")]
    InvalidAddress(String),

    /// Payload rejected by the engine (too long, empty).
    #[error("invalid payload: {0}")]
    InvalidPayload(String),

    /// The file transfer is unknown.
    #[error("file transfer {file_number} for friend {friend} not found")]
    TransferNotFound { friend: FriendHandle, file_number: u32 },

    /// Bootstrap against a node failed.
    #[error("bootstrap to {address}:{port} failed: {reason}")]
    Bootstrap {
        address: String,
        port: u16,
        reason: String,
    },

    /// Saved state could not be restored.
    #[error("state restore failed: {0}")]
    Restore(String),

    /// The engine has already been released.
    #[error("engine released")]
    Released,
}

/// Result type for engine operations.
pub type EngineResult<T> = Result<T, EngineError>;

/// Operations the gateway requires from a messaging engine.
pub trait MessagingEngine: Send {
    /// Register the sink that receives every callback event.
    fn set_event_sink(&mut self, sink: Arc<dyn EventSink>);

    /// Full shareable address (key, nospam, checksum) as hex.
    fn self_address(&self) -> String;

    fn self_public_key(&self) -> PublicKey;

    fn set_self_name(&mut self, name: &str) -> EngineResult<()>;

    fn set_self_status_message(&mut self, message: &str) -> EngineResult<()>;

    /// Send a text message, returning the engine's message id.
    fn send_message(
        &mut self,
        friend: FriendHandle,
        text: &str,
        kind: MessageKind,
    ) -> EngineResult<u32>;

    /// Send a contact request to a full address.
    fn add_friend(&mut self, address: &str, message: &str) -> EngineResult<FriendHandle>;

    /// Add a contact by raw key without sending a request (accepting one).
    fn add_friend_norequest(&mut self, key: &PublicKey) -> EngineResult<FriendHandle>;

    fn delete_friend(&mut self, friend: FriendHandle) -> EngineResult<()>;

    /// Enumerate all contacts known to the engine.
    fn friends(&self) -> Vec<FriendInfo>;

    fn friend_public_key(&self, friend: FriendHandle) -> Option<PublicKey>;

    /// Offer a file to a friend, returning the transfer's file number.
    fn send_file(
        &mut self,
        friend: FriendHandle,
        kind: u32,
        size: u64,
        file_id: FileId,
        filename: &str,
    ) -> EngineResult<u32>;

    fn file_control(
        &mut self,
        friend: FriendHandle,
        file_number: u32,
        control: FileControl,
    ) -> EngineResult<()>;

    fn file_send_chunk(
        &mut self,
        friend: FriendHandle,
        file_number: u32,
        position: u64,
        data: &[u8],
    ) -> EngineResult<()>;

    /// Serialize the complete engine state.
    fn save_state(&self) -> Vec<u8>;

    fn bootstrap(&mut self, address: &str, port: u16, key: &PublicKey) -> EngineResult<()>;

    /// Run one unit of periodic work. Callbacks fire from here.
    fn iterate(&mut self);

    /// Time until `iterate` is due again. May change between calls.
    fn iteration_interval(&self) -> Duration;

    /// Release network resources. Called once at shutdown.
    fn kill(&mut self);
}

/// Shared, serialized access to the engine.
///
/// The engine lives behind a mutex that is only held for the duration of a
/// single engine call; callers never perform FIFO or file I/O inside `with`.
pub struct EngineHandle {
    inner: Mutex<Option<Box<dyn MessagingEngine>>>,
}

impl EngineHandle {
    pub fn new(engine: Box<dyn MessagingEngine>) -> Self {
        Self {
            inner: Mutex::new(Some(engine)),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Option<Box<dyn MessagingEngine>>> {
        // A panic inside an engine call leaves the engine itself intact.
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Run `f` against the engine.
    pub fn with<T>(&self, f: impl FnOnce(&mut dyn MessagingEngine) -> T) -> EngineResult<T> {
        let mut guard = self.lock();
        match guard.as_mut() {
            Some(engine) => Ok(f(engine.as_mut())),
            None => Err(EngineError::Released),
        }
    }

    /// Like `with`, for calls that already return an `EngineResult`.
    pub fn call<T>(
        &self,
        f: impl FnOnce(&mut dyn MessagingEngine) -> EngineResult<T>,
    ) -> EngineResult<T> {
        self.with(f)?
    }

    pub fn is_released(&self) -> bool {
        self.lock().is_none()
    }

    /// Kill and drop the engine. Later calls return `EngineError::Released`.
    pub fn release(&self) {
        let engine = self.lock().take();
        if let Some(mut engine) = engine {
            engine.kill();
            tracing::debug!("Engine released");
        }
    }
}
