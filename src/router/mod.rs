//! Event router subsystem.
//!
//! # Data Flow
//! ```text
//! Engine → filesystem (events.rs):
//!     engine.iterate() → ChannelSink::emit → EngineEvent channel
//!     → EventRouter::handle_event → registry update + output pipe write
//!
//! Filesystem → engine (commands.rs):
//!     input pipe → InputPoller → InputLine channel
//!     → EventRouter::handle_input → validation.rs → engine call
//! ```
//!
//! # Design Decisions
//! - One task owns all routing, so writes to a pipe keep event order
//! - Engine callbacks only enqueue; all I/O happens here
//! - The engine lock is never held across pipe or file I/O
//! - A rejected line is logged and dropped; nothing here ends the process

pub mod commands;
pub mod events;
pub mod format;
pub mod transfers;
pub mod validation;

use std::path::PathBuf;
use std::sync::Arc;

use tokio::sync::{broadcast, mpsc};

use crate::config::ConfigStore;
use crate::engine::{EngineEvent, EngineHandle, FriendHandle};
use crate::fifo::{FifoGateway, InputLine};
use crate::lifecycle::persistence;
use crate::observability::metrics;
use crate::registry::{Friend, FriendRegistry};

use transfers::Transfers;

/// Routes engine events to pipes and pipe input to the engine.
pub struct EventRouter {
    engine: Arc<EngineHandle>,
    registry: Arc<FriendRegistry>,
    gateway: Arc<FifoGateway>,
    config: Arc<ConfigStore>,
    state_path: PathBuf,
    transfers: Transfers,
}

impl EventRouter {
    pub fn new(
        engine: Arc<EngineHandle>,
        registry: Arc<FriendRegistry>,
        gateway: Arc<FifoGateway>,
        config: Arc<ConfigStore>,
        state_path: PathBuf,
    ) -> Self {
        Self {
            engine,
            registry,
            gateway,
            config,
            state_path,
            transfers: Transfers::new(),
        }
    }

    pub fn transfers(&self) -> &Transfers {
        &self.transfers
    }

    /// Register a friend and create its directory if it is not known yet.
    ///
    /// Used for handles first seen in a callback: the key is looked up
    /// from the engine.
    fn ensure_friend(&self, handle: FriendHandle) -> Option<Friend> {
        if let Some(friend) = self.registry.by_handle(handle) {
            return Some(friend);
        }

        let key = match self.engine.with(|e| e.friend_public_key(handle)) {
            Ok(Some(key)) => key,
            Ok(None) => {
                tracing::warn!(friend = %handle, "Engine has no key for friend");
                return None;
            }
            Err(e) => {
                tracing::warn!(friend = %handle, error = %e, "Failed to query friend key");
                return None;
            }
        };

        let friend = Friend::new(handle, key);
        self.registry.upsert(friend.clone());
        metrics::record_friend_count(self.registry.len());
        self.create_friend_dir(&friend);
        Some(friend)
    }

    fn create_friend_dir(&self, friend: &Friend) {
        if let Err(e) = self.gateway.create_friend(&friend.public_key) {
            tracing::warn!(key = %friend.public_key, error = %e, "Failed to create friend fifos");
        }
    }

    fn flush_state(&self) {
        if let Err(e) = persistence::flush_state(&self.engine, &self.state_path) {
            tracing::error!(error = %e, "Failed to save state");
        }
    }

    /// Route until shutdown, then drain whatever events are already queued.
    pub async fn run(
        mut self,
        mut events: mpsc::UnboundedReceiver<EngineEvent>,
        mut inputs: mpsc::UnboundedReceiver<InputLine>,
        mut shutdown: broadcast::Receiver<()>,
    ) {
        tracing::debug!("Event router starting");
        loop {
            tokio::select! {
                Some(event) = events.recv() => self.handle_event(event),
                Some(input) = inputs.recv() => self.handle_input(input),
                _ = shutdown.recv() => break,
                else => break,
            }
        }

        while let Ok(event) = events.try_recv() {
            self.handle_event(event);
        }
        tracing::debug!("Event router stopped");
    }
}
