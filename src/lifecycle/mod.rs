//! Lifecycle management subsystem.
//!
//! # Data Flow
//! ```text
//! Startup (client.rs):
//!     Stopped → Starting
//!     → global fifos + identity file (fatal on failure)
//!     → engine friends → registry + friend directories
//!     → event sink, profile, bootstrap nodes
//!     → spawn loops → Running
//!
//! Running loops:
//!     iterate (engine cadence) | router | fifo monitors
//!     | save (persistence.rs) | idle cleanup | config watcher
//!
//! Shutdown (shutdown.rs):
//!     Running → ShuttingDown → broadcast stop → wait for loops
//!     → final save → release engine → Stopped
//!
//! Signals (signals.rs):
//!     SIGTERM/SIGINT → Client::shutdown
//! ```
//!
//! # Design Decisions
//! - Ordered startup: global tree first, friends next, loops last
//! - Shutdown has a deadline: loops that miss it are logged, not aborted
//! - Shutdown is idempotent

pub mod client;
pub mod persistence;
pub mod shutdown;
pub mod signals;
pub mod state;

pub use client::Client;
pub use shutdown::Shutdown;
pub use state::LifecycleState;
