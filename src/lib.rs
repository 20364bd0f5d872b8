//! ratox: a messaging client driven through named pipes.

pub mod config;
pub mod engine;
pub mod error;
pub mod fifo;
pub mod lifecycle;
pub mod observability;
pub mod registry;
pub mod router;

pub use config::{ClientConfig, ConfigStore};
pub use engine::{EngineHandle, MessagingEngine};
pub use error::ClientError;
pub use fifo::{FifoGateway, FifoLayout};
pub use lifecycle::{Client, LifecycleState, Shutdown};
pub use registry::{Friend, FriendRegistry, Presence};
