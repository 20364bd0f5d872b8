//! Configuration management subsystem.
//!
//! # Data Flow
//! ```text
//! <root>/client/config.toml
//!     → loader.rs (parse & deserialize, write defaults when missing)
//!     → validation.rs (semantic checks)
//!     → ClientConfig (validated)
//!     → store.rs (ArcSwap shared by the client and router)
//!
//! On a profile change (name / status_message pipe):
//!     store.rs update → save to disk → publish
//!
//! On an external edit:
//!     watcher.rs detects change
//!     → loader.rs loads new config
//!     → validation.rs validates
//!     → client re-applies name / status message to the engine
//! ```
//!
//! # Design Decisions
//! - All fields have defaults to allow minimal configs
//! - Validation separates syntactic (serde) from semantic checks
//! - Saves go through a temp file and rename

pub mod loader;
pub mod schema;
pub mod store;
pub mod validation;
pub mod watcher;

pub use loader::{load_config, load_or_create, save_config, ConfigError};
pub use schema::{BootstrapNode, ClientConfig, FifoConfig, ObservabilityConfig};
pub use store::ConfigStore;
