//! Structured logging.
//!
//! # Responsibilities
//! - Initialize the tracing subscriber once at startup
//! - Pick the level from `RUST_LOG`, the `-d` flag or the config
//!
//! # Design Decisions
//! - `RUST_LOG` wins when set
//! - The debug flag forces `debug` for this crate
//! - Human-readable fmt output on stderr

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Build the filter directive for this crate.
pub fn directive(debug: bool, level: &str) -> String {
    let level = if debug { "debug" } else { level };
    format!("ratox={}", level.to_ascii_lowercase())
}

/// Install the global subscriber. A second call is a no-op.
pub fn init(debug: bool, level: &str) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(directive(debug, level)));

    let _ = tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .try_init();
}
