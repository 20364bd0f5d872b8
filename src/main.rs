//! ratox
//!
//! A peer-to-peer messaging client exposed as a tree of named pipes.
//!
//! # Architecture Overview
//!
//! ```text
//!   user shell                         ┌──────────────────────────────────┐
//!   ──────────                         │              ratox               │
//!   echo hi > <key>/text_in  ─────────▶│ fifo monitor ─▶ router ─▶ engine │
//!   cat <key>/text_out       ◀─────────│ fifo writer  ◀─ router ◀─ engine │
//!                                      │                  │               │
//!                                      │              registry            │
//!                                      │                                  │
//!                                      │  config │ lifecycle │ metrics    │
//!                                      └──────────────────────────────────┘
//! ```

use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;

use ratox::config::{load_or_create, ConfigStore};
use ratox::engine::memory::MemoryEngine;
use ratox::error::ClientError;
use ratox::fifo::FifoLayout;
use ratox::lifecycle::{signals, Client};
use ratox::observability::{logging, metrics};

/// Command line arguments.
#[derive(Debug, Parser)]
#[command(name = "ratox", version, about = "FIFO-based messaging client")]
struct Args {
    /// Root directory for the pipe tree and configuration.
    #[arg(short = 'p', long = "path")]
    path: Option<PathBuf>,

    /// Enable debug logging.
    #[arg(short, long)]
    debug: bool,
}

fn default_root() -> Result<PathBuf, ClientError> {
    std::env::var_os("HOME")
        .filter(|home| !home.is_empty())
        .map(|home| PathBuf::from(home).join(".config").join("ratox"))
        .ok_or(ClientError::NoHome)
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    let root = match args.path {
        Some(path) => path,
        None => default_root()?,
    };
    let layout = FifoLayout::new(&root);

    let config = load_or_create(&layout.config_file()).map_err(ClientError::from)?;
    logging::init(args.debug || config.debug, &config.observability.log_level);

    tracing::info!(version = env!("CARGO_PKG_VERSION"), root = %root.display(), "ratox starting");

    if config.observability.metrics_enabled {
        if let Ok(addr) = config.observability.metrics_address.parse() {
            metrics::init_metrics(addr);
        } else {
            tracing::error!(
                metrics_address = %config.observability.metrics_address,
                "Failed to parse metrics address"
            );
        }
    }

    let engine = MemoryEngine::load_or_generate(&layout.state_file()).map_err(ClientError::from)?;
    let store = Arc::new(ConfigStore::new(config, layout.config_file()));
    let client = Client::new(layout, store, Box::new(engine));

    client.start().await?;

    let signal = signals::wait_for_shutdown().await;
    tracing::info!(signal, "Shutdown signal received");
    client.shutdown().await;

    Ok(())
}
