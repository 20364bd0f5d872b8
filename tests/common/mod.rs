//! Shared utilities for integration testing.

#![allow(dead_code)]

use std::fs::File;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use tempfile::TempDir;

use ratox::config::{ClientConfig, ConfigStore};
use ratox::engine::memory::MemoryEngine;
use ratox::fifo::reader::{drain_available, LineBuffer};
use ratox::fifo::{pipe, FifoLayout};
use ratox::Client;

/// Config tuned for tests: fast polling and no network bootstrap.
pub fn test_config() -> ClientConfig {
    let mut config = ClientConfig::default();
    config.bootstrap_nodes.clear();
    config.fifo.poll_interval_ms = 10;
    config
}

/// A client on an in-process engine rooted in a fresh temp directory.
pub struct TestClient {
    pub dir: TempDir,
    pub engine: MemoryEngine,
    pub client: Client,
}

impl TestClient {
    pub fn new() -> Self {
        Self::with_engine(MemoryEngine::generate())
    }

    pub fn with_engine(engine: MemoryEngine) -> Self {
        let dir = tempfile::tempdir().unwrap();
        let layout = FifoLayout::new(dir.path());
        let store = Arc::new(ConfigStore::new(test_config(), layout.config_file()));
        let client = Client::new(layout, store, Box::new(engine.clone()));
        Self { dir, engine, client }
    }

    pub fn layout(&self) -> &FifoLayout {
        self.client.layout()
    }
}

/// Open an output pipe the way a shell `cat` would, without blocking.
pub fn open_reader(path: &std::path::Path) -> File {
    pipe::open_read_nonblocking(path).unwrap()
}

/// Write one line into an input pipe.
pub fn send_line(path: &std::path::Path, line: &str) {
    ratox::fifo::writer::write_line(path, line).unwrap();
}

/// Every complete line currently buffered in `reader`.
pub fn drain(reader: &File) -> Vec<String> {
    drain_available(reader, &mut LineBuffer::new()).unwrap()
}

/// Poll `check` until it returns true or two seconds pass.
pub async fn wait_until(mut check: impl FnMut() -> bool) -> bool {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(2);
    while tokio::time::Instant::now() < deadline {
        if check() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    check()
}

/// Collect lines from `reader` until at least `count` arrived or two seconds pass.
pub async fn read_lines(reader: &File, count: usize) -> Vec<String> {
    let mut buffer = LineBuffer::new();
    let mut lines = Vec::new();
    let deadline = tokio::time::Instant::now() + Duration::from_secs(2);
    while lines.len() < count && tokio::time::Instant::now() < deadline {
        lines.extend(drain_available(reader, &mut buffer).unwrap());
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    lines
}

/// Run `fut` with a short timeout, failing the test if it hangs.
pub async fn within<T>(fut: impl Future<Output = T>) -> T {
    tokio::time::timeout(Duration::from_secs(5), fut)
        .await
        .expect("operation timed out")
}
