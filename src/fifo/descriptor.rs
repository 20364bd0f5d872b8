//! FIFO descriptor.

use std::fs::File;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Which side of the protocol a pipe carries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Direction {
    /// The user writes, we read.
    Input,
    /// We write, the user reads.
    Output,
}

/// Whether a pipe belongs to the global set or to a friend directory.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FifoScope {
    Global,
    Friend,
}

/// A registered pipe.
///
/// Input pipes keep their non-blocking read end open for as long as the
/// descriptor lives; dropping the descriptor closes it.
#[derive(Debug, Clone)]
pub struct FifoDescriptor {
    pub path: PathBuf,
    pub direction: Direction,
    pub scope: FifoScope,
    pub mode: u32,
    pub last_used: Instant,
    handle: Option<Arc<File>>,
}

impl FifoDescriptor {
    pub fn new(
        path: PathBuf,
        direction: Direction,
        scope: FifoScope,
        mode: u32,
        handle: Option<File>,
    ) -> Self {
        Self {
            path,
            direction,
            scope,
            mode,
            last_used: Instant::now(),
            handle: handle.map(Arc::new),
        }
    }

    /// The open read end, for input pipes.
    pub fn handle(&self) -> Option<Arc<File>> {
        self.handle.clone()
    }

    pub fn has_handle(&self) -> bool {
        self.handle.is_some()
    }

    pub fn touch(&mut self) {
        self.last_used = Instant::now();
    }

    pub fn idle_for(&self, now: Instant) -> Duration {
        now.saturating_duration_since(self.last_used)
    }

    pub fn is_global(&self) -> bool {
        self.scope == FifoScope::Global
    }
}
