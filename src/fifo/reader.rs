//! Input pipe polling and line framing.
//!
//! # Responsibilities
//! - Read whatever a non-blocking input pipe has available
//! - Frame complete newline-terminated lines, trim them, drop empty ones
//! - Hand each line to the caller's handler
//! - Sleep the idle interval between sweeps instead of blocking
//!
//! # Design Decisions
//! - The read end stays open in the descriptor, so writers never block on
//!   open and never see `EPIPE` between sweeps
//! - A partial line is kept across sweeps until its newline arrives; it is
//!   discarded when the writer closes without finishing it
//! - Oversized or non-UTF-8 lines are dropped with a warning

use std::collections::HashMap;
use std::fs::File;
use std::io::{self, Read};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::broadcast;

use crate::fifo::descriptor::{Direction, FifoDescriptor, FifoScope};
use crate::fifo::layout::FILE_MODE;
use crate::fifo::pipe;
use crate::fifo::table::FifoTable;

/// Longest accepted input line, in bytes.
pub const MAX_LINE_BYTES: usize = 64 * 1024;

const READ_CHUNK: usize = 4096;

/// Accumulates bytes and yields complete lines.
#[derive(Debug, Default)]
pub struct LineBuffer {
    pending: Vec<u8>,
    overflowed: bool,
}

impl LineBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append `bytes` and return every complete, trimmed, non-empty line.
    pub fn push(&mut self, bytes: &[u8]) -> Vec<String> {
        let mut lines = Vec::new();
        for &byte in bytes {
            if byte == b'\n' {
                let raw = std::mem::take(&mut self.pending);
                if std::mem::take(&mut self.overflowed) {
                    tracing::warn!(limit = MAX_LINE_BYTES, "Dropping oversized input line");
                    continue;
                }
                match String::from_utf8(raw) {
                    Ok(line) => {
                        let trimmed = line.trim();
                        if !trimmed.is_empty() {
                            lines.push(trimmed.to_string());
                        }
                    }
                    Err(_) => tracing::warn!("Dropping input line that is not valid UTF-8"),
                }
            } else if self.pending.len() < MAX_LINE_BYTES {
                self.pending.push(byte);
            } else {
                self.overflowed = true;
            }
        }
        lines
    }

    /// Forget an unfinished line. Returns the number of bytes dropped.
    pub fn discard_partial(&mut self) -> usize {
        self.overflowed = false;
        std::mem::take(&mut self.pending).len()
    }

    pub fn has_partial(&self) -> bool {
        !self.pending.is_empty()
    }
}

/// Read everything currently available on a non-blocking pipe.
///
/// Returns the complete lines read. `Ok` with no lines means no writer was
/// attached or nothing was written.
pub fn drain_available(file: &File, buffer: &mut LineBuffer) -> io::Result<Vec<String>> {
    let mut reader = file;
    let mut chunk = [0u8; READ_CHUNK];
    let mut lines = Vec::new();

    loop {
        match reader.read(&mut chunk) {
            // No writer, or the writer closed.
            Ok(0) => {
                let dropped = buffer.discard_partial();
                if dropped > 0 {
                    tracing::debug!(bytes = dropped, "Writer closed mid-line, discarding partial input");
                }
                return Ok(lines);
            }
            Ok(n) => lines.extend(buffer.push(&chunk[..n])),
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => return Ok(lines),
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        }
    }
}

/// A pipe watched by a poller.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InputSpec {
    pub path: PathBuf,
    pub scope: FifoScope,
}

/// Sweeps a fixed group of input pipes.
pub struct InputPoller {
    table: Arc<FifoTable>,
    inputs: Vec<InputSpec>,
    buffers: HashMap<PathBuf, LineBuffer>,
    interval: Duration,
}

impl InputPoller {
    pub fn new(table: Arc<FifoTable>, inputs: Vec<InputSpec>, interval: Duration) -> Self {
        Self {
            table,
            inputs,
            buffers: HashMap::new(),
            interval,
        }
    }

    /// Fetch the read end, re-registering the pipe if idle cleanup dropped it.
    fn handle_for(&self, spec: &InputSpec) -> Option<Arc<File>> {
        if let Some(handle) = self.table.input_handle(&spec.path) {
            return Some(handle);
        }
        if !pipe::is_fifo(&spec.path) {
            return None;
        }
        match pipe::open_read_nonblocking(&spec.path) {
            Ok(file) => {
                let descriptor = FifoDescriptor::new(
                    spec.path.clone(),
                    Direction::Input,
                    spec.scope,
                    FILE_MODE,
                    Some(file),
                );
                if self.table.register_if_absent(descriptor) {
                    tracing::debug!(path = %spec.path.display(), "Re-registered input fifo");
                }
                self.table.input_handle(&spec.path)
            }
            Err(e) => {
                tracing::debug!(path = %spec.path.display(), error = %e, "Failed to reopen input fifo");
                None
            }
        }
    }

    /// One pass over every input. Returns the number of lines delivered.
    pub fn sweep(&mut self, handler: &mut impl FnMut(&Path, String)) -> usize {
        let mut delivered = 0;
        for index in 0..self.inputs.len() {
            let spec = self.inputs[index].clone();
            let Some(handle) = self.handle_for(&spec) else {
                continue;
            };

            let buffer = self.buffers.entry(spec.path.clone()).or_default();
            match drain_available(&handle, buffer) {
                Ok(lines) if !lines.is_empty() => {
                    self.table.touch(&spec.path);
                    for line in lines {
                        handler(&spec.path, line);
                        delivered += 1;
                    }
                }
                Ok(_) => {}
                Err(e) => {
                    tracing::warn!(path = %spec.path.display(), error = %e, "Error reading fifo");
                }
            }
        }
        delivered
    }

    /// Sweep until the shutdown signal fires.
    pub async fn run(
        mut self,
        mut handler: impl FnMut(&Path, String) + Send,
        mut shutdown: broadcast::Receiver<()>,
    ) {
        tracing::debug!(inputs = self.inputs.len(), "Input poller starting");
        loop {
            self.sweep(&mut handler);

            tokio::select! {
                _ = tokio::time::sleep(self.interval) => {}
                _ = shutdown.recv() => break,
            }
        }
        tracing::debug!(inputs = self.inputs.len(), "Input poller stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_line_buffer_frames_and_trims() {
        let mut buffer = LineBuffer::new();
        assert!(buffer.push(b"  hello ").is_empty());
        assert!(buffer.has_partial());

        let lines = buffer.push(b"world \n\n   \nsecond\nthi");
        assert_eq!(lines, vec!["hello world".to_string(), "second".to_string()]);
        assert_eq!(buffer.discard_partial(), 3);
    }

    #[test]
    fn test_line_buffer_drops_invalid_utf8_and_oversized() {
        let mut buffer = LineBuffer::new();
        assert!(buffer.push(b"\xff\xfe\n").is_empty());

        let big = vec![b'a'; MAX_LINE_BYTES + 10];
        assert!(buffer.push(&big).is_empty());
        assert!(buffer.push(b"\nok\n") == vec!["ok".to_string()]);
    }

    #[test]
    fn test_drain_without_writer_returns_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("in");
        pipe::make_fifo(&path, 0o600).unwrap();

        let reader = pipe::open_read_nonblocking(&path).unwrap();
        let mut buffer = LineBuffer::new();
        assert!(drain_available(&reader, &mut buffer).unwrap().is_empty());
    }

    #[test]
    fn test_sweep_delivers_lines_to_handler() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("text_in");
        pipe::make_fifo(&path, 0o600).unwrap();

        let table = Arc::new(FifoTable::new());
        table.register(FifoDescriptor::new(
            path.clone(),
            Direction::Input,
            FifoScope::Friend,
            0o600,
            Some(pipe::open_read_nonblocking(&path).unwrap()),
        ));

        let mut writer = std::fs::OpenOptions::new().write(true).open(&path).unwrap();
        writer.write_all(b"hi there\n\n  second  \npartial").unwrap();

        let mut poller = InputPoller::new(
            table,
            vec![InputSpec {
                path: path.clone(),
                scope: FifoScope::Friend,
            }],
            Duration::from_millis(10),
        );
        let mut seen = Vec::new();
        let delivered = poller.sweep(&mut |p: &Path, line: String| {
            assert_eq!(p, path.as_path());
            seen.push(line);
        });

        assert_eq!(delivered, 2);
        assert_eq!(seen, vec!["hi there".to_string(), "second".to_string()]);

        writer.write_all(b" line\n").unwrap();
        drop(writer);
        poller.sweep(&mut |_: &Path, line: String| seen.push(line));
        assert_eq!(seen.last().unwrap(), "partial line");
    }

    #[test]
    fn test_sweep_reregisters_dropped_input() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("file_in");
        pipe::make_fifo(&path, 0o600).unwrap();

        let table = Arc::new(FifoTable::new());
        let mut poller = InputPoller::new(
            table.clone(),
            vec![InputSpec {
                path: path.clone(),
                scope: FifoScope::Friend,
            }],
            Duration::from_millis(10),
        );

        poller.sweep(&mut |_: &Path, _: String| {});
        assert!(table.input_handle(&path).is_some());
    }
}
