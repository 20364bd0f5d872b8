//! Output pipe writes.
//!
//! Every write opens the pipe write-only and non-blocking, writes one line
//! and closes it. Without a reader the open fails with `ENXIO`; the caller
//! logs and moves on.

use std::io::{self, Write};
use std::path::Path;

use crate::fifo::pipe;
use crate::fifo::{FifoError, FifoResult};

/// Write `line` followed by a newline to the pipe at `path`.
pub fn write_line(path: &Path, line: &str) -> FifoResult<()> {
    let mut file = pipe::open_write_nonblocking(path).map_err(|source| {
        if pipe::is_no_reader(&source) {
            FifoError::NoReader(path.to_path_buf())
        } else {
            FifoError::Open {
                path: path.to_path_buf(),
                source,
            }
        }
    })?;

    let mut payload = Vec::with_capacity(line.len() + 1);
    payload.extend_from_slice(line.as_bytes());
    payload.push(b'\n');

    file.write_all(&payload).map_err(|source| match source.kind() {
        io::ErrorKind::WouldBlock => FifoError::Full(path.to_path_buf()),
        _ => FifoError::Write {
            path: path.to_path_buf(),
            source,
        },
    })
}
