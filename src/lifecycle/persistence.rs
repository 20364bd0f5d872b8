//! Engine state persistence.

use std::fs;
use std::io;
use std::path::Path;

use crate::engine::{EngineError, EngineHandle};
use crate::fifo::layout::FILE_MODE;
use crate::fifo::pipe;

#[derive(Debug, thiserror::Error)]
pub enum PersistError {
    #[error(transparent)]
    Engine(#[from] EngineError),

    #[error("failed to write state to {path}: {source}")]
    Io {
        path: std::path::PathBuf,
        source: io::Error,
    },
}

/// Serialize the engine and replace `path` with the result.
///
/// The engine lock is held only while serializing; the write happens after.
pub fn flush_state(engine: &EngineHandle, path: &Path) -> Result<usize, PersistError> {
    let data = engine.with(|e| e.save_state())?;

    let tmp = path.with_extension("state.tmp");
    let write = pipe::write_private_file(&tmp, &data, FILE_MODE).and_then(|_| fs::rename(&tmp, path));
    write.map_err(|source| PersistError::Io {
        path: path.to_path_buf(),
        source,
    })?;

    tracing::debug!(path = %path.display(), bytes = data.len(), "State saved");
    Ok(data.len())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::memory::MemoryEngine;
    use crate::engine::PublicKey;
    use std::os::unix::fs::MetadataExt;

    #[test]
    fn test_flush_writes_restorable_state() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("ratox.state");

        let engine = MemoryEngine::generate();
        engine.seed_friend(PublicKey([1; 32]), "alice").unwrap();
        let handle = EngineHandle::new(Box::new(engine));

        let written = flush_state(&handle, &path).unwrap();
        assert!(written > 0);
        assert_eq!(fs::metadata(&path).unwrap().mode() & 0o777, 0o600);

        let restored = MemoryEngine::from_state(&fs::read(&path).unwrap()).unwrap();
        assert_eq!(
            crate::engine::MessagingEngine::friends(&restored).len(),
            1
        );
    }

    #[test]
    fn test_flush_after_release_fails() {
        let dir = tempfile::tempdir().unwrap();
        let handle = EngineHandle::new(Box::new(MemoryEngine::generate()));
        handle.release();

        let err = flush_state(&handle, &dir.path().join("s")).unwrap_err();
        assert!(matches!(err, PersistError::Engine(EngineError::Released)));
    }
}
