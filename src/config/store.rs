//! Shared, swappable configuration.

use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};

use arc_swap::ArcSwap;

use crate::config::loader::{load_config, save_config, ConfigError};
use crate::config::schema::ClientConfig;

/// The current configuration plus the file it is persisted to.
///
/// Readers take a cheap snapshot with `load`. Writers (`update` and
/// `reload`) are serialized against each other.
pub struct ConfigStore {
    current: ArcSwap<ClientConfig>,
    path: PathBuf,
    writes: Mutex<()>,
}

impl ConfigStore {
    pub fn new(config: ClientConfig, path: impl Into<PathBuf>) -> Self {
        Self {
            current: ArcSwap::from_pointee(config),
            path: path.into(),
            writes: Mutex::new(()),
        }
    }

    pub fn load(&self) -> Arc<ClientConfig> {
        self.current.load_full()
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn lock_writes(&self) -> MutexGuard<'_, ()> {
        self.writes.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Apply `f` to a copy of the current config, save it, then publish it.
    ///
    /// On a save failure the in-memory value still changes; the error is
    /// returned for the caller to log.
    pub fn update(&self, f: impl FnOnce(&mut ClientConfig)) -> Result<Arc<ClientConfig>, ConfigError> {
        let _writes = self.lock_writes();
        let mut next = (*self.current.load_full()).clone();
        f(&mut next);
        let next = Arc::new(next);
        self.current.store(next.clone());
        save_config(&self.path, &next)?;
        Ok(next)
    }

    /// Publish `config`, read from disk, without writing it back.
    ///
    /// `apply` sees the previous and the new value before the new one is
    /// published. Nothing happens when `config` is unchanged, or when the
    /// file no longer holds it because a later write replaced it.
    pub fn reload(
        &self,
        config: ClientConfig,
        apply: impl FnOnce(&ClientConfig, &ClientConfig),
    ) -> bool {
        let _writes = self.lock_writes();
        match load_config(&self.path) {
            Ok(on_disk) if on_disk == config => {}
            _ => {
                tracing::debug!(path = %self.path.display(), "Ignoring superseded config reload");
                return false;
            }
        }

        let previous = self.current.load_full();
        if *previous == config {
            return false;
        }
        apply(&previous, &config);
        self.current.store(Arc::new(config));
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_update_persists_and_publishes() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        let store = ConfigStore::new(ClientConfig::default(), &path);

        let before = store.load();
        store.update(|c| c.name = "carol".to_string()).unwrap();

        assert_eq!(before.name, "ratox user");
        assert_eq!(store.load().name, "carol");
        assert_eq!(load_config(&path).unwrap().name, "carol");
    }

    #[test]
    fn test_reload_skips_superseded_content() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        let store = ConfigStore::new(ClientConfig::default(), &path);

        let mut stale = ClientConfig::default();
        stale.name = "stale".to_string();
        save_config(&path, &stale).unwrap();
        store.update(|c| c.name = "fresh".to_string()).unwrap();

        let mut applied = false;
        assert!(!store.reload(stale, |_, _| applied = true));
        assert!(!applied);
        assert_eq!(store.load().name, "fresh");

        let mut edited = (*store.load()).clone();
        edited.status_message = "edited".to_string();
        save_config(&path, &edited).unwrap();
        assert!(store.reload(edited, |previous, next| {
            assert_eq!(previous.status_message, "Running ratox");
            assert_eq!(next.status_message, "edited");
        }));
        assert_eq!(store.load().status_message, "edited");
    }
}
