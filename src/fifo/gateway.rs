//! FIFO gateway.
//!
//! Owns the pipe tree on disk, the descriptor table and the monitor loops
//! that feed input lines to the router.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Instant;

use dashmap::DashSet;
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;

use crate::engine::PublicKey;
use crate::fifo::descriptor::{Direction, FifoDescriptor, FifoScope};
use crate::fifo::layout::{FifoLayout, FriendFifo, GlobalFifo, DIR_MODE, FILE_MODE};
use crate::fifo::reader::{InputPoller, InputSpec};
use crate::fifo::table::FifoTable;
use crate::fifo::{pipe, writer, FifoError, FifoResult, FifoSettings};
use crate::lifecycle::shutdown::Shutdown;
use crate::observability::metrics;

/// Which input pipe a line came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InputSource {
    RequestIn,
    Name,
    StatusMessage,
    TextIn(PublicKey),
    FileIn(PublicKey),
}

/// A trimmed, non-empty line read from an input pipe.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InputLine {
    pub source: InputSource,
    pub line: String,
}

pub struct FifoGateway {
    layout: FifoLayout,
    table: Arc<FifoTable>,
    settings: FifoSettings,
    /// Friend directories that already have a monitor loop.
    monitored: DashSet<PublicKey>,
    global_monitored: AtomicBool,
    input_tx: mpsc::UnboundedSender<InputLine>,
    shutdown: Arc<Shutdown>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl FifoGateway {
    /// Create a gateway and the receiving end of its input line channel.
    pub fn new(
        layout: FifoLayout,
        settings: FifoSettings,
        shutdown: Arc<Shutdown>,
    ) -> (Self, mpsc::UnboundedReceiver<InputLine>) {
        let (input_tx, input_rx) = mpsc::unbounded_channel();
        let gateway = Self {
            layout,
            table: Arc::new(FifoTable::new()),
            settings,
            monitored: DashSet::new(),
            global_monitored: AtomicBool::new(false),
            input_tx,
            shutdown,
            tasks: Mutex::new(Vec::new()),
        };
        (gateway, input_rx)
    }

    pub fn layout(&self) -> &FifoLayout {
        &self.layout
    }

    pub fn table(&self) -> &Arc<FifoTable> {
        &self.table
    }

    pub fn settings(&self) -> FifoSettings {
        self.settings
    }

    /// Create (or recreate) the pipe at `path` and register its descriptor.
    ///
    /// The previous descriptor is released first, so an old read handle is
    /// closed before the file under it is replaced.
    pub fn create_fifo(&self, path: &Path, direction: Direction, scope: FifoScope) -> FifoResult<()> {
        drop(self.table.release(path));

        pipe::remove_existing(path).map_err(|source| FifoError::Remove {
            path: path.to_path_buf(),
            source,
        })?;
        pipe::make_fifo(path, FILE_MODE).map_err(|source| FifoError::Create {
            path: path.to_path_buf(),
            source,
        })?;

        let handle = match direction {
            Direction::Input => Some(pipe::open_read_nonblocking(path).map_err(|source| {
                FifoError::Open {
                    path: path.to_path_buf(),
                    source,
                }
            })?),
            Direction::Output => None,
        };

        self.table.register(FifoDescriptor::new(
            path.to_path_buf(),
            direction,
            scope,
            FILE_MODE,
            handle,
        ));

        tracing::debug!(path = %path.display(), direction = ?direction, "Created fifo");
        Ok(())
    }

    /// Create the global pipes and the identity file, then start their monitor.
    pub fn create_global(&self, address: &str) -> FifoResult<()> {
        let dir = self.layout.client_dir();
        pipe::create_private_dir(&dir, DIR_MODE).map_err(|source| FifoError::CreateDir {
            path: dir.clone(),
            source,
        })?;

        for fifo in GlobalFifo::ALL {
            self.create_fifo(&self.layout.global(fifo), fifo.direction(), FifoScope::Global)?;
        }

        let id_path = self.layout.id_file();
        pipe::write_private_file(&id_path, format!("{}\n", address).as_bytes(), FILE_MODE)
            .map_err(|source| FifoError::Identity {
                path: id_path.clone(),
                source,
            })?;
        tracing::info!(path = %id_path.display(), "Wrote identity file");

        if !self.global_monitored.swap(true, Ordering::SeqCst) {
            let inputs = vec![
                (GlobalFifo::RequestIn, InputSource::RequestIn),
                (GlobalFifo::Name, InputSource::Name),
                (GlobalFifo::StatusMessage, InputSource::StatusMessage),
            ]
            .into_iter()
            .map(|(fifo, source)| (self.layout.global(fifo), source, FifoScope::Global))
            .collect();
            self.spawn_monitor("client", inputs);
        }
        Ok(())
    }

    /// Create the directory and pipes for `key`.
    ///
    /// Starts the directory's monitor loop the first time only; recreating
    /// the directory never duplicates it.
    pub fn create_friend(&self, key: &PublicKey) -> FifoResult<()> {
        let dir = self.layout.friend_dir(key);
        pipe::create_private_dir(&dir, DIR_MODE).map_err(|source| FifoError::CreateDir {
            path: dir.clone(),
            source,
        })?;

        for fifo in FriendFifo::ALL {
            self.create_fifo(&self.layout.friend(key, fifo), fifo.direction(), FifoScope::Friend)?;
        }

        if self.monitored.insert(*key) {
            let inputs = vec![
                (
                    self.layout.friend(key, FriendFifo::TextIn),
                    InputSource::TextIn(*key),
                    FifoScope::Friend,
                ),
                (
                    self.layout.friend(key, FriendFifo::FileIn),
                    InputSource::FileIn(*key),
                    FifoScope::Friend,
                ),
            ];
            self.spawn_monitor(&key.to_hex()[..8], inputs);
        }

        tracing::info!(key = %key, path = %dir.display(), "Created friend directory");
        Ok(())
    }

    pub fn has_friend_dir(&self, key: &PublicKey) -> bool {
        self.layout.friend_dir(key).is_dir()
    }

    pub fn is_monitored(&self, key: &PublicKey) -> bool {
        self.monitored.contains(key)
    }

    fn spawn_monitor(&self, label: &str, inputs: Vec<(PathBuf, InputSource, FifoScope)>) {
        if self.shutdown.is_triggered() {
            tracing::debug!(monitor = label, "Shutdown in progress, monitor not started");
            return;
        }

        let specs = inputs
            .iter()
            .map(|(path, _, scope)| InputSpec {
                path: path.clone(),
                scope: *scope,
            })
            .collect();
        let sources: Vec<(PathBuf, InputSource)> =
            inputs.into_iter().map(|(path, source, _)| (path, source)).collect();

        let tx = self.input_tx.clone();
        let handler = move |path: &Path, line: String| {
            let source = sources
                .iter()
                .find(|(candidate, _)| candidate == path)
                .map(|(_, source)| *source);
            if let Some(source) = source {
                if tx.send(InputLine { source, line }).is_err() {
                    tracing::debug!(path = %path.display(), "Router gone, dropping input line");
                }
            }
        };

        let poller = InputPoller::new(self.table.clone(), specs, self.settings.poll_interval);
        let shutdown_rx = self.shutdown.subscribe();
        let handle = tokio::spawn(poller.run(handler, shutdown_rx));

        tracing::debug!(monitor = label, "Started fifo monitor");
        self.tasks
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .push(handle);
    }

    /// Hand over the monitor task handles spawned so far.
    pub fn take_tasks(&self) -> Vec<JoinHandle<()>> {
        std::mem::take(
            &mut *self
                .tasks
                .lock()
                .unwrap_or_else(|poisoned| poisoned.into_inner()),
        )
    }

    /// Write one line to an output pipe.
    ///
    /// A descriptor dropped by idle cleanup is re-registered when the pipe
    /// still exists. Success refreshes the descriptor's last use.
    pub fn write_output(&self, path: &Path, scope: FifoScope, line: &str) -> FifoResult<()> {
        match self.table.direction(path) {
            Some(Direction::Output) => {}
            Some(Direction::Input) => return Err(FifoError::NotOutput(path.to_path_buf())),
            None => {
                if !pipe::is_fifo(path) {
                    return Err(FifoError::NotRegistered(path.to_path_buf()));
                }
                self.table.register_if_absent(FifoDescriptor::new(
                    path.to_path_buf(),
                    Direction::Output,
                    scope,
                    FILE_MODE,
                    None,
                ));
                tracing::debug!(path = %path.display(), "Re-registered output fifo");
            }
        }

        writer::write_line(path, line)?;
        self.table.touch(path);
        Ok(())
    }

    /// `write_output` with failures logged instead of returned.
    fn deliver(&self, path: PathBuf, scope: FifoScope, line: &str) -> bool {
        match self.write_output(&path, scope, line) {
            Ok(()) => true,
            Err(e) => {
                metrics::record_fifo_write_failure(match e {
                    FifoError::NoReader(_) => "no_reader",
                    FifoError::Full(_) => "full",
                    _ => "error",
                });
                tracing::warn!(path = %path.display(), error = %e, "Failed to write to fifo");
                false
            }
        }
    }

    pub fn write_request_out(&self, line: &str) -> bool {
        self.deliver(self.layout.global(GlobalFifo::RequestOut), FifoScope::Global, line)
    }

    pub fn write_text_out(&self, key: &PublicKey, line: &str) -> bool {
        self.deliver(self.layout.friend(key, FriendFifo::TextOut), FifoScope::Friend, line)
    }

    pub fn write_status(&self, key: &PublicKey, line: &str) -> bool {
        self.deliver(self.layout.friend(key, FriendFifo::Status), FifoScope::Friend, line)
    }

    pub fn write_file_out(&self, key: &PublicKey, line: &str) -> bool {
        self.deliver(self.layout.friend(key, FriendFifo::FileOut), FifoScope::Friend, line)
    }

    /// Drop per-friend descriptors idle past the threshold at `now`.
    pub fn sweep_idle(&self, now: Instant) -> Vec<PathBuf> {
        let removed = self.table.sweep_idle(now, self.settings.idle_threshold);
        for path in &removed {
            tracing::info!(path = %path.display(), "Cleaning up unused fifo");
        }
        removed
    }

    /// Periodic idle sweep until shutdown.
    pub async fn run_cleanup(self: Arc<Self>, mut shutdown: broadcast::Receiver<()>) {
        let mut interval = tokio::time::interval(self.settings.cleanup_interval);
        // The first tick completes immediately.
        interval.tick().await;

        loop {
            tokio::select! {
                _ = interval.tick() => {
                    self.sweep_idle(Instant::now());
                }
                _ = shutdown.recv() => break,
            }
        }
        tracing::debug!("Fifo cleanup loop stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fifo::reader::{drain_available, LineBuffer};
    use std::os::unix::fs::MetadataExt;
    use std::sync::Weak;
    use std::time::Duration;

    fn gateway(root: &Path) -> (FifoGateway, mpsc::UnboundedReceiver<InputLine>, Arc<Shutdown>) {
        let shutdown = Arc::new(Shutdown::new());
        let settings = FifoSettings {
            poll_interval: Duration::from_millis(10),
            ..FifoSettings::default()
        };
        let (gateway, rx) = FifoGateway::new(FifoLayout::new(root), settings, shutdown.clone());
        (gateway, rx, shutdown)
    }

    #[tokio::test]
    async fn test_create_global_tree() {
        let dir = tempfile::tempdir().unwrap();
        let (gateway, _rx, shutdown) = gateway(dir.path());

        gateway.create_global("ABCD").unwrap();

        let layout = gateway.layout().clone();
        for fifo in GlobalFifo::ALL {
            assert!(pipe::is_fifo(&layout.global(fifo)));
        }
        assert_eq!(std::fs::read_to_string(layout.id_file()).unwrap(), "ABCD\n");
        assert_eq!(
            std::fs::metadata(layout.client_dir()).unwrap().mode() & 0o777,
            0o700
        );
        assert_eq!(gateway.table().len(), 4);

        shutdown.trigger();
    }

    #[tokio::test]
    async fn test_recreate_releases_previous_handle() {
        let dir = tempfile::tempdir().unwrap();
        let (gateway, _rx, shutdown) = gateway(dir.path());
        let key = PublicKey([7; 32]);
        let text_in = gateway.layout().friend(&key, FriendFifo::TextIn);

        gateway.create_friend(&key).unwrap();
        let first: Weak<std::fs::File> =
            Arc::downgrade(&gateway.table().input_handle(&text_in).unwrap());

        gateway.create_friend(&key).unwrap();
        assert_eq!(gateway.table().len(), 5);
        assert!(gateway.is_monitored(&key));

        shutdown.trigger();
        let tasks = gateway.take_tasks();
        assert_eq!(tasks.len(), 1);
        for task in tasks {
            task.await.unwrap();
        }
        assert!(first.upgrade().is_none());
        assert!(gateway.table().input_handle(&text_in).is_some());
    }

    #[tokio::test]
    async fn test_input_lines_reach_channel() {
        let dir = tempfile::tempdir().unwrap();
        let (gateway, mut rx, shutdown) = gateway(dir.path());
        let key = PublicKey([9; 32]);
        gateway.create_friend(&key).unwrap();

        let path = gateway.layout().friend(&key, FriendFifo::TextIn);
        std::fs::write(&path, "hello\n").unwrap();

        let line = tokio::time::timeout(Duration::from_secs(2), rx.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(line.source, InputSource::TextIn(key));
        assert_eq!(line.line, "hello");

        shutdown.trigger();
    }

    #[tokio::test]
    async fn test_write_output_without_reader_is_harmless() {
        let dir = tempfile::tempdir().unwrap();
        let (gateway, _rx, shutdown) = gateway(dir.path());
        let key = PublicKey([3; 32]);
        gateway.create_friend(&key).unwrap();

        assert!(!gateway.write_text_out(&key, "nobody listening"));

        let path = gateway.layout().friend(&key, FriendFifo::Status);
        let reader = pipe::open_read_nonblocking(&path).unwrap();
        assert!(gateway.write_status(&key, "online"));

        let mut buffer = LineBuffer::new();
        assert_eq!(
            drain_available(&reader, &mut buffer).unwrap(),
            vec!["online".to_string()]
        );

        let input = gateway.layout().friend(&key, FriendFifo::TextIn);
        assert!(matches!(
            gateway.write_output(&input, FifoScope::Friend, "x"),
            Err(FifoError::NotOutput(_))
        ));

        shutdown.trigger();
    }

    #[tokio::test]
    async fn test_idle_sweep_then_lazy_reregister() {
        let dir = tempfile::tempdir().unwrap();
        let (gateway, _rx, shutdown) = gateway(dir.path());
        let key = PublicKey([5; 32]);
        gateway.create_global("ID").unwrap();
        gateway.create_friend(&key).unwrap();
        // Stop the monitors so they do not re-register inputs mid-test.
        shutdown.trigger();
        for task in gateway.take_tasks() {
            task.await.unwrap();
        }

        let removed = gateway.sweep_idle(Instant::now() + Duration::from_secs(3600));
        assert_eq!(removed.len(), 5);
        assert_eq!(gateway.table().len(), 4);

        let status = gateway.layout().friend(&key, FriendFifo::Status);
        let _reader = pipe::open_read_nonblocking(&status).unwrap();
        assert!(gateway.write_status(&key, "busy"));
        assert!(gateway.table().contains(&status));
    }
}
