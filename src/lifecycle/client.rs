//! Client lifecycle: startup, background loops and shutdown.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use notify::RecommendedWatcher;
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;

use crate::config::watcher::ConfigWatcher;
use crate::config::{ClientConfig, ConfigStore};
use crate::engine::{ChannelSink, EngineEvent, EngineHandle, MessagingEngine, PublicKey};
use crate::error::ClientError;
use crate::fifo::{FifoGateway, FifoLayout, FifoSettings, InputLine};
use crate::lifecycle::persistence;
use crate::lifecycle::shutdown::Shutdown;
use crate::lifecycle::state::{LifecycleState, StateCell};
use crate::observability::metrics;
use crate::registry::{Friend, FriendRegistry};
use crate::router::EventRouter;

/// Loops get this many poll intervals to stop before shutdown moves on.
const SHUTDOWN_GRACE_POLLS: u32 = 10;

type Task = (&'static str, JoinHandle<()>);

/// The running client: engine, registry, pipe tree and their loops.
pub struct Client {
    layout: FifoLayout,
    config: Arc<ConfigStore>,
    engine: Arc<EngineHandle>,
    registry: Arc<FriendRegistry>,
    gateway: Arc<FifoGateway>,
    shutdown: Arc<Shutdown>,
    state: StateCell,
    inputs: Mutex<Option<mpsc::UnboundedReceiver<InputLine>>>,
    tasks: Mutex<Vec<Task>>,
    watcher: Mutex<Option<RecommendedWatcher>>,
}

impl Client {
    pub fn new(layout: FifoLayout, config: Arc<ConfigStore>, engine: Box<dyn MessagingEngine>) -> Self {
        let settings = FifoSettings::from(&config.load().fifo);
        let shutdown = Arc::new(Shutdown::new());
        let (gateway, inputs) = FifoGateway::new(layout.clone(), settings, shutdown.clone());

        Self {
            layout,
            config,
            engine: Arc::new(EngineHandle::new(engine)),
            registry: Arc::new(FriendRegistry::new()),
            gateway: Arc::new(gateway),
            shutdown,
            state: StateCell::default(),
            inputs: Mutex::new(Some(inputs)),
            tasks: Mutex::new(Vec::new()),
            watcher: Mutex::new(None),
        }
    }

    pub fn state(&self) -> LifecycleState {
        self.state.get()
    }

    pub fn registry(&self) -> &Arc<FriendRegistry> {
        &self.registry
    }

    pub fn gateway(&self) -> &Arc<FifoGateway> {
        &self.gateway
    }

    pub fn engine(&self) -> &Arc<EngineHandle> {
        &self.engine
    }

    pub fn config(&self) -> &Arc<ConfigStore> {
        &self.config
    }

    pub fn layout(&self) -> &FifoLayout {
        &self.layout
    }

    /// Bring the client from `Stopped` to `Running`.
    ///
    /// Failing to create the global pipes is fatal; everything after that
    /// (friend directories, profile, bootstrap) is logged and skipped.
    pub async fn start(&self) -> Result<(), ClientError> {
        self.state
            .transition(LifecycleState::Stopped, LifecycleState::Starting)
            .map_err(|actual| ClientError::InvalidState {
                actual,
                expected: LifecycleState::Stopped,
            })?;

        let inputs = self
            .inputs
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .take();
        let Some(inputs) = inputs else {
            self.state.set(LifecycleState::Stopped);
            return Err(ClientError::AlreadyStarted);
        };

        let events = match self.prepare().and_then(|()| self.register_sink()) {
            Ok(events) => events,
            Err(e) => {
                *self
                    .inputs
                    .lock()
                    .unwrap_or_else(|poisoned| poisoned.into_inner()) = Some(inputs);
                self.state.set(LifecycleState::Stopped);
                return Err(e);
            }
        };

        self.apply_profile(&self.config.load());
        self.bootstrap(&self.config.load());
        self.spawn_loops(events, inputs);

        self.state.set(LifecycleState::Running);
        tracing::info!(
            root = %self.layout.root().display(),
            friends = self.registry.len(),
            "Client running"
        );
        Ok(())
    }

    /// Global tree, identity file, and one directory per known friend.
    fn prepare(&self) -> Result<(), ClientError> {
        let address = self.engine.with(|e| e.self_address())?;
        self.gateway.create_global(&address)?;
        tracing::info!(address = %address, "Identity ready");

        let friends = self.engine.with(|e| e.friends())?;
        for info in friends {
            let mut friend = Friend::new(info.handle, info.public_key).with_name(info.name);
            friend.status_message = info.status_message;
            self.registry.upsert(friend.clone());

            if let Err(e) = self.gateway.create_friend(&friend.public_key) {
                tracing::warn!(key = %friend.public_key, error = %e, "Failed to create friend fifos");
                continue;
            }
            tracing::info!(key = %friend.public_key, name = %friend.name, "Loaded friend");
        }
        metrics::record_friend_count(self.registry.len());
        Ok(())
    }

    fn register_sink(&self) -> Result<mpsc::UnboundedReceiver<EngineEvent>, ClientError> {
        let (sink, events) = ChannelSink::channel();
        self.engine.with(|e| e.set_event_sink(Arc::new(sink)))?;
        Ok(events)
    }

    fn apply_profile(&self, config: &ClientConfig) {
        if let Err(e) = self.engine.call(|e| e.set_self_name(&config.name)) {
            tracing::warn!(error = %e, "Failed to set name");
        }
        if let Err(e) = self
            .engine
            .call(|e| e.set_self_status_message(&config.status_message))
        {
            tracing::warn!(error = %e, "Failed to set status message");
        }
    }

    /// Contact every configured node; each failure is independent.
    fn bootstrap(&self, config: &ClientConfig) {
        for node in &config.bootstrap_nodes {
            let key: PublicKey = match node.public_key.to_ascii_lowercase().parse() {
                Ok(key) => key,
                Err(e) => {
                    tracing::warn!(address = %node.address, error = %e, "Invalid bootstrap key");
                    continue;
                }
            };
            tracing::info!(address = %node.address, port = node.port, "Bootstrapping");
            if let Err(e) = self
                .engine
                .call(|eng| eng.bootstrap(&node.address, node.port, &key))
            {
                tracing::warn!(address = %node.address, port = node.port, error = %e, "Failed to bootstrap");
            }
        }
    }

    fn spawn_loops(
        &self,
        events: mpsc::UnboundedReceiver<EngineEvent>,
        inputs: mpsc::UnboundedReceiver<InputLine>,
    ) {
        let config = self.config.load();
        let mut tasks = Vec::new();

        let router = EventRouter::new(
            self.engine.clone(),
            self.registry.clone(),
            self.gateway.clone(),
            self.config.clone(),
            self.layout.state_file(),
        );
        tasks.push((
            "router",
            tokio::spawn(router.run(events, inputs, self.shutdown.subscribe())),
        ));

        tasks.push((
            "iterate",
            tokio::spawn(run_iteration(self.engine.clone(), self.shutdown.subscribe())),
        ));

        tasks.push((
            "save",
            tokio::spawn(run_save(
                self.engine.clone(),
                self.layout.state_file(),
                Duration::from_secs(config.save_interval_secs),
                self.shutdown.subscribe(),
            )),
        ));

        tasks.push((
            "cleanup",
            tokio::spawn(self.gateway.clone().run_cleanup(self.shutdown.subscribe())),
        ));

        let (watcher, updates) = ConfigWatcher::new(self.config.path());
        match watcher.run() {
            Ok(watcher) => {
                *self
                    .watcher
                    .lock()
                    .unwrap_or_else(|poisoned| poisoned.into_inner()) = Some(watcher);
                tasks.push((
                    "config",
                    tokio::spawn(run_config_updates(
                        self.engine.clone(),
                        self.config.clone(),
                        updates,
                        self.shutdown.subscribe(),
                    )),
                ));
            }
            Err(e) => tracing::warn!(error = %e, "Config watcher unavailable, edits need a restart"),
        }

        self.tasks
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .extend(tasks);
    }

    /// Unfriend `key`: remove it from the engine and the registry, then save.
    ///
    /// The directory is left on disk.
    pub fn remove_friend(&self, key: &PublicKey) -> Result<Friend, ClientError> {
        let friend = self
            .registry
            .by_key(key)
            .ok_or(ClientError::UnknownFriend(*key))?;

        self.engine.call(|e| e.delete_friend(friend.handle))?;
        self.registry.remove(friend.handle);
        metrics::record_friend_count(self.registry.len());
        persistence::flush_state(&self.engine, &self.layout.state_file())?;

        tracing::info!(key = %key, friend = %friend.handle, "Friend removed");
        Ok(friend)
    }

    /// Stop every loop, save state and release the engine.
    ///
    /// Calling this while already shutting down or stopped does nothing.
    pub async fn shutdown(&self) {
        loop {
            let current = self.state.get();
            match current {
                LifecycleState::ShuttingDown | LifecycleState::Stopped => return,
                LifecycleState::Starting | LifecycleState::Running => {
                    if self
                        .state
                        .transition(current, LifecycleState::ShuttingDown)
                        .is_ok()
                    {
                        break;
                    }
                }
            }
        }

        tracing::info!("Shutting down client");
        self.shutdown.trigger();

        let mut tasks: Vec<Task> = std::mem::take(
            &mut *self
                .tasks
                .lock()
                .unwrap_or_else(|poisoned| poisoned.into_inner()),
        );
        tasks.extend(self.gateway.take_tasks().into_iter().map(|t| ("monitor", t)));

        let grace = self.gateway.settings().poll_interval * SHUTDOWN_GRACE_POLLS;
        let deadline = tokio::time::Instant::now() + grace;
        for (name, mut task) in tasks {
            match tokio::time::timeout_at(deadline, &mut task).await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => tracing::warn!(task = name, error = %e, "Loop ended abnormally"),
                Err(_) => tracing::warn!(task = name, "Loop did not stop in time, leaving it"),
            }
        }

        drop(
            self.watcher
                .lock()
                .unwrap_or_else(|poisoned| poisoned.into_inner())
                .take(),
        );

        match persistence::flush_state(&self.engine, &self.layout.state_file()) {
            Ok(bytes) => tracing::info!(bytes, "Final state saved"),
            Err(e) => tracing::error!(error = %e, "Failed to save final state"),
        }

        self.engine.release();
        self.state.set(LifecycleState::Stopped);
        tracing::info!("Client shutdown complete");
    }
}

/// Drive the engine, re-reading its requested cadence after every step.
async fn run_iteration(engine: Arc<EngineHandle>, mut shutdown: broadcast::Receiver<()>) {
    loop {
        let interval = match engine.with(|e| {
            e.iterate();
            e.iteration_interval()
        }) {
            Ok(interval) => interval,
            Err(_) => break,
        };

        tokio::select! {
            _ = tokio::time::sleep(interval) => {}
            _ = shutdown.recv() => break,
        }
    }
    tracing::debug!("Iteration loop stopped");
}

async fn run_save(
    engine: Arc<EngineHandle>,
    path: std::path::PathBuf,
    every: Duration,
    mut shutdown: broadcast::Receiver<()>,
) {
    let mut interval = tokio::time::interval(every);
    // The first tick completes immediately.
    interval.tick().await;

    loop {
        tokio::select! {
            _ = interval.tick() => {
                if let Err(e) = persistence::flush_state(&engine, &path) {
                    tracing::error!(error = %e, "Periodic save failed");
                }
            }
            _ = shutdown.recv() => break,
        }
    }
    tracing::debug!("Save loop stopped");
}

async fn run_config_updates(
    engine: Arc<EngineHandle>,
    store: Arc<ConfigStore>,
    mut updates: mpsc::UnboundedReceiver<ClientConfig>,
    mut shutdown: broadcast::Receiver<()>,
) {
    loop {
        tokio::select! {
            Some(config) = updates.recv() => apply_config_change(&engine, &store, config),
            _ = shutdown.recv() => break,
            else => break,
        }
    }
    tracing::debug!("Config update loop stopped");
}

/// Publish a config read from disk and push a changed profile to the engine.
///
/// Runs under the store's write lock, like profile changes from the pipes.
pub fn apply_config_change(engine: &EngineHandle, store: &ConfigStore, config: ClientConfig) {
    store.reload(config, |current, config| {
        if current.name != config.name {
            match engine.call(|e| e.set_self_name(&config.name)) {
                Ok(()) => tracing::info!(name = %config.name, "Name changed from config file"),
                Err(e) => tracing::warn!(error = %e, "Failed to apply name from config file"),
            }
        }
        if current.status_message != config.status_message {
            match engine.call(|e| e.set_self_status_message(&config.status_message)) {
                Ok(()) => tracing::info!(status_message = %config.status_message, "Status message changed from config file"),
                Err(e) => tracing::warn!(error = %e, "Failed to apply status message from config file"),
            }
        }
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::save_config;
    use crate::engine::memory::MemoryEngine;

    fn client(root: &std::path::Path, engine: MemoryEngine) -> Client {
        let layout = FifoLayout::new(root);
        let mut config = ClientConfig::default();
        config.fifo.poll_interval_ms = 10;
        let store = Arc::new(ConfigStore::new(config, layout.config_file()));
        Client::new(layout, store, Box::new(engine))
    }

    #[tokio::test]
    async fn test_start_and_shutdown_are_ordered() {
        let dir = tempfile::tempdir().unwrap();
        let engine = MemoryEngine::generate();
        let client = client(dir.path(), engine.clone());

        client.start().await.unwrap();
        assert_eq!(client.state(), LifecycleState::Running);
        assert!(engine.has_sink());
        assert_eq!(engine.self_name(), "ratox user");
        assert_eq!(engine.bootstrapped_nodes().len(), 4);

        assert!(matches!(
            client.start().await,
            Err(ClientError::InvalidState { .. })
        ));

        client.shutdown().await;
        assert_eq!(client.state(), LifecycleState::Stopped);
        assert!(engine.is_killed());
        assert!(client.engine().is_released());
        assert!(client.layout().state_file().exists());

        // Second shutdown is a no-op.
        client.shutdown().await;
        assert_eq!(client.state(), LifecycleState::Stopped);
    }

    #[tokio::test]
    async fn test_bad_bootstrap_node_does_not_stop_others() {
        let dir = tempfile::tempdir().unwrap();
        let engine = MemoryEngine::generate();
        let client = client(dir.path(), engine.clone());
        client
            .config()
            .update(|c| {
                c.bootstrap_nodes[0].port = 0;
                c.bootstrap_nodes[1].public_key = "nothex".into();
            })
            .unwrap();

        client.start().await.unwrap();
        assert_eq!(engine.bootstrapped_nodes().len(), 2);
        client.shutdown().await;
    }

    #[tokio::test]
    async fn test_config_change_reapplies_profile() {
        let dir = tempfile::tempdir().unwrap();
        let engine = MemoryEngine::generate();
        let client = client(dir.path(), engine.clone());

        let mut edited = (*client.config().load()).clone();
        edited.name = "renamed".into();
        save_config(client.config().path(), &edited).unwrap();
        apply_config_change(client.engine(), client.config(), edited);

        assert_eq!(engine.self_name(), "renamed");
        assert_eq!(client.config().load().name, "renamed");
    }

    #[tokio::test]
    async fn test_stale_reload_does_not_undo_pipe_rename() {
        let dir = tempfile::tempdir().unwrap();
        let engine = MemoryEngine::generate();
        let client = client(dir.path(), engine.clone());

        let mut stale = (*client.config().load()).clone();
        stale.name = "old".into();
        save_config(client.config().path(), &stale).unwrap();

        client.config().update(|c| c.name = "new".into()).unwrap();
        client.engine().call(|e| e.set_self_name("new")).unwrap();
        apply_config_change(client.engine(), client.config(), stale);

        assert_eq!(engine.self_name(), "new");
        assert_eq!(client.config().load().name, "new");
    }

    #[tokio::test]
    async fn test_failed_start_returns_to_stopped() {
        let dir = tempfile::tempdir().unwrap();
        let client = client(dir.path(), MemoryEngine::generate());
        client.engine().release();

        assert!(matches!(client.start().await, Err(ClientError::Engine(_))));
        assert_eq!(client.state(), LifecycleState::Stopped);

        // Still startable: the failure is reported again, not AlreadyStarted.
        assert!(matches!(client.start().await, Err(ClientError::Engine(_))));
        client.shutdown().await;
        assert_eq!(client.state(), LifecycleState::Stopped);
    }

    /// Engine whose requested cadence follows a script, then stays on the last step.
    struct ScriptedCadence {
        inner: MemoryEngine,
        script: Vec<Duration>,
        iterations: Arc<std::sync::atomic::AtomicUsize>,
    }

    impl MessagingEngine for ScriptedCadence {
        fn set_event_sink(&mut self, sink: Arc<dyn crate::engine::EventSink>) {
            self.inner.set_event_sink(sink)
        }
        fn self_address(&self) -> String {
            self.inner.self_address()
        }
        fn self_public_key(&self) -> PublicKey {
            self.inner.self_public_key()
        }
        fn set_self_name(&mut self, name: &str) -> crate::engine::EngineResult<()> {
            self.inner.set_self_name(name)
        }
        fn set_self_status_message(&mut self, message: &str) -> crate::engine::EngineResult<()> {
            self.inner.set_self_status_message(message)
        }
        fn send_message(
            &mut self,
            friend: crate::engine::FriendHandle,
            text: &str,
            kind: crate::engine::MessageKind,
        ) -> crate::engine::EngineResult<u32> {
            self.inner.send_message(friend, text, kind)
        }
        fn add_friend(&mut self, address: &str, message: &str) -> crate::engine::EngineResult<crate::engine::FriendHandle> {
            self.inner.add_friend(address, message)
        }
        fn add_friend_norequest(&mut self, key: &PublicKey) -> crate::engine::EngineResult<crate::engine::FriendHandle> {
            self.inner.add_friend_norequest(key)
        }
        fn delete_friend(&mut self, friend: crate::engine::FriendHandle) -> crate::engine::EngineResult<()> {
            self.inner.delete_friend(friend)
        }
        fn friends(&self) -> Vec<crate::engine::FriendInfo> {
            self.inner.friends()
        }
        fn friend_public_key(&self, friend: crate::engine::FriendHandle) -> Option<PublicKey> {
            self.inner.friend_public_key(friend)
        }
        fn send_file(
            &mut self,
            friend: crate::engine::FriendHandle,
            kind: u32,
            size: u64,
            file_id: crate::engine::FileId,
            filename: &str,
        ) -> crate::engine::EngineResult<u32> {
            self.inner.send_file(friend, kind, size, file_id, filename)
        }
        fn file_control(
            &mut self,
            friend: crate::engine::FriendHandle,
            file_number: u32,
            control: crate::engine::FileControl,
        ) -> crate::engine::EngineResult<()> {
            self.inner.file_control(friend, file_number, control)
        }
        fn file_send_chunk(
            &mut self,
            friend: crate::engine::FriendHandle,
            file_number: u32,
            position: u64,
            data: &[u8],
        ) -> crate::engine::EngineResult<()> {
            self.inner.file_send_chunk(friend, file_number, position, data)
        }
        fn save_state(&self) -> Vec<u8> {
            self.inner.save_state()
        }
        fn bootstrap(&mut self, address: &str, port: u16, key: &PublicKey) -> crate::engine::EngineResult<()> {
            self.inner.bootstrap(address, port, key)
        }
        fn iterate(&mut self) {
            self.iterations.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
            self.inner.iterate();
        }
        fn iteration_interval(&self) -> Duration {
            let done = self.iterations.load(std::sync::atomic::Ordering::SeqCst);
            let step = done.saturating_sub(1).min(self.script.len() - 1);
            self.script[step]
        }
        fn kill(&mut self) {
            self.inner.kill()
        }
    }

    #[tokio::test]
    async fn test_iteration_follows_changing_cadence() {
        let iterations = Arc::new(std::sync::atomic::AtomicUsize::new(0));
        let engine = ScriptedCadence {
            inner: MemoryEngine::generate(),
            script: vec![Duration::from_millis(300), Duration::from_millis(5)],
            iterations: iterations.clone(),
        };
        let handle = Arc::new(EngineHandle::new(Box::new(engine)));
        let shutdown = Shutdown::new();
        let task = tokio::spawn(run_iteration(handle, shutdown.subscribe()));

        // First step asked for a long wait.
        tokio::time::sleep(Duration::from_millis(150)).await;
        assert_eq!(iterations.load(std::sync::atomic::Ordering::SeqCst), 1);

        // Then the short cadence is picked up.
        tokio::time::sleep(Duration::from_millis(400)).await;
        assert!(iterations.load(std::sync::atomic::Ordering::SeqCst) > 10);

        shutdown.trigger();
        task.await.unwrap();
    }
}
