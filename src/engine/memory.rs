//! In-process engine without a network transport.
//!
//! # Responsibilities
//! - Hold our identity (key, nospam) and the contact list
//! - Serialize/restore that state as JSON
//! - Queue injected events and deliver them on `iterate`
//! - Keep a bounded log of outgoing traffic so callers can observe it
//!
//! Used when no network engine is linked in, and by the test suite.

use std::collections::{BTreeMap, VecDeque};
use std::fs;
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::engine::events::{EngineEvent, EventSink};
use crate::engine::types::{
    FileControl, FileId, FriendHandle, FriendInfo, MessageKind, PublicKey, ADDRESS_HEX_LEN,
    PUBLIC_KEY_SIZE,
};
use crate::engine::{EngineError, EngineResult, MessagingEngine};

/// Largest text payload the engine accepts, in bytes.
pub const MAX_MESSAGE_LENGTH: usize = 1372;

/// Longest display name or status message, in bytes.
pub const MAX_PROFILE_LENGTH: usize = 128;

const IDLE_INTERVAL: Duration = Duration::from_millis(50);
const BUSY_INTERVAL: Duration = Duration::from_millis(10);

/// Entries kept per outgoing-traffic log; older ones are dropped.
pub const RECORD_LIMIT: usize = 256;

/// Append to a bounded log, evicting the oldest entry when full.
fn record<T>(log: &mut VecDeque<T>, item: T) {
    if log.len() >= RECORD_LIMIT {
        log.pop_front();
    }
    log.push_back(item);
}

/// A text message handed to the engine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SentMessage {
    pub friend: FriendHandle,
    pub text: String,
    pub kind: MessageKind,
}

/// A file offer handed to the engine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SentFile {
    pub friend: FriendHandle,
    pub file_number: u32,
    pub size: u64,
    pub file_id: FileId,
    pub filename: String,
}

/// A chunk of an outgoing transfer handed to the engine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SentChunk {
    pub friend: FriendHandle,
    pub file_number: u32,
    pub position: u64,
    pub data: Vec<u8>,
}

#[derive(Debug, Serialize, Deserialize)]
struct SavedFriend {
    public_key: PublicKey,
    name: String,
    status_message: String,
}

#[derive(Debug, Serialize, Deserialize)]
struct SavedState {
    public_key: PublicKey,
    nospam: u32,
    name: String,
    status_message: String,
    friends: Vec<SavedFriend>,
}

struct MemoryState {
    public_key: PublicKey,
    nospam: u32,
    name: String,
    status_message: String,
    friends: BTreeMap<FriendHandle, FriendInfo>,
    next_handle: u32,
    next_file: u32,
    next_message: u32,
    sink: Option<Arc<dyn EventSink>>,
    pending: VecDeque<EngineEvent>,
    sent_messages: VecDeque<SentMessage>,
    sent_files: VecDeque<SentFile>,
    sent_chunks: VecDeque<SentChunk>,
    file_controls: VecDeque<(FriendHandle, u32, FileControl)>,
    requests: VecDeque<(String, String)>,
    bootstrapped: VecDeque<(String, u16)>,
    iterations: u64,
    killed: bool,
}

impl MemoryState {
    fn new(public_key: PublicKey, nospam: u32) -> Self {
        Self {
            public_key,
            nospam,
            name: String::new(),
            status_message: String::new(),
            friends: BTreeMap::new(),
            next_handle: 0,
            next_file: 0,
            next_message: 0,
            sink: None,
            pending: VecDeque::new(),
            sent_messages: VecDeque::new(),
            sent_files: VecDeque::new(),
            sent_chunks: VecDeque::new(),
            file_controls: VecDeque::new(),
            requests: VecDeque::new(),
            bootstrapped: VecDeque::new(),
            iterations: 0,
            killed: false,
        }
    }

    fn insert_friend(&mut self, key: PublicKey) -> EngineResult<FriendHandle> {
        if key == self.public_key {
            return Err(EngineError::InvalidAddress("cannot add own key".into()));
        }
        if self.friends.values().any(|f| f.public_key == key) {
            return Err(EngineError::AlreadyFriend(key));
        }
        let handle = FriendHandle(self.next_handle);
        self.next_handle += 1;
        self.friends.insert(
            handle,
            FriendInfo {
                handle,
                public_key: key,
                name: String::new(),
                status_message: String::new(),
            },
        );
        Ok(handle)
    }

    fn require_friend(&self, friend: FriendHandle) -> EngineResult<&FriendInfo> {
        self.friends
            .get(&friend)
            .ok_or(EngineError::FriendNotFound(friend))
    }
}

/// Cloneable in-process engine. Clones share state.
#[derive(Clone)]
pub struct MemoryEngine {
    state: Arc<Mutex<MemoryState>>,
}

impl MemoryEngine {
    /// Create an engine with a freshly generated identity.
    pub fn generate() -> Self {
        let mut key = [0u8; PUBLIC_KEY_SIZE];
        key.iter_mut().for_each(|b| *b = fastrand::u8(..));
        Self::with_identity(PublicKey(key), fastrand::u32(..))
    }

    pub fn with_identity(public_key: PublicKey, nospam: u32) -> Self {
        Self {
            state: Arc::new(Mutex::new(MemoryState::new(public_key, nospam))),
        }
    }

    /// Restore an engine from bytes produced by `save_state`.
    pub fn from_state(data: &[u8]) -> EngineResult<Self> {
        let saved: SavedState =
            serde_json::from_slice(data).map_err(|e| EngineError::Restore(e.to_string()))?;

        let mut state = MemoryState::new(saved.public_key, saved.nospam);
        state.name = saved.name;
        state.status_message = saved.status_message;
        for friend in saved.friends {
            let handle = state.insert_friend(friend.public_key)?;
            if let Some(info) = state.friends.get_mut(&handle) {
                info.name = friend.name;
                info.status_message = friend.status_message;
            }
        }

        Ok(Self {
            state: Arc::new(Mutex::new(state)),
        })
    }

    /// Restore from `path` when it exists, otherwise generate a new identity.
    pub fn load_or_generate(path: &Path) -> EngineResult<Self> {
        match fs::read(path) {
            Ok(data) => {
                tracing::info!(path = %path.display(), bytes = data.len(), "Restoring engine state");
                Self::from_state(&data)
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::info!(path = %path.display(), "No saved engine state, generating identity");
                Ok(Self::generate())
            }
            Err(e) => Err(EngineError::Restore(format!("{}: {}", path.display(), e))),
        }
    }

    fn lock(&self) -> MutexGuard<'_, MemoryState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Queue an event; it is delivered on the next `iterate`.
    pub fn inject(&self, event: EngineEvent) {
        self.lock().pending.push_back(event);
    }

    /// Add a contact directly, as if restored from a previous session.
    pub fn seed_friend(&self, key: PublicKey, name: &str) -> EngineResult<FriendHandle> {
        let mut state = self.lock();
        let handle = state.insert_friend(key)?;
        if let Some(info) = state.friends.get_mut(&handle) {
            info.name = name.to_string();
        }
        Ok(handle)
    }

    pub fn self_name(&self) -> String {
        self.lock().name.clone()
    }

    pub fn self_status_message(&self) -> String {
        self.lock().status_message.clone()
    }

    pub fn sent_messages(&self) -> Vec<SentMessage> {
        self.lock().sent_messages.iter().cloned().collect()
    }

    pub fn sent_files(&self) -> Vec<SentFile> {
        self.lock().sent_files.iter().cloned().collect()
    }

    pub fn sent_chunks(&self) -> Vec<SentChunk> {
        self.lock().sent_chunks.iter().cloned().collect()
    }

    pub fn file_controls(&self) -> Vec<(FriendHandle, u32, FileControl)> {
        self.lock().file_controls.iter().cloned().collect()
    }

    pub fn friend_requests_sent(&self) -> Vec<(String, String)> {
        self.lock().requests.iter().cloned().collect()
    }

    pub fn bootstrapped_nodes(&self) -> Vec<(String, u16)> {
        self.lock().bootstrapped.iter().cloned().collect()
    }

    pub fn iterations(&self) -> u64 {
        self.lock().iterations
    }

    pub fn has_sink(&self) -> bool {
        self.lock().sink.is_some()
    }

    pub fn is_killed(&self) -> bool {
        self.lock().killed
    }
}

/// XOR of the address bytes folded into two bytes.
fn address_checksum(bytes: &[u8]) -> [u8; 2] {
    let mut checksum = [0u8; 2];
    for (i, b) in bytes.iter().enumerate() {
        checksum[i % 2] ^= b;
    }
    checksum
}

fn encode_address(key: &PublicKey, nospam: u32) -> String {
    let mut bytes = Vec::with_capacity(ADDRESS_HEX_LEN / 2);
    bytes.extend_from_slice(key.as_bytes());
    bytes.extend_from_slice(&nospam.to_be_bytes());
    let checksum = address_checksum(&bytes);
    bytes.extend_from_slice(&checksum);
    hex::encode_upper(bytes)
}

fn decode_address(address: &str) -> EngineResult<PublicKey> {
    if address.len() != ADDRESS_HEX_LEN {
        return Err(EngineError::InvalidAddress(format!(
            "expected {} hex characters, got {}",
            ADDRESS_HEX_LEN,
            address.len()
        )));
    }
    let bytes = hex::decode(address).map_err(|e| EngineError::InvalidAddress(e.to_string()))?;
    let (body, checksum) = bytes.split_at(bytes.len() - 2);
    if address_checksum(body) != checksum {
        return Err(EngineError::InvalidAddress("checksum mismatch".into()));
    }
    PublicKey::from_slice(&body[..PUBLIC_KEY_SIZE])
        .ok_or_else(|| EngineError::InvalidAddress("bad key".into()))
}

impl MessagingEngine for MemoryEngine {
    fn set_event_sink(&mut self, sink: Arc<dyn EventSink>) {
        self.lock().sink = Some(sink);
    }

    fn self_address(&self) -> String {
        let state = self.lock();
        encode_address(&state.public_key, state.nospam)
    }

    fn self_public_key(&self) -> PublicKey {
        self.lock().public_key
    }

    fn set_self_name(&mut self, name: &str) -> EngineResult<()> {
        if name.len() > MAX_PROFILE_LENGTH {
            return Err(EngineError::InvalidPayload(format!(
                "name longer than {MAX_PROFILE_LENGTH} bytes"
            )));
        }
        self.lock().name = name.to_string();
        Ok(())
    }

    fn set_self_status_message(&mut self, message: &str) -> EngineResult<()> {
        if message.len() > MAX_PROFILE_LENGTH {
            return Err(EngineError::InvalidPayload(format!(
                "status message longer than {MAX_PROFILE_LENGTH} bytes"
            )));
        }
        self.lock().status_message = message.to_string();
        Ok(())
    }

    fn send_message(
        &mut self,
        friend: FriendHandle,
        text: &str,
        kind: MessageKind,
    ) -> EngineResult<u32> {
        if text.is_empty() || text.len() > MAX_MESSAGE_LENGTH {
            return Err(EngineError::InvalidPayload(format!(
                "message length {} outside 1..={MAX_MESSAGE_LENGTH}",
                text.len()
            )));
        }
        let mut state = self.lock();
        state.require_friend(friend)?;
        state.next_message = state.next_message.wrapping_add(1);
        let id = state.next_message;
        record(
            &mut state.sent_messages,
            SentMessage {
                friend,
                text: text.to_string(),
                kind,
            },
        );
        Ok(id)
    }

    fn add_friend(&mut self, address: &str, message: &str) -> EngineResult<FriendHandle> {
        let key = decode_address(address)?;
        let mut state = self.lock();
        let handle = state.insert_friend(key)?;
        record(&mut state.requests, (address.to_string(), message.to_string()));
        Ok(handle)
    }

    fn add_friend_norequest(&mut self, key: &PublicKey) -> EngineResult<FriendHandle> {
        self.lock().insert_friend(*key)
    }

    fn delete_friend(&mut self, friend: FriendHandle) -> EngineResult<()> {
        self.lock()
            .friends
            .remove(&friend)
            .map(|_| ())
            .ok_or(EngineError::FriendNotFound(friend))
    }

    fn friends(&self) -> Vec<FriendInfo> {
        self.lock().friends.values().cloned().collect()
    }

    fn friend_public_key(&self, friend: FriendHandle) -> Option<PublicKey> {
        self.lock().friends.get(&friend).map(|f| f.public_key)
    }

    fn send_file(
        &mut self,
        friend: FriendHandle,
        _kind: u32,
        size: u64,
        file_id: FileId,
        filename: &str,
    ) -> EngineResult<u32> {
        let mut state = self.lock();
        state.require_friend(friend)?;
        let file_number = state.next_file;
        state.next_file += 1;
        record(
            &mut state.sent_files,
            SentFile {
                friend,
                file_number,
                size,
                file_id,
                filename: filename.to_string(),
            },
        );
        Ok(file_number)
    }

    fn file_control(
        &mut self,
        friend: FriendHandle,
        file_number: u32,
        control: FileControl,
    ) -> EngineResult<()> {
        let mut state = self.lock();
        state.require_friend(friend)?;
        record(&mut state.file_controls, (friend, file_number, control));
        Ok(())
    }

    fn file_send_chunk(
        &mut self,
        friend: FriendHandle,
        file_number: u32,
        position: u64,
        data: &[u8],
    ) -> EngineResult<()> {
        let mut state = self.lock();
        state.require_friend(friend)?;
        if file_number >= state.next_file {
            return Err(EngineError::TransferNotFound {
                friend,
                file_number,
            });
        }
        record(
            &mut state.sent_chunks,
            SentChunk {
                friend,
                file_number,
                position,
                data: data.to_vec(),
            },
        );
        Ok(())
    }

    fn save_state(&self) -> Vec<u8> {
        let state = self.lock();
        let saved = SavedState {
            public_key: state.public_key,
            nospam: state.nospam,
            name: state.name.clone(),
            status_message: state.status_message.clone(),
            friends: state
                .friends
                .values()
                .map(|f| SavedFriend {
                    public_key: f.public_key,
                    name: f.name.clone(),
                    status_message: f.status_message.clone(),
                })
                .collect(),
        };
        // Plain data with string keys always serializes.
        serde_json::to_vec_pretty(&saved).unwrap_or_default()
    }

    fn bootstrap(&mut self, address: &str, port: u16, _key: &PublicKey) -> EngineResult<()> {
        if address.trim().is_empty() || port == 0 {
            return Err(EngineError::Bootstrap {
                address: address.to_string(),
                port,
                reason: "address and port are required".into(),
            });
        }
        record(&mut self.lock().bootstrapped, (address.to_string(), port));
        Ok(())
    }

    fn iterate(&mut self) {
        let (sink, events) = {
            let mut state = self.lock();
            state.iterations += 1;
            let events: Vec<EngineEvent> = state.pending.drain(..).collect();
            (state.sink.clone(), events)
        };

        // Keep friend attributes in sync with what we report.
        for event in &events {
            let mut state = self.lock();
            match event {
                EngineEvent::FriendName { friend, name } => {
                    if let Some(info) = state.friends.get_mut(friend) {
                        info.name = name.clone();
                    }
                }
                EngineEvent::FriendStatusMessage { friend, message } => {
                    if let Some(info) = state.friends.get_mut(friend) {
                        info.status_message = message.clone();
                    }
                }
                _ => {}
            }
        }

        match sink {
            Some(sink) => events.into_iter().for_each(|event| sink.emit(event)),
            None if !events.is_empty() => {
                tracing::warn!(dropped = events.len(), "No event sink registered");
            }
            None => {}
        }
    }

    fn iteration_interval(&self) -> Duration {
        if self.lock().pending.is_empty() {
            IDLE_INTERVAL
        } else {
            BUSY_INTERVAL
        }
    }

    fn kill(&mut self) {
        let mut state = self.lock();
        state.killed = true;
        state.sink = None;
    }
}
