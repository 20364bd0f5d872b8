//! Engine callback events and the sink they are delivered to.

use tokio::sync::mpsc;

use crate::engine::types::{
    ConnectionKind, FileControl, FriendHandle, MessageKind, PublicKey, UserStatus,
};

/// A callback raised by the engine, usually from inside `iterate`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EngineEvent {
    /// Our own network connection changed.
    SelfConnectionStatus(ConnectionKind),

    /// A peer asked to be added.
    FriendRequest { public_key: PublicKey, message: String },

    FriendMessage {
        friend: FriendHandle,
        text: String,
        kind: MessageKind,
    },

    FriendName { friend: FriendHandle, name: String },

    FriendStatusMessage { friend: FriendHandle, message: String },

    /// Presence while connected (none/away/busy).
    FriendStatus { friend: FriendHandle, status: UserStatus },

    FriendConnectionStatus {
        friend: FriendHandle,
        connection: ConnectionKind,
    },

    FileControl {
        friend: FriendHandle,
        file_number: u32,
        control: FileControl,
    },

    /// The peer wants the next chunk of an outgoing transfer.
    /// A zero `length` marks the transfer as complete.
    FileChunkRequest {
        friend: FriendHandle,
        file_number: u32,
        position: u64,
        length: usize,
    },

    /// The peer offers us a file.
    FileReceive {
        friend: FriendHandle,
        file_number: u32,
        kind: u32,
        size: u64,
        filename: String,
    },

    /// A chunk of an incoming transfer. Empty `data` marks completion.
    FileReceiveChunk {
        friend: FriendHandle,
        file_number: u32,
        position: u64,
        data: Vec<u8>,
    },
}

impl EngineEvent {
    /// Short name used in logs and metrics.
    pub fn name(&self) -> &'static str {
        match self {
            EngineEvent::SelfConnectionStatus(_) => "self_connection_status",
            EngineEvent::FriendRequest { .. } => "friend_request",
            EngineEvent::FriendMessage { .. } => "friend_message",
            EngineEvent::FriendName { .. } => "friend_name",
            EngineEvent::FriendStatusMessage { .. } => "friend_status_message",
            EngineEvent::FriendStatus { .. } => "friend_status",
            EngineEvent::FriendConnectionStatus { .. } => "friend_connection_status",
            EngineEvent::FileControl { .. } => "file_control",
            EngineEvent::FileChunkRequest { .. } => "file_chunk_request",
            EngineEvent::FileReceive { .. } => "file_receive",
            EngineEvent::FileReceiveChunk { .. } => "file_receive_chunk",
        }
    }
}

/// Receiver of engine callbacks.
///
/// Implementations run on engine-owned scheduling and must return quickly.
pub trait EventSink: Send + Sync {
    fn emit(&self, event: EngineEvent);
}

/// Sink that forwards every event onto an unbounded channel.
#[derive(Debug, Clone)]
pub struct ChannelSink {
    tx: mpsc::UnboundedSender<EngineEvent>,
}

impl ChannelSink {
    pub fn new(tx: mpsc::UnboundedSender<EngineEvent>) -> Self {
        Self { tx }
    }

    /// Create a sink together with the receiving end.
    pub fn channel() -> (Self, mpsc::UnboundedReceiver<EngineEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }
}

impl EventSink for ChannelSink {
    fn emit(&self, event: EngineEvent) {
        let name = event.name();
        if self.tx.send(event).is_err() {
            tracing::debug!(event = name, "Event router gone, dropping engine event");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_channel_sink_forwards_in_order() {
        let (sink, mut rx) = ChannelSink::channel();
        sink.emit(EngineEvent::SelfConnectionStatus(ConnectionKind::Udp));
        sink.emit(EngineEvent::FriendName {
            friend: FriendHandle(1),
            name: "Bob".into(),
        });

        assert_eq!(
            rx.try_recv().unwrap(),
            EngineEvent::SelfConnectionStatus(ConnectionKind::Udp)
        );
        assert_eq!(rx.try_recv().unwrap().name(), "friend_name");
    }

    #[test]
    fn test_emit_after_receiver_dropped_is_silent() {
        let (sink, rx) = ChannelSink::channel();
        drop(rx);
        sink.emit(EngineEvent::SelfConnectionStatus(ConnectionKind::None));
    }
}
