//! Engine events → registry updates and output pipe writes.

use std::time::SystemTime;

use crate::engine::{ConnectionKind, EngineEvent, FileControl, FriendHandle, MessageKind, PublicKey, UserStatus};
use crate::observability::metrics;
use crate::registry::Presence;
use crate::router::format;
use crate::router::transfers::{read_chunk, IncomingTransfer};
use crate::router::validation::sanitize_filename;
use crate::router::EventRouter;

impl EventRouter {
    /// Apply one engine event.
    pub fn handle_event(&mut self, event: EngineEvent) {
        tracing::trace!(event = event.name(), "Engine event");
        match event {
            EngineEvent::SelfConnectionStatus(connection) => {
                tracing::info!(connection = ?connection, "Self connection status changed");
            }
            EngineEvent::FriendRequest { public_key, message } => {
                self.on_friend_request(&public_key, &message);
            }
            EngineEvent::FriendMessage { friend, text, kind } => {
                self.on_friend_message(friend, &text, kind);
            }
            EngineEvent::FriendName { friend, name } => self.on_friend_name(friend, name),
            EngineEvent::FriendStatusMessage { friend, message } => {
                let updated = self.registry.update(friend, |f| f.status_message = message);
                if updated.is_none() {
                    tracing::debug!(friend = %friend, "Status message for unknown friend");
                }
            }
            EngineEvent::FriendStatus { friend, status } => self.on_friend_status(friend, status),
            EngineEvent::FriendConnectionStatus { friend, connection } => {
                self.on_friend_connection(friend, connection);
            }
            EngineEvent::FileControl {
                friend,
                file_number,
                control,
            } => self.on_file_control(friend, file_number, control),
            EngineEvent::FileChunkRequest {
                friend,
                file_number,
                position,
                length,
            } => self.on_chunk_request(friend, file_number, position, length),
            EngineEvent::FileReceive {
                friend,
                file_number,
                size,
                filename,
                ..
            } => self.on_file_receive(friend, file_number, size, &filename),
            EngineEvent::FileReceiveChunk {
                friend,
                file_number,
                position,
                data,
            } => self.on_file_chunk(friend, file_number, position, &data),
        }
    }

    fn on_friend_request(&self, key: &PublicKey, message: &str) {
        tracing::info!(key = %key, "Friend request received");
        self.gateway.write_request_out(&format::request_line(key, message));
    }

    fn on_friend_message(&self, handle: FriendHandle, text: &str, kind: MessageKind) {
        let Some(friend) = self.registry.update(handle, |f| f.last_seen = SystemTime::now()) else {
            tracing::warn!(friend = %handle, "Message from unknown friend, dropping");
            return;
        };

        metrics::record_message("in");
        let line = format::message_line_now(&friend.display_name(), text, kind);
        self.gateway.write_text_out(&friend.public_key, &line);
        tracing::debug!(friend = %handle, kind = ?kind, "Message delivered to text_out");
    }

    fn on_friend_name(&self, handle: FriendHandle, name: String) {
        if self.ensure_friend(handle).is_none() {
            return;
        }
        tracing::info!(friend = %handle, name = %name, "Friend changed name");
        self.registry.update(handle, |f| f.name = name);
    }

    fn set_presence(&self, handle: FriendHandle, presence: Presence) {
        let mut previous = None;
        let Some(friend) = self.registry.update(handle, |f| {
            previous = Some(f.presence);
            f.presence = presence;
        }) else {
            tracing::debug!(friend = %handle, "Presence for unknown friend");
            return;
        };

        if previous != Some(presence) {
            tracing::info!(friend = %handle, status = %presence, "Friend status changed");
            self.gateway.write_status(&friend.public_key, presence.as_str());
        }
    }

    fn on_friend_status(&self, handle: FriendHandle, status: UserStatus) {
        let Some(friend) = self.registry.update(handle, |f| f.status = status) else {
            tracing::debug!(friend = %handle, "Status for unknown friend");
            return;
        };
        // Applied on connect when the peer is not connected yet.
        if friend.connection.is_connected() {
            self.set_presence(handle, Presence::from(status));
        }
    }

    fn on_friend_connection(&mut self, handle: FriendHandle, connection: ConnectionKind) {
        let Some(friend) = self.registry.update(handle, |f| {
            f.connection = connection;
            if connection.is_connected() {
                f.last_seen = SystemTime::now();
            }
        }) else {
            tracing::debug!(friend = %handle, "Connection status for unknown friend");
            return;
        };

        match (connection.is_connected(), friend.presence) {
            (false, _) => {
                self.set_presence(handle, Presence::Offline);
                self.transfers.forget_friend(handle);
            }
            (true, Presence::Offline) => self.set_presence(handle, Presence::from(friend.status)),
            (true, _) => {}
        }
    }

    fn on_file_control(&mut self, friend: FriendHandle, file_number: u32, control: FileControl) {
        match control {
            FileControl::Cancel => {
                if self.transfers.cancel(friend, file_number) {
                    metrics::record_file_transfer("cancelled");
                    tracing::info!(friend = %friend, file_number, "File transfer cancelled");
                }
            }
            other => {
                tracing::info!(friend = %friend, file_number, control = ?other, "File transfer control");
            }
        }
    }

    fn on_chunk_request(&mut self, friend: FriendHandle, file_number: u32, position: u64, length: usize) {
        if length == 0 {
            if let Some(done) = self.transfers.finish_outgoing(friend, file_number) {
                metrics::record_file_transfer("sent");
                tracing::info!(friend = %friend, file = %done.filename, "File transfer complete");
            }
            return;
        }

        let Some(path) = self
            .transfers
            .outgoing(friend, file_number)
            .map(|t| t.path.clone())
        else {
            tracing::warn!(friend = %friend, file_number, "Chunk request for unknown transfer");
            return;
        };

        let data = match read_chunk(&path, position, length) {
            Ok(data) => data,
            Err(e) => {
                tracing::warn!(path = %path.display(), error = %e, "Failed to read file chunk");
                let _ = self
                    .engine
                    .call(|eng| eng.file_control(friend, file_number, FileControl::Cancel));
                self.transfers.cancel(friend, file_number);
                return;
            }
        };

        if let Err(e) = self
            .engine
            .call(|eng| eng.file_send_chunk(friend, file_number, position, &data))
        {
            tracing::warn!(friend = %friend, file_number, error = %e, "Failed to send file chunk");
        }
    }

    fn on_file_receive(&mut self, handle: FriendHandle, file_number: u32, size: u64, filename: &str) {
        let Some(friend) = self.registry.by_handle(handle) else {
            tracing::warn!(friend = %handle, "File offer from unknown friend");
            return;
        };
        let config = self.config.load();
        tracing::info!(friend = %handle, file = %filename, size, "File offered");

        if size > config.max_file_size {
            tracing::warn!(size, limit = config.max_file_size, "File too large, rejecting");
            metrics::record_file_transfer("rejected");
            if let Err(e) = self
                .engine
                .call(|eng| eng.file_control(handle, file_number, FileControl::Cancel))
            {
                tracing::warn!(error = %e, "Failed to reject file");
            }
            return;
        }

        self.gateway
            .write_file_out(&friend.public_key, &format::file_offer_line(filename, size));

        if !config.auto_accept_files {
            return;
        }

        let dir = self.gateway.layout().received_dir(&friend.public_key);
        let destination = dir.join(sanitize_filename(filename));
        let transfer = crate::fifo::pipe::create_private_dir(&dir, crate::fifo::layout::DIR_MODE)
            .and_then(|_| IncomingTransfer::create(filename.to_string(), destination.clone(), size));
        let transfer = match transfer {
            Ok(transfer) => transfer,
            Err(e) => {
                tracing::warn!(path = %destination.display(), error = %e, "Cannot store incoming file");
                return;
            }
        };

        match self
            .engine
            .call(|eng| eng.file_control(handle, file_number, FileControl::Resume))
        {
            Ok(()) => {
                self.transfers.add_incoming(handle, file_number, transfer);
                metrics::record_file_transfer("accepted");
                tracing::info!(file = %filename, path = %destination.display(), "Auto-accepted file transfer");
            }
            Err(e) => tracing::warn!(error = %e, "Failed to accept file"),
        }
    }

    fn on_file_chunk(&mut self, handle: FriendHandle, file_number: u32, position: u64, data: &[u8]) {
        if data.is_empty() {
            let Some(transfer) = self.transfers.finish_incoming(handle, file_number) else {
                return;
            };
            let filename = transfer.filename.clone();
            match transfer.finish() {
                Ok(path) => {
                    metrics::record_file_transfer("received");
                    tracing::info!(path = %path.display(), "File received");
                    if let Some(friend) = self.registry.by_handle(handle) {
                        self.gateway
                            .write_file_out(&friend.public_key, &format::file_done_line(&filename));
                    }
                }
                Err(e) => tracing::warn!(file = %filename, error = %e, "Failed to finish file"),
            }
            return;
        }

        let Some(transfer) = self.transfers.incoming_mut(handle, file_number) else {
            tracing::debug!(friend = %handle, file_number, "Chunk for unknown transfer");
            return;
        };
        if let Err(e) = transfer.write_chunk(position, data) {
            tracing::warn!(path = %transfer.destination.display(), error = %e, "Failed to write file chunk");
            self.transfers.cancel(handle, file_number);
            let _ = self
                .engine
                .call(|eng| eng.file_control(handle, file_number, FileControl::Cancel));
        }
    }
}
