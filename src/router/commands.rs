//! Input pipe lines → engine calls.

use crate::engine::{FriendHandle, PublicKey};
use crate::fifo::{InputLine, InputSource};
use crate::observability::metrics;
use crate::registry::Friend;
use crate::router::transfers::OutgoingTransfer;
use crate::router::validation::{self, InputError};
use crate::router::EventRouter;

/// Engine file kind for ordinary data transfers.
const FILE_KIND_DATA: u32 = 0;

fn reject(source: &InputSource, error: &InputError) {
    metrics::record_input_rejected(error.reason());
    tracing::warn!(source = ?source, error = %error, "Discarding input line");
}

impl EventRouter {
    /// Apply one line read from an input pipe.
    pub fn handle_input(&mut self, input: InputLine) {
        let InputLine { source, line } = input;
        match source {
            InputSource::RequestIn => self.accept_request(&source, &line),
            InputSource::Name => self.set_name(&source, &line),
            InputSource::StatusMessage => self.set_status_message(line.trim()),
            InputSource::TextIn(key) => self.send_text(&source, &key, &line),
            InputSource::FileIn(key) => self.send_file(&source, &key, &line),
        }
    }

    fn accept_request(&self, source: &InputSource, line: &str) {
        let key = match validation::parse_request_key(line) {
            Ok(key) => key,
            Err(e) => return reject(source, &e),
        };

        if let Some(existing) = self.registry.by_key(&key) {
            tracing::info!(key = %key, friend = %existing.handle, "Already a friend");
            return;
        }

        let handle = match self.engine.call(|e| e.add_friend_norequest(&key)) {
            Ok(handle) => handle,
            Err(e) => {
                tracing::warn!(key = %key, error = %e, "Failed to accept friend request");
                return;
            }
        };

        let friend = Friend::new(handle, key);
        self.registry.upsert(friend.clone());
        metrics::record_friend_count(self.registry.len());
        self.create_friend_dir(&friend);
        self.flush_state();
        tracing::info!(key = %key, friend = %handle, "Friend request accepted");
    }

    fn set_name(&self, source: &InputSource, line: &str) {
        let name = match validation::parse_name(line) {
            Ok(name) => name,
            Err(e) => return reject(source, &e),
        };

        // Engine and config change under the store's write lock.
        let mut applied = Ok(());
        let saved = self.config.update(|c| {
            applied = self.engine.call(|eng| eng.set_self_name(name));
            if applied.is_ok() {
                c.name = name.to_string();
            }
        });
        if let Err(e) = applied {
            tracing::warn!(error = %e, "Failed to update name");
            return;
        }
        if let Err(e) = saved {
            tracing::warn!(error = %e, "Failed to save name to config");
        }
        tracing::info!(name = %name, "Name updated");
    }

    fn set_status_message(&self, message: &str) {
        let mut applied = Ok(());
        let saved = self.config.update(|c| {
            applied = self.engine.call(|eng| eng.set_self_status_message(message));
            if applied.is_ok() {
                c.status_message = message.to_string();
            }
        });
        if let Err(e) = applied {
            tracing::warn!(error = %e, "Failed to update status message");
            return;
        }
        if let Err(e) = saved {
            tracing::warn!(error = %e, "Failed to save status message to config");
        }
        tracing::info!(status_message = %message, "Status message updated");
    }

    fn resolve(&self, key: &PublicKey) -> Option<FriendHandle> {
        let handle = self.registry.by_key(key).map(|f| f.handle);
        if handle.is_none() {
            tracing::warn!(key = %key, "Friend not found, discarding input");
        }
        handle
    }

    fn send_text(&self, source: &InputSource, key: &PublicKey, line: &str) {
        let Some(handle) = self.resolve(key) else {
            return;
        };

        let limit = self.config.load().max_message_len;
        let (text, kind) = match validation::parse_message(line, limit) {
            Ok(parsed) => parsed,
            Err(e) => return reject(source, &e),
        };

        match self.engine.call(|eng| eng.send_message(handle, text, kind)) {
            Ok(_) => {
                metrics::record_message("out");
                tracing::debug!(friend = %handle, kind = ?kind, bytes = text.len(), "Message sent");
            }
            Err(e) => tracing::warn!(friend = %handle, error = %e, "Failed to send message"),
        }
    }

    fn send_file(&mut self, source: &InputSource, key: &PublicKey, line: &str) {
        let Some(handle) = self.resolve(key) else {
            return;
        };

        let limit = self.config.load().max_file_size;
        let offer = match validation::validate_file(line, limit) {
            Ok(offer) => offer,
            Err(e) => return reject(source, &e),
        };

        let sent = self.engine.call(|eng| {
            eng.send_file(handle, FILE_KIND_DATA, offer.size, offer.file_id, &offer.filename)
        });
        match sent {
            Ok(file_number) => {
                metrics::record_file_transfer("offered");
                tracing::info!(
                    friend = %handle,
                    file = %offer.filename,
                    size = offer.size,
                    file_number,
                    "File transfer initiated"
                );
                self.transfers.add_outgoing(
                    handle,
                    file_number,
                    OutgoingTransfer {
                        path: offer.path,
                        filename: offer.filename,
                        size: offer.size,
                    },
                );
            }
            Err(e) => tracing::warn!(friend = %handle, error = %e, "Failed to initiate file transfer"),
        }
    }
}
