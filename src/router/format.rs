//! Output line formatting.

use chrono::{Local, NaiveTime};

use crate::engine::{MessageKind, PublicKey};

/// Marker that turns an outgoing line into an action message.
pub const ACTION_PREFIX: &str = "/me ";

/// Format a received message as written to `text_out`.
///
/// `[HH:MM:SS] <name> text` for normal messages,
/// `[HH:MM:SS] * name text` for actions. A leading `/me ` on an action's text
/// is dropped so it is not shown twice.
pub fn message_line(at: NaiveTime, name: &str, text: &str, kind: MessageKind) -> String {
    let stamp = at.format("%H:%M:%S");
    match kind {
        MessageKind::Normal => format!("[{}] <{}> {}", stamp, name, text),
        MessageKind::Action => {
            let text = text.strip_prefix(ACTION_PREFIX).unwrap_or(text);
            format!("[{}] * {} {}", stamp, name, text)
        }
    }
}

/// `message_line` stamped with the current local time.
pub fn message_line_now(name: &str, text: &str, kind: MessageKind) -> String {
    message_line(Local::now().time(), name, text, kind)
}

/// Line written to `request_out` for an incoming contact request.
pub fn request_line(key: &PublicKey, message: &str) -> String {
    format!("{} {}", key.to_hex(), message)
}

/// Line written to `file_out` for an incoming offer.
pub fn file_offer_line(filename: &str, size: u64) -> String {
    format!("{} {}", filename, size)
}

/// Line written to `file_out` once an accepted file is complete.
pub fn file_done_line(filename: &str) -> String {
    format!("{} done", filename)
}
