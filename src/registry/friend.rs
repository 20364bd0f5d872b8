//! Friend record.

use std::fmt;
use std::time::SystemTime;

use crate::engine::{ConnectionKind, FriendHandle, PublicKey, UserStatus};

/// Coarse availability of a peer as written to its `status` pipe.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Presence {
    #[default]
    Offline,
    Online,
    Away,
    Busy,
}

impl Presence {
    pub fn as_str(self) -> &'static str {
        match self {
            Presence::Offline => "offline",
            Presence::Online => "online",
            Presence::Away => "away",
            Presence::Busy => "busy",
        }
    }
}

impl From<UserStatus> for Presence {
    fn from(status: UserStatus) -> Self {
        match status {
            UserStatus::None => Presence::Online,
            UserStatus::Away => Presence::Away,
            UserStatus::Busy => Presence::Busy,
        }
    }
}

impl fmt::Display for Presence {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A known peer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Friend {
    pub handle: FriendHandle,
    pub public_key: PublicKey,
    pub name: String,
    pub status_message: String,
    pub presence: Presence,
    /// Last availability the peer reported, kept across disconnects.
    pub status: UserStatus,
    pub connection: ConnectionKind,
    pub last_seen: SystemTime,
}

impl Friend {
    /// A freshly known peer: offline, unnamed, seen now.
    pub fn new(handle: FriendHandle, public_key: PublicKey) -> Self {
        Self {
            handle,
            public_key,
            name: String::new(),
            status_message: String::new(),
            presence: Presence::Offline,
            status: UserStatus::None,
            connection: ConnectionKind::None,
            last_seen: SystemTime::now(),
        }
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    /// Name to show in message lines; falls back to a key prefix.
    pub fn display_name(&self) -> String {
        if self.name.is_empty() {
            self.public_key.to_hex()[..8].to_string()
        } else {
            self.name.clone()
        }
    }

    /// Directory name under the root: lowercase hex of the key.
    pub fn dir_name(&self) -> String {
        self.public_key.to_hex()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_presence_mapping() {
        assert_eq!(Presence::from(UserStatus::None).as_str(), "online");
        assert_eq!(Presence::from(UserStatus::Away).as_str(), "away");
        assert_eq!(Presence::from(UserStatus::Busy).as_str(), "busy");
        assert_eq!(Presence::default().to_string(), "offline");
    }

    #[test]
    fn test_display_name_fallback() {
        let friend = Friend::new(FriendHandle(0), PublicKey([0xab; 32]));
        assert_eq!(friend.display_name(), "abababab");
        assert_eq!(friend.with_name("Bob").display_name(), "Bob");
    }
}
