//! Filesystem layout of the pipe tree.
//!
//! ```text
//! <root>/client/{request_in, request_out, name, status_message, id,
//!                config.toml, ratox.state}
//! <root>/<peer-key-hex>/{text_in, text_out, file_in, file_out, status,
//!                        received/}
//! ```

use std::path::{Path, PathBuf};

use crate::engine::PublicKey;
use crate::fifo::descriptor::Direction;

/// Owner-only directory permissions.
pub const DIR_MODE: u32 = 0o700;

/// Owner read/write permissions for pipes and files.
pub const FILE_MODE: u32 = 0o600;

pub const CLIENT_DIR: &str = "client";
pub const ID_FILE: &str = "id";
pub const CONFIG_FILE: &str = "config.toml";
pub const STATE_FILE: &str = "ratox.state";
pub const RECEIVED_DIR: &str = "received";

/// Pipes in the global `client/` directory.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum GlobalFifo {
    /// Accept a contact request by key.
    RequestIn,
    /// Incoming contact requests.
    RequestOut,
    /// Set our display name.
    Name,
    /// Set our status message.
    StatusMessage,
}

impl GlobalFifo {
    pub const ALL: [GlobalFifo; 4] = [
        GlobalFifo::RequestIn,
        GlobalFifo::RequestOut,
        GlobalFifo::Name,
        GlobalFifo::StatusMessage,
    ];

    pub fn file_name(self) -> &'static str {
        match self {
            GlobalFifo::RequestIn => "request_in",
            GlobalFifo::RequestOut => "request_out",
            GlobalFifo::Name => "name",
            GlobalFifo::StatusMessage => "status_message",
        }
    }

    pub fn direction(self) -> Direction {
        match self {
            GlobalFifo::RequestOut => Direction::Output,
            _ => Direction::Input,
        }
    }
}

/// Pipes in each friend directory.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FriendFifo {
    TextIn,
    TextOut,
    FileIn,
    FileOut,
    Status,
}

impl FriendFifo {
    pub const ALL: [FriendFifo; 5] = [
        FriendFifo::TextIn,
        FriendFifo::TextOut,
        FriendFifo::FileIn,
        FriendFifo::FileOut,
        FriendFifo::Status,
    ];

    pub fn file_name(self) -> &'static str {
        match self {
            FriendFifo::TextIn => "text_in",
            FriendFifo::TextOut => "text_out",
            FriendFifo::FileIn => "file_in",
            FriendFifo::FileOut => "file_out",
            FriendFifo::Status => "status",
        }
    }

    pub fn direction(self) -> Direction {
        match self {
            FriendFifo::TextIn | FriendFifo::FileIn => Direction::Input,
            _ => Direction::Output,
        }
    }
}

/// Derives every path in the tree from the root directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FifoLayout {
    root: PathBuf,
}

impl FifoLayout {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn client_dir(&self) -> PathBuf {
        self.root.join(CLIENT_DIR)
    }

    pub fn global(&self, fifo: GlobalFifo) -> PathBuf {
        self.client_dir().join(fifo.file_name())
    }

    pub fn id_file(&self) -> PathBuf {
        self.client_dir().join(ID_FILE)
    }

    pub fn config_file(&self) -> PathBuf {
        self.client_dir().join(CONFIG_FILE)
    }

    pub fn state_file(&self) -> PathBuf {
        self.client_dir().join(STATE_FILE)
    }

    pub fn friend_dir(&self, key: &PublicKey) -> PathBuf {
        self.root.join(key.to_hex())
    }

    pub fn friend(&self, key: &PublicKey, fifo: FriendFifo) -> PathBuf {
        self.friend_dir(key).join(fifo.file_name())
    }

    /// Where accepted incoming files are written.
    pub fn received_dir(&self, key: &PublicKey) -> PathBuf {
        self.friend_dir(key).join(RECEIVED_DIR)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_paths_are_derived_from_root() {
        let layout = FifoLayout::new("/tmp/ratox");
        let key = PublicKey([0x0f; 32]);

        assert_eq!(
            layout.global(GlobalFifo::RequestIn),
            PathBuf::from("/tmp/ratox/client/request_in")
        );
        assert_eq!(
            layout.friend(&key, FriendFifo::TextOut),
            PathBuf::from(format!("/tmp/ratox/{}/text_out", "0f".repeat(32)))
        );
        assert_eq!(layout.state_file(), PathBuf::from("/tmp/ratox/client/ratox.state"));
    }

    #[test]
    fn test_directions() {
        let inputs: Vec<_> = FriendFifo::ALL
            .iter()
            .filter(|f| f.direction() == Direction::Input)
            .collect();
        assert_eq!(inputs, vec![&FriendFifo::TextIn, &FriendFifo::FileIn]);
        assert_eq!(GlobalFifo::RequestOut.direction(), Direction::Output);
        assert_eq!(GlobalFifo::Name.direction(), Direction::Input);
    }
}
