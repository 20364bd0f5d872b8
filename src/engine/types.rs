//! Value types shared between the engine and the gateway.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Deserializer, Serialize, Serializer};

/// Size of a peer public key in bytes.
pub const PUBLIC_KEY_SIZE: usize = 32;

/// Hex length of a bare public key.
pub const PUBLIC_KEY_HEX_LEN: usize = PUBLIC_KEY_SIZE * 2;

/// Hex length of a full address: key, 4-byte nospam, 2-byte checksum.
pub const ADDRESS_HEX_LEN: usize = PUBLIC_KEY_HEX_LEN + 12;

/// Process-local friend number assigned by the engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct FriendHandle(pub u32);

impl fmt::Display for FriendHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<u32> for FriendHandle {
    fn from(n: u32) -> Self {
        Self(n)
    }
}

/// Fixed 32-byte peer identifier.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PublicKey(pub [u8; PUBLIC_KEY_SIZE]);

impl PublicKey {
    pub fn from_bytes(bytes: [u8; PUBLIC_KEY_SIZE]) -> Self {
        Self(bytes)
    }

    /// Build a key from a decoded slice. Only an exact 32-byte slice is a key.
    pub fn from_slice(bytes: &[u8]) -> Option<Self> {
        let array: [u8; PUBLIC_KEY_SIZE] = bytes.try_into().ok()?;
        Some(Self(array))
    }

    pub fn as_bytes(&self) -> &[u8; PUBLIC_KEY_SIZE] {
        &self.0
    }

    /// Lowercase hex, as used for friend directory names.
    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }

    pub fn is_zero(&self) -> bool {
        self.0 == [0u8; PUBLIC_KEY_SIZE]
    }
}

impl fmt::Display for PublicKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

impl fmt::Debug for PublicKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "PublicKey({})", &self.to_hex()[..16])
    }
}

/// Error returned when a string is not a 64-character hex key.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("expected 64 hex characters")]
pub struct ParseKeyError;

impl FromStr for PublicKey {
    type Err = ParseKeyError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.len() != PUBLIC_KEY_HEX_LEN {
            return Err(ParseKeyError);
        }
        let bytes = hex::decode(s).map_err(|_| ParseKeyError)?;
        Self::from_slice(&bytes).ok_or(ParseKeyError)
    }
}

impl Serialize for PublicKey {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_hex())
    }
}

impl<'de> Deserialize<'de> for PublicKey {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

/// Kind of a text message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MessageKind {
    Normal,
    /// A `/me` style action.
    Action,
}

/// Self-reported availability of a peer while connected.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum UserStatus {
    None,
    Away,
    Busy,
}

/// How a peer (or we) are connected to the network.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum ConnectionKind {
    #[default]
    None,
    Tcp,
    Udp,
}

impl ConnectionKind {
    pub fn is_connected(self) -> bool {
        self != ConnectionKind::None
    }
}

/// Control codes for file transfers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FileControl {
    Resume,
    Pause,
    Cancel,
}

/// 32-byte transfer identifier.
pub type FileId = [u8; 32];

/// Contact attributes enumerated from the engine.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FriendInfo {
    pub handle: FriendHandle,
    pub public_key: PublicKey,
    pub name: String,
    pub status_message: String,
}
