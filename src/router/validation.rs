//! Validation of lines read from input pipes.
//!
//! Every function here is pure apart from `validate_file`, which stats the
//! path. A rejected line is logged by the caller and never reaches the engine.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use sha2::{Digest, Sha256};
use thiserror::Error;

use crate::engine::{FileId, MessageKind, PublicKey, ADDRESS_HEX_LEN, PUBLIC_KEY_HEX_LEN};
use crate::router::format::ACTION_PREFIX;

/// Why an input line was rejected.
#[derive(Debug, Error)]
pub enum InputError {
    #[error("expected 64 or 76 hex characters, got {0}")]
    KeyLength(usize),

    #[error("key contains non-hex characters")]
    KeyNotHex,

    #[error("name must not be empty")]
    EmptyName,

    #[error("message is empty")]
    EmptyMessage,

    #[error("message is {len} bytes, limit is {limit}")]
    MessageTooLong { len: usize, limit: usize },

    #[error("cannot access {path}: {source}")]
    FileUnreadable { path: PathBuf, source: io::Error },

    #[error("{0} is not a regular file")]
    NotAFile(PathBuf),

    #[error("{path} is {size} bytes, limit is {limit}")]
    FileTooLarge { path: PathBuf, size: u64, limit: u64 },
}

impl InputError {
    /// Short label used as a metric dimension.
    pub fn reason(&self) -> &'static str {
        match self {
            InputError::KeyLength(_) | InputError::KeyNotHex => "bad_key",
            InputError::EmptyName => "empty_name",
            InputError::EmptyMessage => "empty_message",
            InputError::MessageTooLong { .. } => "too_long",
            InputError::FileUnreadable { .. } | InputError::NotAFile(_) => "bad_file",
            InputError::FileTooLarge { .. } => "file_too_large",
        }
    }
}

/// Parse a `request_in` line: a bare key or a full address.
///
/// Only the first 64 characters of an address are the key; the nospam and
/// checksum are ignored, but still must be hex.
pub fn parse_request_key(line: &str) -> Result<PublicKey, InputError> {
    let line = line.trim();
    if line.len() != PUBLIC_KEY_HEX_LEN && line.len() != ADDRESS_HEX_LEN {
        return Err(InputError::KeyLength(line.chars().count()));
    }
    if !line.bytes().all(|b| b.is_ascii_hexdigit()) {
        return Err(InputError::KeyNotHex);
    }
    line[..PUBLIC_KEY_HEX_LEN]
        .parse()
        .map_err(|_| InputError::KeyNotHex)
}

/// Trim and require a non-empty display name.
pub fn parse_name(line: &str) -> Result<&str, InputError> {
    let name = line.trim();
    if name.is_empty() {
        return Err(InputError::EmptyName);
    }
    Ok(name)
}

/// Split an outgoing line into the text to transmit and its kind.
///
/// The limit applies to the UTF-8 byte length of the transmitted text.
pub fn parse_message(line: &str, limit: usize) -> Result<(&str, MessageKind), InputError> {
    let (text, kind) = match line.strip_prefix(ACTION_PREFIX) {
        Some(rest) => (rest, MessageKind::Action),
        None => (line, MessageKind::Normal),
    };
    if text.is_empty() {
        return Err(InputError::EmptyMessage);
    }
    if text.len() > limit {
        return Err(InputError::MessageTooLong {
            len: text.len(),
            limit,
        });
    }
    Ok((text, kind))
}

/// A file accepted for sending.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileOffer {
    pub path: PathBuf,
    pub filename: String,
    pub size: u64,
    pub file_id: FileId,
}

/// Check that `line` names an existing regular file within `limit` bytes.
pub fn validate_file(line: &str, limit: u64) -> Result<FileOffer, InputError> {
    let path = PathBuf::from(line.trim());
    let metadata = fs::metadata(&path).map_err(|source| InputError::FileUnreadable {
        path: path.clone(),
        source,
    })?;
    if !metadata.is_file() {
        return Err(InputError::NotAFile(path));
    }
    if metadata.len() > limit {
        return Err(InputError::FileTooLarge {
            path,
            size: metadata.len(),
            limit,
        });
    }

    let filename = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| line.trim().to_string());
    Ok(FileOffer {
        file_id: transfer_file_id(&path),
        filename,
        size: metadata.len(),
        path,
    })
}

/// Deterministic transfer id: SHA-256 of the path as given.
pub fn transfer_file_id(path: &Path) -> FileId {
    let mut hasher = Sha256::new();
    hasher.update(path.as_os_str().as_encoded_bytes());
    hasher.finalize().into()
}

/// Reduce a peer-supplied file name to a single safe path component.
pub fn sanitize_filename(name: &str) -> String {
    let base = name.rsplit(['/', '\\']).next().unwrap_or("");
    let cleaned: String = base
        .chars()
        .map(|c| if c.is_control() { '_' } else { c })
        .collect();
    let cleaned = cleaned.trim();
    if cleaned.is_empty() || cleaned == "." || cleaned == ".." {
        "unnamed".to_string()
    } else {
        cleaned.to_string()
    }
}
