//! File transfer bookkeeping.
//!
//! Only the router task touches these tables, so they are plain maps.

use std::collections::HashMap;
use std::fs::{File, OpenOptions};
use std::io::{self, Read, Seek, SeekFrom, Write};
use std::os::unix::fs::OpenOptionsExt;
use std::path::{Path, PathBuf};

use crate::engine::FriendHandle;
use crate::fifo::layout::FILE_MODE;

type TransferKey = (FriendHandle, u32);

/// A file we are sending.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutgoingTransfer {
    pub path: PathBuf,
    pub filename: String,
    pub size: u64,
}

/// A file we accepted and are writing to disk.
#[derive(Debug)]
pub struct IncomingTransfer {
    pub filename: String,
    pub destination: PathBuf,
    pub size: u64,
    pub received: u64,
    file: File,
}

impl IncomingTransfer {
    /// Create the destination file, truncating a previous one.
    pub fn create(filename: String, destination: PathBuf, size: u64) -> io::Result<Self> {
        let file = OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(true)
            .mode(FILE_MODE)
            .open(&destination)?;
        Ok(Self {
            filename,
            destination,
            size,
            received: 0,
            file,
        })
    }

    pub fn write_chunk(&mut self, position: u64, data: &[u8]) -> io::Result<()> {
        self.file.seek(SeekFrom::Start(position))?;
        self.file.write_all(data)?;
        self.received += data.len() as u64;
        Ok(())
    }

    pub fn finish(self) -> io::Result<PathBuf> {
        self.file.sync_all()?;
        Ok(self.destination)
    }
}

/// Read up to `length` bytes of `path` starting at `position`.
pub fn read_chunk(path: &Path, position: u64, length: usize) -> io::Result<Vec<u8>> {
    let mut file = File::open(path)?;
    file.seek(SeekFrom::Start(position))?;
    let mut data = Vec::with_capacity(length);
    file.take(length as u64).read_to_end(&mut data)?;
    Ok(data)
}

#[derive(Debug, Default)]
pub struct Transfers {
    outgoing: HashMap<TransferKey, OutgoingTransfer>,
    incoming: HashMap<TransferKey, IncomingTransfer>,
}

impl Transfers {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_outgoing(&mut self, friend: FriendHandle, file_number: u32, transfer: OutgoingTransfer) {
        self.outgoing.insert((friend, file_number), transfer);
    }

    pub fn outgoing(&self, friend: FriendHandle, file_number: u32) -> Option<&OutgoingTransfer> {
        self.outgoing.get(&(friend, file_number))
    }

    pub fn finish_outgoing(&mut self, friend: FriendHandle, file_number: u32) -> Option<OutgoingTransfer> {
        self.outgoing.remove(&(friend, file_number))
    }

    pub fn add_incoming(&mut self, friend: FriendHandle, file_number: u32, transfer: IncomingTransfer) {
        self.incoming.insert((friend, file_number), transfer);
    }

    pub fn incoming_mut(&mut self, friend: FriendHandle, file_number: u32) -> Option<&mut IncomingTransfer> {
        self.incoming.get_mut(&(friend, file_number))
    }

    pub fn finish_incoming(&mut self, friend: FriendHandle, file_number: u32) -> Option<IncomingTransfer> {
        self.incoming.remove(&(friend, file_number))
    }

    /// Forget a transfer in either direction. Returns true if one existed.
    pub fn cancel(&mut self, friend: FriendHandle, file_number: u32) -> bool {
        let outgoing = self.outgoing.remove(&(friend, file_number)).is_some();
        let incoming = self.incoming.remove(&(friend, file_number)).is_some();
        outgoing || incoming
    }

    /// Drop every transfer belonging to `friend`.
    pub fn forget_friend(&mut self, friend: FriendHandle) {
        self.outgoing.retain(|(f, _), _| *f != friend);
        self.incoming.retain(|(f, _), _| *f != friend);
    }

    pub fn len(&self) -> usize {
        self.outgoing.len() + self.incoming.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
