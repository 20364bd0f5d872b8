//! Low-level named pipe operations.

use std::ffi::CString;
use std::fs::{self, DirBuilder, File, OpenOptions, Permissions};
use std::io;
use std::os::unix::ffi::OsStrExt;
use std::os::unix::fs::{DirBuilderExt, FileTypeExt, OpenOptionsExt, PermissionsExt};
use std::path::Path;

/// Create `path` as a named pipe with `mode`, then force `mode` past the umask.
pub fn make_fifo(path: &Path, mode: u32) -> io::Result<()> {
    let c_path = CString::new(path.as_os_str().as_bytes())
        .map_err(|_| io::Error::new(io::ErrorKind::InvalidInput, "path contains NUL byte"))?;

    // SAFETY: `c_path` is a valid NUL-terminated string that outlives the call.
    let rc = unsafe { libc::mkfifo(c_path.as_ptr(), mode as libc::mode_t) };
    if rc != 0 {
        return Err(io::Error::last_os_error());
    }

    fs::set_permissions(path, Permissions::from_mode(mode))
}

/// Remove whatever is at `path`; a missing file is not an error.
pub fn remove_existing(path: &Path) -> io::Result<()> {
    match fs::remove_file(path) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e),
    }
}

/// Create a directory tree with owner-only permissions.
pub fn create_private_dir(path: &Path, mode: u32) -> io::Result<()> {
    DirBuilder::new().recursive(true).mode(mode).create(path)?;
    // `recursive` leaves an existing directory's mode untouched.
    fs::set_permissions(path, Permissions::from_mode(mode))
}

pub fn is_fifo(path: &Path) -> bool {
    fs::symlink_metadata(path)
        .map(|m| m.file_type().is_fifo())
        .unwrap_or(false)
}

/// Open the read end without waiting for a writer.
pub fn open_read_nonblocking(path: &Path) -> io::Result<File> {
    OpenOptions::new()
        .read(true)
        .custom_flags(libc::O_NONBLOCK)
        .open(path)
}

/// Open the write end. Fails with `ENXIO` when no reader is attached.
pub fn open_write_nonblocking(path: &Path) -> io::Result<File> {
    OpenOptions::new()
        .write(true)
        .custom_flags(libc::O_NONBLOCK)
        .open(path)
}

/// Write a small private file (identity, state), replacing any previous one.
pub fn write_private_file(path: &Path, contents: &[u8], mode: u32) -> io::Result<()> {
    remove_existing(path)?;
    let mut file = OpenOptions::new()
        .write(true)
        .create_new(true)
        .mode(mode)
        .open(path)?;
    io::Write::write_all(&mut file, contents)?;
    file.sync_all()
}

pub fn is_no_reader(err: &io::Error) -> bool {
    err.raw_os_error() == Some(libc::ENXIO)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::os::unix::fs::MetadataExt;

    #[test]
    fn test_make_fifo_sets_mode() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("pipe");
        make_fifo(&path, 0o600).unwrap();

        assert!(is_fifo(&path));
        assert_eq!(fs::metadata(&path).unwrap().mode() & 0o777, 0o600);
        assert!(make_fifo(&path, 0o600).is_err());
    }

    #[test]
    fn test_write_without_reader_is_enxio() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("pipe");
        make_fifo(&path, 0o600).unwrap();

        let err = open_write_nonblocking(&path).unwrap_err();
        assert!(is_no_reader(&err));

        let _reader = open_read_nonblocking(&path).unwrap();
        assert!(open_write_nonblocking(&path).is_ok());
    }

    #[test]
    fn test_private_dir_mode() {
        let dir = tempfile::tempdir().unwrap();
        let nested = dir.path().join("a/b");
        create_private_dir(&nested, 0o700).unwrap();
        assert_eq!(fs::metadata(&nested).unwrap().mode() & 0o777, 0o700);
        // Repeating is fine.
        create_private_dir(&nested, 0o700).unwrap();
    }
}
