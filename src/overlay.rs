//! Fallback policy and handle-backed operations.
//!
//! A path missing from the base directory resolves to the default file for
//! attribute lookups and opens. Only `ENOENT` on the primary path triggers
//! the substitution; directories never fall back.

use crate::config::Config;
use crate::dirstream::{DirStream, RawDirEntry};
use crate::handle_table::HandleTable;
use crate::pathmap::translate_path;
use crate::util::{errno_from_nix, has_write_intent, invalid_argument, oflag_from_bits};
use bytes::Bytes;
use fuse3::FileType;
use nix::errno::Errno as NixErrno;
use nix::fcntl::{AtFlags, OFlag, open};
use nix::sys::stat::{FileStat, Mode, fstat, fstatat, lstat, stat};
use nix::sys::uio::pread;
use std::ffi::{OsStr, OsString};
use std::os::fd::OwnedFd;
use std::sync::Arc;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DirEntry {
    pub name: OsString,
    pub kind: FileType,
    /// Offset hint for resuming the listing after this entry.
    pub offset: i64,
}

impl From<RawDirEntry> for DirEntry {
    fn from(raw: RawDirEntry) -> Self {
        Self {
            kind: crate::util::file_type_from_dtype(raw.d_type),
            name: raw.name,
            offset: raw.next_offset,
        }
    }
}

#[derive(Debug)]
pub struct Overlay {
    config: Arc<Config>,
    handles: HandleTable,
}

impl Overlay {
    pub fn new(config: Config) -> Self {
        Self {
            config: Arc::new(config),
            handles: HandleTable::new(),
        }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn open_handles(&self) -> usize {
        self.handles.len()
    }

    pub fn get_attributes(&self, path: &OsStr) -> Result<FileStat, fuse3::Errno> {
        let real = translate_path(&self.config, path)?;
        match lstat(&real) {
            Ok(stat) => Ok(stat),
            Err(NixErrno::ENOENT) => lstat(self.config.default_file()).map_err(errno_from_nix),
            Err(err) => Err(errno_from_nix(err)),
        }
    }

    /// Attributes of whatever file an open session is actually reading.
    /// `None` when `fh` is not a live file handle.
    pub fn handle_attributes(&self, fh: u64) -> Option<Result<FileStat, fuse3::Errno>> {
        let handle = self.handles.get_file(fh)?;
        let fd = handle.file_fd()?;
        Some(fstat(fd).map_err(errno_from_nix))
    }

    pub fn open_file(&self, path: &OsStr, flags: u32) -> Result<u64, fuse3::Errno> {
        let oflag = oflag_from_bits(flags);
        if has_write_intent(oflag) {
            return Err(fuse3::Errno::from(libc::EPERM));
        }

        let real = translate_path(&self.config, path)?;
        let oflag = oflag | OFlag::O_CLOEXEC;
        let fd: OwnedFd = match open(&real, oflag, Mode::empty()) {
            Ok(fd) => fd,
            Err(NixErrno::ENOENT) => {
                open(self.config.default_file(), oflag, Mode::empty()).map_err(errno_from_nix)?
            }
            Err(err) => return Err(errno_from_nix(err)),
        };

        Ok(self.handles.insert_file(fd))
    }

    pub fn read(&self, fh: u64, offset: u64, size: u32) -> Result<Bytes, fuse3::Errno> {
        let handle = self.handles.get_file(fh).ok_or_else(invalid_argument)?;
        let fd = handle.file_fd().ok_or_else(invalid_argument)?;

        let mut buf = vec![0u8; size as usize];
        let read_len = pread(fd, &mut buf, offset as i64).map_err(errno_from_nix)?;
        buf.truncate(read_len);
        Ok(Bytes::from(buf))
    }

    pub fn close_file(&self, fh: u64) {
        self.handles.remove(fh);
    }

    pub fn open_directory(&self, path: &OsStr) -> Result<u64, fuse3::Errno> {
        let real = translate_path(&self.config, path)?;
        let stream = DirStream::open(&real)?;
        Ok(self.handles.insert_dir(stream))
    }

    pub fn list_next(&self, fh: u64) -> Result<Option<DirEntry>, fuse3::Errno> {
        let handle = self.handles.get_dir(fh).ok_or_else(invalid_argument)?;
        let stream = handle.dir_stream().ok_or_else(invalid_argument)?;
        let next = stream.lock().next_entry()?;
        Ok(next.map(DirEntry::from))
    }

    /// Repositions a listing to `offset` unless it is already there.
    pub fn seek_directory(&self, fh: u64, offset: i64) -> Result<(), fuse3::Errno> {
        let handle = self.handles.get_dir(fh).ok_or_else(invalid_argument)?;
        let stream = handle.dir_stream().ok_or_else(invalid_argument)?;
        let mut stream = stream.lock();
        if stream.position() != offset {
            stream.seek(offset);
        }
        Ok(())
    }

    /// `lstat` of an entry relative to an open directory. `..` of the base
    /// directory reports the base itself so nothing above the tree leaks out.
    pub fn entry_attributes(&self, fh: u64, name: &OsStr) -> Result<FileStat, fuse3::Errno> {
        let handle = self.handles.get_dir(fh).ok_or_else(invalid_argument)?;
        let stream = handle.dir_stream().ok_or_else(invalid_argument)?;
        let stream = stream.lock();
        let dir_fd = stream.as_fd()?;

        if name == OsStr::new("..") {
            let dir = fstat(dir_fd).map_err(errno_from_nix)?;
            let base = stat(self.config.base_path()).map_err(errno_from_nix)?;
            if dir.st_dev == base.st_dev && dir.st_ino == base.st_ino {
                return Ok(dir);
            }
        }

        fstatat(dir_fd, name, AtFlags::AT_SYMLINK_NOFOLLOW).map_err(errno_from_nix)
    }

    pub fn close_directory(&self, fh: u64) {
        self.handles.remove(fh);
    }
}
