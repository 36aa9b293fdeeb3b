use crate::util::{errno_from_nix, path_to_cstring};
use nix::errno::Errno as NixErrno;
use std::ffi::{CStr, OsString};
use std::io;
use std::os::fd::BorrowedFd;
use std::os::unix::ffi::OsStrExt;
use std::path::Path;
use std::ptr::NonNull;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawDirEntry {
    pub name: OsString,
    /// Offset of the entry after this one, as reported by `readdir(3)`.
    pub next_offset: i64,
    pub d_type: u8,
}

/// An open `DIR*` stream. Entries are read one at a time; the stream keeps
/// reporting end-of-stream once exhausted until it is explicitly repositioned.
#[derive(Debug)]
pub struct DirStream {
    dir: NonNull<libc::DIR>,
    position: i64,
}

// The raw stream is only touched through `&mut self` or behind the handle
// table's mutex.
unsafe impl Send for DirStream {}

impl DirStream {
    pub fn open(path: &Path) -> Result<Self, fuse3::Errno> {
        let c_path = path_to_cstring(path)?;
        let raw = unsafe { libc::opendir(c_path.as_ptr()) };
        match NonNull::new(raw) {
            Some(dir) => Ok(Self { dir, position: 0 }),
            None => Err(io::Error::last_os_error().into()),
        }
    }

    /// Offset the next `next_entry` call will read from.
    pub fn position(&self) -> i64 {
        self.position
    }

    pub fn next_entry(&mut self) -> Result<Option<RawDirEntry>, fuse3::Errno> {
        NixErrno::clear();
        let raw = unsafe { libc::readdir(self.dir.as_ptr()) };
        if raw.is_null() {
            return match NixErrno::last_raw() {
                0 => Ok(None),
                errno => Err(fuse3::Errno::from(errno)),
            };
        }

        let entry = unsafe { &*raw };
        let name = unsafe { CStr::from_ptr(entry.d_name.as_ptr()) };
        self.position = entry.d_off;
        Ok(Some(RawDirEntry {
            name: OsString::from(std::ffi::OsStr::from_bytes(name.to_bytes())),
            next_offset: entry.d_off,
            d_type: entry.d_type,
        }))
    }

    /// Moves the stream to an offset previously returned as `next_offset`.
    /// Offset 0 rewinds to the first entry.
    pub fn seek(&mut self, offset: i64) {
        if offset == 0 {
            unsafe { libc::rewinddir(self.dir.as_ptr()) };
        } else {
            unsafe { libc::seekdir(self.dir.as_ptr(), offset as libc::c_long) };
        }
        self.position = offset;
    }

    pub fn as_fd(&self) -> Result<BorrowedFd<'_>, fuse3::Errno> {
        let fd = unsafe { libc::dirfd(self.dir.as_ptr()) };
        if fd < 0 {
            return Err(errno_from_nix(NixErrno::last()));
        }
        // The descriptor belongs to the stream and lives until closedir.
        Ok(unsafe { BorrowedFd::borrow_raw(fd) })
    }
}

impl Drop for DirStream {
    fn drop(&mut self) {
        unsafe { libc::closedir(self.dir.as_ptr()) };
    }
}
