use crate::dirstream::DirStream;
use parking_lot::{Mutex, RwLock};
use std::collections::HashMap;
use std::os::fd::{AsFd, BorrowedFd, OwnedFd};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

/// One open resource per session. The resource closes when the last clone
/// is dropped, so a read racing a release never sees a recycled descriptor.
#[derive(Debug, Clone)]
pub enum Handle {
    File(Arc<OwnedFd>),
    Dir(Arc<Mutex<DirStream>>),
}

impl Handle {
    pub fn file_fd(&self) -> Option<BorrowedFd<'_>> {
        match self {
            Handle::File(fd) => Some(fd.as_fd()),
            Handle::Dir(_) => None,
        }
    }

    pub fn dir_stream(&self) -> Option<&Arc<Mutex<DirStream>>> {
        match self {
            Handle::Dir(stream) => Some(stream),
            Handle::File(_) => None,
        }
    }
}

#[derive(Debug)]
pub struct HandleTable {
    next_id: AtomicU64,
    entries: RwLock<HashMap<u64, Handle>>,
}

impl Default for HandleTable {
    fn default() -> Self {
        Self {
            next_id: AtomicU64::new(1),
            entries: RwLock::new(HashMap::new()),
        }
    }
}

impl HandleTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert_file(&self, fd: OwnedFd) -> u64 {
        self.insert(Handle::File(Arc::new(fd)))
    }

    pub fn insert_dir(&self, stream: DirStream) -> u64 {
        self.insert(Handle::Dir(Arc::new(Mutex::new(stream))))
    }

    pub fn get_file(&self, id: u64) -> Option<Handle> {
        self.get(id, true)
    }

    pub fn get_dir(&self, id: u64) -> Option<Handle> {
        self.get(id, false)
    }

    /// Releases `id`. Unknown or already released ids are ignored.
    pub fn remove(&self, id: u64) -> Option<Handle> {
        self.entries.write().remove(&id)
    }

    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    fn insert(&self, handle: Handle) -> u64 {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.entries.write().insert(id, handle);
        id
    }

    fn get(&self, id: u64, want_file: bool) -> Option<Handle> {
        let guard = self.entries.read();
        let handle = guard.get(&id)?;
        match (want_file, handle) {
            (true, Handle::File(_)) | (false, Handle::Dir(_)) => Some(handle.clone()),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use nix::fcntl::{OFlag, open};
    use nix::sys::stat::Mode;

    fn open_fd(path: &std::path::Path) -> OwnedFd {
        open(path, OFlag::O_RDONLY | OFlag::O_CLOEXEC, Mode::empty()).unwrap()
    }

    #[test]
    fn lookups_are_kind_checked() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("f");
        std::fs::write(&file, b"x").unwrap();

        let table = HandleTable::new();
        let fh = table.insert_file(open_fd(&file));
        let dh = table.insert_dir(DirStream::open(dir.path()).unwrap());

        assert_ne!(fh, dh);
        assert!(table.get_file(fh).is_some());
        assert!(table.get_dir(fh).is_none());
        assert!(table.get_dir(dh).is_some());
        assert!(table.get_file(dh).is_none());
    }

    #[test]
    fn remove_is_tolerant_of_unknown_ids() {
        let dir = tempfile::tempdir().unwrap();
        let table = HandleTable::new();
        let dh = table.insert_dir(DirStream::open(dir.path()).unwrap());

        assert!(table.remove(dh).is_some());
        assert!(table.remove(dh).is_none());
        assert!(table.remove(9999).is_none());
        assert!(table.get_dir(dh).is_none());
        assert_eq!(table.len(), 0);
    }
}
