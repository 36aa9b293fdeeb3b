use crate::config::Config;
use crate::overlay::Overlay;
use crate::pathmap::make_child_path;
use crate::util::{errno_from_nix, file_attr_from_stat};
use fuse3::path::prelude::*;
use fuse3::path::reply::DirectoryEntryPlus;
use log::{debug, info};
use nix::sys::statvfs::statvfs;
use std::ffi::OsStr;
use std::num::NonZeroU32;
use std::time::Duration;

const ATTR_TTL: Duration = Duration::from_secs(1);

// Read-only mount; the kernel still wants a value.
const MAX_WRITE: NonZeroU32 = NonZeroU32::new(128 * 1024).unwrap();

// Entries pulled from the stream per readdir call. The kernel keeps what fits
// in its buffer and comes back with the offset of the last accepted entry.
const READDIR_BATCH: usize = 256;

pub struct DefFs {
    overlay: Overlay,
}

impl DefFs {
    pub fn new(config: Config) -> Self {
        Self {
            overlay: Overlay::new(config),
        }
    }

    fn attr_reply(&self, path: &OsStr) -> Result<FileAttr, fuse3::Errno> {
        let stat = self.overlay.get_attributes(path).inspect_err(|err| {
            debug!("getattr {path:?}: {err:?}");
        })?;
        Ok(file_attr_from_stat(&stat))
    }
}

impl PathFilesystem for DefFs {
    async fn init(&self, _req: Request) -> Result<ReplyInit, fuse3::Errno> {
        let config = self.overlay.config();
        info!(
            "serving {:?} with default file {:?}",
            config.base_path(),
            config.default_file()
        );
        Ok(ReplyInit {
            max_write: MAX_WRITE,
        })
    }

    async fn destroy(&self, _req: Request) {
        info!(
            "filesystem destroyed with {} open handle(s)",
            self.overlay.open_handles()
        );
    }

    async fn lookup(
        &self,
        _req: Request,
        parent: &OsStr,
        name: &OsStr,
    ) -> Result<ReplyEntry, fuse3::Errno> {
        let path = make_child_path(parent, name);
        let attr = self.attr_reply(&path)?;
        Ok(ReplyEntry {
            ttl: ATTR_TTL,
            attr,
        })
    }

    async fn getattr(
        &self,
        _req: Request,
        path: Option<&OsStr>,
        fh: Option<u64>,
        _flags: u32,
    ) -> Result<ReplyAttr, fuse3::Errno> {
        if let Some(result) = fh.and_then(|id| self.overlay.handle_attributes(id)) {
            let stat = result.inspect_err(|err| debug!("getattr fh {fh:?}: {err:?}"))?;
            return Ok(ReplyAttr {
                ttl: ATTR_TTL,
                attr: file_attr_from_stat(&stat),
            });
        }

        let path = path.ok_or_else(fuse3::Errno::new_not_exist)?;
        let attr = self.attr_reply(path)?;
        Ok(ReplyAttr {
            ttl: ATTR_TTL,
            attr,
        })
    }

    async fn open(
        &self,
        _req: Request,
        path: &OsStr,
        flags: u32,
    ) -> Result<ReplyOpen, fuse3::Errno> {
        let fh = self.overlay.open_file(path, flags).inspect_err(|err| {
            debug!("open {path:?} flags={flags:#o}: {err:?}");
        })?;
        debug!("open {path:?} -> fh {fh}");
        Ok(ReplyOpen { fh, flags: 0 })
    }

    async fn read(
        &self,
        _req: Request,
        _path: Option<&OsStr>,
        fh: u64,
        offset: u64,
        size: u32,
    ) -> Result<ReplyData, fuse3::Errno> {
        let data = self.overlay.read(fh, offset, size).inspect_err(|err| {
            debug!("read fh {fh} offset={offset} size={size}: {err:?}");
        })?;
        Ok(data.into())
    }

    async fn release(
        &self,
        _req: Request,
        _path: Option<&OsStr>,
        fh: u64,
        _flags: u32,
        _lock_owner: u64,
        _flush: bool,
    ) -> Result<(), fuse3::Errno> {
        debug!("release fh {fh}");
        self.overlay.close_file(fh);
        Ok(())
    }

    async fn opendir(
        &self,
        _req: Request,
        path: &OsStr,
        flags: u32,
    ) -> Result<ReplyOpen, fuse3::Errno> {
        let fh = self.overlay.open_directory(path).inspect_err(|err| {
            debug!("opendir {path:?}: {err:?}");
        })?;
        debug!("opendir {path:?} -> fh {fh}");
        Ok(ReplyOpen { fh, flags })
    }

    type DirEntryStream<'a>
        = futures_util::stream::Iter<std::vec::IntoIter<fuse3::Result<DirectoryEntry>>>
    where
        Self: 'a;
    type DirEntryPlusStream<'a>
        = futures_util::stream::Iter<std::vec::IntoIter<fuse3::Result<DirectoryEntryPlus>>>
    where
        Self: 'a;

    async fn readdir<'a>(
        &'a self,
        _req: Request,
        _path: &'a OsStr,
        fh: u64,
        offset: i64,
    ) -> Result<ReplyDirectory<Self::DirEntryStream<'a>>, fuse3::Errno> {
        self.overlay.seek_directory(fh, offset)?;

        let mut entries: Vec<fuse3::Result<DirectoryEntry>> = Vec::new();
        while entries.len() < READDIR_BATCH {
            let Some(entry) = self.overlay.list_next(fh)? else {
                break;
            };
            entries.push(Ok(DirectoryEntry {
                kind: entry.kind,
                name: entry.name,
                offset: entry.offset,
            }));
        }

        let stream = futures_util::stream::iter(entries);
        Ok(ReplyDirectory { entries: stream })
    }

    async fn readdirplus<'a>(
        &'a self,
        _req: Request,
        _parent: &'a OsStr,
        fh: u64,
        offset: u64,
        _lock_owner: u64,
    ) -> Result<ReplyDirectoryPlus<Self::DirEntryPlusStream<'a>>, fuse3::Errno> {
        self.overlay.seek_directory(fh, offset as i64)?;

        let mut entries: Vec<fuse3::Result<DirectoryEntryPlus>> = Vec::new();
        while entries.len() < READDIR_BATCH {
            let Some(entry) = self.overlay.list_next(fh)? else {
                break;
            };
            let stat = match self.overlay.entry_attributes(fh, &entry.name) {
                Ok(stat) => stat,
                // Removed from the base directory since the stream buffered it.
                Err(err) if err == fuse3::Errno::new_not_exist() => {
                    debug!("readdirplus fh {fh}: {:?} vanished", entry.name);
                    continue;
                }
                Err(err) => {
                    entries.push(Err(err));
                    continue;
                }
            };
            entries.push(Ok(DirectoryEntryPlus {
                kind: entry.kind,
                name: entry.name,
                offset: entry.offset,
                attr: file_attr_from_stat(&stat),
                entry_ttl: ATTR_TTL,
                attr_ttl: ATTR_TTL,
            }));
        }

        let stream = futures_util::stream::iter(entries);
        Ok(ReplyDirectoryPlus { entries: stream })
    }

    async fn releasedir(
        &self,
        _req: Request,
        _path: &OsStr,
        fh: u64,
        _flags: u32,
    ) -> Result<(), fuse3::Errno> {
        debug!("releasedir fh {fh}");
        self.overlay.close_directory(fh);
        Ok(())
    }

    async fn statfs(&self, _req: Request, _path: &OsStr) -> Result<ReplyStatFs, fuse3::Errno> {
        let stats = statvfs(self.overlay.config().base_path()).map_err(errno_from_nix)?;
        Ok(ReplyStatFs {
            blocks: stats.blocks(),
            bfree: stats.blocks_free(),
            bavail: stats.blocks_available(),
            files: stats.files(),
            ffree: stats.files_free(),
            bsize: stats.block_size() as u32,
            namelen: stats.name_max() as u32,
            frsize: stats.fragment_size() as u32,
        })
    }
}
