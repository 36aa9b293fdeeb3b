use fuse3::FileType;
use fuse3::path::reply::FileAttr;
use nix::fcntl::OFlag;
use nix::sys::stat::FileStat;
use std::ffi::CString;
use std::os::unix::ffi::OsStrExt;
use std::path::Path;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

pub fn errno_from_nix(err: nix::Error) -> fuse3::Errno {
    fuse3::Errno::from(err as i32)
}

pub fn invalid_argument() -> fuse3::Errno {
    fuse3::Errno::from(libc::EINVAL)
}

pub fn path_to_cstring(path: &Path) -> Result<CString, fuse3::Errno> {
    CString::new(path.as_os_str().as_bytes()).map_err(|_| invalid_argument())
}

pub fn file_type_from_mode(mode: libc::mode_t) -> FileType {
    match mode & libc::S_IFMT {
        libc::S_IFDIR => FileType::Directory,
        libc::S_IFLNK => FileType::Symlink,
        libc::S_IFCHR => FileType::CharDevice,
        libc::S_IFBLK => FileType::BlockDevice,
        libc::S_IFIFO => FileType::NamedPipe,
        libc::S_IFSOCK => FileType::Socket,
        _ => FileType::RegularFile,
    }
}

/// Maps a `d_type` from a directory stream. `DT_UNKNOWN` is reported as a
/// regular file; the kernel looks the entry up before trusting the type.
pub fn file_type_from_dtype(d_type: u8) -> FileType {
    match d_type {
        libc::DT_DIR => FileType::Directory,
        libc::DT_LNK => FileType::Symlink,
        libc::DT_CHR => FileType::CharDevice,
        libc::DT_BLK => FileType::BlockDevice,
        libc::DT_FIFO => FileType::NamedPipe,
        libc::DT_SOCK => FileType::Socket,
        _ => FileType::RegularFile,
    }
}

fn system_time_from_raw(sec: i64, nsec: i64) -> SystemTime {
    if sec < 0 {
        return UNIX_EPOCH;
    }
    let nanos = if nsec < 0 { 0 } else { nsec as u32 };
    UNIX_EPOCH + Duration::new(sec as u64, nanos)
}

pub fn file_attr_from_stat(stat: &FileStat) -> FileAttr {
    let kind = file_type_from_mode(stat.st_mode);
    let perm = fuse3::perm_from_mode_and_kind(kind, stat.st_mode as libc::mode_t);

    FileAttr {
        size: stat.st_size as u64,
        blocks: stat.st_blocks as u64,
        atime: system_time_from_raw(stat.st_atime, stat.st_atime_nsec.into()),
        mtime: system_time_from_raw(stat.st_mtime, stat.st_mtime_nsec.into()),
        ctime: system_time_from_raw(stat.st_ctime, stat.st_ctime_nsec.into()),
        kind,
        perm,
        nlink: stat.st_nlink as u32,
        uid: stat.st_uid,
        gid: stat.st_gid,
        rdev: stat.st_rdev as u32,
        blksize: stat.st_blksize as u32,
        #[cfg(target_os = "macos")]
        crtime: UNIX_EPOCH,
        #[cfg(target_os = "macos")]
        flags: 0,
    }
}

pub fn oflag_from_bits(flags: u32) -> OFlag {
    OFlag::from_bits_truncate(flags as i32)
}

/// True when `flags` asks for anything beyond reading an existing file.
pub fn has_write_intent(flags: OFlag) -> bool {
    let access = flags & OFlag::O_ACCMODE;
    access != OFlag::O_RDONLY
        || flags.intersects(OFlag::O_CREAT | OFlag::O_EXCL | OFlag::O_TRUNC)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn read_only_flags_have_no_write_intent() {
        assert!(!has_write_intent(OFlag::O_RDONLY));
        assert!(!has_write_intent(OFlag::O_RDONLY | OFlag::O_NONBLOCK));
        assert!(!has_write_intent(OFlag::O_RDONLY | OFlag::O_APPEND));
    }

    #[test]
    fn write_intents_are_detected() {
        for flags in [
            OFlag::O_WRONLY,
            OFlag::O_RDWR,
            OFlag::O_RDONLY | OFlag::O_CREAT,
            OFlag::O_RDONLY | OFlag::O_EXCL,
            OFlag::O_RDONLY | OFlag::O_TRUNC,
        ] {
            assert!(has_write_intent(flags), "{flags:?}");
        }
    }

    #[test]
    fn dtype_mapping_covers_directories_and_links() {
        assert_eq!(file_type_from_dtype(libc::DT_DIR), FileType::Directory);
        assert_eq!(file_type_from_dtype(libc::DT_LNK), FileType::Symlink);
        assert_eq!(file_type_from_dtype(libc::DT_UNKNOWN), FileType::RegularFile);
    }
}
