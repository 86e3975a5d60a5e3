//! Single-pass directory listing into a packed byte arena.
//!
//! Each entry occupies one type-tag byte, the name bytes, and two trailing
//! NULs; the caller's index vector records the arena offset of each name.
//! One listing performs no per-entry allocation: names land in the arena,
//! offsets in a reused `Vec`.
//!
//! On Linux the raw `getdents64` syscall is used with a 16 KiB buffer over
//! a descriptor opened `O_RDONLY | O_DIRECTORY | O_CLOEXEC | O_NOFOLLOW |
//! O_NOATIME`, so the kernel hands back type tags without a `stat` per
//! entry. Other platforms fall back to `std::fs::read_dir` with the same
//! packed output.
//!
//! # Invariants
//! - `.` and `..` never appear in the output.
//! - The descriptor is closed on every exit path (drop guard).
//! - `entries[i] - 1` is the offset of entry `i`'s type tag.
//!
//! # Failure Modes
//! Any syscall failure surfaces as the original `io::Error`; partial
//! output must not be used after an error.

use std::io;
use std::path::Path;

use super::arena::ByteArena;

/// Filesystem type tag recorded for each listed entry.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FileKind {
    /// Type could not be determined without a `stat` call.
    Unknown,
    /// Regular file.
    File,
    /// Directory.
    Dir,
    /// Symbolic link.
    Symlink,
}

impl FileKind {
    const TAG_UNKNOWN: u8 = 0;
    const TAG_FILE: u8 = 1;
    const TAG_DIR: u8 = 2;
    const TAG_SYMLINK: u8 = 3;

    /// Decodes the tag byte stored in the arena.
    #[inline]
    #[must_use]
    pub fn from_tag(tag: u8) -> Self {
        match tag {
            Self::TAG_FILE => Self::File,
            Self::TAG_DIR => Self::Dir,
            Self::TAG_SYMLINK => Self::Symlink,
            _ => Self::Unknown,
        }
    }

    #[inline]
    fn tag(self) -> u8 {
        match self {
            Self::Unknown => Self::TAG_UNKNOWN,
            Self::File => Self::TAG_FILE,
            Self::Dir => Self::TAG_DIR,
            Self::Symlink => Self::TAG_SYMLINK,
        }
    }
}

/// Returns the type tag for the entry whose name starts at `name_off`.
#[inline]
#[must_use]
pub fn entry_kind(arena: &ByteArena, name_off: u32) -> FileKind {
    FileKind::from_tag(arena.byte_at(name_off - 1))
}

fn append_entry(arena: &mut ByteArena, entries: &mut Vec<u32>, kind: FileKind, name: &[u8]) {
    arena.push(kind.tag());
    entries.push(arena.offset());
    arena.extend(name);
    arena.push(0);
    arena.push(0);
}

/// Lists the immediate children of `dir` into `arena` and `entries`.
///
/// Both outputs are cleared first; on success `entries` holds one name
/// offset per child, in readdir order (unsorted).
///
/// # Errors
///
/// Any `open`, `getdents64`, or `read_dir` failure is returned unchanged.
pub fn list_dir(dir: &Path, arena: &mut ByteArena, entries: &mut Vec<u32>) -> io::Result<()> {
    arena.clear();
    entries.clear();
    imp::list_dir(dir, arena, entries)
}

fn is_dots(name: &[u8]) -> bool {
    name == b"." || name == b".."
}

#[cfg(target_os = "linux")]
mod imp {
    use std::ffi::CString;
    use std::io;
    use std::os::unix::ffi::OsStrExt;
    use std::path::Path;

    use super::{append_entry, is_dots, ByteArena, FileKind};

    const BUF_SIZE: usize = 16 << 10;

    /// Closes the wrapped descriptor on drop.
    struct FdGuard(libc::c_int);

    impl Drop for FdGuard {
        fn drop(&mut self) {
            // EINTR on close is not retried; the descriptor is gone either way.
            unsafe { libc::close(self.0) };
        }
    }

    fn kind_from_dtype(d_type: u8) -> FileKind {
        match d_type {
            libc::DT_REG => FileKind::File,
            libc::DT_DIR => FileKind::Dir,
            libc::DT_LNK => FileKind::Symlink,
            _ => FileKind::Unknown,
        }
    }

    pub(super) fn list_dir(
        dir: &Path,
        arena: &mut ByteArena,
        entries: &mut Vec<u32>,
    ) -> io::Result<()> {
        let c_dir = CString::new(dir.as_os_str().as_bytes())
            .map_err(|_| io::Error::from(io::ErrorKind::InvalidInput))?;

        let flags = libc::O_RDONLY | libc::O_DIRECTORY | libc::O_CLOEXEC | libc::O_NOFOLLOW;
        let mut fd = unsafe { libc::open(c_dir.as_ptr(), flags | libc::O_NOATIME) };
        if fd < 0 && io::Error::last_os_error().raw_os_error() == Some(libc::EPERM) {
            // O_NOATIME needs file ownership; retry without it.
            fd = unsafe { libc::open(c_dir.as_ptr(), flags) };
        }
        if fd < 0 {
            return Err(io::Error::last_os_error());
        }
        let guard = FdGuard(fd);

        let mut buf = [0u8; BUF_SIZE];
        loop {
            let n = unsafe {
                libc::syscall(
                    libc::SYS_getdents64,
                    guard.0,
                    buf.as_mut_ptr() as *mut libc::c_void,
                    BUF_SIZE,
                )
            };
            if n < 0 {
                return Err(io::Error::last_os_error());
            }
            if n == 0 {
                return Ok(());
            }

            // struct linux_dirent64: u64 d_ino, s64 d_off, u16 d_reclen,
            // u8 d_type, char d_name[]. Name starts at byte 19 and is
            // NUL-terminated within d_reclen.
            let mut pos = 0usize;
            let filled = &buf[..n as usize];
            while pos < filled.len() {
                let rec = &filled[pos..];
                let reclen = u16::from_ne_bytes([rec[16], rec[17]]) as usize;
                debug_assert!(reclen >= 19 && pos + reclen <= filled.len());
                let d_type = rec[18];
                let name_max = &rec[19..reclen];
                let name = match memchr::memchr(0, name_max) {
                    Some(end) => &name_max[..end],
                    None => name_max,
                };
                if !is_dots(name) {
                    append_entry(arena, entries, kind_from_dtype(d_type), name);
                }
                pos += reclen;
            }
        }
    }
}

#[cfg(not(target_os = "linux"))]
mod imp {
    use std::fs;
    use std::io;
    use std::path::Path;

    use super::{append_entry, is_dots, ByteArena, FileKind};

    #[cfg(unix)]
    fn name_bytes(entry: &fs::DirEntry) -> Vec<u8> {
        use std::os::unix::ffi::OsStrExt;
        entry.file_name().as_os_str().as_bytes().to_vec()
    }

    #[cfg(not(unix))]
    fn name_bytes(entry: &fs::DirEntry) -> Vec<u8> {
        entry.file_name().to_string_lossy().into_owned().into_bytes()
    }

    pub(super) fn list_dir(
        dir: &Path,
        arena: &mut ByteArena,
        entries: &mut Vec<u32>,
    ) -> io::Result<()> {
        for entry in fs::read_dir(dir)? {
            let entry = entry?;
            let name = name_bytes(&entry);
            if is_dots(&name) {
                continue;
            }
            // DirEntry::file_type does not follow symlinks, matching the
            // getdents64 tags.
            let kind = match entry.file_type() {
                Ok(ft) if ft.is_file() => FileKind::File,
                Ok(ft) if ft.is_dir() => FileKind::Dir,
                Ok(ft) if ft.is_symlink() => FileKind::Symlink,
                _ => FileKind::Unknown,
            };
            append_entry(arena, entries, kind, &name);
        }
        Ok(())
    }
}
