//! Per-shard worktree scan: unstaged detection, then untracked detection.
//!
//! Each shard task walks its slice of the snapshot in sorted order:
//!
//! 1. `lstat` every entry and compare the cached stat fields. A clean
//!    stat match on a non-racy entry proves the file unchanged; anything
//!    else falls back to hashing the file with the object hash and
//!    comparing ids. The first difference settles the shard's unstaged
//!    contribution.
//! 2. List every directory that holds shard entries (plus their
//!    ancestors) and test each returned name against the full snapshot
//!    and the ignore rules. The first unknown, unignored name settles
//!    untracked.
//!
//! Workers re-check the shared flags at entry and directory boundaries
//! and stop contributing once both answers are already dirty. A local
//! I/O failure downgrades only the affected answer to unknown; the shard
//! keeps scanning because a later entry can still prove dirty, which
//! outranks unknown in the flag lattice.

use std::fs;
use std::io;
use std::ops::Range;
use std::path::{Path, PathBuf};

use ahash::AHashSet;

use crate::status::diff::{ScanFlags, ScanOptions};
use crate::status::ignore::{IgnoreContext, IgnoreStack};
use crate::status::snapshot::{Entry, IndexSnapshot};
use crate::stdx::{entry_kind, list_dir, ByteArena, FileKind};

/// Scans one shard, publishing into `flags`.
///
/// `include_root` makes this shard also list the worktree root; exactly
/// one shard per scan carries it so the root is listed once.
pub(crate) fn scan_shard(
    snapshot: &IndexSnapshot,
    range: Range<usize>,
    flags: &ScanFlags,
    ignores: &IgnoreContext,
    options: ScanOptions,
    include_root: bool,
) {
    scan_entries(snapshot, range.clone(), flags, ignores.worktree_root(), options);
    if !flags.untracked_is_dirty() {
        scan_untracked(snapshot, range, flags, ignores, include_root);
    }
}

fn scan_entries(
    snapshot: &IndexSnapshot,
    range: Range<usize>,
    flags: &ScanFlags,
    root: &Path,
    options: ScanOptions,
) {
    for entry in &snapshot.entries()[range] {
        if flags.fully_dirty() {
            return;
        }
        // Sparse-checkout and assume-unchanged entries are exempt from
        // the worktree comparison; conflict stages were already answered
        // through the staged flag, and intent-to-add has no content yet.
        if entry.skip_worktree()
            || entry.assume_unchanged()
            || entry.conflicted()
            || entry.intent_to_add()
        {
            continue;
        }

        let abs = join_rel(root, snapshot.path(entry));
        let md = match fs::symlink_metadata(&abs) {
            Ok(md) => md,
            Err(err) if err.kind() == io::ErrorKind::NotFound => {
                flags.set_unstaged_dirty();
                return;
            }
            Err(err) => {
                tracing::debug!(path = %abs.display(), %err, "stat failed; unstaged unknown");
                flags.set_unstaged_unknown();
                continue;
            }
        };

        match compare_entry(snapshot, entry, &abs, &md, options) {
            Comparison::Unchanged => {}
            Comparison::Changed => {
                flags.set_unstaged_dirty();
                return;
            }
            Comparison::Unknown => flags.set_unstaged_unknown(),
        }
    }
}

enum Comparison {
    Unchanged,
    Changed,
    Unknown,
}

fn compare_entry(
    snapshot: &IndexSnapshot,
    entry: &Entry,
    abs: &Path,
    md: &fs::Metadata,
    options: ScanOptions,
) -> Comparison {
    if entry.is_submodule() {
        if !md.is_dir() {
            return Comparison::Changed;
        }
        // A submodule is one logical file whose content is its HEAD
        // commit; no recursion into its worktree. Unreadable or
        // uninitialized submodules read as unchanged, like git.
        return match submodule_head(abs) {
            Some(head) if head != entry.id => Comparison::Changed,
            _ => Comparison::Unchanged,
        };
    }

    let ft = md.file_type();
    if ft.is_dir() {
        // Tracked file replaced by a directory.
        return Comparison::Changed;
    }
    if entry.is_symlink() != ft.is_symlink() {
        return Comparison::Changed;
    }
    if mode_differs(entry, md, options) {
        return Comparison::Changed;
    }

    if stat_matches(entry, md) && !snapshot.entry_is_racy(entry) {
        return Comparison::Unchanged;
    }

    // Stat is inconclusive: hash the content with the object hash and
    // compare ids. A touched-but-identical file lands here and must
    // come out unchanged.
    match worktree_oid(entry, abs) {
        Ok(oid) if oid == entry.id => Comparison::Unchanged,
        Ok(_) => Comparison::Changed,
        Err(err) => {
            tracing::debug!(path = %abs.display(), %err, "hash failed; unstaged unknown");
            Comparison::Unknown
        }
    }
}

/// Executable-bit comparison, gated on `core.fileMode`: when the
/// repository says permission bits are untrustworthy, an exec-bit
/// difference is not a change.
#[cfg(unix)]
fn mode_differs(entry: &Entry, md: &fs::Metadata, options: ScanOptions) -> bool {
    use std::os::unix::fs::MetadataExt;
    if !options.trust_filemode || entry.is_symlink() {
        return false;
    }
    (md.mode() & 0o111 != 0) != entry.is_executable()
}

#[cfg(not(unix))]
fn mode_differs(_entry: &Entry, _md: &fs::Metadata, _options: ScanOptions) -> bool {
    false
}

/// Compares the cached stat fields the index recorded against the live
/// file. Fields the index left zeroed (foreign-machine checkouts, some
/// tools) are skipped, matching git's refresh rules.
#[cfg(unix)]
fn stat_matches(entry: &Entry, md: &fs::Metadata) -> bool {
    use std::os::unix::fs::MetadataExt;

    if entry.size != md.len() as u32 {
        return false;
    }
    if entry.mtime.0 != md.mtime() as i32 {
        return false;
    }
    if entry.mtime.1 != 0 && entry.mtime.1 != md.mtime_nsec() as u32 {
        return false;
    }
    if entry.ctime.0 != 0 {
        if entry.ctime.0 != md.ctime() as i32 {
            return false;
        }
        if entry.ctime.1 != 0 && entry.ctime.1 != md.ctime_nsec() as u32 {
            return false;
        }
    }
    if entry.ino != 0 && entry.ino != md.ino() as u32 {
        return false;
    }
    if entry.dev != 0 && entry.dev != md.dev() as u32 {
        return false;
    }
    if entry.uid != 0 && entry.uid != md.uid() {
        return false;
    }
    if entry.gid != 0 && entry.gid != md.gid() {
        return false;
    }
    true
}

#[cfg(not(unix))]
fn stat_matches(entry: &Entry, md: &fs::Metadata) -> bool {
    use std::time::UNIX_EPOCH;
    if entry.size != md.len() as u32 {
        return false;
    }
    let mtime = md
        .modified()
        .ok()
        .and_then(|t| t.duration_since(UNIX_EPOCH).ok());
    match mtime {
        Some(d) => entry.mtime.0 == d.as_secs() as i32,
        None => false,
    }
}

/// Hashes the worktree content of a regular entry with the object hash.
///
/// Regular files stream through the library's fixed-buffer file hasher;
/// symlinks hash their target bytes.
fn worktree_oid(entry: &Entry, abs: &Path) -> Result<git2::Oid, git2::Error> {
    if entry.is_symlink() {
        let target = fs::read_link(abs)
            .map_err(|e| git2::Error::from_str(&format!("readlink: {e}")))?;
        return git2::Oid::hash_object(git2::ObjectType::Blob, path_bytes(&target));
    }
    git2::Oid::hash_file(git2::ObjectType::Blob, abs)
}

fn submodule_head(path: &Path) -> Option<git2::Oid> {
    let repo = git2::Repository::open(path).ok()?;
    let head = repo.head().ok()?;
    head.target()
}

fn scan_untracked(
    snapshot: &IndexSnapshot,
    range: Range<usize>,
    flags: &ScanFlags,
    ignores: &IgnoreContext,
    include_root: bool,
) {
    let dirs = relevant_dirs(snapshot, range, include_root);
    if dirs.is_empty() {
        return;
    }

    let root = ignores.worktree_root();
    let mut stack = IgnoreStack::new(ignores);
    let mut arena = ByteArena::with_capacity(16 * 1024);
    let mut names: Vec<u32> = Vec::new();
    let mut full = Vec::with_capacity(128);

    for dir in dirs {
        if flags.untracked_is_dirty() {
            return;
        }
        let dir_abs = join_rel(root, dir);
        if let Err(err) = list_dir(&dir_abs, &mut arena, &mut names) {
            tracing::debug!(dir = %dir_abs.display(), %err, "list failed; untracked unknown");
            flags.set_untracked_unknown();
            continue;
        }

        for &off in &names {
            let name = arena.cstr_at(off);
            // The repository directory itself is never untracked.
            if name == b".git" {
                continue;
            }

            full.clear();
            if !dir.is_empty() {
                full.extend_from_slice(dir);
                full.push(b'/');
            }
            full.extend_from_slice(name);
            if snapshot.contains_name(&full) {
                continue;
            }

            let abs = join_rel(root, &full);
            let is_dir = match entry_kind(&arena, off) {
                FileKind::Dir => true,
                FileKind::File | FileKind::Symlink => false,
                FileKind::Unknown => fs::symlink_metadata(&abs)
                    .map(|md| md.is_dir())
                    .unwrap_or(false),
            };
            if stack.is_ignored(&rel_path(dir), &abs, is_dir) {
                continue;
            }

            flags.set_untracked_dirty();
            return;
        }
    }
}

/// Distinct parent directories of the shard's entries plus their
/// ancestors (the worktree root itself only when `include_root`).
///
/// Entries arrive sorted, so consecutive entries usually share a parent;
/// ancestor walking stops at the first directory already collected.
fn relevant_dirs<'s>(
    snapshot: &'s IndexSnapshot,
    range: Range<usize>,
    include_root: bool,
) -> Vec<&'s [u8]> {
    let mut seen: AHashSet<&[u8]> = AHashSet::new();
    let mut dirs: Vec<&[u8]> = Vec::new();
    let mut prev_parent: Option<&[u8]> = None;

    for entry in &snapshot.entries()[range] {
        let parent = parent_dir(snapshot.path(entry));
        if prev_parent == Some(parent) {
            continue;
        }
        prev_parent = Some(parent);

        let mut dir = parent;
        while !dir.is_empty() && seen.insert(dir) {
            dirs.push(dir);
            dir = parent_dir(dir);
        }
    }

    if include_root {
        dirs.push(b"");
    }
    // Deterministic listing order; also groups siblings for warm
    // dentry caches.
    dirs.sort_unstable();
    dirs
}

/// Bytes before the final `/`, or empty for a root-level path.
fn parent_dir(path: &[u8]) -> &[u8] {
    match memchr::memrchr(b'/', path) {
        Some(i) => &path[..i],
        None => b"",
    }
}

#[cfg(unix)]
fn path_bytes(path: &Path) -> &[u8] {
    use std::os::unix::ffi::OsStrExt;
    path.as_os_str().as_bytes()
}

#[cfg(unix)]
fn rel_path(bytes: &[u8]) -> PathBuf {
    use std::ffi::OsStr;
    use std::os::unix::ffi::OsStrExt;
    PathBuf::from(OsStr::from_bytes(bytes))
}

#[cfg(unix)]
fn join_rel(root: &Path, rel: &[u8]) -> PathBuf {
    use std::ffi::OsStr;
    use std::os::unix::ffi::OsStrExt;
    if rel.is_empty() {
        root.to_path_buf()
    } else {
        root.join(OsStr::from_bytes(rel))
    }
}

#[cfg(not(unix))]
fn path_bytes(path: &Path) -> &[u8] {
    path.to_str().map(str::as_bytes).unwrap_or(b"")
}

#[cfg(not(unix))]
fn rel_path(bytes: &[u8]) -> PathBuf {
    PathBuf::from(String::from_utf8_lossy(bytes).into_owned())
}

#[cfg(not(unix))]
fn join_rel(root: &Path, rel: &[u8]) -> PathBuf {
    if rel.is_empty() {
        root.to_path_buf()
    } else {
        root.join(String::from_utf8_lossy(rel).as_ref())
    }
}
