//! Immutable, sharded view of the on-disk index.
//!
//! A snapshot is built once from the library's index object, published
//! behind an `Arc`, and read concurrently by shard workers without
//! synchronization. Paths live in a byte arena; entries carry offsets
//! plus the cached stat fields needed for the worktree comparison.
//!
//! # Invariants
//! - Entries are sorted lexicographically by path bytes (stage breaks
//!   ties), matching both git index order and depth-first tree order.
//! - Shards are disjoint, contiguous, covering, and never split a
//!   top-level directory. Shard count targets `2 ×` the worker count.
//! - A published snapshot is never mutated; staleness is detected by
//!   re-statting the index file and comparing signatures.

use std::ops::Range;
use std::path::Path;
use std::time::{SystemTime, UNIX_EPOCH};

use crate::stdx::{ByteArena, ByteRef};

// git index entry flag bits (16-bit `flags` word).
const FLAG_STAGE_MASK: u16 = 0x3000;
const FLAG_ASSUME_UNCHANGED: u16 = 0x8000;
// Extended flag bits (16-bit `flags_extended` word).
const EXT_INTENT_TO_ADD: u16 = 1 << 13;
const EXT_SKIP_WORKTREE: u16 = 1 << 14;

// File type bits of the index `mode` word.
const MODE_TYPE_MASK: u32 = 0o170000;
const MODE_SYMLINK: u32 = 0o120000;
const MODE_GITLINK: u32 = 0o160000;
const MODE_EXEC_BIT: u32 = 0o111;

/// One tracked path with its cached stat fields.
#[derive(Clone, Copy, Debug)]
pub struct Entry {
    path: ByteRef,
    /// Object id recorded for the staged content.
    pub id: git2::Oid,
    /// Mode bits (file type + permissions).
    pub mode: u32,
    /// Cached stat: mtime seconds/nanoseconds.
    pub mtime: (i32, u32),
    /// Cached stat: ctime seconds/nanoseconds.
    pub ctime: (i32, u32),
    /// Cached stat: device.
    pub dev: u32,
    /// Cached stat: inode.
    pub ino: u32,
    /// Cached stat: owner uid.
    pub uid: u32,
    /// Cached stat: owner gid.
    pub gid: u32,
    /// Cached stat: size (truncated to 32 bits, as stored on disk).
    pub size: u32,
    flags: u8,
}

impl Entry {
    const F_ASSUME_UNCHANGED: u8 = 1;
    const F_SKIP_WORKTREE: u8 = 1 << 1;
    const F_INTENT_TO_ADD: u8 = 1 << 2;
    const F_CONFLICTED: u8 = 1 << 3;

    fn from_git(raw: &git2::IndexEntry, path: ByteRef) -> Self {
        let stage = (raw.flags & FLAG_STAGE_MASK) != 0;
        let mut flags = 0u8;
        if raw.flags & FLAG_ASSUME_UNCHANGED != 0 {
            flags |= Self::F_ASSUME_UNCHANGED;
        }
        if raw.flags_extended & EXT_SKIP_WORKTREE != 0 {
            flags |= Self::F_SKIP_WORKTREE;
        }
        if raw.flags_extended & EXT_INTENT_TO_ADD != 0 {
            flags |= Self::F_INTENT_TO_ADD;
        }
        if stage {
            flags |= Self::F_CONFLICTED;
        }
        Self {
            path,
            id: raw.id,
            mode: raw.mode,
            mtime: (raw.mtime.seconds(), raw.mtime.nanoseconds()),
            ctime: (raw.ctime.seconds(), raw.ctime.nanoseconds()),
            dev: raw.dev,
            ino: raw.ino,
            uid: raw.uid,
            gid: raw.gid,
            size: raw.file_size,
            flags,
        }
    }

    /// Marked assume-unchanged (`git update-index --assume-unchanged`).
    #[inline]
    #[must_use]
    pub fn assume_unchanged(&self) -> bool {
        self.flags & Self::F_ASSUME_UNCHANGED != 0
    }

    /// Marked skip-worktree (sparse checkout).
    #[inline]
    #[must_use]
    pub fn skip_worktree(&self) -> bool {
        self.flags & Self::F_SKIP_WORKTREE != 0
    }

    /// Added with `git add --intent-to-add`.
    #[inline]
    #[must_use]
    pub fn intent_to_add(&self) -> bool {
        self.flags & Self::F_INTENT_TO_ADD != 0
    }

    /// Conflict stage entry (merge in progress).
    #[inline]
    #[must_use]
    pub fn conflicted(&self) -> bool {
        self.flags & Self::F_CONFLICTED != 0
    }

    /// Gitlink entry: a submodule recorded by its HEAD commit id.
    #[inline]
    #[must_use]
    pub fn is_submodule(&self) -> bool {
        self.mode & MODE_TYPE_MASK == MODE_GITLINK
    }

    /// Symbolic link entry.
    #[inline]
    #[must_use]
    pub fn is_symlink(&self) -> bool {
        self.mode & MODE_TYPE_MASK == MODE_SYMLINK
    }

    /// Any execute bit set in the recorded mode.
    #[inline]
    #[must_use]
    pub fn is_executable(&self) -> bool {
        self.mode & MODE_EXEC_BIT != 0
    }
}

/// Identity of the on-disk index file, used to detect staleness.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct IndexSignature {
    /// Modification time as (seconds, nanoseconds) since the epoch.
    pub mtime: (i64, u32),
    /// File size in bytes.
    pub size: u64,
}

impl IndexSignature {
    /// Stats the index file. `None` when it does not exist (a fresh
    /// repository before the first `git add`) or cannot be statted; an
    /// unreadable signature simply forces a rebuild.
    #[must_use]
    pub fn read(index_path: &Path) -> Option<Self> {
        let md = std::fs::metadata(index_path).ok()?;
        let mtime = md.modified().ok()?;
        Some(Self {
            mtime: system_time_parts(mtime),
            size: md.len(),
        })
    }
}

fn system_time_parts(t: SystemTime) -> (i64, u32) {
    match t.duration_since(UNIX_EPOCH) {
        Ok(d) => (d.as_secs() as i64, d.subsec_nanos()),
        // Pre-epoch mtimes only appear on clock-skewed filesystems; the
        // exact value only matters for equality and racy comparisons.
        Err(e) => (-(e.duration().as_secs() as i64), 0),
    }
}

/// Immutable, lexicographically sorted index snapshot partitioned into
/// shards for parallel scanning.
#[derive(Debug)]
pub struct IndexSnapshot {
    arena: ByteArena,
    entries: Vec<Entry>,
    shards: Vec<Range<usize>>,
    signature: Option<IndexSignature>,
    has_conflicts_or_ita: bool,
}

impl IndexSnapshot {
    /// Builds a snapshot from the library's index object.
    ///
    /// `signature` is the stat identity of the index file at read time;
    /// `workers` sizes the shard target (`entries / (2 × workers)`).
    #[must_use]
    pub fn build(index: &git2::Index, signature: Option<IndexSignature>, workers: usize) -> Self {
        let count = index.len();
        let mut arena = ByteArena::with_capacity(count * 32);
        let mut entries = Vec::with_capacity(count);
        let mut has_conflicts_or_ita = false;

        for raw in index.iter() {
            let path = arena.intern(&raw.path);
            let entry = Entry::from_git(&raw, path);
            has_conflicts_or_ita |= entry.conflicted() || entry.intent_to_add();
            entries.push(entry);
        }

        // libgit2 hands entries back sorted, but the scan correctness
        // depends on it, so sort rather than trust.
        entries.sort_unstable_by(|a, b| arena.get(a.path).cmp(arena.get(b.path)));

        let shards = compute_shards(&arena, &entries, workers);

        Self {
            arena,
            entries,
            shards,
            signature,
            has_conflicts_or_ita,
        }
    }

    /// Number of index entries.
    #[inline]
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// True for an empty index.
    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// All entries in sorted order.
    #[inline]
    #[must_use]
    pub fn entries(&self) -> &[Entry] {
        &self.entries
    }

    /// Path bytes for an entry (forward-slash separated, no leading slash).
    #[inline]
    #[must_use]
    pub fn path(&self, entry: &Entry) -> &[u8] {
        self.arena.get(entry.path)
    }

    /// Shard ranges. Empty for an empty index.
    #[inline]
    #[must_use]
    pub fn shards(&self) -> &[Range<usize>] {
        &self.shards
    }

    /// Stat identity of the index file this snapshot was built from.
    #[inline]
    #[must_use]
    pub fn signature(&self) -> Option<IndexSignature> {
        self.signature
    }

    /// Whether any entry is conflicted or intent-to-add; either forces
    /// the staged answer without a tree walk.
    #[inline]
    #[must_use]
    pub fn has_conflicts_or_ita(&self) -> bool {
        self.has_conflicts_or_ita
    }

    /// True when `name` is tracked: an exact entry match, or a directory
    /// prefix of at least one entry (`name + "/"`).
    ///
    /// Binary search over the full snapshot; used by untracked detection
    /// for names returned by directory listings. The prefix test needs
    /// its own search: a sibling such as `src/foo.rs` sorts between
    /// `src/foo` and `src/foo/…` (`.` < `/`), so the entry right after
    /// `name` is not necessarily the directory's first child.
    #[must_use]
    pub fn contains_name(&self, name: &[u8]) -> bool {
        let idx = self
            .entries
            .partition_point(|e| self.arena.get(e.path) < name);
        if idx < self.entries.len() && self.arena.get(self.entries[idx].path) == name {
            return true;
        }

        let idx = self
            .entries
            .partition_point(|e| precedes_dir_prefix(self.arena.get(e.path), name));
        if idx == self.entries.len() {
            return false;
        }
        let candidate = self.arena.get(self.entries[idx].path);
        candidate.len() > name.len()
            && candidate.starts_with(name)
            && candidate[name.len()] == b'/'
    }

    /// An entry is "racy" when its cached mtime is not strictly older
    /// than the index file itself (or was zeroed by tooling); a clean
    /// stat comparison is then inconclusive and content must be hashed.
    #[must_use]
    pub fn entry_is_racy(&self, entry: &Entry) -> bool {
        if entry.mtime.0 == 0 && entry.mtime.1 == 0 {
            return true;
        }
        match self.signature {
            Some(sig) => (entry.mtime.0 as i64, entry.mtime.1) >= sig.mtime,
            None => true,
        }
    }
}

/// True when `path` sorts strictly before `name + "/"`, without
/// materializing the concatenation.
fn precedes_dir_prefix(path: &[u8], name: &[u8]) -> bool {
    let common = path.len().min(name.len());
    for i in 0..common {
        if path[i] != name[i] {
            return path[i] < name[i];
        }
    }
    if path.len() <= name.len() {
        // `path` is `name` itself or a proper prefix of it; either way
        // it sorts before `name + "/"`.
        return true;
    }
    path[name.len()] < b'/'
}

/// Leading path component (bytes before the first `/`), or the whole
/// path for a root-level file.
fn top_dir(path: &[u8]) -> &[u8] {
    match memchr::memchr(b'/', path) {
        Some(i) => &path[..i],
        None => path,
    }
}

/// Computes shard boundaries: a new shard begins once the current one
/// has reached the target size *and* the top-level directory changes, so
/// no top-level directory is split across shards.
fn compute_shards(arena: &ByteArena, entries: &[Entry], workers: usize) -> Vec<Range<usize>> {
    assert!(workers > 0, "workers must be > 0");
    if entries.is_empty() {
        return Vec::new();
    }
    let target = (entries.len() / (2 * workers)).max(1);

    let mut shards = Vec::with_capacity(2 * workers + 1);
    let mut start = 0usize;
    for i in 1..entries.len() {
        if i - start >= target {
            let prev = top_dir(arena.get(entries[i - 1].path));
            let cur = top_dir(arena.get(entries[i].path));
            if prev != cur {
                shards.push(start..i);
                start = i;
            }
        }
    }
    shards.push(start..entries.len());

    debug_assert_eq!(shards.first().map(|s| s.start), Some(0));
    debug_assert_eq!(shards.last().map(|s| s.end), Some(entries.len()));
    shards
}
