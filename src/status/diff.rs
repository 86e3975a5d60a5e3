//! Three-answer diff engine: staged, unstaged, untracked.
//!
//! One request produces three booleans from a single pass over the data:
//!
//! 1. **Staged** — HEAD's tree and the sorted index walked side-by-side
//!    on the request thread; the first differing path, id, or mode ends
//!    the walk. Conflicted or intent-to-add entries answer immediately.
//! 2. **Unstaged / untracked** — the snapshot's shards fan out across the
//!    worker pool ([`scan_shard`]); results merge into shared atomic
//!    flags with a monotone `clean < unknown < dirty` lattice, and
//!    workers short-circuit once both worktree answers are dirty.
//!
//! The scheduler always joins every shard before reading the flags, so
//! the aggregate is deterministic for a quiescent tree.

use std::ops::Range;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;

use crossbeam_utils::sync::WaitGroup;

use crate::pool::ThreadPool;
use crate::status::errors::StatusError;
use crate::status::ignore::IgnoreContext;
use crate::status::snapshot::IndexSnapshot;
use crate::status::worktree::scan_shard;

/// Per-repository comparison settings read from git config.
#[derive(Clone, Copy, Debug)]
pub struct ScanOptions {
    /// `core.fileMode`: whether the executable bit on disk is
    /// trustworthy. False on filesystems that do not preserve
    /// permission bits; exec-bit differences are then not changes.
    pub trust_filemode: bool,
}

impl Default for ScanOptions {
    fn default() -> Self {
        Self {
            trust_filemode: true,
        }
    }
}

/// A yes/no answer that may be unknown when the scan was cut short.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Tribool {
    /// The scan could not determine the answer (budget or I/O failure).
    Unknown,
    /// Determined: no.
    False,
    /// Determined: yes.
    True,
}

impl Tribool {
    /// Wire encoding: `-1`, `0`, or `1`.
    #[inline]
    #[must_use]
    pub fn as_protocol(self) -> &'static str {
        match self {
            Self::Unknown => "-1",
            Self::False => "0",
            Self::True => "1",
        }
    }
}

/// Aggregate status of one request's scan.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct IndexStats {
    /// Index differs from HEAD.
    pub has_staged: bool,
    /// Working tree differs from the index.
    pub has_unstaged: Tribool,
    /// At least one untracked, unignored file exists.
    pub has_untracked: Tribool,
}

impl IndexStats {
    /// Stats for an over-budget index: staged is still answered, the
    /// worktree questions are not.
    #[must_use]
    pub fn worktree_unknown(has_staged: bool) -> Self {
        Self {
            has_staged,
            has_unstaged: Tribool::Unknown,
            has_untracked: Tribool::Unknown,
        }
    }
}

// Flag lattice values; merged with `fetch_max`.
const CLEAN: u8 = 0;
const UNKNOWN: u8 = 1;
const DIRTY: u8 = 2;

/// Shared result flags for the sharded worktree scan.
///
/// Written by workers with relaxed ordering; the join (`WaitGroup`)
/// orders the final read. Values only move up the lattice, so a dirty
/// verdict can never be lost to a racing unknown.
#[derive(Debug, Default)]
pub struct ScanFlags {
    unstaged: AtomicU8,
    untracked: AtomicU8,
}

impl ScanFlags {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Records an unstaged difference.
    #[inline]
    pub fn set_unstaged_dirty(&self) {
        self.unstaged.fetch_max(DIRTY, Ordering::Relaxed);
    }

    /// Downgrades the unstaged answer after a shard-local failure.
    #[inline]
    pub fn set_unstaged_unknown(&self) {
        self.unstaged.fetch_max(UNKNOWN, Ordering::Relaxed);
    }

    /// Records an untracked file.
    #[inline]
    pub fn set_untracked_dirty(&self) {
        self.untracked.fetch_max(DIRTY, Ordering::Relaxed);
    }

    /// Downgrades the untracked answer after a shard-local failure.
    #[inline]
    pub fn set_untracked_unknown(&self) {
        self.untracked.fetch_max(UNKNOWN, Ordering::Relaxed);
    }

    /// True once the untracked answer is dirty (no more listing needed).
    #[inline]
    #[must_use]
    pub fn untracked_is_dirty(&self) -> bool {
        self.untracked.load(Ordering::Relaxed) == DIRTY
    }

    /// True once both worktree answers are dirty; remaining shard work is
    /// redundant.
    #[inline]
    #[must_use]
    pub fn fully_dirty(&self) -> bool {
        self.unstaged.load(Ordering::Relaxed) == DIRTY
            && self.untracked.load(Ordering::Relaxed) == DIRTY
    }

    fn tribool(value: u8) -> Tribool {
        match value {
            CLEAN => Tribool::False,
            UNKNOWN => Tribool::Unknown,
            _ => Tribool::True,
        }
    }

    /// Final unstaged answer; read after the join.
    #[must_use]
    pub fn unstaged(&self) -> Tribool {
        Self::tribool(self.unstaged.load(Ordering::Relaxed))
    }

    /// Final untracked answer; read after the join.
    #[must_use]
    pub fn untracked(&self) -> Tribool {
        Self::tribool(self.untracked.load(Ordering::Relaxed))
    }
}

/// Decides whether the index differs from HEAD's tree.
///
/// Side-by-side walk in index order with early exit on the first
/// difference. `head` is `None` for an unborn branch, where any index
/// entry at all is a staged change.
pub fn staged_changes(
    repo: &git2::Repository,
    head: Option<git2::Oid>,
    snapshot: &IndexSnapshot,
) -> Result<bool, StatusError> {
    if snapshot.has_conflicts_or_ita() {
        return Ok(true);
    }
    let Some(head) = head else {
        return Ok(!snapshot.is_empty());
    };

    let tree = repo.find_commit(head)?.tree()?;
    let mut cursor = 0usize;
    let mut prefix = Vec::with_capacity(256);
    if walk_tree(repo, &tree, &mut prefix, snapshot, &mut cursor)? {
        return Ok(true);
    }
    // Leftover index entries exist in the index but not in HEAD.
    Ok(cursor != snapshot.len())
}

/// Recursive side-by-side compare of one tree level.
///
/// Tree entries arrive in git's stored order, which matches the sorted
/// index order (directories sort with an implicit trailing slash), so a
/// single cursor over the snapshot suffices.
fn walk_tree(
    repo: &git2::Repository,
    tree: &git2::Tree<'_>,
    prefix: &mut Vec<u8>,
    snapshot: &IndexSnapshot,
    cursor: &mut usize,
) -> Result<bool, StatusError> {
    for entry in tree.iter() {
        match entry.kind() {
            Some(git2::ObjectType::Tree) => {
                let sub = repo.find_tree(entry.id())?;
                let mark = prefix.len();
                prefix.extend_from_slice(entry.name_bytes());
                prefix.push(b'/');
                let differs = walk_tree(repo, &sub, prefix, snapshot, cursor)?;
                prefix.truncate(mark);
                if differs {
                    return Ok(true);
                }
            }
            // Blobs and gitlinks (submodule commits) compare the same
            // way: path, id, mode.
            Some(git2::ObjectType::Blob) | Some(git2::ObjectType::Commit) => {
                let mark = prefix.len();
                prefix.extend_from_slice(entry.name_bytes());
                let differs = compare_at_cursor(prefix, &entry, snapshot, cursor);
                prefix.truncate(mark);
                if differs {
                    return Ok(true);
                }
            }
            _ => {}
        }
    }
    Ok(false)
}

fn compare_at_cursor(
    path: &[u8],
    entry: &git2::TreeEntry<'_>,
    snapshot: &IndexSnapshot,
    cursor: &mut usize,
) -> bool {
    let entries = snapshot.entries();
    if *cursor < entries.len() {
        let indexed = &entries[*cursor];
        let indexed_path = snapshot.path(indexed);
        if indexed_path < path {
            // Present in the index, absent from HEAD: staged addition.
            return true;
        }
        if indexed_path == path {
            *cursor += 1;
            return indexed.id != entry.id() || indexed.mode != entry.filemode() as u32;
        }
    }
    // Present in HEAD, absent from the index: staged deletion.
    true
}

/// Runs the sharded worktree scan and returns (unstaged, untracked).
///
/// Every shard is submitted to the pool and joined before the flags are
/// read. An empty index still scans the worktree root so untracked files
/// in a pathless repository are found.
pub fn scan_worktree(
    snapshot: &Arc<IndexSnapshot>,
    ignores: &Arc<IgnoreContext>,
    options: ScanOptions,
    pool: &ThreadPool,
) -> (Tribool, Tribool) {
    let flags = Arc::new(ScanFlags::new());

    if snapshot.shards().is_empty() {
        // One root listing; not worth a pool round trip.
        scan_shard(snapshot, 0..0, &flags, ignores, options, true);
    } else {
        let wg = WaitGroup::new();
        for (i, shard) in snapshot.shards().iter().enumerate() {
            let snapshot = Arc::clone(snapshot);
            let ignores = Arc::clone(ignores);
            let flags = Arc::clone(&flags);
            let wg = wg.clone();
            let range: Range<usize> = shard.clone();
            pool.submit(move || {
                scan_shard(&snapshot, range, &flags, &ignores, options, i == 0);
                drop(wg);
            });
        }
        wg.wait();
    }

    (flags.unstaged(), flags.untracked())
}
