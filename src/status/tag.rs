//! Background tag-name resolution.
//!
//! Finding the tag that points at HEAD means enumerating and peeling the
//! whole tag namespace, which is too slow to sit on the request path for
//! tag-heavy repositories. The resolution therefore runs on the worker
//! pool, overlapping the diff scan, and the request awaits it as the
//! final response field.
//!
//! At most one resolution is in flight per repository: the repository's
//! secondary handle travels into the task and returns through the
//! one-shot channel together with the answer. The future is awaited on
//! the success path and drained by `Drop` on every other path, so no
//! background work outlives its request.
//!
//! Answers are cached keyed by (refs generation, commit id); the refs
//! generation is the stat identity of `packed-refs` and `refs/tags`.

use std::path::Path;
use std::sync::mpsc;
use std::time::SystemTime;

/// Stat identity of the refs database, coarse but cheap.
///
/// Loose tag creation touches `refs/tags`; `git pack-refs`, `fetch`, and
/// tag deletion touch `packed-refs`. Either mtime moving invalidates the
/// cached answer.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RefsSignature {
    packed_refs: Option<(SystemTime, u64)>,
    tags_dir: Option<SystemTime>,
}

impl RefsSignature {
    /// Reads the signature from a repository's common directory.
    #[must_use]
    pub fn read(common_dir: &Path) -> Self {
        let packed_refs = std::fs::metadata(common_dir.join("packed-refs"))
            .ok()
            .and_then(|md| md.modified().ok().map(|m| (m, md.len())));
        let tags_dir = std::fs::metadata(common_dir.join("refs").join("tags"))
            .ok()
            .and_then(|md| md.modified().ok());
        Self {
            packed_refs,
            tags_dir,
        }
    }
}

/// Cached result of the last resolution.
#[derive(Debug, Default)]
pub struct TagCache {
    key: Option<(RefsSignature, git2::Oid)>,
    name: String,
}

impl TagCache {
    /// Returns the cached name if it answers (`sig`, `oid`).
    #[must_use]
    pub fn lookup(&self, sig: RefsSignature, oid: git2::Oid) -> Option<&str> {
        match &self.key {
            Some((s, o)) if *s == sig && *o == oid => Some(&self.name),
            _ => None,
        }
    }

    /// Replaces the cached answer.
    pub fn store(&mut self, sig: RefsSignature, oid: git2::Oid, name: &str) {
        self.key = Some((sig, oid));
        self.name.clear();
        self.name.push_str(name);
    }
}

/// What a completed resolution hands back: the answer plus the repository
/// handle that computed it.
pub struct TagOutcome {
    /// Resolved tag name, empty when no tag points at the commit.
    pub name: String,
    /// The secondary repository handle, returned for reuse.
    pub repo: git2::Repository,
}

enum Inner {
    /// Answer known without background work.
    Ready(String),
    /// Resolution in flight on the pool.
    Pending {
        rx: mpsc::Receiver<TagOutcome>,
        key: (RefsSignature, git2::Oid),
    },
    /// Consumed by `wait`.
    Done,
}

/// One-shot future for a tag resolution.
///
/// Must not outlive its request: `wait` consumes it; dropping a pending
/// future blocks until the background task finishes (drain), upholding
/// the no-dangling-work rule on error paths.
pub struct TagFuture {
    inner: Inner,
}

/// Result of awaiting a [`TagFuture`].
pub struct TagResolution {
    /// Resolved name (possibly empty).
    pub name: String,
    /// Returned repository handle, when the resolution ran in the
    /// background and completed normally.
    pub repo: Option<git2::Repository>,
    /// Cache key, when the answer is worth caching.
    pub key: Option<(RefsSignature, git2::Oid)>,
}

impl TagFuture {
    /// A future that is already resolved.
    #[must_use]
    pub fn ready(name: String) -> Self {
        Self {
            inner: Inner::Ready(name),
        }
    }

    /// A future backed by an in-flight pool task.
    #[must_use]
    pub fn pending(rx: mpsc::Receiver<TagOutcome>, sig: RefsSignature, oid: git2::Oid) -> Self {
        Self {
            inner: Inner::Pending {
                rx,
                key: (sig, oid),
            },
        }
    }

    /// Blocks until the answer is available.
    ///
    /// A background task that died (panicked worker) yields the empty
    /// name and no cache entry.
    #[must_use]
    pub fn wait(mut self) -> TagResolution {
        match std::mem::replace(&mut self.inner, Inner::Done) {
            Inner::Ready(name) => TagResolution {
                name,
                repo: None,
                key: None,
            },
            Inner::Pending { rx, key } => match rx.recv() {
                Ok(outcome) => TagResolution {
                    name: outcome.name,
                    repo: Some(outcome.repo),
                    key: Some(key),
                },
                Err(_) => TagResolution {
                    name: String::new(),
                    repo: None,
                    key: None,
                },
            },
            Inner::Done => unreachable!("TagFuture waited twice"),
        }
    }
}

impl Drop for TagFuture {
    fn drop(&mut self) {
        if let Inner::Pending { rx, .. } = std::mem::replace(&mut self.inner, Inner::Done) {
            // Drain: block until the task completes so no background work
            // crosses the request boundary. The handle it carries is
            // dropped here; the owner reopens on next use.
            let _ = rx.recv();
        }
    }
}

/// Scans `refs/tags/*` for tags whose peeled target is `target`.
///
/// Annotated tags peel through to their commit; tags pointing at trees or
/// blobs never match. Ties break through [`tag_outranks`] so the answer
/// is deterministic regardless of ref iteration order.
#[must_use]
pub fn resolve_tag_name(repo: &git2::Repository, target: git2::Oid) -> String {
    let refs = match repo.references_glob("refs/tags/*") {
        Ok(refs) => refs,
        Err(_) => return String::new(),
    };

    let mut best = String::new();
    for reference in refs.flatten() {
        let Ok(commit) = reference.peel_to_commit() else {
            continue;
        };
        if commit.id() != target {
            continue;
        }
        if let Some(name) = reference.shorthand() {
            if best.is_empty() || tag_outranks(name, &best) {
                best.clear();
                best.push_str(name);
            }
        }
    }
    best
}

/// Deterministic tag ordering: byte-wise comparison with end-of-string
/// ranking above every byte, so a release name outranks its suffixed
/// variants (`v1.0` beats `v1.0-rc`).
fn tag_outranks(candidate: &str, best: &str) -> bool {
    let (a, b) = (candidate.as_bytes(), best.as_bytes());
    let common = a.len().min(b.len());
    for i in 0..common {
        if a[i] != b[i] {
            return a[i] > b[i];
        }
    }
    // Shared prefix: the shorter name ranks higher.
    a.len() < b.len()
}
