//! Repository handle: one opened repository plus its cached scan state.
//!
//! A `Repo` owns every native resource for one working tree: the primary
//! library handle (request-thread only), a secondary handle reserved for
//! background tag resolution, and the current index snapshot. Handles
//! never escape the `Repo`; the snapshot is shared out behind an `Arc`
//! and swapped atomically on rebuild, so in-flight shard tasks keep a
//! consistent view (publish-then-read, never mutate).
//!
//! # Failure Modes
//! - Paths outside any working tree open as `NotARepository`.
//! - Bare repositories are rejected; there is no worktree to scan.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::mpsc;
use std::sync::Arc;
use std::time::Instant;

use crate::pool::ThreadPool;
use crate::status::diff::{scan_worktree, staged_changes, IndexStats, ScanOptions};
use crate::status::errors::StatusError;
use crate::status::ignore::IgnoreContext;
use crate::status::snapshot::{IndexSignature, IndexSnapshot};
use crate::status::tag::{resolve_tag_name, RefsSignature, TagCache, TagFuture, TagOutcome};

/// Where HEAD points right now.
#[derive(Clone, Debug)]
pub struct HeadStatus {
    /// Commit id, `None` on an unborn branch.
    pub commit: Option<git2::Oid>,
    /// Local branch short name, empty when detached.
    pub branch: String,
    /// Full refname (`refs/heads/...`) when on a branch.
    pub refname: Option<String>,
}

/// Upstream tracking information for the current branch.
#[derive(Clone, Debug, Default)]
pub struct UpstreamStatus {
    /// Upstream short name (`origin/main`), empty when untracked.
    pub name: String,
    /// URL of the upstream's remote, empty when unknown.
    pub remote_url: String,
    /// Upstream tip commit.
    pub commit: Option<git2::Oid>,
}

/// An opened repository with cached scan state.
pub struct Repo {
    git: git2::Repository,
    workdir: PathBuf,
    common_dir: PathBuf,
    snapshot: Option<Arc<IndexSnapshot>>,
    ignores: Arc<IgnoreContext>,
    scan_options: ScanOptions,
    tag_repo: Option<git2::Repository>,
    tag_cache: TagCache,
    last_used: Instant,
}

impl Repo {
    /// Opens the repository containing `dir`.
    ///
    /// Discovery walks upward from `dir`, so any path inside a working
    /// tree resolves to that tree's repository; a path inside a
    /// submodule resolves to the submodule (innermost wins).
    ///
    /// # Errors
    ///
    /// `NotARepository` when no repository contains `dir`;
    /// `BareRepository` for repositories without a working tree.
    pub fn open(dir: &Path) -> Result<Self, StatusError> {
        let git = git2::Repository::open_ext(
            dir,
            git2::RepositoryOpenFlags::empty(),
            &[] as &[&std::ffi::OsStr],
        )
        .map_err(StatusError::from_open)?;

        let workdir = git
            .workdir()
            .ok_or(StatusError::BareRepository)?
            .to_path_buf();
        let common_dir = resolve_common_dir(git.path());

        let config = git.config().ok();
        let ignores = Arc::new(IgnoreContext::new(&workdir, &common_dir, config.as_ref()));
        let scan_options = ScanOptions {
            // core.fileMode is written by `git init` after probing the
            // filesystem; absent means trustworthy, per git.
            trust_filemode: config
                .as_ref()
                .and_then(|c| c.get_bool("core.filemode").ok())
                .unwrap_or(true),
        };

        Ok(Self {
            git,
            workdir,
            common_dir,
            snapshot: None,
            ignores,
            scan_options,
            tag_repo: None,
            tag_cache: TagCache::default(),
            last_used: Instant::now(),
        })
    }

    /// The underlying library handle (request thread only).
    #[inline]
    #[must_use]
    pub fn git(&self) -> &git2::Repository {
        &self.git
    }

    /// Working tree root.
    #[inline]
    #[must_use]
    pub fn workdir(&self) -> &Path {
        &self.workdir
    }

    /// Marks the handle as used now.
    pub fn touch(&mut self) {
        self.last_used = Instant::now();
    }

    /// Time of the last request served by this handle.
    #[must_use]
    pub fn last_used(&self) -> Instant {
        self.last_used
    }

    /// Resolves HEAD, tolerating the unborn-branch case of a fresh
    /// repository (commit absent, branch name taken from the symbolic
    /// target).
    pub fn head_status(&self) -> Result<HeadStatus, StatusError> {
        match self.git.head() {
            Ok(head) => {
                let commit = head.target();
                if head.is_branch() {
                    Ok(HeadStatus {
                        commit,
                        branch: head.shorthand().unwrap_or("").to_string(),
                        refname: head.name().map(str::to_string),
                    })
                } else {
                    Ok(HeadStatus {
                        commit,
                        branch: String::new(),
                        refname: None,
                    })
                }
            }
            Err(err)
                if err.code() == git2::ErrorCode::UnbornBranch
                    || err.code() == git2::ErrorCode::NotFound =>
            {
                let head_ref = self.git.find_reference("HEAD")?;
                let branch = head_ref
                    .symbolic_target()
                    .and_then(|t| t.strip_prefix("refs/heads/"))
                    .unwrap_or("")
                    .to_string();
                Ok(HeadStatus {
                    commit: None,
                    branch,
                    refname: None,
                })
            }
            Err(err) => Err(err.into()),
        }
    }

    /// Upstream of the current branch, or the empty default when the
    /// branch tracks nothing.
    #[must_use]
    pub fn upstream_status(&self, head: &HeadStatus) -> UpstreamStatus {
        let Some(refname) = head.refname.as_deref() else {
            return UpstreamStatus::default();
        };
        let upstream_buf = match self.git.branch_upstream_name(refname) {
            Ok(buf) => buf,
            Err(_) => return UpstreamStatus::default(),
        };
        let Some(upstream_ref) = upstream_buf.as_str() else {
            return UpstreamStatus::default();
        };

        let name = upstream_ref
            .strip_prefix("refs/remotes/")
            .or_else(|| upstream_ref.strip_prefix("refs/heads/"))
            .unwrap_or(upstream_ref)
            .to_string();
        let commit = self
            .git
            .find_reference(upstream_ref)
            .ok()
            .and_then(|r| r.target());
        let remote_url = self
            .git
            .branch_remote_name(upstream_ref)
            .ok()
            .and_then(|buf| buf.as_str().map(str::to_string))
            // "." marks a local-branch upstream; it has no remote URL.
            .filter(|remote| remote != ".")
            .and_then(|remote| {
                self.git
                    .find_remote(&remote)
                    .ok()
                    .and_then(|r| r.url().map(str::to_string))
            })
            .unwrap_or_default();

        UpstreamStatus {
            name,
            remote_url,
            commit,
        }
    }

    /// Commits ahead of / behind the upstream tip. `(0, 0)` without an
    /// upstream, mirroring the wire format's defaults.
    #[must_use]
    pub fn ahead_behind(&self, head: Option<git2::Oid>, upstream: Option<git2::Oid>) -> (usize, usize) {
        match (head, upstream) {
            (Some(local), Some(remote)) => {
                self.git.graph_ahead_behind(local, remote).unwrap_or((0, 0))
            }
            _ => (0, 0),
        }
    }

    /// In-progress operation, as the wire format spells it.
    #[must_use]
    pub fn state_str(&self) -> &'static str {
        use git2::RepositoryState as S;
        match self.git.state() {
            S::Clean => "",
            S::Merge => "merge",
            S::Revert | S::RevertSequence => "revert",
            S::CherryPick | S::CherryPickSequence => "cherry-pick",
            S::Bisect => "bisect",
            S::Rebase | S::RebaseInteractive | S::RebaseMerge => "rebase",
            S::ApplyMailbox | S::ApplyMailboxOrRebase => "apply-mailbox",
        }
    }

    /// Number of stash entries.
    pub fn num_stashes(&mut self) -> usize {
        let mut count = 0usize;
        let result = self.git.stash_foreach(|_, _, _| {
            count += 1;
            true
        });
        if let Err(err) = result {
            tracing::warn!(%err, "stash enumeration failed");
        }
        count
    }

    /// Runs the diff engine under the configured work budget.
    ///
    /// Indexes larger than `dirty_max_index_size` answer staged only;
    /// the worktree questions come back unknown (budget, not error).
    pub fn index_stats(
        &mut self,
        head: Option<git2::Oid>,
        dirty_max_index_size: usize,
        pool: &ThreadPool,
    ) -> Result<IndexStats, StatusError> {
        let snapshot = self.current_snapshot(pool.workers())?;
        let has_staged = staged_changes(&self.git, head, &snapshot)?;

        if snapshot.len() > dirty_max_index_size {
            tracing::debug!(
                entries = snapshot.len(),
                budget = dirty_max_index_size,
                "index over budget; skipping worktree scan"
            );
            return Ok(IndexStats::worktree_unknown(has_staged));
        }

        let (has_unstaged, has_untracked) =
            scan_worktree(&snapshot, &self.ignores, self.scan_options, pool);
        Ok(IndexStats {
            has_staged,
            has_unstaged,
            has_untracked,
        })
    }

    /// Returns the current snapshot, rebuilding when the on-disk index
    /// changed since the last build (stat signature comparison).
    fn current_snapshot(&mut self, workers: usize) -> Result<Arc<IndexSnapshot>, StatusError> {
        let index_path = self.git.path().join("index");
        let signature = IndexSignature::read(&index_path);

        let stale = match &self.snapshot {
            Some(snapshot) => snapshot.signature() != signature,
            None => true,
        };
        if stale {
            let mut index = self.git.index()?;
            index.read(false)?;
            let built = IndexSnapshot::build(&index, signature, workers);
            tracing::debug!(entries = built.len(), shards = built.shards().len(), "index snapshot rebuilt");
            self.snapshot = Some(Arc::new(built));
        }

        Ok(Arc::clone(self.snapshot.as_ref().unwrap_or_else(|| {
            unreachable!("snapshot present after refresh")
        })))
    }

    /// Diagnostic view of the current snapshot, if one has been built.
    #[must_use]
    pub fn snapshot_info(&self) -> Option<(usize, usize)> {
        self.snapshot
            .as_ref()
            .map(|s| (s.len(), s.shards().len()))
    }

    /// Starts (or short-circuits) tag-name resolution for `commit`.
    ///
    /// Returns immediately; a cache hit or a missing commit yields a
    /// ready future, otherwise the secondary handle travels to the pool.
    /// At most one resolution per repo is in flight because the handle
    /// is taken, not cloned.
    pub fn tag_name(&mut self, commit: Option<git2::Oid>, pool: &ThreadPool) -> TagFuture {
        let Some(oid) = commit else {
            return TagFuture::ready(String::new());
        };

        let sig = RefsSignature::read(&self.common_dir);
        if let Some(name) = self.tag_cache.lookup(sig, oid) {
            return TagFuture::ready(name.to_string());
        }

        let repo = match self.tag_repo.take() {
            Some(repo) => repo,
            None => match git2::Repository::open(&self.workdir) {
                Ok(repo) => repo,
                Err(err) => {
                    tracing::warn!(%err, "tag resolver could not reopen repository");
                    return TagFuture::ready(String::new());
                }
            },
        };

        let (tx, rx) = mpsc::channel();
        pool.submit(move || {
            let name = resolve_tag_name(&repo, oid);
            // The receiver may already be dropped on an error path; the
            // handle is then released here, on the worker.
            let _ = tx.send(TagOutcome { name, repo });
        });
        TagFuture::pending(rx, sig, oid)
    }

    /// Awaits a tag future, restoring the secondary handle and caching
    /// the answer.
    pub fn finish_tag(&mut self, future: TagFuture) -> String {
        let resolution = future.wait();
        if let Some(repo) = resolution.repo {
            self.tag_repo = Some(repo);
        }
        if let Some((sig, oid)) = resolution.key {
            self.tag_cache.store(sig, oid, &resolution.name);
        }
        resolution.name
    }
}

/// Resolves the common directory for a git directory.
///
/// Linked worktrees keep shared data (refs, packed-refs) in the main
/// repository's git directory, pointed to by a `commondir` file.
fn resolve_common_dir(git_dir: &Path) -> PathBuf {
    let commondir_file = git_dir.join("commondir");
    let Ok(bytes) = fs::read(&commondir_file) else {
        return git_dir.to_path_buf();
    };

    let mut path_bytes = bytes.as_slice();
    while path_bytes
        .last()
        .is_some_and(|b| *b == b'\n' || *b == b'\r')
    {
        path_bytes = &path_bytes[..path_bytes.len() - 1];
    }
    if path_bytes.is_empty() {
        return git_dir.to_path_buf();
    }

    let pointed = bytes_to_path(path_bytes);
    let resolved = if pointed.is_absolute() {
        pointed
    } else {
        git_dir.join(pointed)
    };
    fs::canonicalize(&resolved).unwrap_or(resolved)
}

#[cfg(unix)]
fn bytes_to_path(bytes: &[u8]) -> PathBuf {
    use std::os::unix::ffi::OsStrExt;
    PathBuf::from(std::ffi::OsStr::from_bytes(bytes))
}

#[cfg(not(unix))]
fn bytes_to_path(bytes: &[u8]) -> PathBuf {
    PathBuf::from(String::from_utf8_lossy(bytes).into_owned())
}
