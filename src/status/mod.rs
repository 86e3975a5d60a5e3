//! Working-tree status pipeline.
//!
//! One request flows through these stages:
//! 1. `cache` resolves the request directory to an opened [`Repo`].
//! 2. `repo` answers the cheap reference questions (HEAD, branch,
//!    upstream, state, stashes) and schedules tag resolution (`tag`) on
//!    the worker pool.
//! 3. `snapshot` provides the immutable, sharded index view, rebuilt
//!    only when the on-disk index changed.
//! 4. `diff` decides staged on the request thread and fans the
//!    unstaged/untracked scan (`worktree`, filtered by `ignore`) across
//!    the pool with early exit.
//!
//! # Invariants
//! - Published snapshots are immutable and shared by `Arc` (no locks).
//! - Native handles never leave their `Repo`; the tag future is awaited
//!   or drained before the request ends.
//! - Outputs are deterministic for a quiescent working tree.

pub mod cache;
pub mod diff;
pub mod errors;
pub mod ignore;
pub mod repo;
pub mod snapshot;
pub mod tag;
mod worktree;

pub use cache::RepoCache;
pub use diff::{staged_changes, IndexStats, ScanFlags, ScanOptions, Tribool};
pub use errors::StatusError;
pub use ignore::IgnoreContext;
pub use repo::{HeadStatus, Repo, UpstreamStatus};
pub use snapshot::{IndexSignature, IndexSnapshot};
pub use tag::{resolve_tag_name, RefsSignature, TagFuture};
