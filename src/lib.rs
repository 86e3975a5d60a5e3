//! Low-latency git working-tree status daemon.
//!
//! `statusd` answers "is this repository dirty" for interactive shell
//! prompts, where the answer must arrive in a few milliseconds even for
//! working trees with hundreds of thousands of tracked files. It is
//! pull-driven: a serial request loop reads one directory per request
//! and replies with a fixed-field record.
//!
//! High-level flow (single request):
//! 1. Resolve the directory to a cached repository handle.
//! 2. Answer the cheap reference questions (HEAD, branch, upstream,
//!    state) and kick tag resolution onto the worker pool.
//! 3. Acquire the immutable index snapshot, rebuilding only when the
//!    on-disk index changed.
//! 4. Decide staged with an early-exit tree/index walk; fan the
//!    unstaged/untracked scan across snapshot shards with early exit.
//! 5. Await the tag future and emit the response record atomically.
//!
//! The expensive parts are bounded: the worktree scan is skipped for
//! indexes above a configurable size (the affected fields report
//! *unknown*), and every shard stops early once its contribution is
//! redundant.
//!
//! Module map:
//! - [`stdx`]: byte arena and the packed directory lister.
//! - [`pool`]: fixed worker pool with caller-runs overflow.
//! - [`status`]: repository handle, snapshot, diff engine, caches.
//! - [`serve`]: request/response framing and the serial loop.
//! - [`options`], [`logging`], [`timer`]: daemon plumbing.

pub mod logging;
pub mod options;
pub mod pool;
pub mod serve;
pub mod status;
pub mod stdx;
pub mod timer;

pub use options::Options;
pub use pool::{PoolConfig, ThreadPool};
pub use status::{IndexStats, Repo, RepoCache, StatusError, Tribool};
