//! Gitignore consultation for untracked detection.
//!
//! Shard workers must decide "is this name ignored" without touching the
//! repository handle (which is not shareable across threads). Matchers
//! from the `ignore` crate are immutable and `Sync`, so the global layers
//! are built once per repository and shared, while per-directory
//! `.gitignore` matchers are loaded lazily by each worker.
//!
//! Precedence follows git: the innermost `.gitignore` with a decisive
//! match wins, then `$GIT_DIR/info/exclude`, then `core.excludesFile`.
//! An ignored-but-tracked file is still scanned for staged/unstaged
//! changes; ignore rules only filter untracked candidates.

use std::path::{Path, PathBuf};

use ahash::AHashMap;
use ignore::gitignore::Gitignore;
use ignore::Match;

/// Shared, immutable ignore layers for one repository.
///
/// Holds the matchers that do not vary per directory. Built on the
/// request thread at repository open; read concurrently by workers.
#[derive(Debug)]
pub struct IgnoreContext {
    worktree_root: PathBuf,
    /// `info/exclude` first, then `core.excludesFile`; consulted in order
    /// after the `.gitignore` chain.
    global: Vec<Gitignore>,
}

impl IgnoreContext {
    /// Builds the global layers for a repository.
    ///
    /// Missing or unreadable exclude files contribute nothing; a broken
    /// pattern line is skipped the same way git skips it.
    #[must_use]
    pub fn new(worktree_root: &Path, common_dir: &Path, config: Option<&git2::Config>) -> Self {
        let mut global = Vec::with_capacity(2);

        let info_exclude = common_dir.join("info").join("exclude");
        if info_exclude.is_file() {
            global.push(build_file_matcher(worktree_root, &info_exclude));
        }

        if let Some(path) = excludes_file(config) {
            if path.is_file() {
                global.push(build_file_matcher(worktree_root, &path));
            }
        }

        Self {
            worktree_root: worktree_root.to_path_buf(),
            global,
        }
    }

    /// Worktree root all candidate paths are resolved against.
    #[inline]
    #[must_use]
    pub fn worktree_root(&self) -> &Path {
        &self.worktree_root
    }
}

/// Resolves `core.excludesFile`, honoring git's default location.
fn excludes_file(config: Option<&git2::Config>) -> Option<PathBuf> {
    if let Some(config) = config {
        if let Ok(path) = config.get_path("core.excludesfile") {
            return Some(path);
        }
    }
    // Default: $XDG_CONFIG_HOME/git/ignore, falling back to ~/.config.
    let base = std::env::var_os("XDG_CONFIG_HOME")
        .map(PathBuf::from)
        .or_else(|| std::env::var_os("HOME").map(|h| PathBuf::from(h).join(".config")))?;
    Some(base.join("git").join("ignore"))
}

/// Builds a matcher whose patterns come from `file` but whose root is the
/// worktree root (exclude files apply repo-wide, unlike `.gitignore`).
fn build_file_matcher(root: &Path, file: &Path) -> Gitignore {
    let mut builder = ignore::gitignore::GitignoreBuilder::new(root);
    // Returns an error only for unreadable files; partial parses keep
    // the valid lines, matching git.
    let _ = builder.add(file);
    builder.build().unwrap_or_else(|_| Gitignore::empty())
}

/// Per-worker ignore state: the shared context plus a lazy cache of
/// per-directory `.gitignore` matchers.
///
/// Not `Sync`; each shard task owns one.
pub struct IgnoreStack<'a> {
    ctx: &'a IgnoreContext,
    dir_matchers: AHashMap<PathBuf, Option<Gitignore>>,
}

impl<'a> IgnoreStack<'a> {
    /// Creates an empty stack over the shared context.
    #[must_use]
    pub fn new(ctx: &'a IgnoreContext) -> Self {
        Self {
            ctx,
            dir_matchers: AHashMap::new(),
        }
    }

    /// Decides whether the candidate at `abs_path` is ignored.
    ///
    /// `dir_rel` is the candidate's containing directory relative to the
    /// worktree root (empty for the root itself).
    pub fn is_ignored(&mut self, dir_rel: &Path, abs_path: &Path, is_dir: bool) -> bool {
        // Innermost .gitignore first: containing directory, then each
        // ancestor, up to and including the worktree root.
        let mut dir = Some(dir_rel);
        loop {
            let current = match dir {
                Some(d) => self.ctx.worktree_root().join(d),
                None => break,
            };
            if let Some(matcher) = self.matcher_for(current) {
                match matcher.matched_path_or_any_parents(abs_path, is_dir) {
                    Match::Ignore(_) => return true,
                    Match::Whitelist(_) => return false,
                    Match::None => {}
                }
            }
            dir = match dir {
                Some(d) if !d.as_os_str().is_empty() => d.parent(),
                _ => None,
            };
        }

        for matcher in &self.ctx.global {
            match matcher.matched_path_or_any_parents(abs_path, is_dir) {
                Match::Ignore(_) => return true,
                Match::Whitelist(_) => return false,
                Match::None => {}
            }
        }
        false
    }

    fn matcher_for(&mut self, dir_abs: PathBuf) -> Option<&Gitignore> {
        self.dir_matchers
            .entry(dir_abs)
            .or_insert_with_key(|dir| {
                let file = dir.join(".gitignore");
                if file.is_file() {
                    let (matcher, _err) = Gitignore::new(&file);
                    Some(matcher)
                } else {
                    None
                }
            })
            .as_ref()
    }
}
