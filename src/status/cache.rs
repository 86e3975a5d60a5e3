//! Process-wide repository cache.
//!
//! Requests name a directory; opening a repository there costs multiple
//! milliseconds of discovery and config parsing, so handles are opened
//! once and kept for the process lifetime. The request loop is serial,
//! which makes the map single-threaded by construction; no locking.
//!
//! The cache is unbounded: a shell session touches tens of distinct
//! repositories at most. Open failures are never cached, so a directory
//! that becomes a repository later starts working without a restart.

use std::path::{Path, PathBuf};

use ahash::AHashMap;

use crate::status::errors::StatusError;
use crate::status::repo::Repo;

/// Map from canonicalized request directory to an opened handle.
#[derive(Default)]
pub struct RepoCache {
    repos: AHashMap<PathBuf, Repo>,
}

impl RepoCache {
    /// Creates an empty cache.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of cached handles.
    #[must_use]
    pub fn len(&self) -> usize {
        self.repos.len()
    }

    /// True when no handle has been opened yet.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.repos.is_empty()
    }

    /// Returns the handle for `dir`, opening it on first use.
    ///
    /// Two requests naming the same directory (after canonicalization)
    /// share one handle and therefore one snapshot and tag cache.
    ///
    /// # Errors
    ///
    /// Canonicalization failures surface as I/O errors; open failures
    /// pass through and are not remembered.
    pub fn open(&mut self, dir: &Path) -> Result<&mut Repo, StatusError> {
        let mut key = std::fs::canonicalize(dir).map_err(StatusError::io)?;
        // Requests may name a file inside the tree; discovery starts
        // from its directory.
        if key.is_file() {
            if let Some(parent) = key.parent() {
                key = parent.to_path_buf();
            }
        }

        // Entry-style double lookup avoided: misses must not insert on
        // error, so probe first.
        if !self.repos.contains_key(&key) {
            let repo = Repo::open(&key)?;
            self.repos.insert(key.clone(), repo);
        }

        let repo = self
            .repos
            .get_mut(&key)
            .unwrap_or_else(|| unreachable!("inserted above"));
        repo.touch();
        Ok(repo)
    }
}
