//! Shared fixtures: real repositories built in temp directories.
#![allow(dead_code)]

use std::fs;
use std::path::Path;

use statusd_rs::pool::{PoolConfig, ThreadPool};
use statusd_rs::status::{IndexStats, Repo};
use tempfile::TempDir;

/// Initializes a repository with a configured committer identity.
pub fn init_repo() -> (TempDir, git2::Repository) {
    let tmp = TempDir::new().unwrap();
    let repo = git2::Repository::init(tmp.path()).unwrap();
    {
        let mut config = repo.config().unwrap();
        config.set_str("user.name", "test").unwrap();
        config.set_str("user.email", "test@example.com").unwrap();
    }
    (tmp, repo)
}

/// Writes a file under the worktree, creating parent directories.
pub fn write_file(root: &Path, rel: &str, contents: &[u8]) {
    let path = root.join(rel);
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).unwrap();
    }
    fs::write(path, contents).unwrap();
}

/// Stages everything and commits, returning the new commit id.
pub fn commit_all(repo: &git2::Repository, message: &str) -> git2::Oid {
    let mut index = repo.index().unwrap();
    index
        .add_all(["*"], git2::IndexAddOption::DEFAULT, None)
        .unwrap();
    index.write().unwrap();
    commit_index(repo, message)
}

/// Commits the current index as-is.
pub fn commit_index(repo: &git2::Repository, message: &str) -> git2::Oid {
    let mut index = repo.index().unwrap();
    let tree_id = index.write_tree().unwrap();
    let tree = repo.find_tree(tree_id).unwrap();
    let sig = signature();
    let parents: Vec<git2::Commit<'_>> = match repo.head() {
        Ok(head) => vec![head.peel_to_commit().unwrap()],
        Err(_) => Vec::new(),
    };
    let parent_refs: Vec<&git2::Commit<'_>> = parents.iter().collect();
    repo.commit(Some("HEAD"), &sig, &sig, message, &tree, &parent_refs)
        .unwrap()
}

/// Stages one path.
pub fn stage(repo: &git2::Repository, rel: &str) {
    let mut index = repo.index().unwrap();
    index.add_path(Path::new(rel)).unwrap();
    index.write().unwrap();
}

pub fn signature() -> git2::Signature<'static> {
    git2::Signature::now("test", "test@example.com").unwrap()
}

/// A small scan pool for tests.
pub fn pool() -> ThreadPool {
    ThreadPool::new(PoolConfig::with_workers(2))
}

/// Opens the directory fresh and runs the full diff engine with an
/// unlimited budget.
pub fn stats_for(dir: &Path, pool: &ThreadPool) -> IndexStats {
    stats_with_budget(dir, pool, usize::MAX)
}

/// Same, with an explicit `dirty-max-index-size` budget.
pub fn stats_with_budget(dir: &Path, pool: &ThreadPool, budget: usize) -> IndexStats {
    let mut repo = Repo::open(dir).unwrap();
    let head = repo.head_status().unwrap();
    repo.index_stats(head.commit, budget, pool).unwrap()
}
