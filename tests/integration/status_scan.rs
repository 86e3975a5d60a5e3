//! Diff-engine scenarios against real working trees.

use std::fs;

use statusd_rs::status::{Repo, Tribool};

use crate::util::*;

#[test]
fn fresh_repository_is_fully_clean() {
    let (tmp, _repo) = init_repo();
    let pool = pool();

    let mut repo = Repo::open(tmp.path()).unwrap();
    let head = repo.head_status().unwrap();
    assert_eq!(head.commit, None);
    assert!(
        head.branch == "master" || head.branch == "main",
        "unexpected default branch {:?}",
        head.branch
    );

    let stats = repo.index_stats(head.commit, usize::MAX, &pool).unwrap();
    assert!(!stats.has_staged);
    assert_eq!(stats.has_unstaged, Tribool::False);
    assert_eq!(stats.has_untracked, Tribool::False);

    assert_eq!(repo.num_stashes(), 0);
    assert_eq!(repo.ahead_behind(head.commit, None), (0, 0));
    assert_eq!(repo.state_str(), "");
}

#[test]
fn committed_tree_is_clean() {
    let (tmp, repo) = init_repo();
    write_file(tmp.path(), "a.txt", b"alpha\n");
    write_file(tmp.path(), "src/lib.rs", b"fn main() {}\n");
    commit_all(&repo, "init");

    let pool = pool();
    let stats = stats_for(tmp.path(), &pool);
    assert!(!stats.has_staged);
    assert_eq!(stats.has_unstaged, Tribool::False);
    assert_eq!(stats.has_untracked, Tribool::False);
}

#[test]
fn touched_but_unchanged_file_is_clean() {
    let (tmp, repo) = init_repo();
    write_file(tmp.path(), "a.txt", b"alpha\n");
    commit_all(&repo, "init");

    // Rewrite identical content: stat fields move, content does not.
    // The stat mismatch must trigger a hash check, not a dirty verdict.
    write_file(tmp.path(), "a.txt", b"alpha\n");

    let pool = pool();
    let stats = stats_for(tmp.path(), &pool);
    assert_eq!(stats.has_unstaged, Tribool::False);
    assert_eq!(stats.has_untracked, Tribool::False);
}

#[test]
fn modified_content_is_unstaged() {
    let (tmp, repo) = init_repo();
    write_file(tmp.path(), "a.txt", b"alpha\n");
    commit_all(&repo, "init");

    // Same length, different bytes: only the content hash can tell.
    write_file(tmp.path(), "a.txt", b"bravo\n");

    let pool = pool();
    let stats = stats_for(tmp.path(), &pool);
    assert!(!stats.has_staged);
    assert_eq!(stats.has_unstaged, Tribool::True);
}

#[test]
fn deleted_file_is_unstaged() {
    let (tmp, repo) = init_repo();
    write_file(tmp.path(), "a.txt", b"alpha\n");
    write_file(tmp.path(), "b.txt", b"beta\n");
    commit_all(&repo, "init");

    fs::remove_file(tmp.path().join("b.txt")).unwrap();

    let pool = pool();
    let stats = stats_for(tmp.path(), &pool);
    assert_eq!(stats.has_unstaged, Tribool::True);
}

#[test]
fn new_file_is_untracked_only() {
    let (tmp, repo) = init_repo();
    write_file(tmp.path(), "a.txt", b"alpha\n");
    commit_all(&repo, "init");

    write_file(tmp.path(), "new.txt", b"fresh\n");

    let pool = pool();
    let stats = stats_for(tmp.path(), &pool);
    assert!(!stats.has_staged);
    assert_eq!(stats.has_unstaged, Tribool::False);
    assert_eq!(stats.has_untracked, Tribool::True);
}

#[test]
fn untracked_in_nested_and_new_directories() {
    let (tmp, repo) = init_repo();
    write_file(tmp.path(), "a/b/tracked.txt", b"x\n");
    commit_all(&repo, "init");
    let pool = pool();

    write_file(tmp.path(), "a/b/fresh.txt", b"y\n");
    assert_eq!(stats_for(tmp.path(), &pool).has_untracked, Tribool::True);

    fs::remove_file(tmp.path().join("a/b/fresh.txt")).unwrap();
    assert_eq!(stats_for(tmp.path(), &pool).has_untracked, Tribool::False);

    // A whole new directory shows up via its (tracked) parent's listing.
    write_file(tmp.path(), "newdir/deep/file.txt", b"z\n");
    assert_eq!(stats_for(tmp.path(), &pool).has_untracked, Tribool::True);
}

#[test]
fn staged_addition_is_staged_not_unstaged() {
    let (tmp, repo) = init_repo();
    write_file(tmp.path(), "a.txt", b"alpha\n");
    commit_all(&repo, "init");

    write_file(tmp.path(), "new.txt", b"fresh\n");
    stage(&repo, "new.txt");

    let pool = pool();
    let stats = stats_for(tmp.path(), &pool);
    assert!(stats.has_staged);
    assert_eq!(stats.has_unstaged, Tribool::False);
    assert_eq!(stats.has_untracked, Tribool::False);
}

#[test]
fn over_budget_index_reports_unknown_worktree() {
    let (tmp, repo) = init_repo();
    write_file(tmp.path(), "a.txt", b"alpha\n");
    write_file(tmp.path(), "b.txt", b"beta\n");
    commit_all(&repo, "init");
    let pool = pool();

    let stats = stats_with_budget(tmp.path(), &pool, 1);
    assert!(!stats.has_staged, "staged is still answered over budget");
    assert_eq!(stats.has_unstaged, Tribool::Unknown);
    assert_eq!(stats.has_untracked, Tribool::Unknown);

    // The staged determination stays live under the budget.
    write_file(tmp.path(), "c.txt", b"gamma\n");
    stage(&repo, "c.txt");
    let stats = stats_with_budget(tmp.path(), &pool, 1);
    assert!(stats.has_staged);
    assert_eq!(stats.has_unstaged, Tribool::Unknown);
}

#[test]
fn within_budget_never_reports_unknown() {
    let (tmp, repo) = init_repo();
    write_file(tmp.path(), "a.txt", b"alpha\n");
    write_file(tmp.path(), "b.txt", b"beta\n");
    commit_all(&repo, "init");
    let pool = pool();

    let stats = stats_with_budget(tmp.path(), &pool, 2);
    assert_ne!(stats.has_unstaged, Tribool::Unknown);
    assert_ne!(stats.has_untracked, Tribool::Unknown);
}

#[test]
fn ignored_files_are_not_untracked() {
    let (tmp, repo) = init_repo();
    write_file(tmp.path(), ".gitignore", b"*.log\n");
    write_file(tmp.path(), "a.txt", b"alpha\n");
    stage(&repo, ".gitignore");
    stage(&repo, "a.txt");
    commit_index(&repo, "init");
    let pool = pool();

    write_file(tmp.path(), "debug.log", b"noise\n");
    let stats = stats_for(tmp.path(), &pool);
    assert_eq!(stats.has_untracked, Tribool::False);

    write_file(tmp.path(), "notes.txt", b"real\n");
    let stats = stats_for(tmp.path(), &pool);
    assert_eq!(stats.has_untracked, Tribool::True);
}

#[test]
fn tracked_but_ignored_file_still_reports_unstaged() {
    let (tmp, repo) = init_repo();
    write_file(tmp.path(), ".gitignore", b"*.log\n");
    write_file(tmp.path(), "build.log", b"v1\n");
    // add_path tracks regardless of ignore rules (force-add).
    stage(&repo, ".gitignore");
    stage(&repo, "build.log");
    commit_index(&repo, "init");
    let pool = pool();

    assert_eq!(stats_for(tmp.path(), &pool).has_unstaged, Tribool::False);

    write_file(tmp.path(), "build.log", b"v2\n");
    assert_eq!(stats_for(tmp.path(), &pool).has_unstaged, Tribool::True);
}

#[test]
fn repeated_scans_are_idempotent() {
    let (tmp, repo) = init_repo();
    write_file(tmp.path(), "a.txt", b"alpha\n");
    write_file(tmp.path(), "dir/b.txt", b"beta\n");
    commit_all(&repo, "init");
    write_file(tmp.path(), "loose.txt", b"untracked\n");
    let pool = pool();

    // Same handle twice: the second run reuses the cached snapshot.
    let mut handle = Repo::open(tmp.path()).unwrap();
    let head = handle.head_status().unwrap();
    let first = handle.index_stats(head.commit, usize::MAX, &pool).unwrap();
    let second = handle.index_stats(head.commit, usize::MAX, &pool).unwrap();
    assert_eq!(first, second);
}

#[cfg(unix)]
#[test]
fn executable_bit_change_is_unstaged() {
    use std::os::unix::fs::PermissionsExt;

    let (tmp, repo) = init_repo();
    write_file(tmp.path(), "run.sh", b"#!/bin/sh\n");
    commit_all(&repo, "init");
    let pool = pool();

    assert_eq!(stats_for(tmp.path(), &pool).has_unstaged, Tribool::False);

    let path = tmp.path().join("run.sh");
    let mut perms = fs::metadata(&path).unwrap().permissions();
    perms.set_mode(0o755);
    fs::set_permissions(&path, perms).unwrap();

    assert_eq!(stats_for(tmp.path(), &pool).has_unstaged, Tribool::True);
}

#[cfg(unix)]
#[test]
fn executable_bit_ignored_when_filemode_off() {
    use std::os::unix::fs::PermissionsExt;

    let (tmp, repo) = init_repo();
    write_file(tmp.path(), "run.sh", b"#!/bin/sh\n");
    commit_all(&repo, "init");
    repo.config()
        .unwrap()
        .set_bool("core.filemode", false)
        .unwrap();
    let pool = pool();

    let path = tmp.path().join("run.sh");
    let mut perms = fs::metadata(&path).unwrap().permissions();
    perms.set_mode(0o755);
    fs::set_permissions(&path, perms).unwrap();

    // Content unchanged; with filemode off the exec bit is not a diff.
    assert_eq!(stats_for(tmp.path(), &pool).has_unstaged, Tribool::False);
}

#[test]
fn sibling_file_does_not_shadow_tracked_directory() {
    // "src/foo.rs" sorts between "src/foo" and "src/foo/…"; the
    // directory must still count as tracked for untracked detection.
    let (tmp, repo) = init_repo();
    write_file(tmp.path(), "src/foo.rs", b"mod foo;\n");
    write_file(tmp.path(), "src/foo/bar.rs", b"pub fn bar() {}\n");
    commit_all(&repo, "init");
    let pool = pool();

    let stats = stats_for(tmp.path(), &pool);
    assert_eq!(stats.has_untracked, Tribool::False);
    assert_eq!(stats.has_unstaged, Tribool::False);
}

#[cfg(unix)]
#[test]
fn retargeted_symlink_is_unstaged() {
    let (tmp, repo) = init_repo();
    write_file(tmp.path(), "a.txt", b"alpha\n");
    write_file(tmp.path(), "b.txt", b"beta\n");
    std::os::unix::fs::symlink("a.txt", tmp.path().join("link")).unwrap();
    commit_all(&repo, "init");
    let pool = pool();

    assert_eq!(stats_for(tmp.path(), &pool).has_unstaged, Tribool::False);

    fs::remove_file(tmp.path().join("link")).unwrap();
    std::os::unix::fs::symlink("b.txt", tmp.path().join("link")).unwrap();

    assert_eq!(stats_for(tmp.path(), &pool).has_unstaged, Tribool::True);
}

#[test]
fn large_tree_scans_clean_across_shards() {
    let (tmp, repo) = init_repo();
    for d in 0..8 {
        for f in 0..25 {
            write_file(
                tmp.path(),
                &format!("dir{d}/file{f:02}.txt"),
                format!("contents {d}/{f}\n").as_bytes(),
            );
        }
    }
    commit_all(&repo, "init");
    let pool = pool();

    let stats = stats_for(tmp.path(), &pool);
    assert!(!stats.has_staged);
    assert_eq!(stats.has_unstaged, Tribool::False);
    assert_eq!(stats.has_untracked, Tribool::False);

    write_file(tmp.path(), "dir7/file24.txt", b"mutated\n");
    assert_eq!(stats_for(tmp.path(), &pool).has_unstaged, Tribool::True);
}
