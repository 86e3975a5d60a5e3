//! Branch, upstream, state, and stash reporting.

use std::fs;

use statusd_rs::status::Repo;

use crate::util::*;

/// Wires up a fake upstream: a remote-tracking ref plus the tracking
/// config git would write for `branch --set-upstream-to`.
fn set_upstream(repo: &git2::Repository, branch: &str, target: git2::Oid) {
    repo.reference(
        &format!("refs/remotes/origin/{branch}"),
        target,
        true,
        "test upstream",
    )
    .unwrap();
    let mut config = repo.config().unwrap();
    config
        .set_str("remote.origin.url", "https://example.com/repo.git")
        .unwrap();
    config
        .set_str(&format!("branch.{branch}.remote"), "origin")
        .unwrap();
    config
        .set_str(
            &format!("branch.{branch}.merge"),
            &format!("refs/heads/{branch}"),
        )
        .unwrap();
}

/// Creates a commit with an explicit parent without moving any ref.
fn dangling_commit(repo: &git2::Repository, parent: git2::Oid, message: &str) -> git2::Oid {
    let parent = repo.find_commit(parent).unwrap();
    let tree = parent.tree().unwrap();
    let sig = signature();
    repo.commit(None, &sig, &sig, message, &tree, &[&parent])
        .unwrap()
}

#[test]
fn ahead_and_behind_counts() {
    let (tmp, repo) = init_repo();
    write_file(tmp.path(), "a.txt", b"alpha\n");
    let base = commit_all(&repo, "base");

    let branch = Repo::open(tmp.path()).unwrap().head_status().unwrap().branch;

    // Remote has one commit we do not.
    let remote_tip = dangling_commit(&repo, base, "remote work");
    set_upstream(&repo, &branch, remote_tip);

    // We have two commits the remote does not.
    write_file(tmp.path(), "b.txt", b"one\n");
    commit_all(&repo, "local one");
    write_file(tmp.path(), "c.txt", b"two\n");
    commit_all(&repo, "local two");

    let handle = Repo::open(tmp.path()).unwrap();
    let head = handle.head_status().unwrap();
    let upstream = handle.upstream_status(&head);
    assert_eq!(upstream.name, format!("origin/{branch}"));
    assert_eq!(upstream.remote_url, "https://example.com/repo.git");

    let (ahead, behind) = handle.ahead_behind(head.commit, upstream.commit);
    assert_eq!((ahead, behind), (2, 1));
}

#[test]
fn branch_without_upstream_reports_empty() {
    let (tmp, repo) = init_repo();
    write_file(tmp.path(), "a.txt", b"alpha\n");
    commit_all(&repo, "init");

    let handle = Repo::open(tmp.path()).unwrap();
    let head = handle.head_status().unwrap();
    let upstream = handle.upstream_status(&head);
    assert!(upstream.name.is_empty());
    assert!(upstream.remote_url.is_empty());
    assert_eq!(upstream.commit, None);
    assert_eq!(handle.ahead_behind(head.commit, upstream.commit), (0, 0));
}

#[test]
fn detached_head_has_commit_but_no_branch() {
    let (tmp, repo) = init_repo();
    write_file(tmp.path(), "a.txt", b"alpha\n");
    let commit = commit_all(&repo, "init");
    repo.set_head_detached(commit).unwrap();

    let handle = Repo::open(tmp.path()).unwrap();
    let head = handle.head_status().unwrap();
    assert_eq!(head.commit, Some(commit));
    assert!(head.branch.is_empty());
    assert_eq!(head.refname, None);
}

#[test]
fn merge_state_is_reported() {
    let (tmp, repo) = init_repo();
    write_file(tmp.path(), "a.txt", b"alpha\n");
    let commit = commit_all(&repo, "init");

    let handle = Repo::open(tmp.path()).unwrap();
    assert_eq!(handle.state_str(), "");

    fs::write(
        repo.path().join("MERGE_HEAD"),
        format!("{commit}\n"),
    )
    .unwrap();
    assert_eq!(handle.state_str(), "merge");
}

#[test]
fn stash_count_is_reported() {
    let (tmp, repo) = init_repo();
    write_file(tmp.path(), "a.txt", b"alpha\n");
    commit_all(&repo, "init");

    let mut handle = Repo::open(tmp.path()).unwrap();
    assert_eq!(handle.num_stashes(), 0);

    // Stash through a separate handle; the cached one observes it.
    write_file(tmp.path(), "a.txt", b"dirty\n");
    let mut stasher = git2::Repository::open(tmp.path()).unwrap();
    stasher
        .stash_save(&signature(), "wip", None)
        .unwrap();

    assert_eq!(handle.num_stashes(), 1);
}
