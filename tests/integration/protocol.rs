//! End-to-end request/response protocol through the serial loop.
#![cfg(unix)]

use statusd_rs::pool::{PoolConfig, ThreadPool};
use statusd_rs::serve::{self, ExitReason, RequestReader, ResponseWriter};
use statusd_rs::status::RepoCache;
use statusd_rs::Options;

use crate::util::*;

fn pipe() -> (i32, i32) {
    let mut fds = [0i32; 2];
    assert_eq!(unsafe { libc::pipe(fds.as_mut_ptr()) }, 0);
    (fds[0], fds[1])
}

fn write_all(fd: i32, data: &[u8]) {
    let n = unsafe { libc::write(fd, data.as_ptr() as *const libc::c_void, data.len()) };
    assert_eq!(n as usize, data.len());
}

/// Feeds `input` through the daemon loop and returns the raw response
/// bytes. The input must fit in the pipe buffer (it always does here).
fn run_daemon(input: &[u8]) -> Vec<u8> {
    let (rx, tx) = pipe();
    write_all(tx, input);
    unsafe { libc::close(tx) };

    let opts = Options {
        num_threads: 2,
        ..Options::default()
    };
    let pool = ThreadPool::new(PoolConfig::with_workers(2));
    let mut cache = RepoCache::new();
    let mut reader = RequestReader::new(rx, None);
    let mut out = Vec::new();
    {
        let mut writer = ResponseWriter::new(&mut out);
        let reason = serve::run(&opts, &pool, &mut cache, &mut reader, &mut writer).unwrap();
        assert_eq!(reason, ExitReason::RequestStreamClosed);
    }
    unsafe { libc::close(rx) };
    out
}

/// Splits the output into records and fields.
fn records(out: &[u8]) -> Vec<Vec<Vec<u8>>> {
    out.split(|&b| b == 0)
        .filter(|rec| !rec.is_empty())
        .map(|rec| rec.split(|&b| b == b'\t').map(<[u8]>::to_vec).collect())
        .collect()
}

fn request(id: &str, dir: &std::path::Path) -> Vec<u8> {
    let mut rec = Vec::new();
    rec.extend_from_slice(id.as_bytes());
    rec.push(b'\t');
    rec.extend_from_slice(dir.to_str().unwrap().as_bytes());
    rec.push(0);
    rec
}

#[test]
fn fresh_repository_full_record() {
    let (tmp, _repo) = init_repo();
    let out = run_daemon(&request("req1", tmp.path()));
    let recs = records(&out);
    assert_eq!(recs.len(), 1);

    let fields = &recs[0];
    assert_eq!(fields.len(), 15, "success record has 15 fields");
    assert_eq!(fields[0], b"req1");
    assert_eq!(fields[1], b"1");
    let canonical = std::fs::canonicalize(tmp.path()).unwrap();
    assert_eq!(fields[2], canonical.to_str().unwrap().as_bytes());
    assert_eq!(fields[3], b"", "unborn branch has no commit");
    assert!(fields[4] == b"master" || fields[4] == b"main");
    assert_eq!(fields[5], b"");
    assert_eq!(fields[6], b"");
    assert_eq!(fields[7], b"");
    assert_eq!(fields[8], b"0");
    assert_eq!(fields[9], b"0");
    assert_eq!(fields[10], b"0");
    assert_eq!(fields[11], b"0");
    assert_eq!(fields[12], b"0");
    assert_eq!(fields[13], b"0");
    assert_eq!(fields[14], b"");
}

#[test]
fn committed_repository_reports_commit_and_dirt() {
    let (tmp, repo) = init_repo();
    write_file(tmp.path(), "a.txt", b"alpha\n");
    commit_all(&repo, "init");
    write_file(tmp.path(), "wip.txt", b"untracked\n");

    let out = run_daemon(&request("x", tmp.path()));
    let recs = records(&out);
    let fields = &recs[0];
    assert_eq!(fields[1], b"1");
    assert_eq!(fields[3].len(), 40, "commit is 40 hex chars");
    assert!(fields[3].iter().all(|b| b.is_ascii_hexdigit()));
    assert_eq!(fields[8], b"0");
    assert_eq!(fields[9], b"0");
    assert_eq!(fields[10], b"1", "untracked file present");
}

#[test]
fn non_repository_gets_failure_record() {
    let tmp = tempfile::TempDir::new().unwrap();
    let out = run_daemon(&request("nope", tmp.path()));
    let recs = records(&out);
    assert_eq!(recs.len(), 1);
    assert_eq!(recs[0], vec![b"nope".to_vec(), b"0".to_vec()]);
}

#[test]
fn malformed_request_is_dropped_silently() {
    let (tmp, _repo) = init_repo();
    let mut input = Vec::new();
    input.extend_from_slice(b"no-dir-field\0");
    input.extend_from_slice(&request("good", tmp.path()));

    let out = run_daemon(&input);
    let recs = records(&out);
    assert_eq!(recs.len(), 1, "malformed record gets no response");
    assert_eq!(recs[0][0], b"good");
}

#[test]
fn responses_preserve_request_order_and_are_idempotent() {
    let (tmp, repo) = init_repo();
    write_file(tmp.path(), "a.txt", b"alpha\n");
    commit_all(&repo, "init");

    let mut input = Vec::new();
    input.extend_from_slice(&request("first", tmp.path()));
    input.extend_from_slice(&request("second", tmp.path()));

    let out = run_daemon(&input);
    let recs = records(&out);
    assert_eq!(recs.len(), 2);
    assert_eq!(recs[0][0], b"first");
    assert_eq!(recs[1][0], b"second");
    // Identical requests against an unchanged tree: identical payloads.
    assert_eq!(recs[0][1..], recs[1][1..]);
}

#[test]
fn diag_flag_is_accepted() {
    let (tmp, _repo) = init_repo();
    let mut rec = Vec::new();
    rec.extend_from_slice(b"d\t");
    rec.extend_from_slice(tmp.path().to_str().unwrap().as_bytes());
    rec.extend_from_slice(b"\t1\0");

    let out = run_daemon(&rec);
    let recs = records(&out);
    assert_eq!(recs.len(), 1);
    assert_eq!(recs[0][1], b"1");
}
