//! Serial request loop.
//!
//! One request is fully served — including awaiting the background tag
//! future — before the next is read, so responses leave in request order
//! and no scan work ever spans two requests.
//!
//! Error policy: a malformed request is logged and dropped with no
//! response; any failure while serving a well-formed request produces
//! the failure record (`id<TAB>0`). Nothing terminates the loop except
//! the request stream closing or parent death on the lock descriptor.

pub mod request;
pub mod response;

use std::io::{self, Write};

use crate::options::Options;
use crate::pool::ThreadPool;
use crate::status::repo::HeadStatus;
use crate::status::{IndexStats, Repo, RepoCache, StatusError};
use crate::timer::Timer;

pub use request::{parse_request, ParseError, ReadOutcome, Request, RequestReader};
pub use response::ResponseWriter;

/// Why the loop returned.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ExitReason {
    /// The request stream reached EOF.
    RequestStreamClosed,
    /// The lock descriptor reported parent death.
    ParentExit,
}

/// Runs the request loop until the input side goes away.
///
/// # Errors
///
/// Only unrecoverable descriptor failures on the request or response
/// stream; per-request failures are answered on the wire instead.
pub fn run<W: Write>(
    opts: &Options,
    pool: &ThreadPool,
    cache: &mut RepoCache,
    reader: &mut RequestReader,
    writer: &mut ResponseWriter<W>,
) -> io::Result<ExitReason> {
    loop {
        match reader.read_outcome()? {
            ReadOutcome::Eof => return Ok(ExitReason::RequestStreamClosed),
            ReadOutcome::ParentExit => return Ok(ExitReason::ParentExit),
            ReadOutcome::Record(record) => {
                let req = match parse_request(&record) {
                    Ok(req) => req,
                    Err(err) => {
                        tracing::warn!(%err, "dropping malformed request");
                        continue;
                    }
                };
                serve_one(&req, opts, pool, cache, writer)?;
            }
        }
    }
}

/// Everything a success response carries besides the echoed id.
struct ResponseData {
    workdir: Vec<u8>,
    commit: String,
    branch: String,
    upstream: String,
    remote_url: String,
    state: &'static str,
    stats: IndexStats,
    ahead: usize,
    behind: usize,
    stashes: usize,
    tag: String,
    snapshot_info: Option<(usize, usize)>,
}

fn serve_one<W: Write>(
    req: &Request,
    opts: &Options,
    pool: &ThreadPool,
    cache: &mut RepoCache,
    writer: &mut ResponseWriter<W>,
) -> io::Result<()> {
    let mut timer = Timer::new();
    tracing::debug!(dir = %req.dir.display(), "processing request");

    match compute_response(req, opts, pool, cache) {
        Ok(data) => {
            emit(writer, &req.id, &data)?;
            let elapsed = timer.report("request");
            if req.diag {
                let (entries, shards) = data.snapshot_info.unwrap_or((0, 0));
                tracing::info!(
                    dir = %req.dir.display(),
                    entries,
                    shards,
                    elapsed_us = elapsed.as_micros() as u64,
                    staged = data.stats.has_staged,
                    unstaged = ?data.stats.has_unstaged,
                    untracked = ?data.stats.has_untracked,
                    "request diagnostics"
                );
            }
        }
        Err(err) => {
            match err {
                StatusError::NotARepository | StatusError::BareRepository => {
                    tracing::debug!(dir = %req.dir.display(), %err, "not a working tree")
                }
                _ => tracing::warn!(dir = %req.dir.display(), %err, "request failed"),
            }
            writer.write_failure(&req.id)?;
            timer.report("request (failed)");
        }
    }
    Ok(())
}

fn compute_response(
    req: &Request,
    opts: &Options,
    pool: &ThreadPool,
    cache: &mut RepoCache,
) -> Result<ResponseData, StatusError> {
    let repo = cache.open(&req.dir)?;
    let head = repo.head_status()?;

    // Schedule tag resolution first so it overlaps the diff scan; it is
    // always finished below, even when the scan fails, so no background
    // work survives this request.
    let tag_future = repo.tag_name(head.commit, pool);
    let result = compute_fields(repo, &head, opts, pool);
    let tag = repo.finish_tag(tag_future);

    let mut data = result?;
    data.tag = tag;
    Ok(data)
}

fn compute_fields(
    repo: &mut Repo,
    head: &HeadStatus,
    opts: &Options,
    pool: &ThreadPool,
) -> Result<ResponseData, StatusError> {
    let upstream = repo.upstream_status(head);
    let state = repo.state_str();
    let stats = repo.index_stats(head.commit, opts.dirty_max_index_size, pool)?;
    let (ahead, behind) = repo.ahead_behind(head.commit, upstream.commit);
    let stashes = repo.num_stashes();

    Ok(ResponseData {
        workdir: workdir_field(repo.workdir()),
        commit: head.commit.map(|oid| oid.to_string()).unwrap_or_default(),
        branch: head.branch.clone(),
        upstream: upstream.name,
        remote_url: upstream.remote_url,
        state,
        stats,
        ahead,
        behind,
        stashes,
        tag: String::new(),
        snapshot_info: repo.snapshot_info(),
    })
}

/// Working-tree root as wire bytes, trailing slash stripped unless the
/// root is `/` itself.
fn workdir_field(path: &std::path::Path) -> Vec<u8> {
    let mut bytes = path_bytes(path);
    while bytes.len() > 1 && bytes.last() == Some(&b'/') {
        bytes.pop();
    }
    bytes
}

#[cfg(unix)]
fn path_bytes(path: &std::path::Path) -> Vec<u8> {
    use std::os::unix::ffi::OsStrExt;
    path.as_os_str().as_bytes().to_vec()
}

#[cfg(not(unix))]
fn path_bytes(path: &std::path::Path) -> Vec<u8> {
    path.to_string_lossy().into_owned().into_bytes()
}

/// Writes the 15-field success record in wire order.
fn emit<W: Write>(
    writer: &mut ResponseWriter<W>,
    id: &[u8],
    data: &ResponseData,
) -> io::Result<()> {
    writer.begin(id);
    writer.field_str("1");
    writer.field_bytes(&data.workdir);
    writer.field_str(&data.commit);
    writer.field_str(&data.branch);
    writer.field_str(&data.upstream);
    writer.field_str(&data.remote_url);
    writer.field_str(data.state);
    writer.field_str(if data.stats.has_staged { "1" } else { "0" });
    writer.field_str(data.stats.has_unstaged.as_protocol());
    writer.field_str(data.stats.has_untracked.as_protocol());
    writer.field_usize(data.ahead);
    writer.field_usize(data.behind);
    writer.field_usize(data.stashes);
    writer.field_str(&data.tag);
    writer.finish()
}
