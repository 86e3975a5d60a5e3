//! Daemon entrypoint: configuration, library init, and the request loop.

use statusd_rs::pool::{PoolConfig, ThreadPool};
use statusd_rs::serve::{self, RequestReader, ResponseWriter};
use statusd_rs::status::RepoCache;
use statusd_rs::{logging, Options};

fn main() {
    let opts = Options::parse();
    logging::init();
    tracing::info!(
        num_threads = opts.num_threads,
        dirty_max_index_size = opts.dirty_max_index_size,
        lock_fd = opts.lock_fd,
        sigwinch_pid = opts.sigwinch_pid,
        "statusd starting"
    );

    // Read-only status queries on a trusted local tree; object-hash
    // verification would only slow the scan down.
    git2::opts::strict_hash_verification(false);

    #[cfg(unix)]
    if let Some(pid) = opts.sigwinch_pid {
        sigwinch::install(pid);
    }

    let pool = ThreadPool::new(PoolConfig::with_workers(opts.num_threads));
    let mut cache = RepoCache::new();
    let mut reader = RequestReader::new(0, opts.lock_fd);
    let stdout = std::io::stdout();
    let mut writer = ResponseWriter::new(stdout.lock());

    match serve::run(&opts, &pool, &mut cache, &mut reader, &mut writer) {
        Ok(reason) => tracing::info!(?reason, "statusd exiting"),
        Err(err) => {
            tracing::error!(%err, "request stream failure");
            std::process::exit(1);
        }
    }
}

/// Terminal-resize forwarding: a SIGWINCH received by the daemon is
/// re-sent to the configured process. Purely cosmetic for the hosting
/// shell; no effect on scanning.
#[cfg(unix)]
mod sigwinch {
    use std::sync::atomic::{AtomicI32, Ordering};

    static TARGET: AtomicI32 = AtomicI32::new(0);

    extern "C" fn forward(_sig: libc::c_int) {
        // Async-signal-safe: one atomic load and one kill(2).
        let pid = TARGET.load(Ordering::Relaxed);
        if pid > 0 {
            unsafe { libc::kill(pid, libc::SIGWINCH) };
        }
    }

    pub fn install(pid: i32) {
        TARGET.store(pid, Ordering::Relaxed);
        let handler = forward as extern "C" fn(libc::c_int);
        unsafe { libc::signal(libc::SIGWINCH, handler as libc::sighandler_t) };
    }
}
