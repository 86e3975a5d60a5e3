//! Severity-tagged line logging for the daemon.
//!
//! All diagnostics go to stderr through `tracing`; stdout carries only the
//! response protocol. The filter is read from `STATUSD_LOG` (standard
//! `EnvFilter` syntax) and defaults to `info`.

use tracing_subscriber::EnvFilter;

/// Environment variable controlling the log filter.
pub const LOG_ENV: &str = "STATUSD_LOG";

/// Installs the global stderr subscriber.
///
/// Call once at startup, before the first request is read. A second call
/// would panic inside `tracing`; the daemon has exactly one init path.
pub fn init() {
    let filter =
        EnvFilter::try_from_env(LOG_ENV).unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}
