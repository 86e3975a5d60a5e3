//! Daemon configuration parsed from the command line.
//!
//! Recognized options only; anything else is rejected so a typo cannot
//! silently run with defaults. No config files, no environment lookups
//! besides the log filter.

use std::ffi::OsString;
use std::fmt;

/// Recognized configuration values.
#[derive(Clone, Debug)]
pub struct Options {
    /// Worker thread count for the scan pool. Defaults to the number of
    /// available CPUs.
    pub num_threads: usize,

    /// Indexes with more entries than this skip the worktree scan and
    /// report unstaged/untracked as unknown. Defaults to an effectively
    /// unlimited sentinel.
    pub dirty_max_index_size: usize,

    /// Descriptor used to detect parent death: when it reports EOF the
    /// daemon exits.
    pub lock_fd: Option<i32>,

    /// Process to which a received SIGWINCH is forwarded. Cosmetic only.
    pub sigwinch_pid: Option<i32>,
}

impl Default for Options {
    fn default() -> Self {
        Self {
            num_threads: default_threads(),
            dirty_max_index_size: usize::MAX,
            lock_fd: None,
            sigwinch_pid: None,
        }
    }
}

fn default_threads() -> usize {
    std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(1)
}

/// A rejected command line.
#[derive(Debug, PartialEq, Eq)]
pub enum OptionsError {
    /// Unknown argument.
    Unrecognized(String),
    /// Recognized flag with an unparsable or out-of-range value.
    InvalidValue { flag: &'static str, value: String },
    /// `--help` was requested.
    HelpRequested,
}

impl fmt::Display for OptionsError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Unrecognized(arg) => write!(f, "unrecognized argument: {arg}"),
            Self::InvalidValue { flag, value } => {
                write!(f, "invalid value for {flag}: {value}")
            }
            Self::HelpRequested => write!(f, "help requested"),
        }
    }
}

impl std::error::Error for OptionsError {}

/// Usage text printed on `--help` and on rejection.
pub const USAGE: &str = "usage: statusd [OPTIONS]

OPTIONS:
    --num-threads=<N>           Scan pool size (default: CPU count)
    --dirty-max-index-size=<N>  Skip the worktree scan for indexes with
                                more than N entries (default: unlimited)
    --lock-fd=<FD>              Exit when this descriptor reaches EOF
    --sigwinch-pid=<PID>        Forward received SIGWINCH to PID
    --help, -h                  Show this help message";

impl Options {
    /// Parses the given arguments (excluding argv[0]).
    ///
    /// # Errors
    ///
    /// Returns [`OptionsError`] for unknown arguments, invalid values, or
    /// a help request; the caller decides how to exit.
    pub fn parse_from<I>(args: I) -> Result<Self, OptionsError>
    where
        I: IntoIterator<Item = OsString>,
    {
        let mut opts = Self::default();

        for arg in args {
            let Some(flag) = arg.to_str() else {
                return Err(OptionsError::Unrecognized(arg.to_string_lossy().into_owned()));
            };

            if let Some(value) = flag.strip_prefix("--num-threads=") {
                opts.num_threads = parse_number("--num-threads", value)?;
                if opts.num_threads == 0 {
                    return Err(OptionsError::InvalidValue {
                        flag: "--num-threads",
                        value: value.to_string(),
                    });
                }
                continue;
            }
            if let Some(value) = flag.strip_prefix("--dirty-max-index-size=") {
                opts.dirty_max_index_size = parse_number("--dirty-max-index-size", value)?;
                continue;
            }
            if let Some(value) = flag.strip_prefix("--lock-fd=") {
                opts.lock_fd = Some(parse_number("--lock-fd", value)?);
                continue;
            }
            if let Some(value) = flag.strip_prefix("--sigwinch-pid=") {
                opts.sigwinch_pid = Some(parse_number("--sigwinch-pid", value)?);
                continue;
            }
            match flag {
                "--help" | "-h" => return Err(OptionsError::HelpRequested),
                _ => return Err(OptionsError::Unrecognized(flag.to_string())),
            }
        }

        Ok(opts)
    }

    /// Parses the process arguments, printing usage and exiting on
    /// rejection (exit code 2) or help (exit code 0).
    #[must_use]
    pub fn parse() -> Self {
        let mut args = std::env::args_os();
        let _exe = args.next();
        match Self::parse_from(args) {
            Ok(opts) => opts,
            Err(OptionsError::HelpRequested) => {
                eprintln!("{USAGE}");
                std::process::exit(0);
            }
            Err(err) => {
                eprintln!("statusd: {err}");
                eprintln!("{USAGE}");
                std::process::exit(2);
            }
        }
    }
}

fn parse_number<T: std::str::FromStr>(
    flag: &'static str,
    value: &str,
) -> Result<T, OptionsError> {
    value.parse().map_err(|_| OptionsError::InvalidValue {
        flag,
        value: value.to_string(),
    })
}
