//! Error types for status computation.
//!
//! One enum per concern: repository-level failures here, request parsing
//! failures live with the reader. All enums are `#[non_exhaustive]` so
//! variants can be added without breaking callers.
//!
//! # Design Notes
//! - I/O and library errors preserve their source for diagnostics.
//! - An over-budget index is *not* an error; it is reported through
//!   unknown result fields, never through this type.

use std::fmt;
use std::io;

/// Failures while opening a repository or computing its status.
///
/// Every variant maps to the same wire outcome (`is_repo = 0`); the
/// distinction exists for logging.
#[derive(Debug)]
#[non_exhaustive]
pub enum StatusError {
    /// The directory is not inside a git working tree.
    NotARepository,
    /// The path resolves to a repository without a working tree.
    BareRepository,
    /// Syscall failure during the scan.
    Io(io::Error),
    /// Underlying version-control primitive failure.
    Git(git2::Error),
}

impl StatusError {
    /// Creates an I/O error variant.
    #[inline]
    pub fn io(err: io::Error) -> Self {
        Self::Io(err)
    }

    /// Maps a repository-open failure, folding "no repository found"
    /// into [`StatusError::NotARepository`].
    pub fn from_open(err: git2::Error) -> Self {
        if err.code() == git2::ErrorCode::NotFound {
            Self::NotARepository
        } else {
            Self::Git(err)
        }
    }
}

impl fmt::Display for StatusError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NotARepository => write!(f, "not a git repository"),
            Self::BareRepository => write!(f, "repository has no working tree"),
            Self::Io(err) => write!(f, "I/O error: {err}"),
            Self::Git(err) => write!(f, "git error: {err}"),
        }
    }
}

impl std::error::Error for StatusError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Io(err) => Some(err),
            Self::Git(err) => Some(err),
            _ => None,
        }
    }
}

impl From<io::Error> for StatusError {
    fn from(err: io::Error) -> Self {
        Self::Io(err)
    }
}

impl From<git2::Error> for StatusError {
    fn from(err: git2::Error) -> Self {
        Self::Git(err)
    }
}
