//! Request parsing and framed reading.
//!
//! Requests arrive on stdin as NUL-terminated records with tab-separated
//! fields: `id`, `dir`, and an optional diagnostics flag (`"1"`). The
//! reader also watches the configured lock descriptor; when the parent
//! process dies that descriptor reaches EOF and the daemon must exit
//! instead of lingering as an orphan.
//!
//! Malformed records are a caller bug: they are reported to the loop as
//! parse errors, logged, and dropped without a response.

use std::fmt;
use std::io;
use std::path::PathBuf;

use memchr::memchr;

/// One parsed request.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Request {
    /// Opaque token echoed back verbatim in the response.
    pub id: Vec<u8>,
    /// Absolute path of a file or directory inside a working tree.
    pub dir: PathBuf,
    /// When set, the daemon logs per-request diagnostics.
    pub diag: bool,
}

/// Why a record failed to parse.
#[derive(Debug, PartialEq, Eq)]
#[non_exhaustive]
pub enum ParseError {
    /// Record had no directory field.
    MissingDir,
    /// Directory field is not an absolute path.
    DirNotAbsolute,
    /// Third field present but not the literal `"1"`.
    BadDiagFlag,
    /// More than three fields.
    TrailingFields,
}

impl fmt::Display for ParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::MissingDir => write!(f, "request has no directory field"),
            Self::DirNotAbsolute => write!(f, "request directory is not absolute"),
            Self::BadDiagFlag => write!(f, "diagnostics flag must be \"1\""),
            Self::TrailingFields => write!(f, "request has extra fields"),
        }
    }
}

impl std::error::Error for ParseError {}

/// Parses one framed record (without its NUL terminator).
///
/// A trailing newline before the terminator is tolerated so both
/// `id\tdir\0` and `id\tdir\n\0` frames work.
pub fn parse_request(record: &[u8]) -> Result<Request, ParseError> {
    let mut record = record;
    while record.last().is_some_and(|b| *b == b'\n' || *b == b'\r') {
        record = &record[..record.len() - 1];
    }

    let mut fields = record.split(|&b| b == b'\t');
    let id = fields.next().unwrap_or(b"").to_vec();
    let dir = fields.next().ok_or(ParseError::MissingDir)?;
    if dir.is_empty() {
        return Err(ParseError::MissingDir);
    }

    let diag = match fields.next() {
        None => false,
        Some(b"1") => true,
        Some(_) => return Err(ParseError::BadDiagFlag),
    };
    if fields.next().is_some() {
        return Err(ParseError::TrailingFields);
    }

    let dir = dir_to_path(dir);
    if !dir.is_absolute() {
        return Err(ParseError::DirNotAbsolute);
    }

    Ok(Request { id, dir, diag })
}

#[cfg(unix)]
fn dir_to_path(bytes: &[u8]) -> PathBuf {
    use std::os::unix::ffi::OsStrExt;
    PathBuf::from(std::ffi::OsStr::from_bytes(bytes))
}

#[cfg(not(unix))]
fn dir_to_path(bytes: &[u8]) -> PathBuf {
    PathBuf::from(String::from_utf8_lossy(bytes).into_owned())
}

/// What the reader produced.
#[derive(Debug)]
pub enum ReadOutcome {
    /// One complete record (NUL terminator stripped).
    Record(Vec<u8>),
    /// The request stream closed.
    Eof,
    /// The lock descriptor reached EOF: the parent is gone.
    ParentExit,
}

/// Framed reader over the request descriptor, multiplexed with the lock
/// descriptor.
pub struct RequestReader {
    request_fd: i32,
    lock_fd: Option<i32>,
    buf: Vec<u8>,
    /// Bytes of `buf` already consumed by returned records.
    consumed: usize,
}

impl RequestReader {
    /// Creates a reader over `request_fd` (normally stdin).
    #[must_use]
    pub fn new(request_fd: i32, lock_fd: Option<i32>) -> Self {
        Self {
            request_fd,
            lock_fd,
            buf: Vec::with_capacity(4096),
            consumed: 0,
        }
    }

    /// Blocks until a complete record, stream EOF, or parent death.
    ///
    /// # Errors
    ///
    /// Fatal descriptor errors only; `EINTR` is retried internally.
    pub fn read_outcome(&mut self) -> io::Result<ReadOutcome> {
        loop {
            if let Some(pos) = memchr(0, &self.buf[self.consumed..]) {
                let start = self.consumed;
                let end = start + pos;
                let record = self.buf[start..end].to_vec();
                self.consumed = end + 1;
                // Compact once everything buffered has been handed out.
                if self.consumed == self.buf.len() {
                    self.buf.clear();
                    self.consumed = 0;
                }
                return Ok(ReadOutcome::Record(record));
            }

            match self.fill()? {
                Fill::Data => {}
                Fill::Eof => return Ok(ReadOutcome::Eof),
                Fill::ParentExit => return Ok(ReadOutcome::ParentExit),
            }
        }
    }

    #[cfg(unix)]
    fn fill(&mut self) -> io::Result<Fill> {
        let mut fds = [
            libc::pollfd {
                fd: self.request_fd,
                events: libc::POLLIN,
                revents: 0,
            },
            libc::pollfd {
                fd: self.lock_fd.unwrap_or(-1),
                events: libc::POLLIN,
                revents: 0,
            },
        ];
        let nfds: libc::nfds_t = if self.lock_fd.is_some() { 2 } else { 1 };

        loop {
            let rc = unsafe { libc::poll(fds.as_mut_ptr(), nfds, -1) };
            if rc < 0 {
                let err = io::Error::last_os_error();
                if err.raw_os_error() == Some(libc::EINTR) {
                    continue;
                }
                return Err(err);
            }

            if self.lock_fd.is_some() && fds[1].revents != 0 {
                let mut byte = [0u8; 1];
                let n = unsafe {
                    libc::read(fds[1].fd, byte.as_mut_ptr() as *mut libc::c_void, 1)
                };
                // EOF or error on the lock descriptor both mean the
                // parent is no longer holding its end.
                if n <= 0 {
                    return Ok(Fill::ParentExit);
                }
                // Stray bytes on the lock descriptor are ignored.
            }

            if fds[0].revents != 0 {
                return self.read_chunk();
            }
        }
    }

    #[cfg(not(unix))]
    fn fill(&mut self) -> io::Result<Fill> {
        self.read_chunk()
    }

    fn read_chunk(&mut self) -> io::Result<Fill> {
        let mut chunk = [0u8; 4096];
        let n = read_fd(self.request_fd, &mut chunk)?;
        if n == 0 {
            return Ok(Fill::Eof);
        }
        self.buf.extend_from_slice(&chunk[..n]);
        Ok(Fill::Data)
    }
}

enum Fill {
    Data,
    Eof,
    ParentExit,
}

#[cfg(unix)]
fn read_fd(fd: i32, buf: &mut [u8]) -> io::Result<usize> {
    loop {
        let n = unsafe { libc::read(fd, buf.as_mut_ptr() as *mut libc::c_void, buf.len()) };
        if n < 0 {
            let err = io::Error::last_os_error();
            if err.raw_os_error() == Some(libc::EINTR) {
                continue;
            }
            return Err(err);
        }
        return Ok(n as usize);
    }
}

#[cfg(not(unix))]
fn read_fd(_fd: i32, buf: &mut [u8]) -> io::Result<usize> {
    use std::io::Read;
    std::io::stdin().lock().read(buf)
}
