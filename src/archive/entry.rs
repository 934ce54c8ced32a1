use std::{
    cmp::min,
    fmt, io,
    io::Read,
    path::{Path, PathBuf},
};

use log::warn;

use crate::format::format_path;

/// Why an entry was left out of (or left incomplete in) an archive.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SkipReason {
    NotFound,
    PermissionDenied,
    /// Replaced by a symlink after the walk saw a regular file.
    Symlink,
    Io(String),
}

impl From<&io::Error> for SkipReason {
    fn from(err: &io::Error) -> Self {
        if err.raw_os_error() == Some(libc::ELOOP) {
            return SkipReason::Symlink;
        }

        match err.kind() {
            io::ErrorKind::NotFound => SkipReason::NotFound,
            io::ErrorKind::PermissionDenied => SkipReason::PermissionDenied,
            _ => SkipReason::Io(err.to_string()),
        }
    }
}

impl From<&walkdir::Error> for SkipReason {
    fn from(err: &walkdir::Error) -> Self {
        err.io_error()
            .map_or_else(|| SkipReason::Io(err.to_string()), SkipReason::from)
    }
}

impl fmt::Display for SkipReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SkipReason::NotFound => write!(f, "disappeared during backup"),
            SkipReason::PermissionDenied => write!(f, "permission denied"),
            SkipReason::Symlink => write!(f, "turned into a symlink during backup"),
            SkipReason::Io(message) => write!(f, "can't be read: {message}"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SkippedEntry {
    pub path: PathBuf,
    pub reason: SkipReason,
}

impl SkippedEntry {
    pub(super) fn new(path: &Path, reason: SkipReason) -> Self {
        let formatted_path = format_path(path);
        warn!("skipped {formatted_path} ({reason})");
        SkippedEntry {
            path: path.to_owned(),
            reason,
        }
    }
}

/// Yields exactly `len` bytes. Once the inner reader fails or ends early the
/// rest is filled with zeros, so the tar entry always matches its header.
#[derive(Debug)]
pub(super) struct PaddedReader<R> {
    inner: R,
    remaining: u64,
    short: bool,
    failure: Option<io::Error>,
}

impl<R: Read> PaddedReader<R> {
    pub fn new(inner: R, len: u64) -> Self {
        PaddedReader {
            inner,
            remaining: len,
            short: false,
            failure: None,
        }
    }

    /// Why the entry's content is incomplete, if it is.
    pub fn finish(self) -> Option<SkipReason> {
        if let Some(err) = &self.failure {
            Some(SkipReason::from(err))
        } else if self.short {
            Some(SkipReason::Io("file shrank while being read".to_owned()))
        } else {
            None
        }
    }
}

impl<R: Read> Read for PaddedReader<R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let max = usize::try_from(self.remaining).map_or(buf.len(), |rem| min(rem, buf.len()));
        if max == 0 {
            return Ok(0);
        }

        let buf = &mut buf[..max];
        if !self.short && self.failure.is_none() {
            match self.inner.read(buf) {
                Ok(0) => self.short = true,
                Ok(count) => {
                    self.remaining -= count as u64;
                    return Ok(count);
                }
                Err(err) if err.kind() == io::ErrorKind::Interrupted => return Err(err),
                Err(err) => self.failure = Some(err),
            }
        }

        buf.fill(0);
        self.remaining -= max as u64;
        Ok(max)
    }
}
