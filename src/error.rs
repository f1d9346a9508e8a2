use std::{error::Error as StdError, fmt};

/// Error taxonomy for the data-access engine.
///
/// Every failure surfaced by the page cache or the LSM cursor fits one of
/// these kinds; callers match on `kind()` instead of parsing messages.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// key absent, or page state not reachable under the caller's flags.
    NotFound,
    /// subtree reshaped mid-descent; caller must re-descend from an ancestor.
    Restart,
    /// an evictor (or another racer) holds the slot; caller backs off and retries.
    Busy,
    /// overwrite-off insert hit an existing key.
    DuplicateKey,
    /// snapshot-isolation write conflict.
    Conflict,
    /// allocation failed.
    Oom,
    /// block manager / codec I/O error.
    Io,
    /// invariant broken.
    Fatal,
}

#[derive(Debug)]
pub struct Error {
    kind: ErrorKind,
    details: String,
}

impl Error {
    pub fn new(kind: ErrorKind, msg: impl Into<String>) -> Self {
        Self {
            kind,
            details: msg.into(),
        }
    }

    pub fn not_found(msg: impl Into<String>) -> Self {
        Self::new(ErrorKind::NotFound, msg)
    }

    pub fn restart(msg: impl Into<String>) -> Self {
        Self::new(ErrorKind::Restart, msg)
    }

    pub fn busy(msg: impl Into<String>) -> Self {
        Self::new(ErrorKind::Busy, msg)
    }

    pub fn duplicate_key(msg: impl Into<String>) -> Self {
        Self::new(ErrorKind::DuplicateKey, msg)
    }

    pub fn conflict(msg: impl Into<String>) -> Self {
        Self::new(ErrorKind::Conflict, msg)
    }

    pub fn oom(msg: impl Into<String>) -> Self {
        Self::new(ErrorKind::Oom, msg)
    }

    pub fn io(msg: impl Into<String>) -> Self {
        Self::new(ErrorKind::Io, msg)
    }

    pub fn fatal(msg: impl Into<String>) -> Self {
        Self::new(ErrorKind::Fatal, msg)
    }

    pub fn kind(&self) -> ErrorKind {
        self.kind
    }

    pub fn is_not_found(&self) -> bool {
        self.kind == ErrorKind::NotFound
    }

    pub fn is_busy(&self) -> bool {
        self.kind == ErrorKind::Busy
    }

    pub fn is_restart(&self) -> bool {
        self.kind == ErrorKind::Restart
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{:?}: {}", self.kind, self.details)
    }
}

impl StdError for Error {}

impl From<std::io::Error> for Error {
    fn from(e: std::io::Error) -> Self {
        Error::io(e.to_string())
    }
}

pub type Result<T> = std::result::Result<T, Error>;

/// `()`-valued result, for operations whose success carries no payload.
pub type VoidResult = Result<()>;
