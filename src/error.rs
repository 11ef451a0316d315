use std::path::PathBuf;

use thiserror::Error;

/// The primary error type for all operations in the `streamarch` crate.
///
/// Every variant is fatal for the run that produced it. The only recoverable
/// condition (a file vanishing between listing and opening) never surfaces as
/// an error; it is logged and counted instead.
#[derive(Debug, Error)]
pub enum ArchiverError {
    /// An I/O error occurred on a filesystem path.
    #[error("I/O error on path '{}': {source}", path.display())]
    Io {
        #[source]
        source: std::io::Error,
        path: PathBuf,
    },

    /// Reading or writing the archive stream itself failed.
    #[error("archive stream I/O error: {0}")]
    Stream(#[from] std::io::Error),

    /// The stream ended inside a block.
    #[error("corrupt archive: stream truncated while reading {0}")]
    Truncated(&'static str),

    /// A kind byte other than Data (1), StartOfFile (2) or EndOfFile (4).
    #[error("corrupt archive: unrecognized block kind {0:#04x} for '{1}'")]
    UnknownBlockKind(u8, String),

    /// The encoded path bytes are not valid UTF-8.
    #[error("corrupt archive: block path is not valid UTF-8")]
    InvalidPathEncoding,

    /// A Data or EndOfFile block named a path with no open StartOfFile.
    #[error("corrupt archive: block for '{0}' arrived before its start of file")]
    UnopenedPath(String),

    /// A second StartOfFile arrived for a path that is still open.
    #[error("corrupt archive: '{0}' was started twice")]
    DuplicateStart(String),

    /// The stream ended while a file was still open.
    #[error("corrupt archive: '{0}' has no end of file")]
    UnterminatedFile(String),

    /// The archive path would escape the destination directory.
    #[error("corrupt archive: unsafe path '{0}'")]
    UnsafePath(String),

    /// A filesystem path cannot be recorded because it is not UTF-8.
    #[error("path '{}' is not valid UTF-8", .0.display())]
    NonUtf8Path(PathBuf),

    /// An archive path does not fit the 16-bit length prefix.
    #[error("archive path is {len} bytes, the format allows at most 65535")]
    PathTooLong { len: usize },

    /// A data payload does not fit the 16-bit length prefix.
    #[error("data block is {len} bytes, the format allows at most 65535")]
    PayloadTooLarge { len: usize },

    /// A root is neither a directory nor a regular file.
    #[error("'{}' is neither a directory nor a regular file", .0.display())]
    UnsupportedRoot(PathBuf),

    /// `archive` was called without any root.
    #[error("no input paths to archive")]
    NoRoots,

    /// Rejected pipeline configuration.
    #[error("invalid options: {0}")]
    InvalidOptions(&'static str),

    /// A worker thread panicked; its partial work is lost.
    #[error("a worker thread panicked")]
    WorkerPanicked,
}

impl ArchiverError {
    /// Wraps an I/O error together with the path it happened on.
    pub fn io(source: std::io::Error, path: impl Into<PathBuf>) -> Self {
        ArchiverError::Io { source, path: path.into() }
    }

    /// True for every malformed-stream condition, as opposed to I/O failures
    /// and caller mistakes.
    pub fn is_corruption(&self) -> bool {
        matches!(
            self,
            ArchiverError::Truncated(_)
                | ArchiverError::UnknownBlockKind(..)
                | ArchiverError::InvalidPathEncoding
                | ArchiverError::UnopenedPath(_)
                | ArchiverError::DuplicateStart(_)
                | ArchiverError::UnterminatedFile(_)
                | ArchiverError::UnsafePath(_)
        )
    }
}

/// Convenient crate-wide result type.
pub type Result<T> = std::result::Result<T, ArchiverError>;
