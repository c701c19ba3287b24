use std::path::PathBuf;

use thiserror::Error;

/// The primary error type for all operations in the `streamarch` crate.
///
/// Per-entry problems during creation (an unreadable directory, a file that
/// vanished) never surface here; workers log and skip them. Everything that
/// does reach this type ends the run with a non-zero status.
#[derive(Debug, Error)]
pub enum ArchiverError {
    /// Invalid command-line configuration (block size, pool sizes, patterns, ...).
    #[error("configuration error: {0}")]
    Config(String),

    /// An I/O error occurred, typically while reading or writing a file.
    /// Includes the path where the error happened.
    #[error("I/O error on path '{}': {source}", path.display())]
    Io {
        #[source]
        source: std::io::Error,
        path: PathBuf,
    },

    /// The byte stream is not a well-formed sequence of frames.
    #[error("malformed archive: {0}")]
    Frame(#[from] FrameError),

    /// The frames are well-formed but violate the per-path block order.
    #[error("protocol violation: {0}")]
    Protocol(#[from] ProtocolError),

    /// One or more extracted files did not match their recorded digest.
    #[error("checksum mismatch for {} file(s): {}", paths.len(), display_paths(paths))]
    Integrity { paths: Vec<PathBuf> },

    /// The stream ended cleanly while files were still incomplete.
    #[error("archive truncated; incomplete file(s): {}", display_paths(paths))]
    Truncated { paths: Vec<PathBuf> },

    /// A worker tried to push onto a queue the coordinator already closed.
    #[error("{0} queue used after close")]
    QueueClosed(&'static str),

    /// A worker thread panicked.
    #[error("a pipeline worker panicked")]
    WorkerPanicked,
}

impl ArchiverError {
    pub fn io(source: std::io::Error, path: impl Into<PathBuf>) -> Self {
        ArchiverError::Io { source, path: path.into() }
    }
}

/// Errors raised while decoding the framed byte stream.
#[derive(Debug, Error)]
pub enum FrameError {
    #[error("stream does not start with the archive magic")]
    BadMagic,

    #[error("unsupported format version {0}")]
    UnsupportedVersion(u16),

    #[error("unknown block kind tag {0:#04x}")]
    UnknownKind(u8),

    #[error("stream ended inside a frame while reading the {0}")]
    Truncated(&'static str),

    #[error("block path is empty")]
    EmptyPath,

    #[error("path of {0} bytes does not fit a frame")]
    PathTooLong(usize),

    #[error("payload of {0} bytes does not fit a frame")]
    PayloadTooLarge(usize),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// Per-path ordering violations detected by the extraction state machine.
#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error("duplicate start of file for '{}'", .0.display())]
    DuplicateStart(PathBuf),

    /// A directory or file block for a path the stream already produced.
    #[error("'{}' appears more than once in the archive", .0.display())]
    DuplicateEntry(PathBuf),

    #[error("data block for '{}' without a preceding start of file", .0.display())]
    DataWithoutStart(PathBuf),

    #[error("end of file for '{}' without a preceding start of file", .0.display())]
    EndWithoutStart(PathBuf),

    #[error("checksum for '{}' before its end of file", .0.display())]
    ChecksumBeforeEnd(PathBuf),

    #[error("refusing unsafe archive path '{}'", .0.display())]
    UnsafePath(PathBuf),
}

fn display_paths(paths: &[PathBuf]) -> String {
    paths
        .iter()
        .map(|p| p.display().to_string())
        .collect::<Vec<_>>()
        .join(", ")
}
