//! Extraction: a single sequential pass over the block stream.
//!
//! Extraction needs no concurrency. The stream is decoded frame by frame and
//! every block is handed to the [`Reconstructor`], which tracks the files
//! that are still in flight and drives a [`Materializer`].

mod materialize;
pub mod state;

use std::io::{BufReader, Read};
use std::path::PathBuf;

use tracing::info;

use crate::block::BlockReader;
use crate::stats::ExtractSummary;
use crate::ArchiverError;

pub use materialize::{EntryKind, FsMaterializer, ListedEntry, ListingMaterializer};
pub use state::{Materializer, Reconstructor};

const READ_BUFFER: usize = 1 << 20; // 1 MiB

/// Holds all configuration options for an extraction run.
#[derive(Debug, Clone)]
pub struct ExtractConfig {
    /// Directory the archive paths are resolved against.
    pub target: PathBuf,
    /// Do not restore permission bits.
    pub ignore_perms: bool,
    /// Do not restore uid/gid.
    pub ignore_owners: bool,
}

impl Default for ExtractConfig {
    fn default() -> Self {
        ExtractConfig { target: PathBuf::from("."), ignore_perms: false, ignore_owners: false }
    }
}

/// Feeds every block of `input` to a [`Reconstructor`] over `sink`.
///
/// Framing and protocol errors stop the pass immediately. Checksum
/// mismatches are collected and returned as [`ArchiverError::Integrity`]
/// once the whole stream has been processed.
pub fn replay<R: Read, M: Materializer>(input: R, sink: M) -> Result<(ExtractSummary, M), ArchiverError> {
    let mut reader = BlockReader::new(BufReader::with_capacity(READ_BUFFER, input))?;
    let mut state = Reconstructor::new(sink);
    while let Some(block) = reader.next_block()? {
        state.apply(block)?;
    }
    state.finish()
}

/// Unpacks an archive below `config.target`, creating it if needed.
pub fn extract_archive<R: Read>(input: R, config: &ExtractConfig) -> Result<ExtractSummary, ArchiverError> {
    std::fs::create_dir_all(&config.target).map_err(|e| ArchiverError::io(e, &config.target))?;
    let (summary, _) = replay(input, FsMaterializer::new(config))?;
    info!(
        directories = summary.directories,
        files = summary.files,
        bytes = summary.bytes,
        target = %config.target.display(),
        "extraction complete"
    );
    Ok(summary)
}

/// Reads and verifies an archive without writing anything, returning its
/// entries in stream order (files appear when their EndOfFile is seen).
pub fn list_archive<R: Read>(input: R) -> Result<(Vec<ListedEntry>, ExtractSummary), ArchiverError> {
    let (summary, listing) = replay(input, ListingMaterializer::default())?;
    Ok((listing.into_entries(), summary))
}
