//! File reader pool: turns one file into its StartOfFile → Data* → EndOfFile
//! → Checksum sequence. The whole sequence is pushed by the worker that owns
//! the file, so it never interleaves with itself on the block queue.

use std::fs::File;
use std::io::{self, Read};
use std::path::{Path, PathBuf};

use tracing::{debug, error, trace, warn};

use super::Pipeline;
use crate::block::Block;
use crate::fsx;
use crate::ArchiverError;

pub(super) fn run(p: &Pipeline<'_>) {
    while let Some(path) = p.read_queue.pop() {
        let _done = p.tracker.finish_on_drop();
        if p.is_cancelled() {
            continue;
        }
        if let Err(e) = archive_file(p, &path) {
            error!(path = %path.display(), error = %e, "failed to queue file blocks");
        }
    }
}

/// Reads up to `limit` bytes, short only at end of file.
fn read_chunk(file: &mut File, limit: usize) -> io::Result<Vec<u8>> {
    let mut chunk = Vec::with_capacity(limit);
    file.take(limit as u64).read_to_end(&mut chunk)?;
    Ok(chunk)
}

fn open(path: &Path) -> io::Result<(File, std::fs::Metadata)> {
    let file = File::open(path)?;
    let meta = file.metadata()?;
    Ok((file, meta))
}

/// Per-file failures are logged here and never returned; the error type is
/// reserved for queue misuse.
fn archive_file(p: &Pipeline<'_>, path: &Path) -> Result<(), ArchiverError> {
    let opened = {
        let _permit = p.gate.acquire();
        open(path)
    };
    let (mut file, meta) = match opened {
        Ok(opened) => opened,
        Err(e) => {
            warn!(path = %path.display(), error = %e, "cannot open file");
            p.stats.record_error();
            return Ok(());
        }
    };
    if p.is_output(&meta) {
        debug!(path = %path.display(), "skipping the archive being written");
        p.stats.record_skipped();
        return Ok(());
    }

    let name: PathBuf = fsx::archive_path(path);
    p.block_queue.push(Block::start_of_file(name.clone(), fsx::entry_meta(&meta)))?;

    let mut hasher = blake3::Hasher::new();
    let mut total = 0u64;
    loop {
        if p.is_cancelled() {
            return Ok(());
        }
        let chunk = {
            let _permit = p.gate.acquire();
            read_chunk(&mut file, p.config.block_size)
        };
        match chunk {
            Ok(chunk) if chunk.is_empty() => break,
            Ok(chunk) => {
                hasher.update(&chunk);
                total += chunk.len() as u64;
                p.block_queue.push(Block::data(name.clone(), chunk))?;
            }
            Err(e) => {
                // StartOfFile is already out. Close the sequence with a digest
                // that cannot verify so extraction flags this file.
                warn!(path = %path.display(), error = %e, offset = total, "read failed mid-file");
                p.stats.record_error();
                p.block_queue.push(Block::end_of_file(name.clone()))?;
                p.block_queue.push(Block::checksum(name, Vec::new()))?;
                return Ok(());
            }
        }
    }

    p.block_queue.push(Block::end_of_file(name.clone()))?;
    p.block_queue.push(Block::checksum(name, hasher.finalize().as_bytes().to_vec()))?;
    p.stats.record_file(total);
    trace!(path = %path.display(), bytes = total, "file queued");
    Ok(())
}
