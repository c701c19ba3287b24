//! Directory scanner pool.

use std::path::{Path, PathBuf};

use tracing::{debug, error, trace, warn};
use walkdir::{DirEntry, WalkDir};

use super::Pipeline;
use crate::block::Block;
use crate::fsx;
use crate::queue::TryPush;
use crate::ArchiverError;

/// Scanner thread body. Returns once the scan queue is closed and this
/// worker's local backlog is empty.
pub(super) fn run(p: &Pipeline<'_>) {
    // Subdirectories that did not fit on the scan queue. They are already
    // counted, and keeping them here means a scanner never blocks on the
    // queue it also consumes.
    let mut backlog: Vec<PathBuf> = Vec::new();
    loop {
        let dir = match backlog.pop() {
            Some(dir) => dir,
            None => match p.scan_queue.pop() {
                Some(dir) => dir,
                None => break,
            },
        };
        let _done = p.tracker.finish_on_drop();
        if p.is_cancelled() {
            continue;
        }
        scan_directory(p, &dir, &mut backlog);
    }
}

fn list(dir: &Path) -> Result<Vec<Result<DirEntry, walkdir::Error>>, walkdir::Error> {
    let mut entries = Vec::new();
    for item in WalkDir::new(dir).min_depth(1).max_depth(1).sort_by_file_name() {
        match item {
            // Depth 0 errors are about the directory itself.
            Err(e) if e.depth() == 0 => return Err(e),
            other => entries.push(other),
        }
    }
    Ok(entries)
}

fn scan_directory(p: &Pipeline<'_>, dir: &Path, backlog: &mut Vec<PathBuf>) {
    let listing = {
        let _permit = p.gate.acquire();
        list(dir)
    };
    let entries = match listing {
        Ok(entries) => entries,
        Err(e) => {
            warn!(path = %dir.display(), error = %e, "cannot list directory");
            p.stats.record_error();
            return;
        }
    };
    trace!(path = %dir.display(), entries = entries.len(), "listed directory");

    for entry in entries {
        if p.is_cancelled() {
            return;
        }
        let entry = match entry {
            Ok(entry) => entry,
            Err(e) => {
                warn!(error = %e, "cannot read directory entry");
                p.stats.record_error();
                continue;
            }
        };
        if let Err(e) = dispatch_entry(p, &entry, backlog) {
            error!(path = %entry.path().display(), error = %e, "failed to dispatch entry");
        }
    }
}

fn dispatch_entry(p: &Pipeline<'_>, entry: &DirEntry, backlog: &mut Vec<PathBuf>) -> Result<(), ArchiverError> {
    let path = entry.path();
    if p.is_excluded(path) {
        debug!(path = %path.display(), "excluded");
        p.stats.record_skipped();
        return Ok(());
    }

    let file_type = entry.file_type();
    if file_type.is_dir() {
        let meta = match entry.metadata() {
            Ok(meta) => meta,
            Err(e) => {
                warn!(path = %path.display(), error = %e, "cannot stat directory");
                p.stats.record_error();
                return Ok(());
            }
        };
        p.tracker.add(1);
        let queued = p
            .block_queue
            .push(Block::directory(fsx::archive_path(path), fsx::entry_meta(&meta)))
            .and_then(|()| p.scan_queue.try_push(path.to_path_buf()));
        match queued {
            Ok(TryPush::Queued) => {}
            Ok(TryPush::Full(dir)) => backlog.push(dir),
            Err(e) => {
                p.tracker.done();
                return Err(e);
            }
        }
        p.stats.record_directory();
    } else if file_type.is_file() {
        if p.config.skip_identity.is_some() {
            if let Ok(meta) = entry.metadata() {
                if p.is_output(&meta) {
                    debug!(path = %path.display(), "skipping the archive being written");
                    p.stats.record_skipped();
                    return Ok(());
                }
            }
        }
        p.dispatch(&p.read_queue, path.to_path_buf())?;
    } else {
        let kind = if file_type.is_symlink() { "symlink" } else { "special file" };
        warn!(path = %path.display(), kind, "unsupported entry kind; skipping");
        p.stats.record_skipped();
    }
    Ok(())
}
