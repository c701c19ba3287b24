use std::fs::{self, File};
use std::io::{self, BufWriter, ErrorKind, Write};
use std::path::{Path, PathBuf};

use tracing::{debug, warn};

use super::state::Materializer;
use super::ExtractConfig;
use crate::block::EntryMeta;
use crate::fsx;

/// Writes entries below a target directory.
pub struct FsMaterializer {
    root: PathBuf,
    ignore_perms: bool,
    ignore_owners: bool,
    /// Directory metadata is applied last so that read-only directories can
    /// still be filled.
    deferred_dirs: Vec<(PathBuf, EntryMeta)>,
}

impl FsMaterializer {
    pub fn new(config: &ExtractConfig) -> Self {
        FsMaterializer {
            root: config.target.clone(),
            ignore_perms: config.ignore_perms,
            ignore_owners: config.ignore_owners,
            deferred_dirs: Vec::new(),
        }
    }

    fn apply_meta(&self, target: &Path, meta: &EntryMeta) -> io::Result<()> {
        // Ownership first: chown may clear setuid/setgid bits.
        if !self.ignore_owners {
            if let Err(e) = fsx::set_owner(target, meta.uid, meta.gid) {
                if e.kind() == ErrorKind::PermissionDenied {
                    debug!(path = %target.display(), uid = meta.uid, gid = meta.gid, "not permitted to restore owner");
                } else {
                    warn!(path = %target.display(), error = %e, "cannot restore owner");
                }
            }
        }
        if !self.ignore_perms {
            fsx::set_unix_permissions(target, meta.mode)?;
        }
        Ok(())
    }
}

impl Materializer for FsMaterializer {
    type File = BufWriter<File>;

    fn create_dir(&mut self, path: &Path, meta: &EntryMeta) -> io::Result<()> {
        let target = self.root.join(path);
        fs::create_dir_all(&target)?;
        if !(self.ignore_perms && self.ignore_owners) {
            self.deferred_dirs.push((target, *meta));
        }
        Ok(())
    }

    fn create_file(&mut self, path: &Path, _meta: &EntryMeta) -> io::Result<Self::File> {
        let target = self.root.join(path);
        if let Some(parent) = target.parent() {
            fs::create_dir_all(parent)?;
        }
        Ok(BufWriter::new(File::create(&target)?))
    }

    fn finish_file(&mut self, path: &Path, file: Self::File, meta: &EntryMeta, _size: u64) -> io::Result<()> {
        let file = file.into_inner().map_err(|e| e.into_error())?;
        drop(file);
        self.apply_meta(&self.root.join(path), meta)
    }

    fn finalize(&mut self) -> io::Result<()> {
        // Deepest first, so a parent's mode never blocks its children.
        let mut dirs = std::mem::take(&mut self.deferred_dirs);
        dirs.sort_by(|a, b| b.0.components().count().cmp(&a.0.components().count()));
        for (target, meta) in &dirs {
            self.apply_meta(target, meta)?;
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryKind {
    Directory,
    File,
}

/// One line of `-t` output.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ListedEntry {
    pub path: PathBuf,
    pub kind: EntryKind,
    pub meta: EntryMeta,
    pub size: u64,
}

impl std::fmt::Display for ListedEntry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let tag = match self.kind {
            EntryKind::Directory => 'd',
            EntryKind::File => '-',
        };
        write!(
            f,
            "{tag}{:04o} {:>6}/{:<6} {:>12} {}",
            self.meta.mode & 0o7777,
            self.meta.uid,
            self.meta.gid,
            self.size,
            self.path.display()
        )
    }
}

/// Collects entries without touching the filesystem; content is still
/// hashed by the state machine, so listing verifies the archive too.
#[derive(Debug, Default)]
pub struct ListingMaterializer {
    entries: Vec<ListedEntry>,
}

impl ListingMaterializer {
    pub fn into_entries(self) -> Vec<ListedEntry> {
        self.entries
    }
}

impl Materializer for ListingMaterializer {
    type File = io::Sink;

    fn create_dir(&mut self, path: &Path, meta: &EntryMeta) -> io::Result<()> {
        self.entries.push(ListedEntry {
            path: path.to_path_buf(),
            kind: EntryKind::Directory,
            meta: *meta,
            size: 0,
        });
        Ok(())
    }

    fn create_file(&mut self, _path: &Path, _meta: &EntryMeta) -> io::Result<io::Sink> {
        Ok(io::sink())
    }

    fn finish_file(&mut self, path: &Path, _file: io::Sink, meta: &EntryMeta, size: u64) -> io::Result<()> {
        self.entries.push(ListedEntry {
            path: path.to_path_buf(),
            kind: EntryKind::File,
            meta: *meta,
            size,
        });
        Ok(())
    }
}
