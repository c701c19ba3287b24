//! Path-keyed reconstruction state machine.
//!
//! Blocks of different files arrive interleaved, so every file that has
//! started but not yet been verified keeps a context in a map:
//!
//! ```text
//! absent ──StartOfFile──► open ──EndOfFile──► closed ──Checksum──► finished
//! absent ──Directory──► finished
//! ```
//!
//! A finished path never comes back: every path occurs once per archive.
//!
//! The machine performs no I/O itself; it drives a [`Materializer`].

use std::collections::{HashMap, HashSet};
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use tracing::{error, trace};

use crate::block::{Block, BlockKind, EntryMeta};
use crate::error::ProtocolError;
use crate::fsx;
use crate::stats::ExtractSummary;
use crate::ArchiverError;

/// Where reconstructed entries go: the filesystem, a listing, memory.
pub trait Materializer {
    type File: Write;

    fn create_dir(&mut self, path: &Path, meta: &EntryMeta) -> io::Result<()>;

    fn create_file(&mut self, path: &Path, meta: &EntryMeta) -> io::Result<Self::File>;

    /// Called on EndOfFile with everything written; closes the file and
    /// applies its metadata.
    fn finish_file(&mut self, path: &Path, file: Self::File, meta: &EntryMeta, size: u64) -> io::Result<()>;

    /// Called once after the last block.
    fn finalize(&mut self) -> io::Result<()> {
        Ok(())
    }
}

enum Context<F> {
    Open {
        file: F,
        meta: EntryMeta,
        hasher: blake3::Hasher,
        size: u64,
    },
    Closed {
        digest: blake3::Hash,
    },
}

pub struct Reconstructor<M: Materializer> {
    sink: M,
    in_flight: HashMap<PathBuf, Context<M::File>>,
    finished: HashSet<PathBuf>,
    mismatches: Vec<PathBuf>,
    summary: ExtractSummary,
}

impl<M: Materializer> Reconstructor<M> {
    pub fn new(sink: M) -> Self {
        Reconstructor {
            sink,
            in_flight: HashMap::new(),
            finished: HashSet::new(),
            mismatches: Vec::new(),
            summary: ExtractSummary::default(),
        }
    }

    /// Files whose digest did not match so far.
    pub fn mismatches(&self) -> &[PathBuf] {
        &self.mismatches
    }

    /// Applies one block. Errors are fatal for the stream; a checksum
    /// mismatch is not an error here and is reported by [`finish`](Self::finish).
    pub fn apply(&mut self, block: Block) -> Result<(), ArchiverError> {
        if fsx::safe_relative(&block.path).is_none() {
            return Err(ProtocolError::UnsafePath(block.path).into());
        }
        self.summary.blocks += 1;
        let Block { kind, path, meta, payload } = block;

        match kind {
            BlockKind::Directory => {
                if self.in_flight.contains_key(&path) || self.finished.contains(&path) {
                    return Err(ProtocolError::DuplicateEntry(path).into());
                }
                self.sink.create_dir(&path, &meta).map_err(|e| ArchiverError::io(e, &path))?;
                self.summary.directories += 1;
                self.finished.insert(path);
            }
            BlockKind::StartOfFile => {
                if self.in_flight.contains_key(&path) {
                    return Err(ProtocolError::DuplicateStart(path).into());
                }
                if self.finished.contains(&path) {
                    return Err(ProtocolError::DuplicateEntry(path).into());
                }
                let file = self.sink.create_file(&path, &meta).map_err(|e| ArchiverError::io(e, &path))?;
                trace!(path = %path.display(), "file opened");
                self.in_flight.insert(
                    path,
                    Context::Open { file, meta, hasher: blake3::Hasher::new(), size: 0 },
                );
            }
            BlockKind::Data => match self.in_flight.get_mut(&path) {
                Some(Context::Open { file, hasher, size, .. }) => {
                    file.write_all(&payload).map_err(|e| ArchiverError::io(e, &path))?;
                    hasher.update(&payload);
                    *size += payload.len() as u64;
                }
                _ => return Err(ProtocolError::DataWithoutStart(path).into()),
            },
            BlockKind::EndOfFile => match self.in_flight.remove(&path) {
                Some(Context::Open { file, meta, hasher, size }) => {
                    self.sink
                        .finish_file(&path, file, &meta, size)
                        .map_err(|e| ArchiverError::io(e, &path))?;
                    self.summary.files += 1;
                    self.summary.bytes += size;
                    self.in_flight.insert(path, Context::Closed { digest: hasher.finalize() });
                }
                _ => return Err(ProtocolError::EndWithoutStart(path).into()),
            },
            BlockKind::Checksum => match self.in_flight.get(&path) {
                Some(Context::Closed { digest }) => {
                    if digest.as_bytes()[..] != payload[..] {
                        error!(path = %path.display(), "checksum mismatch");
                        self.mismatches.push(path.clone());
                    }
                    self.in_flight.remove(&path);
                    self.finished.insert(path);
                }
                _ => return Err(ProtocolError::ChecksumBeforeEnd(path).into()),
            },
        }
        Ok(())
    }

    /// Ends the stream: finalizes the sink, then reports truncation or
    /// integrity failures, in that order of precedence.
    pub fn finish(mut self) -> Result<(ExtractSummary, M), ArchiverError> {
        self.sink.finalize().map_err(|e| ArchiverError::io(e, "<extraction target>"))?;

        if !self.in_flight.is_empty() {
            let mut paths: Vec<PathBuf> = self.in_flight.into_keys().collect();
            paths.sort();
            return Err(ArchiverError::Truncated { paths });
        }
        if !self.mismatches.is_empty() {
            return Err(ArchiverError::Integrity { paths: self.mismatches });
        }
        Ok((self.summary, self.sink))
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::block::digest_of;
    use std::collections::BTreeMap;

    /// Keeps everything in memory.
    #[derive(Default, Debug)]
    pub(crate) struct MemorySink {
        pub dirs: BTreeMap<PathBuf, EntryMeta>,
        pub files: BTreeMap<PathBuf, (Vec<u8>, EntryMeta)>,
    }

    impl Materializer for MemorySink {
        type File = Vec<u8>;

        fn create_dir(&mut self, path: &Path, meta: &EntryMeta) -> io::Result<()> {
            self.dirs.insert(path.to_path_buf(), *meta);
            Ok(())
        }

        fn create_file(&mut self, _path: &Path, _meta: &EntryMeta) -> io::Result<Vec<u8>> {
            Ok(Vec::new())
        }

        fn finish_file(&mut self, path: &Path, file: Vec<u8>, meta: &EntryMeta, size: u64) -> io::Result<()> {
            assert_eq!(file.len() as u64, size);
            self.files.insert(path.to_path_buf(), (file, *meta));
            Ok(())
        }
    }

    fn file_blocks(path: &str, chunks: &[&[u8]]) -> Vec<Block> {
        let mut content = Vec::new();
        let mut blocks = vec![Block::start_of_file(path.into(), EntryMeta { uid: 1, gid: 2, mode: 0o600 })];
        for chunk in chunks {
            content.extend_from_slice(chunk);
            blocks.push(Block::data(path.into(), chunk.to_vec()));
        }
        blocks.push(Block::end_of_file(path.into()));
        blocks.push(Block::checksum(path.into(), digest_of(&content)));
        blocks
    }

    fn run(blocks: Vec<Block>) -> Result<(ExtractSummary, MemorySink), ArchiverError> {
        let mut state = Reconstructor::new(MemorySink::default());
        for block in blocks {
            state.apply(block)?;
        }
        state.finish()
    }

    #[test]
    fn interleaved_files_are_reconstructed() {
        let a = file_blocks("a", &[b"aa", b"AA", b"!"]);
        let b = file_blocks("b", &[b"bbb", b"BBB"]);
        // a0 b0 a1 b1 a2 b2 ...
        let mut mixed = Vec::new();
        let (mut ia, mut ib) = (a.into_iter(), b.into_iter());
        loop {
            let (x, y) = (ia.next(), ib.next());
            if x.is_none() && y.is_none() {
                break;
            }
            mixed.extend(x);
            mixed.extend(y);
        }

        let (summary, sink) = run(mixed).unwrap();
        assert_eq!(summary.files, 2);
        assert_eq!(summary.bytes, 11);
        assert_eq!(sink.files[Path::new("a")].0, b"aaAA!");
        assert_eq!(sink.files[Path::new("b")].0, b"bbbBBB");
        assert_eq!(sink.files[Path::new("a")].1.mode, 0o600);
    }

    #[test]
    fn empty_file_has_no_data_blocks() {
        let (summary, sink) = run(file_blocks("sub/empty", &[])).unwrap();
        assert_eq!(summary.files, 1);
        assert!(sink.files[Path::new("sub/empty")].0.is_empty());
    }

    #[test]
    fn data_before_start_is_rejected() {
        let err = run(vec![Block::data("x".into(), b"1".to_vec())]).unwrap_err();
        assert!(matches!(err, ArchiverError::Protocol(ProtocolError::DataWithoutStart(_))));
    }

    #[test]
    fn duplicate_start_is_rejected() {
        let meta = EntryMeta::default();
        let err = run(vec![
            Block::start_of_file("x".into(), meta),
            Block::start_of_file("x".into(), meta),
        ])
        .unwrap_err();
        assert!(matches!(err, ArchiverError::Protocol(ProtocolError::DuplicateStart(_))));

        // A start after EndOfFile but before the Checksum is also a duplicate.
        let err = run(vec![
            Block::start_of_file("x".into(), meta),
            Block::end_of_file("x".into()),
            Block::start_of_file("x".into(), meta),
        ])
        .unwrap_err();
        assert!(matches!(err, ArchiverError::Protocol(ProtocolError::DuplicateStart(_))));
    }

    #[test]
    fn checksum_before_end_is_rejected() {
        let err = run(vec![
            Block::start_of_file("x".into(), EntryMeta::default()),
            Block::checksum("x".into(), digest_of(b"")),
        ])
        .unwrap_err();
        assert!(matches!(err, ArchiverError::Protocol(ProtocolError::ChecksumBeforeEnd(_))));
    }

    #[test]
    fn data_after_end_is_rejected() {
        let mut blocks = file_blocks("x", &[b"1"]);
        blocks.insert(3, Block::data("x".into(), b"late".to_vec()));
        let err = run(blocks).unwrap_err();
        assert!(matches!(err, ArchiverError::Protocol(ProtocolError::DataWithoutStart(_))));
    }

    #[test]
    fn mismatch_is_reported_after_the_stream_is_processed() {
        let mut bad = file_blocks("bad", &[b"content"]);
        bad[1].payload[0] ^= 0xff;
        let mut blocks = bad;
        blocks.extend(file_blocks("good", &[b"fine"]));

        let mut state = Reconstructor::new(MemorySink::default());
        for block in blocks {
            state.apply(block).unwrap();
        }
        assert_eq!(state.mismatches(), [PathBuf::from("bad")]);
        match state.finish() {
            Err(ArchiverError::Integrity { paths }) => assert_eq!(paths, vec![PathBuf::from("bad")]),
            other => panic!("expected integrity error, got {:?}", other.map(|(s, _)| s)),
        }
    }

    #[test]
    fn unfinished_files_mean_truncation() {
        let mut blocks = file_blocks("open", &[b"1"]);
        blocks.truncate(2); // StartOfFile + Data
        let mut closed = file_blocks("closed", &[b"2"]);
        closed.pop(); // no Checksum
        blocks.extend(closed);

        match run(blocks) {
            Err(ArchiverError::Truncated { paths }) => {
                assert_eq!(paths, vec![PathBuf::from("closed"), PathBuf::from("open")]);
            }
            other => panic!("expected truncation, got {:?}", other.map(|(s, _)| s)),
        }
    }

    #[test]
    fn unsafe_paths_are_rejected() {
        for path in ["../escape", "/etc/passwd", "a/../../b"] {
            let err = run(vec![Block::directory(path.into(), EntryMeta::default())]).unwrap_err();
            assert!(matches!(err, ArchiverError::Protocol(ProtocolError::UnsafePath(_))), "{path}");
        }
    }

    #[test]
    fn directories_record_metadata() {
        let meta = EntryMeta { uid: 0, gid: 0, mode: 0o750 };
        let (summary, sink) = run(vec![Block::directory("root/sub".into(), meta)]).unwrap();
        assert_eq!(summary.directories, 1);
        assert_eq!(sink.dirs[Path::new("root/sub")], meta);
    }

    #[test]
    fn finished_paths_cannot_reappear() {
        let dir = EntryMeta { uid: 0, gid: 0, mode: 0o755 };

        // A verified file is never overwritten.
        let mut blocks = file_blocks("x", &[b"first"]);
        blocks.extend(file_blocks("x", &[b"second"]));
        let err = run(blocks).unwrap_err();
        assert!(matches!(err, ArchiverError::Protocol(ProtocolError::DuplicateEntry(_))), "{err:?}");

        // Repeated directory.
        let err = run(vec![Block::directory("d".into(), dir), Block::directory("d".into(), dir)]).unwrap_err();
        assert!(matches!(err, ArchiverError::Protocol(ProtocolError::DuplicateEntry(_))), "{err:?}");

        // Directory on a path that is a file, in flight or verified.
        let mut blocks = file_blocks("f", &[b"1"]);
        blocks.truncate(2);
        blocks.push(Block::directory("f".into(), dir));
        let err = run(blocks).unwrap_err();
        assert!(matches!(err, ArchiverError::Protocol(ProtocolError::DuplicateEntry(_))), "{err:?}");

        let mut blocks = file_blocks("f", &[b"1"]);
        blocks.push(Block::directory("f".into(), dir));
        let err = run(blocks).unwrap_err();
        assert!(matches!(err, ArchiverError::Protocol(ProtocolError::DuplicateEntry(_))), "{err:?}");

        // File on a path that is a directory.
        let mut blocks = vec![Block::directory("d".into(), dir)];
        blocks.extend(file_blocks("d", &[b"1"]));
        let err = run(blocks).unwrap_err();
        assert!(matches!(err, ArchiverError::Protocol(ProtocolError::DuplicateEntry(_))), "{err:?}");
    }
}
