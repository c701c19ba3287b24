//! # Block stream format
//!
//! An archive is a fixed header followed by a flat sequence of frames, one
//! per [`Block`]. There is no index and no footer: the stream is read once,
//! front to back.
//!
//! Header (10 bytes):
//!     `magic: [u8; 8] = b"STRMARC\0"`, `version: u16 LE = 1`
//!
//! Frame:
//!     `kind: u8`
//!     `path_len: u16 LE`, `path: [u8; path_len]`
//!     `payload_len: u16 LE`
//!     `uid: u32 LE, gid: u32 LE, mode: u32 LE` (StartOfFile and Directory only)
//!     `payload: [u8; payload_len]`
//!
//! Every length needed to find the end of a frame is inside the frame, so a
//! reader never needs outside information to stay in sync.

use std::io::{self, ErrorKind, Read, Write};
use std::path::PathBuf;

use crate::error::FrameError;
use crate::fsx;

pub const STREAM_MAGIC: &[u8; 8] = b"STRMARC\0";
pub const FORMAT_VERSION: u16 = 1;

/// Upper bound for the configurable block size (payload length is a u16).
pub const MAX_BLOCK_SIZE: usize = u16::MAX as usize;
pub const DEFAULT_BLOCK_SIZE: usize = 4096;

/// Length in bytes of a BLAKE3 file digest carried by Checksum blocks.
pub const DIGEST_LEN: usize = blake3::OUT_LEN;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum BlockKind {
    Data = 0,
    StartOfFile = 1,
    EndOfFile = 2,
    Directory = 3,
    Checksum = 4,
}

impl BlockKind {
    fn carries_meta(self) -> bool {
        matches!(self, BlockKind::StartOfFile | BlockKind::Directory)
    }
}

impl TryFrom<u8> for BlockKind {
    type Error = FrameError;

    fn try_from(tag: u8) -> Result<Self, FrameError> {
        Ok(match tag {
            0 => BlockKind::Data,
            1 => BlockKind::StartOfFile,
            2 => BlockKind::EndOfFile,
            3 => BlockKind::Directory,
            4 => BlockKind::Checksum,
            other => return Err(FrameError::UnknownKind(other)),
        })
    }
}

/// Ownership and permission bits of a file or directory.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct EntryMeta {
    pub uid: u32,
    pub gid: u32,
    pub mode: u32,
}

/// The atomic transfer unit of an archive.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Block {
    pub kind: BlockKind,
    /// Archive-relative path the block belongs to.
    pub path: PathBuf,
    /// Zeroed unless `kind` is StartOfFile or Directory.
    pub meta: EntryMeta,
    pub payload: Vec<u8>,
}

impl Block {
    pub fn directory(path: PathBuf, meta: EntryMeta) -> Self {
        Block { kind: BlockKind::Directory, path, meta, payload: Vec::new() }
    }

    pub fn start_of_file(path: PathBuf, meta: EntryMeta) -> Self {
        Block { kind: BlockKind::StartOfFile, path, meta, payload: Vec::new() }
    }

    pub fn data(path: PathBuf, chunk: Vec<u8>) -> Self {
        Block { kind: BlockKind::Data, path, meta: EntryMeta::default(), payload: chunk }
    }

    pub fn end_of_file(path: PathBuf) -> Self {
        Block { kind: BlockKind::EndOfFile, path, meta: EntryMeta::default(), payload: Vec::new() }
    }

    pub fn checksum(path: PathBuf, digest: Vec<u8>) -> Self {
        Block { kind: BlockKind::Checksum, path, meta: EntryMeta::default(), payload: digest }
    }

    /// Number of valid payload bytes.
    pub fn payload_len(&self) -> usize {
        self.payload.len()
    }

    /// Appends this block's frame to `writer`.
    pub fn write_to<W: Write>(&self, mut writer: W) -> Result<(), FrameError> {
        let path = fsx::path_to_bytes(&self.path);
        if path.is_empty() {
            return Err(FrameError::EmptyPath);
        }
        let path_len = u16::try_from(path.len()).map_err(|_| FrameError::PathTooLong(path.len()))?;
        let payload_len = u16::try_from(self.payload.len())
            .map_err(|_| FrameError::PayloadTooLarge(self.payload.len()))?;

        writer.write_all(&[self.kind as u8])?;
        writer.write_all(&path_len.to_le_bytes())?;
        writer.write_all(&path)?;
        writer.write_all(&payload_len.to_le_bytes())?;
        if self.kind.carries_meta() {
            writer.write_all(&self.meta.uid.to_le_bytes())?;
            writer.write_all(&self.meta.gid.to_le_bytes())?;
            writer.write_all(&self.meta.mode.to_le_bytes())?;
        }
        writer.write_all(&self.payload)?;
        Ok(())
    }

    pub fn encode(&self) -> Result<Vec<u8>, FrameError> {
        let mut out = Vec::with_capacity(1 + 2 + 2 + 12 + self.payload.len() + 64);
        self.write_to(&mut out)?;
        Ok(out)
    }
}

pub fn write_stream_header<W: Write>(mut writer: W) -> io::Result<()> {
    writer.write_all(STREAM_MAGIC)?;
    writer.write_all(&FORMAT_VERSION.to_le_bytes())
}

/// Sequential frame decoder over any byte source.
pub struct BlockReader<R> {
    inner: R,
}

impl<R: Read> BlockReader<R> {
    /// Consumes and validates the stream header.
    pub fn new(mut inner: R) -> Result<Self, FrameError> {
        let mut magic = [0u8; 8];
        if !read_full(&mut inner, &mut magic, "stream header")? {
            return Err(FrameError::BadMagic);
        }
        if &magic != STREAM_MAGIC {
            return Err(FrameError::BadMagic);
        }
        let version = read_u16(&mut inner, "format version")?;
        if version != FORMAT_VERSION {
            return Err(FrameError::UnsupportedVersion(version));
        }
        Ok(BlockReader { inner })
    }

    /// Decodes the next frame. `Ok(None)` means the stream ended exactly on a
    /// frame boundary; any shorter read inside a frame is an error.
    pub fn next_block(&mut self) -> Result<Option<Block>, FrameError> {
        let mut tag = [0u8; 1];
        if !read_full(&mut self.inner, &mut tag, "kind tag")? {
            return Ok(None);
        }
        let kind = BlockKind::try_from(tag[0])?;

        let path_len = read_u16(&mut self.inner, "path length")? as usize;
        if path_len == 0 {
            return Err(FrameError::EmptyPath);
        }
        let mut path = vec![0u8; path_len];
        expect_full(&mut self.inner, &mut path, "path")?;

        let payload_len = read_u16(&mut self.inner, "payload length")? as usize;
        let meta = if kind.carries_meta() {
            EntryMeta {
                uid: read_u32(&mut self.inner, "uid")?,
                gid: read_u32(&mut self.inner, "gid")?,
                mode: read_u32(&mut self.inner, "mode")?,
            }
        } else {
            EntryMeta::default()
        };

        let mut payload = vec![0u8; payload_len];
        expect_full(&mut self.inner, &mut payload, "payload")?;

        Ok(Some(Block { kind, path: fsx::path_from_bytes(path), meta, payload }))
    }
}

/// Fills `buf` completely. Returns `Ok(false)` when the source is already at
/// EOF before the first byte, and a truncation error when it ends midway.
fn read_full<R: Read>(reader: &mut R, buf: &mut [u8], what: &'static str) -> Result<bool, FrameError> {
    let mut filled = 0;
    while filled < buf.len() {
        match reader.read(&mut buf[filled..]) {
            Ok(0) if filled == 0 => return Ok(false),
            Ok(0) => return Err(FrameError::Truncated(what)),
            Ok(n) => filled += n,
            Err(e) if e.kind() == ErrorKind::Interrupted => {}
            Err(e) => return Err(e.into()),
        }
    }
    Ok(true)
}

fn expect_full<R: Read>(reader: &mut R, buf: &mut [u8], what: &'static str) -> Result<(), FrameError> {
    if buf.is_empty() || read_full(reader, buf, what)? {
        Ok(())
    } else {
        Err(FrameError::Truncated(what))
    }
}

fn read_u16<R: Read>(reader: &mut R, what: &'static str) -> Result<u16, FrameError> {
    let mut b = [0u8; 2];
    expect_full(reader, &mut b, what)?;
    Ok(u16::from_le_bytes(b))
}

fn read_u32<R: Read>(reader: &mut R, what: &'static str) -> Result<u32, FrameError> {
    let mut b = [0u8; 4];
    expect_full(reader, &mut b, what)?;
    Ok(u32::from_le_bytes(b))
}

/// Convenience for tests and tools: decodes a complete in-memory archive.
pub fn decode_all(bytes: &[u8]) -> Result<Vec<Block>, FrameError> {
    let mut reader = BlockReader::new(bytes)?;
    let mut blocks = Vec::new();
    while let Some(block) = reader.next_block()? {
        blocks.push(block);
    }
    Ok(blocks)
}

/// Convenience for tests and tools: encodes a header plus `blocks`.
pub fn encode_all<'a, I>(blocks: I) -> Result<Vec<u8>, FrameError>
where
    I: IntoIterator<Item = &'a Block>,
{
    let mut out = Vec::new();
    write_stream_header(&mut out)?;
    for block in blocks {
        block.write_to(&mut out)?;
    }
    Ok(out)
}

pub fn digest_of(bytes: &[u8]) -> Vec<u8> {
    blake3::hash(bytes).as_bytes().to_vec()
}
