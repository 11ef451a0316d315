//! # Block Stream Format
//!
//! This module defines the wire encoding of the archive: a plain sequence of
//! framed blocks with no header, index or trailer.
//!
//! Each block is laid out as
//!
//! ```text
//! +-------------+------------------+--------+---------------------------------+
//! | path_len u16| path (path_len B)| kind u8| Data only: len u16 + len bytes  |
//! +-------------+------------------+--------+---------------------------------+
//! ```
//!
//! All integers are big-endian. The stream ends where a new `path_len`
//! would start; ending anywhere else is corruption.

use std::io::{self, ErrorKind, Read, Write};
use std::sync::Arc;

use crate::common::{Block, BlockKind};
use crate::error::{ArchiverError, Result};

/// Kind byte of a data block.
pub const KIND_DATA: u8 = 1;
/// Kind byte of a start-of-file marker.
pub const KIND_START_OF_FILE: u8 = 2;
/// Kind byte of an end-of-file marker.
pub const KIND_END_OF_FILE: u8 = 4;

/// Largest data payload a single block can carry.
pub const MAX_PAYLOAD: usize = u16::MAX as usize;

impl BlockKind {
    /// The wire tag of this kind. Tags are never combined.
    pub fn tag(&self) -> u8 {
        match self {
            BlockKind::Data(_) => KIND_DATA,
            BlockKind::StartOfFile => KIND_START_OF_FILE,
            BlockKind::EndOfFile => KIND_END_OF_FILE,
        }
    }
}

/// Number of bytes `block` occupies on the wire.
pub fn encoded_len(block: &Block) -> usize {
    let payload = match &block.kind {
        BlockKind::Data(p) => 2 + p.len(),
        _ => 0,
    };
    2 + block.path.len() + 1 + payload
}

/// Serializes one block.
///
/// Lengths are checked before anything is written, so an oversize block
/// leaves the stream untouched.
pub fn write_block<W: Write + ?Sized>(out: &mut W, block: &Block) -> Result<()> {
    let path = block.path.as_bytes();
    let path_len =
        u16::try_from(path.len()).map_err(|_| ArchiverError::PathTooLong { len: path.len() })?;
    let data_len = match &block.kind {
        BlockKind::Data(payload) => Some(
            u16::try_from(payload.len())
                .map_err(|_| ArchiverError::PayloadTooLarge { len: payload.len() })?,
        ),
        _ => None,
    };

    out.write_all(&path_len.to_be_bytes())?;
    out.write_all(path)?;
    out.write_all(&[block.kind.tag()])?;
    if let (Some(len), BlockKind::Data(payload)) = (data_len, &block.kind) {
        out.write_all(&len.to_be_bytes())?;
        out.write_all(payload)?;
    }
    Ok(())
}

/// Deserializes one block, or returns `Ok(None)` on a clean end of stream.
pub fn read_block<R: Read + ?Sized>(input: &mut R) -> Result<Option<Block>> {
    let mut len_buf = [0u8; 2];
    match fill(input, &mut len_buf)? {
        0 => return Ok(None),
        2 => {}
        _ => return Err(ArchiverError::Truncated("path length")),
    }
    let path_len = u16::from_be_bytes(len_buf) as usize;

    let mut path = vec![0u8; path_len];
    read_field(input, &mut path, "path")?;
    let path = String::from_utf8(path).map_err(|_| ArchiverError::InvalidPathEncoding)?;

    let mut tag = [0u8; 1];
    read_field(input, &mut tag, "block kind")?;

    let kind = match tag[0] {
        KIND_START_OF_FILE => BlockKind::StartOfFile,
        KIND_END_OF_FILE => BlockKind::EndOfFile,
        KIND_DATA => {
            read_field(input, &mut len_buf, "data length")?;
            let mut payload = vec![0u8; u16::from_be_bytes(len_buf) as usize];
            read_field(input, &mut payload, "data payload")?;
            BlockKind::Data(payload)
        }
        other => return Err(ArchiverError::UnknownBlockKind(other, path)),
    };

    Ok(Some(Block { path: Arc::from(path), kind }))
}

/// Reads until `buf` is full or the stream ends, returning the byte count.
fn fill<R: Read + ?Sized>(input: &mut R, buf: &mut [u8]) -> io::Result<usize> {
    let mut filled = 0;
    while filled < buf.len() {
        match input.read(&mut buf[filled..]) {
            Ok(0) => break,
            Ok(n) => filled += n,
            Err(e) if e.kind() == ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        }
    }
    Ok(filled)
}

fn read_field<R: Read + ?Sized>(input: &mut R, buf: &mut [u8], field: &'static str) -> Result<()> {
    if fill(input, buf)? < buf.len() {
        return Err(ArchiverError::Truncated(field));
    }
    Ok(())
}

/// Encodes blocks onto an output stream and keeps simple totals.
pub struct BlockWriter<W: Write> {
    inner: W,
    blocks_written: u64,
    bytes_written: u64,
}

impl<W: Write> BlockWriter<W> {
    pub fn new(inner: W) -> Self {
        Self { inner, blocks_written: 0, bytes_written: 0 }
    }

    pub fn write(&mut self, block: &Block) -> Result<()> {
        write_block(&mut self.inner, block)?;
        self.blocks_written += 1;
        self.bytes_written += encoded_len(block) as u64;
        Ok(())
    }

    pub fn blocks_written(&self) -> u64 {
        self.blocks_written
    }

    pub fn bytes_written(&self) -> u64 {
        self.bytes_written
    }

    pub fn flush(&mut self) -> Result<()> {
        self.inner.flush()?;
        Ok(())
    }

    pub fn into_inner(self) -> W {
        self.inner
    }
}

/// Iterates over the blocks of a stream.
///
/// Yields `Err` once on corruption or I/O failure and then stops, so
/// `collect::<Result<Vec<_>>>()` reads a whole stream safely.
pub struct BlockReader<R: Read> {
    inner: R,
    done: bool,
}

impl<R: Read> BlockReader<R> {
    pub fn new(inner: R) -> Self {
        Self { inner, done: false }
    }
}

impl<R: Read> Iterator for BlockReader<R> {
    type Item = Result<Block>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }
        match read_block(&mut self.inner) {
            Ok(Some(block)) => Some(Ok(block)),
            Ok(None) => {
                self.done = true;
                None
            }
            Err(e) => {
                self.done = true;
                Some(Err(e))
            }
        }
    }
}
