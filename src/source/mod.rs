// Block-granular access to the reference input.
//
// A `BlockSource` supplies one fixed-size block at a time; the
// `SourceBlockCache` in `cache` keeps a bounded set of them resident.
//
// - `MemorySource`   whole source already in memory, served without copying
// - `ReaderSource`   any `Read + Seek` (files)
// - `StreamSource`   forward-only `Read` (pipes); earlier blocks cannot be re-read
// - `ManualSource`   non-blocking: the caller offers each requested block

pub mod cache;

use std::borrow::Cow;
use std::io::{self, Read, Seek, SeekFrom};

use crate::error::{Error, Result};

pub use cache::{CacheConfig, CacheStats, Fetch, SourceBlockCache};

/// Outcome of a block read.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlockRead {
    /// `n` bytes were written to the front of the buffer. Fewer than the
    /// buffer length means this is the final block.
    Ready(usize),
    /// The block cannot be supplied yet; retry after the caller provides it.
    Pending,
}

/// Block-read callback.
pub trait BlockSource {
    /// Fill `buf` (one block long) with block `blkno`.
    fn read_block(&mut self, blkno: u64, buf: &mut [u8]) -> Result<BlockRead>;

    /// Whether earlier blocks can be read again after later ones.
    fn can_seek(&self) -> bool {
        true
    }

    /// Total length, when known up front.
    fn len_hint(&self) -> Option<u64> {
        None
    }

    /// The entire source, if it is resident in memory.
    fn as_slice(&self) -> Option<&[u8]> {
        None
    }
}

impl<S: BlockSource + ?Sized> BlockSource for Box<S> {
    fn read_block(&mut self, blkno: u64, buf: &mut [u8]) -> Result<BlockRead> {
        (**self).read_block(blkno, buf)
    }

    fn can_seek(&self) -> bool {
        (**self).can_seek()
    }

    fn len_hint(&self) -> Option<u64> {
        (**self).len_hint()
    }

    fn as_slice(&self) -> Option<&[u8]> {
        (**self).as_slice()
    }
}

/// Read until `buf` is full or the reader is exhausted.
fn read_full<R: Read + ?Sized>(r: &mut R, buf: &mut [u8]) -> io::Result<usize> {
    let mut filled = 0;
    while filled < buf.len() {
        match r.read(&mut buf[filled..]) {
            Ok(0) => break,
            Ok(n) => filled += n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => {}
            Err(e) => return Err(e),
        }
    }
    Ok(filled)
}

// ---------------------------------------------------------------------------
// In-memory
// ---------------------------------------------------------------------------

/// Source held entirely in memory.
#[derive(Debug, Clone, Default)]
pub struct MemorySource<'a> {
    data: Cow<'a, [u8]>,
}

impl<'a> MemorySource<'a> {
    pub fn new(data: &'a [u8]) -> Self {
        Self {
            data: Cow::Borrowed(data),
        }
    }

    pub fn owned(data: Vec<u8>) -> MemorySource<'static> {
        MemorySource {
            data: Cow::Owned(data),
        }
    }
}

impl BlockSource for MemorySource<'_> {
    fn read_block(&mut self, blkno: u64, buf: &mut [u8]) -> Result<BlockRead> {
        let start = blkno.saturating_mul(buf.len() as u64).min(self.data.len() as u64) as usize;
        let n = buf.len().min(self.data.len() - start);
        buf[..n].copy_from_slice(&self.data[start..start + n]);
        Ok(BlockRead::Ready(n))
    }

    fn len_hint(&self) -> Option<u64> {
        Some(self.data.len() as u64)
    }

    fn as_slice(&self) -> Option<&[u8]> {
        Some(&self.data)
    }
}

// ---------------------------------------------------------------------------
// Seekable reader
// ---------------------------------------------------------------------------

/// Source backed by a seekable reader such as a file.
#[derive(Debug)]
pub struct ReaderSource<R> {
    inner: R,
    len: u64,
}

impl<R: Read + Seek> ReaderSource<R> {
    pub fn new(mut inner: R) -> io::Result<Self> {
        let len = inner.seek(SeekFrom::End(0))?;
        inner.seek(SeekFrom::Start(0))?;
        Ok(Self { inner, len })
    }

    pub fn into_inner(self) -> R {
        self.inner
    }
}

impl<R: Read + Seek> BlockSource for ReaderSource<R> {
    fn read_block(&mut self, blkno: u64, buf: &mut [u8]) -> Result<BlockRead> {
        let offset = blkno
            .checked_mul(buf.len() as u64)
            .ok_or_else(|| Error::invalid("source offset overflow"))?;
        self.inner.seek(SeekFrom::Start(offset))?;
        Ok(BlockRead::Ready(read_full(&mut self.inner, buf)?))
    }

    fn len_hint(&self) -> Option<u64> {
        Some(self.len)
    }
}

// ---------------------------------------------------------------------------
// Forward-only stream
// ---------------------------------------------------------------------------

/// Source that can only be read front to back.
#[derive(Debug)]
pub struct StreamSource<R> {
    inner: R,
    next_blkno: u64,
}

impl<R: Read> StreamSource<R> {
    pub fn new(inner: R) -> Self {
        Self {
            inner,
            next_blkno: 0,
        }
    }
}

impl<R: Read> BlockSource for StreamSource<R> {
    fn read_block(&mut self, blkno: u64, buf: &mut [u8]) -> Result<BlockRead> {
        if blkno != self.next_blkno {
            return Err(Error::internal(format!(
                "stream source asked for block {blkno}, next is {}",
                self.next_blkno
            )));
        }
        let n = read_full(&mut self.inner, buf)?;
        self.next_blkno += 1;
        Ok(BlockRead::Ready(n))
    }

    fn can_seek(&self) -> bool {
        false
    }
}

// ---------------------------------------------------------------------------
// Caller-driven
// ---------------------------------------------------------------------------

/// Source whose blocks are handed over by the caller on request.
///
/// Every read of a block that has not been offered returns
/// `BlockRead::Pending`; the session reports `Status::NeedSourceBlock`
/// and the caller responds with `offer`.
#[derive(Debug, Clone, Default)]
pub struct ManualSource {
    offered: Option<(u64, Vec<u8>)>,
    len: Option<u64>,
}

impl ManualSource {
    pub fn new(len: Option<u64>) -> Self {
        Self { offered: None, len }
    }

    /// Provide the bytes of block `blkno`.
    pub fn offer(&mut self, blkno: u64, data: Vec<u8>) {
        self.offered = Some((blkno, data));
    }
}

impl BlockSource for ManualSource {
    fn read_block(&mut self, blkno: u64, buf: &mut [u8]) -> Result<BlockRead> {
        match self.offered.take() {
            Some((n, data)) if n == blkno => {
                let len = data.len().min(buf.len());
                buf[..len].copy_from_slice(&data[..len]);
                Ok(BlockRead::Ready(len))
            }
            other => {
                self.offered = other;
                Ok(BlockRead::Pending)
            }
        }
    }

    fn len_hint(&self) -> Option<u64> {
        self.len
    }
}
