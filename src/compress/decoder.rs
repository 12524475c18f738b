// Streaming delta decoder.
//
// DeltaDecoder drives a resumable `Decoder` session from any `Read`:
//   - Output goes to any `Write`, one window at a time
//   - Input is pulled in fixed-size reads into a buffer compacted as the
//     session consumes it
//   - A stream that stops anywhere but a window boundary is reported as
//     truncated

use std::io::{ErrorKind, Read, Write};

use log::debug;

use crate::error::{Error, Result, Status};
use crate::source::{BlockSource, MemorySource};
use crate::vcdiff::decoder::Decoder;

pub use crate::vcdiff::decoder::{DecodeStats, DecoderConfig};

/// Bytes requested from the reader per refill.
const READ_CHUNK: usize = 64 * 1024;

// ---------------------------------------------------------------------------
// DeltaDecoder
// ---------------------------------------------------------------------------

/// Streaming delta decoder.
///
/// Only the current window's target and the unconsumed part of the delta
/// are held in memory.
pub struct DeltaDecoder<R: Read, S = MemorySource<'static>> {
    reader: R,
    session: Decoder<S>,
    buf: Vec<u8>,
    start: usize,
    eof: bool,
}

impl<R: Read, S: BlockSource> DeltaDecoder<R, S> {
    pub fn new(reader: R, source: Option<S>, config: DecoderConfig) -> Result<Self> {
        Ok(Self {
            reader,
            session: Decoder::new(config, source)?,
            buf: Vec::with_capacity(READ_CHUNK),
            start: 0,
            eof: false,
        })
    }

    /// The underlying session, e.g. to register a secondary compressor.
    pub fn session_mut(&mut self) -> &mut Decoder<S> {
        &mut self.session
    }

    pub fn stats(&self) -> DecodeStats {
        self.session.stats()
    }

    /// The application header, once the stream header has been read.
    pub fn app_header(&self) -> Option<&[u8]> {
        self.session.app_header()
    }

    /// Decode every remaining window into `writer`. Returns the total
    /// number of target bytes written.
    pub fn decode_to<W: Write>(&mut self, writer: &mut W) -> Result<u64> {
        while self.decode_window_to(writer)?.is_some() {}
        writer.flush()?;
        Ok(self.session.stats().bytes_out)
    }

    /// Decode the next window into `writer`, returning its length, or
    /// `None` at the clean end of the stream.
    pub fn decode_window_to<W: Write>(&mut self, writer: &mut W) -> Result<Option<u64>> {
        let mut written = None;
        loop {
            let progress = self.session.decode(&self.buf[self.start..])?;
            self.start += progress.consumed;
            match progress.status {
                Status::Output => {
                    let out = self.session.output();
                    writer.write_all(out)?;
                    written = Some(out.len() as u64);
                }
                Status::WindowFinish => return Ok(written),
                Status::NeedMoreInput => {
                    if !self.fill()? {
                        if self.start < self.buf.len() || !self.session.at_window_boundary() {
                            return Err(Error::invalid("delta stream is truncated"));
                        }
                        return Ok(None);
                    }
                }
                Status::NeedSourceBlock(blkno) => {
                    return Err(Error::invalid(format!(
                        "source block {blkno} is not available"
                    )));
                }
                Status::GotHeader | Status::WindowStart => {}
            }
        }
    }

    /// Read more input. False once the reader is exhausted.
    fn fill(&mut self) -> Result<bool> {
        if self.eof {
            return Ok(false);
        }
        if self.start > 0 {
            self.buf.drain(..self.start);
            self.start = 0;
        }
        let old = self.buf.len();
        self.buf.resize(old + READ_CHUNK, 0);
        let n = loop {
            match self.reader.read(&mut self.buf[old..]) {
                Ok(n) => break n,
                Err(e) if e.kind() == ErrorKind::Interrupted => continue,
                Err(e) => {
                    self.buf.truncate(old);
                    return Err(e.into());
                }
            }
        };
        self.buf.truncate(old + n);
        if n == 0 {
            debug!("delta input exhausted after {} bytes", self.session.stats().bytes_in);
            self.eof = true;
        }
        Ok(n > 0)
    }
}

impl<R: Read> DeltaDecoder<R> {
    /// Decoder for deltas made without a source.
    pub fn without_source(reader: R, config: DecoderConfig) -> Result<Self> {
        Self::new(reader, None, config)
    }
}

// ---------------------------------------------------------------------------
// Convenience function
// ---------------------------------------------------------------------------

/// Decode a delta held in memory against an in-memory source.
pub fn decode_all(source: &[u8], delta: &[u8]) -> Result<Vec<u8>> {
    let source = (!source.is_empty()).then(|| MemorySource::new(source));
    let mut session = Decoder::new(DecoderConfig::default(), source)?;
    let mut input = delta;
    let mut out = Vec::new();
    loop {
        let progress = session.decode(input)?;
        input = &input[progress.consumed..];
        match progress.status {
            Status::Output => out.extend_from_slice(session.output()),
            Status::NeedMoreInput => {
                if !input.is_empty() || !session.at_window_boundary() {
                    return Err(Error::invalid("delta stream is truncated"));
                }
                return Ok(out);
            }
            Status::NeedSourceBlock(blkno) => {
                return Err(Error::invalid(format!("source block {blkno} is not available")));
            }
            Status::GotHeader | Status::WindowStart | Status::WindowFinish => {}
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
