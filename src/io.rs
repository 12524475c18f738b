// File-level helpers for delta encoding/decoding.
//
// `encode_file()` and `decode_file()` wrap the streaming encoder and
// decoder with buffered file I/O. The source file is read block by block
// through the source cache rather than loaded whole. SHA-256 digests of the
// target (and of the source, when encoding) are computed as the bytes flow
// past.

use std::fs::File;
use std::io::{self, BufReader, BufWriter, Read, Write};
use std::path::Path;

use log::debug;
use sha2::{Digest, Sha256};

use crate::compress::decoder::{DecodeStats, DecoderConfig, DeltaDecoder};
use crate::compress::encoder::{DeltaEncoder, EncodeStats, EncoderConfig};
use crate::error::Result;
use crate::source::ReaderSource;

const BUF_SIZE: usize = 64 * 1024;

// ---------------------------------------------------------------------------
// Summaries
// ---------------------------------------------------------------------------

/// Result of `encode_file()`.
#[derive(Debug, Clone)]
pub struct EncodeSummary {
    pub source_size: u64,
    pub target_size: u64,
    pub delta_size: u64,
    pub source_sha256: [u8; 32],
    pub target_sha256: [u8; 32],
    pub stats: EncodeStats,
}

/// Result of `decode_file()`.
#[derive(Debug, Clone)]
pub struct DecodeSummary {
    pub source_size: u64,
    pub delta_size: u64,
    pub output_size: u64,
    pub output_sha256: [u8; 32],
    pub stats: DecodeStats,
}

/// Lowercase hex rendering of a digest.
pub fn hex_digest(digest: &[u8; 32]) -> String {
    digest.iter().map(|b| format!("{b:02x}")).collect()
}

// ---------------------------------------------------------------------------
// encode_file
// ---------------------------------------------------------------------------

/// Encode `target_path` against `source_path`, writing the delta to
/// `delta_path`. An empty source file encodes without a source.
pub fn encode_file(
    source_path: &Path,
    target_path: &Path,
    delta_path: &Path,
    config: EncoderConfig,
) -> Result<EncodeSummary> {
    let source_sha256 = sha256_file(source_path)?;
    let source_file = File::open(source_path)?;
    let source_size = source_file.metadata()?.len();
    let source = if source_size > 0 {
        Some(ReaderSource::new(source_file)?)
    } else {
        None
    };

    let target_file = File::open(target_path)?;
    let target_size = target_file.metadata()?.len();
    let mut target = BufReader::with_capacity(BUF_SIZE, target_file);
    let delta = BufWriter::with_capacity(BUF_SIZE, File::create(delta_path)?);

    let mut encoder = DeltaEncoder::new(delta, source, config)?;
    let mut hasher = Sha256::new();
    let mut buf = vec![0u8; BUF_SIZE];
    loop {
        let n = read_some(&mut target, &mut buf)?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
        encoder.write_target(&buf[..n])?;
    }
    let (writer, stats) = encoder.finish()?;
    let delta_size = writer
        .into_inner()
        .map_err(io::IntoInnerError::into_error)?
        .metadata()?
        .len();

    debug!(
        "encoded {} -> {}: {target_size} bytes into {delta_size} ({} windows)",
        target_path.display(),
        delta_path.display(),
        stats.windows
    );
    Ok(EncodeSummary {
        source_size,
        target_size,
        delta_size,
        source_sha256,
        target_sha256: hasher.finalize().into(),
        stats,
    })
}

// ---------------------------------------------------------------------------
// decode_file
// ---------------------------------------------------------------------------

/// Decode `delta_path` against `source_path`, writing the target to
/// `output_path`.
pub fn decode_file(
    source_path: &Path,
    delta_path: &Path,
    output_path: &Path,
    config: DecoderConfig,
) -> Result<DecodeSummary> {
    let source_file = File::open(source_path)?;
    let source_size = source_file.metadata()?.len();
    let source = if source_size > 0 {
        Some(ReaderSource::new(source_file)?)
    } else {
        None
    };

    let delta_file = File::open(delta_path)?;
    let delta_size = delta_file.metadata()?.len();
    let delta = BufReader::with_capacity(BUF_SIZE, delta_file);

    let mut output = HashingWriter {
        inner: BufWriter::with_capacity(BUF_SIZE, File::create(output_path)?),
        hasher: Sha256::new(),
    };
    let mut decoder = DeltaDecoder::new(delta, source, config)?;
    let output_size = decoder.decode_to(&mut output)?;
    output.inner.flush()?;

    Ok(DecodeSummary {
        source_size,
        delta_size,
        output_size,
        output_sha256: output.hasher.finalize().into(),
        stats: decoder.stats(),
    })
}

/// SHA-256 of a whole file.
pub fn sha256_file(path: &Path) -> Result<[u8; 32]> {
    let mut reader = BufReader::with_capacity(BUF_SIZE, File::open(path)?);
    let mut hasher = Sha256::new();
    let mut buf = vec![0u8; BUF_SIZE];
    loop {
        let n = read_some(&mut reader, &mut buf)?;
        if n == 0 {
            return Ok(hasher.finalize().into());
        }
        hasher.update(&buf[..n]);
    }
}

fn read_some<R: Read>(reader: &mut R, buf: &mut [u8]) -> io::Result<usize> {
    loop {
        match reader.read(buf) {
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            other => return other,
        }
    }
}

// ---------------------------------------------------------------------------
// Hashing writer
// ---------------------------------------------------------------------------

struct HashingWriter<W: Write> {
    inner: W,
    hasher: Sha256,
}

impl<W: Write> Write for HashingWriter<W> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let n = self.inner.write(buf)?;
        self.hasher.update(&buf[..n]);
        Ok(n)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.inner.flush()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
