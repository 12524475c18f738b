// Secondary compression of the DATA, INST and ADDR sections of a window.
//
// Each compressed section is framed as `varint(raw_len) || payload`. A section
// shorter than `SECONDARY_MIN_INPUT` is never compressed, and a compressed
// section is only kept when it saves at least `SECONDARY_MIN_SAVINGS` bytes
// over the raw form. The per-section decision is reported through the window's
// `DeltaFlags`.
//
// Compressor IDs carried in the file header:
//   1  DJW   (not built in; usable through a registered backend)
//   2  LZMA  (lzma-rs, feature `lzma-secondary`)
//   3  Zlib  (flate2, feature `zlib-secondary`)
//   16 FGK   (not built in; usable through a registered backend)

use std::fmt;
#[cfg(feature = "lzma-secondary")]
use std::io;
#[cfg(feature = "zlib-secondary")]
use std::io::{Read, Write};
use std::sync::Arc;

use log::trace;

use crate::error::{Error, Result};
use crate::vcdiff::header::{DeltaFlags, VCD_DJW_ID, VCD_FGK_ID, VCD_LZMA_ID, VCD_ZLIB_ID};
use crate::vcdiff::varint::{self, SliceReader};

/// Sections shorter than this are left uncompressed.
pub const SECONDARY_MIN_INPUT: usize = 10;

/// A framed section must be at least this much smaller than the raw one.
pub const SECONDARY_MIN_SAVINGS: usize = 2;

// ---------------------------------------------------------------------------
// CompressBackend trait
// ---------------------------------------------------------------------------

/// A pluggable secondary compressor for window sections.
///
/// Backends only see the payload; the length prefix and the keep-or-discard
/// decision are handled by [`encode_section`] and [`decode_section`].
///
/// ```no_run
/// use vcdelta::compress::secondary::CompressBackend;
///
/// struct Reverse;
///
/// impl CompressBackend for Reverse {
///     fn id(&self) -> u8 { 200 }
///     fn compress(&self, data: &[u8]) -> vcdelta::Result<Vec<u8>> {
///         Ok(data.iter().rev().copied().collect())
///     }
///     fn decompress(&self, data: &[u8], _raw_len: usize) -> vcdelta::Result<Vec<u8>> {
///         Ok(data.iter().rev().copied().collect())
///     }
/// }
/// ```
pub trait CompressBackend: Send + Sync {
    /// Compressor ID stored in the file header.
    fn id(&self) -> u8;

    /// Compress one section payload.
    fn compress(&self, data: &[u8]) -> Result<Vec<u8>>;

    /// Decompress a payload produced by `compress`. `raw_len` is the length
    /// declared in the section frame.
    fn decompress(&self, data: &[u8], raw_len: usize) -> Result<Vec<u8>>;

    /// Whether a section is worth handing to `compress` at all.
    fn should_compress(&self, data: &[u8]) -> bool {
        data.len() >= SECONDARY_MIN_INPUT
    }
}

// ---------------------------------------------------------------------------
// LZMA backend
// ---------------------------------------------------------------------------

/// LZMA secondary compressor (ID 2).
#[cfg(feature = "lzma-secondary")]
#[derive(Debug, Clone, Copy, Default)]
pub struct LzmaBackend;

#[cfg(feature = "lzma-secondary")]
impl CompressBackend for LzmaBackend {
    fn id(&self) -> u8 {
        VCD_LZMA_ID
    }

    fn compress(&self, data: &[u8]) -> Result<Vec<u8>> {
        let mut input = io::Cursor::new(data);
        let mut output = Vec::new();
        lzma_rs::lzma_compress(&mut input, &mut output)?;
        Ok(output)
    }

    fn decompress(&self, data: &[u8], raw_len: usize) -> Result<Vec<u8>> {
        // The header's own size field is ignored: decoding stops at the
        // framed length and the dictionary may not outgrow it.
        let options = lzma_rs::decompress::Options {
            unpacked_size: lzma_rs::decompress::UnpackedSize::ReadHeaderButUseProvided(Some(
                raw_len as u64,
            )),
            memlimit: Some(raw_len.max(1)),
            ..Default::default()
        };
        let mut input = io::BufReader::new(io::Cursor::new(data));
        let mut output = Vec::with_capacity(raw_len);
        lzma_rs::lzma_decompress_with_options(&mut input, &mut output, &options)
            .map_err(|e| Error::invalid(format!("lzma section: {e}")))?;
        Ok(output)
    }
}

// ---------------------------------------------------------------------------
// Zlib backend
// ---------------------------------------------------------------------------

/// Zlib secondary compressor (ID 3).
#[cfg(feature = "zlib-secondary")]
#[derive(Debug, Clone, Copy)]
pub struct ZlibBackend {
    level: flate2::Compression,
}

#[cfg(feature = "zlib-secondary")]
impl ZlibBackend {
    /// Create a backend at the given level (0-9).
    pub fn new(level: u32) -> Self {
        Self {
            level: flate2::Compression::new(level.min(9)),
        }
    }
}

#[cfg(feature = "zlib-secondary")]
impl Default for ZlibBackend {
    fn default() -> Self {
        Self::new(6)
    }
}

#[cfg(feature = "zlib-secondary")]
impl CompressBackend for ZlibBackend {
    fn id(&self) -> u8 {
        VCD_ZLIB_ID
    }

    fn compress(&self, data: &[u8]) -> Result<Vec<u8>> {
        let mut enc = flate2::write::ZlibEncoder::new(Vec::new(), self.level);
        enc.write_all(data)?;
        Ok(enc.finish()?)
    }

    fn decompress(&self, data: &[u8], raw_len: usize) -> Result<Vec<u8>> {
        // Bound the read so a hostile stream cannot inflate past the frame.
        let limit = raw_len as u64 + 1;
        let mut dec = flate2::read::ZlibDecoder::new(data).take(limit);
        let mut output = Vec::with_capacity(raw_len);
        dec.read_to_end(&mut output)
            .map_err(|e| Error::invalid(format!("zlib section: {e}")))?;
        Ok(output)
    }
}

// ---------------------------------------------------------------------------
// Configuration
// ---------------------------------------------------------------------------

/// Secondary compression selected for an encoder.
#[derive(Clone, Default)]
pub enum SecondaryCompression {
    #[default]
    None,
    #[cfg(feature = "lzma-secondary")]
    Lzma,
    #[cfg(feature = "zlib-secondary")]
    Zlib { level: u32 },
    Custom(Arc<dyn CompressBackend>),
}

impl fmt::Debug for SecondaryCompression {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::None => write!(f, "None"),
            #[cfg(feature = "lzma-secondary")]
            Self::Lzma => write!(f, "Lzma"),
            #[cfg(feature = "zlib-secondary")]
            Self::Zlib { level } => write!(f, "Zlib {{ level: {level} }}"),
            Self::Custom(b) => write!(f, "Custom(id={})", b.id()),
        }
    }
}

impl SecondaryCompression {
    /// Backend for this selection, `None` when disabled.
    pub fn backend(&self) -> Option<Arc<dyn CompressBackend>> {
        match self {
            Self::None => None,
            #[cfg(feature = "lzma-secondary")]
            Self::Lzma => Some(Arc::new(LzmaBackend)),
            #[cfg(feature = "zlib-secondary")]
            Self::Zlib { level } => Some(Arc::new(ZlibBackend::new(*level))),
            Self::Custom(b) => Some(Arc::clone(b)),
        }
    }

    pub fn is_enabled(&self) -> bool {
        !matches!(self, Self::None)
    }

    /// Compressor ID written to the file header.
    pub fn id(&self) -> Option<u8> {
        self.backend().map(|b| b.id())
    }
}

/// Resolve the compressor named in a file header.
///
/// A registered backend with a matching ID always wins. Otherwise DJW and FGK
/// are reported as unimplemented and any other unknown ID as invalid input.
pub fn backend_for_id(
    id: u8,
    registered: Option<&Arc<dyn CompressBackend>>,
) -> Result<Arc<dyn CompressBackend>> {
    if let Some(b) = registered.filter(|b| b.id() == id) {
        return Ok(Arc::clone(b));
    }
    match id {
        #[cfg(feature = "lzma-secondary")]
        VCD_LZMA_ID => Ok(Arc::new(LzmaBackend)),
        #[cfg(feature = "zlib-secondary")]
        VCD_ZLIB_ID => Ok(Arc::new(ZlibBackend::default())),
        #[cfg(not(feature = "lzma-secondary"))]
        VCD_LZMA_ID => Err(Error::Unimplemented("lzma secondary compression")),
        #[cfg(not(feature = "zlib-secondary"))]
        VCD_ZLIB_ID => Err(Error::Unimplemented("zlib secondary compression")),
        VCD_DJW_ID => Err(Error::Unimplemented("djw secondary compression")),
        VCD_FGK_ID => Err(Error::Unimplemented("fgk secondary compression")),
        other => Err(Error::invalid(format!(
            "unknown secondary compressor id {other}"
        ))),
    }
}

// ---------------------------------------------------------------------------
// Section framing
// ---------------------------------------------------------------------------

/// Compress one section. Returns the framed bytes, or `None` when the raw
/// section should be written instead.
pub fn encode_section(backend: &dyn CompressBackend, raw: &[u8]) -> Result<Option<Vec<u8>>> {
    if raw.len() < SECONDARY_MIN_INPUT || !backend.should_compress(raw) {
        return Ok(None);
    }
    let payload = backend.compress(raw)?;
    let framed_len = varint::sizeof_usize(raw.len()) + payload.len();
    if framed_len + SECONDARY_MIN_SAVINGS > raw.len() {
        trace!(
            "secondary: {} bytes -> {} framed, kept raw",
            raw.len(),
            framed_len
        );
        return Ok(None);
    }
    let mut out = Vec::with_capacity(framed_len);
    varint::push_usize(&mut out, raw.len());
    out.extend_from_slice(&payload);
    Ok(Some(out))
}

/// Undo [`encode_section`]. `max_len` bounds the declared raw length.
pub fn decode_section(
    backend: &dyn CompressBackend,
    framed: &[u8],
    max_len: usize,
) -> Result<Vec<u8>> {
    let mut reader = SliceReader::new(framed);
    let raw_len = reader.usize()?;
    if raw_len > max_len {
        return Err(Error::invalid(format!(
            "secondary section declares {raw_len} bytes, limit {max_len}"
        )));
    }
    let payload = &framed[reader.position()..];
    let out = backend.decompress(payload, raw_len)?;
    if out.len() != raw_len {
        return Err(Error::invalid(format!(
            "secondary section decoded to {} bytes, expected {raw_len}",
            out.len()
        )));
    }
    Ok(out)
}

/// Compress the three sections in place, returning which ones changed.
pub fn compress_sections(
    backend: &dyn CompressBackend,
    data: &mut Vec<u8>,
    inst: &mut Vec<u8>,
    addr: &mut Vec<u8>,
) -> Result<DeltaFlags> {
    let mut flags = DeltaFlags::empty();
    for (section, flag) in [
        (data, DeltaFlags::DATACOMP),
        (inst, DeltaFlags::INSTCOMP),
        (addr, DeltaFlags::ADDRCOMP),
    ] {
        if let Some(framed) = encode_section(backend, section)? {
            *section = framed;
            flags |= flag;
        }
    }
    Ok(flags)
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Reverse;

    impl CompressBackend for Reverse {
        fn id(&self) -> u8 {
            VCD_DJW_ID
        }
        fn compress(&self, data: &[u8]) -> Result<Vec<u8>> {
            // Keep every other byte reversed so the savings rule can be exercised.
            Ok(data.iter().rev().step_by(2).copied().collect())
        }
        fn decompress(&self, data: &[u8], raw_len: usize) -> Result<Vec<u8>> {
            let mut out = Vec::with_capacity(raw_len);
            for &b in data.iter().rev() {
                out.push(b);
                if out.len() < raw_len {
                    out.push(b);
                }
            }
            Ok(out)
        }
    }

    struct Identity;

    impl CompressBackend for Identity {
        fn id(&self) -> u8 {
            200
        }
        fn compress(&self, data: &[u8]) -> Result<Vec<u8>> {
            Ok(data.to_vec())
        }
        fn decompress(&self, data: &[u8], _raw_len: usize) -> Result<Vec<u8>> {
            Ok(data.to_vec())
        }
    }

    #[test]
    fn short_sections_are_left_alone() {
        assert!(encode_section(&Reverse, b"aabbccdd").unwrap().is_none());
        assert!(encode_section(&Reverse, &[]).unwrap().is_none());
    }

    #[test]
    fn frame_round_trips_through_custom_backend() {
        let raw = b"aabbccddeeffgghh".to_vec();
        let framed = encode_section(&Reverse, &raw).unwrap().unwrap();
        assert_eq!(framed[0] as usize, raw.len());
        assert_eq!(decode_section(&Reverse, &framed, 1 << 20).unwrap(), raw);
    }

    #[test]
    fn no_savings_keeps_raw() {
        // Identity output plus a one byte prefix is always larger.
        let raw = vec![7u8; 64];
        assert!(encode_section(&Identity, &raw).unwrap().is_none());
    }

    #[test]
    fn declared_length_is_bounded() {
        let mut framed = Vec::new();
        varint::push_usize(&mut framed, 1000);
        framed.extend_from_slice(b"xyz");
        assert!(decode_section(&Identity, &framed, 999).is_err());
        // Mismatch between declared and produced length.
        assert!(decode_section(&Identity, &framed, 1000).is_err());
    }

    #[test]
    fn sections_report_flags() {
        let mut data = b"aabbccddeeffgghhiijj".to_vec();
        let mut inst = b"short".to_vec();
        let mut addr = b"kkllmmnnooppqqrrsstt".to_vec();
        let flags = compress_sections(&Reverse, &mut data, &mut inst, &mut addr).unwrap();
        assert_eq!(flags, DeltaFlags::DATACOMP | DeltaFlags::ADDRCOMP);
        assert_eq!(inst, b"short");
        assert_eq!(
            decode_section(&Reverse, &data, 64).unwrap(),
            b"aabbccddeeffgghhiijj"
        );
    }

    #[test]
    fn id_resolution() {
        assert!(matches!(
            backend_for_id(VCD_DJW_ID, None),
            Err(Error::Unimplemented(_))
        ));
        assert!(matches!(
            backend_for_id(VCD_FGK_ID, None),
            Err(Error::Unimplemented(_))
        ));
        assert!(matches!(
            backend_for_id(99, None),
            Err(Error::InvalidInput(_))
        ));
        let custom: Arc<dyn CompressBackend> = Arc::new(Reverse);
        assert_eq!(backend_for_id(VCD_DJW_ID, Some(&custom)).unwrap().id(), VCD_DJW_ID);
    }

    #[test]
    fn selection_enum() {
        assert!(!SecondaryCompression::None.is_enabled());
        assert!(SecondaryCompression::None.backend().is_none());
        let custom = SecondaryCompression::Custom(Arc::new(Identity));
        assert_eq!(custom.id(), Some(200));
        assert_eq!(format!("{custom:?}"), "Custom(id=200)");
    }

    #[cfg(feature = "lzma-secondary")]
    #[test]
    fn lzma_section_round_trip() {
        let raw: Vec<u8> = b"Hello, world! This is test data. "
            .iter()
            .copied()
            .cycle()
            .take(1024)
            .collect();
        let framed = encode_section(&LzmaBackend, &raw).unwrap().unwrap();
        assert!(framed.len() < raw.len());
        assert_eq!(decode_section(&LzmaBackend, &framed, raw.len()).unwrap(), raw);
        assert_eq!(backend_for_id(VCD_LZMA_ID, None).unwrap().id(), VCD_LZMA_ID);
    }

    #[cfg(feature = "lzma-secondary")]
    #[test]
    fn lzma_section_cannot_outgrow_its_frame() {
        let bomb = LzmaBackend.compress(&vec![0u8; 1 << 20]).unwrap();
        assert!(bomb.len() < (1 << 20) / 4);
        let mut framed = Vec::new();
        varint::push_usize(&mut framed, 10);
        framed.extend_from_slice(&bomb);
        match decode_section(&LzmaBackend, &framed, 1 << 20) {
            Ok(out) => assert_eq!(out, vec![0u8; 10]),
            Err(e) => assert!(matches!(e, Error::InvalidInput(_)), "{e}"),
        }
        match LzmaBackend.decompress(&bomb, 10) {
            Ok(out) => assert!(out.len() <= 10, "inflated to {}", out.len()),
            Err(e) => assert!(matches!(e, Error::InvalidInput(_)), "{e}"),
        }
    }

    #[cfg(feature = "zlib-secondary")]
    #[test]
    fn zlib_section_round_trip() {
        let backend = ZlibBackend::default();
        let raw = vec![0xAAu8; 300];
        let framed = encode_section(&backend, &raw).unwrap().unwrap();
        assert_eq!(decode_section(&backend, &framed, 300).unwrap(), raw);
        // A frame that under-declares its length is rejected.
        let mut short = Vec::new();
        varint::push_usize(&mut short, 100);
        short.extend_from_slice(&framed[varint::sizeof_usize(300)..]);
        assert!(decode_section(&backend, &short, 300).is_err());
    }
}
