// VCDIFF stream and window headers (RFC 3284, Section 4).
//
// Encoding appends to a byte vector. Decoding is field-by-field inside the
// resumable decoder; this module supplies the types, the indicator flags
// and the validation each field goes through once it has been read.

use bitflags::bitflags;

use super::varint;
use crate::error::{Error, Result};

pub const VCDIFF_MAGIC: [u8; 4] = [0xD6, 0xC3, 0xC4, 0x00];

/// Largest target window a decoder accepts.
pub const HARD_MAX_WINSIZE: u64 = 1 << 24;

// ---------------------------------------------------------------------------
// Indicator flags
// ---------------------------------------------------------------------------

bitflags! {
    /// Stream header indicator (`Hdr_Indicator`).
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct HeaderFlags: u8 {
        const SECONDARY = 0x01;
        const CODETABLE = 0x02;
        const APPHEADER = 0x04;
    }

    /// Window indicator (`Win_Indicator`).
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct WindowFlags: u8 {
        const SOURCE = 0x01;
        const TARGET = 0x02;
        const ADLER32 = 0x04;
    }

    /// Per-section secondary compression (`Delta_Indicator`).
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct DeltaFlags: u8 {
        const DATACOMP = 0x01;
        const INSTCOMP = 0x02;
        const ADDRCOMP = 0x04;
    }
}

impl HeaderFlags {
    pub fn parse(byte: u8) -> Result<Self> {
        Self::from_bits(byte)
            .ok_or_else(|| Error::invalid(format!("reserved header indicator bits: {byte:#04x}")))
    }
}

impl WindowFlags {
    pub fn parse(byte: u8) -> Result<Self> {
        let flags = Self::from_bits(byte)
            .ok_or_else(|| Error::invalid(format!("reserved window indicator bits: {byte:#04x}")))?;
        if flags.contains(Self::SOURCE | Self::TARGET) {
            return Err(Error::invalid("VCD_SOURCE and VCD_TARGET are mutually exclusive"));
        }
        if flags.contains(Self::TARGET) {
            return Err(Error::Unimplemented("target-window-relative copies (VCD_TARGET)"));
        }
        Ok(flags)
    }
}

impl DeltaFlags {
    pub fn parse(byte: u8) -> Result<Self> {
        Self::from_bits(byte)
            .ok_or_else(|| Error::invalid(format!("reserved delta indicator bits: {byte:#04x}")))
    }
}

// ---------------------------------------------------------------------------
// Secondary compressor IDs
// ---------------------------------------------------------------------------

pub const VCD_DJW_ID: u8 = 1;
pub const VCD_LZMA_ID: u8 = 2;
pub const VCD_ZLIB_ID: u8 = 3;
pub const VCD_FGK_ID: u8 = 16;

// ---------------------------------------------------------------------------
// Stream header
// ---------------------------------------------------------------------------

/// Stream header written before the first window.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FileHeader {
    pub flags: HeaderFlags,
    pub secondary_id: Option<u8>,
    pub app_header: Option<Vec<u8>>,
}

impl FileHeader {
    pub fn new(secondary_id: Option<u8>, app_header: Option<Vec<u8>>) -> Self {
        let mut flags = HeaderFlags::empty();
        flags.set(HeaderFlags::SECONDARY, secondary_id.is_some());
        flags.set(HeaderFlags::APPHEADER, app_header.is_some());
        Self {
            flags,
            secondary_id,
            app_header,
        }
    }

    /// Magic, indicator, secondary ID, application header.
    pub fn encode(&self, out: &mut Vec<u8>) {
        out.extend_from_slice(&VCDIFF_MAGIC);
        out.push(self.flags.bits());
        if let Some(id) = self.secondary_id {
            out.push(id);
        }
        if let Some(app) = &self.app_header {
            varint::push_usize(out, app.len());
            out.extend_from_slice(app);
        }
    }
}

/// Check the four magic bytes.
pub fn check_magic(magic: &[u8; 4]) -> Result<()> {
    if magic[..3] != VCDIFF_MAGIC[..3] {
        return Err(Error::invalid(format!(
            "not a VCDIFF stream: magic {:02x} {:02x} {:02x}",
            magic[0], magic[1], magic[2]
        )));
    }
    if magic[3] != VCDIFF_MAGIC[3] {
        return Err(Error::invalid(format!(
            "unsupported VCDIFF version {:#04x}",
            magic[3]
        )));
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Window header
// ---------------------------------------------------------------------------

/// Per-window header.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WindowHeader {
    pub flags: WindowFlags,
    /// Length of the source segment addressable by COPY.
    pub copy_len: u64,
    /// Offset of that segment in the source.
    pub copy_offset: u64,
    /// Redundant length of everything after this field.
    pub enc_len: u64,
    pub target_len: u64,
    pub delta_flags: DeltaFlags,
    pub data_len: u64,
    pub inst_len: u64,
    pub addr_len: u64,
    pub adler32: Option<u32>,
}

impl WindowHeader {
    #[inline]
    pub fn has_source(&self) -> bool {
        self.flags.contains(WindowFlags::SOURCE)
    }

    #[inline]
    pub fn has_checksum(&self) -> bool {
        self.flags.contains(WindowFlags::ADLER32)
    }

    /// The value `enc_len` must carry given every other field.
    pub fn compute_enc_len(&self) -> u64 {
        let mut len = varint::sizeof_u64(self.target_len) as u64
            + 1
            + varint::sizeof_u64(self.data_len) as u64
            + varint::sizeof_u64(self.inst_len) as u64
            + varint::sizeof_u64(self.addr_len) as u64;
        len = len
            .saturating_add(self.data_len)
            .saturating_add(self.inst_len)
            .saturating_add(self.addr_len);
        if self.has_checksum() {
            len += 4;
        }
        len
    }

    /// Fill in `enc_len` from the other fields.
    pub fn finalize(&mut self) {
        self.enc_len = self.compute_enc_len();
    }

    /// Verify `enc_len` and the section lengths once all of them are known.
    pub fn check_lengths(&self) -> Result<()> {
        let expected = self.compute_enc_len();
        if self.enc_len != expected {
            return Err(Error::invalid(format!(
                "window length mismatch: header says {}, fields give {expected}",
                self.enc_len
            )));
        }
        Ok(())
    }

    pub fn encode(&self, out: &mut Vec<u8>) {
        out.push(self.flags.bits());
        if self.has_source() {
            varint::push_u64(out, self.copy_len);
            varint::push_u64(out, self.copy_offset);
        }
        varint::push_u64(out, self.enc_len);
        varint::push_u64(out, self.target_len);
        out.push(self.delta_flags.bits());
        varint::push_u64(out, self.data_len);
        varint::push_u64(out, self.inst_len);
        varint::push_u64(out, self.addr_len);
        if let Some(sum) = self.adler32.filter(|_| self.has_checksum()) {
            out.extend_from_slice(&sum.to_be_bytes());
        }
    }
}

// ---------------------------------------------------------------------------
// Adler-32
// ---------------------------------------------------------------------------

/// Adler-32 of a target window.
pub fn adler32(data: &[u8]) -> u32 {
    #[cfg(feature = "adler32")]
    {
        let mut hasher = simd_adler32::Adler32::new();
        hasher.write(data);
        hasher.finish()
    }
    #[cfg(not(feature = "adler32"))]
    {
        const MOD_ADLER: u32 = 65521;
        // Largest n with 255 n (n + 1) / 2 + (n + 1) (MOD_ADLER - 1) < 2^32.
        const NMAX: usize = 5552;
        let (mut a, mut b) = (1u32, 0u32);
        for chunk in data.chunks(NMAX) {
            for &byte in chunk {
                a += u32::from(byte);
                b += a;
            }
            a %= MOD_ADLER;
            b %= MOD_ADLER;
        }
        (b << 16) | a
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
