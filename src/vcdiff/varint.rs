// VCDIFF variable-length integers (RFC 3284, Section 2).
//
// Base-128, big-endian: most-significant group first. Every byte except the
// last has bit 7 set. Encoding always uses the minimal number of bytes.
//
// Two decoders are provided: slice decoding for sections that are already
// complete, and `VarintDecoder`, which keeps its partial accumulator between
// deliveries so a header field may be split across any number of input
// buffers.

use thiserror::Error;

/// Maximum encoded length for a 64-bit value (ceil(64/7) = 10).
pub const MAX_VARINT_LEN: usize = 10;

/// If any of these bits are set before a shift, `<< 7` overflows a `u32`.
const U32_OVERFLOW_MASK: u32 = 0xFE00_0000;

/// Same guard for a `u64` accumulator.
const U64_OVERFLOW_MASK: u64 = 0xFE00_0000_0000_0000;

/// Varint decode failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum VarintError {
    /// Input ended before the terminating byte.
    #[error("varint underflow (truncated input)")]
    Underflow,
    /// Value does not fit the target integer width.
    #[error("varint overflow")]
    Overflow,
}

// ---------------------------------------------------------------------------
// Encoding
// ---------------------------------------------------------------------------

/// Encode `num` into the tail of `buf`, returning the encoded length.
/// The encoded bytes are `buf[MAX_VARINT_LEN - len..]`.
#[inline]
pub fn encode_u64(mut num: u64, buf: &mut [u8; MAX_VARINT_LEN]) -> usize {
    let mut i = MAX_VARINT_LEN - 1;
    buf[i] = num as u8 & 0x7F;
    num >>= 7;
    while num != 0 {
        i -= 1;
        buf[i] = (num as u8 & 0x7F) | 0x80;
        num >>= 7;
    }
    MAX_VARINT_LEN - i
}

/// Append the encoding of `num` to `out`.
#[inline]
pub fn push_u64(out: &mut Vec<u8>, num: u64) {
    let mut buf = [0u8; MAX_VARINT_LEN];
    let len = encode_u64(num, &mut buf);
    out.extend_from_slice(&buf[MAX_VARINT_LEN - len..]);
}

/// Append the encoding of `num` to `out`.
#[inline]
pub fn push_usize(out: &mut Vec<u8>, num: usize) {
    push_u64(out, num as u64);
}

/// Encoded byte-length of `num`.
#[inline]
pub fn sizeof_u64(num: u64) -> usize {
    let bits = 64 - num.leading_zeros();
    bits.max(1).div_ceil(7) as usize
}

/// Encoded byte-length of `num`.
#[inline]
pub fn sizeof_usize(num: usize) -> usize {
    sizeof_u64(num as u64)
}

// ---------------------------------------------------------------------------
// Slice decoding
// ---------------------------------------------------------------------------

/// Decode a `u64` from the front of `data`: `(value, bytes consumed)`.
pub fn read_u64(data: &[u8]) -> Result<(u64, usize), VarintError> {
    let mut val: u64 = 0;
    for (i, &byte) in data.iter().enumerate() {
        if val & U64_OVERFLOW_MASK != 0 {
            return Err(VarintError::Overflow);
        }
        val = (val << 7) | u64::from(byte & 0x7F);
        if byte & 0x80 == 0 {
            return Ok((val, i + 1));
        }
    }
    Err(VarintError::Underflow)
}

/// Decode a `u32` from the front of `data`.
pub fn read_u32(data: &[u8]) -> Result<(u32, usize), VarintError> {
    let mut val: u32 = 0;
    for (i, &byte) in data.iter().enumerate() {
        if val & U32_OVERFLOW_MASK != 0 {
            return Err(VarintError::Overflow);
        }
        val = (val << 7) | u32::from(byte & 0x7F);
        if byte & 0x80 == 0 {
            return Ok((val, i + 1));
        }
    }
    Err(VarintError::Underflow)
}

/// Decode a `usize` from the front of `data`.
pub fn read_usize(data: &[u8]) -> Result<(usize, usize), VarintError> {
    let (val, len) = read_u64(data)?;
    let val = usize::try_from(val).map_err(|_| VarintError::Overflow)?;
    Ok((val, len))
}

/// Cursor over a complete section, used by the instruction and address
/// readers.
#[derive(Debug, Clone, Copy)]
pub struct SliceReader<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> SliceReader<'a> {
    pub fn new(data: &'a [u8]) -> Self {
        Self { data, pos: 0 }
    }

    #[inline]
    pub fn position(&self) -> usize {
        self.pos
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.pos >= self.data.len()
    }

    #[inline]
    pub fn remaining(&self) -> usize {
        self.data.len() - self.pos
    }

    #[inline]
    pub fn byte(&mut self) -> Result<u8, VarintError> {
        let b = *self.data.get(self.pos).ok_or(VarintError::Underflow)?;
        self.pos += 1;
        Ok(b)
    }

    #[inline]
    pub fn u64(&mut self) -> Result<u64, VarintError> {
        let (v, n) = read_u64(&self.data[self.pos..])?;
        self.pos += n;
        Ok(v)
    }

    #[inline]
    pub fn u32(&mut self) -> Result<u32, VarintError> {
        let (v, n) = read_u32(&self.data[self.pos..])?;
        self.pos += n;
        Ok(v)
    }

    #[inline]
    pub fn usize(&mut self) -> Result<usize, VarintError> {
        let (v, n) = read_usize(&self.data[self.pos..])?;
        self.pos += n;
        Ok(v)
    }

    pub fn bytes(&mut self, len: usize) -> Result<&'a [u8], VarintError> {
        let end = self.pos.checked_add(len).ok_or(VarintError::Overflow)?;
        let out = self.data.get(self.pos..end).ok_or(VarintError::Underflow)?;
        self.pos = end;
        Ok(out)
    }
}

// ---------------------------------------------------------------------------
// Resumable decoding
// ---------------------------------------------------------------------------

/// Target width of a resumable decode.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Width {
    U32,
    U64,
}

impl Width {
    #[inline]
    fn overflow_mask(self) -> u64 {
        match self {
            Width::U32 => u64::from(U32_OVERFLOW_MASK),
            Width::U64 => U64_OVERFLOW_MASK,
        }
    }
}

/// Resumable varint decoder.
///
/// `feed` consumes bytes until the integer terminates. If the input runs
/// out first it returns `Ok(None)` and remembers the accumulator, so the
/// next call continues with the following delivery.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VarintDecoder {
    width: Width,
    acc: u64,
    bytes: u8,
}

impl VarintDecoder {
    pub const fn new(width: Width) -> Self {
        Self {
            width,
            acc: 0,
            bytes: 0,
        }
    }

    /// Number of bytes consumed into the current partial value.
    #[inline]
    pub fn pending_bytes(&self) -> usize {
        self.bytes as usize
    }

    /// Consume from `input`, advancing `*pos`. Returns the value once the
    /// final byte has been read, after which the decoder is reset.
    pub fn feed(&mut self, input: &[u8], pos: &mut usize) -> Result<Option<u64>, VarintError> {
        let mask = self.width.overflow_mask();
        while let Some(&byte) = input.get(*pos) {
            *pos += 1;
            if self.acc & mask != 0 {
                return Err(VarintError::Overflow);
            }
            self.acc = (self.acc << 7) | u64::from(byte & 0x7F);
            self.bytes = self.bytes.saturating_add(1);
            if byte & 0x80 == 0 {
                let v = self.acc;
                self.acc = 0;
                self.bytes = 0;
                return Ok(Some(v));
            }
        }
        Ok(None)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
