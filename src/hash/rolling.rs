// Rolling checksums and byte-comparison kernels for the string matcher.
//
// Two checksum families:
//   - Small: 4-byte window, native-endian word times a multiplicative
//     constant. Used for target self-copies; recomputed per position.
//   - Large: Rabin-Karp polynomial over a configurable window, rolled in
//     O(1) with a precomputed weight for the outgoing byte. Used to index
//     and probe the source.
//
// The comparison kernels work a machine word at a time and fall back to
// bytes for the tail.

/// Multiplier for both checksum families.
pub const HASH_MULT_32: u32 = 1_597_334_677;

/// Bias added to stored positions so 0 means "empty bucket".
pub const HASH_CKOFFSET: u64 = 1;

/// Largest table the bit-scan rule will size.
const MAX_TABLE_BITS: u32 = 28;

// ---------------------------------------------------------------------------
// Small checksum
// ---------------------------------------------------------------------------

/// Small checksum of the 4 bytes at the front of `base`.
#[inline(always)]
pub fn small_cksum(base: &[u8]) -> u32 {
    let word: [u8; 4] = [base[0], base[1], base[2], base[3]];
    u32::from_ne_bytes(word).wrapping_mul(HASH_MULT_32)
}

// ---------------------------------------------------------------------------
// Large checksum
// ---------------------------------------------------------------------------

/// Rabin-Karp rolling hash over `look` bytes.
///
/// `h = Σ b[i] · M^(look-1-i)` in wrapping `u32` arithmetic.
#[derive(Debug, Clone)]
pub struct LargeHash {
    look: usize,
    /// `powers[i] = M^(look-1-i)`.
    powers: Vec<u32>,
    /// `M^look`, the weight of the outgoing byte after the shift.
    outgoing: u32,
}

impl LargeHash {
    pub fn new(look: usize) -> Self {
        let mut powers = vec![1u32; look];
        for i in (0..look.saturating_sub(1)).rev() {
            powers[i] = powers[i + 1].wrapping_mul(HASH_MULT_32);
        }
        let outgoing = powers.first().copied().unwrap_or(1).wrapping_mul(HASH_MULT_32);
        Self {
            look,
            powers,
            outgoing,
        }
    }

    #[inline]
    pub fn look(&self) -> usize {
        self.look
    }

    /// Full checksum of `base[..look]`.
    #[inline]
    pub fn checksum(&self, base: &[u8]) -> u32 {
        base[..self.look]
            .iter()
            .zip(&self.powers)
            .fold(0u32, |h, (&b, &p)| h.wrapping_add(u32::from(b).wrapping_mul(p)))
    }

    /// Roll `old` (checksum of `base[..look]`) to the checksum of
    /// `base[1..=look]`.
    #[inline(always)]
    pub fn update(&self, old: u32, base: &[u8]) -> u32 {
        self.roll(old, base[0], base[self.look])
    }

    /// Roll by one byte given the outgoing and incoming bytes.
    #[inline(always)]
    pub fn roll(&self, old: u32, out: u8, inc: u8) -> u32 {
        old.wrapping_mul(HASH_MULT_32)
            .wrapping_sub(self.outgoing.wrapping_mul(u32::from(out)))
            .wrapping_add(u32::from(inc))
    }
}

// ---------------------------------------------------------------------------
// Bucket mapping
// ---------------------------------------------------------------------------

/// Bucket geometry shared by both tables.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HashCfg {
    /// Number of buckets, a power of two.
    pub size: usize,
    pub bits: u32,
    shift: u32,
    mask: u32,
}

impl HashCfg {
    pub fn new(slots: usize) -> Self {
        let bits = size_hashtable_bits(slots);
        let size = 1usize << bits;
        Self {
            size,
            bits,
            shift: 32 - bits,
            mask: (size - 1) as u32,
        }
    }

    /// Fold the high bits of the checksum into the low ones.
    #[inline(always)]
    pub fn bucket(&self, cksum: u32) -> usize {
        ((cksum >> self.shift) ^ (cksum & self.mask)) as usize
    }
}

/// Bits of a table for `slots` requested entries: one less than the first
/// power of two strictly greater than `slots`.
pub fn size_hashtable_bits(slots: usize) -> u32 {
    for i in 3..=MAX_TABLE_BITS {
        if slots < (1usize << i) {
            return i - 1;
        }
    }
    MAX_TABLE_BITS
}

// ---------------------------------------------------------------------------
// Run detection
// ---------------------------------------------------------------------------

/// Length and byte of the run ending at `seg[look - 1]`.
#[inline]
pub fn comprun(seg: &[u8], look: usize) -> (usize, u8) {
    let mut run_l = 0usize;
    let mut run_c = 0u8;
    for &byte in &seg[..look] {
        if byte == run_c {
            run_l += 1;
        } else {
            run_c = byte;
            run_l = 1;
        }
    }
    (run_l, run_c)
}

/// Number of leading bytes of `data[..max]` equal to `byte`.
#[inline]
pub fn run_length(data: &[u8], byte: u8, max: usize) -> usize {
    let n = max.min(data.len());
    let pattern = u64::from_ne_bytes([byte; 8]);
    let mut i = 0;
    for chunk in data[..n].chunks_exact(8) {
        let diff = word(chunk) ^ pattern;
        if diff != 0 {
            return i + first_diff_byte(diff);
        }
        i += 8;
    }
    while i < n && data[i] == byte {
        i += 1;
    }
    i
}

// ---------------------------------------------------------------------------
// Match extension
// ---------------------------------------------------------------------------

/// Length of the common prefix of `a[..n]` and `b[..n]`.
#[inline]
pub fn forward_match(a: &[u8], b: &[u8], n: usize) -> usize {
    let n = n.min(a.len()).min(b.len());
    let mut i = 0;
    for (x, y) in a[..n].chunks_exact(8).zip(b[..n].chunks_exact(8)) {
        let diff = word(x) ^ word(y);
        if diff != 0 {
            return i + first_diff_byte(diff);
        }
        i += 8;
    }
    while i < n && a[i] == b[i] {
        i += 1;
    }
    i
}

/// Length of the common suffix of `a[..n]` and `b[..n]`.
#[inline]
pub fn backward_match(a: &[u8], b: &[u8], n: usize) -> usize {
    let n = n.min(a.len()).min(b.len());
    let (a, b) = (&a[a.len() - n..], &b[b.len() - n..]);
    let mut i = n;
    while i >= 8 {
        let diff = word(&a[i - 8..i]) ^ word(&b[i - 8..i]);
        if diff != 0 {
            return n - i + last_diff_byte(diff);
        }
        i -= 8;
    }
    while i > 0 && a[i - 1] == b[i - 1] {
        i -= 1;
    }
    n - i
}

#[inline(always)]
fn word(chunk: &[u8]) -> u64 {
    let mut w = [0u8; 8];
    w.copy_from_slice(&chunk[..8]);
    u64::from_ne_bytes(w)
}

/// Index of the first differing byte in memory order.
#[inline(always)]
fn first_diff_byte(diff: u64) -> usize {
    if cfg!(target_endian = "little") {
        (diff.trailing_zeros() / 8) as usize
    } else {
        (diff.leading_zeros() / 8) as usize
    }
}

/// Number of equal bytes at the end of the word in memory order.
#[inline(always)]
fn last_diff_byte(diff: u64) -> usize {
    if cfg!(target_endian = "little") {
        (diff.leading_zeros() / 8) as usize
    } else {
        (diff.trailing_zeros() / 8) as usize
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
