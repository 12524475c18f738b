// VCDIFF address cache (RFC 3284, Section 5.3).
//
// NEAR (recency ring) and SAME (direct-mapped by address modulo
// s_same * 256) caches used to encode COPY addresses compactly. Encoder and
// decoder perform the same update for every address, whichever mode carried
// it, so the two sides never drift apart.

use super::varint::{self, SliceReader};
use crate::error::{Error, Result};

/// Absolute address.
pub const VCD_SELF: u8 = 0;
/// `here - value`.
pub const VCD_HERE: u8 = 1;

/// Default NEAR ring depth.
pub const DEFAULT_NEAR: usize = 4;
/// Default number of SAME groups.
pub const DEFAULT_SAME: usize = 3;

// ---------------------------------------------------------------------------
// Address cache
// ---------------------------------------------------------------------------

/// NEAR/SAME address cache.
///
/// With the default sizes there are 9 modes:
///   0      VCD_SELF  absolute
///   1      VCD_HERE  here - value
///   2..5   NEAR      near\[mode-2\] + value
///   6..8   SAME      same\[(mode-6)*256 + byte\]
#[derive(Debug, Clone)]
pub struct AddressCache {
    s_near: usize,
    s_same: usize,
    near: Vec<u64>,
    same: Vec<u64>,
    next_slot: usize,
}

impl AddressCache {
    pub fn new() -> Self {
        Self::with_sizes(DEFAULT_NEAR, DEFAULT_SAME)
    }

    pub fn with_sizes(s_near: usize, s_same: usize) -> Self {
        Self {
            s_near,
            s_same,
            near: vec![0; s_near],
            same: vec![0; s_same * 256],
            next_slot: 0,
        }
    }

    /// Clear both caches. Called at the start of every window.
    pub fn reset(&mut self) {
        self.near.fill(0);
        self.same.fill(0);
        self.next_slot = 0;
    }

    /// Total number of address modes.
    #[inline]
    pub fn mode_count(&self) -> usize {
        2 + self.s_near + self.s_same
    }

    #[inline]
    fn same_start(&self) -> usize {
        2 + self.s_near
    }

    /// Record `addr` in both caches.
    #[inline]
    pub fn update(&mut self, addr: u64) {
        if self.s_near > 0 {
            self.near[self.next_slot] = addr;
            self.next_slot = (self.next_slot + 1) % self.s_near;
        }
        if self.s_same > 0 {
            let idx = (addr % (self.s_same as u64 * 256)) as usize;
            self.same[idx] = addr;
        }
    }

    /// Encode `addr` relative to `here`, appending the address bytes to
    /// `out` and returning the chosen mode. Requires `addr < here`.
    pub fn encode(&mut self, addr: u64, here: u64, out: &mut Vec<u8>) -> u8 {
        debug_assert!(addr < here);
        let (mode, value) = self.choose(addr, here);
        if mode as usize >= self.same_start() {
            out.push(value as u8);
        } else {
            varint::push_u64(out, value);
        }
        self.update(addr);
        mode
    }

    /// Mode selection. Any candidate that fits one varint byte wins
    /// immediately, so ties go to SELF, then HERE, then NEAR.
    fn choose(&self, addr: u64, here: u64) -> (u8, u64) {
        let mut best_d = addr;
        let mut best_m = VCD_SELF;
        if best_d <= 127 {
            return (best_m, best_d);
        }

        let d = here - addr;
        if d < best_d {
            best_d = d;
            best_m = VCD_HERE;
            if best_d <= 127 {
                return (best_m, best_d);
            }
        }

        for (i, &near) in self.near.iter().enumerate() {
            if addr >= near {
                let d = addr - near;
                if d < best_d {
                    best_d = d;
                    best_m = i as u8 + 2;
                    if best_d <= 127 {
                        return (best_m, best_d);
                    }
                }
            }
        }

        if self.s_same > 0 {
            let idx = (addr % (self.s_same as u64 * 256)) as usize;
            if self.same[idx] == addr {
                return ((self.same_start() + idx / 256) as u8, (idx % 256) as u64);
            }
        }

        (best_m, best_d)
    }

    /// Decode an address of the given mode from the address section.
    ///
    /// The result must precede `here`; anything else is a forward
    /// reference and rejected.
    pub fn decode(&mut self, mode: u8, addrs: &mut SliceReader<'_>, here: u64) -> Result<u64> {
        let mode = mode as usize;
        let same_start = self.same_start();
        if mode >= self.mode_count() {
            return Err(Error::invalid(format!("address mode {mode} out of range")));
        }

        let addr = if mode < same_start {
            let raw = addrs
                .u64()
                .map_err(|_| Error::invalid("address section underflow"))?;
            match mode as u8 {
                VCD_SELF => raw,
                VCD_HERE => here
                    .checked_sub(raw)
                    .ok_or_else(|| Error::invalid("HERE address precedes the copy window"))?,
                _ => self.near[mode - 2]
                    .checked_add(raw)
                    .ok_or_else(|| Error::invalid("NEAR address overflow"))?,
            }
        } else {
            let byte = addrs
                .byte()
                .map_err(|_| Error::invalid("address section underflow"))?;
            self.same[(mode - same_start) * 256 + byte as usize]
        };

        if addr >= here {
            return Err(Error::invalid(format!(
                "copy address {addr} is not before position {here}"
            )));
        }
        self.update(addr);
        Ok(addr)
    }
}

impl Default for AddressCache {
    fn default() -> Self {
        Self::new()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    fn roundtrip(addrs: &[(u64, u64)]) {
        let mut enc = AddressCache::new();
        let mut section = Vec::new();
        let modes: Vec<u8> = addrs
            .iter()
            .map(|&(a, h)| enc.encode(a, h, &mut section))
            .collect();

        let mut dec = AddressCache::new();
        let mut r = SliceReader::new(&section);
        for (&(a, h), &m) in addrs.iter().zip(&modes) {
            assert_eq!(dec.decode(m, &mut r, h).unwrap(), a);
        }
        assert!(r.is_empty());
    }

    #[test]
    fn small_address_uses_self() {
        let mut c = AddressCache::new();
        let mut out = Vec::new();
        assert_eq!(c.encode(100, 1000, &mut out), VCD_SELF);
        assert_eq!(out, vec![100]);
    }

    #[test]
    fn close_to_here_uses_here() {
        let mut c = AddressCache::new();
        let mut out = Vec::new();
        assert_eq!(c.encode(9990, 10_000, &mut out), VCD_HERE);
        assert_eq!(out, vec![10]);
    }

    #[test]
    fn near_mode_after_update() {
        let mut c = AddressCache::new();
        let mut out = Vec::new();
        c.encode(50_000, 100_000, &mut out);
        out.clear();
        let mode = c.encode(50_010, 100_000, &mut out);
        assert_eq!(mode, 2);
        assert_eq!(out, vec![10]);
    }

    #[test]
    fn same_mode_is_single_byte() {
        let mut c = AddressCache::new();
        let mut out = Vec::new();
        c.encode(300_000, 1_000_000, &mut out);
        // Push the NEAR ring far away from 300_000.
        for a in [600_000, 700_000, 800_000, 900_000] {
            c.encode(a, 1_000_000, &mut out);
        }
        out.clear();
        let mode = c.encode(300_000, 1_000_000, &mut out);
        assert!(mode >= 6);
        assert_eq!(out.len(), 1);
    }

    #[test]
    fn encode_decode_lockstep() {
        roundtrip(&[
            (0, 1),
            (5, 10),
            (1_000, 5_000),
            (1_010, 5_000),
            (300_000, 1_000_000),
            (4_999, 5_000),
            (300_000, 1_000_000),
            (123_456, 200_000),
        ]);
    }

    #[test]
    fn decode_rejects_forward_reference() {
        let mut c = AddressCache::new();
        let data = [50u8];
        let mut r = SliceReader::new(&data);
        assert!(c.decode(VCD_SELF, &mut r, 50).is_err());
    }

    #[test]
    fn decode_rejects_bad_mode_and_underflow() {
        let mut c = AddressCache::new();
        let mut r = SliceReader::new(&[]);
        assert!(c.decode(9, &mut r, 10).is_err());
        assert!(c.decode(VCD_SELF, &mut r, 10).is_err());
        let data = [20u8];
        let mut r = SliceReader::new(&data);
        assert!(c.decode(VCD_HERE, &mut r, 10).is_err());
    }

    #[test]
    fn reset_clears_state() {
        let mut c = AddressCache::new();
        let mut out = Vec::new();
        c.encode(50_000, 100_000, &mut out);
        c.reset();
        out.clear();
        assert_ne!(c.encode(50_010, 100_000, &mut out), 2);
    }
}
