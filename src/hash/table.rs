// Checksum-keyed position tables.
//
//   - `SmallTable`: target self-matching. Window-relative positions, with
//     an optional circular `prev` chain so the matcher can walk earlier
//     positions that hashed to the same bucket.
//   - `LargeTable`: source matching. Absolute source offsets, last write
//     wins, kept for the whole encode.
//
// Both store `position + HASH_CKOFFSET` so 0 marks an empty bucket.

use super::rolling::{HASH_CKOFFSET, HashCfg};

// ---------------------------------------------------------------------------
// Small table
// ---------------------------------------------------------------------------

/// Target-position table with optional chaining.
#[derive(Debug, Clone)]
pub struct SmallTable {
    buckets: Vec<u32>,
    cfg: HashCfg,
    /// `prev[pos & prev_mask]` holds the bucket head displaced by `pos`.
    prev: Vec<u32>,
    prev_mask: u64,
}

impl SmallTable {
    /// `sprevsz` must be a power of two, or 0 to disable chaining.
    pub fn new(slots: usize, sprevsz: usize) -> Self {
        let cfg = HashCfg::new(slots);
        let sprevsz = if sprevsz == 0 { 0 } else { sprevsz.next_power_of_two() };
        Self {
            buckets: vec![0; cfg.size],
            cfg,
            prev: vec![0; sprevsz],
            prev_mask: (sprevsz as u64).saturating_sub(1),
        }
    }

    /// Forget every position. Called at each window start.
    pub fn reset(&mut self) {
        self.buckets.fill(0);
        self.prev.fill(0);
    }

    #[inline]
    pub fn capacity(&self) -> usize {
        self.cfg.size
    }

    /// Most recent position stored under `cksum`.
    #[inline(always)]
    pub fn lookup(&self, cksum: u32) -> Option<u64> {
        match self.buckets[self.cfg.bucket(cksum)] {
            0 => None,
            v => Some(u64::from(v) - HASH_CKOFFSET),
        }
    }

    /// Record `pos` under `cksum`, linking the previous head into the chain.
    #[inline(always)]
    pub fn insert(&mut self, cksum: u32, pos: u64) {
        let Ok(stored) = u32::try_from(pos + HASH_CKOFFSET) else {
            return;
        };
        let bucket = self.cfg.bucket(cksum);
        if !self.prev.is_empty() {
            self.prev[(pos & self.prev_mask) as usize] = self.buckets[bucket];
        }
        self.buckets[bucket] = stored;
    }

    /// Position that preceded `pos` in its bucket, if the chain still
    /// holds it. Entries older than the chain length are stale.
    #[inline]
    pub fn chain_prev(&self, pos: u64, current: u64) -> Option<u64> {
        if self.prev.is_empty() {
            return None;
        }
        let last = self.prev[(pos & self.prev_mask) as usize];
        if last == 0 {
            return None;
        }
        let last = u64::from(last) - HASH_CKOFFSET;
        if last >= pos || current - last > self.prev_mask {
            return None;
        }
        Some(last)
    }
}

// ---------------------------------------------------------------------------
// Large table
// ---------------------------------------------------------------------------

/// Source-offset table.
#[derive(Debug, Clone)]
pub struct LargeTable {
    buckets: Vec<u64>,
    cfg: HashCfg,
}

impl LargeTable {
    pub fn new(slots: usize) -> Self {
        let cfg = HashCfg::new(slots.max(8));
        Self {
            buckets: vec![0; cfg.size],
            cfg,
        }
    }

    #[inline]
    pub fn capacity(&self) -> usize {
        self.cfg.size
    }

    #[inline(always)]
    pub fn lookup(&self, cksum: u32) -> Option<u64> {
        match self.buckets[self.cfg.bucket(cksum)] {
            0 => None,
            v => Some(v - HASH_CKOFFSET),
        }
    }

    #[inline(always)]
    pub fn insert(&mut self, cksum: u32, pos: u64) {
        let bucket = self.cfg.bucket(cksum);
        self.buckets[bucket] = pos + HASH_CKOFFSET;
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
