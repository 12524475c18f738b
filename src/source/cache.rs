// Bounded block cache over a `BlockSource`.
//
// Block size is always a power of two so address-to-block is a shift and a
// mask. Sources that are already in memory are served directly from their
// slice. Everything else goes through a fixed pool of slots:
//
//   - LRU when the source length is known: any slot may be reused, the
//     least recently touched goes first.
//   - FIFO by block number when the length is unknown: block `n` always
//     lands in slot `n % slots`, which is correct for a purely sequential
//     scan of a stream.
//
// A forward-only source cannot return to a block once it has been read
// past; asking for one that was evicted is `Error::TooFarBack`.

use log::{debug, trace};

use super::{BlockRead, BlockSource};
use crate::arena::{Handle, OrderedPool};
use crate::error::{Error, Result};
use crate::hash::config::DEFAULT_SRCWINSZ;

/// Default number of cache slots.
pub const MAX_LRU_SIZE: usize = 32;

/// Cache sizing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CacheConfig {
    /// Explicit block size. Rounded up to a power of two. When unset, a
    /// source no larger than `max_window` gets one block spanning it,
    /// otherwise `max_window` is divided among the slots.
    pub block_size: Option<usize>,
    /// Number of resident blocks.
    pub slots: usize,
    /// Memory budget and the largest source window a COPY may span.
    pub max_window: u64,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            block_size: None,
            slots: MAX_LRU_SIZE,
            max_window: DEFAULT_SRCWINSZ,
        }
    }
}

/// Replacement policy in effect.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Policy {
    Lru,
    Fifo,
}

/// Block lookup result.
#[derive(Debug)]
pub enum Fetch<'a> {
    /// The valid bytes of the block; empty past the end of the source.
    Ready(&'a [u8]),
    /// This block must be supplied before the request can complete.
    Pending(u64),
}

/// Counters for tuning and tests.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    pub evictions: u64,
}

#[derive(Debug, Default)]
struct Block {
    blkno: Option<u64>,
    len: usize,
    data: Vec<u8>,
}

/// Round a requested block size up to a power of two.
pub fn round_block_size(size: usize) -> usize {
    size.max(1)
        .checked_next_power_of_two()
        .unwrap_or(1 << (usize::BITS - 1))
}

/// Fixed-slot block cache.
#[derive(Debug)]
pub struct SourceBlockCache<S> {
    source: S,
    blksize: usize,
    shift: u32,
    max_window: u64,
    policy: Policy,
    blocks: Vec<Block>,
    /// Read buffer swapped into a slot once a load succeeds.
    spare: Vec<u8>,
    /// Recency order of slot indices, least recent at the front.
    order: OrderedPool<usize>,
    handles: Vec<Handle>,
    /// Next block a forward-only source will produce.
    next_sequential: u64,
    max_blkno: u64,
    onlastblk: usize,
    eof_known: bool,
    stats: CacheStats,
}

impl<S: BlockSource> SourceBlockCache<S> {
    pub fn new(source: S, config: CacheConfig) -> Result<Self> {
        if config.slots == 0 {
            return Err(Error::invalid("block cache needs at least one slot"));
        }
        if config.max_window == 0 {
            return Err(Error::invalid("source window budget must be positive"));
        }
        let len = source.len_hint();
        let fits_whole = len.is_some_and(|l| l <= config.max_window);

        let blksize = match (config.block_size, len) {
            (Some(b), _) => round_block_size(b),
            (None, Some(l)) if fits_whole => round_block_size(l as usize),
            _ => round_block_size((config.max_window / config.slots as u64).max(1) as usize),
        };
        let shift = blksize.trailing_zeros();

        let mut slots = if config.block_size.is_none() && fits_whole {
            1
        } else {
            config.slots
        };
        if let Some(l) = len {
            let blocks = (l >> shift) + 1;
            slots = slots.min(blocks.min(usize::MAX as u64) as usize).max(1);
        }

        let policy = if len.is_some() { Policy::Lru } else { Policy::Fifo };

        let mut order = OrderedPool::with_capacity(slots);
        let mut handles = Vec::with_capacity(slots);
        for i in 0..slots {
            handles.push(
                order
                    .push_back(i)
                    .map_err(|_| Error::internal("cache order pool overflow"))?,
            );
        }

        let (max_blkno, onlastblk) = match len {
            Some(l) => (l >> shift, (l & (blksize as u64 - 1)) as usize),
            None => (0, 0),
        };

        debug!(
            "source cache: blksize {blksize}, {slots} slots, {policy:?}, length {len:?}, in memory {}",
            source.as_slice().is_some()
        );

        Ok(Self {
            source,
            blksize,
            shift,
            max_window: config.max_window,
            policy,
            blocks: (0..slots).map(|_| Block::default()).collect(),
            spare: Vec::new(),
            order,
            handles,
            next_sequential: 0,
            max_blkno,
            onlastblk,
            eof_known: len.is_some(),
            stats: CacheStats::default(),
        })
    }

    #[inline]
    pub fn blksize(&self) -> usize {
        self.blksize
    }

    #[inline]
    pub fn max_window(&self) -> u64 {
        self.max_window
    }

    #[inline]
    pub fn policy(&self) -> Policy {
        self.policy
    }

    #[inline]
    pub fn slots(&self) -> usize {
        self.blocks.len()
    }

    #[inline]
    pub fn stats(&self) -> CacheStats {
        self.stats
    }

    pub fn source(&self) -> &S {
        &self.source
    }

    pub fn source_mut(&mut self) -> &mut S {
        &mut self.source
    }

    /// Split an absolute source offset into (block number, offset in block).
    #[inline]
    pub fn block_span(&self, addr: u64) -> (u64, usize) {
        (addr >> self.shift, (addr & (self.blksize as u64 - 1)) as usize)
    }

    #[inline]
    pub fn eof_known(&self) -> bool {
        self.eof_known
    }

    /// Highest block number observed so far (the last block once EOF is known).
    #[inline]
    pub fn max_blkno(&self) -> u64 {
        self.max_blkno
    }

    /// Source length, once the final block has been seen or declared.
    pub fn source_len(&self) -> Option<u64> {
        self.eof_known
            .then(|| (self.max_blkno << self.shift) + self.onlastblk as u64)
    }

    /// Valid bytes in `blkno` as far as is known: a full block unless it is
    /// the final block or lies beyond it.
    pub fn bytes_on_block(&self, blkno: u64) -> usize {
        if !self.eof_known || blkno < self.max_blkno {
            self.blksize
        } else if blkno == self.max_blkno {
            self.onlastblk
        } else {
            0
        }
    }

    /// Fetch a block, reading it from the source on a miss.
    pub fn get_block(&mut self, blkno: u64) -> Result<Fetch<'_>> {
        if self.source.as_slice().is_some() {
            return Ok(self.memory_block(blkno));
        }
        if self.eof_known && blkno > self.max_blkno {
            return Ok(Fetch::Ready(&[]));
        }

        let slot = match self.find(blkno) {
            Some(slot) => {
                self.stats.hits += 1;
                self.order.move_to_back(self.handles[slot]);
                slot
            }
            None => {
                if !self.source.can_seek() {
                    if blkno < self.next_sequential {
                        debug!("source block {blkno} already passed on a forward-only source");
                        return Err(Error::TooFarBack);
                    }
                    while self.next_sequential < blkno {
                        let skip = self.next_sequential;
                        if self.load(skip)?.is_none() {
                            return Ok(Fetch::Pending(skip));
                        }
                        if self.eof_known && skip >= self.max_blkno {
                            return Ok(Fetch::Ready(&[]));
                        }
                    }
                }
                match self.load(blkno)? {
                    Some(slot) => slot,
                    None => return Ok(Fetch::Pending(blkno)),
                }
            }
        };
        let block = &self.blocks[slot];
        Ok(Fetch::Ready(&block.data[..block.len]))
    }

    fn memory_block(&mut self, blkno: u64) -> Fetch<'_> {
        self.stats.hits += 1;
        let data = self.source.as_slice().unwrap_or(&[]);
        let start = (blkno << self.shift).min(data.len() as u64) as usize;
        let end = start + self.blksize.min(data.len() - start);
        Fetch::Ready(&data[start..end])
    }

    fn find(&self, blkno: u64) -> Option<usize> {
        match self.policy {
            Policy::Fifo => {
                let slot = (blkno % self.blocks.len() as u64) as usize;
                (self.blocks[slot].blkno == Some(blkno)).then_some(slot)
            }
            Policy::Lru => self.blocks.iter().position(|b| b.blkno == Some(blkno)),
        }
    }

    fn victim(&self, blkno: u64) -> Result<usize> {
        match self.policy {
            Policy::Fifo => Ok((blkno % self.blocks.len() as u64) as usize),
            Policy::Lru => self
                .order
                .front()
                .and_then(|h| self.order.get(h).copied())
                .ok_or_else(|| Error::internal("block cache has no slots")),
        }
    }

    /// Read `blkno` into a victim slot. `None` when the source is not ready.
    ///
    /// The read lands in the spare buffer; the victim keeps its block until
    /// the new one has been read and checked.
    fn load(&mut self, blkno: u64) -> Result<Option<usize>> {
        let slot = self.victim(blkno)?;
        let blksize = self.blksize;
        if self.spare.len() < blksize {
            self.spare
                .try_reserve_exact(blksize - self.spare.len())
                .map_err(|_| Error::OutOfMemory)?;
            self.spare.resize(blksize, 0);
        }

        let n = match self.source.read_block(blkno, &mut self.spare[..blksize])? {
            BlockRead::Pending => {
                trace!("source block {blkno} pending");
                return Ok(None);
            }
            BlockRead::Ready(n) if n > blksize => {
                return Err(Error::internal(format!(
                    "source returned {n} bytes for a {blksize}-byte block"
                )));
            }
            BlockRead::Ready(n) => n,
        };
        self.note_block(blkno, n)?;
        self.stats.misses += 1;

        let block = &mut self.blocks[slot];
        std::mem::swap(&mut block.data, &mut self.spare);
        block.len = n;
        if let Some(old) = block.blkno.replace(blkno) {
            self.stats.evictions += 1;
            trace!("evicted source block {old} from slot {slot} for {blkno}");
        }
        self.order.move_to_back(self.handles[slot]);
        if !self.source.can_seek() {
            self.next_sequential = blkno + 1;
        }
        Ok(Some(slot))
    }

    /// Track the final block and reject short reads of interior blocks.
    fn note_block(&mut self, blkno: u64, n: usize) -> Result<()> {
        if self.eof_known {
            let expected = self.bytes_on_block(blkno);
            if n != expected {
                return Err(Error::invalid(format!(
                    "source block {blkno} has {n} bytes, expected {expected}"
                )));
            }
            return Ok(());
        }
        if n < self.blksize {
            if blkno < self.max_blkno {
                return Err(Error::invalid(format!(
                    "short read on interior source block {blkno}"
                )));
            }
            self.eof_known = true;
            self.max_blkno = blkno;
            self.onlastblk = n;
            debug!(
                "source length known: {} bytes",
                (blkno << self.shift) + n as u64
            );
        } else if blkno > self.max_blkno {
            self.max_blkno = blkno;
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
