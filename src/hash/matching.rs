// String matcher.
//
// Walks a target window one position at a time, trying in order of cost:
//   1. a run of one repeated byte
//   2. a source match found through the large (Rabin-Karp) table and
//      extended backward and forward across source blocks
//   3. a self-match found through the small table and its chain
//
// Lazy evaluation: a short match raises `min_match` and the search steps
// one byte further, so a longer overlapping match can supersede it in the
// optimizer. `min_match` then decays back to `MIN_MATCH`.
//
// Source extension is reentrant. When a block is not available the
// matcher returns the block number and keeps its place in `MatchState`;
// calling `search` again after the block has been supplied picks the
// extension up where it stopped.

use log::{debug, trace};

use super::config::{MIN_MATCH, MIN_RUN, MatcherConfig};
use super::rolling::{self, LargeHash, backward_match, comprun, forward_match, small_cksum};
use super::table::{LargeTable, SmallTable};
use crate::compress::optimizer::{Candidate, SourceWindow};
use crate::error::{Error, Result};
use crate::source::{BlockSource, Fetch, SourceBlockCache};

/// Lazy matching keeps a held match only if the next is at least this much longer.
const LEAST_MATCH_INCR: usize = 0;

/// Receiver of matcher output: the instruction optimizer plus the
/// per-window bookkeeping the matcher consults.
pub trait MatchSink {
    /// Queue a candidate, making room first if the queue is full.
    fn push(&mut self, cand: Candidate) -> Result<()>;

    /// Drop queued candidates starting at or after `pos`.
    fn erase(&mut self, pos: usize);

    /// End of the last queued candidate.
    fn last_matched(&self) -> usize;

    /// First target byte not yet handed to the window encoder.
    fn unencoded_offset(&self) -> usize;

    fn source_window(&mut self) -> &mut SourceWindow;
}

/// Where an interrupted search resumes.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum MatchState {
    /// Continue a source match that reached the end of the previous
    /// window, starting at `match_srcpos`.
    #[default]
    Target,
    /// Extend the current source match backward, then forward.
    Backward,
    /// Extend the current source match forward.
    Forward,
    /// Plain search.
    Searching,
}

/// Per-session matching state.
#[derive(Debug)]
pub struct StringMatcher {
    cfg: MatcherConfig,
    window_size: usize,
    sprevsz: usize,
    small: Option<SmallTable>,
    large: Option<LargeTable>,
    large_hash: LargeHash,

    /// Cursor in the current window.
    pos: usize,
    min_match: usize,
    total_in: u64,

    state: MatchState,
    match_srcpos: u64,
    match_last_srcpos: u64,
    match_back: usize,
    match_fwd: usize,
    match_maxback: usize,
    match_maxfwd: usize,

    /// Highest source offset covered by any match, across windows.
    max_src_addr: u64,
    /// Source offset indexed so far.
    cksum_pos: u64,
}

impl StringMatcher {
    pub fn new(cfg: MatcherConfig, window_size: usize, sprevsz: usize) -> Self {
        Self {
            cfg,
            window_size,
            sprevsz,
            small: None,
            large: None,
            large_hash: LargeHash::new(cfg.large_look),
            pos: 0,
            min_match: MIN_MATCH,
            total_in: 0,
            state: MatchState::Target,
            match_srcpos: 0,
            match_last_srcpos: 0,
            match_back: 0,
            match_fwd: 0,
            match_maxback: 0,
            match_maxfwd: 0,
            max_src_addr: 0,
            cksum_pos: 0,
        }
    }

    pub fn config(&self) -> &MatcherConfig {
        &self.cfg
    }

    #[inline]
    pub fn state(&self) -> MatchState {
        self.state
    }

    /// Current position in the window.
    #[inline]
    pub fn position(&self) -> usize {
        self.pos
    }

    /// Source bytes indexed so far.
    #[inline]
    pub fn indexed_source(&self) -> u64 {
        self.cksum_pos
    }

    /// Prepare for a new window whose first byte is at absolute offset
    /// `total_in`.
    pub fn start_window(&mut self, total_in: u64) {
        self.total_in = total_in;
        self.pos = 0;
        self.min_match = MIN_MATCH;
        if let Some(small) = &mut self.small {
            small.reset();
        }
    }

    fn small_table(&mut self, avail: usize) -> &mut SmallTable {
        let (window_size, sprevsz, cfg) = (self.window_size, self.sprevsz, self.cfg);
        self.small.get_or_insert_with(|| {
            let slots = window_size.min(avail.max(super::config::MIN_WINSIZE));
            let chain = if cfg.small_chain > 1 || cfg.small_lchain > 1 {
                sprevsz
            } else {
                0
            };
            trace!("small table: {slots} slots, chain {chain}");
            SmallTable::new(slots, chain)
        })
    }

    fn ensure_large<S: BlockSource>(&mut self, src: &SourceBlockCache<S>) {
        if self.large.is_none() {
            let span = src
                .source_len()
                .map_or(src.max_window(), |len| len.min(src.max_window()));
            let slots = (span / self.cfg.large_step as u64).max(1);
            let slots = usize::try_from(slots).unwrap_or(usize::MAX);
            trace!("large table: {slots} slots");
            self.large = Some(LargeTable::new(slots));
        }
    }

    // -----------------------------------------------------------------------
    // Entry point
    // -----------------------------------------------------------------------

    /// Search `input` (the whole current window) from the current position.
    ///
    /// Returns `Ok(None)` once the window has been searched, or
    /// `Ok(Some(blkno))` when source block `blkno` must be supplied first.
    pub fn search<S, K>(
        &mut self,
        input: &[u8],
        mut src: Option<&mut SourceBlockCache<S>>,
        sink: &mut K,
    ) -> Result<Option<u64>>
    where
        S: BlockSource,
        K: MatchSink,
    {
        let avail = input.len();

        if let Some(src) = src.as_deref_mut() {
            if self.state == MatchState::Target {
                if avail > 0 {
                    if self.source_match_setup(self.match_srcpos, avail, src, sink) {
                        self.state = MatchState::Forward;
                    }
                } else {
                    self.state = MatchState::Searching;
                    self.match_fwd = 0;
                }
            }
            if matches!(self.state, MatchState::Backward | MatchState::Forward) && avail > 0 {
                if let Some(blkno) = self.extend_match(input, src, sink)? {
                    return Ok(Some(blkno));
                }
                self.pos += self.match_fwd;
            }
        }

        if avail == 0 {
            return Ok(None);
        }
        self.string_match(input, src, sink)
    }

    // -----------------------------------------------------------------------
    // Main loop
    // -----------------------------------------------------------------------

    fn string_match<S, K>(
        &mut self,
        input: &[u8],
        mut src: Option<&mut SourceBlockCache<S>>,
        sink: &mut K,
    ) -> Result<Option<u64>>
    where
        S: BlockSource,
        K: MatchSink,
    {
        let avail = input.len();
        let slook = self.cfg.small_look;
        let llook = self.cfg.large_look;
        let max_lazy = self.cfg.max_lazy;

        if self.pos + slook > avail {
            return Ok(None);
        }
        self.small_table(avail);
        if let Some(src) = src.as_deref() {
            self.ensure_large(src);
        }

        let mut next_move_point = 0usize;
        let try_lazy = |len: usize, pos: usize| max_lazy > 0 && len < max_lazy && pos + len + 2 <= avail;

        'restart: loop {
            if self.pos + slook > avail {
                return Ok(None);
            }

            let last = sink.last_matched();
            self.min_match = if last > self.pos {
                MIN_MATCH.max(1 + last - self.pos)
            } else {
                MIN_MATCH
            };

            let mut scksum = small_cksum(&input[self.pos..]);
            let (mut run_l, mut run_c) = comprun(&input[self.pos..], slook);
            let mut lcksum = 0u32;

            if let Some(src) = src.as_deref_mut() {
                if self.pos + llook <= avail {
                    if let Some(blkno) = self.move_point(src, &mut next_move_point)? {
                        return Ok(Some(blkno));
                    }
                    lcksum = self.large_hash.checksum(&input[self.pos..]);
                }
            }

            loop {
                let pos = self.pos;
                let mut taken = None;

                if run_l == slook {
                    let max_len = avail - pos;
                    run_l += rolling::run_length(&input[pos + run_l..], run_c, max_len - run_l);
                    if run_l >= self.min_match && run_l >= MIN_RUN {
                        sink.push(Candidate::run(pos, run_l, run_c))?;
                        taken = Some(run_l);
                    }
                }

                if taken.is_none() && pos + llook <= avail {
                    if let Some(src) = src.as_deref_mut() {
                        if pos >= next_move_point {
                            if let Some(blkno) = self.move_point(src, &mut next_move_point)? {
                                return Ok(Some(blkno));
                            }
                        }
                        let hit = self.large.as_ref().and_then(|t| t.lookup(lcksum));
                        if let Some(srcpos) = hit {
                            if self.source_match_setup(srcpos, avail, src, sink) {
                                if let Some(blkno) = self.extend_match(input, src, sink)? {
                                    return Ok(Some(blkno));
                                }
                                if self.match_fwd > 0 {
                                    taken = Some(self.match_fwd);
                                }
                            }
                        }
                    }
                }

                if taken.is_none() {
                    let stored = self.small.as_ref().and_then(|t| t.lookup(scksum));
                    let (len, offset) = match stored {
                        Some(base) => self.small_match(input, base as usize),
                        None => (0, 0),
                    };
                    if let Some(small) = &mut self.small {
                        small.insert(scksum, pos as u64);
                    }
                    if len >= self.min_match {
                        sink.push(Candidate::copy(pos, len, offset as u64, false))?;
                        taken = Some(len);
                    }
                }

                match taken {
                    Some(len) if try_lazy(len, pos) => {
                        self.min_match = len + LEAST_MATCH_INCR;
                    }
                    Some(len) => {
                        self.pos += len;
                        continue 'restart;
                    }
                    None => {
                        if self.min_match > MIN_MATCH {
                            self.min_match -= 1;
                        }
                    }
                }

                if pos + slook == avail {
                    return Ok(None);
                }

                let incoming = input[pos + slook];
                if incoming == run_c {
                    run_l += 1;
                } else {
                    run_c = incoming;
                    run_l = 1;
                }
                scksum = small_cksum(&input[pos + 1..]);
                if src.is_some() && pos + llook < avail {
                    lcksum = self.large_hash.roll(lcksum, input[pos], input[pos + llook]);
                }
                self.pos += 1;
            }
        }
    }

    /// Longest self-match for the current position starting from `base`
    /// and walking the chain. Returns `(length, offset)`.
    fn small_match(&self, input: &[u8], mut base: usize) -> (usize, usize) {
        let pos = self.pos;
        let avail = input.len();
        let Some(small) = &self.small else {
            return (0, 0);
        };
        let mut chain = if self.min_match == MIN_MATCH {
            self.cfg.small_chain
        } else {
            self.cfg.small_lchain
        };

        let mut best = 0usize;
        let mut best_off = 0usize;
        loop {
            if base >= pos {
                break;
            }
            let len = forward_match(&input[base..], &input[pos..], avail - pos);
            if len > best {
                best = len;
                best_off = base;
                if pos + len == avail || len >= self.cfg.long_enough {
                    break;
                }
            }
            chain -= 1;
            if chain == 0 {
                break;
            }
            match small.chain_prev(base as u64, pos as u64) {
                Some(prev) => base = prev as usize,
                None => break,
            }
        }

        // Short copies far back cost more in address bytes than they save.
        let dist = pos - best_off;
        if (best == 4 && dist >= 1 << 14) || (best == 5 && dist >= 1 << 21) {
            return (0, 0);
        }
        (best, best_off)
    }

    // -----------------------------------------------------------------------
    // Source indexing
    // -----------------------------------------------------------------------

    /// Index source blocks up to a target that runs ahead of the input
    /// cursor, and set the position at which to index again.
    fn move_point<S: BlockSource>(
        &mut self,
        src: &mut SourceBlockCache<S>,
        next_move_point: &mut usize,
    ) -> Result<Option<u64>> {
        if src.source_len() == Some(self.cksum_pos) {
            *next_move_point = usize::MAX;
            return Ok(None);
        }
        self.ensure_large(src);

        let blksize = src.blksize() as u64;
        let mask = blksize - 1;
        let half = src.max_window() / 2;
        let absolute = self.total_in + self.pos as u64;

        let mut target = if absolute < half {
            src.max_window()
        } else {
            (absolute + half + blksize * 2) & !mask
        };
        if self.max_src_addr > self.cksum_pos {
            self.cksum_pos = self.max_src_addr;
        }
        target = target.max(self.cksum_pos);

        let llook = self.cfg.large_look;
        let step = self.cfg.large_step;
        while self.cksum_pos < target && src.source_len().is_none_or(|len| self.cksum_pos < len) {
            let (blkno, blkrem) = src.block_span(self.cksum_pos);
            let block = match src.get_block(blkno) {
                Ok(Fetch::Ready(block)) => block,
                Ok(Fetch::Pending(n)) => return Ok(Some(n)),
                Err(e) => return Err(e),
            };

            let onblk = block.len();
            if onblk >= llook {
                let base = blkno * blksize;
                let Some(large) = &mut self.large else {
                    return Err(Error::internal("source table missing"));
                };
                // Indexed back to front so the earliest offsets win.
                let mut blkpos = (onblk - llook) as isize;
                let oldpos = blkrem as isize;
                loop {
                    let off = blkpos as usize;
                    let cksum = self.large_hash.checksum(&block[off..]);
                    large.insert(cksum, base + off as u64);
                    blkpos -= step as isize;
                    if blkpos < oldpos {
                        break;
                    }
                }
                trace!("indexed source block {blkno} ({onblk} bytes)");
            }
            self.cksum_pos = (blkno + 1) * blksize;
        }

        if let Some(len) = src.source_len() {
            if self.cksum_pos >= len {
                self.cksum_pos = len;
                *next_move_point = usize::MAX;
                debug!("source fully indexed ({len} bytes)");
                return Ok(None);
            }
        }

        let ahead = (self.cksum_pos - target) & mask;
        *next_move_point = self.pos.saturating_add((blksize - ahead) as usize);
        Ok(None)
    }

    // -----------------------------------------------------------------------
    // Source matches
    // -----------------------------------------------------------------------

    /// Bound a source match at `srcpos` for the current position. On
    /// success the state becomes `Backward`.
    fn source_match_setup<S, K>(
        &mut self,
        srcpos: u64,
        avail: usize,
        src: &SourceBlockCache<S>,
        sink: &mut K,
    ) -> bool
    where
        S: BlockSource,
        K: MatchSink,
    {
        self.match_maxback = 0;
        self.match_maxfwd = 0;
        self.match_back = 0;
        self.match_fwd = 0;

        let reject = |m: &mut Self| {
            m.state = MatchState::Searching;
            m.match_last_srcpos = srcpos;
            false
        };

        // Re-entering at the same position must not retry the same match.
        if srcpos != 0 && srcpos == self.match_last_srcpos {
            return reject(self);
        }
        if srcpos < self.cksum_pos && self.cksum_pos - srcpos > src.max_window() {
            return reject(self);
        }

        self.match_maxback = self.pos - sink.unencoded_offset().min(self.pos);
        self.match_maxfwd = avail - self.pos;

        let win = *sink.source_window();
        if !win.decided {
            if srcpos < self.match_maxback as u64 {
                self.match_maxback = srcpos as usize;
            }
            if let Some(len) = src.source_len() {
                let srcavail = len.saturating_sub(srcpos);
                if srcavail < self.match_maxfwd as u64 {
                    self.match_maxfwd = srcavail as usize;
                }
            }
        } else {
            if srcpos < win.base || srcpos > win.base + win.len {
                return reject(self);
            }
            let back = srcpos - win.base;
            if back < self.match_maxback as u64 {
                self.match_maxback = back as usize;
            }
            let fwd = win.base + win.len - srcpos;
            if fwd < self.match_maxfwd as u64 {
                self.match_maxfwd = fwd as usize;
            }
        }

        self.state = MatchState::Backward;
        self.match_srcpos = srcpos;
        self.match_last_srcpos = srcpos;
        true
    }

    /// Extend the match set up by `source_match_setup`. Reentrant.
    fn extend_match<S, K>(
        &mut self,
        input: &[u8],
        src: &mut SourceBlockCache<S>,
        sink: &mut K,
    ) -> Result<Option<u64>>
    where
        S: BlockSource,
        K: MatchSink,
    {
        let blksize = src.blksize();
        let mut skip_forward = false;

        if self.state == MatchState::Backward {
            let matchoff = self.match_srcpos - self.match_back as u64;
            let mut streamoff = self.pos - self.match_back;
            let (mut tryblk, mut tryoff) = src.block_span(matchoff);

            while self.match_back < self.match_maxback {
                if tryoff == 0 {
                    tryoff = blksize;
                    tryblk -= 1;
                }
                let block = match src.get_block(tryblk) {
                    Ok(Fetch::Ready(block)) => block,
                    Ok(Fetch::Pending(n)) => return Ok(Some(n)),
                    Err(Error::TooFarBack) => {
                        skip_forward = self.match_back == 0;
                        break;
                    }
                    Err(e) => return Err(e),
                };
                if tryoff > block.len() {
                    break;
                }
                let tryrem = tryoff.min(self.match_maxback - self.match_back);
                let matched = backward_match(&block[..tryoff], &input[..streamoff], tryrem);
                self.match_back += matched;
                tryoff -= matched;
                streamoff -= matched;
                if matched < tryrem {
                    break;
                }
            }
            self.state = MatchState::Forward;
        }

        if !skip_forward {
            let matchoff = self.match_srcpos + self.match_fwd as u64;
            let mut streamoff = self.pos + self.match_fwd;
            let (mut tryblk, mut tryoff) = src.block_span(matchoff);

            while self.match_fwd < self.match_maxfwd {
                if tryoff == blksize {
                    tryoff = 0;
                    tryblk += 1;
                }
                let block = match src.get_block(tryblk) {
                    Ok(Fetch::Ready(block)) => block,
                    Ok(Fetch::Pending(n)) => return Ok(Some(n)),
                    Err(Error::TooFarBack) => break,
                    Err(e) => return Err(e),
                };
                let tryrem = (self.match_maxfwd - self.match_fwd).min(block.len().saturating_sub(tryoff));
                if tryrem == 0 {
                    break;
                }
                let matched = forward_match(&block[tryoff..], &input[streamoff..], tryrem);
                tryoff += matched;
                streamoff += matched;
                self.match_fwd += matched;
                if matched != tryrem {
                    break;
                }
            }
        }

        self.finish_source_match(input.len(), sink)?;
        Ok(None)
    }

    fn finish_source_match<K: MatchSink>(&mut self, avail: usize, sink: &mut K) -> Result<()> {
        self.state = MatchState::Searching;
        if self.match_fwd < self.min_match {
            self.match_fwd = 0;
            return Ok(());
        }

        let target_pos = self.pos - self.match_back;
        let len = self.match_back + self.match_fwd;
        let match_pos = self.match_srcpos - self.match_back as u64;
        let match_end = self.match_srcpos + self.match_fwd as u64;

        if self.match_back > 0 {
            sink.erase(target_pos);
        }
        self.match_back = 0;

        sink.source_window().note_match(match_pos, len as u64);
        self.max_src_addr = self.max_src_addr.max(match_end);

        trace!(
            "source match: target {}..{} source {match_pos}..{match_end}",
            self.total_in + target_pos as u64,
            self.total_in + (target_pos + len) as u64
        );
        sink.push(Candidate::copy(target_pos, len, match_pos, true))?;

        if target_pos + len == avail {
            self.state = MatchState::Target;
            self.match_srcpos = match_end;
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
