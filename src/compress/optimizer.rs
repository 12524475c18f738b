// Instruction optimizer.
//
// The matcher proposes RUN and COPY candidates in target order, often
// overlapping one another because of lazy matching. They wait in a bounded
// queue until the queue fills up or the window ends. Before leaving the
// queue, overlapping neighbours are resolved: a candidate made redundant
// by its successors is dropped, short overlaps keep the longer of the two,
// and long overlaps are split at a point that keeps both pieces useful.
//
// The queue also owns the source-window decision: the first COPY to leave
// the queue fixes the span of source bytes the window may reference.

use log::{debug, trace};

use crate::arena::{Handle, OrderedPool};
use crate::error::{Error, Result};
use crate::hash::config::{MAX_MATCH_SPLIT, MIN_MATCH};

/// Overlap distances at or below this keep only the longer candidate.
const MIN_SPLIT_OFFSET: usize = 2;

/// Combined span below which splitting is never attempted.
const MIN_SPLIT_GAP: usize = 8;

// ---------------------------------------------------------------------------
// Candidates
// ---------------------------------------------------------------------------

/// What a candidate reproduces.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CandidateKind {
    /// A repeated byte.
    Run(u8),
    /// Bytes copied from `addr`: an absolute source offset when `source`,
    /// otherwise a position earlier in the target window.
    Copy { addr: u64, source: bool },
}

/// A proposed instruction covering `size` target bytes from `pos`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Candidate {
    pub kind: CandidateKind,
    pub pos: usize,
    pub size: usize,
}

impl Candidate {
    pub fn run(pos: usize, size: usize, byte: u8) -> Self {
        Self {
            kind: CandidateKind::Run(byte),
            pos,
            size,
        }
    }

    pub fn copy(pos: usize, size: usize, addr: u64, source: bool) -> Self {
        Self {
            kind: CandidateKind::Copy { addr, source },
            pos,
            size,
        }
    }

    /// One past the last target byte covered.
    #[inline]
    pub fn end(&self) -> usize {
        self.pos + self.size
    }

    /// Drop whatever lies before target offset `done`. Returns false when
    /// fewer than `MIN_MATCH` bytes would remain.
    pub fn clip_front(&mut self, done: usize) -> bool {
        if self.pos >= done {
            return true;
        }
        if self.end() < done + MIN_MATCH {
            return false;
        }
        self.advance(done - self.pos);
        true
    }

    /// Drop `n` bytes from the front, keeping the copy address in step.
    fn advance(&mut self, n: usize) {
        self.pos += n;
        self.size -= n;
        if let CandidateKind::Copy { addr, .. } = &mut self.kind {
            *addr += n as u64;
        }
    }
}

// ---------------------------------------------------------------------------
// Source window
// ---------------------------------------------------------------------------

/// The span of source bytes one target window may copy from.
///
/// Matches widen `[min_addr, max_addr)` while the window is undecided.
/// `decide` then fixes `base` and `len` for the rest of the window.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SourceWindow {
    pub decided: bool,
    pub base: u64,
    pub len: u64,
    pub min_addr: u64,
    pub max_addr: u64,
}

impl SourceWindow {
    /// Forget the decision and the matched range. Called between windows.
    pub fn reset(&mut self) {
        *self = Self::default();
    }

    /// Widen the matched range to include `[addr, addr + len)`.
    pub fn note_match(&mut self, addr: u64, len: u64) {
        if self.max_addr == 0 || addr < self.min_addr {
            self.min_addr = addr;
        }
        self.max_addr = self.max_addr.max(addr + len);
    }

    /// Whether a source copy of `[addr, addr + len)` lies inside the
    /// decided window.
    pub fn contains(&self, addr: u64, len: u64) -> bool {
        addr >= self.base && addr + len <= self.base + self.len
    }

    /// Fix the window.
    ///
    /// At the end of a window the exact matched range is used. Earlier,
    /// more matches may still arrive, so the window is padded to a quarter
    /// more than the target window and clamped to the end of the source.
    pub fn decide(&mut self, window_done: bool, avail: usize, source_len: Option<u64>) {
        self.decided = true;
        if window_done && self.max_addr == 0 {
            self.base = 0;
            self.len = 0;
        } else {
            let matched = self.max_addr - self.min_addr;
            self.base = self.min_addr;
            if window_done {
                self.len = matched;
            } else {
                let padded = avail as u64 + avail as u64 / 4;
                self.len = matched.max(padded);
                if let Some(eof) = source_len {
                    self.len = self.len.min(eof.saturating_sub(self.base));
                }
            }
        }
        debug!(
            "source window decided: base {} len {} ({})",
            self.base,
            self.len,
            if window_done { "exact" } else { "early" }
        );
    }
}

// ---------------------------------------------------------------------------
// Optimizer queue
// ---------------------------------------------------------------------------

/// Bounded queue of pending candidates, ordered by target position.
#[derive(Debug, Clone)]
pub struct InstructionOptimizer {
    queue: OrderedPool<Candidate>,
}

impl InstructionOptimizer {
    pub fn new(capacity: usize) -> Self {
        Self {
            queue: OrderedPool::with_capacity(capacity.max(4)),
        }
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.queue.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }

    #[inline]
    pub fn is_full(&self) -> bool {
        self.queue.is_full()
    }

    pub fn capacity(&self) -> usize {
        self.queue.capacity()
    }

    pub fn clear(&mut self) {
        self.queue.clear();
    }

    /// Queued candidates, front to back.
    pub fn iter(&self) -> impl Iterator<Item = &Candidate> + '_ {
        self.queue.iter()
    }

    /// Queue a candidate. The caller must make room first when full.
    pub fn push(&mut self, cand: Candidate) -> Result<()> {
        self.queue
            .push_back(cand)
            .map(|_| ())
            .map_err(|_| Error::internal("instruction queue overflow"))
    }

    /// Drop queued candidates that start at or after `pos`. Used when a
    /// match is extended backward over them.
    pub fn erase(&mut self, pos: usize) {
        while let Some(h) = self.queue.back() {
            match self.queue.get(h) {
                Some(c) if c.pos >= pos => {
                    self.queue.remove(h);
                }
                _ => break,
            }
        }
    }

    /// End of the last queued candidate, or 0 if none.
    pub fn last_matched(&self) -> usize {
        self.queue
            .back()
            .and_then(|h| self.queue.get(h))
            .map_or(0, Candidate::end)
    }

    /// Resolve overlaps, then hand candidates to `emit` in order.
    ///
    /// A forced flush empties the queue. Otherwise it stops after half the
    /// capacity, or when fewer than three candidates remain, since the
    /// tail has not yet been compared against later arrivals.
    pub fn flush<F>(&mut self, force: bool, mut emit: F) -> Result<()>
    where
        F: FnMut(Candidate) -> Result<()>,
    {
        self.resolve_overlaps(force);

        let limit = self.queue.capacity() / 2;
        let mut flushed = 0usize;
        while let Some(cand) = self.queue.pop_front() {
            emit(cand)?;
            if !force {
                flushed += 1;
                if flushed > limit || self.queue.len() < 3 {
                    break;
                }
            }
        }
        trace!(
            "optimizer flush (force {force}): {flushed} emitted, {} queued",
            self.queue.len()
        );
        Ok(())
    }

    fn cand(&self, h: Handle) -> Result<Candidate> {
        self.queue
            .get(h)
            .copied()
            .ok_or_else(|| Error::internal("stale optimizer handle"))
    }

    fn resolve_overlaps(&mut self, force: bool) {
        let Some(mut r1) = self.queue.front() else {
            return;
        };
        // Every handle reached below is live, so `cand` cannot fail.
        while let Some(r2) = self.queue.next(r1) {
            let (Ok(c1), Ok(c2)) = (self.cand(r1), self.cand(r2)) else {
                return;
            };
            let r1end = c1.end();

            if r1end <= c2.pos {
                r1 = r2;
                continue;
            }

            match self.queue.next(r2) {
                Some(r3) => {
                    if let Ok(c3) = self.cand(r3) {
                        if c3.pos <= r1end + 1 {
                            self.queue.remove(r2);
                            continue;
                        }
                    }
                }
                None if !force => break,
                None => {}
            }

            let r2end = c2.end();
            let r2off = c2.pos - c1.pos;
            let r2moff = r2end.saturating_sub(r1end);
            let gap = r2end - c1.pos;

            if gap < MIN_SPLIT_GAP || r2moff <= MIN_SPLIT_OFFSET || r2off <= MIN_SPLIT_OFFSET {
                if c1.size < c2.size {
                    self.queue.remove(r1);
                    r1 = r2;
                } else {
                    let next = self.queue.next(r2);
                    self.queue.remove(r2);
                    match next {
                        Some(n) => r1 = n,
                        None => break,
                    }
                }
                continue;
            }

            let newsize = MAX_MATCH_SPLIT.min(gap - gap / 2);
            let (mut n1, mut n2) = (c1, c2);
            let adjust = if newsize > n1.size {
                r1end - n2.pos
            } else if newsize > n2.size {
                n1.size -= r1end - n2.pos;
                0
            } else {
                let mut cut = n1.size - newsize;
                if n2.pos > r1end - cut {
                    cut -= n2.pos - (r1end - cut);
                }
                n1.size -= cut;
                n1.end() - n2.pos
            };
            n2.advance(adjust);
            debug_assert!(n1.size >= MIN_MATCH && n2.size >= MIN_MATCH);

            if let Some(slot) = self.queue.get_mut(r1) {
                *slot = n1;
            }
            if let Some(slot) = self.queue.get_mut(r2) {
                *slot = n2;
            }
            r1 = r2;
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    fn drain(opt: &mut InstructionOptimizer, force: bool) -> Vec<Candidate> {
        let mut out = Vec::new();
        opt.flush(force, |c| {
            out.push(c);
            Ok(())
        })
        .unwrap();
        out
    }

    #[test]
    fn disjoint_candidates_pass_through() {
        let mut opt = InstructionOptimizer::new(16);
        opt.push(Candidate::run(0, 10, b'a')).unwrap();
        opt.push(Candidate::copy(20, 8, 0, false)).unwrap();
        assert_eq!(opt.last_matched(), 28);
        let out = drain(&mut opt, true);
        assert_eq!(out.len(), 2);
        assert_eq!(out[1].pos, 20);
        assert!(opt.is_empty());
        assert_eq!(opt.last_matched(), 0);
    }

    #[test]
    fn short_overlap_keeps_longer() {
        let mut opt = InstructionOptimizer::new(16);
        opt.push(Candidate::copy(0, 5, 100, true)).unwrap();
        opt.push(Candidate::copy(1, 12, 300, true)).unwrap();
        let out = drain(&mut opt, true);
        assert_eq!(out, [Candidate::copy(1, 12, 300, true)]);

        opt.push(Candidate::copy(0, 20, 100, true)).unwrap();
        opt.push(Candidate::copy(10, 11, 300, true)).unwrap();
        let out = drain(&mut opt, true);
        assert_eq!(out, [Candidate::copy(0, 20, 100, true)]);
    }

    #[test]
    fn third_candidate_makes_middle_redundant() {
        let mut opt = InstructionOptimizer::new(16);
        opt.push(Candidate::copy(0, 10, 0, true)).unwrap();
        opt.push(Candidate::copy(5, 10, 50, true)).unwrap();
        opt.push(Candidate::copy(11, 10, 90, true)).unwrap();
        let out = drain(&mut opt, true);
        assert_eq!(out.len(), 2);
        assert_eq!(out[0].pos, 0);
        assert_eq!(out[1].pos, 11);
    }

    #[test]
    fn long_overlap_is_split() {
        let mut opt = InstructionOptimizer::new(16);
        opt.push(Candidate::copy(0, 30, 1000, true)).unwrap();
        opt.push(Candidate::copy(10, 30, 5000, true)).unwrap();
        let out = drain(&mut opt, true);
        assert_eq!(out.len(), 2);
        let (a, b) = (out[0], out[1]);
        assert_eq!(a.end(), b.pos);
        assert_eq!(b.end(), 40);
        assert!(a.size >= MIN_MATCH && b.size >= MIN_MATCH);
        assert_eq!(a.size, MAX_MATCH_SPLIT);
        assert_eq!(
            b.kind,
            CandidateKind::Copy {
                addr: 5000 + (b.pos as u64 - 10),
                source: true
            }
        );
    }

    #[test]
    fn clip_front_keeps_address_in_step() {
        let mut c = Candidate::copy(100, 20, 1000, true);
        assert!(c.clip_front(90));
        assert_eq!(c, Candidate::copy(100, 20, 1000, true));
        assert!(c.clip_front(110));
        assert_eq!(c, Candidate::copy(110, 10, 1010, true));
        assert!(!c.clip_front(117));

        let mut r = Candidate::run(0, 12, b'x');
        assert!(r.clip_front(8));
        assert_eq!(r, Candidate::run(8, 4, b'x'));
    }

    #[test]
    fn partial_flush_tail_is_clipped_by_consumer() {
        // B and C are redundant, A and D stay unresolved as the last pair.
        let mut opt = InstructionOptimizer::new(4);
        for pos in [0, 5, 10, 15] {
            opt.push(Candidate::copy(pos, 20, pos as u64, false)).unwrap();
        }
        let mut done = 0;
        let mut emitted = Vec::new();
        let mut consume = |mut c: Candidate| -> Result<()> {
            if c.clip_front(done) {
                done = c.end();
                emitted.push((c.pos, c.size));
            }
            Ok(())
        };
        opt.flush(false, &mut consume).unwrap();
        opt.flush(true, &mut consume).unwrap();
        assert_eq!(emitted, vec![(0, 20), (20, 15)]);
    }

    #[test]
    fn erase_drops_tail() {
        let mut opt = InstructionOptimizer::new(16);
        for pos in [0, 10, 20, 30] {
            opt.push(Candidate::copy(pos, 5, 0, false)).unwrap();
        }
        opt.erase(20);
        assert_eq!(opt.len(), 2);
        assert_eq!(opt.last_matched(), 15);
    }

    #[test]
    fn partial_flush_leaves_tail() {
        let mut opt = InstructionOptimizer::new(8);
        for i in 0..8 {
            opt.push(Candidate::copy(i * 10, 5, 0, false)).unwrap();
        }
        assert!(opt.is_full());
        assert!(opt.push(Candidate::run(100, 9, 0)).is_err());
        let out = drain(&mut opt, false);
        assert!(!out.is_empty());
        assert!(opt.len() >= 3);
        assert!(out.windows(2).all(|w| w[0].pos < w[1].pos));
    }

    #[test]
    fn source_window_decisions() {
        let mut w = SourceWindow::default();
        w.note_match(400, 100);
        w.note_match(100, 50);
        assert_eq!((w.min_addr, w.max_addr), (100, 500));
        w.decide(true, 1000, Some(10_000));
        assert_eq!((w.base, w.len), (100, 400));
        assert!(w.contains(100, 400));
        assert!(!w.contains(99, 2));

        let mut w = SourceWindow::default();
        w.note_match(0, 10);
        w.decide(false, 1000, Some(600));
        assert_eq!((w.base, w.len), (0, 600));

        let mut w = SourceWindow::default();
        w.decide(true, 1000, None);
        assert_eq!(w.len, 0);
    }
}
