// Window-level VCDIFF emission.
//
// `WindowEncoder` turns a sequence of RUN/ADD/COPY instructions into the
// three window sections, packing adjacent instructions into double opcodes
// where the default code table allows it. Encoded windows are written into a
// `PageChain`: a queue of fixed-size output pages drawn from a `PageArena`
// with a free list, drained page by page by the session.

use std::collections::VecDeque;

use super::address_cache::AddressCache;
use super::code_table::{self, InstKind};
use super::header::{FileHeader, WindowHeader};
use super::varint;

/// Size of one output page.
pub const PAGE_SIZE: usize = 16 * 1024;

// ---------------------------------------------------------------------------
// Output pages
// ---------------------------------------------------------------------------

/// Index of a page in a [`PageArena`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PageId(u32);

/// Owner of every output page; released pages are recycled.
#[derive(Debug, Default)]
pub struct PageArena {
    pages: Vec<Vec<u8>>,
    free: Vec<PageId>,
}

impl PageArena {
    pub fn new() -> Self {
        Self::default()
    }

    fn alloc(&mut self) -> PageId {
        if let Some(id) = self.free.pop() {
            return id;
        }
        let id = PageId(self.pages.len() as u32);
        self.pages.push(Vec::with_capacity(PAGE_SIZE));
        id
    }

    fn release(&mut self, id: PageId) {
        if let Some(page) = self.pages.get_mut(id.0 as usize) {
            page.clear();
            self.free.push(id);
        }
    }

    fn page(&self, id: PageId) -> &[u8] {
        self.pages.get(id.0 as usize).map_or(&[], Vec::as_slice)
    }

    /// Pages ever allocated.
    pub fn allocated(&self) -> usize {
        self.pages.len()
    }

    /// Pages currently on the free list.
    pub fn free_count(&self) -> usize {
        self.free.len()
    }
}

/// An ordered chain of filled output pages.
#[derive(Debug, Default)]
pub struct PageChain {
    pages: VecDeque<PageId>,
    len: usize,
}

impl PageChain {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append bytes, filling the tail page before allocating another.
    pub fn write(&mut self, arena: &mut PageArena, mut bytes: &[u8]) {
        while !bytes.is_empty() {
            let tail = match self.pages.back() {
                Some(&id) if arena.page(id).len() < PAGE_SIZE => id,
                _ => {
                    let id = arena.alloc();
                    self.pages.push_back(id);
                    id
                }
            };
            let page = &mut arena.pages[tail.0 as usize];
            let n = (PAGE_SIZE - page.len()).min(bytes.len());
            page.extend_from_slice(&bytes[..n]);
            self.len += n;
            bytes = &bytes[n..];
        }
    }

    /// The first page still waiting to be drained.
    pub fn front<'a>(&self, arena: &'a PageArena) -> Option<&'a [u8]> {
        self.pages.front().map(|&id| arena.page(id))
    }

    /// Return the first page to the arena.
    pub fn consume_front(&mut self, arena: &mut PageArena) {
        if let Some(id) = self.pages.pop_front() {
            self.len -= arena.page(id).len();
            arena.release(id);
        }
    }

    /// Release every page.
    pub fn clear(&mut self, arena: &mut PageArena) {
        while !self.pages.is_empty() {
            self.consume_front(arena);
        }
    }

    pub fn page_count(&self) -> usize {
        self.pages.len()
    }

    /// Bytes held across all pages.
    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }
}

// ---------------------------------------------------------------------------
// Window encoder
// ---------------------------------------------------------------------------

/// Instruction totals for one window.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct InstCounts {
    pub adds: u64,
    pub add_bytes: u64,
    pub runs: u64,
    pub run_bytes: u64,
    pub copies: u64,
    pub copy_bytes: u64,
}

#[derive(Debug, Clone, Copy)]
struct Pending {
    kind: InstKind,
    size: u32,
    opcode: u8,
}

/// Accumulates the DATA, INST and ADDR sections of one window.
#[derive(Debug, Default)]
pub struct WindowEncoder {
    data: Vec<u8>,
    inst: Vec<u8>,
    addr: Vec<u8>,
    acache: AddressCache,
    /// Last instruction, held back in case the next one pairs with it.
    pending: Option<Pending>,
    counts: InstCounts,
}

/// Raw sections of a finished window.
#[derive(Debug, Default)]
pub struct WindowSections {
    pub data: Vec<u8>,
    pub inst: Vec<u8>,
    pub addr: Vec<u8>,
    pub counts: InstCounts,
}

impl WindowEncoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Clear all per-window state, including the address cache.
    pub fn reset(&mut self) {
        self.data.clear();
        self.inst.clear();
        self.addr.clear();
        self.acache.reset();
        self.pending = None;
        self.counts = InstCounts::default();
    }

    pub fn counts(&self) -> InstCounts {
        self.counts
    }

    /// Literal bytes.
    pub fn add(&mut self, bytes: &[u8]) {
        if bytes.is_empty() {
            return;
        }
        self.data.extend_from_slice(bytes);
        self.counts.adds += 1;
        self.counts.add_bytes += bytes.len() as u64;
        self.emit(InstKind::Add, bytes.len() as u32);
    }

    /// `byte` repeated `len` times.
    pub fn run(&mut self, len: u32, byte: u8) {
        if len == 0 {
            return;
        }
        self.data.push(byte);
        self.counts.runs += 1;
        self.counts.run_bytes += u64::from(len);
        self.emit(InstKind::Run, len);
    }

    /// A copy of `len` bytes from `addr`, written at combined position `here`.
    /// `addr < here` must hold.
    pub fn copy(&mut self, len: u32, addr: u64, here: u64) {
        if len == 0 {
            return;
        }
        let mode = self.acache.encode(addr, here, &mut self.addr);
        self.counts.copies += 1;
        self.counts.copy_bytes += u64::from(len);
        self.emit(InstKind::Copy(mode), len);
    }

    fn emit(&mut self, kind: InstKind, size: u32) {
        let prev = self.pending.map(|p| (p.kind, p.size));
        let (opcode, double) = code_table::choose_opcode(prev, kind, size);
        match double {
            Some(code) => {
                // Both halves have table sizes, so no size bytes follow.
                self.pending = None;
                self.inst.push(code);
            }
            None => {
                self.flush_pending();
                self.pending = Some(Pending { kind, size, opcode });
            }
        }
    }

    fn flush_pending(&mut self) {
        if let Some(p) = self.pending.take() {
            self.inst.push(p.opcode);
            if code_table::default_code_table()[p.opcode as usize][0].size == 0 {
                varint::push_u64(&mut self.inst, u64::from(p.size));
            }
        }
    }

    /// Write out the held instruction and hand over the sections. The
    /// encoder is left empty for the next window.
    pub fn finish(&mut self) -> WindowSections {
        self.flush_pending();
        let sections = WindowSections {
            data: std::mem::take(&mut self.data),
            inst: std::mem::take(&mut self.inst),
            addr: std::mem::take(&mut self.addr),
            counts: self.counts,
        };
        self.reset();
        sections
    }
}

/// Serialize a file header into the chain.
pub fn write_file_header(chain: &mut PageChain, arena: &mut PageArena, hdr: &FileHeader) {
    let mut buf = Vec::with_capacity(16);
    hdr.encode(&mut buf);
    chain.write(arena, &buf);
}

/// Serialize a window into the chain. The header's section lengths and
/// `enc_len` are filled in from `sections`.
pub fn write_window(
    chain: &mut PageChain,
    arena: &mut PageArena,
    header: &mut WindowHeader,
    sections: &WindowSections,
) {
    header.data_len = sections.data.len() as u64;
    header.inst_len = sections.inst.len() as u64;
    header.addr_len = sections.addr.len() as u64;
    header.finalize();
    let mut buf = Vec::with_capacity(32);
    header.encode(&mut buf);
    chain.write(arena, &buf);
    chain.write(arena, &sections.data);
    chain.write(arena, &sections.inst);
    chain.write(arena, &sections.addr);
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::vcdiff::header::WindowFlags;

    #[test]
    fn add_then_copy_packs_double() {
        let mut we = WindowEncoder::new();
        we.add(b"X");
        // SELF mode, addr 0.
        we.copy(4, 0, 1025);
        let s = we.finish();
        assert_eq!(s.data, b"X");
        assert_eq!(s.inst, vec![163]);
        assert_eq!(s.addr, vec![0]);
        assert_eq!(s.counts.adds, 1);
        assert_eq!(s.counts.copies, 1);
    }

    #[test]
    fn copy_then_single_add_packs_double() {
        let mut we = WindowEncoder::new();
        we.copy(4, 2, 10);
        we.add(b"Z");
        let s = we.finish();
        assert_eq!(s.inst, vec![247]);
    }

    #[test]
    fn large_sizes_follow_opcode() {
        let mut we = WindowEncoder::new();
        we.run(300, 0x41);
        we.add(&[1u8; 20]);
        let s = we.finish();
        // RUN opcode 0 with varint 300, ADD opcode 1 with size 20.
        assert_eq!(s.inst, vec![0, 0x82, 0x2C, 1, 20]);
        assert_eq!(s.data.len(), 21);
    }

    #[test]
    fn finish_resets_state() {
        let mut we = WindowEncoder::new();
        we.add(b"abc");
        let _ = we.finish();
        assert_eq!(we.counts(), InstCounts::default());
        let s = we.finish();
        assert!(s.inst.is_empty() && s.data.is_empty());
    }

    #[test]
    fn pages_fill_and_recycle() {
        let mut arena = PageArena::new();
        let mut chain = PageChain::new();
        chain.write(&mut arena, &vec![7u8; PAGE_SIZE + 10]);
        assert_eq!(chain.page_count(), 2);
        assert_eq!(chain.len(), PAGE_SIZE + 10);
        assert_eq!(chain.front(&arena).map(<[u8]>::len), Some(PAGE_SIZE));
        chain.consume_front(&mut arena);
        assert_eq!(chain.front(&arena).map(<[u8]>::len), Some(10));
        chain.clear(&mut arena);
        assert!(chain.is_empty());
        assert_eq!(arena.free_count(), 2);
        chain.write(&mut arena, b"again");
        assert_eq!(arena.allocated(), 2);
    }

    #[test]
    fn window_bytes_follow_header() {
        let mut arena = PageArena::new();
        let mut chain = PageChain::new();
        let mut we = WindowEncoder::new();
        we.add(b"hello");
        let sections = we.finish();
        let mut hdr = WindowHeader {
            flags: WindowFlags::empty(),
            target_len: 5,
            ..Default::default()
        };
        write_window(&mut chain, &mut arena, &mut hdr, &sections);
        let bytes = chain.front(&arena).unwrap().to_vec();
        // win_ind, enc_len, tgt_len, del_ind, 3 lengths, data, inst.
        assert_eq!(bytes, vec![0, 11, 5, 0, 5, 1, 0, b'h', b'e', b'l', b'l', b'o', 6]);
    }
}
