// Resumable VCDIFF decoder.
//
// `Decoder::decode` is handed whatever input is available and returns how
// much of it was consumed together with a `Status`. The next call must be
// given the unconsumed remainder followed by any new bytes. Every header
// field, including a varint cut in the middle, survives the gap between
// calls.
//
// A window's three sections are borrowed straight from the input when the
// whole run of them is present in one delivery: they stay unconsumed until
// the window has been emitted, so a suspended window still finds them at
// the front of the next delivery. Sections that arrive in pieces are
// gathered into owned buffers instead.
//
// Instruction execution can suspend on a source block that is not
// resident. The half-finished COPY is kept in `CopyProgress` and carried
// on from the same byte once the block has been supplied.

use std::sync::Arc;

use log::{debug, trace};

use super::address_cache::AddressCache;
use super::code_table::{self, HalfInst, InstKind};
use super::header::{
    self, DeltaFlags, FileHeader, HARD_MAX_WINSIZE, HeaderFlags, WindowFlags, WindowHeader,
};
use super::varint::{SliceReader, VarintDecoder, Width};
use crate::compress::secondary::{self, CompressBackend};
use crate::error::{Error, Result, Status};
use crate::source::{BlockSource, CacheConfig, CacheStats, Fetch, MemorySource, SourceBlockCache};

// ---------------------------------------------------------------------------
// Configuration and statistics
// ---------------------------------------------------------------------------

/// Decoder settings.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DecoderConfig {
    /// Largest target window accepted.
    pub max_window_size: u64,
    pub cache: CacheConfig,
    /// Check window Adler-32 values when present.
    pub verify_checksum: bool,
}

impl Default for DecoderConfig {
    fn default() -> Self {
        Self {
            max_window_size: HARD_MAX_WINSIZE,
            cache: CacheConfig::default(),
            verify_checksum: true,
        }
    }
}

impl DecoderConfig {
    pub fn validate(&self) -> Result<()> {
        if self.max_window_size == 0 || self.max_window_size > HARD_MAX_WINSIZE {
            return Err(Error::invalid(format!(
                "max window size {} outside 1..={HARD_MAX_WINSIZE}",
                self.max_window_size
            )));
        }
        Ok(())
    }
}

/// Totals for one decode session.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DecodeStats {
    pub windows: u64,
    pub bytes_in: u64,
    pub bytes_out: u64,
    pub adds: u64,
    pub runs: u64,
    pub copies: u64,
    pub source_copy_bytes: u64,
    pub cache: CacheStats,
}

// ---------------------------------------------------------------------------
// State
// ---------------------------------------------------------------------------

/// Next field or phase the decoder expects.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum DecodeState {
    #[default]
    Magic,
    HdrInd,
    SecondId,
    CodeTable,
    AppLen,
    AppData,
    WinInd,
    CpyLen,
    CpyOff,
    EncLen,
    TgtLen,
    DelInd,
    DataLen,
    InstLen,
    AddrLen,
    Checksum,
    Data,
    Inst,
    Addr,
    Emit,
    Finish,
}

/// Result of one `decode` call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Progress {
    pub status: Status,
    /// Bytes of the given input the decoder is done with.
    pub consumed: usize,
}

#[derive(Debug)]
enum Section {
    /// `len` bytes at `offset` from the start of the borrowed run.
    Borrowed { offset: usize, len: usize },
    Owned(Vec<u8>),
}

impl Default for Section {
    fn default() -> Self {
        Section::Owned(Vec::new())
    }
}

impl Section {
    fn bytes<'a>(&'a self, run: &'a [u8]) -> &'a [u8] {
        match self {
            Section::Borrowed { offset, len } => &run[*offset..*offset + *len],
            Section::Owned(buf) => buf,
        }
    }
}

/// A source COPY that has been started but not completed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct CopyProgress {
    offset: u64,
    remaining: usize,
}

/// Instruction cursor for the current window.
#[derive(Debug, Default)]
struct Exec {
    inst_pos: usize,
    data_pos: usize,
    addr_pos: usize,
    /// Second half of the opcode being executed.
    second: Option<HalfInst>,
    copy: Option<CopyProgress>,
    /// Target position of the next half-instruction.
    tpos: u64,
}

/// Resumable decode session.
pub struct Decoder<S = MemorySource<'static>> {
    config: DecoderConfig,
    state: DecodeState,
    varint: VarintDecoder,

    magic: [u8; 4],
    magic_len: usize,
    header: FileHeader,
    header_done: bool,
    app_len: usize,
    registered: Option<Arc<dyn CompressBackend>>,
    secondary: Option<Arc<dyn CompressBackend>>,

    win: WindowHeader,
    win_active: bool,
    cksum: [u8; 4],
    cksum_len: usize,
    sections: [Section; 3],
    /// Length of the borrowed section run, while one is in use.
    borrowed: Option<usize>,

    exec: Exec,
    acache: AddressCache,
    output: Vec<u8>,
    source: Option<SourceBlockCache<S>>,
    stats: DecodeStats,
}

impl<S: BlockSource> Decoder<S> {
    pub fn new(config: DecoderConfig, source: Option<S>) -> Result<Self> {
        config.validate()?;
        let source = source
            .map(|s| SourceBlockCache::new(s, config.cache))
            .transpose()?;
        Ok(Self {
            config,
            state: DecodeState::Magic,
            varint: VarintDecoder::new(Width::U64),
            magic: [0; 4],
            magic_len: 0,
            header: FileHeader::default(),
            header_done: false,
            app_len: 0,
            registered: None,
            secondary: None,
            win: WindowHeader::default(),
            win_active: false,
            cksum: [0; 4],
            cksum_len: 0,
            sections: Default::default(),
            borrowed: None,
            exec: Exec::default(),
            acache: AddressCache::new(),
            output: Vec::new(),
            source,
            stats: DecodeStats::default(),
        })
    }

    /// Make a secondary compressor available under its ID, including IDs
    /// with no built-in implementation.
    pub fn register_secondary(&mut self, backend: Arc<dyn CompressBackend>) {
        self.registered = Some(backend);
    }

    pub fn state(&self) -> DecodeState {
        self.state
    }

    /// The application header, once `GotHeader` has been returned.
    pub fn app_header(&self) -> Option<&[u8]> {
        if self.header_done {
            self.header.app_header.as_deref()
        } else {
            None
        }
    }

    pub fn file_header(&self) -> Option<&FileHeader> {
        self.header_done.then_some(&self.header)
    }

    /// Header of the window being decoded, from `WindowStart` until the
    /// window finishes.
    pub fn window_header(&self) -> Option<&WindowHeader> {
        self.win_active.then_some(&self.win)
    }

    /// Decoded target bytes of the current window, valid after `Output`.
    pub fn output(&self) -> &[u8] {
        if self.state == DecodeState::Finish {
            &self.output
        } else {
            &[]
        }
    }

    /// True between windows, where the stream may legitimately end.
    pub fn at_window_boundary(&self) -> bool {
        self.header_done && self.state == DecodeState::WinInd
    }

    pub fn source_mut(&mut self) -> Option<&mut S> {
        self.source.as_mut().map(SourceBlockCache::source_mut)
    }

    pub fn stats(&self) -> DecodeStats {
        let mut stats = self.stats;
        if let Some(src) = &self.source {
            stats.cache = src.stats();
        }
        stats
    }

    /// Decode from `input`. See the module docs for the resumption contract.
    pub fn decode(&mut self, input: &[u8]) -> Result<Progress> {
        let mut pos = 0usize;
        let status = self.run(input, &mut pos)?;
        self.stats.bytes_in += pos as u64;
        Ok(Progress {
            status,
            consumed: pos,
        })
    }

    fn run(&mut self, input: &[u8], pos: &mut usize) -> Result<Status> {
        macro_rules! varint {
            () => {
                match self.varint.feed(input, pos)? {
                    Some(v) => v,
                    None => return Ok(Status::NeedMoreInput),
                }
            };
        }
        macro_rules! byte {
            () => {
                match input.get(*pos) {
                    Some(&b) => {
                        *pos += 1;
                        b
                    }
                    None => return Ok(Status::NeedMoreInput),
                }
            };
        }

        loop {
            trace!("decode state {:?} at {}", self.state, *pos);
            match self.state {
                DecodeState::Magic => {
                    while self.magic_len < 4 {
                        self.magic[self.magic_len] = byte!();
                        self.magic_len += 1;
                    }
                    header::check_magic(&self.magic)?;
                    self.state = DecodeState::HdrInd;
                }
                DecodeState::HdrInd => {
                    self.header.flags = HeaderFlags::parse(byte!())?;
                    self.state = DecodeState::SecondId;
                }
                DecodeState::SecondId => {
                    if self.header.flags.contains(HeaderFlags::SECONDARY) {
                        let id = byte!();
                        self.secondary = Some(secondary::backend_for_id(id, self.registered.as_ref())?);
                        self.header.secondary_id = Some(id);
                    }
                    self.state = DecodeState::CodeTable;
                }
                DecodeState::CodeTable => {
                    if self.header.flags.contains(HeaderFlags::CODETABLE) {
                        return Err(Error::Unimplemented("application-defined code tables"));
                    }
                    self.state = DecodeState::AppLen;
                }
                DecodeState::AppLen => {
                    if self.header.flags.contains(HeaderFlags::APPHEADER) {
                        let len = varint!();
                        self.app_len = usize::try_from(len)
                            .map_err(|_| Error::invalid("application header too long"))?;
                        self.header.app_header = Some(Vec::new());
                        self.state = DecodeState::AppData;
                    } else {
                        self.header_done = true;
                        self.state = DecodeState::WinInd;
                        return Ok(Status::GotHeader);
                    }
                }
                DecodeState::AppData => {
                    let app = self.header.app_header.get_or_insert_with(Vec::new);
                    let take = (self.app_len - app.len()).min(input.len() - *pos);
                    app.extend_from_slice(&input[*pos..*pos + take]);
                    *pos += take;
                    if app.len() < self.app_len {
                        return Ok(Status::NeedMoreInput);
                    }
                    debug!("application header: {} bytes", self.app_len);
                    self.header_done = true;
                    self.state = DecodeState::WinInd;
                    return Ok(Status::GotHeader);
                }
                DecodeState::WinInd => {
                    let flags = WindowFlags::parse(byte!())?;
                    self.start_window(flags)?;
                    self.state = if flags.contains(WindowFlags::SOURCE) {
                        DecodeState::CpyLen
                    } else {
                        DecodeState::EncLen
                    };
                }
                DecodeState::CpyLen => {
                    self.win.copy_len = varint!();
                    self.state = DecodeState::CpyOff;
                }
                DecodeState::CpyOff => {
                    self.win.copy_offset = varint!();
                    self.check_copy_window()?;
                    self.state = DecodeState::EncLen;
                }
                DecodeState::EncLen => {
                    self.win.enc_len = varint!();
                    self.state = DecodeState::TgtLen;
                }
                DecodeState::TgtLen => {
                    let len = varint!();
                    if len > self.config.max_window_size {
                        return Err(Error::invalid(format!(
                            "target window of {len} bytes exceeds {}",
                            self.config.max_window_size
                        )));
                    }
                    self.win.target_len = len;
                    self.state = DecodeState::DelInd;
                }
                DecodeState::DelInd => {
                    let flags = DeltaFlags::parse(byte!())?;
                    if !flags.is_empty() && self.secondary.is_none() {
                        return Err(Error::invalid(
                            "compressed sections in a stream without a secondary compressor",
                        ));
                    }
                    self.win.delta_flags = flags;
                    self.state = DecodeState::DataLen;
                }
                DecodeState::DataLen => {
                    self.win.data_len = varint!();
                    self.state = DecodeState::InstLen;
                }
                DecodeState::InstLen => {
                    self.win.inst_len = varint!();
                    self.state = DecodeState::AddrLen;
                }
                DecodeState::AddrLen => {
                    self.win.addr_len = varint!();
                    self.win.check_lengths()?;
                    self.state = DecodeState::Checksum;
                }
                DecodeState::Checksum => {
                    if self.win.has_checksum() {
                        while self.cksum_len < 4 {
                            self.cksum[self.cksum_len] = byte!();
                            self.cksum_len += 1;
                        }
                        self.win.adler32 = Some(u32::from_be_bytes(self.cksum));
                    }
                    self.state = DecodeState::Data;
                    self.try_borrow(input, *pos)?;
                    return Ok(Status::WindowStart);
                }
                DecodeState::Data | DecodeState::Inst | DecodeState::Addr => {
                    if self.borrowed.is_none() && !self.gather(input, pos)? {
                        return Ok(Status::NeedMoreInput);
                    }
                    self.prepare_sections(input, *pos)?;
                    self.state = DecodeState::Emit;
                }
                DecodeState::Emit => {
                    let run: &[u8] = match self.borrowed {
                        Some(len) => input.get(*pos..*pos + len).ok_or_else(|| {
                            Error::invalid("borrowed window sections were not resupplied")
                        })?,
                        None => &[],
                    };
                    if let Some(blkno) = self.execute(run)? {
                        return Ok(Status::NeedSourceBlock(blkno));
                    }
                    self.finish_window()?;
                    if let Some(len) = self.borrowed.take() {
                        *pos += len;
                    }
                    self.state = DecodeState::Finish;
                    return Ok(Status::Output);
                }
                DecodeState::Finish => {
                    self.stats.windows += 1;
                    self.stats.bytes_out += self.output.len() as u64;
                    self.output.clear();
                    self.win_active = false;
                    self.state = DecodeState::WinInd;
                    return Ok(Status::WindowFinish);
                }
            }
        }
    }

    // -----------------------------------------------------------------------
    // Window setup
    // -----------------------------------------------------------------------

    fn start_window(&mut self, flags: WindowFlags) -> Result<()> {
        if flags.contains(WindowFlags::SOURCE) && self.source.is_none() {
            return Err(Error::invalid("window copies from a source but none was given"));
        }
        self.win = WindowHeader {
            flags,
            ..WindowHeader::default()
        };
        self.win_active = true;
        self.cksum_len = 0;
        self.sections = Default::default();
        self.borrowed = None;
        self.exec = Exec::default();
        self.acache.reset();
        self.output.clear();
        Ok(())
    }

    fn check_copy_window(&self) -> Result<()> {
        let end = self
            .win
            .copy_offset
            .checked_add(self.win.copy_len)
            .ok_or_else(|| Error::invalid("source window overflows"))?;
        if let Some(len) = self.source.as_ref().and_then(SourceBlockCache::source_len) {
            if end > len {
                return Err(Error::invalid(format!(
                    "source window {}+{} past end of source ({len})",
                    self.win.copy_offset, self.win.copy_len
                )));
            }
        }
        Ok(())
    }

    fn section_lens(&self) -> Result<[usize; 3]> {
        let conv = |v: u64| usize::try_from(v).map_err(|_| Error::invalid("section too large"));
        Ok([
            conv(self.win.data_len)?,
            conv(self.win.inst_len)?,
            conv(self.win.addr_len)?,
        ])
    }

    /// Borrow all three sections if they are already present in full.
    fn try_borrow(&mut self, input: &[u8], pos: usize) -> Result<()> {
        let [d, i, a] = self.section_lens()?;
        let total = d
            .checked_add(i)
            .and_then(|n| n.checked_add(a))
            .ok_or_else(|| Error::invalid("section lengths overflow"))?;
        if input.len() - pos >= total {
            self.sections = [
                Section::Borrowed { offset: 0, len: d },
                Section::Borrowed { offset: d, len: i },
                Section::Borrowed {
                    offset: d + i,
                    len: a,
                },
            ];
            self.borrowed = Some(total);
        }
        Ok(())
    }

    /// Copy section bytes into owned buffers. True once all are complete.
    fn gather(&mut self, input: &[u8], pos: &mut usize) -> Result<bool> {
        let lens = self.section_lens()?;
        loop {
            let idx = match self.state {
                DecodeState::Data => 0,
                DecodeState::Inst => 1,
                _ => 2,
            };
            let Section::Owned(buf) = &mut self.sections[idx] else {
                return Err(Error::internal("gathering into a borrowed section"));
            };
            let take = (lens[idx] - buf.len()).min(input.len() - *pos);
            buf.extend_from_slice(&input[*pos..*pos + take]);
            *pos += take;
            if buf.len() < lens[idx] {
                return Ok(false);
            }
            self.state = match self.state {
                DecodeState::Data => DecodeState::Inst,
                DecodeState::Inst => DecodeState::Addr,
                _ => return Ok(true),
            };
        }
    }

    /// Undo secondary compression and reset the instruction cursor.
    fn prepare_sections(&mut self, input: &[u8], pos: usize) -> Result<()> {
        let flags = self.win.delta_flags;
        if !flags.is_empty() {
            let Some(backend) = self.secondary.clone() else {
                return Err(Error::invalid("compressed section without a compressor"));
            };
            let run = match self.borrowed {
                Some(len) => input
                    .get(pos..pos + len)
                    .ok_or_else(|| Error::invalid("borrowed window sections were not resupplied"))?,
                None => &[][..],
            };
            let target = usize::try_from(self.win.target_len)
                .map_err(|_| Error::invalid("target window too large"))?;
            // An instruction or address costs at most a few bytes per target byte.
            let limits = [target, target * 2 + 16, target * 2 + 16];
            let bits = [DeltaFlags::DATACOMP, DeltaFlags::INSTCOMP, DeltaFlags::ADDRCOMP];
            for idx in 0..3 {
                if flags.contains(bits[idx]) {
                    let raw = secondary::decode_section(
                        backend.as_ref(),
                        self.sections[idx].bytes(run),
                        limits[idx],
                    )?;
                    self.sections[idx] = Section::Owned(raw);
                }
            }
            trace!("secondary sections decoded: {flags:?}");
        }
        self.exec = Exec::default();
        self.output
            .try_reserve(self.win.target_len as usize)
            .map_err(|_| Error::OutOfMemory)?;
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Instruction execution
    // -----------------------------------------------------------------------

    /// Run instructions until the window is complete or a source block is
    /// missing. `run` holds the borrowed sections, if any.
    fn execute(&mut self, run: &[u8]) -> Result<Option<u64>> {
        let Self {
            sections,
            exec,
            acache,
            output,
            source,
            win,
            stats,
            ..
        } = self;
        let data = sections[0].bytes(run);
        let inst = sections[1].bytes(run);
        let addrs = sections[2].bytes(run);
        let table = code_table::default_code_table();

        loop {
            if let Some(mut copy) = exec.copy.take() {
                let Some(src) = source.as_mut() else {
                    return Err(Error::internal("source copy without a source"));
                };
                while copy.remaining > 0 {
                    let (blkno, off) = src.block_span(copy.offset);
                    let block = match src.get_block(blkno)? {
                        Fetch::Ready(block) => block,
                        Fetch::Pending(n) => {
                            exec.copy = Some(copy);
                            return Ok(Some(n));
                        }
                    };
                    if off >= block.len() {
                        return Err(Error::invalid(format!(
                            "copy reads past the end of the source at {}",
                            copy.offset
                        )));
                    }
                    let n = copy.remaining.min(block.len() - off);
                    output.extend_from_slice(&block[off..off + n]);
                    copy.offset += n as u64;
                    copy.remaining -= n;
                }
            }

            let half = match exec.second.take() {
                Some(half) => half,
                None => {
                    let Some(&op) = inst.get(exec.inst_pos) else {
                        break;
                    };
                    exec.inst_pos += 1;
                    let [first, second] = table[op as usize];
                    if second.kind != InstKind::Noop {
                        exec.second = Some(second);
                    }
                    if first.kind == InstKind::Noop {
                        continue;
                    }
                    first
                }
            };

            let size = if half.size == 0 {
                let mut r = SliceReader::new(&inst[exec.inst_pos..]);
                let size = r
                    .u32()
                    .map_err(|e| Error::invalid(format!("instruction size: {e}")))?;
                exec.inst_pos += r.position();
                size as usize
            } else {
                half.size as usize
            };
            let end = exec.tpos + size as u64;
            if end > win.target_len {
                return Err(Error::invalid(format!(
                    "instruction ends at {end}, past the {} byte window",
                    win.target_len
                )));
            }

            match half.kind {
                InstKind::Run => {
                    let &byte = data
                        .get(exec.data_pos)
                        .ok_or_else(|| Error::invalid("data section underflow (RUN)"))?;
                    exec.data_pos += 1;
                    output.resize(output.len() + size, byte);
                    stats.runs += 1;
                }
                InstKind::Add => {
                    let bytes = data
                        .get(exec.data_pos..exec.data_pos + size)
                        .ok_or_else(|| Error::invalid("data section underflow (ADD)"))?;
                    exec.data_pos += size;
                    output.extend_from_slice(bytes);
                    stats.adds += 1;
                }
                InstKind::Copy(mode) => {
                    let here = win
                        .copy_len
                        .checked_add(exec.tpos)
                        .ok_or_else(|| Error::invalid("copy window overflows"))?;
                    let mut r = SliceReader::new(&addrs[exec.addr_pos..]);
                    let addr = acache.decode(mode, &mut r, here)?;
                    exec.addr_pos += r.position();
                    stats.copies += 1;

                    if addr < win.copy_len {
                        if addr + size as u64 > win.copy_len {
                            return Err(Error::invalid(format!(
                                "copy at {addr}+{size} straddles the source window end {}",
                                win.copy_len
                            )));
                        }
                        stats.source_copy_bytes += size as u64;
                        exec.copy = Some(CopyProgress {
                            offset: win.copy_offset + addr,
                            remaining: size,
                        });
                    } else {
                        let start = (addr - win.copy_len) as usize;
                        if start + size <= output.len() {
                            output.extend_from_within(start..start + size);
                        } else {
                            // Overlapping copy: each byte may be one just written.
                            for i in start..start + size {
                                let b = output[i];
                                output.push(b);
                            }
                        }
                    }
                }
                InstKind::Noop => {}
            }
            exec.tpos = end;
        }
        Ok(None)
    }

    fn finish_window(&mut self) -> Result<()> {
        if self.output.len() as u64 != self.win.target_len {
            return Err(Error::invalid(format!(
                "window produced {} bytes, header says {}",
                self.output.len(),
                self.win.target_len
            )));
        }
        let data_len = match &self.sections[0] {
            Section::Borrowed { len, .. } => *len,
            Section::Owned(buf) => buf.len(),
        };
        let addr_len = match &self.sections[2] {
            Section::Borrowed { len, .. } => *len,
            Section::Owned(buf) => buf.len(),
        };
        if self.exec.data_pos != data_len || self.exec.addr_pos != addr_len {
            return Err(Error::invalid("window left data or address bytes unused"));
        }
        if self.config.verify_checksum {
            if let Some(expected) = self.win.adler32 {
                let actual = header::adler32(&self.output);
                if actual != expected {
                    return Err(Error::ChecksumMismatch { expected, actual });
                }
            }
        }
        debug!(
            "window {}: {} bytes, source {}+{}",
            self.stats.windows, self.win.target_len, self.win.copy_offset, self.win.copy_len
        );
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
