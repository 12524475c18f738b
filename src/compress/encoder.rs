// Delta encoder session.
//
// `Encoder` is a resumable state machine. The caller buffers target bytes
// with `input`, then calls `step` until it reports `NeedMoreInput`:
//
//   Input -> Search -> Instr -> Flush -> Output -> PostWin -> Input ...
//
// Search runs the string matcher over the buffered window, queueing
// candidates in the instruction optimizer; the optimizer drains into the
// window encoder whenever it fills. Instr forces the final flush, Flush
// frames the window into the output page chain, and Output hands pages to
// the caller one at a time. A missing source block suspends Search with
// `NeedSourceBlock` and the next `step` resumes the match in place.
//
// `DeltaEncoder` drives a session from a `Write` sink for callers whose
// source is always readable.

use std::io::Write;
use std::sync::Arc;

use log::{debug, trace, warn};

use crate::error::{Error, Result, Status};
use crate::hash::config::{
    DEFAULT_IOPT_SIZE, DEFAULT_SPREVSZ, DEFAULT_WINSIZE, MAX_WINSIZE, MatcherProfile,
};
use crate::hash::matching::{MatchSink, StringMatcher};
use crate::source::{BlockSource, CacheConfig, CacheStats, MemorySource, SourceBlockCache};
use crate::vcdiff::encoder::{self, PageArena, PageChain, WindowEncoder};
use crate::vcdiff::header::{self, DeltaFlags, FileHeader, WindowFlags, WindowHeader};

use super::optimizer::{Candidate, CandidateKind, InstructionOptimizer, SourceWindow};
use super::secondary::{self, CompressBackend, SecondaryCompression};

// ---------------------------------------------------------------------------
// Configuration
// ---------------------------------------------------------------------------

/// Encoder settings.
#[derive(Debug, Clone)]
pub struct EncoderConfig {
    /// Target bytes per window.
    pub window_size: usize,
    pub profile: MatcherProfile,
    /// Optimizer queue capacity.
    pub iopt_size: usize,
    /// Self-match chain array size.
    pub sprevsz: usize,
    /// Emit an Adler-32 of every target window.
    pub checksum: bool,
    pub secondary: SecondaryCompression,
    /// Opaque bytes stored in the stream header.
    pub app_header: Option<Vec<u8>>,
    /// Source block cache sizing; `max_window` also bounds how far back a
    /// source copy may reach.
    pub cache: CacheConfig,
}

impl Default for EncoderConfig {
    fn default() -> Self {
        Self {
            window_size: DEFAULT_WINSIZE,
            profile: MatcherProfile::default(),
            iopt_size: DEFAULT_IOPT_SIZE,
            sprevsz: DEFAULT_SPREVSZ,
            checksum: true,
            secondary: SecondaryCompression::None,
            app_header: None,
            cache: CacheConfig::default(),
        }
    }
}

impl EncoderConfig {
    /// Defaults with the matcher profile for `level` (0-9).
    pub fn with_level(level: u32) -> Self {
        Self {
            profile: MatcherProfile::for_level(level),
            ..Self::default()
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.window_size == 0 || self.window_size > MAX_WINSIZE {
            return Err(Error::invalid(format!(
                "window size {} outside 1..={MAX_WINSIZE}",
                self.window_size
            )));
        }
        if self.iopt_size == 0 {
            return Err(Error::invalid("optimizer queue needs capacity"));
        }
        if self.sprevsz != 0 && !self.sprevsz.is_power_of_two() {
            return Err(Error::invalid(format!(
                "sprevsz {} is not a power of two",
                self.sprevsz
            )));
        }
        self.profile.config().validate()
    }
}

// ---------------------------------------------------------------------------
// Statistics
// ---------------------------------------------------------------------------

/// Totals for one encode session.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct EncodeStats {
    pub windows: u64,
    pub bytes_in: u64,
    pub bytes_out: u64,
    pub adds: u64,
    pub add_bytes: u64,
    pub runs: u64,
    pub run_bytes: u64,
    pub copies: u64,
    pub copy_bytes: u64,
    pub source_copies: u64,
    pub source_copy_bytes: u64,
    pub cache: CacheStats,
}

// ---------------------------------------------------------------------------
// Emitter
// ---------------------------------------------------------------------------

/// Receives flushed candidates and writes them as window instructions.
#[derive(Debug, Default)]
struct Emitter {
    window: WindowEncoder,
    srcwin: SourceWindow,
    has_source: bool,
    source_len: Option<u64>,
    /// First target byte not yet covered by an instruction.
    unencoded: usize,
    avail: usize,
    window_done: bool,
    source_copies: u64,
    source_copy_bytes: u64,
}

impl Emitter {
    fn start_window(&mut self, avail: usize) {
        self.window.reset();
        self.srcwin.reset();
        self.unencoded = 0;
        self.avail = avail;
        self.window_done = false;
    }

    /// Offset of target position 0 in the combined address space.
    fn taroff(&self) -> u64 {
        if self.srcwin.decided { self.srcwin.len } else { 0 }
    }

    fn emit(&mut self, mut cand: Candidate, input: &[u8]) -> Result<()> {
        if cand.end() > input.len() {
            return Err(Error::internal(format!(
                "candidate {}..{} past window end {}",
                cand.pos,
                cand.end(),
                input.len()
            )));
        }
        // A partial flush leaves its last overlap unresolved, so the next
        // candidate may start inside bytes already encoded.
        if !cand.clip_front(self.unencoded) {
            trace!(
                "candidate {}..{} covered by encoded offset {}",
                cand.pos,
                cand.end(),
                self.unencoded
            );
            return Ok(());
        }
        if matches!(cand.kind, CandidateKind::Copy { .. }) && self.has_source && !self.srcwin.decided {
            self.srcwin.decide(self.window_done, self.avail, self.source_len);
        }

        if self.unencoded < cand.pos {
            self.window.add(&input[self.unencoded..cand.pos]);
        }

        let size = cand.size as u32;
        let here = self.taroff() + cand.pos as u64;
        match cand.kind {
            CandidateKind::Run(byte) => self.window.run(size, byte),
            CandidateKind::Copy { addr, source: true } => {
                if self.srcwin.contains(addr, cand.size as u64) {
                    self.window.copy(size, addr - self.srcwin.base, here);
                    self.source_copies += 1;
                    self.source_copy_bytes += cand.size as u64;
                } else {
                    warn!(
                        "source copy {addr}+{} outside window {}+{}, sent as literal",
                        cand.size, self.srcwin.base, self.srcwin.len
                    );
                    self.window.add(&input[cand.pos..cand.end()]);
                }
            }
            CandidateKind::Copy { addr, source: false } => {
                self.window.copy(size, self.taroff() + addr, here);
            }
        }
        self.unencoded = cand.end();
        Ok(())
    }

    /// Cover whatever the last instruction left uncovered.
    fn finish_add(&mut self, input: &[u8]) {
        if self.unencoded < input.len() {
            self.window.add(&input[self.unencoded..]);
            self.unencoded = input.len();
        }
    }
}

/// The matcher's view of the optimizer and emitter.
struct Sink<'a> {
    iopt: &'a mut InstructionOptimizer,
    emitter: &'a mut Emitter,
    input: &'a [u8],
}

impl MatchSink for Sink<'_> {
    fn push(&mut self, mut cand: Candidate) -> Result<()> {
        if self.iopt.is_full() {
            let (emitter, input) = (&mut *self.emitter, self.input);
            self.iopt.flush(false, |c| emitter.emit(c, input))?;
        }
        // The matcher bounded `cand` before any flush it triggered.
        if !cand.clip_front(self.emitter.unencoded) {
            return Ok(());
        }
        self.iopt.push(cand)
    }

    fn erase(&mut self, pos: usize) {
        self.iopt.erase(pos);
    }

    fn last_matched(&self) -> usize {
        self.iopt.last_matched()
    }

    fn unencoded_offset(&self) -> usize {
        self.emitter.unencoded
    }

    fn source_window(&mut self) -> &mut SourceWindow {
        &mut self.emitter.srcwin
    }
}

// ---------------------------------------------------------------------------
// Session
// ---------------------------------------------------------------------------

/// Where the session resumes on the next `step`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum EncState {
    #[default]
    Input,
    Search,
    Instr,
    Flush,
    Output,
    PostWin,
    Done,
}

/// Resumable encode session.
pub struct Encoder<S = MemorySource<'static>> {
    window_size: usize,
    checksum: bool,
    app_header: Option<Vec<u8>>,
    secondary: Option<Arc<dyn CompressBackend>>,

    matcher: StringMatcher,
    iopt: InstructionOptimizer,
    emitter: Emitter,
    source: Option<SourceBlockCache<S>>,

    input: Vec<u8>,
    eof: bool,
    state: EncState,
    header_written: bool,
    total_in: u64,

    arena: PageArena,
    chain: PageChain,
    stats: EncodeStats,
}

impl<S: BlockSource> Encoder<S> {
    /// Start a session, optionally against a source.
    pub fn new(config: EncoderConfig, source: Option<S>) -> Result<Self> {
        config.validate()?;
        let source = source
            .map(|s| SourceBlockCache::new(s, config.cache))
            .transpose()?;
        let matcher_cfg = config.profile.config();
        debug!(
            "encoder: window {} profile {} source {}",
            config.window_size,
            config.profile.name(),
            source.is_some()
        );
        Ok(Self {
            window_size: config.window_size,
            checksum: config.checksum,
            app_header: config.app_header,
            secondary: config.secondary.backend(),
            matcher: StringMatcher::new(matcher_cfg, config.window_size, config.sprevsz),
            iopt: InstructionOptimizer::new(config.iopt_size),
            emitter: Emitter {
                has_source: source.is_some(),
                ..Emitter::default()
            },
            source,
            input: Vec::new(),
            eof: false,
            state: EncState::Input,
            header_written: false,
            total_in: 0,
            arena: PageArena::new(),
            chain: PageChain::new(),
            stats: EncodeStats::default(),
        })
    }

    /// Buffer target bytes. Returns how many were taken; input is only
    /// accepted between windows and up to the window size.
    pub fn input(&mut self, data: &[u8]) -> usize {
        if self.state != EncState::Input || self.eof {
            return 0;
        }
        let n = (self.window_size - self.input.len()).min(data.len());
        self.input.extend_from_slice(&data[..n]);
        n
    }

    /// Mark the end of the target. The buffered tail becomes the last window.
    pub fn finish_input(&mut self) {
        self.eof = true;
    }

    pub fn state(&self) -> EncState {
        self.state
    }

    /// True once the final window has been drained.
    pub fn is_finished(&self) -> bool {
        self.state == EncState::Done
    }

    pub fn stats(&self) -> EncodeStats {
        let mut stats = self.stats;
        if let Some(src) = &self.source {
            stats.cache = src.stats();
        }
        stats
    }

    /// The block source, for supplying blocks after `NeedSourceBlock`.
    pub fn source_mut(&mut self) -> Option<&mut S> {
        self.source.as_mut().map(SourceBlockCache::source_mut)
    }

    /// The next output page. Valid after `step` returns `Status::Output`.
    pub fn output(&self) -> &[u8] {
        self.chain.front(&self.arena).unwrap_or(&[])
    }

    /// Release the page returned by `output`.
    pub fn consume_output(&mut self) {
        let before = self.chain.len();
        self.chain.consume_front(&mut self.arena);
        self.stats.bytes_out += (before - self.chain.len()) as u64;
    }

    /// Advance until the caller must act.
    pub fn step(&mut self) -> Result<Status> {
        loop {
            match self.state {
                EncState::Input => {
                    let full = self.input.len() == self.window_size;
                    if !full && !self.eof {
                        return Ok(Status::NeedMoreInput);
                    }
                    if self.input.is_empty() && self.eof && self.stats.windows > 0 {
                        self.state = EncState::Done;
                        continue;
                    }
                    self.start_window();
                    self.state = EncState::Search;
                    return Ok(Status::WindowStart);
                }
                EncState::Search => {
                    if let Some(src) = &self.source {
                        self.emitter.source_len = src.source_len();
                    }
                    let mut sink = Sink {
                        iopt: &mut self.iopt,
                        emitter: &mut self.emitter,
                        input: &self.input,
                    };
                    if let Some(blkno) =
                        self.matcher
                            .search(&self.input, self.source.as_mut(), &mut sink)?
                    {
                        trace!("search suspended on source block {blkno}");
                        return Ok(Status::NeedSourceBlock(blkno));
                    }
                    self.state = EncState::Instr;
                }
                EncState::Instr => {
                    self.emitter.window_done = true;
                    let (emitter, input) = (&mut self.emitter, &self.input);
                    self.iopt.flush(true, |c| emitter.emit(c, input))?;
                    self.emitter.finish_add(&self.input);
                    self.state = EncState::Flush;
                }
                EncState::Flush => {
                    self.flush_window()?;
                    self.state = EncState::Output;
                }
                EncState::Output => {
                    if !self.chain.is_empty() {
                        return Ok(Status::Output);
                    }
                    self.state = EncState::PostWin;
                }
                EncState::PostWin => {
                    self.total_in += self.input.len() as u64;
                    self.stats.windows += 1;
                    self.input.clear();
                    self.emitter.srcwin.reset();
                    self.state = EncState::Input;
                    return Ok(Status::WindowFinish);
                }
                EncState::Done => return Ok(Status::NeedMoreInput),
            }
        }
    }

    fn start_window(&mut self) {
        trace!(
            "window {} at {}: {} bytes",
            self.stats.windows,
            self.total_in,
            self.input.len()
        );
        self.emitter.start_window(self.input.len());
        self.iopt.clear();
        self.matcher.start_window(self.total_in);
        self.stats.bytes_in += self.input.len() as u64;
    }

    fn flush_window(&mut self) -> Result<()> {
        if !self.header_written {
            let hdr = FileHeader::new(
                self.secondary.as_ref().map(|b| b.id()),
                self.app_header.clone(),
            );
            encoder::write_file_header(&mut self.chain, &mut self.arena, &hdr);
            self.header_written = true;
        }

        let mut sections = self.emitter.window.finish();
        let counts = sections.counts;
        let delta_flags = match &self.secondary {
            Some(backend) => secondary::compress_sections(
                backend.as_ref(),
                &mut sections.data,
                &mut sections.inst,
                &mut sections.addr,
            )?,
            None => DeltaFlags::empty(),
        };

        let srcwin = self.emitter.srcwin;
        let mut flags = WindowFlags::empty();
        if srcwin.decided && srcwin.len > 0 {
            flags |= WindowFlags::SOURCE;
        }
        let adler32 = self.checksum.then(|| header::adler32(&self.input));
        if adler32.is_some() {
            flags |= WindowFlags::ADLER32;
        }
        let mut hdr = WindowHeader {
            flags,
            copy_len: if flags.contains(WindowFlags::SOURCE) { srcwin.len } else { 0 },
            copy_offset: if flags.contains(WindowFlags::SOURCE) { srcwin.base } else { 0 },
            target_len: self.input.len() as u64,
            delta_flags,
            adler32,
            ..WindowHeader::default()
        };
        encoder::write_window(&mut self.chain, &mut self.arena, &mut hdr, &sections);

        debug!(
            "window {}: {} -> {} bytes, source {}+{}, {} add {} run {} copy",
            self.stats.windows,
            self.input.len(),
            hdr.enc_len,
            hdr.copy_offset,
            hdr.copy_len,
            counts.adds,
            counts.runs,
            counts.copies
        );

        self.stats.adds += counts.adds;
        self.stats.add_bytes += counts.add_bytes;
        self.stats.runs += counts.runs;
        self.stats.run_bytes += counts.run_bytes;
        self.stats.copies += counts.copies;
        self.stats.copy_bytes += counts.copy_bytes;
        self.stats.source_copies = self.emitter.source_copies;
        self.stats.source_copy_bytes = self.emitter.source_copy_bytes;
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// DeltaEncoder
// ---------------------------------------------------------------------------

/// Encoder writing to a `Write` sink.
///
/// The source must never report a pending block; sources that do need
/// the `Encoder` session directly.
///
/// # Example
/// ```no_run
/// use vcdelta::compress::encoder::{DeltaEncoder, EncoderConfig};
/// use vcdelta::source::MemorySource;
///
/// let source = b"original data";
/// let mut enc = DeltaEncoder::new(Vec::new(), Some(MemorySource::new(source)), EncoderConfig::default())?;
/// enc.write_target(b"modified data")?;
/// let (delta, stats) = enc.finish()?;
/// # Ok::<(), vcdelta::Error>(())
/// ```
pub struct DeltaEncoder<W: Write, S = MemorySource<'static>> {
    writer: W,
    session: Encoder<S>,
}

impl<W: Write, S: BlockSource> DeltaEncoder<W, S> {
    pub fn new(writer: W, source: Option<S>, config: EncoderConfig) -> Result<Self> {
        Ok(Self {
            writer,
            session: Encoder::new(config, source)?,
        })
    }

    /// Feed target bytes; every completed window is written out.
    pub fn write_target(&mut self, mut data: &[u8]) -> Result<()> {
        while !data.is_empty() {
            let n = self.session.input(data);
            data = &data[n..];
            self.drive()?;
        }
        Ok(())
    }

    /// Encode the buffered tail and return the writer with session totals.
    pub fn finish(mut self) -> Result<(W, EncodeStats)> {
        self.session.finish_input();
        self.drive()?;
        self.writer.flush()?;
        Ok((self.writer, self.session.stats()))
    }

    pub fn stats(&self) -> EncodeStats {
        self.session.stats()
    }

    fn drive(&mut self) -> Result<()> {
        loop {
            match self.session.step()? {
                Status::Output => {
                    self.writer.write_all(self.session.output())?;
                    self.session.consume_output();
                }
                Status::NeedMoreInput => return Ok(()),
                Status::NeedSourceBlock(blkno) => {
                    return Err(Error::invalid(format!(
                        "source block {blkno} is not available"
                    )));
                }
                Status::WindowStart | Status::WindowFinish | Status::GotHeader => {}
            }
        }
    }
}

impl<W: Write> DeltaEncoder<W> {
    /// Encoder with no source: only runs and self-copies are found.
    pub fn without_source(writer: W, config: EncoderConfig) -> Result<Self> {
        Self::new(writer, None, config)
    }
}

/// Encode `target` against `source` in one call.
pub fn encode_all(source: &[u8], target: &[u8], config: EncoderConfig) -> Result<Vec<u8>> {
    let source = (!source.is_empty()).then(|| MemorySource::new(source));
    let mut enc = DeltaEncoder::new(Vec::new(), source, config)?;
    enc.write_target(target)?;
    let (out, _) = enc.finish()?;
    Ok(out)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
