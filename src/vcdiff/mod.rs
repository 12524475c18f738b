// VCDIFF format implementation (RFC 3284).
//
// # Modules
//
// - `varint`:        Variable-length integers, including a resumable decoder
// - `address_cache`: NEAR/SAME address cache for COPY instruction addresses
// - `code_table`:    Default RFC 3284 code table (256 entries)
// - `header`:        Stream and window headers, indicator flags, Adler-32
// - `encoder`:       Instruction packing and window emission into output pages
// - `decoder`:       Resumable window decoding state machine

pub mod address_cache;
pub mod code_table;
pub mod decoder;
pub mod encoder;
pub mod header;
pub mod varint;

pub use address_cache::AddressCache;
pub use code_table::{CodeTable, HalfInst, InstKind};
pub use decoder::{DecodeState, Decoder, Progress};
pub use encoder::{PageArena, PageChain, WindowEncoder, WindowSections};
pub use header::{FileHeader, VCDIFF_MAGIC, WindowHeader};
