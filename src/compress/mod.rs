// Delta sessions and their streaming drivers.
//
// - `encoder`:   resumable `Encoder` session, `DeltaEncoder` over `Write`
// - `decoder`:   `DeltaDecoder` over `Read`, in-memory `decode_all`
// - `optimizer`: candidate queue that resolves overlapping matches
// - `secondary`: pluggable section compression (LZMA, Zlib, custom)

pub mod decoder;
pub mod encoder;
pub mod optimizer;
pub mod secondary;

pub use decoder::{DecodeStats, DecoderConfig, DeltaDecoder, decode_all};
pub use encoder::{DeltaEncoder, EncState, EncodeStats, Encoder, EncoderConfig, encode_all};
pub use optimizer::{Candidate, CandidateKind, InstructionOptimizer, SourceWindow};
pub use secondary::{CompressBackend, SecondaryCompression};
