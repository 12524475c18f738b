// Checksums, hash tables and string matching.
//
// - `rolling`:  4-byte multiplicative checksum and the rolling large checksum
// - `table`:    power-of-two checksum tables with a self-match chain
// - `config`:   matcher parameters, profiles and window-size constants
// - `matching`: the resumable string matcher

pub mod config;
pub mod matching;
pub mod rolling;
pub mod table;

pub use config::{MatcherConfig, MatcherProfile};
pub use matching::{MatchSink, MatchState, StringMatcher};
