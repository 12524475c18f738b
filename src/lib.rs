//! vcdelta: resumable VCDIFF (RFC 3284) delta encoding and decoding.
//!
//! The crate provides:
//! - Wire-level VCDIFF pieces: varints, the address cache, the default code
//!   table, headers and window emission (`vcdiff`)
//! - Rolling checksums, hash tables and the string matcher (`hash`)
//! - Block-granular source access through a bounded cache (`source`)
//! - Resumable encoder and decoder sessions plus `Read`/`Write` drivers
//!   (`compress`)
//! - File helpers with SHA-256 digests (`io`, feature `file-io`)
//!
//! Sessions never block: every condition the caller must satisfy (more
//! input, draining output, a missing source block) comes back as a
//! [`Status`] and the same call is repeated once it has been dealt with.
//!
//! # Quick Start
//!
//! ```
//! use vcdelta::compress::{decoder, encoder};
//!
//! let source = b"hello old world, hello old world";
//! let target = b"hello new world, hello old world";
//!
//! let delta = encoder::encode_all(source, target, encoder::EncoderConfig::default()).unwrap();
//! let decoded = decoder::decode_all(source, &delta).unwrap();
//! assert_eq!(decoded, target);
//! ```

pub mod arena;
pub mod compress;
pub mod error;
pub mod hash;
#[cfg(feature = "file-io")]
pub mod io;
pub mod source;
pub mod vcdiff;

pub use error::{Error, Result, Status};
