// Error and status types shared by the encoder and decoder sessions.
//
// Conditions a caller is expected to satisfy and then retry (more input,
// drain output, supply a source block) are `Status` values, never errors.
// Everything in `Error` is terminal for the session.

use std::io;

use thiserror::Error;

pub use crate::vcdiff::varint::VarintError;

/// Crate-wide result alias.
pub type Result<T> = std::result::Result<T, Error>;

/// Terminal failure of an encode or decode session.
#[derive(Debug, Error)]
pub enum Error {
    /// Malformed or hostile wire data, or a caller-contract violation.
    #[error("invalid input: {0}")]
    InvalidInput(String),

    /// A buffer allocation could not be satisfied within the configured limits.
    #[error("out of memory")]
    OutOfMemory,

    /// Addressing reached data that was evicted and cannot be re-read.
    #[error("source block is too far back to re-read")]
    TooFarBack,

    /// Library invariant violation.
    #[error("internal error: {0}")]
    Internal(String),

    /// A feature of the format this library does not support.
    #[error("unimplemented: {0}")]
    Unimplemented(&'static str),

    /// The stream was well formed but the window data did not match its checksum.
    #[error("checksum mismatch: expected {expected:#010x}, got {actual:#010x}")]
    ChecksumMismatch { expected: u32, actual: u32 },

    #[error(transparent)]
    Varint(#[from] VarintError),

    #[error(transparent)]
    Io(#[from] io::Error),
}

impl Error {
    pub(crate) fn invalid(msg: impl Into<String>) -> Self {
        Error::InvalidInput(msg.into())
    }

    pub(crate) fn internal(msg: impl Into<String>) -> Self {
        Error::Internal(msg.into())
    }

    /// True for errors caused by the bytes being decoded rather than by
    /// resources or the library itself.
    pub fn is_corrupt_input(&self) -> bool {
        matches!(
            self,
            Error::InvalidInput(_) | Error::Varint(_) | Error::ChecksumMismatch { .. }
        )
    }
}

impl From<Error> for io::Error {
    fn from(e: Error) -> io::Error {
        match e {
            Error::Io(inner) => inner,
            Error::OutOfMemory => io::Error::new(io::ErrorKind::OutOfMemory, e),
            Error::Unimplemented(_) => io::Error::new(io::ErrorKind::Unsupported, e),
            other => io::Error::new(io::ErrorKind::InvalidData, other),
        }
    }
}

/// Resumable outcome of a session step.
///
/// The caller satisfies the request and calls the same entry point again.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Status {
    /// All buffered input has been consumed.
    NeedMoreInput,
    /// Output is ready and must be drained before the session can continue.
    Output,
    /// The source block with this number is not available yet.
    NeedSourceBlock(u64),
    /// The stream header (and application header, if any) has been parsed.
    GotHeader,
    /// A new window is about to be processed.
    WindowStart,
    /// The current window has been fully processed.
    WindowFinish,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn checksum_mismatch_is_distinct_from_invalid_input() {
        let sum = Error::ChecksumMismatch {
            expected: 1,
            actual: 2,
        };
        assert!(sum.is_corrupt_input());
        assert!(!matches!(sum, Error::InvalidInput(_)));
        assert_eq!(
            sum.to_string(),
            "checksum mismatch: expected 0x00000001, got 0x00000002"
        );
    }

    #[test]
    fn converts_to_io_error() {
        let e: io::Error = Error::Unimplemented("code tables").into();
        assert_eq!(e.kind(), io::ErrorKind::Unsupported);
        let e: io::Error = Error::invalid("bad").into();
        assert_eq!(e.kind(), io::ErrorKind::InvalidData);
        assert!(!Error::TooFarBack.is_corrupt_input());
    }
}
