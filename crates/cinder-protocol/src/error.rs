//! Protocol error types.

use thiserror::Error;

/// Errors produced while decoding RESP or parsing a client command.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ProtocolError {
    /// The buffer ends before the frame does.
    #[error("incomplete frame: need more data")]
    Incomplete,

    /// The first byte of a frame didn't match any known RESP type prefix.
    #[error("invalid type prefix: {0:#04x}")]
    InvalidPrefix(u8),

    /// Failed to parse an integer value from the frame content.
    #[error("invalid integer encoding")]
    InvalidInteger,

    /// A bulk string or array declared an invalid length.
    #[error("invalid frame length: {0}")]
    InvalidFrameLength(i64),

    /// A bulk string exceeded the maximum allowed size.
    #[error("bulk string too large: {0} bytes")]
    BulkStringTooLarge(usize),

    /// An array declared more elements than we are willing to allocate.
    #[error("too many elements: {0}")]
    TooManyElements(usize),

    /// Arrays nested deeper than the parser allows.
    #[error("frame nesting exceeds {0} levels")]
    NestingTooDeep(usize),

    /// A simple or error string was not valid UTF-8.
    #[error("invalid utf-8 in {0}")]
    InvalidUtf8(&'static str),

    /// Bytes remained after a complete frame where exactly one was expected.
    #[error("{0} trailing bytes after frame")]
    TrailingData(usize),

    /// The client sent a frame with no command in it.
    #[error("empty command")]
    EmptyCommand,

    /// A double-quoted argument was never closed.
    #[error("unbalanced quotes in command")]
    UnbalancedQuotes,
}
