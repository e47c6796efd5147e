//! RESP frame types.
//!
//! Blob strings use `Bytes` so decoded payloads can be handed to the
//! transcoder without another copy.

use bytes::Bytes;

/// A single RESP protocol frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    /// Simple string, e.g. `+OK\r\n`.
    Simple(String),

    /// Error string, e.g. `-ERR unknown command\r\n`.
    Error(String),

    /// 64-bit signed integer, e.g. `:42\r\n`.
    Integer(i64),

    /// Binary-safe bulk string, e.g. `$5\r\nhello\r\n`.
    Bulk(Bytes),

    /// Ordered array of frames, e.g. `*2\r\n+hello\r\n+world\r\n`.
    Array(Vec<Frame>),

    /// Null. Encoded as RESP3 `_\r\n`; RESP2 `$-1` and `*-1` decode to it.
    Null,
}

impl Frame {
    /// Returns `true` if this frame is a null value.
    pub fn is_null(&self) -> bool {
        matches!(self, Frame::Null)
    }

    /// Convenience constructor for a bulk string from anything byte-like.
    pub fn bulk(data: impl Into<Bytes>) -> Self {
        Frame::Bulk(data.into())
    }
}
