//! RESP decoder.
//!
//! The store hands back legacy command results as one encoded RESP value
//! in a byte buffer. [`parse_frame`] is the incremental form used when the
//! buffer may hold a partial frame; [`decode_one`] is the strict form the
//! transcoder uses, where the buffer must hold exactly one frame.
//!
//! Parsing is a single pass over a `Cursor<&[u8]>`: frames are built as the
//! bytes are validated, and `Incomplete` is returned as soon as the buffer
//! runs out.

use std::io::Cursor;

use bytes::Bytes;

use crate::error::ProtocolError;
use crate::types::Frame;

/// Maximum nesting depth for arrays.
const MAX_NESTING_DEPTH: usize = 64;

/// Maximum number of elements in a single array.
const MAX_ARRAY_ELEMENTS: usize = 1_048_576;

/// Maximum length of a bulk string in bytes (512 MB).
const MAX_BULK_LEN: i64 = 512 * 1024 * 1024;

/// Cap for the up-front `Vec` allocation of a declared array.
const PREALLOC_CAP: usize = 1024;

/// Parses one frame from the front of `buf`.
///
/// Returns `Ok(Some((frame, consumed)))` if a complete frame was parsed,
/// `Ok(None)` if the buffer doesn't contain enough data yet, or an error
/// if the data is malformed.
pub fn parse_frame(buf: &[u8]) -> Result<Option<(Frame, usize)>, ProtocolError> {
    if buf.is_empty() {
        return Ok(None);
    }

    let mut cursor = Cursor::new(buf);
    match try_parse(&mut cursor, 0) {
        Ok(frame) => Ok(Some((frame, cursor.position() as usize))),
        Err(ProtocolError::Incomplete) => Ok(None),
        Err(e) => Err(e),
    }
}

/// Decodes a buffer that must contain exactly one complete frame.
///
/// A partial frame is an error here, not a request for more data: the
/// store always emits whole responses.
pub fn decode_one(buf: &[u8]) -> Result<Frame, ProtocolError> {
    match parse_frame(buf)? {
        Some((frame, consumed)) if consumed == buf.len() => Ok(frame),
        Some((_, consumed)) => Err(ProtocolError::TrailingData(buf.len() - consumed)),
        None => Err(ProtocolError::Incomplete),
    }
}

fn try_parse(cursor: &mut Cursor<&[u8]>, depth: usize) -> Result<Frame, ProtocolError> {
    match read_byte(cursor)? {
        b'+' => {
            let line = read_line(cursor)?;
            let s = std::str::from_utf8(line)
                .map_err(|_| ProtocolError::InvalidUtf8("simple string"))?;
            Ok(Frame::Simple(s.to_owned()))
        }
        b'-' => {
            let line = read_line(cursor)?;
            let s = std::str::from_utf8(line)
                .map_err(|_| ProtocolError::InvalidUtf8("error string"))?;
            Ok(Frame::Error(s.to_owned()))
        }
        b':' => Ok(Frame::Integer(read_integer_line(cursor)?)),
        b'$' => {
            let len = read_integer_line(cursor)?;
            if len == -1 {
                return Ok(Frame::Null);
            }
            if len < 0 {
                return Err(ProtocolError::InvalidFrameLength(len));
            }
            if len > MAX_BULK_LEN {
                return Err(ProtocolError::BulkStringTooLarge(len as usize));
            }
            let len = len as usize;

            let pos = cursor.position() as usize;
            let buf = *cursor.get_ref();
            if buf.len() < pos + len + 2 {
                return Err(ProtocolError::Incomplete);
            }
            if &buf[pos + len..pos + len + 2] != b"\r\n" {
                return Err(ProtocolError::InvalidFrameLength(len as i64));
            }

            cursor.set_position((pos + len + 2) as u64);
            Ok(Frame::Bulk(Bytes::copy_from_slice(&buf[pos..pos + len])))
        }
        b'*' => {
            let next_depth = depth + 1;
            if next_depth > MAX_NESTING_DEPTH {
                return Err(ProtocolError::NestingTooDeep(MAX_NESTING_DEPTH));
            }

            let count = read_integer_line(cursor)?;
            if count == -1 {
                return Ok(Frame::Null);
            }
            if count < 0 {
                return Err(ProtocolError::InvalidFrameLength(count));
            }
            let count = count as usize;
            if count > MAX_ARRAY_ELEMENTS {
                return Err(ProtocolError::TooManyElements(count));
            }

            let mut frames = Vec::with_capacity(count.min(PREALLOC_CAP));
            for _ in 0..count {
                frames.push(try_parse(cursor, next_depth)?);
            }
            Ok(Frame::Array(frames))
        }
        b'_' => {
            let line = read_line(cursor)?;
            if !line.is_empty() {
                return Err(ProtocolError::InvalidFrameLength(line.len() as i64));
            }
            Ok(Frame::Null)
        }
        other => Err(ProtocolError::InvalidPrefix(other)),
    }
}

fn read_byte(cursor: &mut Cursor<&[u8]>) -> Result<u8, ProtocolError> {
    let pos = cursor.position() as usize;
    let byte = *cursor.get_ref().get(pos).ok_or(ProtocolError::Incomplete)?;
    cursor.set_position((pos + 1) as u64);
    Ok(byte)
}

/// Reads up to the next `\r\n`, returning the line without the terminator.
fn read_line<'a>(cursor: &mut Cursor<&'a [u8]>) -> Result<&'a [u8], ProtocolError> {
    let buf: &'a [u8] = *cursor.get_ref();
    let start = cursor.position() as usize;
    let rest = buf.get(start..).ok_or(ProtocolError::Incomplete)?;

    let end = rest
        .windows(2)
        .position(|w| w == b"\r\n")
        .ok_or(ProtocolError::Incomplete)?;

    cursor.set_position((start + end + 2) as u64);
    Ok(&rest[..end])
}

fn read_integer_line(cursor: &mut Cursor<&[u8]>) -> Result<i64, ProtocolError> {
    let line = read_line(cursor)?;
    let s = std::str::from_utf8(line).map_err(|_| ProtocolError::InvalidInteger)?;
    s.parse::<i64>().map_err(|_| ProtocolError::InvalidInteger)
}
