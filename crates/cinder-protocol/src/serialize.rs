//! Direct-to-buffer RESP serialization.
//!
//! The shard uses this to encode results of legacy commands. Integer
//! lengths are formatted with `itoa` to stay off the allocator.

use bytes::{BufMut, BytesMut};

use crate::types::Frame;

impl Frame {
    /// Serializes this frame into the provided buffer, including type
    /// prefix and trailing `\r\n` delimiters.
    pub fn serialize(&self, dst: &mut BytesMut) {
        match self {
            Frame::Simple(s) => {
                dst.put_u8(b'+');
                put_line(s, dst);
                dst.put_slice(b"\r\n");
            }
            Frame::Error(msg) => {
                dst.put_u8(b'-');
                put_line(msg, dst);
                dst.put_slice(b"\r\n");
            }
            Frame::Integer(n) => {
                dst.put_u8(b':');
                write_i64(*n, dst);
                dst.put_slice(b"\r\n");
            }
            Frame::Bulk(data) => {
                dst.put_u8(b'$');
                write_i64(data.len() as i64, dst);
                dst.put_slice(b"\r\n");
                dst.put_slice(data);
                dst.put_slice(b"\r\n");
            }
            Frame::Array(items) => {
                dst.put_u8(b'*');
                write_i64(items.len() as i64, dst);
                dst.put_slice(b"\r\n");
                for item in items {
                    item.serialize(dst);
                }
            }
            Frame::Null => dst.put_slice(b"_\r\n"),
        }
    }

    /// Serializes into a fresh, frozen buffer.
    pub fn to_bytes(&self) -> bytes::Bytes {
        let mut buf = BytesMut::new();
        self.serialize(&mut buf);
        buf.freeze()
    }
}

/// Writes the body of a line frame. CR and LF would end the line early,
/// so each becomes a space.
fn put_line(text: &str, dst: &mut BytesMut) {
    let bytes = text.as_bytes();
    if !bytes.iter().any(|&b| b == b'\r' || b == b'\n') {
        dst.put_slice(bytes);
        return;
    }
    dst.reserve(bytes.len());
    for &b in bytes {
        dst.put_u8(if b == b'\r' || b == b'\n' { b' ' } else { b });
    }
}

fn write_i64(val: i64, dst: &mut BytesMut) {
    let mut buf = itoa::Buffer::new();
    dst.put_slice(buf.format(val).as_bytes());
}
