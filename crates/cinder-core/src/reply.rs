//! Native command results.
//!
//! A [`Reply`] is what a migrated command hands back directly, and what a
//! legacy command's RESP bytes decode into. The two conversions to and
//! from [`Frame`] are the only place the store touches the wire format.

use bytes::Bytes;
use cinder_protocol::Frame;

/// A decoded command result.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Reply {
    /// Absent value (missing key, failed conditional write).
    Nil,
    /// Short status text such as `OK` or `QUEUED`.
    Status(String),
    Int(i64),
    /// Binary-safe payload, usually a stored value.
    Bytes(Bytes),
    Array(Vec<Reply>),
    /// An error that travelled inside an encoded response.
    Error(String),
}

impl Reply {
    pub fn ok() -> Self {
        Reply::Status("OK".into())
    }

    pub fn bytes(data: impl Into<Bytes>) -> Self {
        Reply::Bytes(data.into())
    }

    /// Encodes this reply as a RESP frame.
    pub fn to_frame(&self) -> Frame {
        match self {
            Reply::Nil => Frame::Null,
            Reply::Status(s) => Frame::Simple(s.clone()),
            Reply::Int(n) => Frame::Integer(*n),
            Reply::Bytes(b) => Frame::Bulk(b.clone()),
            Reply::Array(items) => Frame::Array(items.iter().map(Reply::to_frame).collect()),
            Reply::Error(msg) => Frame::Error(msg.clone()),
        }
    }
}

impl From<Frame> for Reply {
    fn from(frame: Frame) -> Self {
        match frame {
            Frame::Null => Reply::Nil,
            Frame::Simple(s) => Reply::Status(s),
            Frame::Integer(n) => Reply::Int(n),
            Frame::Bulk(b) => Reply::Bytes(b),
            Frame::Array(items) => Reply::Array(items.into_iter().map(Reply::from).collect()),
            Frame::Error(msg) => Reply::Error(msg),
        }
    }
}
