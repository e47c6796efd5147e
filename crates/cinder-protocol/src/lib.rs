//! cinder-protocol: wire formats spoken at the edges of the bridge.
//!
//! Two unrelated formats live here:
//!
//! - the RESP encoding the store uses for results of commands that have
//!   not been migrated to native replies ([`Frame`], [`parse_frame`],
//!   [`decode_one`], [`Frame::serialize`]);
//! - the plain-text command syntax clients send over the websocket
//!   ([`Command::parse`]).
//!
//! # quick start
//!
//! ```
//! use bytes::BytesMut;
//! use cinder_protocol::{decode_one, Command, Frame};
//!
//! let frame = decode_one(b"+OK\r\n").unwrap();
//! assert_eq!(frame, Frame::Simple("OK".into()));
//!
//! let mut buf = BytesMut::new();
//! frame.serialize(&mut buf);
//! assert_eq!(&buf[..], b"+OK\r\n");
//!
//! let cmd = Command::parse("set greeting hello").unwrap();
//! assert_eq!(cmd.name, "SET");
//! assert_eq!(cmd.args, vec!["greeting", "hello"]);
//! ```

pub mod command;
pub mod error;
pub mod parse;
mod serialize;
pub mod types;

pub use command::Command;
pub use error::ProtocolError;
pub use parse::{decode_one, parse_frame};
pub use types::Frame;
