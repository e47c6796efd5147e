//! Store results to JSON.
//!
//! A result reaches the transport as exactly one JSON value. Commands in
//! the migrated set hand back a native [`Reply`]; all others hand back
//! RESP bytes that are decoded here first. Either way the top-level value
//! then gets the same canonical rendering, so a client cannot tell which
//! path produced it.

use cinder_core::{CommandSet, EvalResponse, Payload, Reply, StoreResponse, UpdateEvent};
use cinder_protocol::{decode_one, ProtocolError};
use serde_json::Value;
use thiserror::Error;
use tracing::warn;

/// Sent in place of a result that could not be decoded.
pub const INTERNAL_ERROR: &str = "error: 500 Internal Server Error";

/// Sent when the decoded value could not be serialized.
pub const MARSHAL_ERROR: &str = "error: marshaling json";

/// Anything a connection can be asked to render.
#[derive(Debug)]
pub enum Response {
    Shard(StoreResponse),
    Update(UpdateEvent),
}

impl Response {
    fn into_eval(self) -> EvalResponse {
        match self {
            Response::Shard(r) => r.eval,
            Response::Update(u) => u.eval,
        }
    }
}

#[derive(Debug, Error)]
pub enum TranscodeError {
    #[error("undecodable RESP payload: {0}")]
    Decode(#[from] ProtocolError),

    #[error("native payload for non-migrated command {0}")]
    UnexpectedShape(String),
}

#[derive(Debug, Clone)]
pub struct Transcoder {
    migrated: CommandSet,
}

impl Transcoder {
    pub fn new(migrated: CommandSet) -> Self {
        Self { migrated }
    }

    /// Renders a response as the text of one outbound frame. Failures
    /// become one of the fixed (plain text) notices.
    pub fn render(&self, command: &str, response: Response) -> String {
        let value = match self.to_json(command, response) {
            Ok(value) => value,
            Err(e) => {
                warn!(command, "transcoding failed: {e}");
                return INTERNAL_ERROR.to_owned();
            }
        };
        serde_json::to_string(&value).unwrap_or_else(|e| {
            warn!(command, "json encoding failed: {e}");
            MARSHAL_ERROR.to_owned()
        })
    }

    /// Decodes a response into its JSON value. `command` is the command
    /// the response belongs to (for updates, the subscribing command).
    pub fn to_json(&self, command: &str, response: Response) -> Result<Value, TranscodeError> {
        let eval = response.into_eval();
        let reply = if self.migrated.contains(command) {
            match eval.result {
                Ok(Payload::Native(reply)) => reply,
                Ok(Payload::Encoded(bytes)) => Reply::Bytes(bytes),
                Err(e) => Reply::Error(e.to_string()),
            }
        } else {
            match eval.result {
                Ok(Payload::Encoded(bytes)) => decode_one(&bytes)?.into(),
                Err(e) => decode_one(e.0.as_bytes())?.into(),
                Ok(Payload::Native(_)) => {
                    return Err(TranscodeError::UnexpectedShape(command.to_owned()))
                }
            }
        };
        Ok(top_level(reply))
    }
}

fn top_level(reply: Reply) -> Value {
    match reply {
        Reply::Nil => Value::String("(nil)".into()),
        Reply::Int(n @ (-2 | -1 | 0 | 1)) => Value::String(n.to_string()),
        Reply::Array(items) if items.is_empty() => Value::String("*0".into()),
        other => nested(other),
    }
}

fn nested(reply: Reply) -> Value {
    match reply {
        Reply::Nil => Value::Null,
        Reply::Status(s) | Reply::Error(s) => Value::String(s),
        Reply::Int(n) => Value::from(n),
        Reply::Bytes(b) => Value::String(String::from_utf8_lossy(&b).into_owned()),
        Reply::Array(items) => Value::Array(items.into_iter().map(nested).collect()),
    }
}

#[cfg(test)]
mod tests {
    use bytes::Bytes;
    use cinder_core::{ClientId, EvalError, WorkerId};
    use serde_json::json;

    use super::*;

    fn transcoder() -> Transcoder {
        Transcoder::new(CommandSet::migrated_defaults())
    }

    fn shard(result: Result<Payload, EvalError>) -> Response {
        Response::Shard(StoreResponse {
            worker_id: WorkerId::new("wsServer:1"),
            shard_id: 0,
            eval: EvalResponse { result },
        })
    }

    fn native(reply: Reply) -> Response {
        shard(Ok(Payload::Native(reply)))
    }

    fn encoded(resp: &'static str) -> Response {
        shard(Ok(Payload::Encoded(Bytes::from(resp))))
    }

    #[test]
    fn sentinels_on_the_migrated_path() {
        let t = transcoder();
        let cases = [
            (Reply::Nil, "(nil)"),
            (Reply::ok(), "OK"),
            (Reply::Status("QUEUED".into()), "QUEUED"),
            (Reply::Int(0), "0"),
            (Reply::Int(1), "1"),
            (Reply::Int(-1), "-1"),
            (Reply::Int(-2), "-2"),
            (Reply::Array(vec![]), "*0"),
        ];
        for (reply, text) in cases {
            assert_eq!(t.to_json("GET", native(reply)).unwrap(), json!(text));
        }
    }

    #[test]
    fn sentinels_on_the_legacy_path() {
        let t = transcoder();
        let cases = [
            ("_\r\n", "(nil)"),
            ("$-1\r\n", "(nil)"),
            ("+OK\r\n", "OK"),
            ("+QUEUED\r\n", "QUEUED"),
            (":0\r\n", "0"),
            (":1\r\n", "1"),
            (":-1\r\n", "-1"),
            (":-2\r\n", "-2"),
            ("*0\r\n", "*0"),
        ];
        for (resp, text) in cases {
            assert_eq!(t.to_json("INCR", encoded(resp)).unwrap(), json!(text));
        }
    }

    #[test]
    fn bytes_become_text() {
        let t = transcoder();
        assert_eq!(t.to_json("GET", native(Reply::bytes("v"))).unwrap(), json!("v"));
        assert_eq!(t.to_json("ECHO", encoded("$5\r\nhello\r\n")).unwrap(), json!("hello"));
    }

    #[test]
    fn other_integers_stay_numbers() {
        let t = transcoder();
        assert_eq!(t.to_json("INCR", encoded(":42\r\n")).unwrap(), json!(42));
    }

    #[test]
    fn nested_arrays_keep_nulls_and_numbers() {
        let t = transcoder();
        let reply = Reply::Array(vec![
            Reply::bytes("qwatch"),
            Reply::Nil,
            Reply::Int(1),
            Reply::Array(vec![Reply::Array(vec![Reply::bytes("k"), Reply::bytes("v")])]),
        ]);
        let resp = shard(Ok(Payload::Encoded(reply.to_frame().to_bytes())));
        assert_eq!(
            t.to_json("QWATCH", resp).unwrap(),
            json!(["qwatch", null, 1, [["k", "v"]]])
        );
    }

    #[test]
    fn errors_render_as_their_text() {
        let t = transcoder();
        let migrated = shard(Err(EvalError("ERR syntax error".into())));
        assert_eq!(t.to_json("SET", migrated).unwrap(), json!("ERR syntax error"));

        let legacy = shard(Err(EvalError("-ERR unknown command 'fly'\r\n".into())));
        assert_eq!(
            t.to_json("FLY", legacy).unwrap(),
            json!("ERR unknown command 'fly'")
        );
    }

    #[test]
    fn undecodable_payload_is_an_internal_error() {
        let t = transcoder();
        assert!(matches!(
            t.to_json("INCR", encoded("?garbage\r\n")),
            Err(TranscodeError::Decode(_))
        ));
        assert_eq!(t.render("INCR", encoded("$10\r\nshort\r\n")), INTERNAL_ERROR);
    }

    #[test]
    fn native_payload_on_legacy_path_is_a_shape_error() {
        let t = transcoder();
        assert!(matches!(
            t.to_json("INCR", native(Reply::Int(3))),
            Err(TranscodeError::UnexpectedShape(_))
        ));
    }

    #[test]
    fn updates_are_classified_by_the_subscribing_command() {
        let t = transcoder();
        let update = Response::Update(UpdateEvent {
            client_id: ClientId(4),
            eval: EvalResponse {
                result: Ok(Payload::Encoded(Bytes::from("$3\r\nnew\r\n"))),
            },
        });
        assert_eq!(t.render("QWATCH", update), "\"new\"");
    }

    #[test]
    fn rendering_is_repeatable() {
        let t = transcoder();
        let a = t.render("GET", native(Reply::bytes("v")));
        let b = t.render("GET", native(Reply::bytes("v")));
        assert_eq!(a, b);
        assert_eq!(a, "\"v\"");
    }
}
