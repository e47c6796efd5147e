//! Evaluation of keyspace commands.
//!
//! Subscription commands (`QWATCH`, `SUBSCRIBE`, `PUBLISH`) need the
//! shard's watch registry and are handled in `shard.rs`; everything here
//! only needs the keyspace.

use std::time::Duration;

use bytes::Bytes;
use cinder_protocol::Command;

use crate::keyspace::{Keyspace, SetCondition, TtlResult};
use crate::reply::Reply;

/// The outcome of a keyspace command: its reply (or error text) and the
/// keys whose contents changed, for live-query notification.
#[derive(Debug)]
pub(crate) struct Evaluated {
    pub reply: Result<Reply, String>,
    pub touched: Vec<String>,
}

impl Evaluated {
    fn read(reply: Result<Reply, String>) -> Self {
        Self {
            reply,
            touched: Vec::new(),
        }
    }

    fn wrote(reply: Reply, touched: Vec<String>) -> Self {
        Self {
            reply: Ok(reply),
            touched,
        }
    }
}

pub(crate) fn arity_error(name: &str) -> String {
    format!(
        "ERR wrong number of arguments for '{}' command",
        name.to_ascii_lowercase()
    )
}

pub(crate) fn evaluate(ks: &mut Keyspace, cmd: &Command) -> Evaluated {
    let args = cmd.args.as_slice();
    match (cmd.name.as_str(), args) {
        ("PING", []) => Evaluated::read(Ok(Reply::Status("PONG".into()))),
        ("PING", [msg]) | ("ECHO", [msg]) => Evaluated::read(Ok(Reply::bytes(msg.clone()))),
        ("GET", [key]) => Evaluated::read(Ok(ks.get(key).map_or(Reply::Nil, Reply::Bytes))),
        ("SET", [key, value, opts @ ..]) => set(ks, key, value, opts),
        ("DEL", keys) if !keys.is_empty() => {
            let removed: Vec<String> = keys.iter().filter(|k| ks.del(k)).cloned().collect();
            Evaluated::wrote(Reply::Int(removed.len() as i64), removed)
        }
        ("EXISTS", keys) if !keys.is_empty() => {
            let n = keys.iter().filter(|k| ks.exists(k)).count();
            Evaluated::read(Ok(Reply::Int(n as i64)))
        }
        ("INCR", [key]) => incr(ks, key, 1),
        ("DECR", [key]) => incr(ks, key, -1),
        ("EXPIRE", [key, secs]) => match secs.parse::<u64>() {
            Ok(secs) => {
                let hit = ks.expire(key, secs);
                Evaluated::read(Ok(Reply::Int(i64::from(hit))))
            }
            Err(_) => Evaluated::read(Err(
                "ERR value is not an integer or out of range".into()
            )),
        },
        ("TTL", [key]) => {
            let ttl = match ks.ttl(key) {
                TtlResult::Seconds(s) => s as i64,
                TtlResult::NoExpiry => -1,
                TtlResult::NotFound => -2,
            };
            Evaluated::read(Ok(Reply::Int(ttl)))
        }
        ("KEYS", [pattern]) => Evaluated::read(Ok(Reply::Array(
            ks.keys(pattern).into_iter().map(Reply::bytes).collect(),
        ))),
        (
            "PING" | "ECHO" | "GET" | "SET" | "DEL" | "EXISTS" | "INCR" | "DECR" | "EXPIRE"
            | "TTL" | "KEYS",
            _,
        ) => Evaluated::read(Err(arity_error(&cmd.name))),
        (name, _) => Evaluated::read(Err(format!(
            "ERR unknown command '{}'",
            name.to_ascii_lowercase()
        ))),
    }
}

fn set(ks: &mut Keyspace, key: &str, value: &str, opts: &[String]) -> Evaluated {
    let mut ttl = None;
    let mut condition = SetCondition::Always;
    let mut iter = opts.iter();

    while let Some(opt) = iter.next() {
        match opt.to_ascii_uppercase().as_str() {
            "NX" if condition == SetCondition::Always => condition = SetCondition::IfAbsent,
            "XX" if condition == SetCondition::Always => condition = SetCondition::IfPresent,
            unit @ ("EX" | "PX") if ttl.is_none() => {
                let amount = match iter.next().map(|n| n.parse::<u64>()) {
                    Some(Ok(n)) if n > 0 => n,
                    _ => return Evaluated::read(Err("ERR invalid expire time in 'set' command".into())),
                };
                ttl = Some(if unit == "EX" {
                    Duration::from_secs(amount)
                } else {
                    Duration::from_millis(amount)
                });
            }
            _ => return Evaluated::read(Err("ERR syntax error".into())),
        }
    }

    if ks.set(key.to_owned(), Bytes::from(value.to_owned()), ttl, condition) {
        Evaluated::wrote(Reply::ok(), vec![key.to_owned()])
    } else {
        Evaluated::read(Ok(Reply::Nil))
    }
}

fn incr(ks: &mut Keyspace, key: &str, delta: i64) -> Evaluated {
    match ks.incr_by(key, delta) {
        Ok(n) => Evaluated::wrote(Reply::Int(n), vec![key.to_owned()]),
        Err(e) => Evaluated::read(Err(e.to_string())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn run(ks: &mut Keyspace, line: &str) -> Result<Reply, String> {
        evaluate(ks, &Command::parse(line).unwrap()).reply
    }

    #[test]
    fn set_then_get() {
        let mut ks = Keyspace::new();
        assert_eq!(run(&mut ks, "SET k v"), Ok(Reply::ok()));
        assert_eq!(run(&mut ks, "GET k"), Ok(Reply::bytes("v")));
        assert_eq!(run(&mut ks, "GET missing"), Ok(Reply::Nil));
    }

    #[test]
    fn set_reports_touched_key_only_on_write() {
        let mut ks = Keyspace::new();
        let first = evaluate(&mut ks, &Command::parse("SET k v NX").unwrap());
        assert_eq!(first.touched, vec!["k"]);
        let second = evaluate(&mut ks, &Command::parse("SET k w NX").unwrap());
        assert_eq!(second.reply, Ok(Reply::Nil));
        assert!(second.touched.is_empty());
    }

    #[test]
    fn set_options() {
        let mut ks = Keyspace::new();
        assert_eq!(run(&mut ks, "SET k v EX 100"), Ok(Reply::ok()));
        assert!(matches!(run(&mut ks, "TTL k"), Ok(Reply::Int(n)) if n >= 99));
        assert_eq!(
            run(&mut ks, "SET k v EX 0"),
            Err("ERR invalid expire time in 'set' command".into())
        );
        assert_eq!(run(&mut ks, "SET k v BOGUS"), Err("ERR syntax error".into()));
        assert_eq!(run(&mut ks, "SET k v NX XX"), Err("ERR syntax error".into()));
    }

    #[test]
    fn del_and_exists_count_keys() {
        let mut ks = Keyspace::new();
        run(&mut ks, "SET a 1").unwrap();
        run(&mut ks, "SET b 2").unwrap();
        assert_eq!(run(&mut ks, "EXISTS a b c"), Ok(Reply::Int(2)));
        let del = evaluate(&mut ks, &Command::parse("DEL a c").unwrap());
        assert_eq!(del.reply, Ok(Reply::Int(1)));
        assert_eq!(del.touched, vec!["a"]);
    }

    #[test]
    fn ttl_sentinels() {
        let mut ks = Keyspace::new();
        assert_eq!(run(&mut ks, "TTL nope"), Ok(Reply::Int(-2)));
        run(&mut ks, "SET k v").unwrap();
        assert_eq!(run(&mut ks, "TTL k"), Ok(Reply::Int(-1)));
        assert_eq!(run(&mut ks, "EXPIRE k 10"), Ok(Reply::Int(1)));
        assert_eq!(run(&mut ks, "EXPIRE nope 10"), Ok(Reply::Int(0)));
    }

    #[test]
    fn counters() {
        let mut ks = Keyspace::new();
        assert_eq!(run(&mut ks, "INCR n"), Ok(Reply::Int(1)));
        assert_eq!(run(&mut ks, "DECR n"), Ok(Reply::Int(0)));
        run(&mut ks, "SET s abc").unwrap();
        assert_eq!(
            run(&mut ks, "INCR s"),
            Err("ERR value is not an integer or out of range".into())
        );
    }

    #[test]
    fn errors() {
        let mut ks = Keyspace::new();
        assert_eq!(
            run(&mut ks, "GET"),
            Err("ERR wrong number of arguments for 'get' command".into())
        );
        assert_eq!(
            run(&mut ks, "FLY away"),
            Err("ERR unknown command 'fly'".into())
        );
    }

    #[test]
    fn keys_and_ping() {
        let mut ks = Keyspace::new();
        run(&mut ks, "SET user:1 a").unwrap();
        run(&mut ks, "SET user:2 b").unwrap();
        assert_eq!(
            run(&mut ks, "KEYS user:*"),
            Ok(Reply::Array(vec![Reply::bytes("user:1"), Reply::bytes("user:2")]))
        );
        assert_eq!(run(&mut ks, "PING"), Ok(Reply::Status("PONG".into())));
        assert_eq!(run(&mut ks, "ECHO hi"), Ok(Reply::bytes("hi")));
    }
}
