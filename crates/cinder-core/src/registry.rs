//! Immutable command-name sets.
//!
//! Two tables drive routing decisions at the edges of the store: which
//! commands have been migrated to native replies, and (on the server side)
//! which commands a transport refuses outright. Both are plain sets of
//! upper-case names, built once and shared read-only.

use std::collections::HashSet;
use std::sync::Arc;

/// Commands whose results are produced as native [`Reply`](crate::Reply)
/// values. Everything else still answers in RESP bytes.
pub const DEFAULT_MIGRATED: &[&str] = &["PING", "SET", "GET", "DEL", "TTL", "EXPIRE"];

/// Every command the store evaluates.
pub const STORE_COMMANDS: &[&str] = &[
    "PING", "ECHO", "GET", "SET", "DEL", "EXISTS", "INCR", "DECR", "EXPIRE", "TTL", "KEYS",
    "PUBLISH", "SUBSCRIBE", "QWATCH",
];

/// A cheaply cloneable, read-only set of command names.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandSet(Arc<HashSet<String>>);

impl CommandSet {
    /// Builds a set from command names. Names are upper-cased.
    pub fn new<I, S>(names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        Self(Arc::new(
            names
                .into_iter()
                .map(|n| n.as_ref().to_ascii_uppercase())
                .collect(),
        ))
    }

    /// The default set of migrated commands.
    pub fn migrated_defaults() -> Self {
        Self::new(DEFAULT_MIGRATED)
    }

    /// Returns true if `name` (already upper-cased) is in the set.
    pub fn contains(&self, name: &str) -> bool {
        self.0.contains(name)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}
