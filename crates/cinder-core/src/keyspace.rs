//! A shard's partition of string keys.
//!
//! Expiry is tracked as an absolute monotonic timestamp in milliseconds
//! (0 = no expiry). Expired entries are removed lazily on access and in
//! bulk by [`Keyspace::purge_expired`], which the shard calls on a tick.

use std::collections::HashMap;
use std::sync::OnceLock;
use std::time::{Duration, Instant};

use bytes::Bytes;
use thiserror::Error;

use crate::glob::glob_match;

/// Sentinel meaning "no expiry".
const NO_EXPIRY: u64 = 0;

/// Milliseconds since the first call in this process.
fn now_ms() -> u64 {
    static START: OnceLock<Instant> = OnceLock::new();
    START.get_or_init(Instant::now).elapsed().as_millis() as u64
}

#[derive(Debug, Clone)]
struct Entry {
    value: Bytes,
    expires_at_ms: u64,
}

impl Entry {
    fn is_expired(&self, now: u64) -> bool {
        self.expires_at_ms != NO_EXPIRY && now >= self.expires_at_ms
    }
}

/// Conditional-write flag for SET.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SetCondition {
    #[default]
    Always,
    /// Only write if the key does not exist (NX).
    IfAbsent,
    /// Only write if the key already exists (XX).
    IfPresent,
}

/// Result of a TTL query, matching Redis semantics.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TtlResult {
    Seconds(u64),
    NoExpiry,
    NotFound,
}

/// Errors from INCR/DECR.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum IncrError {
    #[error("ERR value is not an integer or out of range")]
    NotAnInteger,
    #[error("ERR increment or decrement would overflow")]
    Overflow,
}

#[derive(Debug, Default)]
pub struct Keyspace {
    entries: HashMap<String, Entry>,
}

impl Keyspace {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of live (unexpired) keys.
    pub fn len(&self) -> usize {
        let now = now_ms();
        self.entries.values().filter(|e| !e.is_expired(now)).count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn get(&mut self, key: &str) -> Option<Bytes> {
        self.live(key).map(|e| e.value.clone())
    }

    pub fn exists(&mut self, key: &str) -> bool {
        self.live(key).is_some()
    }

    /// Stores `value` under `key`, honoring the write condition.
    /// Returns false when the condition prevented the write.
    pub fn set(
        &mut self,
        key: String,
        value: Bytes,
        ttl: Option<Duration>,
        condition: SetCondition,
    ) -> bool {
        let present = self.live(&key).is_some();
        match condition {
            SetCondition::IfAbsent if present => return false,
            SetCondition::IfPresent if !present => return false,
            _ => {}
        }
        let expires_at_ms = ttl
            .map(|d| now_ms().saturating_add(d.as_millis() as u64).max(1))
            .unwrap_or(NO_EXPIRY);
        self.entries.insert(
            key,
            Entry {
                value,
                expires_at_ms,
            },
        );
        true
    }

    pub fn del(&mut self, key: &str) -> bool {
        self.live(key).is_some() && self.entries.remove(key).is_some()
    }

    /// Adds `delta` to the integer stored at `key` (missing keys count as 0).
    /// Keeps any existing expiry.
    pub fn incr_by(&mut self, key: &str, delta: i64) -> Result<i64, IncrError> {
        let current = match self.live(key) {
            Some(entry) => std::str::from_utf8(&entry.value)
                .ok()
                .and_then(|s| s.parse::<i64>().ok())
                .ok_or(IncrError::NotAnInteger)?,
            None => 0,
        };
        let next = current.checked_add(delta).ok_or(IncrError::Overflow)?;
        let value = Bytes::from(next.to_string());
        match self.entries.get_mut(key) {
            Some(entry) => entry.value = value,
            None => {
                self.entries.insert(
                    key.to_owned(),
                    Entry {
                        value,
                        expires_at_ms: NO_EXPIRY,
                    },
                );
            }
        }
        Ok(next)
    }

    /// Sets a TTL in seconds on an existing key.
    pub fn expire(&mut self, key: &str, seconds: u64) -> bool {
        let deadline = now_ms().saturating_add(seconds.saturating_mul(1000)).max(1);
        match self.live_mut(key) {
            Some(entry) => {
                entry.expires_at_ms = deadline;
                true
            }
            None => false,
        }
    }

    pub fn ttl(&mut self, key: &str) -> TtlResult {
        match self.live(key) {
            None => TtlResult::NotFound,
            Some(e) if e.expires_at_ms == NO_EXPIRY => TtlResult::NoExpiry,
            Some(e) => TtlResult::Seconds(e.expires_at_ms.saturating_sub(now_ms()) / 1000),
        }
    }

    /// Live keys matching a glob pattern, sorted.
    pub fn keys(&self, pattern: &str) -> Vec<String> {
        let mut keys: Vec<_> = self
            .scan(pattern)
            .into_iter()
            .map(|(key, _)| key)
            .collect();
        keys.sort_unstable();
        keys
    }

    /// Live entries whose key matches a glob pattern, sorted by key.
    pub fn scan(&self, pattern: &str) -> Vec<(String, Bytes)> {
        let now = now_ms();
        let mut out: Vec<_> = self
            .entries
            .iter()
            .filter(|(k, e)| !e.is_expired(now) && glob_match(pattern, k))
            .map(|(k, e)| (k.clone(), e.value.clone()))
            .collect();
        out.sort_unstable_by(|a, b| a.0.cmp(&b.0));
        out
    }

    /// Removes every expired entry and returns the removed keys.
    pub fn purge_expired(&mut self) -> Vec<String> {
        let now = now_ms();
        let expired: Vec<String> = self
            .entries
            .iter()
            .filter(|(_, e)| e.is_expired(now))
            .map(|(k, _)| k.clone())
            .collect();
        for key in &expired {
            self.entries.remove(key);
        }
        expired
    }

    /// Returns the entry if it exists and is not expired, removing it
    /// first if it has expired.
    fn live(&mut self, key: &str) -> Option<&Entry> {
        self.live_mut(key).map(|e| &*e)
    }

    fn live_mut(&mut self, key: &str) -> Option<&mut Entry> {
        let now = now_ms();
        if self.entries.get(key).is_some_and(|e| e.is_expired(now)) {
            self.entries.remove(key);
            return None;
        }
        self.entries.get_mut(key)
    }
}
