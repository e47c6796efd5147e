//! Error types for the core engine.

use thiserror::Error;

/// Errors returned by shard or manager operations.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ShardError {
    /// The target shard is no longer running (channel closed).
    #[error("shard unavailable")]
    Unavailable,

    /// No shard exists with this index.
    #[error("no such shard: {0}")]
    UnknownShard(u16),
}
