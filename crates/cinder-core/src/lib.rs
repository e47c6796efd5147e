//! cinder-core: the sharded store behind the websocket bridge.
//!
//! Each shard is a tokio task that exclusively owns a [`Keyspace`]
//! partition and a [`WatchRegistry`] of live subscriptions. Callers talk
//! to shards through the [`ShardManager`]:
//!
//! - requests go onto a shard's bounded inbound queue as [`StoreOp`]s;
//! - responses come back on the queue the caller registered for its
//!   [`WorkerId`], so a shard never needs a reply channel per request;
//! - changes that affect a live subscription are published once on a
//!   broadcast stream of [`UpdateEvent`]s tagged with the subscriber's
//!   [`ClientId`].
//!
//! Whether a command's result travels as a native [`Reply`] or as RESP
//! bytes is decided by the [`CommandSet`] of migrated commands given to
//! the manager at construction.

pub mod error;
mod eval;
pub mod glob;
pub mod keyspace;
pub mod manager;
pub mod query;
pub mod registry;
pub mod reply;
pub mod shard;
pub mod watch;

pub use error::ShardError;
pub use keyspace::{Keyspace, TtlResult};
pub use manager::{EngineConfig, ShardManager};
pub use query::WatchQuery;
pub use registry::CommandSet;
pub use reply::Reply;
pub use shard::{
    ClientId, ClientRegistration, EvalError, EvalResponse, Payload, ShardHandle, ShardId,
    StoreOp, StoreResponse, UpdateEvent, WorkerId,
};
pub use watch::WatchRegistry;
