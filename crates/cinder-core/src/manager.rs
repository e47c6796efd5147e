//! The shard manager: owner of every shard and of the routing tables
//! responses and updates travel through.
//!
//! Callers register a worker queue once, then send any number of
//! [`StoreOp`]s tagged with that worker's id. Live-update consumers
//! subscribe to the broadcast stream and filter by [`ClientId`].

use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::{broadcast, mpsc};
use tracing::debug;

use crate::error::ShardError;
use crate::registry::CommandSet;
use crate::shard::{
    self, ClientId, ShardContext, ShardHandle, ShardId, StoreOp, StoreResponse, UpdateEvent,
    WorkerId, WorkerMap,
};

/// Inbound queue capacity per shard.
pub const DEFAULT_SHARD_BUFFER: usize = 256;

/// Capacity of the update broadcast. A subscriber that falls further
/// behind than this loses the oldest events.
pub const DEFAULT_UPDATE_BUFFER: usize = 1024;

#[derive(Debug, Clone)]
pub struct EngineConfig {
    pub shard_count: usize,
    pub channel_buffer: usize,
    pub update_buffer: usize,
    /// Commands whose results are produced natively rather than as RESP.
    pub migrated: CommandSet,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            shard_count: 1,
            channel_buffer: DEFAULT_SHARD_BUFFER,
            update_buffer: DEFAULT_UPDATE_BUFFER,
            migrated: CommandSet::migrated_defaults(),
        }
    }
}

/// Handles to all shard tasks plus the worker and update routing.
///
/// `Clone` is cheap: every field is a handle or an `Arc`.
#[derive(Debug, Clone)]
pub struct ShardManager {
    shards: Vec<ShardHandle>,
    workers: WorkerMap,
    updates: broadcast::Sender<UpdateEvent>,
    migrated: CommandSet,
}

impl ShardManager {
    /// Spawns `config.shard_count` shard tasks.
    ///
    /// Panics if `shard_count` is zero or exceeds `u16::MAX`.
    pub fn new(config: EngineConfig) -> Self {
        assert!(config.shard_count > 0, "shard count must be at least 1");
        assert!(
            config.shard_count <= usize::from(u16::MAX),
            "shard count must fit in a u16"
        );

        let workers: WorkerMap = Arc::new(DashMap::new());
        let (updates, _) = broadcast::channel(config.update_buffer.max(1));

        let shards = (0..config.shard_count)
            .map(|i| {
                let ctx = ShardContext {
                    migrated: config.migrated.clone(),
                    workers: Arc::clone(&workers),
                    updates: updates.clone(),
                };
                shard::spawn_shard(i as ShardId, config.channel_buffer.max(1), ctx)
            })
            .collect();

        Self {
            shards,
            workers,
            updates,
            migrated: config.migrated,
        }
    }

    pub fn shard_count(&self) -> usize {
        self.shards.len()
    }

    pub fn shard(&self, id: ShardId) -> Result<&ShardHandle, ShardError> {
        self.shards
            .get(usize::from(id))
            .ok_or(ShardError::UnknownShard(id))
    }

    /// Routes `op` to the shard it names.
    pub async fn send(&self, op: StoreOp) -> Result<(), ShardError> {
        self.shard(op.shard_id)?.send(op).await
    }

    /// The migrated-command set this engine encodes by.
    pub fn migrated(&self) -> &CommandSet {
        &self.migrated
    }

    /// Registers the queue responses for `id` are delivered to. A second
    /// registration under the same id replaces the first.
    pub fn register_worker(&self, id: WorkerId, tx: mpsc::Sender<StoreResponse>) {
        debug!(worker = %id, "worker registered");
        self.workers.insert(id, tx);
    }

    pub fn unregister_worker(&self, id: &WorkerId) -> bool {
        let removed = self.workers.remove(id).is_some();
        if removed {
            debug!(worker = %id, "worker unregistered");
        }
        removed
    }

    pub fn worker_count(&self) -> usize {
        self.workers.len()
    }

    /// A fresh receiver on the update stream. It sees only events
    /// published after this call.
    pub fn subscribe_updates(&self) -> broadcast::Receiver<UpdateEvent> {
        self.updates.subscribe()
    }

    /// Tells every shard to drop the subscriptions held by `client`.
    pub async fn forget_client(&self, client: ClientId) {
        for shard in &self.shards {
            if let Err(e) = shard.forget_client(client).await {
                debug!(shard_id = shard.id(), %client, "forget_client: {e}");
            }
        }
    }
}
