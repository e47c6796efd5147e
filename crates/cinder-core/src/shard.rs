//! Shard: an independent partition of the store.
//!
//! Each shard runs as a single tokio task that exclusively owns its
//! [`Keyspace`] and [`WatchRegistry`]. Requests arrive on a bounded mpsc
//! queue and are executed serially, so no locking is needed on either.
//!
//! Responses are not returned on a per-request channel. Each request
//! names the [`WorkerId`] that issued it, and the shard delivers the
//! result onto whatever queue that worker registered with the manager.
//! A worker has at most one request in flight, so the delivery uses
//! `try_send` and never blocks the shard.
//!
//! Changes that affect a live subscription go out once on the shared
//! broadcast stream, tagged with the subscriber's [`ClientId`].

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use cinder_protocol::{Command, Frame};
use dashmap::DashMap;
use thiserror::Error;
use tokio::sync::{broadcast, mpsc};
use tracing::{debug, warn};

use crate::error::ShardError;
use crate::eval::{self, arity_error};
use crate::keyspace::Keyspace;
use crate::query::WatchQuery;
use crate::registry::CommandSet;
use crate::reply::Reply;
use crate::watch::WatchRegistry;

/// How often the shard purges expired keys.
const EXPIRY_TICK: Duration = Duration::from_millis(100);

/// Index of a shard within the manager.
pub type ShardId = u16;

/// Identity of a request issuer. Responses are routed back by this name.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct WorkerId(Arc<str>);

impl WorkerId {
    pub fn new(name: impl Into<Arc<str>>) -> Self {
        Self(name.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for WorkerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Identity of a subscriber. Update events carry it so each connection
/// can pick out its own.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ClientId(pub u32);

impl fmt::Display for ClientId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Attached to subscription requests so the shard knows whom to notify.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ClientRegistration {
    pub client_id: ClientId,
}

/// A command addressed to one shard.
#[derive(Debug, Clone)]
pub struct StoreOp {
    pub command: Command,
    pub worker_id: WorkerId,
    pub shard_id: ShardId,
    /// Set for requests that came in over a websocket.
    pub websocket_op: bool,
    pub client: Option<ClientRegistration>,
}

/// A command result in one of the two wire shapes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Payload {
    /// RESP bytes, produced for commands that are not migrated.
    Encoded(Bytes),
    /// A structured value, produced for migrated commands.
    Native(Reply),
}

/// A failed evaluation. For non-migrated commands the message is itself
/// RESP-encoded (`-ERR ...\r\n`).
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{0}")]
pub struct EvalError(pub String);

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EvalResponse {
    pub result: Result<Payload, EvalError>,
}

/// The single response to a [`StoreOp`].
#[derive(Debug, Clone)]
pub struct StoreResponse {
    pub worker_id: WorkerId,
    pub shard_id: ShardId,
    pub eval: EvalResponse,
}

/// An asynchronous notification for one subscriber.
#[derive(Debug, Clone)]
pub struct UpdateEvent {
    pub client_id: ClientId,
    pub eval: EvalResponse,
}

#[derive(Debug)]
pub(crate) enum ShardMessage {
    Op(StoreOp),
    /// Drop every subscription held by a client.
    ForgetClient(ClientId),
}

pub(crate) type WorkerMap = Arc<DashMap<WorkerId, mpsc::Sender<StoreResponse>>>;

/// Cloneable sender side of a shard's inbound queue.
#[derive(Debug, Clone)]
pub struct ShardHandle {
    id: ShardId,
    tx: mpsc::Sender<ShardMessage>,
}

impl ShardHandle {
    pub fn id(&self) -> ShardId {
        self.id
    }

    /// Enqueues a request, waiting for queue capacity. The response is
    /// delivered to the queue registered for `op.worker_id`.
    ///
    /// Returns `ShardError::Unavailable` if the shard task has stopped.
    pub async fn send(&self, op: StoreOp) -> Result<(), ShardError> {
        self.tx
            .send(ShardMessage::Op(op))
            .await
            .map_err(|_| ShardError::Unavailable)
    }

    pub(crate) async fn forget_client(&self, client: ClientId) -> Result<(), ShardError> {
        self.tx
            .send(ShardMessage::ForgetClient(client))
            .await
            .map_err(|_| ShardError::Unavailable)
    }
}

/// What a shard shares with the rest of the engine.
pub(crate) struct ShardContext {
    pub migrated: CommandSet,
    pub workers: WorkerMap,
    pub updates: broadcast::Sender<UpdateEvent>,
}

/// Spawns a shard task and returns its handle. Must be called inside a
/// tokio runtime.
pub(crate) fn spawn_shard(id: ShardId, buffer: usize, ctx: ShardContext) -> ShardHandle {
    let (tx, rx) = mpsc::channel(buffer);
    tokio::spawn(run_shard(id, rx, ctx));
    ShardHandle { id, tx }
}

/// The shard's main loop. Runs until every handle has been dropped.
async fn run_shard(id: ShardId, mut rx: mpsc::Receiver<ShardMessage>, ctx: ShardContext) {
    let mut shard = Shard {
        id,
        keyspace: Keyspace::new(),
        watches: WatchRegistry::new(),
        ctx,
    };

    let mut expiry_tick = tokio::time::interval(EXPIRY_TICK);
    expiry_tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

    loop {
        tokio::select! {
            msg = rx.recv() => match msg {
                Some(msg) => {
                    shard.process(msg);
                    while let Ok(msg) = rx.try_recv() {
                        shard.process(msg);
                    }
                }
                None => break,
            },
            _ = expiry_tick.tick() => {
                let expired = shard.keyspace.purge_expired();
                if !expired.is_empty() {
                    debug!(shard_id = id, count = expired.len(), "purged expired keys");
                    shard.notify_watchers(&expired);
                }
            }
        }
    }

    debug!(shard_id = id, "shard stopped");
}

struct Shard {
    id: ShardId,
    keyspace: Keyspace,
    watches: WatchRegistry,
    ctx: ShardContext,
}

impl Shard {
    fn process(&mut self, msg: ShardMessage) {
        match msg {
            ShardMessage::Op(op) => {
                let eval = self.execute(&op);
                self.deliver(op.worker_id, eval);
            }
            ShardMessage::ForgetClient(client) => {
                if self.watches.forget(client) {
                    debug!(shard_id = self.id, %client, "dropped client subscriptions");
                }
            }
        }
    }

    fn execute(&mut self, op: &StoreOp) -> EvalResponse {
        let name = op.command.name.as_str();
        debug!(
            shard_id = self.id,
            worker = %op.worker_id,
            command = name,
            websocket_op = op.websocket_op,
            "executing"
        );

        let (reply, touched) = match name {
            "QWATCH" => (self.qwatch(op), Vec::new()),
            "SUBSCRIBE" => (self.subscribe(op), Vec::new()),
            "PUBLISH" => (self.publish(&op.command), Vec::new()),
            _ => {
                let evaluated = eval::evaluate(&mut self.keyspace, &op.command);
                (evaluated.reply, evaluated.touched)
            }
        };

        let eval = encode(&self.ctx.migrated, name, reply);
        if !touched.is_empty() {
            self.notify_watchers(&touched);
        }
        eval
    }

    fn deliver(&self, worker_id: WorkerId, eval: EvalResponse) {
        let Some(tx) = self.ctx.workers.get(&worker_id).map(|r| r.value().clone()) else {
            warn!(shard_id = self.id, worker = %worker_id, "response for unknown worker dropped");
            return;
        };
        let response = StoreResponse {
            worker_id,
            shard_id: self.id,
            eval,
        };
        if let Err(e) = tx.try_send(response) {
            match e {
                mpsc::error::TrySendError::Full(r) => {
                    warn!(shard_id = self.id, worker = %r.worker_id, "worker queue full, response dropped")
                }
                mpsc::error::TrySendError::Closed(r) => {
                    debug!(shard_id = self.id, worker = %r.worker_id, "worker gone, response dropped")
                }
            }
        }
    }

    fn qwatch(&mut self, op: &StoreOp) -> Result<Reply, String> {
        let client = registered_client(op)?;
        let [text] = op.command.args.as_slice() else {
            return Err(arity_error(&op.command.name));
        };
        let query = WatchQuery::parse(text).map_err(|e| format!("ERR invalid query: {e}"))?;
        let reply = query_result(&self.keyspace, &query);
        self.watches.add_query(client, query);
        Ok(reply)
    }

    fn subscribe(&mut self, op: &StoreOp) -> Result<Reply, String> {
        let client = registered_client(op)?;
        let channels = op.command.args.as_slice();
        if channels.is_empty() {
            return Err(arity_error(&op.command.name));
        }
        let mut confirmations: Vec<Reply> = channels
            .iter()
            .map(|ch| {
                let count = self.watches.add_channel(client, ch);
                Reply::Array(vec![
                    Reply::bytes("subscribe"),
                    Reply::bytes(ch.clone()),
                    Reply::Int(count as i64),
                ])
            })
            .collect();
        if confirmations.len() == 1 {
            Ok(confirmations.remove(0))
        } else {
            Ok(Reply::Array(confirmations))
        }
    }

    fn publish(&self, cmd: &Command) -> Result<Reply, String> {
        let [channel, message] = cmd.args.as_slice() else {
            return Err(arity_error(&cmd.name));
        };
        let subscribers = self.watches.channel_subscribers(channel);
        for &client_id in &subscribers {
            let body = Reply::Array(vec![
                Reply::bytes("message"),
                Reply::bytes(channel.clone()),
                Reply::bytes(message.clone()),
            ]);
            self.broadcast(UpdateEvent {
                client_id,
                eval: encode(&self.ctx.migrated, "SUBSCRIBE", Ok(body)),
            });
        }
        Ok(Reply::Int(subscribers.len() as i64))
    }

    /// Sends every live query that covers one of `keys` its fresh result set.
    fn notify_watchers(&self, keys: &[String]) {
        for (client_id, query) in self.watches.queries_touching(keys) {
            let reply = query_result(&self.keyspace, query);
            self.broadcast(UpdateEvent {
                client_id,
                eval: encode(&self.ctx.migrated, "QWATCH", Ok(reply)),
            });
        }
    }

    fn broadcast(&self, event: UpdateEvent) {
        let client = event.client_id;
        if self.ctx.updates.send(event).is_err() {
            debug!(shard_id = self.id, %client, "no update listeners");
        }
    }
}

fn registered_client(op: &StoreOp) -> Result<ClientId, String> {
    op.client.map(|c| c.client_id).ok_or_else(|| {
        format!(
            "ERR {} requires a client registration",
            op.command.name.to_ascii_lowercase()
        )
    })
}

/// `["qwatch", <query>, [rows...]]`
fn query_result(keyspace: &Keyspace, query: &WatchQuery) -> Reply {
    let rows = keyspace
        .scan(query.pattern())
        .iter()
        .map(|(key, value)| query.row(key, value))
        .collect();
    Reply::Array(vec![
        Reply::bytes("qwatch"),
        Reply::bytes(query.text().to_owned()),
        Reply::Array(rows),
    ])
}

/// Packs a result in the shape the command's registry entry calls for.
pub(crate) fn encode(migrated: &CommandSet, command: &str, reply: Result<Reply, String>) -> EvalResponse {
    let result = if migrated.contains(command) {
        reply.map(Payload::Native).map_err(EvalError)
    } else {
        match reply {
            Ok(reply) => Ok(Payload::Encoded(reply.to_frame().to_bytes())),
            Err(msg) => Err(EvalError(
                String::from_utf8_lossy(&Frame::Error(msg).to_bytes()).into_owned(),
            )),
        }
    };
    EvalResponse { result }
}
