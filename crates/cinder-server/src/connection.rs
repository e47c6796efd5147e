//! Per-connection command dispatch.
//!
//! A connection reads one text frame at a time, turns it into a
//! [`Command`], forwards it to the home shard and writes back the
//! rendered result before reading the next frame. There is at most one
//! request in flight per connection.
//!
//! `QWATCH` and `SUBSCRIBE` additionally start a live-update task (see
//! [`fanout`](crate::fanout)) that shares the connection's sink. All
//! writes go through one async mutex, so update frames and responses
//! never interleave mid-frame.

use std::borrow::Cow;
use std::error::Error as StdError;
use std::fmt::Display;
use std::sync::Arc;

use axum::extract::ws::{close_code, CloseFrame, Message, WebSocket};
use cinder_core::{
    ClientId, ClientRegistration, ShardError, ShardId, StoreOp, StoreResponse, WorkerId,
};
use cinder_protocol::{Command, ProtocolError};
use futures_util::{Sink, SinkExt, Stream, StreamExt};
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::fanout;
use crate::metrics;
use crate::server::ServerContext;
use crate::transcode::{Response, INTERNAL_ERROR};
use crate::write::write_text;

pub const READ_FAILED: &str = "error: command reading failed";
pub const PARSE_FAILED: &str = "error: parsing failed";
pub const NOT_IMPLEMENTED: &str = "Command is not implemented with Websocket";
pub const CLOSE_REASON: &str = "close 1000 (normal)";

/// Every websocket request goes to this shard.
const HOME_SHARD: ShardId = 0;

/// Capacity of a connection's response queue. One slot is enough with
/// a single request in flight; the rest is slack.
const RESPONSE_QUEUE: usize = 4;

fn is_subscription(name: &str) -> bool {
    matches!(name, "QWATCH" | "SUBSCRIBE")
}

#[derive(Debug, PartialEq, Eq)]
enum Flow {
    Continue,
    Stop,
}

pub async fn handle_socket(socket: WebSocket, ctx: Arc<ServerContext>) {
    let (sink, stream) = socket.split();
    serve(stream, sink, ctx).await;
}

/// Runs one connection to completion over any websocket-shaped pair of
/// halves.
pub async fn serve<St, Si, E>(stream: St, sink: Si, ctx: Arc<ServerContext>)
where
    St: Stream<Item = Result<Message, E>> + Unpin,
    E: Display,
    Si: Sink<Message> + Unpin + Send + 'static,
    Si::Error: StdError + Send + Sync + 'static,
{
    let worker_id = ctx.next_worker_id();
    let (tx, responses) = mpsc::channel(RESPONSE_QUEUE);
    ctx.manager.register_worker(worker_id.clone(), tx);
    metrics::on_connection_opened();
    debug!(worker = %worker_id, "connection opened");

    let mut conn = Connection {
        ctx,
        worker_id,
        writer: Arc::new(Mutex::new(sink)),
        responses,
        subscriptions: Vec::new(),
    };
    conn.dispatch(stream).await;
    conn.close().await;
    metrics::on_connection_closed();
}

struct Connection<Si> {
    ctx: Arc<ServerContext>,
    worker_id: WorkerId,
    writer: Arc<Mutex<Si>>,
    responses: mpsc::Receiver<StoreResponse>,
    subscriptions: Vec<(ClientId, JoinHandle<()>)>,
}

impl<Si> Connection<Si>
where
    Si: Sink<Message> + Unpin + Send + 'static,
    Si::Error: StdError + Send + Sync + 'static,
{
    async fn dispatch<St, E>(&mut self, mut stream: St)
    where
        St: Stream<Item = Result<Message, E>> + Unpin,
        E: Display,
    {
        loop {
            let frame = tokio::select! {
                _ = self.ctx.shutdown.closed() => break,
                frame = stream.next() => frame,
            };

            let flow = match frame {
                None | Some(Ok(Message::Close(_))) => break,
                Some(Ok(Message::Text(text))) => self.handle(&text).await,
                Some(Ok(Message::Binary(data))) => match std::str::from_utf8(&data) {
                    Ok(text) => self.handle(text).await,
                    Err(_) => self.send(PARSE_FAILED).await,
                },
                Some(Ok(_)) => Flow::Continue,
                Some(Err(e)) => {
                    debug!(worker = %self.worker_id, "read failed: {e}");
                    self.send(READ_FAILED).await
                }
            };
            if flow == Flow::Stop {
                break;
            }
        }
    }

    async fn handle(&mut self, text: &str) -> Flow {
        let command = match Command::parse(text) {
            Ok(command) => command,
            Err(ProtocolError::EmptyCommand) => return Flow::Continue,
            Err(e) => {
                debug!(worker = %self.worker_id, "parse failed: {e}");
                return self.send(PARSE_FAILED).await;
            }
        };
        metrics::record_command(metrics::command_label(&command.name));

        if command.name == "ABORT" {
            info!(worker = %self.worker_id, "ABORT received, shutting down server");
            self.ctx.shutdown.close();
            return Flow::Stop;
        }
        if self.ctx.unimplemented.contains(&command.name) {
            return self.send(NOT_IMPLEMENTED).await;
        }

        let name = command.name.clone();
        let client = is_subscription(&name).then(|| self.subscribe(&name));
        let op = StoreOp {
            command,
            worker_id: self.worker_id.clone(),
            shard_id: HOME_SHARD,
            websocket_op: true,
            client,
        };

        match self.call(op).await {
            Ok(Some(response)) => {
                let text = self.ctx.transcoder.render(&name, Response::Shard(response));
                self.send(&text).await
            }
            Ok(None) => Flow::Stop,
            Err(e) => {
                warn!(worker = %self.worker_id, "shard request failed: {e}");
                self.send(INTERNAL_ERROR).await
            }
        }
    }

    /// Mints a client id and starts its update task. The task subscribes
    /// to the update stream here, before the request reaches the shard.
    fn subscribe(&mut self, command: &str) -> ClientRegistration {
        let client_id = self.ctx.next_client_id();
        let task = fanout::spawn(
            client_id,
            command.to_owned(),
            self.ctx.manager.subscribe_updates(),
            Arc::clone(&self.writer),
            Arc::clone(&self.ctx),
        );
        self.subscriptions.push((client_id, task));
        ClientRegistration { client_id }
    }

    /// Sends `op` and waits for its response. `Ok(None)` means shutdown
    /// interrupted the wait.
    async fn call(&mut self, op: StoreOp) -> Result<Option<StoreResponse>, ShardError> {
        tokio::select! {
            _ = self.ctx.shutdown.closed() => return Ok(None),
            sent = self.ctx.manager.send(op) => sent?,
        }

        tokio::select! {
            _ = self.ctx.shutdown.closed() => Ok(None),
            response = self.responses.recv() => Ok(response),
        }
    }

    async fn send(&self, text: &str) -> Flow {
        match write_text(&self.writer, text, &self.ctx.write_policy).await {
            Ok(()) => Flow::Continue,
            Err(e) => {
                warn!(worker = %self.worker_id, "write failed, closing connection: {e}");
                Flow::Stop
            }
        }
    }

    /// Stops update tasks, says goodbye to the peer and releases the
    /// worker and client registrations.
    async fn close(&mut self) {
        for (_, task) in &self.subscriptions {
            task.abort();
        }

        let frame = Message::Close(Some(CloseFrame {
            code: close_code::NORMAL,
            reason: Cow::Borrowed(CLOSE_REASON),
        }));
        let goodbye = async {
            let mut sink = self.writer.lock().await;
            let _ = sink.send(frame).await;
            let _ = sink.close().await;
        };
        if tokio::time::timeout(self.ctx.write_policy.attempt_timeout, goodbye)
            .await
            .is_err()
        {
            debug!(worker = %self.worker_id, "close handshake timed out");
        }

        self.ctx.manager.unregister_worker(&self.worker_id);
        for (client_id, _) in self.subscriptions.drain(..) {
            self.ctx.manager.forget_client(client_id).await;
        }
        debug!(worker = %self.worker_id, "connection closed");
    }
}
