//! Live-update delivery for one subscription.
//!
//! Every subscription gets its own task reading the engine's shared
//! update stream. Events tagged with another client id are skipped;
//! matching ones are rendered with the subscribing command's name and
//! written through the connection's shared sink.

use std::error::Error as StdError;
use std::sync::Arc;

use axum::extract::ws::Message;
use cinder_core::{ClientId, UpdateEvent};
use futures_util::Sink;
use tokio::sync::broadcast::{self, error::RecvError};
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::metrics;
use crate::server::ServerContext;
use crate::transcode::Response;
use crate::write::write_text;

/// Spawns the delivery task. `updates` must be subscribed before the
/// subscription request is sent so the first update is not missed.
pub fn spawn<S>(
    client_id: ClientId,
    command: String,
    updates: broadcast::Receiver<UpdateEvent>,
    writer: Arc<Mutex<S>>,
    ctx: Arc<ServerContext>,
) -> JoinHandle<()>
where
    S: Sink<Message> + Unpin + Send + 'static,
    S::Error: StdError + Send + Sync + 'static,
{
    tokio::spawn(run(client_id, command, updates, writer, ctx))
}

async fn run<S>(
    client_id: ClientId,
    command: String,
    mut updates: broadcast::Receiver<UpdateEvent>,
    writer: Arc<Mutex<S>>,
    ctx: Arc<ServerContext>,
) where
    S: Sink<Message> + Unpin + Send + 'static,
    S::Error: StdError + Send + Sync + 'static,
{
    debug!(%client_id, command = %command, "update task started");

    loop {
        let event = tokio::select! {
            _ = ctx.shutdown.closed() => break,
            event = updates.recv() => event,
        };

        match event {
            Ok(event) if event.client_id == client_id => {
                let text = ctx.transcoder.render(&command, Response::Update(event));
                if let Err(e) = write_text(&writer, &text, &ctx.write_policy).await {
                    warn!(%client_id, "update delivery failed: {e}");
                    break;
                }
                metrics::on_update_delivered();
            }
            Ok(_) => {}
            Err(RecvError::Lagged(missed)) => {
                warn!(%client_id, missed, "update stream lagged, events dropped");
            }
            Err(RecvError::Closed) => break,
        }
    }

    debug!(%client_id, "update task stopped");
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use bytes::Bytes;
    use cinder_core::{EvalResponse, Payload};

    use super::*;
    use crate::server::tests::test_context;
    use crate::testing::ChannelSink;

    fn update(client: u32, resp: &'static str) -> UpdateEvent {
        UpdateEvent {
            client_id: ClientId(client),
            eval: EvalResponse {
                result: Ok(Payload::Encoded(Bytes::from(resp))),
            },
        }
    }

    #[tokio::test]
    async fn only_matching_events_are_written() {
        let ctx = test_context();
        let (tx, _) = broadcast::channel(16);
        let (sink, mut written) = ChannelSink::new();
        let task = spawn(
            ClientId(7),
            "QWATCH".into(),
            tx.subscribe(),
            Arc::new(Mutex::new(sink)),
            Arc::clone(&ctx),
        );

        tx.send(update(3, "$5\r\nother\r\n")).unwrap();
        tx.send(update(7, "$4\r\nmine\r\n")).unwrap();

        let got = tokio::time::timeout(Duration::from_secs(1), written.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(got, Message::Text("\"mine\"".into()));
        assert!(written.try_recv().is_err());

        ctx.shutdown.close();
        tokio::time::timeout(Duration::from_secs(1), task)
            .await
            .unwrap()
            .unwrap();
    }

    #[tokio::test]
    async fn failed_write_ends_the_task() {
        let ctx = test_context();
        let (tx, _) = broadcast::channel(4);
        let (sink, written) = ChannelSink::new();
        let task = spawn(
            ClientId(2),
            "QWATCH".into(),
            tx.subscribe(),
            Arc::new(Mutex::new(sink)),
            Arc::clone(&ctx),
        );

        // the peer is gone, so the next delivery fails terminally
        drop(written);
        tx.send(update(2, "$1\r\nv\r\n")).unwrap();

        tokio::time::timeout(Duration::from_secs(1), task)
            .await
            .unwrap()
            .unwrap();
        // nothing else was torn down
        assert!(!ctx.shutdown.is_closed());
        assert_eq!(tx.receiver_count(), 0);
    }

    #[tokio::test]
    async fn closed_stream_ends_the_task() {
        let ctx = test_context();
        let (tx, _) = broadcast::channel(4);
        let (sink, _written) = ChannelSink::new();
        let task = spawn(
            ClientId(1),
            "SUBSCRIBE".into(),
            tx.subscribe(),
            Arc::new(Mutex::new(sink)),
            ctx,
        );
        drop(tx);
        tokio::time::timeout(Duration::from_secs(1), task)
            .await
            .unwrap()
            .unwrap();
    }
}
