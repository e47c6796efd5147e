//! In-memory stand-ins for a websocket's two halves.

use std::io;
use std::pin::Pin;
use std::task::{Context, Poll};

use axum::extract::ws::Message;
use futures_util::{stream, Sink, Stream};
use tokio::sync::mpsc;

/// A sink that forwards every frame to a channel. Fails like a reset
/// socket once the receiving side is dropped.
pub struct ChannelSink(mpsc::UnboundedSender<Message>);

impl ChannelSink {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<Message>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self(tx), rx)
    }
}

impl Sink<Message> for ChannelSink {
    type Error = io::Error;

    fn poll_ready(self: Pin<&mut Self>, _: &mut Context<'_>) -> Poll<io::Result<()>> {
        Poll::Ready(Ok(()))
    }

    fn start_send(self: Pin<&mut Self>, item: Message) -> io::Result<()> {
        self.0
            .send(item)
            .map_err(|_| io::Error::from(io::ErrorKind::ConnectionReset))
    }

    fn poll_flush(self: Pin<&mut Self>, _: &mut Context<'_>) -> Poll<io::Result<()>> {
        Poll::Ready(Ok(()))
    }

    fn poll_close(self: Pin<&mut Self>, _: &mut Context<'_>) -> Poll<io::Result<()>> {
        Poll::Ready(Ok(()))
    }
}

pub type Incoming = Pin<Box<dyn Stream<Item = Result<Message, io::Error>> + Send>>;

/// A frame stream fed by the returned sender. Ends when the sender is
/// dropped.
pub fn incoming() -> (mpsc::UnboundedSender<Result<Message, io::Error>>, Incoming) {
    let (tx, rx) = mpsc::unbounded_channel();
    let frames = stream::unfold(rx, |mut rx| async move {
        rx.recv().await.map(|frame| (frame, rx))
    });
    (tx, Box::pin(frames))
}

pub fn text(s: &str) -> Result<Message, io::Error> {
    Ok(Message::Text(s.to_owned()))
}
