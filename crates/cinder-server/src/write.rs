//! Text-frame writes with bounded retry.
//!
//! The dispatch loop and any live-update tasks of a connection share one
//! websocket sink behind a [`tokio::sync::Mutex`]. Every write goes
//! through [`write_text`], which holds the lock for a single attempt,
//! bounds that attempt with a fresh deadline, and classifies failures:
//!
//! | underlying io error               | outcome                   |
//! |-----------------------------------|---------------------------|
//! | `BrokenPipe`, `ConnectionReset`,  | [`WriteError::PeerGone`]  |
//! | `ConnectionAborted`               |                           |
//! | `ENOBUFS`                         | [`WriteError::BufferExhausted`] |
//! | `WouldBlock`                      | retry after backoff       |
//! | anything else                     | [`WriteError::Transport`] |
//!
//! Running out of retries is itself terminal.

use std::error::Error as StdError;
use std::io;
use std::time::Duration;

use axum::extract::ws::Message;
use futures_util::{Sink, SinkExt};
use rand::Rng;
use thiserror::Error;
use tokio::sync::Mutex;
use tracing::debug;

use crate::metrics;

/// Retry and deadline settings for one write.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WritePolicy {
    /// Total attempts allowed. Zero is treated as one.
    pub max_retries: u32,
    pub attempt_timeout: Duration,
    pub backoff_base: Duration,
    /// Upper bound (exclusive) of the random delay added to each backoff.
    pub jitter: Duration,
}

impl Default for WritePolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            attempt_timeout: Duration::from_secs(10),
            backoff_base: Duration::from_millis(100),
            jitter: Duration::from_millis(50),
        }
    }
}

impl WritePolicy {
    /// Delay before retry number `attempt + 1`: `base * 2^attempt` plus
    /// jitter.
    pub fn backoff(&self, attempt: u32) -> Duration {
        let base = self.backoff_base.saturating_mul(2u32.saturating_pow(attempt));
        let jitter_ms = self.jitter.as_millis() as u64;
        if jitter_ms == 0 {
            return base;
        }
        base + Duration::from_millis(rand::thread_rng().gen_range(0..jitter_ms))
    }
}

#[derive(Debug, Error)]
pub enum WriteError {
    #[error("peer closed the connection")]
    PeerGone,

    #[error("no buffer space available")]
    BufferExhausted,

    #[error("write timed out after {0:?}")]
    Timeout(Duration),

    #[error("transport error: {0}")]
    Transport(String),

    #[error("write still failing after {0} attempts")]
    RetriesExhausted(u32),
}

impl WriteError {
    /// Short label used in metrics.
    pub fn kind(&self) -> &'static str {
        match self {
            WriteError::PeerGone => "peer_gone",
            WriteError::BufferExhausted => "buffer_exhausted",
            WriteError::Timeout(_) => "timeout",
            WriteError::Transport(_) => "transport",
            WriteError::RetriesExhausted(_) => "retries_exhausted",
        }
    }
}

enum Failure {
    Retry,
    Fatal(WriteError),
}

/// Sends `text` as one text frame, retrying transient failures per
/// `policy`. Any error returned means the connection should be dropped.
pub async fn write_text<S>(sink: &Mutex<S>, text: &str, policy: &WritePolicy) -> Result<(), WriteError>
where
    S: Sink<Message> + Unpin,
    S::Error: StdError + 'static,
{
    let max_attempts = policy.max_retries.max(1);
    let mut attempt = 0;

    loop {
        attempt += 1;
        let outcome = tokio::time::timeout(policy.attempt_timeout, async {
            let mut sink = sink.lock().await;
            sink.send(Message::Text(text.to_owned())).await
        })
        .await;

        let failure = match outcome {
            Ok(Ok(())) => return Ok(()),
            Ok(Err(e)) => classify(&e),
            Err(_) => Failure::Fatal(WriteError::Timeout(policy.attempt_timeout)),
        };

        let err = match failure {
            Failure::Fatal(err) => err,
            Failure::Retry if attempt >= max_attempts => WriteError::RetriesExhausted(attempt),
            Failure::Retry => {
                let delay = policy.backoff(attempt - 1);
                debug!(attempt, ?delay, "write would block, retrying");
                metrics::on_write_retry();
                tokio::time::sleep(delay).await;
                continue;
            }
        };
        metrics::on_write_failure(err.kind());
        return Err(err);
    }
}

/// Walks the source chain to the first io error and classifies it.
fn classify(err: &(dyn StdError + 'static)) -> Failure {
    let mut current = Some(err);
    while let Some(e) = current {
        if let Some(io_err) = e.downcast_ref::<io::Error>() {
            return classify_io(io_err);
        }
        current = e.source();
    }
    Failure::Fatal(WriteError::Transport(err.to_string()))
}

fn classify_io(err: &io::Error) -> Failure {
    match err.kind() {
        io::ErrorKind::BrokenPipe
        | io::ErrorKind::ConnectionReset
        | io::ErrorKind::ConnectionAborted => Failure::Fatal(WriteError::PeerGone),
        _ if err.raw_os_error() == Some(libc::ENOBUFS) => {
            Failure::Fatal(WriteError::BufferExhausted)
        }
        io::ErrorKind::WouldBlock => Failure::Retry,
        _ => Failure::Fatal(WriteError::Transport(err.to_string())),
    }
}
