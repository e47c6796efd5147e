//! Process-wide shutdown token.
//!
//! Opens once, closes once. Every connection task holds a clone and
//! selects on [`ShutdownSignal::closed`] at each await point.

use std::sync::Arc;

use tokio::sync::watch;

#[derive(Debug, Clone)]
pub struct ShutdownSignal {
    tx: Arc<watch::Sender<bool>>,
}

impl ShutdownSignal {
    pub fn new() -> Self {
        let (tx, _) = watch::channel(false);
        Self { tx: Arc::new(tx) }
    }

    /// Closes the signal. Returns true for the call that actually closed
    /// it; later calls are no-ops.
    pub fn close(&self) -> bool {
        self.tx.send_if_modified(|closed| !std::mem::replace(closed, true))
    }

    pub fn is_closed(&self) -> bool {
        *self.tx.borrow()
    }

    /// Resolves once the signal is closed (immediately if it already is).
    pub async fn closed(&self) {
        let mut rx = self.tx.subscribe();
        // the sender lives in self, so wait_for cannot fail
        let _ = rx.wait_for(|closed| *closed).await;
    }
}

impl Default for ShutdownSignal {
    fn default() -> Self {
        Self::new()
    }
}
