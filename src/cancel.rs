//! Cooperative cancellation for long-running waits
//!
//! The binary wires SIGINT/SIGTERM to a [`CancelHandle`]; every bounded wait
//! races its sleep against the matching [`Cancellation`].

use tokio::sync::watch;

/// Fires cancellation for all linked [`Cancellation`] receivers
#[derive(Debug)]
pub struct CancelHandle {
    tx: watch::Sender<bool>,
}

impl CancelHandle {
    /// Signal cancellation. Idempotent.
    pub fn cancel(&self) {
        self.tx.send_replace(true);
    }
}

/// Receiving side of a cancellation signal
#[derive(Debug, Clone)]
pub struct Cancellation {
    rx: watch::Receiver<bool>,
}

impl Cancellation {
    /// Create a linked handle/receiver pair
    pub fn new() -> (CancelHandle, Self) {
        let (tx, rx) = watch::channel(false);
        (CancelHandle { tx }, Self { rx })
    }

    /// A signal that never fires
    pub fn never() -> Self {
        let (handle, cancellation) = Self::new();
        // Dropping the sender leaves the value at `false` forever.
        drop(handle);
        cancellation
    }

    /// Whether cancellation has been requested
    pub fn is_cancelled(&self) -> bool {
        *self.rx.borrow()
    }

    /// Resolve once cancellation is requested.
    ///
    /// Pends forever when the handle was dropped without cancelling.
    pub async fn cancelled(&self) {
        let mut rx = self.rx.clone();
        if rx.wait_for(|cancelled| *cancelled).await.is_err() {
            std::future::pending::<()>().await;
        }
    }
}
