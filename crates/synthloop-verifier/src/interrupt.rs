use std::sync::Arc;
use tokio::sync::watch;

/// Cancellation flag shared between the Ctrl+C handler and in-flight work.
///
/// Triggering is idempotent. Waiters that subscribe after the trigger still
/// observe it.
#[derive(Clone)]
pub struct InterruptSignal {
    tx: Arc<watch::Sender<bool>>,
}

impl InterruptSignal {
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(false);
        Self { tx: Arc::new(tx) }
    }

    pub fn trigger(&self) {
        self.tx.send_replace(true);
    }

    pub fn is_triggered(&self) -> bool {
        *self.tx.borrow()
    }

    pub fn subscribe(&self) -> watch::Receiver<bool> {
        self.tx.subscribe()
    }

    /// Resolves once the signal has been triggered
    pub async fn triggered(&self) {
        let mut rx = self.subscribe();
        let _ = rx.wait_for(|interrupted| *interrupted).await;
    }
}

impl Default for InterruptSignal {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for InterruptSignal {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InterruptSignal")
            .field("triggered", &self.is_triggered())
            .finish()
    }
}
