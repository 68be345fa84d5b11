//! Graceful shutdown handling.

use tokio::sync::watch;

/// Manages graceful shutdown signals.
///
/// Shutdown is a latched state rather than a one-shot message: a receiver
/// created after [`ShutdownSignal::shutdown`] still observes it.
#[derive(Clone, Debug)]
pub struct ShutdownSignal {
    sender: watch::Sender<bool>,
}

impl ShutdownSignal {
    /// Create a new shutdown signal manager.
    pub fn new() -> Self {
        let (sender, _) = watch::channel(false);
        Self { sender }
    }

    /// Subscribe to shutdown notifications.
    pub fn subscribe(&self) -> ShutdownReceiver {
        ShutdownReceiver {
            receiver: self.sender.subscribe(),
        }
    }

    /// Trigger shutdown. Calling this more than once has no further effect.
    pub fn shutdown(&self) {
        self.sender.send_replace(true);
    }

    /// Whether shutdown has been triggered.
    pub fn is_shutdown(&self) -> bool {
        *self.sender.borrow()
    }
}

impl Default for ShutdownSignal {
    fn default() -> Self {
        Self::new()
    }
}

/// Receiving side of a [`ShutdownSignal`].
#[derive(Clone, Debug)]
pub struct ShutdownReceiver {
    receiver: watch::Receiver<bool>,
}

impl ShutdownReceiver {
    /// Wait until shutdown is triggered.
    ///
    /// Returns immediately if it already was. Also returns if every
    /// [`ShutdownSignal`] has been dropped, since nobody is left to trigger it.
    pub async fn recv(&mut self) {
        let _ = self.receiver.wait_for(|stopped| *stopped).await;
    }

    /// Whether shutdown has been triggered.
    pub fn is_shutdown(&self) -> bool {
        *self.receiver.borrow()
    }
}
