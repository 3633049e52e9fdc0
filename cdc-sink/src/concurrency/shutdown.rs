use tokio::sync::watch;

/// Transmitter side of the worker shutdown channel.
///
/// Shutdown is one-shot: once requested it cannot be revoked, and requesting it again has no
/// effect.
#[derive(Debug, Clone)]
pub struct ShutdownTx(watch::Sender<bool>);

impl ShutdownTx {
    /// Wraps a watch sender into a [`ShutdownTx`].
    pub fn new(tx: watch::Sender<bool>) -> Self {
        Self(tx)
    }

    /// Requests every subscribed worker to stop at its next idle point.
    pub fn shutdown(&self) {
        // Infallible send so shutdown works even when no receiver is alive anymore.
        self.0.send_replace(true);
    }

    /// Returns `true` if shutdown was already requested.
    pub fn is_shutdown(&self) -> bool {
        *self.0.borrow()
    }

    /// Creates a new shutdown receiver subscription.
    pub fn subscribe(&self) -> ShutdownRx {
        self.0.subscribe()
    }
}

/// Receiver side of the worker shutdown channel.
pub type ShutdownRx = watch::Receiver<bool>;

/// Creates a new shutdown channel in the running state.
pub fn create_shutdown_channel() -> (ShutdownTx, ShutdownRx) {
    let (tx, rx) = watch::channel(false);
    (ShutdownTx::new(tx), rx)
}

/// Resolves once shutdown has been requested.
///
/// Shutdown requested before the call is observed too. A dropped transmitter counts as a
/// shutdown request, since no one can stop the worker anymore.
pub async fn wait_for_shutdown(shutdown_rx: &mut ShutdownRx) {
    let _ = shutdown_rx.wait_for(|shutdown| *shutdown).await;
}
