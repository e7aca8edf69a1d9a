use tokio::sync::watch;

/// Sending half of the shutdown signal of background tasks.
#[derive(Debug, Clone)]
pub struct ShutdownTx(watch::Sender<bool>);

/// Receiving half of the shutdown signal.
pub type ShutdownRx = watch::Receiver<bool>;

impl ShutdownTx {
    /// Signals every subscriber. Returns false when no task is listening anymore.
    pub fn shutdown(&self) -> bool {
        self.0.send(true).is_ok()
    }

    pub fn subscribe(&self) -> ShutdownRx {
        self.0.subscribe()
    }
}

pub fn create_shutdown_channel() -> (ShutdownTx, ShutdownRx) {
    let (tx, rx) = watch::channel(false);
    (ShutdownTx(tx), rx)
}

/// Resolves once shutdown was signalled or the sender is gone.
pub async fn wait_for_shutdown(rx: &mut ShutdownRx) {
    let _ = rx.wait_for(|stopped| *stopped).await;
}
