use tokio::sync::mpsc;

use crate::notifier::CompletionNotifier;
use crate::pipeline::SyncSummary;

/// Forwards every finished run summary to a channel.
#[derive(Debug, Clone)]
pub struct ChannelNotifier {
    tx: mpsc::UnboundedSender<SyncSummary>,
}

impl ChannelNotifier {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<SyncSummary>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }
}

impl CompletionNotifier for ChannelNotifier {
    async fn notify(&self, summary: &SyncSummary) {
        let _ = self.tx.send(summary.clone());
    }
}
