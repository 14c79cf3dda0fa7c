//! Fixed-size pool of workers dialling resolved peers.

use crate::crawler::CrawlerMessage;
use crate::lifecycle::{Interrupted, Lifecycle};
use crate::queue::{DialQueueReceiver, QueueError};
use crate::stats::StatsRecorder;
use kad_peers_overlay::{Host, PeerInfo};
use log::{debug, info, warn};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinSet;

/// Symmetric workers consuming the dial queue.
///
/// Each peer gets exactly one attempt. Failures are reported and dropped, the
/// peer is never re-queued.
#[derive(Clone)]
pub(crate) struct DialerPool<H: Host> {
    host: H,
    queue: DialQueueReceiver,
    dial_timeout: Duration,
    lifecycle: Lifecycle,
    stats: Arc<StatsRecorder>,
    messages: Option<mpsc::Sender<CrawlerMessage>>,
}

impl<H: Host> DialerPool<H> {
    pub(crate) fn new(
        host: H,
        queue: DialQueueReceiver,
        dial_timeout: Duration,
        lifecycle: Lifecycle,
        stats: Arc<StatsRecorder>,
        messages: Option<mpsc::Sender<CrawlerMessage>>,
    ) -> Self {
        DialerPool {
            host,
            queue,
            dial_timeout,
            lifecycle,
            stats,
            messages,
        }
    }

    /// Start `workers` dialer tasks.
    ///
    /// The tasks run until the lifecycle is cancelled or the queue is closed
    /// and drained.
    pub(crate) fn spawn(self, workers: usize) -> JoinSet<()> {
        let mut tasks = JoinSet::new();
        for worker in 0..workers {
            let pool = self.clone();
            tasks.spawn(async move { pool.work(worker).await });
        }
        tasks
    }

    async fn work(self, worker: usize) {
        loop {
            let peer = match self.queue.pop(&self.lifecycle).await {
                Ok(peer) => peer,
                Err(QueueError::Cancelled) => {
                    debug!("Dialer {worker} stopping on cancellation");
                    break;
                }
                Err(QueueError::Closed) => {
                    debug!("Dialer {worker} stopping, dial queue closed");
                    break;
                }
            };

            // The pop may have raced a cancellation.
            if self.lifecycle.is_cancelled() {
                debug!("Dialer {worker} discarding {} on cancellation", peer.id);
                self.stats.released();
                break;
            }

            self.dial(peer).await;
        }
    }

    /// Make one bounded connect attempt and report the outcome.
    async fn dial(&self, peer: PeerInfo) {
        debug!(
            "Connecting to {} ({} addresses)",
            peer.id,
            peer.addresses.len()
        );
        self.stats.dial_started();

        let outcome = self
            .lifecycle
            .bounded(self.dial_timeout, self.host.connect(&peer))
            .await;

        let message = match outcome {
            Ok(Ok(())) => {
                info!("CONNECTED to {}", peer.id);
                self.stats.dial_succeeded();
                CrawlerMessage::Connected(peer)
            }
            Ok(Err(e)) => {
                warn!("FAILED to connect to {}: {e}", peer.id);
                self.stats.dial_failed();
                CrawlerMessage::Failed {
                    reason: e.to_string(),
                    peer,
                }
            }
            Err(Interrupted::TimedOut) => {
                warn!(
                    "FAILED to connect to {}: timed out after {:?}",
                    peer.id, self.dial_timeout
                );
                self.stats.dial_failed();
                CrawlerMessage::Failed {
                    reason: format!("timed out after {:?}", self.dial_timeout),
                    peer,
                }
            }
            Err(Interrupted::Cancelled) => {
                debug!("Abandoned dial to {} on cancellation", peer.id);
                self.stats.released();
                return;
            }
        };
        self.stats.released();
        self.notify(message);
    }

    fn notify(&self, message: CrawlerMessage) {
        if let Some(messages) = &self.messages {
            // Observers must never hold up dialling.
            if let Err(e) = messages.try_send(message) {
                debug!("Dropped crawler message: {e}");
            }
        }
    }
}
