use crate::dialer::DialerPool;
use crate::discovery::{DiscoveryConfig, DiscoveryDriver};
use crate::lifecycle::Lifecycle;
use crate::queue::dial_queue;
use crate::stats::{CrawlerStats, StatsRecorder};
use kad_peers_overlay::{Dht, DhtError, Host, PeerInfo};
use log::{debug, info, warn};
use std::error::Error;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;

/// Errors that stop a crawl.
#[derive(Debug)]
pub enum CrawlerError {
    /// The random source failed while drawing an anchor key.
    AnchorGeneration(rand::Error),
    /// The DHT rejected an anchor query under [`AnchorErrorPolicy::Fatal`](crate::AnchorErrorPolicy::Fatal).
    AnchorQuery(DhtError),
    /// Every dialer stopped while discovery still had peers to hand over.
    DialQueueClosed,
}

impl fmt::Display for CrawlerError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CrawlerError::AnchorGeneration(err) => {
                write!(f, "Unable to generate anchor key: {err}")
            }
            CrawlerError::AnchorQuery(err) => write!(f, "Anchor query failed: {err}"),
            CrawlerError::DialQueueClosed => write!(f, "Dial queue closed, no dialers left"),
        }
    }
}

impl Error for CrawlerError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            CrawlerError::AnchorGeneration(err) => Some(err),
            CrawlerError::AnchorQuery(err) => Some(err),
            CrawlerError::DialQueueClosed => None,
        }
    }
}

/// Messages sent from the [`Crawler`] to an observer about dial outcomes.
#[derive(Debug, Clone)]
pub enum CrawlerMessage {
    /// A transport connection to the peer was established.
    Connected(PeerInfo),
    /// The single dial attempt for the peer failed or timed out.
    Failed { peer: PeerInfo, reason: String },
}

impl fmt::Display for CrawlerMessage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CrawlerMessage::Connected(peer) => write!(f, "Connected Peer: {peer}"),
            CrawlerMessage::Failed { peer, reason } => {
                write!(f, "Failed Peer: {peer}: {reason}")
            }
        }
    }
}

/// Settings fixed at build time.
#[derive(Debug, Clone)]
pub(crate) struct CrawlerConfig {
    pub(crate) dialers: usize,
    pub(crate) dial_timeout: Duration,
    pub(crate) discovery: DiscoveryConfig,
    pub(crate) messages: Option<mpsc::Sender<CrawlerMessage>>,
}

/// A crawler for a Kademlia overlay network.
///
/// Discovers peers through random-anchor DHT walks and attempts one transport
/// connection to each, reporting outcomes through the log and an optional
/// [`CrawlerMessage`] channel. Build one with [`CrawlerBuilder`](crate::CrawlerBuilder).
#[derive(Clone)]
pub struct Crawler<H: Host, D: Dht> {
    host: H,
    dht: D,
    config: CrawlerConfig,
    stats: Arc<StatsRecorder>,
}

impl<H: Host, D: Dht> Crawler<H, D> {
    pub(crate) fn new(host: H, dht: D, config: CrawlerConfig) -> Self {
        Crawler {
            host,
            dht,
            config,
            stats: Arc::new(StatsRecorder::default()),
        }
    }

    /// Crawl until `lifecycle` is cancelled.
    ///
    /// Runs one discovery task on the calling task and a pool of dialer tasks
    /// beside it. Each run starts with an empty peer registry.
    ///
    /// # Returns
    ///
    /// * `Ok(())` - The lifecycle was cancelled and every task has stopped.
    /// * `Err(CrawlerError)` - An anchor-layer failure ended the crawl, or every
    ///   dialer stopped early.
    pub async fn run(&self, lifecycle: Lifecycle) -> Result<(), CrawlerError> {
        // Child, so a fatal error can stop the dialers without cancelling the caller.
        let lifecycle = lifecycle.child();
        let (queue_tx, queue_rx) = dial_queue(self.config.dialers);

        let mut dialers = DialerPool::new(
            self.host.clone(),
            queue_rx.clone(),
            self.config.dial_timeout,
            lifecycle.clone(),
            self.stats.clone(),
            self.config.messages.clone(),
        )
        .spawn(self.config.dialers);
        info!("Crawler started with {} dialers", self.config.dialers);

        let result = {
            let mut driver = DiscoveryDriver::new(
                &self.dht,
                queue_tx,
                self.config.discovery,
                lifecycle.clone(),
                self.stats.clone(),
            );
            driver.run().await
        };

        lifecycle.cancel();
        while let Some(joined) = dialers.join_next().await {
            if let Err(e) = joined {
                warn!("Dialer task failed: {e}");
            }
        }

        // Peers queued at shutdown were never dialled.
        let mut discarded = 0;
        while queue_rx.try_pop().is_some() {
            self.stats.released();
            discarded += 1;
        }
        if discarded > 0 {
            debug!("Discarded {discarded} queued peers on shutdown");
        }

        info!("Crawler stopped: {}", self.stats());
        result
    }

    /// Snapshot of the crawl's counters, cumulative across runs.
    pub fn stats(&self) -> CrawlerStats {
        self.stats.snapshot()
    }

    pub fn host(&self) -> &H {
        &self.host
    }

    pub fn dht(&self) -> &D {
        &self.dht
    }
}
